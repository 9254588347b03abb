//! persistent-shell - stdio driver for the persistent shell session engine
//!
//! Reads one JSON tool call per line on stdin and writes one JSON response
//! per line on stdout. Logs go to stderr.
//!
//! ```text
//! {"id":1,"tool":"execute_command","arguments":{"command":"cd /tmp && pwd","timeout":5}}
//! {"id":2,"tool":"get_working_directory"}
//! {"id":3,"tool":"reset_session"}
//! {"id":4,"tool":"health"}
//! ```

use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use persistent_shell::config::LogFormat;
use persistent_shell::{
    handle_startup_error, CommandRequest, Config, ConfigLoader, SessionManager, NAME, VERSION,
};

/// Command line arguments
#[derive(Debug, Default, PartialEq)]
struct AppArgs {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Enable debug logging
    debug: bool,
}

impl AppArgs {
    /// Parse command line arguments
    fn parse() -> Result<Self> {
        Self::parse_from(env::args().skip(1))
    }

    fn parse_from<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut app_args = AppArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => match args.next() {
                    Some(path) => app_args.config_path = Some(PathBuf::from(path)),
                    None => bail!("Missing config file path"),
                },
                "--debug" | "-d" => {
                    app_args.debug = true;
                }
                "--help" | "-h" => {
                    print_help();
                    process::exit(0);
                }
                "--version" | "-v" => {
                    println!("{} v{}", NAME, VERSION);
                    process::exit(0);
                }
                other if other.starts_with('-') => {
                    bail!("Unknown option: {}", other);
                }
                other => {
                    bail!("Unexpected argument: {}", other);
                }
            }
        }

        Ok(app_args)
    }
}

/// Print help information
fn print_help() {
    println!("{} - persistent PTY-backed shell sessions over stdio", NAME);
    println!();
    println!("USAGE:");
    println!("    persistent-shell [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>    Path to configuration file");
    println!("    -d, --debug            Enable debug logging");
    println!("    -h, --help             Print this help message");
    println!("    -v, --version          Print version information");
    println!();
    println!("PROTOCOL:");
    println!("    One JSON object per line on stdin:");
    println!("      {{\"id\": 1, \"tool\": \"execute_command\", \"arguments\": {{\"command\": \"ls\", \"timeout\": 10}}}}");
    println!("    Tools: execute_command, get_working_directory, reset_session, health");
    println!();
    println!("CONFIGURATION:");
    println!("    Configuration files are searched in the following order:");
    println!("    1. Path specified with --config");
    println!("    2. $PERSISTENT_SHELL_CONFIG");
    println!("    3. $XDG_CONFIG_HOME/persistent-shell/config.toml (or config.json)");
    println!("    4. ~/.persistent-shell/config.toml");
    println!("    5. ./persistent-shell.toml");
    println!("    6. Built-in defaults");
    println!();
    println!("ENVIRONMENT:");
    println!("    PERSISTENT_SHELL_<SECTION>__<FIELD>   Override a config value");
    println!("                                          (e.g. PERSISTENT_SHELL_SECURITY__ENABLED=true)");
    println!("    RUST_LOG                              Set logging filter");
}

/// Load configuration from file or the default search path
fn load_configuration(args: &AppArgs) -> persistent_shell::Result<Config> {
    match &args.config_path {
        Some(path) => {
            if !path.is_file() {
                return Err(persistent_shell::Error::ConfigLoadFailed {
                    path: path.clone(),
                    reason: "Configuration file does not exist".to_string(),
                });
            }
            ConfigLoader::with_search_paths(vec![path.clone()]).load_with_env(env::vars())
        }
        None => ConfigLoader::load(),
    }
}

/// Install the tracing subscriber; logs are written to stderr
fn init_logging(args: &AppArgs, config: &Config) {
    let level = if args.debug {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let env_filter = env::var("RUST_LOG").unwrap_or(level);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env_filter))
        .with_writer(std::io::stderr)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Console => builder.compact().init(),
    }
}

/// One line of input
#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    /// Seconds
    #[serde(default)]
    timeout: Option<f64>,
}

/// Run one tool call and build its response line
async fn dispatch(manager: &SessionManager, request: ToolRequest) -> Value {
    let id = request.id.clone();
    match call_tool(manager, request).await {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(e) => json!({ "id": id, "error": { "message": e.to_string() } }),
    }
}

async fn call_tool(manager: &SessionManager, request: ToolRequest) -> Result<Value> {
    match request.tool.as_str() {
        "execute_command" => {
            let args: ExecuteArgs = serde_json::from_value(request.arguments)
                .context("execute_command expects {\"command\": string, \"timeout\"?: number}")?;
            let mut command = CommandRequest::new(args.command);
            if let Some(secs) = args.timeout {
                command = command.with_timeout_secs_f64(secs);
            }
            let result = manager.execute_command(command).await;
            Ok(serde_json::to_value(result)?)
        }
        "get_working_directory" => Ok(json!({ "cwd": manager.get_working_directory() })),
        "reset_session" => {
            let cwd = manager.reset_session().await?;
            Ok(json!({ "cwd": cwd }))
        }
        "health" => Ok(serde_json::to_value(manager.health())?),
        other => bail!("Unknown tool: {}", other),
    }
}

/// Serve tool calls until stdin closes or Ctrl+C
async fn serve(manager: Arc<SessionManager>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = response.to_string();
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!("Failed to write response: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                error!("Failed to flush stdout: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ToolRequest>(&line) {
                    Ok(request) => {
                        let manager = Arc::clone(&manager);
                        let tx = tx.clone();
                        in_flight.spawn(async move {
                            let response = dispatch(&manager, request).await;
                            let _ = tx.send(response);
                        });
                    }
                    Err(e) => {
                        warn!("Malformed request: {}", e);
                        let _ = tx.send(json!({
                            "id": Value::Null,
                            "error": { "message": format!("Malformed request: {}", e) }
                        }));
                    }
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Request task failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                in_flight.abort_all();
                break;
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            if !e.is_cancelled() {
                error!("Request task failed: {}", e);
            }
        }
    }
    drop(tx);
    if let Err(e) = writer.await {
        error!("Response writer failed: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppArgs::parse().unwrap_or_else(|e| {
        eprintln!("Failed to parse arguments: {}", e);
        print_help();
        process::exit(1);
    });

    let config = match load_configuration(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", handle_startup_error(&e));
            process::exit(1);
        }
    };

    init_logging(&args, &config);
    info!("Starting {} v{}", NAME, VERSION);
    debug!("Configuration: {:?}", config);

    let manager = match persistent_shell::start_session(config).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", handle_startup_error(&e));
            process::exit(1);
        }
    };

    let served = serve(Arc::clone(&manager)).await;
    manager.shutdown().await;
    info!("{} shutdown complete", NAME);
    served
}
