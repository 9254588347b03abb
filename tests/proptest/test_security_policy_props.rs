//! Property-based tests for the command security policy

use persistent_shell::security::{leading_executable, Rejection};
use persistent_shell::{SecurityPolicy, SecurityValidator, Verdict};
use proptest::prelude::*;

fn enabled(allowed: &[&str], blocked: &[&str]) -> SecurityValidator {
    SecurityValidator::new(SecurityPolicy {
        enabled: true,
        allowed_executables: allowed.iter().map(|s| s.to_string()).collect(),
        blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    })
    .unwrap()
}

proptest! {
    #[test]
    fn test_evaluate_doesnt_panic(s in "\\PC*") {
        let validator = enabled(&["ls"], &[r"rm\s+-rf"]);
        let _ = validator.evaluate(&s);
    }

    #[test]
    fn test_disabled_policy_allows_anything(s in ".*") {
        let validator = SecurityValidator::new(SecurityPolicy::default()).unwrap();
        prop_assert_eq!(validator.evaluate(&s), Verdict::Allow);
    }

    #[test]
    fn test_allowed_executable_with_args(
        args in prop::collection::vec("[a-zA-Z0-9._/-]{1,10}", 0..5),
    ) {
        let validator = enabled(&["ls"], &[]);
        let command = format!("ls {}", args.join(" "));
        prop_assert!(validator.evaluate(&command).is_allowed());
    }

    #[test]
    fn test_unlisted_executable_is_rejected(exe in "[a-z]{3,12}") {
        prop_assume!(exe != "ls");
        let validator = enabled(&["ls"], &[]);
        prop_assert_eq!(
            validator.evaluate(&format!("{} --help", exe)),
            Verdict::Reject(Rejection::ExecutableNotAllowed(exe.clone()))
        );
    }

    #[test]
    fn test_blocked_pattern_anywhere_in_line(
        prefix in "[a-z ]{0,20}",
        suffix in "[a-z ]{0,20}",
    ) {
        let validator = enabled(&[], &["forbidden"]);
        let command = format!("echo {}forbidden{}", prefix, suffix);
        prop_assert!(!validator.evaluate(&command).is_allowed());
    }

    #[test]
    fn test_rejects_nul_bytes(
        prefix in "[a-z]{0,20}",
        suffix in "[a-z]{0,20}",
    ) {
        let validator = enabled(&[], &[]);
        let command = format!("{}\0{}", prefix, suffix);
        prop_assert_eq!(
            validator.evaluate(&command),
            Verdict::Reject(Rejection::ControlCharacter)
        );
    }

    #[test]
    fn test_leading_executable_is_first_word(
        exe in "[a-z][a-z0-9_-]{0,15}",
        rest in "[ a-z0-9]{0,30}",
        indent in " {0,4}",
    ) {
        let command = format!("{}{} {}", indent, exe, rest);
        prop_assert_eq!(leading_executable(&command), Some(exe.as_str()));
    }
}
