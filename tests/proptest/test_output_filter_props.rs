//! Property-based tests for output normalization and capture

use persistent_shell::ansi::ControlSequenceFilter;
use persistent_shell::protocol::capture::OutputCapture;
use persistent_shell::protocol::marker::{Marker, MARKER_PREFIX};
use persistent_shell::pty::StreamMatcher;
use proptest::prelude::*;

fn status_block(marker: &Marker, code: i32, cwd: &str) -> String {
    format!("\n{}{}__{}__{}__END__\n", MARKER_PREFIX, marker.token(), code, cwd)
}

/// Feed `bytes` in pieces of at most `chunk` bytes, stopping at the first match
fn feed_chunked(capture: &mut OutputCapture<'_>, bytes: &[u8], chunk: usize) -> bool {
    bytes.chunks(chunk.max(1)).any(|piece| capture.feed(piece))
}

proptest! {
    #[test]
    fn test_filter_doesnt_panic(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut filter = ControlSequenceFilter::new();
        let _ = filter.feed(&bytes);
    }

    #[test]
    fn test_filter_chunking_is_invisible(
        text in "(\\PC|\x1b\\[[0-9;]{0,6}m|\r\n){0,200}",
        split in 1usize..64,
    ) {
        let whole = ControlSequenceFilter::strip(&text);

        let mut filter = ControlSequenceFilter::new();
        let pieces: String = text
            .as_bytes()
            .chunks(split)
            .map(|piece| filter.feed(piece))
            .collect();

        prop_assert_eq!(pieces, whole);
    }

    #[test]
    fn test_filter_output_has_no_escape(text in "(\\PC|\x1b\\[[0-9;]{0,6}[A-Za-z]){0,200}") {
        let plain = ControlSequenceFilter::strip(&text);
        prop_assert!(!plain.contains('\x1b'));
        prop_assert!(!plain.contains('\r'));
    }

    #[test]
    fn test_capture_finds_block_at_any_chunking(
        body in "[a-zA-Z0-9 \n]{0,500}",
        code in -1i32..256,
        chunk in 1usize..97,
    ) {
        let marker = Marker::new().unwrap();
        let mut capture = OutputCapture::new(&marker, 1 << 20);
        let stream = format!("{}{}", body, status_block(&marker, code, "/work dir"));

        prop_assert!(feed_chunked(&mut capture, stream.as_bytes(), chunk));
        let captured = capture.finish();
        let status = captured.status.unwrap();
        prop_assert_eq!(status.exit_code, code);
        prop_assert_eq!(captured.output, body.trim_end_matches('\n'));
        prop_assert!(!captured.truncated);
    }

    #[test]
    fn test_capture_never_exceeds_cap(
        body in "[a-z\n]{0,4000}",
        cap in 0usize..2048,
        chunk in 1usize..512,
    ) {
        let marker = Marker::new().unwrap();
        let mut capture = OutputCapture::new(&marker, cap);
        let stream = format!("{}{}", body, status_block(&marker, 0, "/"));

        prop_assert!(feed_chunked(&mut capture, stream.as_bytes(), chunk));
        let captured = capture.finish();
        prop_assert!(captured.output.len() <= cap);
        prop_assert_eq!(captured.truncated, body.trim_end_matches('\n').len() > cap);
    }

    #[test]
    fn test_capture_ignores_foreign_tokens(body in "[a-z ]{0,100}") {
        let marker = Marker::new().unwrap();
        let other = Marker::new().unwrap();
        let mut capture = OutputCapture::new(&marker, 4096);
        let stream = format!("{}{}", body, status_block(&other, 0, "/"));

        prop_assert!(!feed_chunked(&mut capture, stream.as_bytes(), 7));
        prop_assert!(capture.finish().status.is_none());
    }
}
