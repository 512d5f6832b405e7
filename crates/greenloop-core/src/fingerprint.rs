//! Failure-text normalization and fingerprinting.
//!
//! Two renderings of the same logical failure (different timestamps, line
//! numbers, commit SHAs or checkout roots) must produce the same fingerprint.
//! Everything here is pure and has no orchestration dependency.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalized text is truncated to this many characters before hashing.
pub const MAX_NORMALIZED_CHARS: usize = 500;

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        // Order matters: timestamps before times, paths before line:col.
        // Absolute paths keep their parent directory and file name.
        [
            (
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
                "<ts>",
            ),
            (r"\b\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\b", "<time>"),
            (
                r#"(^|[\s'"(\[=])(?:[A-Za-z]:)?(?:[/\\][^/\\\s:'"()\[\]]+)*[/\\]([^/\\\s:'"()\[\]]+[/\\][^/\\\s:'"()\[\]]+)"#,
                "${1}${2}",
            ),
            (r":\d+:\d+", ":<n>:<n>"),
            (r"\(\d+,\s*\d+\)", "(<n>,<n>)"),
            (r"(\.[A-Za-z0-9]+):\d+\b", "${1}:<n>"),
            (r"(?i)\bline\s+\d+", "line <n>"),
            (r"(?i)\bcol(?:umn)?\s+\d+", "column <n>"),
            (r"\b[0-9a-f]{7,40}\b", "<sha>"),
            (r"\s+", " "),
        ]
        .into_iter()
        .map(|(pattern, replacement)| Rule {
            pattern: Regex::new(pattern).expect("fingerprint pattern is valid"),
            replacement,
        })
        .collect()
    })
}

/// Strip cosmetic noise from raw failure text.
pub fn normalize(raw: &str) -> String {
    let mut text = raw.to_string();
    for rule in rules() {
        text = rule
            .pattern
            .replace_all(&text, rule.replacement)
            .into_owned();
    }
    text.trim().chars().take(MAX_NORMALIZED_CHARS).collect()
}

/// Stable short hash of the normalized failure text.
pub fn fingerprint(raw: &str) -> String {
    let normalized = normalize(raw);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_are_stripped() {
        let a = "2024-01-15T10:30:00Z error: connection refused";
        let b = "2025-06-01 23:59:59.123+02:00 error: connection refused";
        assert_eq!(normalize(a), "<ts> error: connection refused");
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn test_bare_times_are_stripped() {
        assert_eq!(
            fingerprint("[10:01:02] build failed"),
            fingerprint("[23:45:00] build failed")
        );
    }

    #[test]
    fn test_line_and_column_collapse() {
        let a = "src/lib.rs:10:5: error[E0308]: mismatched types";
        let b = "src/lib.rs:212:17: error[E0308]: mismatched types";
        assert_eq!(fingerprint(a), fingerprint(b));

        let c = "Unexpected token at line 4, column 12";
        let d = "Unexpected token at line 90, column 3";
        assert_eq!(fingerprint(c), fingerprint(d));

        let e = "src/app.ts(14,3): error TS2322";
        let f = "src/app.ts(7,22): error TS2322";
        assert_eq!(fingerprint(e), fingerprint(f));
    }

    #[test]
    fn test_absolute_paths_keep_trailing_component() {
        let normalized = normalize("failed at /home/runner/work/app/app/src/main.rs");
        assert_eq!(normalized, "failed at src/main.rs");

        let a = "panic in /home/alice/proj/src/foo.rs:10:5";
        let b = "panic in /Users/bob/code/proj/src/foo.rs:99:1";
        assert_eq!(fingerprint(a), fingerprint(b));

        assert_eq!(normalize(r"at C:\work\proj\src\foo.rs"), r"at src\foo.rs");
    }

    #[test]
    fn test_same_file_name_in_different_dirs_differs() {
        assert_ne!(
            fingerprint("error in /a/src/foo.rs: boom"),
            fingerprint("error in /b/tests/foo.rs: boom")
        );
    }

    #[test]
    fn test_urls_are_not_treated_as_paths() {
        let normalized = normalize("see https://example.com/docs/errors");
        assert!(normalized.contains("https://example.com/docs/errors"));
    }

    #[test]
    fn test_shas_are_replaced() {
        let a = "HEAD is now at 3f2a9c1 fix lint";
        let b = "HEAD is now at 9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d fix lint";
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        assert_eq!(
            fingerprint("error:   unused\n\n  variable"),
            fingerprint("error: unused variable")
        );
    }

    #[test]
    fn test_distinct_failures_differ() {
        assert_ne!(
            fingerprint("error: unused variable `x`"),
            fingerprint("error: unused variable `y`")
        );
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_short() {
        let text = "thread 'main' panicked at src/main.rs:3:5";
        let first = fingerprint(text);
        assert_eq!(first, fingerprint(text));
        assert_eq!(first.len(), FINGERPRINT_LEN);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_normalized_text_is_bounded() {
        let long = "x".repeat(5_000);
        assert_eq!(normalize(&long).chars().count(), MAX_NORMALIZED_CHARS);
        // Differences past the cap do not change the fingerprint.
        assert_eq!(
            fingerprint(&format!("{long}tail-a")),
            fingerprint(&format!("{long}tail-b"))
        );
    }
}
