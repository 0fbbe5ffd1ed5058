// src/core/truncation.rs — Command output truncation for the QA session
//
// Limits what a single QA command can push into the model context. Never
// applied to build diagnostics fed back to the generator.

/// Result of a truncation operation.
pub struct TruncationResult {
    pub content: String,
    pub was_truncated: bool,
    pub original_bytes: usize,
    pub original_lines: usize,
}

/// Keep the head and tail of `content` within `max_bytes`, with a note in between.
pub fn truncate_output(content: &str, max_bytes: usize) -> TruncationResult {
    let original_bytes = content.len();
    let original_lines = content.lines().count();

    if original_bytes <= max_bytes {
        return TruncationResult {
            content: content.to_string(),
            was_truncated: false,
            original_bytes,
            original_lines,
        };
    }

    // Errors tend to land at the end of the output, so keep a quarter for the tail.
    let tail_budget = max_bytes / 4;
    let head = truncate_str(content, max_bytes - tail_budget);
    let tail = tail_str(content, tail_budget);
    let omitted = original_bytes - head.len() - tail.len();

    TruncationResult {
        content: format!(
            "{}\n[... {} bytes omitted of {} bytes, {} lines ...]\n{}",
            head, omitted, original_bytes, original_lines, tail
        ),
        was_truncated: true,
        original_bytes,
        original_lines,
    }
}

/// Prefix of at most `max_len` bytes, cut on a UTF-8 boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

/// Suffix of at most `max_len` bytes, cut on a UTF-8 boundary.
fn tail_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut start = s.len() - max_len;
        while start < s.len() && !s.is_char_boundary(start) {
            start += 1;
        }
        &s[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_multibyte() {
        // "café" is 5 bytes (é = 2 bytes), truncating at 4 should not split é
        assert_eq!(truncate_str("café", 4), "caf");
        assert_eq!(truncate_str("hello", 0), "");
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn test_tail_str_multibyte() {
        assert_eq!(tail_str("écho", 3), "cho");
        assert_eq!(tail_str("abc", 10), "abc");
    }

    #[test]
    fn test_short_output_untouched() {
        let r = truncate_output("42\n", 1024);
        assert!(!r.was_truncated);
        assert_eq!(r.content, "42\n");
        assert_eq!(r.original_lines, 1);
    }

    #[test]
    fn test_long_output_keeps_head_and_tail() {
        let mut content = String::from("START\n");
        content.push_str(&"x".repeat(10_000));
        content.push_str("\nEND: panicked at main.rs:7");
        let r = truncate_output(&content, 400);

        assert!(r.was_truncated);
        assert!(r.content.starts_with("START"));
        assert!(r.content.ends_with("END: panicked at main.rs:7"));
        assert!(r.content.contains("bytes omitted"));
        assert_eq!(r.original_bytes, content.len());
        assert!(r.content.len() < 600);
    }
}
