/// Token estimation for Indonesian/English mixed content.
/// Word-based: roughly 1.3 tokens per word plus a small framing overhead.
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();
    ((words as f64 * 1.3) + 5.0).ceil() as usize
}

/// Check if adding text would exceed limit
pub fn would_exceed_limit(current_tokens: usize, new_text: &str, max_tokens: usize) -> bool {
    current_tokens + estimate_tokens(new_text) > max_tokens
}

/// Keep the leading words of `text` that fit in `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    // invert the estimate: words <= (max - 5) / 1.3
    let budget_words = ((max_tokens.saturating_sub(5)) as f64 / 1.3).floor() as usize;
    text.split_whitespace()
        .take(budget_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        // 7 words -> 7 * 1.3 + 5 = 14.1 -> 15
        let text = "Ini adalah dokumen test yang berisi informasi";
        assert_eq!(estimate_tokens(text), 15);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("  \n"), 0);
    }

    #[test]
    fn test_would_exceed() {
        // 500 words -> 655 tokens
        let text = "word ".repeat(500);
        assert!(would_exceed_limit(1000, &text, 1500));
        assert!(!would_exceed_limit(1000, &text, 2000));
    }

    #[test]
    fn test_truncate_fits_budget() {
        let text = "word ".repeat(100);
        let cut = truncate_to_tokens(&text, 50);
        assert!(estimate_tokens(&cut) <= 50);
        assert!(!cut.is_empty());
        assert_eq!(truncate_to_tokens("short text", 50), "short text");
    }
}
