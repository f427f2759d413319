//! Small text helpers shared by context collection and prompt budgeting.

/// Longest prefix of `text` no longer than `max_bytes` that ends on a char
/// boundary.
pub fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_boundary("abc", 10), "abc");
    }

    #[test]
    fn cut_never_splits_a_char() {
        // "é" is two bytes.
        assert_eq!(truncate_to_boundary("aé", 2), "a");
        assert_eq!(truncate_to_boundary("aé", 3), "aé");
    }
}
