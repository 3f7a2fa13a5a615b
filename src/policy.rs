// src/policy.rs

/// Longest reply, in characters, the endpoint will return.
pub const MAX_RESPONSE_CHARS: usize = 140;

/// Accepts a decoded reply unless it is empty or too long.
pub fn is_valid(text: &str) -> bool {
    !text.is_empty() && text.chars().count() <= MAX_RESPONSE_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(!is_valid(""));
    }

    #[test]
    fn boundary_is_140_characters() {
        assert!(is_valid(&"x".repeat(140)));
        assert!(!is_valid(&"x".repeat(141)));
    }

    #[test]
    fn counts_characters_not_bytes() {
        // 140 three-byte characters
        assert!(is_valid(&"友".repeat(140)));
        assert!(!is_valid(&"友".repeat(141)));
    }

    #[test]
    fn whitespace_only_is_still_non_empty() {
        assert!(is_valid(" "));
    }
}
