//! Token estimation for chunk sizing

use crate::transcript::Turn;

/// Per-turn overhead for role labels and separators
pub const FRAMING_TOKENS: usize = 4;

/// Counts the tokens a turn costs in a sub-agent's context
///
/// Implementations must be deterministic and monotonic in content length.
pub trait TokenCounter: Send + Sync {
    fn count(&self, turn: &Turn) -> usize;
}

/// Estimate token count from text using the chars/4 heuristic
///
/// Ceiling division, so a non-empty string never counts as zero.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Default counter: chars/4 over the turn's JSON rendering plus framing
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, turn: &Turn) -> usize {
        let rendered = serde_json::to_string(turn).unwrap_or_default();
        estimate_tokens(&rendered) + FRAMING_TOKENS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Role;
    use serde_json::json;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_heuristic_grows_with_content() {
        let short = Turn {
            role: Role::User,
            content: json!("hi"),
        };
        let long = Turn {
            role: Role::User,
            content: json!("hi".repeat(100)),
        };
        let counter = HeuristicCounter;
        assert!(counter.count(&short) > FRAMING_TOKENS);
        assert!(counter.count(&long) > counter.count(&short));
    }
}
