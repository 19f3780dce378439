//! Bounded views of accumulated output.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::CommandStatus;

/// Character budget used when the caller does not give one.
pub const DEFAULT_CHAR_BUDGET: usize = 4000;

/// Which end of the output a window is anchored to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// The first characters, where early errors show up.
    Top,
    /// The last characters, where final results show up.
    #[default]
    Bottom,
}

/// Returns at most `budget` characters of `text` from the chosen end.
///
/// Counts `char`s, so a multi-byte character is never split. Text within budget is
/// returned whole.
#[must_use]
pub fn window(text: &str, priority: Priority, budget: usize) -> &str {
    let total = text.chars().count();
    if total <= budget {
        return text;
    }
    match priority {
        Priority::Top => {
            let end = text
                .char_indices()
                .nth(budget)
                .map_or(text.len(), |(index, _)| index);
            &text[..end]
        }
        Priority::Bottom => {
            let start = text
                .char_indices()
                .nth(total - budget)
                .map_or(text.len(), |(index, _)| index);
            &text[start..]
        }
    }
}

/// Point-in-time view of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSnapshot {
    /// Command identifier.
    pub command_id: String,
    /// Lifecycle status.
    pub status: CommandStatus,
    /// Windowed output.
    pub output: String,
    /// Seconds since the command started (or was registered, while pending).
    pub runtime_seconds: f64,
    /// Exit code once the process has exited normally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure detail, only for `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether `output` is shorter than the full output.
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_returned_whole() {
        assert_eq!(window("hello", Priority::Top, 10), "hello");
        assert_eq!(window("hello", Priority::Bottom, 5), "hello");
        assert_eq!(window("", Priority::Bottom, 0), "");
    }

    #[test]
    fn top_and_bottom_take_opposite_ends() {
        let text = "line one\nline two\nline three";
        assert_eq!(window(text, Priority::Top, 8), "line one");
        assert_eq!(window(text, Priority::Bottom, 10), "line three");
        assert_eq!(window(text, Priority::Bottom, 0), "");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "äöü→日本語";
        assert_eq!(window(text, Priority::Top, 4), "äöü→");
        assert_eq!(window(text, Priority::Bottom, 2), "本語");
    }
}
