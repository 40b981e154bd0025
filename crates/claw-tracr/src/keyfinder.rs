//! Locating the correlation key in key/value lists, and rendering them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{as_text, render};

/// Default name of the correlation key.
pub const DEFAULT_KEY_NAME: &str = "logID";

/// Strategy for extracting the correlation value from a key/value list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "key", rename_all = "snake_case")]
pub enum KeyFinder {
    /// Scan every pair left to right; the first matching key wins.
    AnyPosition(String),
    /// Only consider the first pair of the list.
    FirstPair(String),
}

impl Default for KeyFinder {
    fn default() -> Self {
        Self::AnyPosition(DEFAULT_KEY_NAME.to_string())
    }
}

impl KeyFinder {
    /// Returns the correlation key name this finder looks for.
    #[must_use]
    pub fn key_name(&self) -> &str {
        match self {
            Self::AnyPosition(key) | Self::FirstPair(key) => key,
        }
    }

    /// Returns the correlation value carried by `kv`, if any.
    ///
    /// Lists that are empty, shorter than one pair or of odd length never
    /// match. A matching key whose value is not a string does not match.
    #[must_use]
    pub fn find<'a>(&self, kv: &'a [Value]) -> Option<&'a str> {
        match self {
            Self::AnyPosition(key) => find_key(key, kv),
            Self::FirstPair(key) => {
                if !well_formed(kv) || as_text(&kv[0]) != Some(key.as_str()) {
                    return None;
                }
                as_text(&kv[1])
            }
        }
    }
}

/// Finds the value paired with `key` anywhere in an alternating key/value list.
#[must_use]
pub fn find_key<'a>(key: &str, kv: &'a [Value]) -> Option<&'a str> {
    if !well_formed(kv) {
        return None;
    }
    kv.chunks_exact(2)
        .find(|pair| as_text(&pair[0]) == Some(key))
        .and_then(|pair| as_text(&pair[1]))
}

/// Renders a key/value list as space-separated text.
///
/// Non-string elements are rendered as a placeholder.
#[must_use]
pub fn format_key_values(kv: &[Value]) -> String {
    kv.iter().map(render).collect::<Vec<_>>().join(" ")
}

fn well_formed(kv: &[Value]) -> bool {
    kv.len() >= 2 && kv.len() % 2 == 0
}
