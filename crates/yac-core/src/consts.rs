//! Server-enforced patterns and title/description constants.

use once_cell::sync::Lazy;
use regex::Regex;

pub const TITLE: &str = "YAC - Yet Another Configurator";

// Must not allow `/` to avoid non-permitted file access.
pub static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{1,200}$").unwrap());
pub static TYPE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{1,200}$").unwrap());
pub static ACTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{1,200}$").unwrap());
pub static SEARCH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\-. ]{0,200}$").unwrap());
pub static MSG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^[\p{L}0-9 @()\x22.,_/\-\r\n]{0,10000}$").unwrap()
});

/// Product version this build satisfies spec version constraints against,
/// i.e. a declared spec `version: "X.Y"` must match `^vX\.Y\.\d+(rcN)?$`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pattern_forbids_slash() {
        assert!(NAME_PATTERN.is_match("host-01"));
        assert!(!NAME_PATTERN.is_match("a/b"));
    }

    #[test]
    fn search_pattern_allows_spaces() {
        assert!(SEARCH_PATTERN.is_match("my host"));
        assert!(!SEARCH_PATTERN.is_match("semi;colon"));
    }
}
