//! Custom `format` keyword validators not in JSON Schema's built-in set.
//! Grounded on `original_source/app/plugin/schema_formats/builtin.py`.

use base64::Engine;
use regex::Regex;

/// An SSH public key line: `<type> <base64-data> [comment]`, where the
/// base64 payload's leading length-prefixed string equals `<type>`.
pub fn ssh_key(data: &str) -> bool {
    let parts: Vec<&str> = data.trim().split_whitespace().collect();
    if parts.len() < 2 {
        return false;
    }
    let decoded = match base64::engine::general_purpose::STANDARD.decode(parts[1]) {
        Ok(d) => d,
        Err(_) => return false,
    };
    if decoded.len() < 4 {
        return false;
    }
    let len = u32::from_be_bytes([decoded[0], decoded[1], decoded[2], decoded[3]]) as usize;
    if decoded.len() < 4 + len {
        return false;
    }
    let key_type = match std::str::from_utf8(&decoded[4..4 + len]) {
        Ok(s) => s,
        Err(_) => return false,
    };
    key_type == parts[0]
}

/// A crypt(3)-style hash: SHA-256 (`$5$`), SHA-512 (`$6$`) or bcrypt
/// (`$2a$`/`$2b$`/`$2y$`).
pub fn unix_password_hash(data: &str) -> bool {
    let patterns = [
        r"^\$5\$.{0,16}\$[./0-9A-Za-z]{43}$",
        r"^\$6\$.{0,16}\$[./0-9A-Za-z]{86}$",
        r"^\$2[aby]\$[0-9]{2}\$[./0-9A-Za-z]{53}$",
    ];
    patterns
        .iter()
        .any(|p| Regex::new(p).map(|re| re.is_match(data)).unwrap_or(false))
}

/// The names of all custom format validators this crate provides, in the
/// form the `formats` json_schema plugin and the final draft-07 validator
/// both need.
pub fn names() -> Vec<String> {
    vec!["ssh_key".to_string(), "unix_password_hash".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_password_hash_accepts_sha512() {
        let hash = "$6$abcdefgh$abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwxyz01234567";
        assert!(unix_password_hash(hash));
    }

    #[test]
    fn unix_password_hash_rejects_plain_string() {
        assert!(!unix_password_hash("hunter2"));
    }

    #[test]
    fn ssh_key_rejects_malformed_input() {
        assert!(!ssh_key("not-a-key"));
        assert!(!ssh_key("ssh-rsa"));
    }
}
