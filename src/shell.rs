//! Shell quoting and composition helpers shared by both backends.

use std::collections::BTreeMap;

/// Escape single quotes within a string for use inside a single-quoted shell argument.
///
/// The caller is responsible for wrapping the result in single quotes.
pub fn shell_escape(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// Quote a string for safe use as a shell argument.
///
/// Returns the string unchanged if it contains only safe characters
/// (alphanumeric, `-`, `_`, `.`, `/`). Otherwise wraps it in single quotes
/// with internal single quotes escaped. Empty strings return `''`.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", shell_escape(s))
    }
}

/// Whether `key` can be used as a POSIX environment variable name.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Return the first key that is not a valid variable name, if any.
pub fn first_invalid_env_key(envs: &BTreeMap<String, String>) -> Option<&str> {
    envs.keys()
        .map(String::as_str)
        .find(|k| !is_valid_env_key(k))
}

/// Render `export K='v' && ...` for the given variables, or `None` when empty.
///
/// Keys must already have been validated with [`is_valid_env_key`].
pub fn export_clause(envs: &BTreeMap<String, String>) -> Option<String> {
    if envs.is_empty() {
        return None;
    }
    let assignments: Vec<String> = envs
        .iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
        .collect();
    Some(format!("export {}", assignments.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape_single_quotes() {
        assert_eq!(
            shell_escape("echo 'hello world'"),
            "echo '\\''hello world'\\''"
        );
    }

    #[test]
    fn test_shell_quote_safe_passthrough() {
        assert_eq!(shell_quote("/workspace/app"), "/workspace/app");
        assert_eq!(shell_quote("my-file_v2.txt"), "my-file_v2.txt");
    }

    #[test]
    fn test_shell_quote_wraps_unsafe() {
        assert_eq!(shell_quote("hello world"), "'hello world'");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn env_key_validation() {
        assert!(is_valid_env_key("PATH"));
        assert!(is_valid_env_key("_private1"));
        assert!(!is_valid_env_key("1ABC"));
        assert!(!is_valid_env_key("A-B"));
        assert!(!is_valid_env_key("A B"));
        assert!(!is_valid_env_key(""));
    }

    #[test]
    fn first_invalid_key_is_reported() {
        let mut envs = BTreeMap::new();
        envs.insert("GOOD".to_string(), "1".to_string());
        assert_eq!(first_invalid_env_key(&envs), None);
        envs.insert("bad key".to_string(), "2".to_string());
        assert_eq!(first_invalid_env_key(&envs), Some("bad key"));
    }

    #[test]
    fn export_clause_quotes_values() {
        let mut envs = BTreeMap::new();
        assert_eq!(export_clause(&envs), None);
        envs.insert("A".to_string(), "plain".to_string());
        envs.insert("B".to_string(), "two words".to_string());
        assert_eq!(
            export_clause(&envs).unwrap(),
            "export A=plain B='two words'"
        );
    }
}
