//! Dotenv file parsing for config overrides.

use std::collections::HashMap;

/// Parse a dotenv-format string into a key-value map.
///
/// Supports:
/// - `KEY=value`
/// - `export KEY=value`
/// - Quoted values (`"value"` or `'value'`)
/// - Comments (`# ...`) and blank lines
pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((raw_key, raw_value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        let key = key.strip_prefix("export ").map(str::trim).unwrap_or(key);
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), unquote_env_value(raw_value.trim()));
    }
    map
}

fn unquote_env_value(s: &str) -> String {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        return s[1..s.len() - 1].to_string();
    }
    s.to_string()
}
