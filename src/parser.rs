//! Extract candidate posts from a loosely structured model response.
//!
//! Models are asked for a raw JSON array but often wrap it in a code fence, add a
//! sentence before or after it, double-encode it, or ignore the format entirely.
//! [`parse_candidates`] runs an ordered list of strategies and takes the first that
//! succeeds. The last strategy always succeeds, so parsing never fails.

use serde_json::Value;
use tracing::debug;

type Strategy = fn(&str) -> Option<Vec<Value>>;

/// Strategies that only accept JSON. Also used to unwrap double-encoded arrays.
const JSON_STRATEGIES: &[(&str, Strategy)] = &[
    ("whole_json_array", whole_json_array),
    ("bracket_slice", bracket_slice),
];

/// Nesting levels of string-encoded arrays that are unwrapped.
const MAX_UNWRAP_DEPTH: usize = 4;

const ALL_STRATEGIES: &[(&str, Strategy)] = &[
    ("whole_json_array", whole_json_array),
    ("bracket_slice", bracket_slice),
    ("paragraphs", paragraphs),
];

pub fn parse_candidates(raw: &str) -> Vec<String> {
    let cleaned = strip_code_fence(raw);
    let (name, mut items) = first_success(ALL_STRATEGIES, cleaned).unwrap_or(("none", Vec::new()));
    debug!("parse_candidates: strategy={name} items={}", items.len());

    for _ in 0..MAX_UNWRAP_DEPTH {
        let unwrapped = match items.as_slice() {
            [Value::String(inner)] if inner.trim_start().starts_with('[') => {
                first_success(JSON_STRATEGIES, inner)
            }
            _ => None,
        };
        let Some((inner_name, inner_items)) = unwrapped else {
            break;
        };
        debug!("parse_candidates: unwrapped double-encoded array via {inner_name}");
        items = inner_items;
    }

    items.into_iter().filter_map(normalize_item).collect()
}

/// Run strategies in order; the first `Some` wins.
fn first_success(
    strategies: &[(&'static str, Strategy)],
    text: &str,
) -> Option<(&'static str, Vec<Value>)> {
    strategies
        .iter()
        .find_map(|(name, strategy)| strategy(text).map(|items| (*name, items)))
}

/// Remove a surrounding ``` fence (with optional language tag) if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag line, e.g. "json\n"
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn whole_json_array(text: &str) -> Option<Vec<Value>> {
    serde_json::from_str::<Vec<Value>>(text).ok()
}

fn bracket_slice(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<Value>>(&text[start..=end]).ok()
}

fn paragraphs(text: &str) -> Option<Vec<Value>> {
    Some(
        crate::history::split_paragraphs(text)
            .into_iter()
            .map(Value::String)
            .collect(),
    )
}

fn normalize_item(item: Value) -> Option<String> {
    let text = match item {
        Value::String(s) => s,
        Value::Object(mut map) => match map.remove("text") {
            Some(Value::String(s)) => s,
            _ => return None,
        },
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn test_plain_json_array() {
        let raw = serde_json::to_string(&abc()).unwrap();
        assert_eq!(parse_candidates(&raw), abc());
    }

    #[test]
    fn test_fenced_json_array() {
        let raw = format!("```json\n{}\n```", serde_json::to_string(&abc()).unwrap());
        assert_eq!(parse_candidates(&raw), abc());
        let raw = format!("```\n{}\n```", serde_json::to_string(&abc()).unwrap());
        assert_eq!(parse_candidates(&raw), abc());
    }

    #[test]
    fn test_trailing_and_leading_prose() {
        let json = serde_json::to_string(&abc()).unwrap();
        assert_eq!(parse_candidates(&format!("{json}\nHope you like these!")), abc());
        assert_eq!(
            parse_candidates(&format!("Here are your posts:\n{json}\nEnjoy.")),
            abc()
        );
    }

    #[test]
    fn test_paragraph_fallback() {
        let raw = "First post.\nПервый пост.\n\nSecond post.\nВторой пост.";
        assert_eq!(
            parse_candidates(raw),
            vec![
                "First post.\nПервый пост.".to_string(),
                "Second post.\nВторой пост.".to_string()
            ]
        );
    }

    #[test]
    fn test_broken_json_falls_back_to_paragraphs() {
        let raw = "[\"unterminated, \"oops\"";
        let out = parse_candidates(raw);
        assert_eq!(out, vec![raw.to_string()]);
    }

    #[test]
    fn test_double_encoded_array() {
        let inner = serde_json::to_string(&abc()).unwrap();
        let outer = serde_json::to_string(&vec![inner]).unwrap();
        assert_eq!(parse_candidates(&outer), abc());
    }

    #[test]
    fn test_triple_encoded_array_unwraps_fully() {
        let inner = serde_json::to_string(&abc()).unwrap();
        let middle = serde_json::to_string(&vec![inner]).unwrap();
        let outer = serde_json::to_string(&vec![middle]).unwrap();
        assert_eq!(parse_candidates(&outer), abc());
    }

    #[test]
    fn test_unwrap_depth_is_bounded() {
        let mut encoded = serde_json::to_string(&abc()).unwrap();
        for _ in 0..10 {
            encoded = serde_json::to_string(&vec![encoded]).unwrap();
        }
        // Stops after a few levels and keeps the still-encoded string as one candidate.
        let out = parse_candidates(&encoded);
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with('['));
    }

    #[test]
    fn test_double_encoded_invalid_inner_keeps_outer() {
        let outer = serde_json::to_string(&vec!["[not really json"]).unwrap();
        assert_eq!(parse_candidates(&outer), vec!["[not really json".to_string()]);
    }

    #[test]
    fn test_objects_with_text_field_and_non_strings() {
        let raw = r#"[{"text": " one "}, 42, null, {"body": "x"}, "two", "   "]"#;
        assert_eq!(parse_candidates(raw), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(parse_candidates("").is_empty());
        assert!(parse_candidates("   \n\n  ").is_empty());
        assert!(parse_candidates("[]").is_empty());
    }

    #[test]
    fn test_reversed_brackets_do_not_panic() {
        let out = parse_candidates("] nothing here [");
        assert_eq!(out, vec!["] nothing here [".to_string()]);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  plain  "), "plain");
        assert_eq!(strip_code_fence("```\nno closing"), "no closing");
    }
}
