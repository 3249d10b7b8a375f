//! Tool-call argument decoding
//!
//! Some providers emit argument strings that are not valid JSON (unescaped
//! newlines in file content, truncated objects). Strict decoding is tried
//! first; on failure a lenient scan recovers `"key": value` pairs, limited to
//! the parameter names the tool declares.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::message::ToolDefinition;

/// Outcome of decoding one argument string
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedArguments {
    pub arguments: Map<String, Value>,
    /// True when the lenient scan was needed
    pub recovered: bool,
}

fn pair_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#)
            .expect("argument pattern is valid")
    })
}

/// Declared parameter names of `tool_name`, read from its JSON schema
pub fn declared_parameters<'a>(tools: &'a [ToolDefinition], tool_name: &str) -> Vec<&'a str> {
    tools
        .iter()
        .find(|t| t.name() == tool_name)
        .and_then(|t| t.function.parameters.get("properties"))
        .and_then(Value::as_object)
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Decode `raw` into an argument object.
///
/// Never fails: unusable input yields an empty object, which the tool's own
/// argument validation then rejects with a clear message.
pub fn decode_arguments(raw: &str, allowed: &[&str]) -> DecodedArguments {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DecodedArguments {
            arguments: Map::new(),
            recovered: false,
        };
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => {
            return DecodedArguments {
                arguments: map,
                recovered: false,
            }
        }
        // Double-encoded: a JSON string holding the JSON object
        Ok(Value::String(inner)) => {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(inner.trim()) {
                return DecodedArguments {
                    arguments: map,
                    recovered: false,
                };
            }
        }
        _ => {}
    }

    let arguments = scan_pairs(trimmed, allowed);
    if arguments.is_empty() {
        warn!(raw = %truncate(trimmed, 200), "No usable tool arguments could be recovered");
    } else {
        warn!(
            keys = ?arguments.keys().collect::<Vec<_>>(),
            "Tool arguments were not valid JSON, recovered fields by scanning"
        );
    }

    DecodedArguments {
        arguments,
        recovered: true,
    }
}

fn scan_pairs(raw: &str, allowed: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();

    for caps in pair_pattern().captures_iter(raw) {
        let key = &caps[1];
        if !allowed.contains(&key) || out.contains_key(key) {
            continue;
        }

        let literal = &caps[2];
        let value = serde_json::from_str::<Value>(literal).unwrap_or_else(|_| {
            // Quoted text with an invalid escape; keep it verbatim
            Value::String(literal.trim_matches('"').to_string())
        });
        out.insert(key.to_string(), value);
    }

    out
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
