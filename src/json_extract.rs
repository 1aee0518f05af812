//! Recovers JSON from model responses that wrap it in prose, code fences or
//! stray explanation.
//!
//! The response is scanned for candidate start tokens (`{` or `[`). Each
//! candidate is parsed as a streaming value, so anything after the value ends
//! is ignored. When a candidate does not parse (or does not have the expected
//! shape) the scan moves on to the next start token.

use crate::error::ExtractError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract the first JSON object or array found in `text`.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    extract_as::<Value>(text)
}

/// Extract the first JSON value in `text` that deserializes into `T`.
///
/// A response like `{"assignments": [...]}` still yields a `Vec<_>` because the
/// nested array is itself a candidate.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let starts = candidate_starts(text);
    if starts.is_empty() {
        return Err(ExtractError::NoJson);
    }

    let mut shape_error: Option<String> = None;
    for &start in &starts {
        let Some(value) = parse_from(&text[start..]) else {
            continue;
        };
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => {
                shape_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    match shape_error {
        Some(message) => Err(ExtractError::Shape(message)),
        None => Err(ExtractError::Unparsable {
            candidates: starts.len(),
        }),
    }
}

fn candidate_starts(text: &str) -> Vec<usize> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .map(|(i, _)| i)
        .collect()
}

/// Parse one JSON value from the front of `slice`, ignoring whatever follows it.
fn parse_from(slice: &str) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_str(slice).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Assignment {
        #[serde(rename = "leadId")]
        lead_id: String,
        #[serde(rename = "groupName")]
        group_name: String,
    }

    #[test]
    fn unit_extracts_bare_object() {
        let value = extract_json(r#"{"name": "Tech", "count": 2}"#).expect("object should parse");
        assert_eq!(value, json!({"name": "Tech", "count": 2}));
    }

    #[test]
    fn unit_extracts_from_markdown_fence_with_prose() {
        let text = "Sure! Here are the groups:\n```json\n[{\"name\": \"Retail\"}]\n```\nLet me know if you need more.";
        let value = extract_json(text).expect("fenced array should parse");
        assert_eq!(value, json!([{"name": "Retail"}]));
    }

    #[test]
    fn unit_skips_brace_in_prose_before_real_json() {
        let text = "I grouped the leads {as requested} below:\n[{\"leadId\": \"a\", \"groupName\": \"Tech\"}]";
        let parsed: Vec<Assignment> = extract_as(text).expect("array should be found after prose");
        assert_eq!(
            parsed,
            vec![Assignment {
                lead_id: "a".to_string(),
                group_name: "Tech".to_string()
            }]
        );
    }

    #[test]
    fn unit_ignores_trailing_text_after_value() {
        let value = extract_json("{\"ok\": true} -- hope this helps } ]").expect("prefix value should parse");
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn unit_finds_nested_array_when_wrapped_in_object() {
        let text = r#"{"assignments": [{"leadId": "1", "groupName": "Retail"}]}"#;
        let parsed: Vec<Assignment> = extract_as(text).expect("nested array should be used");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].group_name, "Retail");
    }

    #[test]
    fn unit_reports_no_json_for_plain_prose() {
        let err = extract_json("I could not classify these leads.").expect_err("prose has no json");
        assert_eq!(err, ExtractError::NoJson);
    }

    #[test]
    fn unit_reports_unparsable_candidates() {
        let err = extract_json("{ not json [ either").expect_err("broken json should fail");
        assert_eq!(err, ExtractError::Unparsable { candidates: 2 });
    }

    #[test]
    fn unit_reports_shape_error_when_json_has_wrong_type() {
        let err = extract_as::<Vec<Assignment>>(r#"{"leadId": "1"}"#).expect_err("object is not a list");
        assert!(matches!(err, ExtractError::Shape(_)));
    }

    #[test]
    fn unit_reextracting_serialized_output_is_idempotent() {
        let text = "Result:\n```\n{\"groups\": [{\"name\": \"A\", \"sourceGroups\": [\"x\", \"y\"]}], \"note\": \"ok\"}\n```";
        let first = extract_json(text).expect("first extraction should succeed");
        let serialized = serde_json::to_string(&first).expect("value should serialize");
        let second = extract_json(&serialized).expect("re-extraction should succeed");
        assert_eq!(first, second);
    }
}
