//! Structured Response Parsing
//!
//! The text-generation service has no schema-enforced output, so every
//! structured value (question arrays, validation verdicts, follow-up lists)
//! is recovered from free text here. All call sites share this one policy:
//! strip markdown fences, try the whole body, then try each top-level
//! `[...]` / `{...}` literal in order of appearance. A literal that fails to
//! parse is skipped whole, and an unterminated one ends the scan.

use crate::error::ParseError;
use serde::de::DeserializeOwned;

/// Parse the first JSON value of type `T` found in a free-form completion.
pub fn parse_structured_response<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let cleaned = strip_code_fences(trimmed);
    if let Ok(value) = serde_json::from_str::<T>(cleaned) {
        return Ok(value);
    }

    let mut last_error: Option<String> = None;
    let mut pos = 0;
    while let Some(found) = cleaned[pos..].find(['[', '{']) {
        let start = pos + found;
        let Some(end) = balanced_end(cleaned, start) else {
            last_error = Some(format!("unterminated literal at byte {}", start));
            break;
        };
        match serde_json::from_str::<T>(&cleaned[start..=end]) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e.to_string()),
        }
        // Nested literals belong to the one that just failed.
        pos = end + 1;
    }

    match last_error {
        Some(msg) => Err(ParseError::Malformed(msg)),
        None => Err(ParseError::NoStructuredValue),
    }
}

/// Remove a surrounding ```json / ``` fence if present.
pub fn strip_code_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Byte index of the bracket closing the one opened at `start`, ignoring
/// brackets inside string literals.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        valid_question_numbers: Vec<usize>,
    }

    #[test]
    fn test_parses_fenced_object() {
        let response = "```json\n{\"valid_question_numbers\": [1, 3]}\n```";
        let verdict: Verdict = parse_structured_response(response).unwrap();
        assert_eq!(verdict.valid_question_numbers, vec![1, 3]);
    }

    #[test]
    fn test_finds_array_after_prose() {
        let response = r#"Here are your questions [draft]:
[{"text": "Which region has [most] revenue?"}]
Hope this helps!"#;
        let parsed: Vec<serde_json::Value> = parse_structured_response(response).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["text"], "Which region has [most] revenue?");
    }

    #[test]
    fn test_empty_and_missing_values() {
        assert_eq!(
            parse_structured_response::<Verdict>("   ").unwrap_err(),
            ParseError::Empty
        );
        assert_eq!(
            parse_structured_response::<Verdict>("Looking at each question, all seem fine.")
                .unwrap_err(),
            ParseError::NoStructuredValue
        );
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let err = parse_structured_response::<Verdict>("{\"valid\": true}").unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_truncated_array_does_not_yield_inner_list() {
        let response = r#"[{"text": "Revenue by region", "referenced_columns": ["REGION", "REVENUE"]}, {"text": "Top cust"#;
        let err = parse_structured_response::<Vec<serde_json::Value>>(response).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_failed_literal_is_skipped_whole() {
        let response = r#"Draft: {"verdict": ["a", "b"]} Final: ["x", "y"]"#;
        let parsed: Vec<String> = parse_structured_response(response).unwrap();
        assert_eq!(parsed, vec!["x".to_string(), "y".to_string()]);
    }
}
