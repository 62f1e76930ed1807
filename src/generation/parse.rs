//! Parsing of raw model responses into structured QA data.
//!
//! Models are asked for a bare JSON array but routinely wrap it in prose or
//! code fences. Parsing therefore happens in two steps: try the whole
//! response, then fall back to the first bracketed array substring. A response
//! with no parseable array is a chunk-level error for the caller to record;
//! it never aborts the run.

use serde::Deserialize;
use thiserror::Error;

/// A question/answer object as emitted by the model, before chunk stamping.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawPair {
    /// Question text; `instruction` is accepted as an alias.
    #[serde(alias = "instruction")]
    pub question: String,
    /// Answer text; `output` is accepted as an alias.
    #[serde(alias = "output")]
    pub answer: String,
}

/// Errors raised while extracting QA data from a model response.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No array-shaped substring was found in the response.
    #[error("no JSON array found in model response")]
    NoArray,
    /// An array was found but did not decode as QA objects.
    #[error("model response array did not decode: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a model response into QA objects.
pub fn parse_qa_response(response: &str) -> Result<Vec<RawPair>, ParseError> {
    let trimmed = response.trim();
    if let Ok(pairs) = serde_json::from_str::<Vec<RawPair>>(trimmed) {
        return Ok(pairs);
    }
    let candidate = extract_first_array(trimmed).ok_or(ParseError::NoArray)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Locate the first balanced `[...]` substring, skipping bracket characters
/// inside JSON string literals.
fn extract_first_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
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

    #[test]
    fn parses_bare_array() {
        let pairs = parse_qa_response(r#"[{"question": "q1", "answer": "a1"}]"#).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "q1");
    }

    #[test]
    fn parses_array_wrapped_in_prose() {
        let response = "Here are your pairs:\n[{\"question\": \"q\", \"answer\": \"a\"}]\nEnjoy!";
        let pairs = parse_qa_response(response).unwrap();
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn accepts_instruction_output_aliases() {
        let pairs =
            parse_qa_response(r#"[{"instruction": "q", "output": "a"}]"#).unwrap();
        assert_eq!(pairs[0].question, "q");
        assert_eq!(pairs[0].answer, "a");
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_extraction() {
        let response = r#"noise [{"question": "what is a[0]?", "answer": "the ] first element"}] noise"#;
        let pairs = parse_qa_response(response).unwrap();
        assert_eq!(pairs[0].answer, "the ] first element");
    }

    #[test]
    fn response_without_array_is_an_error() {
        assert!(matches!(
            parse_qa_response("I cannot help with that."),
            Err(ParseError::NoArray)
        ));
    }

    #[test]
    fn malformed_array_is_an_error() {
        assert!(matches!(
            parse_qa_response(r#"[{"question": "q"}]"#),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn empty_array_yields_no_pairs() {
        assert!(parse_qa_response("[]").unwrap().is_empty());
    }
}
