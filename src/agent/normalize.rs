use serde_json::Value;
use thiserror::Error;

use crate::types::{Explanation, Plan};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("response JSON is not an object")]
    NotAnObject,
    #[error("response is missing a string \"command\" field")]
    MissingCommand,
    #[error("\"explanation\" must be a string or a list of strings")]
    InvalidExplanation,
}

/// Best-effort repair of near-JSON model output. Validity is decided by
/// [`parse_plan`], not here.
pub fn normalize_json_response(raw: &str) -> String {
    let text = strip_enclosing_fence(raw.trim());

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

fn strip_enclosing_fence(text: &str) -> &str {
    if text.len() < 6 || !text.starts_with("```") || !text.ends_with("```") {
        return text;
    }
    let inner = &text[3..text.len() - 3];

    // Drop an info string such as `json` on the opening fence line.
    let inner = match inner.find('\n') {
        Some(pos) if is_language_tag(&inner[..pos]) => &inner[pos + 1..],
        None if is_language_tag(inner.split_whitespace().next().unwrap_or("")) => inner
            .trim_start()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest)
            .unwrap_or(""),
        _ => inner,
    };
    inner.trim()
}

fn is_language_tag(line: &str) -> bool {
    let tag = line.trim();
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

pub fn parse_plan(normalized: &str) -> Result<Plan, PlanError> {
    let value: Value =
        serde_json::from_str(normalized).map_err(|e| PlanError::InvalidJson(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(PlanError::NotAnObject);
    };

    let command = match map.get("command") {
        Some(Value::String(cmd)) => cmd.trim().to_string(),
        _ => return Err(PlanError::MissingCommand),
    };

    let explanation = match map.get("explanation") {
        None | Some(Value::Null) => Explanation::default(),
        Some(Value::String(text)) => Explanation::One(text.clone()),
        Some(Value::Array(items)) => {
            let lines = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(PlanError::InvalidExplanation)?;
            Explanation::Many(lines)
        }
        Some(_) => return Err(PlanError::InvalidExplanation),
    };

    Ok(Plan {
        explanation,
        command,
    })
}

#[cfg(test)]
mod tests {
    use super::{PlanError, normalize_json_response, parse_plan};
    use crate::types::Explanation;

    #[test]
    fn fenced_block_with_surrounding_prose_parses_unchanged() {
        let raw = "```json\n{\"explanation\": [\"-i input\", \"-y overwrite\"], \"command\": \"ffmpeg -i a.mov a.gif -y\"}\n```";
        let plan = parse_plan(&normalize_json_response(raw)).expect("plan");
        assert_eq!(plan.command, "ffmpeg -i a.mov a.gif -y");
        assert_eq!(
            plan.explanation,
            Explanation::Many(vec!["-i input".into(), "-y overwrite".into()])
        );

        let chatty = "Sure! Here you go:\n```\n{\"explanation\": \"x\", \"command\": \"ffmpeg -y\"}\n```\nHope that helps.";
        let plan = parse_plan(&normalize_json_response(chatty)).expect("plan");
        assert_eq!(plan.command, "ffmpeg -y");
        assert_eq!(plan.explanation, Explanation::One("x".into()));
    }

    #[test]
    fn clean_json_is_left_alone() {
        let clean = r#"{"explanation": "scale", "command": "ffmpeg -i in.mp4 out.mp4 -y"}"#;
        assert_eq!(normalize_json_response(clean), clean);
        assert_eq!(
            normalize_json_response(&normalize_json_response(clean)),
            clean
        );
    }

    #[test]
    fn nested_braces_keep_outermost_object() {
        let raw = r#"note {"explanation": ["a"], "command": "echo {x}"} trailing"#;
        let out = normalize_json_response(raw);
        assert_eq!(out, r#"{"explanation": ["a"], "command": "echo {x}"}"#);
    }

    #[test]
    fn text_without_braces_is_returned_trimmed() {
        assert_eq!(normalize_json_response("  no json here \n"), "no json here");
        assert_eq!(normalize_json_response("} backwards {"), "} backwards {");
    }

    #[test]
    fn single_line_fence_with_tag() {
        let raw = "```json {\"command\": \"ffmpeg -y\"}```";
        assert_eq!(normalize_json_response(raw), "{\"command\": \"ffmpeg -y\"}");
    }

    #[test]
    fn empty_command_is_a_valid_refusal() {
        let plan = parse_plan(r#"{"explanation": "unsafe request", "command": ""}"#).expect("plan");
        assert!(plan.is_refusal());
        assert_eq!(plan.explanation.lines(), vec!["unsafe request"]);
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert!(matches!(parse_plan("{oops"), Err(PlanError::InvalidJson(_))));
        assert_eq!(parse_plan("[1, 2]"), Err(PlanError::NotAnObject));
        assert_eq!(
            parse_plan(r#"{"explanation": "x"}"#),
            Err(PlanError::MissingCommand)
        );
        assert_eq!(
            parse_plan(r#"{"explanation": [1], "command": "ffmpeg"}"#),
            Err(PlanError::InvalidExplanation)
        );
    }

    #[test]
    fn missing_explanation_gets_placeholder() {
        let plan = parse_plan(r#"{"command": "  ffmpeg -i a.wav a.mp3 -y  "}"#).expect("plan");
        assert_eq!(plan.command, "ffmpeg -i a.wav a.mp3 -y");
        assert_eq!(plan.explanation.lines(), vec!["No explanation provided."]);
    }
}
