//! Turn interpretation - backend output to action or final answer
//!
//! Native tool calls are read first. Text turns follow the ReAct layout:
//!
//! ```text
//! Thought: ...
//! Action: tool_name
//! Action Input: {"field": "value"}
//! ```
//!
//! or `Final Answer: ...`. When a turn carries both an action and a final
//! answer the action wins and the turn is not final.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::llm::LlmResponse;
use super::trace::Action;

/// What the backend decided this turn
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Act(Action),
    Final(String),
}

/// Backend output that is neither an action nor a final answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("Action without a tool name")]
    MissingToolName,

    #[error("Action '{0}' without an Action Input line")]
    MissingActionInput(String),
}

const ACTION: &str = "Action";
const ACTION_INPUT: &str = "Action Input";
const FINAL_ANSWER: &str = "Final Answer";
const THOUGHT: &str = "Thought";
const OBSERVATION: &str = "Observation";

/// Interpret one backend response.
pub fn interpret(response: &LlmResponse) -> Result<Turn, ParseError> {
    let text = response.content.as_deref().unwrap_or_default().trim();

    if let Some(call) = response.tool_calls.first() {
        if response.tool_calls.len() > 1 {
            warn!(
                "Backend proposed {} tool calls, dispatching only '{}'",
                response.tool_calls.len(),
                call.name
            );
        }
        if call.name.trim().is_empty() {
            return Err(ParseError::MissingToolName);
        }
        return Ok(Turn::Act(
            Action::new(call.name.trim(), call.arguments.clone()).with_rationale(strip_marker(text, THOUGHT)),
        ));
    }

    parse_text(text)
}

/// Interpret a ReAct-formatted text turn.
pub fn parse_text(text: &str) -> Result<Turn, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let lines: Vec<&str> = text.lines().collect();

    let action_line = lines.iter().position(|l| marker(l, ACTION).is_some());
    let input_line = lines.iter().position(|l| marker(l, ACTION_INPUT).is_some());

    if let Some(idx) = action_line {
        let name = marker(lines[idx], ACTION).unwrap_or_default().trim_matches('`').trim();
        if name.is_empty() {
            return Err(ParseError::MissingToolName);
        }
        let Some(input_idx) = input_line.filter(|i| *i > idx) else {
            return Err(ParseError::MissingActionInput(name.to_string()));
        };

        let input = collect_block(&lines, input_idx, ACTION_INPUT);
        let rationale = lines[..idx]
            .iter()
            .map(|l| strip_marker(l, THOUGHT))
            .collect::<Vec<_>>()
            .join("\n");

        return Ok(Turn::Act(
            Action::new(name, parse_input(&input)).with_rationale(rationale.trim()),
        ));
    }

    if input_line.is_some() {
        return Err(ParseError::MissingToolName);
    }

    if let Some(idx) = lines.iter().position(|l| marker(l, FINAL_ANSWER).is_some()) {
        let first = marker(lines[idx], FINAL_ANSWER).unwrap_or_default();
        let mut answer = vec![first];
        answer.extend(lines[idx + 1..].iter().copied());
        return Ok(Turn::Final(answer.join("\n").trim().to_string()));
    }

    Ok(Turn::Final(text.to_string()))
}

/// Text after `name:` when the line starts with that marker
fn marker<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let trimmed = line.trim_start().trim_start_matches('*');
    let head = trimmed.get(..name.len())?;
    if !head.eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = trimmed[name.len()..].trim_start_matches('*').trim_start();
    rest.strip_prefix(':').map(|r| r.trim_start_matches('*').trim())
}

fn strip_marker<'a>(line: &'a str, name: &str) -> &'a str {
    marker(line, name).unwrap_or(line)
}

/// The marker line's remainder plus continuation lines up to the next marker
fn collect_block(lines: &[&str], start: usize, name: &str) -> String {
    let mut block = vec![marker(lines[start], name).unwrap_or_default()];
    for line in &lines[start + 1..] {
        let is_marker = [OBSERVATION, THOUGHT, FINAL_ANSWER, ACTION]
            .iter()
            .any(|m| marker(line, m).is_some());
        if is_marker {
            break;
        }
        block.push(*line);
    }
    block.join("\n").trim().to_string()
}

/// JSON when the input parses as JSON, otherwise a bare string for the
/// registry to coerce
fn parse_input(raw: &str) -> Value {
    let unfenced = strip_code_fence(raw);
    if unfenced.is_empty() {
        return Value::Null;
    }
    match serde_json::from_str::<Value>(unfenced) {
        Ok(value) => value,
        Err(_) => Value::String(unquote(unfenced).to_string()),
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop a language tag such as ```json
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.contains('{') => body.trim(),
        _ => inner.trim(),
    }
}

fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::ToolCallRequest;
    use serde_json::json;

    fn act(turn: Turn) -> Action {
        match turn {
            Turn::Act(action) => action,
            Turn::Final(answer) => panic!("expected an action, got final answer {:?}", answer),
        }
    }

    #[test]
    fn test_react_action_with_json_input() {
        let text = "Thought: I should search mail first\nAction: gmail_search\nAction Input: {\"keyword\": \"invoice\", \"top\": 3}";
        let action = act(parse_text(text).unwrap());
        assert_eq!(action.tool_name, "gmail_search");
        assert_eq!(action.tool_input, json!({"keyword": "invoice", "top": 3}));
        assert_eq!(action.rationale, "I should search mail first");
    }

    #[test]
    fn test_bare_string_input() {
        let action = act(parse_text("Action: send_email_to_fixed_address\nAction Input: \"Hello Bob\"").unwrap());
        assert_eq!(action.tool_input, json!("Hello Bob"));

        let action = act(parse_text("Action: fetch_url\nAction Input: https://example.com").unwrap());
        assert_eq!(action.tool_input, json!("https://example.com"));
    }

    #[test]
    fn test_multiline_fenced_input_stops_at_observation() {
        let text = "Action: gmail_search\nAction Input: ```json\n{\"keyword\": \"a\"}\n```\nObservation: made up";
        let action = act(parse_text(text).unwrap());
        assert_eq!(action.tool_input, json!({"keyword": "a"}));
    }

    #[test]
    fn test_final_answer() {
        let turn = parse_text("Thought: I know now\nFinal Answer: Two invoices\nboth paid").unwrap();
        assert_eq!(turn, Turn::Final("Two invoices\nboth paid".to_string()));
    }

    #[test]
    fn test_action_wins_over_final_answer() {
        let text = "Final Answer: probably done\nAction: gmail_search\nAction Input: invoice";
        let action = act(parse_text(text).unwrap());
        assert_eq!(action.tool_name, "gmail_search");
    }

    #[test]
    fn test_plain_prose_is_final() {
        assert_eq!(parse_text("Hello there!").unwrap(), Turn::Final("Hello there!".to_string()));
    }

    #[test]
    fn test_unparseable_turns() {
        assert_eq!(parse_text("   "), Err(ParseError::Empty));
        assert_eq!(parse_text("Action: \nAction Input: x"), Err(ParseError::MissingToolName));
        assert_eq!(
            parse_text("Action: gmail_search"),
            Err(ParseError::MissingActionInput("gmail_search".to_string()))
        );
        assert_eq!(parse_text("Action Input: {}"), Err(ParseError::MissingToolName));
    }

    #[test]
    fn test_markers_are_case_insensitive_and_tolerate_bold() {
        let action = act(parse_text("**Action:** fetch_url\naction input: https://a.b").unwrap());
        assert_eq!(action.tool_name, "fetch_url");
    }

    #[test]
    fn test_native_tool_call_first_wins() {
        let response = LlmResponse {
            content: Some("Thought: need mail".to_string()),
            tool_calls: vec![
                ToolCallRequest { id: "1".into(), name: "gmail_search".into(), arguments: json!({"keyword": "x"}) },
                ToolCallRequest { id: "2".into(), name: "fetch_url".into(), arguments: json!({"url": "u"}) },
            ],
            ..LlmResponse::text("")
        };
        let action = act(interpret(&response).unwrap());
        assert_eq!(action.tool_name, "gmail_search");
        assert_eq!(action.rationale, "need mail");
    }

    #[test]
    fn test_native_call_beats_final_answer_text() {
        let response = LlmResponse {
            content: Some("Final Answer: done".to_string()),
            tool_calls: vec![ToolCallRequest { id: "1".into(), name: "fetch_url".into(), arguments: json!({}) }],
            ..LlmResponse::text("")
        };
        assert!(matches!(interpret(&response).unwrap(), Turn::Act(_)));
    }

    #[test]
    fn test_empty_response() {
        let response = LlmResponse { content: None, ..LlmResponse::text("") };
        assert_eq!(interpret(&response), Err(ParseError::Empty));
    }
}
