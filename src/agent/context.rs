//! Context builder for agent prompts.
//!
//! Each backend call sees the system prompt, the session transcript and,
//! once anything has happened, the scratchpad of earlier actions and
//! observations replayed as one assistant turn.

use crate::tools::ToolDefinition;

use super::message::Message;
use super::trace::Action;

/// Nudge appended after the scratchpad so the backend answers the next turn
const CONTINUE_PROMPT: &str = "Continue. Reply with the next Thought/Action/Action Input, or with a Final Answer.";

/// Scratchpad of one invocation: what the backend did and what it saw.
#[derive(Debug, Default, Clone)]
pub struct Scratchpad {
    entries: Vec<String>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched action and its observation text
    pub fn record_step(&mut self, action: &Action, observation: &str) {
        let input = match &action.tool_input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut entry = String::new();
        if !action.rationale.is_empty() {
            entry.push_str(&format!("Thought: {}\n", action.rationale));
        }
        entry.push_str(&format!(
            "Action: {}\nAction Input: {}\nObservation: {}",
            action.tool_name, input, observation
        ));
        self.entries.push(entry);
    }

    /// Record output that could not be interpreted, with the correction
    pub fn record_unparseable(&mut self, raw: &str, observation: &str) {
        let raw = raw.trim();
        let entry = if raw.is_empty() {
            format!("Observation: {}", observation)
        } else {
            format!("{}\nObservation: {}", raw, observation)
        };
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        self.entries.join("\n")
    }
}

/// Context holds the prompt state for one agent invocation.
pub struct Context {
    tools: Vec<ToolDefinition>,
    system_prompt: String,
}

impl Context {
    /// Build a context for the given tool set.
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        let system_prompt = build_system_prompt(&tools);
        Self { tools, system_prompt }
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Build messages list for one backend call.
    pub fn build_messages(&self, transcript: &[Message], scratchpad: &Scratchpad) -> Vec<Message> {
        let mut messages = Vec::with_capacity(transcript.len() + 3);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(transcript.iter().cloned());

        if !scratchpad.is_empty() {
            messages.push(Message::assistant(scratchpad.render()));
            messages.push(Message::user(CONTINUE_PROMPT));
        }
        messages
    }
}

fn build_system_prompt(tools: &[ToolDefinition]) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");

    let tool_lines: Vec<String> = tools
        .iter()
        .map(|t| format!("- `{}`: {}\n  input schema: {}", t.name, t.description, t.parameters))
        .collect();
    let tool_names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();

    let tools_section = if tool_lines.is_empty() {
        "No tools are available. Answer directly.".to_string()
    } else {
        tool_lines.join("\n")
    };

    format!(
        r#"# Kestrel

You are Kestrel, an assistant that completes tasks by calling tools.

## Current Time
{now}

## Tools
{tools_section}

## Format
Work in steps. For each step write:

Thought: what you need to do next
Action: the tool to use, one of [{names}]
Action Input: the tool input as a JSON object

You will then receive an Observation with the result. Repeat as needed.
When you know the answer, write:

Thought: I now know the final answer
Final Answer: the answer for the user

Never write an Observation yourself. Never combine an Action with a Final Answer."#,
        names = tool_names.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::Role;
    use crate::tools::Observation;
    use serde_json::json;

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "gmail_search".to_string(),
            description: "Search mail".to_string(),
            parameters: json!({"type": "object"}),
        }]
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let ctx = Context::new(tools());
        assert!(ctx.system_prompt().contains("`gmail_search`: Search mail"));
        assert!(ctx.system_prompt().contains("one of [gmail_search]"));
        assert!(Context::new(vec![]).system_prompt().contains("No tools are available"));
    }

    #[test]
    fn test_build_messages_without_scratchpad() {
        let ctx = Context::new(tools());
        let messages = ctx.build_messages(&[Message::user("Hello")], &Scratchpad::new());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Hello");
    }

    #[test]
    fn test_scratchpad_replayed() {
        let ctx = Context::new(tools());
        let mut pad = Scratchpad::new();
        let action = Action::new("gmail_search", json!({"keyword": "x"})).with_rationale("look");
        pad.record_step(&action, &Observation::Success("none".to_string()).to_prompt_text());
        pad.record_unparseable("gibberish", "Invalid tool input: unparseable action");

        let messages = ctx.build_messages(&[Message::user("Hello")], &pad);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(
            messages[2].content,
            "Thought: look\nAction: gmail_search\nAction Input: {\"keyword\":\"x\"}\nObservation: none\ngibberish\nObservation: Invalid tool input: unparseable action"
        );
        assert_eq!(messages[3].role, Role::User);
    }
}
