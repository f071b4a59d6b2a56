//! Web search through Gemini's Google Search grounding

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolOutput};
use crate::agent::{GeminiClient, GroundedAnswer};
use crate::error::Error;
use crate::Result;

/// Search the web and return a grounded answer with its sources
pub struct GoogleSearchTool {
    client: GeminiClient,
}

impl GoogleSearchTool {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        "google_search"
    }

    fn description(&self) -> &str {
        "Search Google and return an answer with the pages it is based on"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::Validation("'query' must not be empty".to_string()))?;

        let answer = self
            .client
            .grounded_search(query)
            .await
            .map_err(|e| Error::Tool(format!("Search failed: {}", e)))?;
        Ok(ToolOutput::Text(format_answer(&answer)))
    }
}

fn format_answer(answer: &GroundedAnswer) -> String {
    let mut out = if answer.text.is_empty() {
        "No answer found.".to_string()
    } else {
        answer.text.clone()
    };
    if !answer.uris.is_empty() {
        out.push_str("\n\nSources:");
        for uri in &answer.uris {
            out.push_str(&format!("\n- {}", uri));
        }
    }
    if !answer.search_entry_point.is_empty() {
        out.push_str("\n\nSearch pages:");
        for link in &answer.search_entry_point {
            out.push_str(&format!("\n- {}", link));
        }
    }
    out
}
