//! Tool definitions and argument decoding for the research loop.
//!
//! Providers return tool arguments as stringified JSON; decoding failures
//! are schema errors answered in-band so the model can correct itself.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;
use crate::tree::{Confidence, Source};

pub const SEARCH_TOOL: &str = "search";
pub const FINISH_TOOL: &str = "finish_research";

/// Arguments for the `search` tool.
#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
}

/// Arguments for the `finish_research` tool.
#[derive(Debug, Deserialize)]
pub struct FinishArgs {
    pub summary: String,
    pub confidence: Confidence,
}

/// The two tools exposed to the research model.
pub fn research_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            SEARCH_TOOL,
            "Execute one web search and receive a list of sources. Use distinct, \
             specific queries; repeating an earlier query returns an error.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to execute"
                    }
                },
                "required": ["query"]
            }),
        ),
        ToolDefinition::new(
            FINISH_TOOL,
            "Stop researching. Call this once enough diverse, credible sources \
             have been gathered.",
            json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "A short synthesis of what the gathered sources establish"
                    },
                    "confidence": {
                        "type": "string",
                        "enum": ["low", "medium", "high"],
                        "description": "How well the sources cover the question"
                    }
                },
                "required": ["summary", "confidence"]
            }),
        ),
    ]
}

/// Decode a tool call's stringified-JSON arguments.
pub fn decode_args<T: DeserializeOwned>(arguments: &str) -> Result<T> {
    serde_json::from_str(arguments)
        .map_err(|e| Error::schema(format!("invalid tool arguments: {e}")))
}

/// Tool response for a successful search.
pub fn search_response(sources: &[Source], total_gathered: usize) -> Value {
    json!({
        "sources": sources
            .iter()
            .map(|s| json!({"title": s.title, "url": s.url, "snippet": s.snippet}))
            .collect::<Vec<_>>(),
        "total_sources_gathered": total_gathered,
    })
}

/// Tool response for a query already executed this invocation.
pub fn duplicate_query_response() -> Value {
    json!({"error": "Duplicate query"})
}

/// Tool response for any other in-band tool failure.
pub fn tool_error_response(message: impl Into<String>) -> Value {
    json!({"error": message.into()})
}
