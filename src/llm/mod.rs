//! LLM completion abstraction.
//!
//! The tree core talks to exactly one completion seam, [`LlmClient`], with
//! three operations: plain text completion, strict-JSON completion, and
//! tool-enabled completion. [`OpenRouterClient`] is the production
//! implementation; tests script the trait directly.

mod client;
mod json;
mod types;

pub use client::{LlmClient, LlmConfig, OpenRouterClient};
pub use json::extract_json;
pub use types::{
    AssistantMessage, ChatMessage, ChatRole, FunctionCall, ToolCall, ToolChoice, ToolDefinition,
};
