//! # psychohistory-core
//!
//! A branching probability-tree generation engine. From a user-provided
//! seed event, a depth-synchronous scheduler drives a two-phase per-node
//! pipeline (agentic web research, then probability synthesis) under
//! bounded concurrency, and streams incremental progress to the client
//! over a long-lived connection.
//!
//! ## Core Components
//!
//! - **Tree**: the event-node model, id-indexed arena, and the
//!   wave-scheduling `TreeBuilder`
//! - **Pipeline**: per-node research → synthesis with fallback children
//! - **Research**: the iterative tool-calling loop around the LLM
//! - **Search**: rate-limited, retrying search client over pluggable
//!   providers
//! - **Events**: the stream event union and sinks
//! - **Server**: the `POST /generate-tree/stream` SSE endpoint
//!
//! ## Example
//!
//! ```rust,ignore
//! use psychohistory_core::{AppState, RuntimeConfig, SeedInput};
//!
//! let config = RuntimeConfig::from_env()?;
//! let state = AppState::from_config(&config)?;
//! psychohistory_core::server::serve(&config.bind_addr, state).await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod pipeline;
pub mod research;
pub mod search;
pub mod server;
pub mod tree;

// Re-exports for convenience
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use events::{ChannelSink, CollectingSink, EventSink, TreeStreamEvent};
pub use llm::{
    AssistantMessage, ChatMessage, ChatRole, LlmClient, LlmConfig, OpenRouterClient, ToolCall,
    ToolChoice, ToolDefinition,
};
pub use pipeline::{NodePipeline, NodeProcessor};
pub use research::{AgenticResearcher, ResearcherConfig};
pub use search::{
    BraveProvider, MockProvider, SearchBackend, SearchClient, SearchProvider, SerperProvider,
    SlidingWindowLimiter,
};
pub use server::{router, serve, AppState};
pub use tree::{
    Confidence, EventNode, NodeId, ProbabilityOutput, ProcessingStatus, ResearchResult, SeedInput,
    Source, TreeBuilder, TreeBuilderConfig,
};
