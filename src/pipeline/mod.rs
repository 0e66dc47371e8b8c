//! Per-node processing pipeline.
//!
//! One pipeline invocation turns a node into 1-5 pending children:
//! Phase 1 researches the event (agentic search loop), Phase 2 synthesizes
//! probability-weighted follow-on outcomes from the research, and a
//! two-child fallback covers irrecoverable failures.

mod processor;
pub mod prompts;

pub use processor::{
    fallback_children, NodePipeline, NodeProcessor, DEFAULT_JUSTIFICATION, MAX_OUTCOMES,
};
