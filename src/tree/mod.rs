//! Tree model and the depth-synchronous scheduler.

mod builder;
mod node;
pub mod probability;

pub use builder::{TreeBuilder, TreeBuilderConfig, DEFAULT_MAX_CONCURRENT};
pub use node::{
    Confidence, EventNode, NodeId, ProbabilityOutput, ProcessingStatus, ResearchResult, SeedInput,
    Source, TreeArena, MAX_SOURCES_PER_NODE, PROBABILITY_TOLERANCE,
};
