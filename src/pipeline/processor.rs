//! The two-phase per-node pipeline: research, then probability synthesis.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::research::{AgenticResearcher, ResearcherConfig};
use crate::search::SearchClient;
use crate::tree::{probability, EventNode, ProbabilityOutput, SeedInput};

use super::prompts;

/// Maximum outcomes accepted from one synthesis call.
pub const MAX_OUTCOMES: usize = 5;

/// Justification applied to synthesized children; the slim synthesis
/// schema does not return per-child rationale.
pub const DEFAULT_JUSTIFICATION: &str = "Based on historical research and analysis";

/// Turns one node into its children.
///
/// Trait seam so the scheduler can be exercised with scripted pipelines.
#[async_trait]
pub trait NodePipeline: Send + Sync {
    /// Produce 1-5 pending children for `node`. `path` is the event chain
    /// from the root to `node`, inclusive. Implementations recover
    /// internally where they can (fallback children); an `Err` marks the
    /// node failed.
    async fn process(
        &self,
        node: &EventNode,
        path: &[String],
        seed: &SeedInput,
    ) -> Result<Vec<EventNode>>;
}

/// Production pipeline: agentic research followed by strict-JSON synthesis.
pub struct NodeProcessor {
    llm: Arc<dyn LlmClient>,
    researcher: AgenticResearcher,
    schema_retries: u32,
    retry_base: Duration,
}

impl NodeProcessor {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<SearchClient>) -> Self {
        let researcher = AgenticResearcher::new(Arc::clone(&llm), search);
        Self {
            llm,
            researcher,
            schema_retries: 3,
            retry_base: Duration::from_secs(1),
        }
    }

    /// Override the research budgets.
    pub fn with_researcher_config(mut self, config: ResearcherConfig) -> Self {
        self.researcher = self.researcher.with_config(config);
        self
    }

    /// Override the synthesis retry policy. Primarily useful for tests.
    pub fn with_retry_policy(mut self, schema_retries: u32, retry_base: Duration) -> Self {
        self.schema_retries = schema_retries;
        self.retry_base = retry_base;
        self
    }

    #[tracing::instrument(name = "synthesis_phase", skip_all)]
    async fn synthesize(&self, prompt: &str) -> Result<Vec<ProbabilityOutput>> {
        let mut attempt: u32 = 0;
        loop {
            match self.try_synthesize(prompt).await {
                Ok(outcomes) => return Ok(outcomes),
                Err(err) if attempt < self.schema_retries => {
                    let delay = self.retry_base * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "synthesis attempt failed, backing off: {err}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_synthesize(&self, prompt: &str) -> Result<Vec<ProbabilityOutput>> {
        let value = self.llm.complete_json(prompt).await?;
        let outcomes: Vec<ProbabilityOutput> = serde_json::from_value(value)
            .map_err(|e| Error::schema(format!("synthesis output failed decode: {e}")))?;

        if outcomes.is_empty() || outcomes.len() > MAX_OUTCOMES {
            return Err(Error::schema(format!(
                "expected 1-{MAX_OUTCOMES} outcomes, got {}",
                outcomes.len()
            )));
        }
        for outcome in &outcomes {
            outcome.validate()?;
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl NodePipeline for NodeProcessor {
    #[tracing::instrument(
        name = "node_process",
        skip_all,
        fields(node_id = %node.id, depth = node.depth)
    )]
    async fn process(
        &self,
        node: &EventNode,
        path: &[String],
        seed: &SeedInput,
    ) -> Result<Vec<EventNode>> {
        let research = self.researcher.research(&node.event, path, seed).await;
        if research.is_empty() {
            tracing::info!(node_id = %node.id, "research returned no sources, using fallback");
            return Ok(fallback_children(node));
        }

        let block = prompts::format_research_block(&research);
        let prompt = prompts::synthesis_prompt(
            seed,
            path,
            &node.event,
            node.depth,
            seed.effective_max_depth(),
            &block,
        );

        let outcomes = match self.synthesize(&prompt).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                tracing::warn!(node_id = %node.id, "synthesis failed, using fallback: {err}");
                return Ok(fallback_children(node));
            }
        };

        let mut weights: Vec<f64> = outcomes.iter().map(|o| o.probability).collect();
        if !probability::normalize(&mut weights) {
            tracing::warn!(node_id = %node.id, "normalization failed, using fallback");
            return Ok(fallback_children(node));
        }

        Ok(outcomes
            .into_iter()
            .zip(weights)
            .map(|(outcome, weight)| {
                EventNode::child_of(node, outcome.event, weight)
                    .with_justification(DEFAULT_JUSTIFICATION)
                    .with_sources(research.sources.clone())
            })
            .collect())
    }
}

/// The degenerate two-child subtree used when research or synthesis fails
/// irrecoverably for one node. Fallback children carry no justification
/// and no sources, and remain pending for the next depth.
pub fn fallback_children(parent: &EventNode) -> Vec<EventNode> {
    vec![
        EventNode::child_of(
            parent,
            format!("Status quo continues from: {}", parent.event),
            0.5,
        ),
        EventNode::child_of(
            parent,
            format!("Unexpected development from: {}", parent.event),
            0.5,
        )
        .with_sentiment(-10),
    ]
}
