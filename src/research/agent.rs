//! Agentic research: an LLM-directed iterative search loop.
//!
//! The model is treated as an untrusted planner. Duplicate-query
//! suppression, domain diversity filtering, the iteration cap, and the
//! wall-clock cap are all rails around it; whatever happens, the loop
//! returns an accumulated [`ResearchResult`] rather than an error.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient, ToolChoice};
use crate::search::SearchClient;
use crate::tree::{Confidence, ResearchResult, SeedInput, Source};

use super::tools::{
    decode_args, duplicate_query_response, research_tools, search_response, tool_error_response,
    FinishArgs, SearchArgs, FINISH_TOOL, SEARCH_TOOL,
};

/// Budgets for one research invocation.
#[derive(Debug, Clone)]
pub struct ResearcherConfig {
    /// Maximum completion rounds.
    pub max_iterations: u32,
    /// Wall-clock cap for the whole invocation.
    pub timeout: Duration,
    /// Sources needed for a normal-confidence result.
    pub min_sources: usize,
}

impl Default for ResearcherConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            timeout: Duration::from_secs(60),
            min_sources: 3,
        }
    }
}

const COMPLETION_SUMMARY: &str = "Research completed through iterative search";

/// Accumulated state across loop iterations.
#[derive(Default)]
struct Accumulator {
    sources: Vec<Source>,
    queries: Vec<String>,
    executed: HashSet<String>,
    seen_domains: HashSet<String>,
    iterations: u32,
}

impl Accumulator {
    /// Keep only sources whose hostname has not been seen, recording the
    /// new hostnames.
    fn absorb(&mut self, results: Vec<Source>) -> Vec<Source> {
        let fresh: Vec<Source> = results
            .into_iter()
            .filter(|source| match source.host() {
                Some(host) => self.seen_domains.insert(host),
                None => true,
            })
            .collect();
        self.sources.extend(fresh.clone());
        fresh
    }

    fn finish(self, summary: String, confidence: Confidence) -> ResearchResult {
        ResearchResult {
            sources: self.sources,
            summary,
            confidence,
            iterations: self.iterations,
            queries: self.queries,
        }
    }

    fn into_result(self, min_sources: usize) -> ResearchResult {
        let confidence = if self.sources.len() >= min_sources {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        self.finish(COMPLETION_SUMMARY.to_string(), confidence)
    }

    fn into_partial(self) -> ResearchResult {
        self.finish(COMPLETION_SUMMARY.to_string(), Confidence::Low)
    }
}

/// Drives a tool-capable model through iterative web research.
pub struct AgenticResearcher {
    llm: Arc<dyn LlmClient>,
    search: Arc<SearchClient>,
    config: ResearcherConfig,
}

impl AgenticResearcher {
    pub fn new(llm: Arc<dyn LlmClient>, search: Arc<SearchClient>) -> Self {
        Self {
            llm,
            search,
            config: ResearcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResearcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Research one event. `path` is the event chain from the root down to
    /// the node under analysis, inclusive.
    ///
    /// Never fails: any raised error ends the loop and whatever has been
    /// accumulated is returned with low confidence.
    #[tracing::instrument(name = "research_phase", skip_all, fields(event))]
    pub async fn research(
        &self,
        event: &str,
        path: &[String],
        seed: &SeedInput,
    ) -> ResearchResult {
        let mut acc = Accumulator::default();
        match self.run_loop(event, path, seed, &mut acc).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    event,
                    iterations = acc.iterations,
                    gathered = acc.sources.len(),
                    "research loop aborted, returning partial result: {err}"
                );
                std::mem::take(&mut acc).into_partial()
            }
        }
    }

    async fn run_loop(
        &self,
        event: &str,
        path: &[String],
        seed: &SeedInput,
        acc: &mut Accumulator,
    ) -> Result<ResearchResult> {
        let started = Instant::now();
        let tools = research_tools();
        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(task_prompt(event, path, seed)),
        ];

        for iteration in 1..=self.config.max_iterations {
            if started.elapsed() > self.config.timeout {
                tracing::debug!(event, iteration, "research wall-clock budget exhausted");
                break;
            }
            acc.iterations = iteration;

            let assistant = self
                .llm
                .complete_with_tools(&messages, &tools, ToolChoice::Auto)
                .await?;

            if !assistant.has_tool_calls() {
                tracing::debug!(event, iteration, "model stopped calling tools");
                break;
            }

            messages.push(ChatMessage::from_assistant(&assistant));

            let mut searched = false;
            for call in &assistant.tool_calls {
                match call.function.name.as_str() {
                    FINISH_TOOL => match decode_args::<FinishArgs>(&call.function.arguments) {
                        Ok(args) => {
                            return Ok(std::mem::take(acc).finish(args.summary, args.confidence));
                        }
                        Err(err) => {
                            messages.push(ChatMessage::tool(
                                &call.id,
                                &tool_error_response(err.to_string()),
                            ));
                        }
                    },
                    SEARCH_TOOL => match decode_args::<SearchArgs>(&call.function.arguments) {
                        Ok(args) => {
                            let query = args.query.trim().to_string();
                            if !acc.executed.insert(query.clone()) {
                                messages.push(ChatMessage::tool(
                                    &call.id,
                                    &duplicate_query_response(),
                                ));
                                continue;
                            }
                            acc.queries.push(query.clone());

                            let results = self.search.search(&query).await?;
                            let fresh = acc.absorb(results);
                            searched = true;
                            tracing::debug!(
                                event,
                                iteration,
                                query = %query,
                                fresh = fresh.len(),
                                total = acc.sources.len(),
                                "search executed"
                            );
                            messages.push(ChatMessage::tool(
                                &call.id,
                                &search_response(&fresh, acc.sources.len()),
                            ));
                        }
                        Err(err) => {
                            messages.push(ChatMessage::tool(
                                &call.id,
                                &tool_error_response(err.to_string()),
                            ));
                        }
                    },
                    other => {
                        messages.push(ChatMessage::tool(
                            &call.id,
                            &tool_error_response(format!("unknown tool: {other}")),
                        ));
                    }
                }
            }

            if acc.sources.len() >= self.config.min_sources && iteration >= 2 && !searched {
                tracing::debug!(event, iteration, "no search progress, terminating");
                break;
            }
        }

        Ok(std::mem::take(acc).into_result(self.config.min_sources))
    }
}

const SYSTEM_PROMPT: &str = "You are a research analyst gathering evidence \
about a possible future event. Use the search tool iteratively with \
specific, varied queries to collect 3-5 diverse, credible sources covering: \
historical precedent, causal mechanisms, expert predictions, and \
counter-evidence. Never repeat a query. When the gathered sources cover the \
question, call finish_research with a short summary and your confidence.";

fn task_prompt(event: &str, path: &[String], seed: &SeedInput) -> String {
    let mut prompt = format!("Event under analysis: {event}\n");

    if path.len() > 1 {
        let _ = writeln!(prompt, "Causal chain leading here: {}", path.join(" -> "));
        let _ = writeln!(prompt, "Analysis depth: {}", path.len() - 1);
    }
    if event != seed.event {
        let _ = writeln!(prompt, "Original seed event: {}", seed.event);
    }
    if let Some(context) = &seed.context {
        let _ = writeln!(prompt, "Context: {context}");
    }
    if let Some(timeframe) = &seed.timeframe {
        let _ = writeln!(prompt, "Timeframe of interest: {timeframe}");
    }
    if let Some(domain) = &seed.domain {
        let _ = writeln!(prompt, "Domain: {domain}");
    }

    prompt.push_str(
        "\nResearch what could plausibly follow from this event. Start searching now.",
    );
    prompt
}
