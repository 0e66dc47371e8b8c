//! Prompt construction for probability synthesis.

use std::fmt::Write as _;

use crate::tree::{ResearchResult, SeedInput};

/// Render a research result as the human-readable evidence block passed to
/// synthesis: summary with confidence, executed queries, then each source
/// separated by horizontal rules.
pub fn format_research_block(research: &ResearchResult) -> String {
    let mut block = format!(
        "Research Summary ({} confidence): {}\n",
        research.confidence, research.summary
    );

    if !research.queries.is_empty() {
        block.push_str("\nQueries executed:\n");
        for (idx, query) in research.queries.iter().enumerate() {
            let _ = writeln!(block, "{}. {}", idx + 1, query);
        }
    }

    block.push_str("\nSources:\n");
    for source in &research.sources {
        let _ = writeln!(block, "{}\n{}\n{}", source.title, source.url, source.snippet);
        block.push_str("---\n");
    }

    block
}

/// Build the probability-synthesis prompt for one node.
///
/// States the seed, the path so far, the current event, depth bounds, the
/// timeframe, and the research text; requires 1-5 specific measurable
/// outcomes whose probabilities sum to 1, as a strict JSON array.
pub fn synthesis_prompt(
    seed: &SeedInput,
    path: &[String],
    event: &str,
    depth: u32,
    max_depth: u32,
    research_block: &str,
) -> String {
    let mut prompt = String::from(
        "You are forecasting what follows from an event, grounded in the research below.\n\n",
    );

    let _ = writeln!(prompt, "Current event: {event}");
    if event != seed.event {
        let _ = writeln!(prompt, "Original seed event: {}", seed.event);
    }
    if path.len() > 1 {
        let _ = writeln!(prompt, "Event chain so far: {}", path.join(" -> "));
    }
    let _ = writeln!(prompt, "Current depth: {depth} of {max_depth}");
    if let Some(timeframe) = &seed.timeframe {
        let _ = writeln!(prompt, "Timeframe: {timeframe}");
    }
    if let Some(context) = &seed.context {
        let _ = writeln!(prompt, "Context: {context}");
    }

    let _ = write!(prompt, "\n{research_block}\n");

    prompt.push_str(
        "\nList between 1 and 5 possible follow-on outcomes. Each outcome must be a \
         specific, measurable event, and the probabilities must sum to 1.\n\
         Respond with ONLY a JSON array, no prose, in exactly this form:\n\
         [{\"event\": \"...\", \"probability\": 0.0}, ...]",
    );
    prompt
}
