//! Tree node types and the id-indexed arena the scheduler owns.
//!
//! Nodes never hold owning back-pointers; parents are referenced by id and
//! the [`TreeArena`] resolves them. Snapshots handed to event sinks are
//! value copies, so consumers can never observe a half-mutated tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier for a node in the tree.
pub type NodeId = Uuid;

/// Maximum sources retained per node.
pub const MAX_SOURCES_PER_NODE: usize = 5;

/// Tolerance for sibling probability sums.
pub const PROBABILITY_TOLERANCE: f64 = 1e-3;

/// Processing lifecycle of a node.
///
/// `pending` → `processing` → `completed` | `failed`; no transitions after
/// a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A research source attached to a node.
///
/// Equality is by normalized URL: scheme and host are lowercased, the
/// fragment and any trailing slash are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl Source {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            relevance_score: None,
        }
    }

    /// Set the relevance score.
    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// URL normalized for equality comparison.
    pub fn normalized_url(&self) -> String {
        let trimmed = self.url.trim();
        let without_fragment = match trimmed.split_once('#') {
            Some((before, _)) => before,
            None => trimmed,
        };
        let without_slash = without_fragment.trim_end_matches('/');

        match without_slash.split_once("://") {
            Some((scheme, rest)) => {
                let (host, path) = match rest.split_once('/') {
                    Some((host, path)) => (host, format!("/{path}")),
                    None => (rest, String::new()),
                };
                format!("{}://{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
            }
            None => without_slash.to_string(),
        }
    }

    /// Lowercased hostname without port or a leading `www.`, if the URL has
    /// a recognizable authority component.
    pub fn host(&self) -> Option<String> {
        let rest = self.url.trim().split_once("://")?.1;
        let authority = rest.split(['/', '?', '#']).next()?;
        let host = authority.rsplit('@').next()?.split(':').next()?;
        if host.is_empty() {
            return None;
        }
        let host = host.to_lowercase();
        Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_url() == other.normalized_url()
    }
}

impl Eq for Source {}

fn default_max_depth() -> u32 {
    3
}

/// The user-provided seed that roots a tree build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedInput {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl SeedInput {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            context: None,
            timeframe: None,
            max_depth: default_max_depth(),
            domain: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = Some(timeframe.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// The configured depth, clamped to the supported range.
    pub fn effective_max_depth(&self) -> u32 {
        self.max_depth.clamp(1, 5)
    }

    /// Reject seeds without a usable event description.
    pub fn validate(&self) -> Result<()> {
        if self.event.trim().is_empty() {
            return Err(Error::validation("event is required and must be non-empty"));
        }
        Ok(())
    }
}

/// One probability-weighted outcome returned by synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityOutput {
    pub event: String,
    pub probability: f64,
}

impl ProbabilityOutput {
    /// Minimum characters for a usable outcome description.
    pub const MIN_EVENT_LEN: usize = 10;

    pub fn validate(&self) -> Result<()> {
        if self.event.trim().len() < Self::MIN_EVENT_LEN {
            return Err(Error::schema(format!(
                "outcome event too short ({} chars): {:?}",
                self.event.trim().len(),
                self.event
            )));
        }
        if !(0.0..=1.0).contains(&self.probability) || !self.probability.is_finite() {
            return Err(Error::schema(format!(
                "outcome probability out of range: {}",
                self.probability
            )));
        }
        Ok(())
    }
}

/// Self-reported confidence of a research pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The outcome of one agentic research invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub sources: Vec<Source>,
    pub summary: String,
    pub confidence: Confidence,
    pub iterations: u32,
    pub queries: Vec<String>,
}

impl ResearchResult {
    /// An empty result with low confidence.
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            summary: String::new(),
            confidence: Confidence::Low,
            iterations: 0,
            queries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A vertex in the probability tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNode {
    pub id: NodeId,
    pub event: String,
    pub probability: f64,
    pub justification: String,
    pub sentiment: i32,
    pub depth: u32,
    pub sources: Vec<Source>,
    pub children: Vec<EventNode>,
    pub parent_id: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
}

impl EventNode {
    /// Construct the root node for a seed event.
    pub fn root(event: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            probability: 1.0,
            justification: String::new(),
            sentiment: 0,
            depth: 0,
            sources: Vec::new(),
            children: Vec::new(),
            parent_id: None,
            created_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
        }
    }

    /// Construct a pending child of `parent` with the given event and weight.
    pub fn child_of(parent: &EventNode, event: impl Into<String>, probability: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            probability,
            justification: String::new(),
            sentiment: 0,
            depth: parent.depth + 1,
            sources: Vec::new(),
            children: Vec::new(),
            parent_id: Some(parent.id),
            created_at: Utc::now(),
            processing_status: ProcessingStatus::Pending,
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }

    pub fn with_sentiment(mut self, sentiment: i32) -> Self {
        self.sentiment = sentiment.clamp(-100, 100);
        self
    }

    /// Attach sources, keeping at most [`MAX_SOURCES_PER_NODE`].
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self.sources.truncate(MAX_SOURCES_PER_NODE);
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Flat, id-indexed storage for one tree build.
///
/// The scheduler is the sole mutator. Stored nodes keep their `children`
/// vec empty; parent/child structure lives in the arena so snapshots can
/// be materialized at any nesting level without aliasing.
#[derive(Debug)]
pub struct TreeArena {
    nodes: HashMap<NodeId, EventNode>,
    child_ids: HashMap<NodeId, Vec<NodeId>>,
    root: NodeId,
}

impl TreeArena {
    /// Create an arena rooted at `root`. Any nested children on the value
    /// are discarded; roots enter the arena childless.
    pub fn new(mut root: EventNode) -> Self {
        root.children.clear();
        root.parent_id = None;
        root.depth = 0;
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            child_ids: HashMap::new(),
            root: root_id,
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes recorded.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&EventNode> {
        self.nodes.get(&id)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.child_ids.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Set a node's processing status. Unknown ids are ignored.
    pub fn set_status(&mut self, id: NodeId, status: ProcessingStatus) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.processing_status = status;
        }
    }

    /// Register freshly built children under `parent`. Children arrive
    /// pending and childless; their order is preserved.
    pub fn install_children(&mut self, parent: NodeId, children: Vec<EventNode>) {
        let ids: Vec<NodeId> = children.iter().map(|c| c.id).collect();
        for mut child in children {
            child.children.clear();
            self.nodes.insert(child.id, child);
        }
        self.child_ids.insert(parent, ids);
    }

    /// Pending node ids at exactly `depth`, in tree order.
    pub fn pending_at_depth(&self, depth: u32) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_pending(self.root, depth, &mut out);
        out
    }

    fn collect_pending(&self, id: NodeId, depth: u32, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.depth == depth {
            if node.processing_status == ProcessingStatus::Pending {
                out.push(id);
            }
            return;
        }
        if node.depth > depth {
            return;
        }
        for &child in self.children_of(id) {
            self.collect_pending(child, depth, out);
        }
    }

    /// Event strings from the root down to (and including) `id`.
    pub fn path_events(&self, id: NodeId) -> Vec<String> {
        let mut events = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            events.push(node.event.clone());
            cursor = node.parent_id;
        }
        events.reverse();
        events
    }

    /// Value copy of a node with its direct children attached (children
    /// themselves are childless in the copy).
    pub fn snapshot(&self, id: NodeId) -> Option<EventNode> {
        let mut node = self.nodes.get(&id)?.clone();
        node.children = self
            .children_of(id)
            .iter()
            .filter_map(|c| self.nodes.get(c).cloned())
            .collect();
        Some(node)
    }

    /// Fully nested value copy of the subtree rooted at `id`.
    pub fn assemble(&self, id: NodeId) -> Option<EventNode> {
        let mut node = self.nodes.get(&id)?.clone();
        node.children = self
            .children_of(id)
            .iter()
            .filter_map(|&c| self.assemble(c))
            .collect();
        Some(node)
    }

    /// Verify the structural invariants the scheduler must preserve.
    pub fn check_invariants(&self) -> Result<()> {
        let mut roots = 0usize;
        for (id, node) in &self.nodes {
            if node.id != *id {
                return Err(Error::scheduler(format!("node {id} stored under wrong key")));
            }
            if node.sources.len() > MAX_SOURCES_PER_NODE {
                return Err(Error::scheduler(format!(
                    "node {id} carries {} sources (max {MAX_SOURCES_PER_NODE})",
                    node.sources.len()
                )));
            }
            match node.parent_id {
                None => {
                    roots += 1;
                    if *id != self.root || node.depth != 0 {
                        return Err(Error::scheduler(format!("unexpected extra root {id}")));
                    }
                }
                Some(parent_id) => {
                    let Some(parent) = self.nodes.get(&parent_id) else {
                        return Err(Error::scheduler(format!(
                            "node {id} references missing parent {parent_id}"
                        )));
                    };
                    if node.depth != parent.depth + 1 {
                        return Err(Error::scheduler(format!(
                            "node {id} depth {} does not follow parent depth {}",
                            node.depth, parent.depth
                        )));
                    }
                }
            }
        }
        if roots != 1 {
            return Err(Error::scheduler(format!("expected exactly one root, found {roots}")));
        }

        for (parent_id, children) in &self.child_ids {
            if children.is_empty() {
                continue;
            }
            let parent = self
                .nodes
                .get(parent_id)
                .ok_or_else(|| Error::scheduler(format!("children recorded for missing node {parent_id}")))?;
            if parent.processing_status != ProcessingStatus::Completed {
                return Err(Error::scheduler(format!(
                    "node {parent_id} has children but status {}",
                    parent.processing_status
                )));
            }
            let sum: f64 = children
                .iter()
                .filter_map(|c| self.nodes.get(c))
                .map(|c| c.probability)
                .sum();
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(Error::scheduler(format!(
                    "children of {parent_id} sum to {sum}, outside tolerance"
                )));
            }
        }
        Ok(())
    }
}
