//! The tree scheduler: depth-synchronous waves of bounded parallelism.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::Instrument as _;

use crate::error::{Error, Result};
use crate::events::{EventSink, TreeStreamEvent};
use crate::pipeline::NodePipeline;

use super::node::{EventNode, NodeId, ProcessingStatus, SeedInput, TreeArena};

/// Default ceiling on concurrently running node pipelines.
pub const DEFAULT_MAX_CONCURRENT: usize = 20;

/// Configuration for [`TreeBuilder`].
#[derive(Debug, Clone)]
pub struct TreeBuilderConfig {
    /// Maximum node pipelines in flight within one depth level.
    pub max_concurrent: usize,
    /// Optional wall-clock budget per node pipeline.
    pub node_timeout: Option<Duration>,
}

impl Default for TreeBuilderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            node_timeout: None,
        }
    }
}

/// Builds a complete tree from a seed, one depth level at a time.
///
/// The builder is the sole owner of the tree for the lifetime of a build.
/// Pipelines receive immutable node snapshots and return children; every
/// mutation happens here, between batch barriers. Within a depth, the
/// frontier is split into batches of at most `max_concurrent` pipelines
/// and the next batch is not dispatched until the previous one finished.
///
/// A failed pipeline is isolated to its node: the node is marked failed,
/// an `error` event carries its id, and the build continues. The scheduler
/// never retries a node.
pub struct TreeBuilder {
    config: TreeBuilderConfig,
    pipeline: Arc<dyn NodePipeline>,
}

impl TreeBuilder {
    pub fn new(pipeline: Arc<dyn NodePipeline>) -> Self {
        Self {
            config: TreeBuilderConfig::default(),
            pipeline,
        }
    }

    pub fn with_config(mut self, config: TreeBuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.config.node_timeout = Some(node_timeout);
        self
    }

    /// Build the tree for `seed`, emitting lifecycle events into `sink`.
    ///
    /// Returns the fully assembled root. Leaves at the configured maximum
    /// depth remain pending and are never processed.
    #[tracing::instrument(
        name = "tree_build",
        skip_all,
        fields(max_depth = seed.effective_max_depth())
    )]
    pub async fn build(&self, seed: &SeedInput, sink: &dyn EventSink) -> Result<EventNode> {
        seed.validate()?;
        let max_depth = seed.effective_max_depth();
        let started = Instant::now();

        let root = EventNode::root(seed.event.trim());
        let root_id = root.id;
        let mut arena = TreeArena::new(root);
        tracing::info!(root_id = %root_id, max_depth, "tree build started");

        sink.emit(TreeStreamEvent::tree_started(snapshot(&arena, root_id)?))
            .await?;

        for depth in 0..max_depth {
            let Some(processed) = self.drain_depth(depth, &mut arena, seed, sink).await? else {
                continue;
            };
            arena.check_invariants()?;
            sink.emit(TreeStreamEvent::depth_completed(depth, processed))
                .await?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        sink.emit(TreeStreamEvent::tree_completed(arena.len(), duration_ms))
            .await?;
        tracing::info!(total_nodes = arena.len(), duration_ms, "tree build completed");

        arena
            .assemble(root_id)
            .ok_or_else(|| Error::scheduler("root vanished during build"))
    }

    /// Process one depth wave. Returns `None` when the frontier was empty
    /// (no `depth_completed` is due), otherwise the number of drained nodes.
    #[tracing::instrument(name = "depth_wave", skip(self, arena, seed, sink))]
    async fn drain_depth(
        &self,
        depth: u32,
        arena: &mut TreeArena,
        seed: &SeedInput,
        sink: &dyn EventSink,
    ) -> Result<Option<usize>> {
        let frontier = arena.pending_at_depth(depth);
        if frontier.is_empty() {
            return Ok(None);
        }
        tracing::debug!(frontier = frontier.len(), "draining depth level");
        let mut processed = 0usize;

        for batch in frontier.chunks(self.config.max_concurrent.max(1)) {
            let mut tasks = Vec::with_capacity(batch.len());
            for &id in batch {
                arena.set_status(id, ProcessingStatus::Processing);
                let node = arena
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::scheduler(format!("frontier node {id} missing")))?;
                sink.emit(TreeStreamEvent::node_processing(&node)).await?;

                let path = arena.path_events(id);
                let pipeline = Arc::clone(&self.pipeline);
                let seed = seed.clone();
                let node_timeout = self.config.node_timeout;
                let span = tracing::info_span!("node_pipeline", node_id = %id, depth);
                tasks.push(
                    async move {
                        let result = match node_timeout {
                            Some(limit) => {
                                match timeout(limit, pipeline.process(&node, &path, &seed)).await {
                                    Ok(result) => result,
                                    Err(_) => Err(Error::timeout(limit.as_millis() as u64)),
                                }
                            }
                            None => pipeline.process(&node, &path, &seed).await,
                        };
                        (id, result)
                    }
                    .instrument(span),
                );
            }

            for (id, result) in join_all(tasks).await {
                processed += 1;
                match result {
                    Ok(children) if !children.is_empty() => {
                        arena.install_children(id, children);
                        arena.set_status(id, ProcessingStatus::Completed);
                        sink.emit(TreeStreamEvent::node_completed(snapshot(arena, id)?))
                            .await?;
                    }
                    Ok(_) => {
                        arena.set_status(id, ProcessingStatus::Failed);
                        let err = Error::pipeline(id, "pipeline returned no children");
                        tracing::warn!(node_id = %id, "{err}");
                        sink.emit(TreeStreamEvent::error(err.to_string(), Some(id)))
                            .await?;
                    }
                    Err(err) => {
                        arena.set_status(id, ProcessingStatus::Failed);
                        tracing::warn!(node_id = %id, "node pipeline failed: {err}");
                        sink.emit(TreeStreamEvent::error(err.to_string(), Some(id)))
                            .await?;
                    }
                }
            }
        }

        Ok(Some(processed))
    }
}

fn snapshot(arena: &TreeArena, id: NodeId) -> Result<EventNode> {
    arena
        .snapshot(id)
        .ok_or_else(|| Error::scheduler(format!("missing snapshot for node {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    /// Deterministic pipeline: fans out a fixed number of equal-probability
    /// children per depth, optionally sleeping and failing chosen events.
    struct StubPipeline {
        fanout_by_depth: Vec<usize>,
        fail_events: HashSet<String>,
        delay: Option<Duration>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubPipeline {
        fn fanout(fanout_by_depth: Vec<usize>) -> Self {
            Self {
                fanout_by_depth,
                fail_events: HashSet::new(),
                delay: None,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn failing_on(mut self, event: &str) -> Self {
            self.fail_events.insert(event.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl NodePipeline for StubPipeline {
        async fn process(
            &self,
            node: &EventNode,
            _path: &[String],
            _seed: &SeedInput,
        ) -> Result<Vec<EventNode>> {
            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_events.contains(&node.event) {
                return Err(Error::pipeline(node.id, "stub failure"));
            }

            let fanout = self
                .fanout_by_depth
                .get(node.depth as usize)
                .copied()
                .unwrap_or(0);
            Ok((0..fanout)
                .map(|i| {
                    EventNode::child_of(
                        node,
                        format!("{} / option {}", node.event, i + 1),
                        1.0 / fanout as f64,
                    )
                })
                .collect())
        }
    }

    fn types(events: &[TreeStreamEvent]) -> Vec<&'static str> {
        events.iter().map(TreeStreamEvent::event_type).collect()
    }

    fn position_of(events: &[TreeStreamEvent], pred: impl Fn(&TreeStreamEvent) -> bool) -> usize {
        events.iter().position(pred).expect("event not found")
    }

    #[tokio::test]
    async fn test_depth_one_happy_path_event_sequence() {
        let builder = TreeBuilder::new(Arc::new(StubPipeline::fanout(vec![2])));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(1);

        let root = builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        assert_eq!(
            types(&events),
            vec![
                "tree_started",
                "node_processing",
                "node_completed",
                "depth_completed",
                "tree_completed",
            ]
        );

        match &events[4] {
            TreeStreamEvent::TreeCompleted { total_nodes, .. } => assert_eq!(*total_nodes, 3),
            other => panic!("expected tree_completed, got {other:?}"),
        }

        assert_eq!(root.children.len(), 2);
        let sum: f64 = root.children.iter().map(|c| c.probability).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(root.processing_status, ProcessingStatus::Completed);
        // Leaves at max depth are never processed.
        assert!(root
            .children
            .iter()
            .all(|c| c.processing_status == ProcessingStatus::Pending));
    }

    #[tokio::test]
    async fn test_rejects_empty_seed_before_emitting() {
        let builder = TreeBuilder::new(Arc::new(StubPipeline::fanout(vec![2])));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("   ");

        let err = builder.build(&seed, &sink).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_node_is_isolated() {
        let pipeline = StubPipeline::fanout(vec![2, 1]).failing_on("X / option 2");
        let builder = TreeBuilder::new(Arc::new(pipeline));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(2);

        let root = builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        // One error event carrying the failed node's id.
        let errors: Vec<_> = events.iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 1);
        let failed_id = match errors[0] {
            TreeStreamEvent::Error {
                node_id: Some(id), ..
            } => *id,
            other => panic!("expected node-scoped error, got {other:?}"),
        };

        let failed = root
            .children
            .iter()
            .find(|c| c.id == failed_id)
            .expect("failed child present in tree");
        assert_eq!(failed.processing_status, ProcessingStatus::Failed);
        assert!(failed.children.is_empty());

        let survivor = root.children.iter().find(|c| c.id != failed_id).unwrap();
        assert_eq!(survivor.processing_status, ProcessingStatus::Completed);
        assert_eq!(survivor.children.len(), 1);

        // The depth still completes, counting both drained nodes.
        assert!(events.contains(&TreeStreamEvent::depth_completed(1, 2)));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_pipeline_returning_no_children_marks_failure() {
        let builder = TreeBuilder::new(Arc::new(StubPipeline::fanout(vec![0])));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(1);

        let root = builder.build(&seed, &sink).await.unwrap();

        assert_eq!(root.processing_status, ProcessingStatus::Failed);
        assert!(root.children.is_empty());
        assert_eq!(sink.events().iter().filter(|e| e.is_error()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wide_fanout_respects_concurrency_and_barriers() {
        let pipeline = Arc::new(
            StubPipeline::fanout(vec![25, 1, 1]).with_delay(Duration::from_millis(10)),
        );
        let builder = TreeBuilder::new(Arc::clone(&pipeline) as Arc<dyn NodePipeline>)
            .with_max_concurrent(20);
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(3);

        let root = builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        // Concurrency ceiling is hit but never exceeded.
        assert_eq!(pipeline.peak.load(Ordering::SeqCst), 20);

        // depth_completed(d) precedes every node_processing at depth d+1.
        for d in 0..2u32 {
            let barrier = position_of(&events, |e| {
                matches!(e, TreeStreamEvent::DepthCompleted { depth, .. } if *depth == d)
            });
            let first_next = position_of(&events, |e| {
                matches!(e, TreeStreamEvent::NodeProcessing { depth, .. } if *depth == d + 1)
            });
            assert!(barrier < first_next, "barrier for depth {d} arrived late");
        }

        // 1 root + 25 + 25 + 25.
        assert!(events.contains(&TreeStreamEvent::depth_completed(1, 25)));
        assert_eq!(root.children.len(), 25);
        match events.last().unwrap() {
            TreeStreamEvent::TreeCompleted { total_nodes, .. } => assert_eq!(*total_nodes, 76),
            other => panic!("expected tree_completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_completion_has_a_prior_processing_event() {
        let builder = TreeBuilder::new(Arc::new(StubPipeline::fanout(vec![3, 2])));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(2);

        builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        for (idx, event) in events.iter().enumerate() {
            if let TreeStreamEvent::NodeCompleted { node, .. } = event {
                let processing = events[..idx].iter().any(|e| {
                    matches!(e, TreeStreamEvent::NodeProcessing { node_id, .. } if *node_id == node.id)
                });
                assert!(processing, "node {} completed without processing event", node.id);
            }
        }

        // node_completed + error(node id) accounts for every processed node.
        let completed = events
            .iter()
            .filter(|e| matches!(e, TreeStreamEvent::NodeCompleted { .. }))
            .count();
        assert_eq!(completed, 4); // root + 3 children
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_timeout_counts_as_failure() {
        let pipeline = StubPipeline::fanout(vec![2]).with_delay(Duration::from_secs(10));
        let builder = TreeBuilder::new(Arc::new(pipeline))
            .with_node_timeout(Duration::from_secs(1));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(1);

        let root = builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        assert_eq!(root.processing_status, ProcessingStatus::Failed);
        let error = events.iter().find(|e| e.is_error()).unwrap();
        match error {
            TreeStreamEvent::Error { message, node_id } => {
                assert_eq!(*node_id, Some(root.id));
                assert!(message.contains("timed out"));
            }
            _ => unreachable!(),
        }
    }

    mod end_to_end {
        use super::*;
        use crate::llm::{
            AssistantMessage, ChatMessage, LlmClient, ToolCall, ToolChoice, ToolDefinition,
        };
        use crate::pipeline::{NodeProcessor, DEFAULT_JUSTIFICATION};
        use crate::search::{MockProvider, SearchClient};
        use std::collections::VecDeque;
        use std::sync::Mutex;

        struct ScriptedLlm {
            research: Mutex<VecDeque<AssistantMessage>>,
            synthesis: Mutex<VecDeque<String>>,
        }

        #[async_trait]
        impl LlmClient for ScriptedLlm {
            async fn complete(&self, _prompt: &str) -> Result<String> {
                self.synthesis
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| Error::transport("scripted", "synthesis script exhausted"))
            }

            async fn complete_with_tools(
                &self,
                _messages: &[ChatMessage],
                _tools: &[ToolDefinition],
                _tool_choice: ToolChoice,
            ) -> Result<AssistantMessage> {
                self.research
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| Error::transport("scripted", "research script exhausted"))
            }
        }

        #[tokio::test]
        async fn test_seed_to_tree_with_mock_llm_and_search() {
            let llm = Arc::new(ScriptedLlm {
                research: Mutex::new(
                    vec![
                        AssistantMessage::with_tool_calls(vec![ToolCall::new(
                            "c1",
                            "search",
                            r#"{"query": "precedents"}"#,
                        )]),
                        AssistantMessage::with_tool_calls(vec![ToolCall::new(
                            "c2",
                            "finish_research",
                            r#"{"summary": "covered", "confidence": "medium"}"#,
                        )]),
                    ]
                    .into(),
                ),
                synthesis: Mutex::new(
                    vec![r#"[{"event": "Outcome A materializes", "probability": 0.6},
                             {"event": "Outcome B materializes", "probability": 0.4}]"#
                        .to_string()]
                    .into(),
                ),
            });
            let search = Arc::new(SearchClient::new(Arc::new(MockProvider::new())));
            let processor =
                NodeProcessor::new(llm as Arc<dyn LlmClient>, search).with_retry_policy(0, Duration::from_millis(1));
            let builder = TreeBuilder::new(Arc::new(processor));
            let sink = CollectingSink::new();
            let seed = SeedInput::new("X").with_max_depth(1);

            let root = builder.build(&seed, &sink).await.unwrap();
            let events = sink.events();

            assert_eq!(
                types(&events),
                vec![
                    "tree_started",
                    "node_processing",
                    "node_completed",
                    "depth_completed",
                    "tree_completed",
                ]
            );
            match events.last().unwrap() {
                TreeStreamEvent::TreeCompleted { total_nodes, .. } => assert_eq!(*total_nodes, 3),
                other => panic!("expected tree_completed, got {other:?}"),
            }

            assert_eq!(root.children.len(), 2);
            assert_eq!(root.children[0].event, "Outcome A materializes");
            assert!((root.children[0].probability - 0.6).abs() < 1e-9);
            assert!((root.children[1].probability - 0.4).abs() < 1e-9);
            let sum: f64 = root.children.iter().map(|c| c.probability).sum();
            assert!((sum - 1.0).abs() < 1e-12);
            for child in &root.children {
                assert_eq!(child.justification, DEFAULT_JUSTIFICATION);
                assert_eq!(child.sources.len(), 3);
            }
        }
    }

    #[tokio::test]
    async fn test_node_completed_snapshot_carries_children() {
        let builder = TreeBuilder::new(Arc::new(StubPipeline::fanout(vec![2])));
        let sink = CollectingSink::new();
        let seed = SeedInput::new("X").with_max_depth(1);

        builder.build(&seed, &sink).await.unwrap();
        let events = sink.events();

        let completed = events
            .iter()
            .find_map(|e| match e {
                TreeStreamEvent::NodeCompleted { node, children } => Some((node, children)),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed.0.children.len(), 2);
        assert_eq!(completed.1.len(), 2);
        assert_eq!(completed.0.processing_status, ProcessingStatus::Completed);
    }
}
