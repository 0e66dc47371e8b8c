//! Stream event types for observable tree construction.
//!
//! The scheduler emits one event per significant transition; sinks decide
//! how to render them:
//! - HTTP endpoint: serialized as `data: <json>\n\n` records on an SSE body
//! - Tests: collected in memory for ordering assertions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::tree::{EventNode, NodeId};

/// Events emitted while a tree is being built.
///
/// Serializes to the wire shape `{"type": ..., "data": {...}}` with
/// camelCase data fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TreeStreamEvent {
    /// Build accepted; `seed` is the root snapshot.
    #[serde(rename_all = "camelCase")]
    TreeStarted { seed: EventNode },
    /// A node's pipeline was claimed by the scheduler.
    #[serde(rename_all = "camelCase")]
    NodeProcessing {
        node_id: NodeId,
        depth: u32,
        event: String,
    },
    /// A node's pipeline finished; snapshots are value copies.
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node: EventNode,
        children: Vec<EventNode>,
    },
    /// Every frontier node at `depth` has been drained.
    #[serde(rename_all = "camelCase")]
    DepthCompleted { depth: u32, nodes_processed: usize },
    /// The whole build finished; `duration` is in milliseconds.
    #[serde(rename_all = "camelCase")]
    TreeCompleted { total_nodes: usize, duration: u64 },
    /// A node-level or scheduler-level failure.
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<NodeId>,
    },
}

impl TreeStreamEvent {
    pub fn tree_started(seed: EventNode) -> Self {
        Self::TreeStarted { seed }
    }

    pub fn node_processing(node: &EventNode) -> Self {
        Self::NodeProcessing {
            node_id: node.id,
            depth: node.depth,
            event: node.event.clone(),
        }
    }

    pub fn node_completed(node: EventNode) -> Self {
        let children = node.children.clone();
        Self::NodeCompleted { node, children }
    }

    pub fn depth_completed(depth: u32, nodes_processed: usize) -> Self {
        Self::DepthCompleted {
            depth,
            nodes_processed,
        }
    }

    pub fn tree_completed(total_nodes: usize, duration_ms: u64) -> Self {
        Self::TreeCompleted {
            total_nodes,
            duration: duration_ms,
        }
    }

    pub fn error(message: impl Into<String>, node_id: Option<NodeId>) -> Self {
        Self::Error {
            message: message.into(),
            node_id,
        }
    }

    /// The wire `type` tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TreeStarted { .. } => "tree_started",
            Self::NodeProcessing { .. } => "node_processing",
            Self::NodeCompleted { .. } => "node_completed",
            Self::DepthCompleted { .. } => "depth_completed",
            Self::TreeCompleted { .. } => "tree_completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TreeCompleted { .. })
    }
}

/// Receives events synchronously with the scheduler's progression.
///
/// Implementations must be cheap; the scheduler awaits each emission and
/// a slow sink back-pressures the build.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: TreeStreamEvent) -> Result<()>;
}

/// Sink that forwards events into a bounded channel drained by the HTTP
/// response writer.
///
/// Once the receiver is dropped (client disconnect) emissions are silently
/// discarded so in-flight upstream work can drain without erroring the
/// scheduler.
pub struct ChannelSink {
    tx: mpsc::Sender<TreeStreamEvent>,
    closed: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<TreeStreamEvent>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: TreeStreamEvent) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event sink receiver dropped; discarding further emissions");
            self.closed.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Sink that records every event in memory. Test helper.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TreeStreamEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of everything emitted so far.
    pub fn events(&self) -> Vec<TreeStreamEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: TreeStreamEvent) -> Result<()> {
        self.events.lock().expect("sink lock poisoned").push(event);
        Ok(())
    }
}
