//! The streaming tree-generation endpoint.
//!
//! `POST /generate-tree/stream` accepts a seed and answers with a
//! long-lived `text/event-stream` response carrying one `data: <json>`
//! record per scheduler event, in emission order.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{HeaderValue, CACHE_CONTROL, CONNECTION};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::events::{ChannelSink, EventSink, TreeStreamEvent};
use crate::tree::SeedInput;

use super::AppState;

/// Depth of the scheduler-to-response event queue. When the response
/// writer stalls, the queue fills and back-pressures the scheduler.
pub const EVENT_BUFFER: usize = 64;

pub(super) async fn generate_tree_stream(
    State(state): State<AppState>,
    payload: Result<Json<SeedInput>, JsonRejection>,
) -> Response {
    let seed = match payload {
        Ok(Json(seed)) => seed,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    if let Err(err) = seed.validate() {
        return bad_request(err.to_string());
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let sink = Arc::new(ChannelSink::new(tx));
    let builder = state.builder();

    // The build owns the sink; when it finishes (or aborts after a terminal
    // error event), the sender drops and the stream below ends.
    tokio::spawn(async move {
        if let Err(err) = builder.build(&seed, sink.as_ref()).await {
            tracing::error!("tree build aborted: {err}");
            let _ = sink
                .emit(TreeStreamEvent::error(err.to_string(), None))
                .await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pipeline::NodePipeline;
    use crate::tree::EventNode;
    use async_trait::async_trait;

    struct TwoChildPipeline;

    #[async_trait]
    impl NodePipeline for TwoChildPipeline {
        async fn process(
            &self,
            node: &EventNode,
            _path: &[String],
            _seed: &SeedInput,
        ) -> Result<Vec<EventNode>> {
            Ok(vec![
                EventNode::child_of(node, format!("{} / a", node.event), 0.6),
                EventNode::child_of(node, format!("{} / b", node.event), 0.4),
            ])
        }
    }

    fn state() -> AppState {
        AppState::new(Arc::new(TwoChildPipeline))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_event_is_rejected_with_400() {
        let response = generate_tree_stream(
            State(state()),
            Ok(Json(SeedInput::new("   "))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("error"));
        assert!(body.contains("event"));
    }

    #[tokio::test]
    async fn test_stream_carries_event_records_in_order() {
        let response = generate_tree_stream(
            State(state()),
            Ok(Json(SeedInput::new("X").with_max_depth(1))),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(
            response.headers().get("cache-control").unwrap(),
            "no-cache"
        );

        let body = body_text(response).await;
        let positions: Vec<usize> = [
            "tree_started",
            "node_processing",
            "node_completed",
            "depth_completed",
            "tree_completed",
        ]
        .iter()
        .map(|tag| body.find(tag).unwrap_or_else(|| panic!("{tag} missing from stream")))
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        // Each record is a data: line followed by a blank line.
        assert!(body.contains("data: "));
        assert!(body.contains("\"type\":\"tree_completed\""));
    }

    #[tokio::test]
    async fn test_scheduler_failure_surfaces_terminal_error_event() {
        struct FailingPipeline;

        #[async_trait]
        impl NodePipeline for FailingPipeline {
            async fn process(
                &self,
                node: &EventNode,
                _path: &[String],
                _seed: &SeedInput,
            ) -> Result<Vec<EventNode>> {
                Err(crate::error::Error::pipeline(node.id, "boom"))
            }
        }

        let response = generate_tree_stream(
            State(AppState::new(Arc::new(FailingPipeline))),
            Ok(Json(SeedInput::new("X").with_max_depth(1))),
        )
        .await;

        // Node failures are isolated: the stream still terminates cleanly
        // with a node-scoped error event followed by tree_completed.
        let body = body_text(response).await;
        assert!(body.contains("\"type\":\"error\""));
        assert!(body.contains("\"type\":\"tree_completed\""));
    }
}
