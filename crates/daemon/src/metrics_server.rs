//! HTTP endpoint exposing the daemon's metrics snapshot.
//!
//! The host application and monitoring poll `/metrics` for the JSON
//! snapshot; `/health` answers liveness probes.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::{MetricsSnapshot, SharedMetrics};

/// Errors from the metrics HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid metrics bind address '{addr}': {source}")]
    InvalidBindAddress {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<MetricsSnapshot> {
    Json(metrics.read().await.clone())
}

async fn get_health() -> &'static str {
    "ok"
}

/// Build the router serving `/metrics` and `/health`.
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .with_state(metrics)
}

/// Serve the metrics endpoint on `bind` (e.g. "127.0.0.1:9867") until the
/// task is dropped. Fails fast on an unparseable address or an occupied
/// port so a misconfiguration is visible at startup, not at first poll.
pub async fn run_metrics_server(metrics: SharedMetrics, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|source| ServerError::InvalidBindAddress {
            addr: bind.to_string(),
            source,
        })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_metrics_router(metrics)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{new_shared_metrics, SystemMetrics, TranscodeMetrics};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn fetch(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_the_snapshot() {
        let metrics = new_shared_metrics();
        {
            let mut snapshot = metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.queue_len = 5;
            snapshot.files_added = 12;
            snapshot.completed_files = 9;
            snapshot.failed_files = 2;
            snapshot.system = SystemMetrics {
                cpu_usage_percent: 85.2,
                mem_usage_percent: 42.1,
                load_avg_1: 3.5,
                load_avg_5: 2.8,
                load_avg_15: 2.2,
            };
            snapshot.upsert_transcode(TranscodeMetrics {
                file_id: "file-001".to_string(),
                project_id: 7,
                filename: "shoot.mov".to_string(),
                seconds_done: 42.0,
                percent: Some(35.0),
            });
        }

        let (status, body) = fetch(create_metrics_router(metrics), "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.timestamp_unix_ms, 1701388800000);
        assert_eq!(parsed.queue_len, 5);
        assert_eq!(parsed.files_added, 12);
        assert_eq!(parsed.completed_files, 9);
        assert_eq!(parsed.failed_files, 2);
        assert_eq!(parsed.running_transcodes, 1);
        assert_eq!(parsed.active_transcodes.len(), 1);
        assert_eq!(parsed.active_transcodes[0].file_id, "file-001");
        assert_eq!(parsed.active_transcodes[0].percent, Some(35.0));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_with_empty_snapshot() {
        let (status, body) = fetch(create_metrics_router(new_shared_metrics()), "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.active_transcodes.len(), 0);
        assert_eq!(parsed.queue_len, 0);
        assert_eq!(parsed.running_transcodes, 0);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = fetch(create_metrics_router(new_shared_metrics()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = fetch(create_metrics_router(new_shared_metrics()), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_bind_address_is_rejected() {
        let err = run_metrics_server(new_shared_metrics(), "not-an-address")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidBindAddress { .. }));
    }
}
