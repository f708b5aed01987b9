use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use listsync_common::types::InstanceInfo;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info(State(instance): State<Arc<InstanceInfo>>) -> Json<InstanceInfo> {
    Json(instance.as_ref().clone())
}

pub fn build_router(instance: InstanceInfo) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .with_state(Arc::new(instance))
}

/// Bind the health listener. Done before any job runs so a bad address
/// stops startup.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "health endpoint listening");
    Ok(listener)
}

/// Serve the health endpoints until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    instance: InstanceInfo,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, build_router(instance))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_returns_ok() {
        let app = build_router(InstanceInfo::new("listsync-importer", "daemon"));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn info_reports_schedule() {
        let info = InstanceInfo::new("listsync-importer", "daemon")
            .with_schedule(&["abc123".to_string()], 300);
        let app = build_router(info);
        let resp = app
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["service"], "listsync-importer");
        assert_eq!(json["mode"], "daemon");
        assert_eq!(json["jobs"][0], "abc123");
        assert_eq!(json["period_secs"], 300);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = build_router(InstanceInfo::new("listsync-importer", "daemon"));
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bind_fails_when_address_taken() {
        let taken = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn serve_answers_until_cancelled() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            InstanceInfo::new("listsync-importer", "daemon"),
            cancel.clone(),
        ));

        let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
