//! RPC surface over HTTP + JSON.
//!
//! | RPC | Route |
//! |---|---|
//! | `Ping` | `GET /ping` |
//! | `GetParams` | `GET /params/{type}/{action}` |
//! | `Action` | `POST /action` |
//!
//! Failures are answered as `{"code": "...", "message": "..."}` with the
//! HTTP status of the [`ActionError`] variant.

use crate::action::{ActionError, ActionRouter};
use crate::client::ControlResponse;
use crate::imaging::ImageBackend;
use crate::types::{ActionRequest, CacheRecord};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ActionError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "action failed");
        } else {
            tracing::info!(code = self.code(), error = %self, "action rejected");
        }
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// HTTP routes backed by `actions`.
pub fn router<B: ImageBackend + 'static>(actions: Arc<ActionRouter<B>>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/params/{kind}/{action}", get(get_params::<B>))
        .route("/action", post(run_action::<B>))
        .with_state(actions)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "rpc server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ping() -> Json<ControlResponse> {
    Json(ControlResponse {
        message: "pong".to_string(),
        ..ControlResponse::ok(0)
    })
}

async fn get_params<B: ImageBackend + 'static>(
    Path((kind, action)): Path<(String, String)>,
) -> Result<Json<&'static [&'static str]>, ActionError> {
    ActionRouter::<B>::get_params(&kind, &action).map(Json)
}

async fn run_action<B: ImageBackend + 'static>(
    State(actions): State<Arc<ActionRouter<B>>>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<CacheRecord>, ActionError> {
    actions.action(request).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CacheLookup, ClientError};
    use crate::imaging::backend::tests::MockBackend;
    use crate::storage::tests::MemoryStore;
    use crate::types::{ItemIdentifier, Item, Storage};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::oneshot;

    struct Canonical;

    #[async_trait]
    impl CacheLookup for Canonical {
        async fn get_cache(
            &self,
            item: &ItemIdentifier,
            action: &str,
        ) -> Result<Option<CacheRecord>, ClientError> {
            Ok(Some(CacheRecord {
                identifier: item.clone(),
                action: action.to_string(),
                params: String::new(),
                width: 64,
                height: 32,
                duration: 0,
                size: 5,
                mimetype: "image/png".into(),
                path: format!("{}.png", item.signature),
                storage: "local".into(),
            }))
        }
    }

    struct TestServer {
        base: String,
        shutdown: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<std::io::Result<()>>,
    }

    async fn start() -> TestServer {
        let store = MemoryStore::new();
        store.put("/base/sig.png", b"64x32");
        let actions = Arc::new(ActionRouter::new(
            Arc::new(MockBackend::new()),
            Arc::new(store),
            Arc::new(Canonical),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(serve(listener, router(actions), async {
            let _ = rx.await;
        }));
        TestServer {
            base,
            shutdown: tx,
            handle,
        }
    }

    impl TestServer {
        async fn stop(self) {
            let _ = self.shutdown.send(());
            self.handle.await.unwrap().unwrap();
        }
    }

    fn request(params: &[(&str, &str)]) -> ActionRequest {
        ActionRequest {
            item: Some(Item {
                identifier: ItemIdentifier {
                    collection: "c".into(),
                    signature: "sig".into(),
                },
                subtype: None,
                mimetype: None,
            }),
            storage: Some(Storage {
                name: "local".into(),
                filebase: "/base".into(),
                datadir: "data".into(),
            }),
            action: "resize".into(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ActionError::InvalidArgument("x".into()), 400),
            (ActionError::NotFound("x".into()), 404),
            (ActionError::Unimplemented("x".into()), 501),
            (ActionError::DeadlineExceeded("x".into()), 504),
            (ActionError::Internal("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status().as_u16(), status);
        }
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let server = start().await;
        let body: ControlResponse = reqwest::get(format!("{}/ping", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.message, "pong");
        server.stop().await;
    }

    #[tokio::test]
    async fn params_route() {
        let server = start().await;
        let names: Vec<String> = reqwest::get(format!("{}/params/image/convert", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(names, vec!["format", "tile", "compress", "quality"]);

        let response = reqwest::get(format!("{}/params/video/resize", server.base))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, "NotFound");
        assert_eq!(body.message, "action video::resize not found");
        server.stop().await;
    }

    #[tokio::test]
    async fn action_route() {
        let server = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/action", server.base))
            .json(&request(&[("size", "32x32"), ("crop", "")]))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let record: CacheRecord = response.json().await.unwrap();
        assert_eq!((record.width, record.height), (32, 32));
        assert!(record.path.starts_with("data/c/sig-resize-"));

        let response = client
            .post(format!("{}/action", server.base))
            .json(&request(&[]))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
        let body: ErrorBody = response.json().await.unwrap();
        assert_eq!(body.code, "InvalidArgument");
        assert!(body.message.contains("size"));

        server.stop().await;
    }
}
