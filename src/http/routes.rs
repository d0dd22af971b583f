use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::header::{HeaderName, AUTHORIZATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::session::{Lifecycle, PublishedState, SessionBroadcasts};
use crate::telemetry::{self, TelemetrySnapshot};

use super::sse;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct DebugHttpState {
    broadcasts: SessionBroadcasts,
    token: Option<Arc<String>>,
}

impl DebugHttpState {
    /// `token = None` leaves every route open
    pub fn new(broadcasts: SessionBroadcasts, token: Option<String>) -> Self {
        Self {
            broadcasts,
            token: token.map(Arc::new),
        }
    }

    fn authorize(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<(), HttpServerError> {
        let Some(expected) = &self.token else {
            return Ok(());
        };
        match extract_token(headers, query_token) {
            Some(value) if value == **expected => Ok(()),
            _ => Err(HttpServerError::Unauthorized),
        }
    }
}

/// Query payload for extracting token from URL.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    pub token: Option<String>,
}

/// HTTP error variants mapped to JSON responses.
#[derive(Debug)]
pub enum HttpServerError {
    Unauthorized,
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid token"),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Health endpoint response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub lifecycle: Lifecycle,
    pub clock_ms: u64,
    pub judgment_available: bool,
}

/// Build the Axum router with all handlers.
pub fn build_router(state: DebugHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(session_state))
        .route("/telemetry", get(telemetry_snapshot))
        .route("/verdicts", get(verdict_stream_handler))
        .with_state(state)
}

/// Run the HTTP server loop.
pub async fn run_http_server(state: DebugHttpState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding debug HTTP listener")?;
    let router = build_router(state);
    axum::serve(listener, router)
        .await
        .context("serving debug HTTP router")?;
    Ok(())
}

pub async fn health(
    State(state): State<DebugHttpState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<HealthResponse>, HttpServerError> {
    state.authorize(&headers, query.token.as_deref())?;

    let latest = state.broadcasts.latest();
    Ok(Json(HealthResponse {
        status: "ok",
        lifecycle: latest.lifecycle,
        clock_ms: latest.clock_ms,
        judgment_available: latest.judgment_available,
    }))
}

pub async fn session_state(
    State(state): State<DebugHttpState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<PublishedState>, HttpServerError> {
    state.authorize(&headers, query.token.as_deref())?;
    Ok(Json(state.broadcasts.latest()))
}

pub async fn telemetry_snapshot(
    State(state): State<DebugHttpState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<Json<TelemetrySnapshot>, HttpServerError> {
    state.authorize(&headers, query.token.as_deref())?;
    Ok(Json(telemetry::hub().snapshot()))
}

pub async fn verdict_stream_handler(
    State(state): State<DebugHttpState>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
) -> Result<sse::VerdictStream, HttpServerError> {
    state.authorize(&headers, query.token.as_deref())?;
    Ok(sse::verdicts(&state.broadcasts))
}

fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(token) = query_token {
        return Some(token.to_string());
    }

    static X_DEBUG_TOKEN: HeaderName = HeaderName::from_static("x-debug-token");

    headers
        .get(&X_DEBUG_TOKEN)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|raw| raw.strip_prefix("Bearer ").map(|v| v.to_string()))
        })
}

#[cfg(all(test, feature = "debug_http"))]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    const TOKEN: &str = "smoke-token";

    fn make_router(broadcasts: SessionBroadcasts, token: Option<&str>) -> Router {
        build_router(DebugHttpState::new(broadcasts, token.map(str::to_string)))
    }

    async fn response_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = serde_json::from_slice::<Value>(&bytes).expect("JSON body");
        (status, json)
    }

    async fn get_json(router: Router, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        response_json(
            router
                .oneshot(request.body(Body::empty()).expect("request"))
                .await
                .expect("router call"),
        )
        .await
    }

    #[tokio::test]
    async fn health_requires_token_when_configured() {
        let (status, json) =
            get_json(make_router(SessionBroadcasts::new(), Some(TOKEN)), "/health", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "missing or invalid token");
    }

    #[tokio::test]
    async fn health_accepts_bearer_token() {
        let (status, json) = get_json(
            make_router(SessionBroadcasts::new(), Some(TOKEN)),
            "/health",
            Some(TOKEN),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["lifecycle"], "not_started");
    }

    #[tokio::test]
    async fn state_returns_latest_snapshot_without_token() {
        let broadcasts = SessionBroadcasts::new();
        broadcasts.publish_state(&PublishedState {
            clock_ms: 4321,
            progress_pct: 50.0,
            ..PublishedState::default()
        });

        let (status, json) = get_json(make_router(broadcasts, None), "/state", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["clock_ms"], 4321);
        assert_eq!(json["session"]["score"], 0);
    }

    #[tokio::test]
    async fn telemetry_succeeds_with_query_token() {
        let (status, json) = get_json(
            make_router(SessionBroadcasts::new(), Some(TOKEN)),
            &format!("/telemetry?token={TOKEN}"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["recent"].is_array());
    }
}
