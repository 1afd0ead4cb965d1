use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::Method,
    routing::{get, put},
    Json, Router,
};
use carelay_shared::{ChatMessage, UserId};
use carelay_store::{MessageStore, PageRequest};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::router::MessageRouter;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub router: MessageRouter,
    pub store: Arc<dyn MessageStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat/messages/:user_a/:user_b", get(conversation_history))
        .route("/api/chat/messages/read/:user_a/:user_b", put(mark_conversation_read))
        .route("/api/chat/presence/:user_id", get(presence_status))
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    node: String,
    sessions: usize,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    /// Only return messages older than this cursor.
    before: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    success: bool,
    messages: Vec<ChatMessage>,
    next_cursor: Option<i64>,
}

#[derive(Serialize)]
struct MarkReadResponse {
    success: bool,
    updated: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    user_id: UserId,
    online: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        node: state.config.node_id.clone(),
        sessions: state.router.sessions().len().await,
    })
}

async fn conversation_history(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(String, String)>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ServerError> {
    let Query(query) = query.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user_a = UserId::parse(user_a)?;
    let user_b = UserId::parse(user_b)?;

    let page = state
        .store
        .list_conversation(&user_a, &user_b, PageRequest::new(query.limit, query.before))
        .await?;

    debug!(
        user_a = %user_a,
        user_b = %user_b,
        count = page.messages.len(),
        "Served conversation history"
    );

    Ok(Json(HistoryResponse {
        success: true,
        messages: page.messages,
        next_cursor: page.next_cursor,
    }))
}

/// Mark every message `user_b` sent to `user_a` as read.
async fn mark_conversation_read(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(String, String)>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let reader = UserId::parse(user_a)?;
    let other = UserId::parse(user_b)?;

    let updated = state.store.mark_read(&reader, &other, &reader).await?;
    if updated > 0 {
        info!(reader = %reader, other = %other, updated, "Messages marked read");
    }

    Ok(Json(MarkReadResponse {
        success: true,
        updated,
    }))
}

async fn presence_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, ServerError> {
    let user_id = UserId::parse(user_id)?;
    let online = state.router.is_online(&user_id).await;
    Ok(Json(PresenceResponse { user_id, online }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{uid, Harness};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        build_router(AppState {
            router: h.router.clone(),
            store: h.store.clone(),
            config: Arc::new(ServerConfig::default()),
        })
    }

    async fn call(app: Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = Harness::new();
        let (status, body) = call(app(&h), Method::GET, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn history_is_ascending_and_pages_backwards() {
        let h = Harness::new();
        for body in ["one", "two", "three"] {
            h.store.append(&uid("u1"), &uid("u2"), body).await.unwrap();
        }

        let (status, body) = call(
            app(&h),
            Method::GET,
            "/api/chat/messages/u2/u1?limit=2",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let bodies: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, ["two", "three"]);

        let cursor = body["nextCursor"].as_i64().unwrap();
        let (_, older) = call(
            app(&h),
            Method::GET,
            &format!("/api/chat/messages/u1/u2?limit=2&before={cursor}"),
        )
        .await;
        assert_eq!(older["messages"].as_array().unwrap().len(), 1);
        assert_eq!(older["messages"][0]["body"], "one");
        assert!(older["nextCursor"].is_null());
    }

    #[tokio::test]
    async fn mark_read_only_touches_messages_to_reader() {
        let h = Harness::new();
        h.store.append(&uid("u1"), &uid("u2"), "to u2").await.unwrap();
        h.store.append(&uid("u2"), &uid("u1"), "to u1").await.unwrap();

        let (status, body) = call(app(&h), Method::PUT, "/api/chat/messages/read/u2/u1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 1);

        let (_, body) = call(app(&h), Method::PUT, "/api/chat/messages/read/u2/u1").await;
        assert_eq!(body["updated"], 0);

        let page = h
            .store
            .list_conversation(&uid("u1"), &uid("u2"), PageRequest::default())
            .await
            .unwrap();
        let read: Vec<(&str, bool)> = page
            .messages
            .iter()
            .map(|m| (m.body.as_str(), m.read))
            .collect();
        assert_eq!(read, [("to u2", true), ("to u1", false)]);
    }

    #[tokio::test]
    async fn presence_reflects_bindings() {
        let h = Harness::new();
        let (handle, _rx) = h.connect().await;
        h.router.bind_session(&uid("u1"), &handle).await.unwrap();

        let (_, body) = call(app(&h), Method::GET, "/api/chat/presence/u1").await;
        assert_eq!(body["userId"], "u1");
        assert_eq!(body["online"], true);

        let (_, body) = call(app(&h), Method::GET, "/api/chat/presence/u9").await;
        assert_eq!(body["online"], false);
    }

    #[tokio::test]
    async fn bad_input_is_a_json_400() {
        let h = Harness::new();
        let (status, body) = call(app(&h), Method::GET, "/api/chat/messages/a_b/c").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Invalid user id"));

        let (status, body) = call(
            app(&h),
            Method::GET,
            "/api/chat/messages/u1/u2?limit=lots",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn store_outage_is_a_json_503() {
        let h = Harness::with_failing_store();
        let (status, body) = call(app(&h), Method::GET, "/api/chat/messages/u1/u2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Message store unavailable");
    }
}
