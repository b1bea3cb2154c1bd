//! REST API server for the loan assistant
//!
//! Exposes session management, the chat turn and knowledge-base queries
//! over HTTP, plus a WebSocket that streams replies word by word.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::agent::{SessionManager, TurnReply, GREETING};
use crate::error::AssistantError;
use crate::models::{LoanApplication, SessionId};
use crate::retrieval::RetrievalConnector;

const MAX_RAG_TOP_K: usize = 10;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: String,
}

/// Client frame on the streaming socket
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RagQueryRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn status_for(err: &AssistantError) -> StatusCode {
    match err {
        AssistantError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        AssistantError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AssistantError::RouterError(_)
        | AssistantError::RetrievalError(_)
        | AssistantError::HttpError(_)
        | AssistantError::ChainLimitExceeded(_) => StatusCode::BAD_GATEWAY,
        e if e.is_recoverable() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: AssistantError) -> ApiResult {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(code = err.code(), error = %err, "Request failed");
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// Server frames on the streaming socket. A reply is sent as one `message`
/// frame per word followed by an `end` frame carrying the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Message {
        content: String,
        session_id: SessionId,
    },
    End {
        content: String,
        session_id: SessionId,
        loan_application: LoanApplication,
    },
    Error {
        content: String,
        session_id: SessionId,
    },
}

/// Split a turn reply into streaming frames
pub fn reply_frames(turn: &TurnReply) -> Vec<StreamFrame> {
    let words: Vec<&str> = turn.reply.split_whitespace().collect();
    let Some((last, leading)) = words.split_last() else {
        return vec![StreamFrame::End {
            content: String::new(),
            session_id: turn.session_id.clone(),
            loan_application: turn.application.clone(),
        }];
    };

    let mut frames: Vec<StreamFrame> = leading
        .iter()
        .map(|word| StreamFrame::Message {
            content: format!("{} ", word),
            session_id: turn.session_id.clone(),
        })
        .collect();
    frames.push(StreamFrame::End {
        content: last.to_string(),
        session_id: turn.session_id.clone(),
        loan_application: turn.application.clone(),
    });
    frames
}

/// =============================
/// API State
/// =============================

/// Request counters for `/metrics`
pub struct ApiMetrics {
    started_at: Instant,
    total_messages: AtomicU64,
    total_response_micros: AtomicU64,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_messages: AtomicU64::new(0),
            total_response_micros: AtomicU64::new(0),
        }
    }

    pub fn record_message(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        self.total_response_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_ms(&self) -> f64 {
        match self.total_messages() {
            0 => 0.0,
            n => self.total_response_micros.load(Ordering::Relaxed) as f64 / n as f64 / 1_000.0,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
    pub retrieval: Arc<dyn RetrievalConnector>,
    pub rag_top_k: usize,
    pub metrics: Arc<ApiMetrics>,
}

impl ApiState {
    pub fn new(
        sessions: Arc<SessionManager>,
        retrieval: Arc<dyn RetrievalConnector>,
        rag_top_k: usize,
    ) -> Self {
        Self {
            sessions,
            retrieval,
            rag_top_k,
            metrics: Arc::new(ApiMetrics::new()),
        }
    }

    /// Run a turn and count it towards the response-time metrics
    async fn turn(&self, session_id: &SessionId, message: &str) -> crate::Result<TurnReply> {
        let started = Instant::now();
        let result = self.sessions.handle_message(session_id, message).await;
        if result.is_ok() {
            self.metrics.record_message(started.elapsed());
        }
        result
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let active = state
        .sessions
        .active_sessions()
        .await
        .map(|ids| ids.len())
        .unwrap_or(0);
    Json(serde_json::json!({
        "status": "healthy",
        "router": state.sessions.controller().router_name(),
        "active_sessions": active,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn ready(State(state): State<ApiState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.sessions.active_sessions().await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "router": state.sessions.controller().router_name(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Session store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "not_ready", "error": e.to_string() })),
            )
        }
    }
}

async fn metrics(State(state): State<ApiState>) -> ApiResult {
    let active = match state.sessions.active_sessions().await {
        Ok(ids) => ids.len(),
        Err(e) => return failure(e),
    };
    let turns = match state.sessions.controller().audit_log().totals().await {
        Ok(totals) => totals,
        Err(e) => return failure(e),
    };
    ok(serde_json::json!({
        "active_sessions": active,
        "total_messages": state.metrics.total_messages(),
        "avg_response_time_ms": state.metrics.avg_response_time_ms(),
        "turns_committed": turns.committed,
        "turns_rolled_back": turns.rolled_back,
        "uptime_seconds": state.metrics.uptime().as_secs_f64(),
    }))
}

/// =============================
/// Session Endpoints
/// =============================

async fn create_session(State(state): State<ApiState>) -> ApiResult {
    match state.sessions.create_session().await {
        Ok(created) => ok(serde_json::json!({
            "session_id": created.session_id,
            "message": created.reply,
            "loan_application": created.application,
        })),
        Err(e) => failure(e),
    }
}

async fn list_sessions(State(state): State<ApiState>) -> ApiResult {
    match state.sessions.active_sessions().await {
        Ok(ids) => ok(serde_json::json!({ "sessions": ids })),
        Err(e) => failure(e),
    }
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let session_id = SessionId::new(id);
    match state.sessions.snapshot(&session_id).await {
        Ok(snapshot) => ok(serde_json::json!({
            "session_id": session_id,
            "messages": snapshot.messages(),
            "loan_application": snapshot.application,
        })),
        Err(e) => failure(e),
    }
}

async fn delete_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let session_id = SessionId::new(id);
    match state.sessions.delete_session(&session_id).await {
        Ok(()) => ok(serde_json::json!({ "session_id": session_id, "deleted": true })),
        Err(e) => failure(e),
    }
}

async fn session_turns(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let session_id = SessionId::new(id);
    if let Err(e) = state.sessions.snapshot(&session_id).await {
        return failure(e);
    }
    match state.sessions.turn_history(&session_id).await {
        Ok(turns) => ok(serde_json::json!({ "session_id": session_id, "turns": turns })),
        Err(e) => failure(e),
    }
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    let session_id = req
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map(SessionId::new)
        .unwrap_or_else(SessionId::generate);

    info!(session_id = %session_id, "Received chat message");

    match state.turn(&session_id, &req.message).await {
        Ok(turn) => ok(serde_json::json!({
            "session_id": turn.session_id,
            "message": turn.reply,
            "loan_application": turn.application,
        })),
        Err(e) => failure(e),
    }
}

/// =============================
/// Streaming Endpoint
/// =============================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    let session_id = SessionId::new(id);
    ws.on_upgrade(move |socket| stream_session(socket, state, session_id))
}

async fn send_frame(socket: &mut WebSocket, frame: &StreamFrame) -> bool {
    let Ok(text) = serde_json::to_string(frame) else {
        return false;
    };
    socket.send(WsMessage::Text(text)).await.is_ok()
}

async fn stream_session(mut socket: WebSocket, state: ApiState, session_id: SessionId) {
    info!(session_id = %session_id, "WebSocket connected");

    // New sessions are only stored once their first turn commits
    if state.sessions.snapshot(&session_id).await.is_err() {
        let greeting = StreamFrame::Message {
            content: GREETING.to_string(),
            session_id: session_id.clone(),
        };
        if !send_frame(&mut socket, &greeting).await {
            return;
        }
    }

    while let Some(incoming) = socket.recv().await {
        let text = match incoming {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "WebSocket receive failed");
                break;
            }
        };

        let frames = match serde_json::from_str::<StreamRequest>(&text) {
            Ok(req) if req.message.trim().is_empty() => continue,
            Ok(req) => match state.turn(&session_id, &req.message).await {
                Ok(turn) => reply_frames(&turn),
                Err(e) => {
                    warn!(session_id = %session_id, code = e.code(), "Streamed turn failed");
                    vec![StreamFrame::Error {
                        content: e.to_string(),
                        session_id: session_id.clone(),
                    }]
                }
            },
            Err(e) => vec![StreamFrame::Error {
                content: format!("invalid frame: {}", e),
                session_id: session_id.clone(),
            }],
        };

        for frame in &frames {
            if !send_frame(&mut socket, frame).await {
                return;
            }
        }
    }

    info!(session_id = %session_id, "WebSocket disconnected");
}

/// =============================
/// Knowledge Base Endpoint
/// =============================

async fn rag_query(State(state): State<ApiState>, Json(req): Json<RagQueryRequest>) -> ApiResult {
    let query = req.query.trim();
    if query.is_empty() {
        return failure(AssistantError::InvalidField {
            field: "query",
            reason: "must not be empty".to_string(),
        });
    }
    let top_k = req.top_k.unwrap_or(state.rag_top_k);
    if !(1..=MAX_RAG_TOP_K).contains(&top_k) {
        return failure(AssistantError::InvalidField {
            field: "top_k",
            reason: format!("must be between 1 and {}", MAX_RAG_TOP_K),
        });
    }

    match state.retrieval.search(query, top_k).await {
        Ok(results) => ok(serde_json::json!({ "query": query, "results": results })),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/api/v1/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/v1/sessions/:id/turns", get(session_turns))
        .route("/api/v1/chat", post(chat_handler))
        .route("/api/v1/rag/query", post(rag_query))
        .route("/api/v1/ws/:session_id", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    host: &str,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;

    info!("API Server listening on http://{}:{}", host, port);

    axum::serve(listener, router).await?;

    Ok(())
}
