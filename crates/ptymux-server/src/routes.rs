use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::Stream;
use futures_util::{SinkExt, StreamExt};
use ptymux_terminal::{PtyRegistry, PtySession};
use ptymux_types::{GroupId, PtyId, PtySummary, SpawnSpec};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::protocol::{EventEncoder, InputRequest, ResizeRequest, SnapshotResponse};

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PtyRegistry>,
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session/:session_id/pty", get(list_ptys).post(create_pty))
        .route(
            "/session/:session_id/pty/:pty_id",
            get(get_pty).delete(kill_pty),
        )
        .route("/session/:session_id/pty/:pty_id/input", post(send_input))
        .route("/session/:session_id/pty/:pty_id/resize", post(resize_pty))
        .route("/session/:session_id/pty/:pty_id/snapshot", get(snapshot))
        .route("/session/:session_id/pty/:pty_id/stream", get(stream_events))
        .route("/session/:session_id/pty/:pty_id/connect", get(connect))
        .with_state(state)
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /session/:session_id/pty - Spawn a new pty. An empty body spawns
/// the default shell.
async fn create_pty(
    State(state): State<AppState>,
    Path(session_id): Path<GroupId>,
    body: Bytes,
) -> Result<(StatusCode, Json<PtySummary>), AppError> {
    let spec: SpawnSpec = if body.iter().all(u8::is_ascii_whitespace) {
        SpawnSpec::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let session = state.registry.create(&session_id, spec).await?;
    Ok((StatusCode::CREATED, Json(session.info())))
}

/// GET /session/:session_id/pty - List the group's ptys
async fn list_ptys(
    State(state): State<AppState>,
    Path(session_id): Path<GroupId>,
) -> Json<Vec<PtySummary>> {
    Json(state.registry.list(&session_id).await)
}

/// GET /session/:session_id/pty/:pty_id
async fn get_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
) -> Result<Json<PtySummary>, AppError> {
    let session = state.registry.get(&session_id, &pty_id).await?;
    Ok(Json(session.info()))
}

/// DELETE /session/:session_id/pty/:pty_id - Kill and remove
async fn kill_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.registry.remove(&session_id, &pty_id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "pty killed",
    })))
}

/// POST .../input
async fn send_input(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
    payload: Result<Json<InputRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(input) = payload?;
    let session = state.registry.get(&session_id, &pty_id).await?;
    session.write(input.data.as_bytes()).await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// POST .../resize
async fn resize_pty(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
    payload: Result<Json<ResizeRequest>, JsonRejection>,
) -> Result<Json<PtySummary>, AppError> {
    let Json(size) = payload?;
    let session = state.registry.get(&session_id, &pty_id).await?;
    session.resize(size.cols, size.rows)?;

    Ok(Json(session.info()))
}

/// GET .../snapshot
async fn snapshot(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let session = state.registry.get(&session_id, &pty_id).await?;
    Ok(Json(session.snapshot().into()))
}

/// GET .../stream - Server-sent events: `snapshot`, then `data` until `exit`
async fn stream_events(
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session = state.registry.get(&session_id, &pty_id).await?;
    let mut reader = session.attach();
    debug!(group = %session_id, pty = %pty_id, reader = reader.id(), "event stream opened");

    let stream = async_stream::stream! {
        let mut encoder = EventEncoder::default();
        while let Some(event) = reader.recv().await {
            let wire = encoder.encode(event);
            match Event::default().event(&wire.kind).json_data(&wire) {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    warn!("failed to encode stream event: {}", e);
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET .../connect - WebSocket carrying the same events; client frames are
/// written to the pty as input
async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((session_id, pty_id)): Path<(GroupId, PtyId)>,
) -> Result<Response, AppError> {
    let session = state.registry.get(&session_id, &pty_id).await?;
    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, session)))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, session: Arc<PtySession>) {
    let mut reader = session.attach();
    info!(pty = %session.id(), reader = reader.id(), "websocket client connected");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Forward stream events to the client
    let send_task = tokio::spawn(async move {
        let mut encoder = EventEncoder::default();
        while let Some(event) = reader.recv().await {
            let Ok(json) = serde_json::to_string(&encoder.encode(event)) else {
                break;
            };
            if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Handle incoming WebSocket messages
    while let Some(Ok(msg)) = ws_stream.next().await {
        let data = match msg {
            WsMessage::Text(text) => text.into_bytes(),
            WsMessage::Binary(bytes) => bytes,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        if let Err(e) = session.write(&data).await {
            debug!(pty = %session.id(), "dropping websocket input: {}", e);
        }
    }

    // Client disconnected; dropping the reader detaches it
    send_task.abort();
    info!(pty = %session.id(), "websocket client disconnected");
}
