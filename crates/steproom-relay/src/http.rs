//! HTTP surface: registry endpoints, room status, and the websocket
//! upgrade that hands a connection to its room actor.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use steproom_core::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::manager::RoomManager;
use crate::room::RoomHandle;

const MAX_ROOM_ID_LEN: usize = 64;

#[derive(Clone)]
pub struct AppState {
    manager: Arc<RoomManager>,
    cors_origin: Option<HeaderValue>,
}

impl AppState {
    pub fn new(manager: Arc<RoomManager>, cors_origin: Option<String>) -> Self {
        let cors_origin = cors_origin.and_then(|origin| {
            HeaderValue::from_str(&origin)
                .map_err(|_| warn!(origin = %origin, "ignoring unusable cors origin"))
                .ok()
        });
        Self {
            manager,
            cors_origin,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rooms", get(list_rooms).post(register_room))
        .route("/:room_id", get(room_status))
        .route("/:room_id/ws", get(room_ws))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRoomRequest {
    pub room_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummaryBody {
    pub room_id: String,
    pub connection_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomsListResponse {
    pub rooms_list: Vec<RoomSummaryBody>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatusResponse {
    pub room_id: String,
    pub connection_count: usize,
    pub has_data: bool,
}

/// Error envelope: every failing endpoint answers `{"error": "..."}`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        warn!(error = %err, "request failed");
        Self::internal()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Room ids come straight from URL path segments; keep them to a
/// filename-safe alphabet since each one names a snapshot file.
fn validate_room_id(room_id: &str) -> Result<(), ApiError> {
    let ok = !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ApiError::bad_request("invalid room id"))
    }
}

async fn register_room(
    State(state): State<AppState>,
    Json(request): Json<RegisterRoomRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_room_id(&request.room_id)?;
    state
        .manager
        .registry()
        .register(&request.room_id)
        .await
        .map_err(RelayError::from)?;
    Ok(Json(json!({})))
}

async fn list_rooms(State(state): State<AppState>) -> Json<RoomsListResponse> {
    let rooms_list = state
        .manager
        .registry()
        .list(state.manager.as_ref())
        .await
        .into_iter()
        .map(|summary| RoomSummaryBody {
            room_id: summary.room_id,
            connection_count: summary.connections,
        })
        .collect();
    Json(RoomsListResponse { rooms_list })
}

async fn room_status(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RoomStatusResponse>, ApiError> {
    validate_room_id(&room_id)?;
    let status = state.manager.status(&room_id).await?;
    Ok(Json(RoomStatusResponse {
        room_id,
        connection_count: status.connections,
        has_data: status.has_data,
    }))
}

async fn room_ws(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    validate_room_id(&room_id)?;
    let room = state.manager.room(&room_id).await;
    Ok(ws.on_upgrade(move |socket| client_session(socket, room_id, room)))
}

/// Pumps one websocket connection: room messages out, op batches in.
/// The join reply carries the connection id used for echo suppression;
/// the snapshot handshake is already queued by the time join resolves.
async fn client_session(socket: WebSocket, room_id: String, room: RoomHandle) {
    let (tx, mut inbox) = mpsc::unbounded_channel::<ServerMessage>();
    let conn = match room.join(tx).await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(room = %room_id, error = %err, "join failed, dropping socket");
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            message = inbox.recv() => match message {
                Some(message) => match message.encode() {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(room = %room_id, error = %err, "failed to encode frame"),
                },
                // Room actor is gone.
                None => break,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ClientMessage::decode(&text) {
                    Ok(ClientMessage::Ops { ops }) => room.ops(conn, ops),
                    Err(err) => {
                        warn!(room = %room_id, error = %err, "dropping malformed client frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(room = %room_id, error = %err, "socket errored");
                    break;
                }
            },
        }
    }
    room.leave(conn);
    debug!(room = %room_id, conn, "socket closed");
}

/// Minimal CORS for browser lobbies: mirror the configured origin on
/// every response and short-circuit preflights.
async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(origin) = state.cors_origin.clone() else {
        return next.run(request).await;
    };
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_validation_rejects_path_tricks() {
        assert!(validate_room_id("echo-park").is_ok());
        assert!(validate_room_id("Attic_2").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("../etc").is_err());
        assert!(validate_room_id("a b").is_err());
        assert!(validate_room_id(&"x".repeat(65)).is_err());
    }
}
