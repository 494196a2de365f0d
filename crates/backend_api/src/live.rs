use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use models::TelegraphRequest;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broadcaster::{ConnectionId, Outbound};
use crate::error::ApiError;
use crate::service::KaimemoService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    #[serde(rename = "tempUserID")]
    pub temp_user_id: Option<String>,
}

/// GET /kaimemo/ws?tempUserID=...
pub async fn live_updates(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(owner) = query.temp_user_id.filter(|owner| !owner.trim().is_empty()) else {
        return ApiError::BadRequest("tempUserID is required".to_string()).into_response();
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let service = state.service.clone();
    upgrade.on_upgrade(move |socket| run_connection(socket, service, owner))
}

fn error_frame(err: &ApiError) -> Outbound {
    let (_, message) = err.status_and_message();
    Outbound::unversioned(json!({ "error": message }).to_string())
}

/// Drops snapshots older than one already written to the socket, so a
/// slow fetch cannot overwrite a newer list on the client.
#[derive(Debug, Default)]
struct VersionGate {
    last: Option<u64>,
}

impl VersionGate {
    fn admit(&mut self, frame: &Outbound) -> bool {
        match frame.version {
            None => true,
            Some(version) if self.last.is_some_and(|last| version < last) => false,
            Some(version) => {
                self.last = Some(version);
                true
            }
        }
    }
}

async fn run_connection(socket: WebSocket, service: Arc<KaimemoService>, owner: String) {
    let broadcaster = service.broadcaster().clone();
    let (connection, mut queue) = broadcaster.register(&owner);
    info!(connection, owner = %owner, "Live connection opened");

    // Registered first so no mutation after this fetch goes unseen
    let initial = match service.versioned_snapshot(&owner).await {
        Ok(frame) => frame,
        Err(err) => {
            error!(connection, error = %err, "Failed to load initial snapshot");
            error_frame(&err)
        }
    };
    broadcaster.send_to(connection, initial);

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        let mut gate = VersionGate::default();
        while let Some(frame) = queue.recv().await {
            if !gate.admit(&frame) {
                debug!(connection, "Skipping stale snapshot");
                continue;
            }
            if let Err(err) = sink.send(Message::Text(frame.payload)).await {
                debug!(connection, error = %err, "Socket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_service = service.clone();
    let reader_owner = owner.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    debug!(connection, error = %err, "Socket read failed");
                    break;
                }
            };
            handle_frame(&reader_service, connection, &reader_owner, &text).await;
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    broadcaster.unregister(connection);
    info!(connection, owner = %owner, "Live connection closed");
}

async fn handle_frame(service: &KaimemoService, connection: ConnectionId, owner: &str, text: &str) {
    let request: TelegraphRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            warn!(connection, error = %err, "Skipping undecodable live message");
            return;
        }
    };

    if let Err(err) = service.apply_live_request(owner, request).await {
        warn!(connection, error = %err, "Live request failed");
        service.broadcaster().send_to(connection, error_frame(&err));
    }
}
