//! WebSocket channel for live round events
//!
//! A socket authenticates on upgrade, receives a sync snapshot and is attached
//! to the live round. From then on it follows the lobby: round-state events
//! move the attachment to whichever round is on offer, and only envelopes
//! addressed to this player, to the attached round or to everyone are sent.

use super::{auth::credentials_from_headers, errors::ApiError, handlers::AppState, middleware::RequestId};
use crate::common::types::{Player, PlayerId, RoundId};
use crate::games::engine::SyncState;
use crate::games::events::{EventBus, GameEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    Extension,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Browsers cannot set headers on an upgrade, so credentials may come as query parameters
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub player_id: Option<PlayerId>,
    pub token: Option<String>,
}

/// Messages that are not round events
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsReply {
    Sync(SyncState),
    Error { message: String },
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let credentials = match (query.player_id, query.token) {
        (Some(player_id), Some(token)) => Some((player_id, token)),
        _ => credentials_from_headers(&headers),
    };
    let Some((player_id, token)) = credentials else {
        return Err(ApiError::unauthorized(request_id.0, "missing player credentials"));
    };
    let player = state
        .engine
        .store()
        .authenticate(player_id, &token)
        .map_err(|e| ApiError::from_bingo(request_id.0.clone(), e))?;

    Ok(ws.on_upgrade(move |socket| handle_connection(state, socket, player)))
}

/// Which round a socket currently listens to
#[derive(Debug)]
struct Attachment {
    player_id: PlayerId,
    round_id: Option<RoundId>,
}

impl Attachment {
    fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            round_id: None,
        }
    }

    fn attach(&mut self, events: &EventBus, round_id: Option<RoundId>) {
        if self.round_id == round_id {
            return;
        }
        if let Some(previous) = self.round_id.take() {
            events.detach(previous, self.player_id);
        }
        if let Some(next) = round_id {
            events.attach(next, self.player_id);
        }
        self.round_id = round_id;
    }

    /// Move along with lobby changes
    fn follow(&mut self, events: &EventBus, event: &GameEvent) {
        match event {
            GameEvent::RoundState { round } => {
                let live = round.as_ref().filter(|view| view.status.is_live()).map(|view| view.round_id);
                self.attach(events, live);
            }
            GameEvent::RoundEnded { round_id, .. } if self.round_id == Some(*round_id) => {
                self.attach(events, None);
            }
            _ => {}
        }
    }

    fn release(&mut self, events: &EventBus) {
        self.attach(events, None);
    }
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket, player: Player) {
    let events = state.events().clone();
    let mut rx = events.subscribe();
    let (mut sender, mut receiver) = socket.split();
    let mut attachment = Attachment::new(player.id);

    state.metrics.connected_sockets.inc();
    info!(player_id = player.id, "🔌 WebSocket client connected");

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.tick().await;

    if send_sync(&state, &mut sender, &mut attachment, player.id).await.is_ok() {
        loop {
            tokio::select! {
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        debug!(player_id = player.id, "client message: {}", text);
                        if text.trim() == "sync" && send_sync(&state, &mut sender, &mut attachment, player.id).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(player_id = player.id, "client requested close");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(player_id = player.id, "WebSocket error: {}", e);
                        break;
                    }
                },
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        attachment.follow(&events, &envelope.event);
                        if !envelope.is_for(player.id, attachment.round_id) {
                            continue;
                        }
                        if send_json(&mut sender, &envelope.event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(player_id = player.id, skipped, "socket lagged, resyncing");
                        if send_sync(&state, &mut sender, &mut attachment, player.id).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    let beat = GameEvent::Heartbeat { timestamp: Utc::now().timestamp() };
                    if send_json(&mut sender, &beat).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    attachment.release(&events);
    state.metrics.connected_sockets.dec();
    info!(player_id = player.id, "🔌 WebSocket client disconnected");
}

type WsSender = futures_util::stream::SplitSink<WebSocket, Message>;

async fn send_sync(
    state: &AppState,
    sender: &mut WsSender,
    attachment: &mut Attachment,
    player_id: PlayerId,
) -> Result<(), axum::Error> {
    match state.engine.sync(player_id).await {
        Ok(snapshot) => {
            attachment.attach(state.events(), snapshot.round.as_ref().map(|view| view.round_id));
            send_json(sender, &WsReply::Sync(snapshot)).await
        }
        Err(e) => {
            warn!(player_id, error = %e, "sync failed");
            send_json(sender, &WsReply::Error { message: e.to_string() }).await
        }
    }
}

async fn send_json<T: Serialize>(sender: &mut WsSender, payload: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(payload) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(e) => {
            warn!("failed to serialize event: {}", e);
            Ok(())
        }
    }
}
