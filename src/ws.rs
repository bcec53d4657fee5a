//! WebSocket hub: connection registry, rooms and the per-connection loop
//!
//! Frames in both directions are JSON text objects tagged by `type`. Room
//! messages (the admin debug room, `user_<id>` rooms) are fanned out through
//! each connection's outbound queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::error::ApiError;
use crate::llm::{ChatEvent, ChatOptions};
use crate::models::{DebugLog, User};
use crate::state::AppState;
use crate::validation::Validator;

pub const DEBUG_ROOM: &str = "debug_room";

pub fn user_room(user_id: Uuid) -> String {
    format!("user_{}", user_id)
}

/// Messages accepted from clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    JoinDebug,
    LeaveDebug,
    Ping,
    #[serde(rename_all = "camelCase")]
    Chat {
        conversation_id: Uuid,
        content: String,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        system_prompt: Option<String>,
    },
}

/// Component status pushed to the debug room
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub component: String,
    /// healthy, warning or critical
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Messages sent to clients, besides chat events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: Uuid },
    Joined { room: String },
    Left { room: String },
    Pong { timestamp: i64 },
    NewLog { data: DebugLog },
    SystemStatus { data: SystemStatus },
    Error { error: String },
}

impl ServerMessage {
    fn to_frame(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","error":"Failed to encode message"}"#.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub connected_for_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub authenticated_connections: usize,
    pub average_connection_time_ms: f64,
    pub connections: Vec<ConnectionInfo>,
}

struct Client {
    user_id: Option<Uuid>,
    is_admin: bool,
    rooms: HashSet<String>,
    joined_at: DateTime<Utc>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Registry of live connections
#[derive(Clone)]
pub struct WsHub {
    clients: Arc<RwLock<HashMap<Uuid, Client>>>,
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WsHub {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection; frames for it arrive on `outbound`
    pub async fn register(&self, outbound: mpsc::UnboundedSender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.write().await.insert(
            id,
            Client {
                user_id: None,
                is_admin: false,
                rooms: HashSet::new(),
                joined_at: Utc::now(),
                outbound,
            },
        );
        id
    }

    pub async fn unregister(&self, id: Uuid) {
        self.clients.write().await.remove(&id);
    }

    /// Attach a user to a connection and join its personal room
    pub async fn authenticate(&self, id: Uuid, user: &User) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.user_id = Some(user.id);
            client.is_admin = user.role.is_admin();
            client.rooms.insert(user_room(user.id));
        }
    }

    /// Join the debug room; only admin connections may
    pub async fn join_debug(&self, id: Uuid) -> Result<(), ApiError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(&id)
            .ok_or_else(|| ApiError::not_found("Connection not found"))?;
        if client.user_id.is_none() {
            return Err(ApiError::unauthorized("Authentication required"));
        }
        if !client.is_admin {
            return Err(ApiError::forbidden("Insufficient permissions"));
        }
        client.rooms.insert(DEBUG_ROOM.to_string());
        Ok(())
    }

    pub async fn leave(&self, id: Uuid, room: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.rooms.remove(room);
        }
    }

    /// Queue a frame for every member of a room; returns the number reached
    pub async fn send_to_room(&self, room: &str, frame: &str) -> usize {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|c| c.rooms.contains(room))
            .filter(|c| c.outbound.send(frame.to_string()).is_ok())
            .count()
    }

    pub async fn broadcast_log_entry(&self, log: &DebugLog) {
        let frame = ServerMessage::NewLog { data: log.clone() }.to_frame();
        self.send_to_room(DEBUG_ROOM, &frame).await;
    }

    pub async fn broadcast_system_status(&self, status: SystemStatus) {
        let frame = ServerMessage::SystemStatus { data: status }.to_frame();
        self.send_to_room(DEBUG_ROOM, &frame).await;
    }

    pub async fn stats(&self) -> ConnectionStats {
        let now = Utc::now();
        let clients = self.clients.read().await;
        let connections: Vec<ConnectionInfo> = clients
            .iter()
            .map(|(id, c)| ConnectionInfo {
                id: *id,
                user_id: c.user_id,
                connected_for_ms: (now - c.joined_at).num_milliseconds(),
            })
            .collect();
        let average_connection_time_ms = if connections.is_empty() {
            0.0
        } else {
            connections.iter().map(|c| c.connected_for_ms as f64).sum::<f64>()
                / connections.len() as f64
        };
        ConnectionStats {
            total_connections: connections.len(),
            authenticated_connections: connections.iter().filter(|c| c.user_id.is_some()).count(),
            average_connection_time_ms,
            connections,
        }
    }
}

/// Drive one upgraded connection until either side closes it
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut incoming) = socket.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<String>();
    let hub = state.hub.clone();
    let id = hub.register(outbound.clone()).await;
    let mut user: Option<User> = None;

    info!(connection_id = %id, "WebSocket client connected");

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(message)) => {
                    if message.is_close() {
                        break;
                    }
                    if let Ok(text) = message.to_str() {
                        handle_text(text, id, &mut user, &state, &outbound).await;
                    }
                }
                Some(Err(e)) => {
                    warn!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            Some(frame) = queue.recv() => {
                if sink.send(Message::text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unregister(id).await;
    info!(connection_id = %id, "WebSocket client disconnected");
}

async fn handle_text(
    text: &str,
    id: Uuid,
    user: &mut Option<User>,
    state: &AppState,
    outbound: &mpsc::UnboundedSender<String>,
) {
    let reply = |message: ServerMessage| {
        let _ = outbound.send(message.to_frame());
    };

    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "Unrecognised WebSocket message");
            reply(ServerMessage::Error {
                error: "Unrecognised message".to_string(),
            });
            return;
        }
    };

    match message {
        ClientMessage::Authenticate { token } => match authenticate(state, &token).await {
            Ok(authenticated) => {
                state.hub.authenticate(id, &authenticated).await;
                info!(connection_id = %id, user_id = %authenticated.id, "WebSocket client authenticated");
                reply(ServerMessage::Authenticated {
                    user_id: authenticated.id,
                });
                *user = Some(authenticated);
            }
            Err(e) => reply(ServerMessage::Error {
                error: e.to_string(),
            }),
        },
        ClientMessage::JoinDebug => match state.hub.join_debug(id).await {
            Ok(()) => {
                info!(connection_id = %id, "Client joined debug room");
                reply(ServerMessage::Joined {
                    room: DEBUG_ROOM.to_string(),
                });
            }
            Err(e) => reply(ServerMessage::Error {
                error: e.to_string(),
            }),
        },
        ClientMessage::LeaveDebug => {
            state.hub.leave(id, DEBUG_ROOM).await;
            info!(connection_id = %id, "Client left debug room");
            reply(ServerMessage::Left {
                room: DEBUG_ROOM.to_string(),
            });
        }
        ClientMessage::Ping => reply(ServerMessage::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }),
        ClientMessage::Chat {
            conversation_id,
            content,
            temperature,
            max_tokens,
            system_prompt,
        } => {
            let Some(current) = user.as_ref() else {
                reply(ServerMessage::Error {
                    error: "Authentication required".to_string(),
                });
                return;
            };
            if let Err(e) = state.limits.chat.check(&current.id.to_string()) {
                reply(ServerMessage::Error {
                    error: e.to_string(),
                });
                return;
            }

            let mut v = Validator::new();
            v.min_len("content", Some(&content), 1)
                .max_len("content", Some(&content), 10_000)
                .range("temperature", temperature, 0.0, 2.0)
                .range("maxTokens", max_tokens, 1, 8192)
                .max_len("systemPrompt", system_prompt.as_deref(), 2000);
            if let Err(e) = v.finish() {
                reply(ServerMessage::Error {
                    error: e.to_string(),
                });
                return;
            }

            let options = ChatOptions {
                temperature,
                max_tokens,
                system_prompt,
            };
            // Runs beside the read loop so pings and room traffic keep flowing
            tokio::spawn(relay_chat(
                state.clone(),
                current.id,
                conversation_id,
                content,
                options,
                outbound.clone(),
            ));
        }
    }
}

async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = state.auth.tokens().verify_access(token)?;
    state.auth.active_user(claims.sub).await
}

async fn relay_chat(
    state: AppState,
    user_id: Uuid,
    conversation_id: Uuid,
    content: String,
    options: ChatOptions,
    outbound: mpsc::UnboundedSender<String>,
) {
    let encode = |event: &ChatEvent| {
        serde_json::to_string(event)
            .unwrap_or_else(|_| r#"{"type":"error","error":"Failed to encode event"}"#.to_string())
    };

    let mut events = match state
        .chat
        .stream_message(conversation_id, user_id, &content, options)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            let _ = outbound.send(encode(&ChatEvent::Error {
                error: e.to_string(),
            }));
            return;
        }
    };

    while let Some(event) = events.next().await {
        // The connection is gone; dropping the stream abandons the request
        if outbound.send(encode(&event)).is_err() {
            break;
        }
    }
}
