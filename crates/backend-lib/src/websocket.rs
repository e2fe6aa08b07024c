// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! Connection lifecycle.
//!
//! A `ConnectionHandler` is created per connection and turns its client events into
//! registry, store, interpreter and router calls:
//! - connect: nothing happens until the client sends `join`
//! - join: bind the identity, broadcast the roster, replay history to this
//!   connection, announce the arrival to everyone else
//! - chat: commands go to the interpreter, plain text is persisted then fanned out
//! - disconnect: unbind, broadcast the roster, announce the departure
//!
//! The handler is transport-agnostic; [`crate::ws_router`] pumps WebSocket frames
//! through it.

use std::sync::Arc;

use aura_common::{ChatEvent, ClientEvent, ConnectionId, ProfilePatch, ServerEvent};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::commands::COMMAND_PREFIX;
use crate::error::AppError;
use crate::metrics::CHAT_MESSAGES;
use crate::storage::RecordStore;
use crate::validation::{validate_message, validate_profile};
use crate::AppState;

/// Per-connection controller
pub struct ConnectionHandler<S: RecordStore> {
    state: Arc<AppState<S>>,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl<S: RecordStore> ConnectionHandler<S> {
    /// `outbound` is this connection's own queue; replies always go through it
    pub fn new(state: Arc<AppState<S>>, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            state,
            connection_id: Uuid::new_v4(),
            outbound,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Handle one raw text frame
    pub async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "malformed client event");
                self.reply(ServerEvent::Error {
                    code: "MALFORMED".to_string(),
                    message: format!("Malformed message: {e}"),
                })
                .await;
            },
        }
    }

    pub async fn handle_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::Join { username } => self.join(&username).await,
            ClientEvent::ChatMessage { text } => self.chat(&text).await,
            ClientEvent::UpdateProfile(patch) => self.update_profile(patch).await,
        }
    }

    async fn join(&self, username: &str) {
        let registry = &self.state.registry;
        let registration = match registry
            .register(self.connection_id, username, self.outbound.clone())
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                self.reply_error(&e).await;
                return;
            },
        };

        let router = &self.state.router;
        router.to_all(ServerEvent::UserListUpdate {
            roster: registry.roster_snapshot(),
        });

        match self.state.store.load_history().await {
            Ok(history) => {
                for event in history {
                    self.reply(ServerEvent::ChatMessage(event)).await;
                }
            },
            Err(e) => warn!(connection_id = %self.connection_id, error = %e, "history replay failed"),
        }
        self.reply(ServerEvent::ForceUpdate(registration.record)).await;

        if registration.first_online {
            router.to_all_except(
                self.connection_id,
                ServerEvent::SystemMessage {
                    text: format!("{} joined", registration.session.username),
                },
            );
        }
    }

    async fn chat(&self, text: &str) {
        let registry = &self.state.registry;
        let Some(session) = registry.session(self.connection_id) else {
            self.reply_error(&AppError::NotJoined).await;
            return;
        };
        registry.touch(self.connection_id);

        let body = match validate_message(text, self.state.settings.max_message_len) {
            Ok(Some(body)) => body,
            Ok(None) => return,
            Err(e) => {
                self.reply_error(&e.into()).await;
                return;
            },
        };

        if body.starts_with(COMMAND_PREFIX) {
            let result = self.state.commands.execute(&session, body).await;
            self.reply(ServerEvent::CommandResponse(result)).await;
            return;
        }

        let event = ChatEvent::from_user(&session.username, session.role, body.to_string());
        if let Err(e) = self.state.store.append_history(event.clone()).await {
            error!(username = %session.username, error = %e, "chat message not persisted");
            self.reply_error(&e).await;
            return;
        }

        counter!(CHAT_MESSAGES).increment(1);
        self.state.router.to_all(ServerEvent::ChatMessage(event));
    }

    async fn update_profile(&self, patch: ProfilePatch) {
        let Some(session) = self.state.registry.session(self.connection_id) else {
            self.reply_error(&AppError::NotJoined).await;
            return;
        };

        if let Err(e) = validate_profile(&patch) {
            self.reply_error(&e.into()).await;
            return;
        }

        match self.state.store.put_user(&session.key, patch.into()).await {
            Ok(record) => {
                self.state
                    .router
                    .to_username(&session.key, ServerEvent::ForceUpdate(record));
            },
            Err(e) => self.reply_error(&e).await,
        }
    }

    /// Tear down this connection's binding, if it still has one
    pub async fn disconnect(&self) {
        let Some(departure) = self.state.registry.unregister(self.connection_id) else {
            return;
        };

        let router = &self.state.router;
        router.to_all(ServerEvent::UserListUpdate {
            roster: self.state.registry.roster_snapshot(),
        });
        if departure.last_offline {
            router.to_all(ServerEvent::SystemMessage {
                text: format!("{} left", departure.session.username),
            });
        }
    }

    async fn reply(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            debug!(connection_id = %self.connection_id, "reply dropped, connection closing");
        }
    }

    async fn reply_error(&self, err: &AppError) {
        self.reply(ServerEvent::Error {
            code: err.error_code().to_string(),
            message: err.sanitized_message(),
        })
        .await;
    }
}
