//! Broadcast router: best-effort fan-out of server events to bound connections.
//!
//! Delivery is at most once per live connection. A connection whose queue is
//! full or already closed misses the event; the rest still receive it.
use std::sync::Arc;

use aura_common::{ConnectionId, ServerEvent};
use metrics::counter;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::BROADCAST_DROPPED;
use crate::registry::{Session, SessionRegistry};
use crate::storage::RecordStore;

pub struct BroadcastRouter<S: RecordStore> {
    registry: Arc<SessionRegistry<S>>,
}

impl<S: RecordStore> Clone for BroadcastRouter<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: RecordStore> BroadcastRouter<S> {
    pub fn new(registry: Arc<SessionRegistry<S>>) -> Self {
        Self { registry }
    }

    /// Send to every bound connection. Returns how many accepted the event.
    pub fn to_all(&self, event: ServerEvent) -> usize {
        self.fan_out(self.registry.sessions(), &event)
    }

    /// Send to every bound connection except `skip`
    pub fn to_all_except(&self, skip: ConnectionId, event: ServerEvent) -> usize {
        let targets = self
            .registry
            .sessions()
            .into_iter()
            .filter(|session| session.connection_id != skip)
            .collect();
        self.fan_out(targets, &event)
    }

    /// Send to a single connection
    pub fn to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        match self.registry.session(connection_id) {
            Some(session) => deliver(&session, event),
            None => {
                debug!(%connection_id, "connection gone, event dropped");
                false
            },
        }
    }

    /// Send to every connection bound to `username`
    pub fn to_username(&self, username: &str, event: ServerEvent) -> usize {
        let targets = self
            .registry
            .find_connections(username)
            .into_iter()
            .filter_map(|id| self.registry.session(id))
            .collect();
        self.fan_out(targets, &event)
    }

    fn fan_out(&self, targets: Vec<Session>, event: &ServerEvent) -> usize {
        targets
            .iter()
            .filter(|session| deliver(session, event.clone()))
            .count()
    }
}

fn deliver(session: &Session, event: ServerEvent) -> bool {
    match session.outbound().try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counter!(BROADCAST_DROPPED).increment(1);
            warn!(
                connection_id = %session.connection_id,
                username = %session.username,
                "outbound queue full, event dropped"
            );
            false
        },
        Err(TrySendError::Closed(_)) => {
            counter!(BROADCAST_DROPPED).increment(1);
            debug!(connection_id = %session.connection_id, "outbound queue closed, event dropped");
            false
        },
    }
}
