// ============================
// aura-backend-lib/src/registry.rs
// ============================
//! Session registry: live connections, the identity each is bound to, and the online roster.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use aura_common::{normalize_username, ConnectionId, Role, ServerEvent, UserRecord};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::gauge;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::AppError;
use crate::metrics::ROSTER_ONLINE;
use crate::storage::{RecordStore, UserPatch};
use crate::validation::validate_username;

/// Decides the role of an identity at join time
#[derive(Debug, Clone, Default)]
pub struct RoleResolver {
    privileged: HashSet<String>,
}

impl RoleResolver {
    pub fn new<I, N>(privileged: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        Self {
            privileged: privileged
                .into_iter()
                .map(|name| normalize_username(name.as_ref()))
                .collect(),
        }
    }

    /// The configured list is the only source of privilege
    pub fn resolve(&self, key: &str) -> Role {
        if self.privileged.contains(key) {
            Role::Privileged
        } else {
            Role::Member
        }
    }
}

/// One live connection bound to an identity
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    /// Display form of the username
    pub username: String,
    /// Normalized username
    pub key: String,
    /// Role resolved at join, cached for the session's lifetime
    pub role: Role,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Session {
    pub(crate) fn outbound(&self) -> &mpsc::Sender<ServerEvent> {
        &self.outbound
    }
}

/// Outcome of a successful [`SessionRegistry::register`]
#[derive(Debug, Clone)]
pub struct Registration {
    pub session: Session,
    pub record: UserRecord,
    /// True when this is the identity's only live session
    pub first_online: bool,
}

/// Outcome of [`SessionRegistry::unregister`]
#[derive(Debug, Clone)]
pub struct Departure {
    pub session: Session,
    /// True when no other session of the identity remains
    pub last_offline: bool,
}

/// Registry of every bound connection
pub struct SessionRegistry<S: RecordStore> {
    store: Arc<S>,
    roles: RoleResolver,
    sessions: DashMap<ConnectionId, Session>,
    /// Live session count per normalized username
    online: DashMap<String, usize>,
}

impl<S: RecordStore> SessionRegistry<S> {
    pub fn new(store: Arc<S>, roles: RoleResolver) -> Self {
        Self {
            store,
            roles,
            sessions: DashMap::new(),
            online: DashMap::new(),
        }
    }

    /// Bind a connection to a username, loading or creating the user record.
    ///
    /// A connection binds once; a second call fails with [`AppError::AlreadyJoined`].
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        username: &str,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<Registration, AppError> {
        if self.sessions.contains_key(&connection_id) {
            return Err(AppError::AlreadyJoined);
        }

        let username = validate_username(username)?;
        let key = normalize_username(username);

        let mut record = self.store.get_user(username).await?;
        let role = self.roles.resolve(&key);
        if role != record.role {
            let patch = UserPatch {
                role: Some(role),
                ..UserPatch::default()
            };
            record = self.store.put_user(&key, patch).await?;
        }

        let now = Utc::now();
        let session = Session {
            connection_id,
            username: record.username.clone(),
            key: key.clone(),
            role,
            connected_at: now,
            last_activity: now,
            outbound,
        };

        match self.sessions.entry(connection_id) {
            Entry::Occupied(_) => return Err(AppError::AlreadyJoined),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            },
        }

        let first_online = {
            let mut count = self.online.entry(key).or_insert(0);
            *count += 1;
            *count == 1
        };
        gauge!(ROSTER_ONLINE).set(self.roster_snapshot().len() as f64);
        info!(%connection_id, username = %session.username, ?role, "session registered");

        Ok(Registration {
            session,
            record,
            first_online,
        })
    }

    /// Remove a connection's binding, if any
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Departure> {
        let (_, session) = self.sessions.remove(&connection_id)?;
        let last_offline = match self.online.entry(session.key.clone()) {
            Entry::Occupied(mut count) if *count.get() > 1 => {
                *count.get_mut() -= 1;
                false
            },
            Entry::Occupied(count) => {
                count.remove();
                true
            },
            // a concurrent clear already dropped the count
            Entry::Vacant(_) => true,
        };

        gauge!(ROSTER_ONLINE).set(self.roster_snapshot().len() as f64);
        info!(%connection_id, username = %session.username, "session unregistered");

        Some(Departure {
            session,
            last_offline,
        })
    }

    /// Distinct online usernames, sorted
    pub fn roster_snapshot(&self) -> Vec<String> {
        let mut online = BTreeMap::new();
        for entry in self.sessions.iter() {
            online
                .entry(entry.value().key.clone())
                .or_insert_with(|| entry.value().username.clone());
        }
        online.into_values().collect()
    }

    /// Every live connection bound to `username`
    pub fn find_connections(&self, username: &str) -> Vec<ConnectionId> {
        let key = normalize_username(username);
        self.sessions
            .iter()
            .filter(|entry| entry.value().key == key)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn session(&self, connection_id: ConnectionId) -> Option<Session> {
        self.sessions.get(&connection_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of all sessions
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Record activity on a connection
    pub fn touch(&self, connection_id: ConnectionId) {
        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Drop every binding. Connections stay open and may join again.
    pub fn clear(&self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        self.online.clear();
        gauge!(ROSTER_ONLINE).set(0.0);
        debug!(count, "session registry cleared");
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
