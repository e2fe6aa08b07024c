// ============================
// aura-backend-lib/src/storage.rs
// ============================
//! Record store: user records and the capped chat history, with a flat-file implementation.
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use aura_common::{normalize_username, ChatEvent, ProfilePatch, Role, UserRecord};
use metrics::counter;
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::AppError;
use crate::metrics::STORE_PERSIST_FAILED;

const USERS_FILE: &str = "users.json";
const HISTORY_FILE: &str = "history.json";
const TMP_SUFFIX: &str = ".tmp";

/// Field-wise merge applied by [`RecordStore::put_user`]. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub role: Option<Role>,
    pub gold: Option<u64>,
    pub rubies: Option<u64>,
    pub pfp: Option<String>,
    pub bio: Option<String>,
    pub banner: Option<String>,
}

impl UserPatch {
    pub fn apply(self, record: &mut UserRecord) {
        if let Some(role) = self.role {
            record.role = role;
        }
        if let Some(gold) = self.gold {
            record.gold = gold;
        }
        if let Some(rubies) = self.rubies {
            record.rubies = rubies;
        }
        if let Some(pfp) = self.pfp {
            record.pfp = pfp;
        }
        if let Some(bio) = self.bio {
            record.bio = bio;
        }
        if let Some(banner) = self.banner {
            record.banner = banner;
        }
    }
}

impl From<ProfilePatch> for UserPatch {
    fn from(patch: ProfilePatch) -> Self {
        Self {
            pfp: patch.pfp,
            bio: patch.bio,
            banner: patch.banner,
            ..Self::default()
        }
    }
}

/// Trait for record store backends.
///
/// Every mutating call has durably persisted its change when it returns `Ok`.
/// On `Err` nothing was changed.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Fetch a user, creating it with the starting balances if absent
    async fn get_user(&self, username: &str) -> Result<UserRecord, AppError>;

    /// Read-modify-write a single user record under the store's mutation lock.
    ///
    /// The record is created with starting balances if absent. If `mutate` fails the
    /// record is left as it was and its error is returned.
    async fn update_user<F, T, E>(&self, username: &str, mutate: F) -> Result<(UserRecord, T), E>
    where
        F: FnOnce(&mut UserRecord) -> Result<T, E> + Send,
        T: Send,
        E: From<AppError> + Send;

    /// Merge `patch` into a user record
    async fn put_user(&self, username: &str, patch: UserPatch) -> Result<UserRecord, AppError> {
        let (record, ()) = self
            .update_user(username, move |record| {
                patch.apply(record);
                Ok::<(), AppError>(())
            })
            .await?;
        Ok(record)
    }

    /// Append to the history, evicting the oldest events past capacity
    async fn append_history(&self, event: ChatEvent) -> Result<(), AppError>;

    /// Retained history, oldest first
    async fn load_history(&self) -> Result<Vec<ChatEvent>, AppError>;

    /// Drop every user record and the whole history
    async fn reset_all(&self) -> Result<(), AppError>;
}

/// Knobs the store needs from [`Settings`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub history_capacity: usize,
    pub starting_gold: u64,
    pub starting_rubies: u64,
    pub persist_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for StoreOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            history_capacity: settings.history_capacity,
            starting_gold: settings.economy.starting_gold,
            starting_rubies: settings.economy.starting_rubies,
            persist_timeout: settings.persist_timeout(),
        }
    }
}

#[derive(Default)]
struct StoreState {
    users: BTreeMap<String, UserRecord>,
    history: VecDeque<ChatEvent>,
}

/// Flat-file implementation of the RecordStore trait.
///
/// Holds both documents in memory and rewrites the affected file on every
/// mutation. One async mutex linearizes all mutations.
pub struct FlatFileStore {
    root: PathBuf,
    options: StoreOptions,
    state: Mutex<StoreState>,
}

impl FlatFileStore {
    /// Open the store under `root`, loading any existing documents
    pub fn open<P: AsRef<Path>>(root: P, options: StoreOptions) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        sweep_staged(&root)?;

        let users: BTreeMap<String, UserRecord> = read_document(&root.join(USERS_FILE))?;
        let mut history: VecDeque<ChatEvent> = read_document(&root.join(HISTORY_FILE))?;
        while history.len() > options.history_capacity {
            history.pop_front();
        }

        debug!(
            root = %root.display(),
            users = users.len(),
            history = history.len(),
            "record store opened"
        );

        Ok(Self {
            root,
            options,
            state: Mutex::new(StoreState { users, history }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn default_record(&self, username: &str) -> UserRecord {
        UserRecord::new(
            username,
            self.options.starting_gold,
            self.options.starting_rubies,
        )
    }

    /// Write every document to a temp sibling, then rename them all into place.
    ///
    /// Only staging runs under the persist timeout. Once staging succeeds the renames
    /// always run, so a timed-out write never replaces a target document.
    async fn persist(&self, documents: &[(&str, Vec<u8>)]) -> Result<(), AppError> {
        let staged: Vec<StagedDocument<'_>> = documents
            .iter()
            .map(|(name, bytes)| StagedDocument {
                // unique per write: an abandoned staging write never touches a later one
                tmp: self
                    .root
                    .join(format!("{name}.{}{TMP_SUFFIX}", Uuid::new_v4().simple())),
                target: self.root.join(name),
                bytes,
            })
            .collect();

        let limit = self.options.persist_timeout;
        let result = match tokio::time::timeout(limit, stage_documents(&staged)).await {
            Ok(Ok(())) => commit_documents(&staged).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::PersistTimeout(limit)),
        };

        if let Err(e) = &result {
            counter!(STORE_PERSIST_FAILED).increment(1);
            error!(root = %self.root.display(), error = %e, "failed to persist record store");
            for doc in &staged {
                let _ = tokio_fs::remove_file(&doc.tmp).await;
            }
        }
        result
    }
}

struct StagedDocument<'a> {
    tmp: PathBuf,
    target: PathBuf,
    bytes: &'a [u8],
}

async fn stage_documents(staged: &[StagedDocument<'_>]) -> Result<(), AppError> {
    for doc in staged {
        let mut file = tokio_fs::File::create(&doc.tmp).await?;
        file.write_all(doc.bytes).await?;
        file.sync_all().await?;
    }
    Ok(())
}

async fn commit_documents(staged: &[StagedDocument<'_>]) -> Result<(), AppError> {
    for doc in staged {
        tokio_fs::rename(&doc.tmp, &doc.target).await?;
    }
    Ok(())
}

/// Remove temp files left behind by writes that never committed
fn sweep_staged(root: &Path) -> Result<(), AppError> {
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let is_staged = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TMP_SUFFIX));
        if is_staged {
            debug!(path = %path.display(), "removing stale temp file");
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn read_document<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, AppError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        warn!(path = %path.display(), "empty document, starting fresh");
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

#[async_trait]
impl RecordStore for FlatFileStore {
    async fn get_user(&self, username: &str) -> Result<UserRecord, AppError> {
        let key = normalize_username(username);
        let mut state = self.state.lock().await;

        if let Some(record) = state.users.get(&key) {
            return Ok(record.clone());
        }

        let record = self.default_record(username);
        state.users.insert(key.clone(), record.clone());
        let bytes = serde_json::to_vec_pretty(&state.users);
        let persisted = match bytes {
            Ok(bytes) => self.persist(&[(USERS_FILE, bytes)]).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            state.users.remove(&key);
            return Err(e);
        }

        debug!(username = %record.username, "created user record");
        Ok(record)
    }

    async fn update_user<F, T, E>(&self, username: &str, mutate: F) -> Result<(UserRecord, T), E>
    where
        F: FnOnce(&mut UserRecord) -> Result<T, E> + Send,
        T: Send,
        E: From<AppError> + Send,
    {
        let key = normalize_username(username);
        let mut state = self.state.lock().await;

        let mut record = state
            .users
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default_record(username));
        let output = mutate(&mut record)?;

        let previous = state.users.insert(key.clone(), record.clone());
        let persisted = match serde_json::to_vec_pretty(&state.users) {
            Ok(bytes) => self.persist(&[(USERS_FILE, bytes)]).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            // put the map back exactly as it was
            match previous {
                Some(previous) => state.users.insert(key, previous),
                None => state.users.remove(&key),
            };
            return Err(E::from(e));
        }

        Ok((record, output))
    }

    async fn append_history(&self, event: ChatEvent) -> Result<(), AppError> {
        let mut state = self.state.lock().await;

        let mut next = state.history.clone();
        next.push_back(event);
        while next.len() > self.options.history_capacity {
            next.pop_front();
        }

        let bytes = serde_json::to_vec_pretty(&next)?;
        self.persist(&[(HISTORY_FILE, bytes)]).await?;
        state.history = next;
        Ok(())
    }

    async fn load_history(&self) -> Result<Vec<ChatEvent>, AppError> {
        let state = self.state.lock().await;
        Ok(state.history.iter().cloned().collect())
    }

    async fn reset_all(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().await;

        let users = serde_json::to_vec_pretty(&BTreeMap::<String, UserRecord>::new())?;
        let history = serde_json::to_vec_pretty(&VecDeque::<ChatEvent>::new())?;
        self.persist(&[(USERS_FILE, users), (HISTORY_FILE, history)])
            .await?;

        *state = StoreState::default();
        warn!(root = %self.root.display(), "record store reset");
        Ok(())
    }
}
