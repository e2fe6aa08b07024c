// ============================
// aura-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the Aura presence hub.

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod economy;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use crate::broadcast::BroadcastRouter;
use crate::commands::CommandInterpreter;
use crate::config::Settings;
use crate::economy::{Economy, RandomSource, ThreadRandom};
use crate::error::AppError;
use crate::registry::{RoleResolver, SessionRegistry};
use crate::storage::{FlatFileStore, RecordStore, StoreOptions};

/// Application state shared across all connections
pub struct AppState<S: RecordStore> {
    /// Settings the hub was started with
    pub settings: Arc<Settings>,
    /// Durable user records and chat history
    pub store: Arc<S>,
    /// Live sessions
    pub registry: Arc<SessionRegistry<S>>,
    /// Event fan-out
    pub router: BroadcastRouter<S>,
    /// Slash-command interpreter
    pub commands: CommandInterpreter<S>,
}

impl<S: RecordStore> AppState<S> {
    /// Create a new application state drawing odds from the thread RNG
    pub fn new(store: S, settings: Settings) -> Result<Self, AppError> {
        Self::with_random(store, settings, Arc::new(ThreadRandom))
    }

    /// Create a new application state with an explicit random source.
    ///
    /// Settings built in code get the same checks as loaded ones.
    pub fn with_random(
        store: S,
        settings: Settings,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self, AppError> {
        settings.validate()?;

        let store = Arc::new(store);
        let roles = RoleResolver::new(&settings.privileged_users);
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&store), roles));
        let router = BroadcastRouter::new(Arc::clone(&registry));
        let economy = Economy::new(settings.economy.clone(), rng);
        let commands = CommandInterpreter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            router.clone(),
            economy,
        );

        Ok(Self {
            settings: Arc::new(settings),
            store,
            registry,
            router,
            commands,
        })
    }
}

impl AppState<FlatFileStore> {
    /// Open the flat-file store under `settings.data_dir` and build the state
    pub fn open(settings: Settings) -> Result<Self, AppError> {
        let store = FlatFileStore::open(&settings.data_dir, StoreOptions::from(&settings))?;
        Self::new(store, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomySettings;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FlatFileStore {
        FlatFileStore::open(dir.path(), StoreOptions::default()).unwrap()
    }

    #[test]
    fn test_state_rejects_invalid_economy() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            economy: EconomySettings {
                dice_faces: 1,
                ..EconomySettings::default()
            },
            ..Settings::default()
        };

        let result = AppState::new(store(&dir), settings);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_state_accepts_defaults() {
        let dir = TempDir::new().unwrap();
        let state = AppState::new(store(&dir), Settings::default()).unwrap();
        assert!(state.registry.is_empty());
    }
}
