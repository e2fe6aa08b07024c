#![allow(dead_code)]

use std::sync::Arc;

use aura_backend_lib::config::Settings;
use aura_backend_lib::economy::{RandomSource, ScriptedRandom};
use aura_backend_lib::storage::{FlatFileStore, StoreOptions};
use aura_backend_lib::websocket::ConnectionHandler;
use aura_backend_lib::AppState;
use aura_common::{ClientEvent, CommandResult, ServerEvent};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const ADMIN: &str = "admin";

/// A hub backed by a temp directory and a test-controlled random source
pub struct TestHub<R = ScriptedRandom> {
    pub dir: TempDir,
    pub rng: Arc<R>,
    pub state: Arc<AppState<FlatFileStore>>,
}

pub fn test_settings(dir: &TempDir) -> Settings {
    Settings {
        data_dir: dir.path().join("data"),
        history_capacity: 5,
        privileged_users: vec![ADMIN.to_string()],
        ..Settings::default()
    }
}

pub fn open_store(dir: &TempDir, history_capacity: usize) -> FlatFileStore {
    let options = StoreOptions {
        history_capacity,
        ..StoreOptions::default()
    };
    FlatFileStore::open(dir.path().join("data"), options).unwrap()
}

pub fn setup_hub() -> TestHub {
    setup_hub_with(ScriptedRandom::new())
}

pub fn setup_hub_with<R: RandomSource + 'static>(rng: R) -> TestHub<R> {
    let dir = TempDir::new().unwrap();
    let settings = test_settings(&dir);
    let store = FlatFileStore::open(&settings.data_dir, StoreOptions::from(&settings)).unwrap();
    let rng = Arc::new(rng);
    let state = Arc::new(AppState::with_random(store, settings, rng.clone()).unwrap());
    TestHub { dir, rng, state }
}

/// One simulated connection
pub struct TestClient {
    pub handler: ConnectionHandler<FlatFileStore>,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    pub fn connect<R>(hub: &TestHub<R>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            handler: ConnectionHandler::new(Arc::clone(&hub.state), tx),
            rx,
        }
    }

    pub async fn join<R>(hub: &TestHub<R>, username: &str) -> Self {
        let mut client = Self::connect(hub);
        client
            .handler
            .handle_event(ClientEvent::Join {
                username: username.to_string(),
            })
            .await;
        client.drain();
        client
    }

    pub async fn say(&self, text: &str) {
        self.handler
            .handle_event(ClientEvent::ChatMessage {
                text: text.to_string(),
            })
            .await;
    }

    /// Run a command and return the interpreter's reply
    pub async fn command(&mut self, text: &str) -> CommandResult {
        self.say(text).await;
        self.drain()
            .into_iter()
            .find_map(|event| match event {
                ServerEvent::CommandResponse(result) => Some(result),
                _ => None,
            })
            .expect("no command response")
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}
