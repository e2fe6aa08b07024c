// ============================
// aura-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Config file read when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "aura.toml";
/// Prefix for environment overrides, e.g. `AURA_HISTORY_CAPACITY`
pub const ENV_PREFIX: &str = "AURA_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Directory holding `users.json` and `history.json`
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    /// Number of chat events retained
    pub history_capacity: usize,
    /// Upper bound on a single durable write
    pub persist_timeout_ms: u64,
    /// Longest accepted chat body, in characters
    pub max_message_len: usize,
    /// Usernames granted the privileged role when they join
    pub privileged_users: Vec<String>,
    /// Starting balances and payout odds
    pub economy: EconomySettings,
}

/// Starting balances and wager odds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomySettings {
    pub starting_gold: u64,
    pub starting_rubies: u64,
    /// Number of faces on the die
    pub dice_faces: u32,
    /// The single face that wins a standard roll
    pub dice_win_face: u32,
    /// Win probability for privileged callers, applied to dice and all-in
    pub privileged_win_probability: f64,
    /// Win probability of an all-in for members
    pub allin_win_probability: f64,
    /// All-in wins multiply the balance by a draw from `1..=allin_max_multiplier`
    pub allin_max_multiplier: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            history_capacity: 100,
            persist_timeout_ms: 2_000,
            max_message_len: 2_000,
            privileged_users: Vec::new(),
            economy: EconomySettings::default(),
        }
    }
}

impl Default for EconomySettings {
    fn default() -> Self {
        Self {
            starting_gold: 100,
            starting_rubies: 10,
            dice_faces: 6,
            dice_win_face: 6,
            privileged_win_probability: 0.99,
            allin_win_probability: 0.25,
            allin_max_multiplier: 10,
        }
    }
}

impl Settings {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    /// Reject settings the hub cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "log_level must be one of {LOG_LEVELS:?}, got '{}'",
                self.log_level
            )));
        }
        if self.history_capacity == 0 {
            return Err(AppError::Config("history_capacity must be at least 1".to_string()));
        }
        if self.persist_timeout_ms == 0 {
            return Err(AppError::Config("persist_timeout_ms must be positive".to_string()));
        }
        if self.max_message_len == 0 {
            return Err(AppError::Config("max_message_len must be positive".to_string()));
        }
        self.economy.validate()
    }
}

impl EconomySettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.dice_faces < 2 {
            return Err(AppError::Config("dice_faces must be at least 2".to_string()));
        }
        if !(1..=self.dice_faces).contains(&self.dice_win_face) {
            return Err(AppError::Config(format!(
                "dice_win_face must be within 1..={}",
                self.dice_faces
            )));
        }
        for (name, p) in [
            ("privileged_win_probability", self.privileged_win_probability),
            ("allin_win_probability", self.allin_win_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(AppError::Config(format!("{name} must be within [0, 1]")));
            }
        }
        if self.allin_max_multiplier == 0 {
            return Err(AppError::Config("allin_max_multiplier must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Load settings: defaults, then the TOML file, then `AURA_*` environment variables
pub fn load_settings(path: Option<&Path>) -> Result<Settings, AppError> {
    let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

    let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;

    settings.validate()?;
    Ok(settings)
}
