// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the Aura hub clients and server.
//! This module defines the WebSocket event vocabulary and the persisted data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to every live connection
pub type ConnectionId = Uuid;

/// Reserved sender name for server-authored notices
pub const SYSTEM_SENDER: &str = "system";

/// Normalize a username into its storage key.
///
/// Keys are case-insensitive: `Alice`, `ALICE` and `alice` are the same identity.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_ascii_lowercase()
}

/// Access level of an identity
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Privileged,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Privileged)
    }
}

/// The two wallets every user holds
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Gold,
    Rubies,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Gold => f.write_str("gold"),
            Currency::Rubies => f.write_str("rubies"),
        }
    }
}

/// Error returned when a currency name is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCurrency(pub String);

impl fmt::Display for UnknownCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown currency '{}' (expected gold or rubies)", self.0)
    }
}

impl std::error::Error for UnknownCurrency {}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gold" => Ok(Currency::Gold),
            "rubies" | "ruby" => Ok(Currency::Rubies),
            _ => Err(UnknownCurrency(s.to_string())),
        }
    }
}

/// Persisted profile and wallet for one identity
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserRecord {
    /// Display form of the username, as first joined
    pub username: String,
    /// Access level
    #[serde(default)]
    pub role: Role,
    /// Gold wallet
    pub gold: u64,
    /// Ruby wallet
    pub rubies: u64,
    /// Display image reference
    #[serde(default)]
    pub pfp: String,
    /// Free-text bio
    #[serde(default)]
    pub bio: String,
    /// Banner image reference
    #[serde(default)]
    pub banner: String,
    /// When the record was first created
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Create a fresh record holding the starting balances
    pub fn new(username: &str, gold: u64, rubies: u64) -> Self {
        Self {
            username: username.trim().to_string(),
            role: Role::Member,
            gold,
            rubies,
            pfp: String::new(),
            bio: String::new(),
            banner: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn balance(&self, currency: Currency) -> u64 {
        match currency {
            Currency::Gold => self.gold,
            Currency::Rubies => self.rubies,
        }
    }

    pub fn balance_mut(&mut self, currency: Currency) -> &mut u64 {
        match currency {
            Currency::Gold => &mut self.gold,
            Currency::Rubies => &mut self.rubies,
        }
    }

    /// Wealth level: one level per 1000 gold, a ruby is worth 10 gold
    pub fn level(&self) -> u64 {
        self.gold.saturating_add(self.rubies.saturating_mul(10)) / 1000
    }

    pub fn bank(&self) -> BankDisplay {
        BankDisplay {
            username: self.username.clone(),
            gold: self.gold,
            rubies: self.rubies,
            level: self.level(),
            pfp: self.pfp.clone(),
        }
    }
}

/// Client-writable profile fields
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Author of a chat event
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Sender {
    System,
    User { username: String },
}

impl Sender {
    pub fn name(&self) -> &str {
        match self {
            Sender::System => SYSTEM_SENDER,
            Sender::User { username } => username,
        }
    }
}

/// One persisted chat message or system notice
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatEvent {
    /// Unique event id
    pub id: Uuid,
    /// Who sent it
    pub sender: Sender,
    /// Message body, opaque to the server
    pub body: String,
    /// Role of the sender at send time
    pub role: Role,
    /// When the server accepted it
    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    pub fn from_user(username: &str, role: Role, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::User {
                username: username.to_string(),
            },
            body,
            role,
            timestamp: Utc::now(),
        }
    }

    pub fn system(body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::System,
            body,
            role: Role::Privileged,
            timestamp: Utc::now(),
        }
    }
}

/// Wallet card shown by `/bank`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BankDisplay {
    pub username: String,
    pub gold: u64,
    pub rubies: u64,
    pub level: u64,
    pub pfp: String,
}

/// Reply to a slash-command, sent only to the invoking connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to an identity
    Join { username: String },
    /// Plain chat text or a `/command`
    ChatMessage { text: String },
    /// Change profile fields of the bound identity
    UpdateProfile(ProfilePatch),
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Deduplicated set of online usernames
    UserListUpdate { roster: Vec<String> },
    /// Server-authored notice
    SystemMessage { text: String },
    /// A chat event, live or replayed from history
    ChatMessage(ChatEvent),
    /// Wallet card for the caller of `/bank`
    BankDisplay(BankDisplay),
    /// Replace the client's cached copy of its record
    ForceUpdate(UserRecord),
    /// Drop all locally cached state
    ForceWipeClient,
    /// Reply to a slash-command
    CommandResponse(CommandResult),
    /// Protocol-level failure
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_shape() {
        let json = r#"{"event":"join","data":{"username":"Alice"}}"#;
        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::Join {
                username: "Alice".to_string()
            }
        );

        let json = r#"{"event":"update_profile","data":{"bio":"hello"}}"#;
        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        match parsed {
            ClientEvent::UpdateProfile(patch) => {
                assert_eq!(patch.bio.as_deref(), Some("hello"));
                assert!(patch.pfp.is_none());
            },
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_wire_shape() {
        let wipe = serde_json::to_value(&ServerEvent::ForceWipeClient).unwrap();
        assert_eq!(wipe["event"], "force_wipe_client");

        let roster = serde_json::to_value(&ServerEvent::UserListUpdate {
            roster: vec!["alice".to_string()],
        })
        .unwrap();
        assert_eq!(roster["event"], "user_list_update");
        assert_eq!(roster["data"]["roster"][0], "alice");

        let event = ChatEvent::system("hi".to_string());
        let value = serde_json::to_value(&ServerEvent::ChatMessage(event)).unwrap();
        assert_eq!(value["data"]["sender"]["kind"], "system");
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!("GOLD".parse::<Currency>(), Ok(Currency::Gold));
        assert_eq!("ruby".parse::<Currency>(), Ok(Currency::Rubies));
        assert_eq!("Rubies".parse::<Currency>(), Ok(Currency::Rubies));
        assert!("silver".parse::<Currency>().is_err());
    }

    #[test]
    fn test_level_formula() {
        let mut record = UserRecord::new("bob", 100, 10);
        assert_eq!(record.level(), 0);
        record.gold = 900;
        assert_eq!(record.level(), 1);
        record.gold = 2999;
        record.rubies = 0;
        assert_eq!(record.level(), 2);
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  Alice "), "alice");
    }
}
