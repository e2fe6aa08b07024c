// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const CHAT_MESSAGES: &str = "chat.messages";
pub const COMMAND_EXECUTED: &str = "command.executed";
pub const COMMAND_FAILED: &str = "command.failed";
pub const STORE_PERSIST_FAILED: &str = "store.persist_failed";
pub const ROSTER_ONLINE: &str = "roster.online";
pub const BROADCAST_DROPPED: &str = "broadcast.dropped";
