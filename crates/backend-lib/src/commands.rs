// ============================
// aura-backend-lib/src/commands.rs
// ============================
//! Slash-command interpreter.
//!
//! Commands look like `/name arg1 arg2`. Parsing checks the caller's cached role
//! before reading arguments, so a member probing a privileged command gets exactly
//! the reply an unknown name would get.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use aura_common::{ChatEvent, CommandResult, Currency, Role, ServerEvent};
use futures_util::FutureExt;
use metrics::counter;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::broadcast::BroadcastRouter;
use crate::economy::Economy;
use crate::error::AppError;
use crate::metrics::{COMMAND_EXECUTED, COMMAND_FAILED};
use crate::registry::{Session, SessionRegistry};
use crate::storage::RecordStore;
use crate::validation::validate_username;

pub const COMMAND_PREFIX: char = '/';
/// Reply for unknown names and for privileged names invoked without privilege
pub const UNKNOWN_COMMAND: &str = "INVALID COMMAND";
/// Reply when execution faults
pub const COMMAND_FAULT: &str = "ERROR EXECUTING COMMAND";

struct CommandSpec {
    name: &'static str,
    usage: &'static str,
    description: &'static str,
    privileged: bool,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        usage: "/help",
        description: "List the commands available to you",
        privileged: false,
    },
    CommandSpec {
        name: "bank",
        usage: "/bank",
        description: "Show your balances and level",
        privileged: false,
    },
    CommandSpec {
        name: "dice",
        usage: "/dice <gold|rubies> <amount>",
        description: "Wager an amount on a single die roll",
        privileged: false,
    },
    CommandSpec {
        name: "allin",
        usage: "/allin <gold|rubies>",
        description: "Wager your whole balance for a multiplied payout",
        privileged: false,
    },
    CommandSpec {
        name: "give",
        usage: "/give <username> <gold|rubies> <amount>",
        description: "Credit currency to a user",
        privileged: true,
    },
    CommandSpec {
        name: "wipe",
        usage: "/wipe",
        description: "Erase every user record and the chat history",
        privileged: true,
    },
];

/// Interpreter failures. Each maps onto a failed [`CommandResult`].
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0}")]
    Usage(String),

    #[error("Not enough {currency}: you have {balance}, needed {requested}")]
    InsufficientFunds {
        currency: Currency,
        balance: u64,
        requested: u64,
    },

    #[error("{}", UNKNOWN_COMMAND)]
    UnknownCommand,

    #[error(transparent)]
    Store(#[from] AppError),
}

impl CommandError {
    fn into_result(self, command: &str) -> CommandResult {
        counter!(COMMAND_FAILED).increment(1);
        match self {
            CommandError::Usage(_) | CommandError::InsufficientFunds { .. } => {
                CommandResult::failure(self.to_string())
            },
            CommandError::UnknownCommand => CommandResult::failure(UNKNOWN_COMMAND),
            CommandError::Store(e) => {
                error!(command, error = %e, "command aborted by store failure");
                CommandResult::failure(COMMAND_FAULT)
            },
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Bank,
    Dice { currency: Currency, amount: u64 },
    AllIn { currency: Currency },
    Give {
        target: String,
        currency: Currency,
        amount: u64,
    },
    Wipe,
}

impl Command {
    /// Parse `input` for a caller holding `role`
    pub fn parse(input: &str, role: Role) -> Result<Command, CommandError> {
        let body = input
            .trim()
            .strip_prefix(COMMAND_PREFIX)
            .ok_or(CommandError::UnknownCommand)?;
        let mut parts = body.split_whitespace();
        let name = parts
            .next()
            .ok_or(CommandError::UnknownCommand)?
            .to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();

        let spec = COMMANDS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or(CommandError::UnknownCommand)?;
        if spec.privileged && !role.is_privileged() {
            return Err(CommandError::UnknownCommand);
        }

        let usage = || CommandError::Usage(format!("Usage: {}", spec.usage));
        let command = match (spec.name, args.as_slice()) {
            ("help", []) => Command::Help,
            ("bank", []) => Command::Bank,
            ("dice", [currency, amount]) => Command::Dice {
                currency: parse_currency(currency)?,
                amount: parse_amount(amount)?,
            },
            ("allin", [currency]) => Command::AllIn {
                currency: parse_currency(currency)?,
            },
            ("give", [target, currency, amount]) => Command::Give {
                target: validate_username(target)
                    .map_err(|e| CommandError::Usage(e.to_string()))?
                    .to_string(),
                currency: parse_currency(currency)?,
                amount: parse_amount(amount)?,
            },
            ("wipe", []) => Command::Wipe,
            _ => return Err(usage()),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Bank => "bank",
            Command::Dice { .. } => "dice",
            Command::AllIn { .. } => "allin",
            Command::Give { .. } => "give",
            Command::Wipe => "wipe",
        }
    }
}

fn parse_currency(raw: &str) -> Result<Currency, CommandError> {
    raw.parse::<Currency>()
        .map_err(|e| CommandError::Usage(e.to_string()))
}

fn parse_amount(raw: &str) -> Result<u64, CommandError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(CommandError::Usage("Amount must be greater than zero".to_string())),
        Ok(amount) => Ok(amount),
        Err(_) => Err(CommandError::Usage(format!(
            "'{raw}' is not a valid amount"
        ))),
    }
}

fn overflow() -> CommandError {
    CommandError::Usage("That would overflow the wallet".to_string())
}

/// Runs commands for bound sessions
pub struct CommandInterpreter<S: RecordStore> {
    store: Arc<S>,
    registry: Arc<SessionRegistry<S>>,
    router: BroadcastRouter<S>,
    economy: Economy,
}

impl<S: RecordStore> CommandInterpreter<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<SessionRegistry<S>>,
        router: BroadcastRouter<S>,
        economy: Economy,
    ) -> Self {
        Self {
            store,
            registry,
            router,
            economy,
        }
    }

    /// Execute `input` on behalf of `session`.
    ///
    /// Never fails: errors and panics become a failed [`CommandResult`] and the
    /// session stays usable.
    pub async fn execute(&self, session: &Session, input: &str) -> CommandResult {
        let label = input
            .trim()
            .trim_start_matches(COMMAND_PREFIX)
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match AssertUnwindSafe(self.dispatch(session, input))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => {
                counter!(COMMAND_EXECUTED).increment(1);
                result
            },
            Ok(Err(e)) => e.into_result(&label),
            Err(_) => {
                counter!(COMMAND_FAILED).increment(1);
                error!(command = %label, username = %session.username, "command panicked");
                CommandResult::failure(COMMAND_FAULT)
            },
        }
    }

    async fn dispatch(&self, session: &Session, input: &str) -> Result<CommandResult, CommandError> {
        let command = Command::parse(input, session.role)?;
        info!(
            command = command.name(),
            username = %session.username,
            connection_id = %session.connection_id,
            "executing command"
        );

        match command {
            Command::Help => Ok(self.help(session.role)),
            Command::Bank => self.bank(session).await,
            Command::Dice { currency, amount } => self.dice(session, currency, amount).await,
            Command::AllIn { currency } => self.allin(session, currency).await,
            Command::Give {
                target,
                currency,
                amount,
            } => self.give(session, &target, currency, amount).await,
            Command::Wipe => self.wipe(session).await,
        }
    }

    fn help(&self, role: Role) -> CommandResult {
        let lines: Vec<String> = COMMANDS
            .iter()
            .filter(|spec| !spec.privileged || role.is_privileged())
            .map(|spec| format!("{} - {}", spec.usage, spec.description))
            .collect();
        CommandResult::ok(lines.join("\n"))
    }

    async fn bank(&self, session: &Session) -> Result<CommandResult, CommandError> {
        let record = self.store.get_user(&session.key).await?;
        let bank = record.bank();

        self.router
            .to_connection(session.connection_id, ServerEvent::BankDisplay(bank.clone()));
        Ok(CommandResult::ok("WEALTH REVEALED").with_payload(json!(bank)))
    }

    async fn dice(
        &self,
        session: &Session,
        currency: Currency,
        amount: u64,
    ) -> Result<CommandResult, CommandError> {
        let economy = &self.economy;
        let role = session.role;

        let (record, roll) = self
            .store
            .update_user(&session.key, |record| {
                let balance = record.balance(currency);
                if amount > balance {
                    return Err(CommandError::InsufficientFunds {
                        currency,
                        balance,
                        requested: amount,
                    });
                }

                let roll = economy.roll_dice(role);
                let wallet = record.balance_mut(currency);
                if roll.win {
                    *wallet = wallet.checked_add(amount).ok_or_else(overflow)?;
                } else {
                    *wallet -= amount;
                }
                Ok(roll)
            })
            .await?;

        let outcome = if roll.win { "won" } else { "lost" };
        self.announce(format!(
            "{} rolled a {} and {outcome} {amount} {currency}",
            session.username, roll.face
        ))
        .await;

        let message = format!("You rolled a {} and {outcome} {amount} {currency}", roll.face);
        Ok(CommandResult {
            success: true,
            message,
            payload: Some(json!({
                "face": roll.face,
                "win": roll.win,
                "currency": currency,
                "balance": record.balance(currency),
                "gold": record.gold,
                "rubies": record.rubies,
            })),
        })
    }

    async fn allin(&self, session: &Session, currency: Currency) -> Result<CommandResult, CommandError> {
        let economy = &self.economy;
        let role = session.role;

        let (record, (wagered, roll)) = self
            .store
            .update_user(&session.key, |record| {
                let balance = record.balance(currency);
                if balance == 0 {
                    return Err(CommandError::InsufficientFunds {
                        currency,
                        balance,
                        requested: 1,
                    });
                }

                let roll = economy.roll_allin(role);
                let wallet = record.balance_mut(currency);
                *wallet = if roll.win {
                    balance.checked_mul(roll.multiplier).ok_or_else(overflow)?
                } else {
                    0
                };
                Ok((balance, roll))
            })
            .await?;

        let balance = record.balance(currency);
        let notice = if roll.win {
            format!(
                "{} went all in with {wagered} {currency} and hit x{}: now holding {balance}",
                session.username, roll.multiplier
            )
        } else {
            format!(
                "{} went all in with {wagered} {currency} and lost it all",
                session.username
            )
        };
        self.announce(notice.clone()).await;

        Ok(CommandResult::ok(notice).with_payload(json!({
            "win": roll.win,
            "multiplier": roll.multiplier,
            "wagered": wagered,
            "currency": currency,
            "balance": balance,
        })))
    }

    async fn give(
        &self,
        session: &Session,
        target: &str,
        currency: Currency,
        amount: u64,
    ) -> Result<CommandResult, CommandError> {
        let (record, ()) = self
            .store
            .update_user(target, |record| {
                let wallet = record.balance_mut(currency);
                *wallet = wallet.checked_add(amount).ok_or_else(overflow)?;
                Ok::<(), CommandError>(())
            })
            .await?;

        // the credit is committed; a target that just left simply misses the refresh
        let refreshed = self
            .router
            .to_username(target, ServerEvent::ForceUpdate(record.clone()));
        self.announce(format!(
            "{} granted {amount} {currency} to {}",
            session.username, record.username
        ))
        .await;

        Ok(CommandResult::ok(format!(
            "Gave {amount} {currency} to {}",
            record.username
        ))
        .with_payload(json!({
            "target": record.username,
            "balance": record.balance(currency),
            "refreshed_connections": refreshed,
        })))
    }

    async fn wipe(&self, session: &Session) -> Result<CommandResult, CommandError> {
        self.store.reset_all().await?;

        self.router.to_all(ServerEvent::SystemMessage {
            text: format!("{} wiped the hub. All records and history are gone.", session.username),
        });
        self.router.to_all(ServerEvent::ForceWipeClient);
        let dropped = self.registry.clear();
        warn!(username = %session.username, dropped, "hub wiped");

        Ok(CommandResult::ok("Hub wiped").with_payload(json!({ "sessions_cleared": dropped })))
    }

    /// Persist a system notice to history and broadcast it
    async fn announce(&self, text: String) {
        if let Err(e) = self.store.append_history(ChatEvent::system(text.clone())).await {
            warn!(error = %e, "system notice not persisted");
        }
        self.router.to_all(ServerEvent::SystemMessage { text });
    }
}
