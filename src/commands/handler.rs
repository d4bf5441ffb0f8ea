//! Command Handler
//!
//! Turns a decoded request into a typed [`Command`], validates its
//! arguments, runs it against the [`StorageEngine`] and builds the reply.
//!
//! ## Supported Commands
//!
//! - `PING` - replies `$4\r\nPONG\r\n`
//! - `ECHO message` - replies with `message` re-serialized as received
//! - `SET key value [PX milliseconds]` - replies `+OK`
//! - `GET key` - replies with the value, or the nil bulk string
//!
//! The command name is matched case-insensitively, as is the `PX` keyword.
//! Everything else is case-sensitive.
//!
//! ## Errors
//!
//! No request can make the handler fail. Bad arity, arguments of the wrong
//! type, an unparsable `PX` option and unknown commands all come back as an
//! error reply, and the connection carries on. Arguments are fully validated
//! before the store is touched.
//!
//! Only arrays headed by a bulk string are commands. Any other frame is
//! returned to the client unchanged.

use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo(RespValue),
    Set {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
    },
    Get {
        key: Bytes,
    },
}

/// Why a request could not be turned into a [`Command`].
///
/// The `Display` text is sent to the client verbatim as an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unsupported command: {0}")]
    Unsupported(String),

    #[error("ERR command name must be a bulk string")]
    InvalidName,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR {argument} argument of '{command}' must be a bulk string")]
    NotBulkString {
        command: &'static str,
        argument: &'static str,
    },

    #[error("ERR failed to parse PX option for 'SET': {0}")]
    InvalidPx(String),
}

impl Command {
    /// Parses a command array. `args[0]` must be the command name.
    pub fn from_args(args: Vec<RespValue>) -> Result<Command, CommandError> {
        let mut args = args.into_iter();
        let name = match args.next() {
            Some(RespValue::BulkString(name)) => name,
            _ => return Err(CommandError::InvalidName),
        };
        let args: Vec<RespValue> = args.collect();

        match name.to_ascii_uppercase().as_slice() {
            b"PING" => Ok(Command::Ping),
            b"ECHO" => Self::parse_echo(args),
            b"SET" => Self::parse_set(args),
            b"GET" => Self::parse_get(args),
            _ => Err(CommandError::Unsupported(
                String::from_utf8_lossy(&name).replace(['\r', '\n'], " "),
            )),
        }
    }

    fn parse_echo(args: Vec<RespValue>) -> Result<Command, CommandError> {
        let [message] = exact_args::<1>("ECHO", args)?;
        Ok(Command::Echo(message))
    }

    fn parse_get(args: Vec<RespValue>) -> Result<Command, CommandError> {
        let [key] = exact_args::<1>("GET", args)?;
        let key = bulk_arg(key, "GET", "key")?;
        Ok(Command::Get { key })
    }

    /// `SET key value` or exactly `SET key value PX <milliseconds>`.
    fn parse_set(args: Vec<RespValue>) -> Result<Command, CommandError> {
        if args.len() < 2 {
            return Err(CommandError::WrongArity("SET"));
        }

        let mut args = args.into_iter();
        let (Some(key), Some(value)) = (args.next(), args.next()) else {
            return Err(CommandError::WrongArity("SET"));
        };
        let key = bulk_arg(key, "SET", "key")?;
        let value = bulk_arg(value, "SET", "value")?;

        let options: Vec<RespValue> = args.collect();
        let ttl = match <[RespValue; 2]>::try_from(options) {
            Ok([keyword, millis]) => Some(parse_px(keyword, millis)?),
            Err(options) if options.is_empty() => None,
            Err(options) => {
                return Err(CommandError::InvalidPx(format!(
                    "expected 'PX <milliseconds>', got {} option argument(s)",
                    options.len()
                )))
            }
        };

        Ok(Command::Set { key, value, ttl })
    }
}

/// Checks the argument count and moves the arguments out.
fn exact_args<const N: usize>(
    command: &'static str,
    args: Vec<RespValue>,
) -> Result<[RespValue; N], CommandError> {
    args.try_into()
        .map_err(|_| CommandError::WrongArity(command))
}

fn bulk_arg(
    value: RespValue,
    command: &'static str,
    argument: &'static str,
) -> Result<Bytes, CommandError> {
    match value {
        RespValue::BulkString(b) => Ok(b),
        _ => Err(CommandError::NotBulkString { command, argument }),
    }
}

fn parse_px(keyword: RespValue, millis: RespValue) -> Result<Duration, CommandError> {
    let keyword = bulk_arg(keyword, "SET", "option")?;
    if !keyword.eq_ignore_ascii_case(b"PX") {
        return Err(CommandError::InvalidPx(format!(
            "unknown option '{}'",
            String::from_utf8_lossy(&keyword)
        )));
    }

    let millis = bulk_arg(millis, "SET", "milliseconds")?;
    std::str::from_utf8(&millis)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .ok_or_else(|| {
            CommandError::InvalidPx(format!(
                "'{}' is not a non-negative integer",
                String::from_utf8_lossy(&millis)
            ))
        })
}

/// Executes requests against the shared storage engine.
///
/// Stateless apart from the store handle; cloning it is cheap and every
/// connection gets its own clone.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a request and returns the reply.
    ///
    /// # Example
    ///
    /// ```
    /// use emberkv::commands::CommandHandler;
    /// use emberkv::protocol::RespValue;
    /// use emberkv::storage::StorageEngine;
    /// use std::sync::Arc;
    ///
    /// let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
    /// let ping = RespValue::array(vec![RespValue::bulk_string("ping")]);
    /// assert_eq!(handler.execute(ping).serialize(), b"$4\r\nPONG\r\n");
    /// ```
    pub fn execute(&self, request: RespValue) -> RespValue {
        let args = match request {
            RespValue::Array(args) if matches!(args.first(), Some(RespValue::BulkString(_))) => {
                args
            }
            other => {
                trace!(frame = %other, "Not a command, passing through");
                return other;
            }
        };

        match Command::from_args(args) {
            Ok(command) => self.apply(command),
            Err(e) => {
                trace!(error = %e, "Rejected command");
                RespValue::error(e.to_string())
            }
        }
    }

    /// Runs a validated command.
    pub fn apply(&self, command: Command) -> RespValue {
        match command {
            Command::Ping => RespValue::pong(),
            Command::Echo(message) => message,
            Command::Set {
                key,
                value,
                ttl: None,
            } => {
                self.storage.set(key, value);
                RespValue::ok()
            }
            Command::Set {
                key,
                value,
                ttl: Some(ttl),
            } => {
                self.storage.set_with_ttl(key, value, ttl);
                RespValue::ok()
            }
            Command::Get { key } => match self.storage.get(&key) {
                Some(value) => RespValue::bulk_string(value),
                None => RespValue::null(),
            },
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }
}
