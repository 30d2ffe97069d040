//! Command Handlers
//!
//! One function per verb, plus the [`CommandTable`] that maps uppercased
//! verbs to them. Handlers validate their own arguments and never index past
//! what they checked, so a short command is an `InvalidArgument`, not a
//! panic.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [EX seconds | PX milliseconds]` - Set a key
//! - `GET key` - Get a key's value
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//!
//! ### Key Commands
//! - `EXPIRE key seconds` - Set expiry (fractional seconds allowed)
//! - `PEXPIRE key milliseconds` - Set expiry in ms
//! - `TTL key` / `PTTL key` - Remaining TTL
//! - `PERSIST key` - Remove expiry
//!
//! ### Server Commands
//! - `PING [message]`, `ECHO message`, `COMMAND`, `DBSIZE`

use crate::error::{Error, Result};
use crate::protocol::{Command, RespValue};
use crate::storage::{StorageEngine, Ttl};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;

/// Executes one command against the storage engine.
pub type Handler = fn(&Command, &StorageEngine) -> Result<RespValue>;

/// Immutable mapping from uppercased verb to handler.
///
/// Built once at startup and shared by every connection.
#[derive(Clone)]
pub struct CommandTable {
    handlers: HashMap<&'static str, Handler>,
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("CommandTable").field("commands", &names).finish()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommandTable {
    /// An empty table.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The table of every command this server implements.
    pub fn builtin() -> Self {
        Self::empty()
            .with("COMMAND", cmd_command)
            .with("PING", cmd_ping)
            .with("ECHO", cmd_echo)
            .with("SET", cmd_set)
            .with("GET", cmd_get)
            .with("DEL", cmd_del)
            .with("EXISTS", cmd_exists)
            .with("EXPIRE", cmd_expire)
            .with("PEXPIRE", cmd_pexpire)
            .with("TTL", cmd_ttl)
            .with("PTTL", cmd_pttl)
            .with("PERSIST", cmd_persist)
            .with("DBSIZE", cmd_dbsize)
    }

    /// Adds or replaces the handler for `verb`, which must be uppercase.
    pub fn with(mut self, verb: &'static str, handler: Handler) -> Self {
        debug_assert_eq!(verb, verb.to_ascii_uppercase());
        self.handlers.insert(verb, handler);
        self
    }

    pub fn get(&self, verb: &str) -> Option<Handler> {
        self.handlers.get(verb).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Parses a (possibly fractional) number from an argument.
fn parse_float(arg: &Bytes) -> Result<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| Error::invalid_argument("value is not a valid float"))
}

/// Converts a seconds count to a TTL. Zero and negative values mean
/// "expire now".
fn ttl_from_secs(secs: f64, command: &str) -> Result<Duration> {
    let invalid = || {
        Error::invalid_argument(format!(
            "invalid expire time in '{}' command",
            command.to_ascii_lowercase()
        ))
    };

    if !secs.is_finite() {
        return Err(invalid());
    }
    if secs <= 0.0 {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

/// Remaining TTL as a reply: -2 missing, -1 persistent, else rounded up.
fn ttl_reply(ttl: Ttl, unit: Duration) -> RespValue {
    match ttl {
        Ttl::Missing => RespValue::integer(-2),
        Ttl::Persistent => RespValue::integer(-1),
        Ttl::Expires(remaining) => {
            let units = remaining.as_nanos().div_ceil(unit.as_nanos());
            RespValue::integer(i64::try_from(units).unwrap_or(i64::MAX))
        }
    }
}

// ============================================================================
// Server Commands
// ============================================================================

/// COMMAND
fn cmd_command(_cmd: &Command, _storage: &StorageEngine) -> Result<RespValue> {
    Ok(RespValue::ok())
}

/// PING [message]
fn cmd_ping(cmd: &Command, _storage: &StorageEngine) -> Result<RespValue> {
    match cmd.args() {
        [] => Ok(RespValue::pong()),
        [message] => Ok(RespValue::bulk_string(message.clone())),
        _ => Err(Error::wrong_arity("PING")),
    }
}

/// ECHO message
fn cmd_echo(cmd: &Command, _storage: &StorageEngine) -> Result<RespValue> {
    match cmd.args() {
        [message] => Ok(RespValue::bulk_string(message.clone())),
        _ => Err(Error::wrong_arity("ECHO")),
    }
}

/// DBSIZE
fn cmd_dbsize(_cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    Ok(RespValue::integer(storage.len() as i64))
}

// ============================================================================
// String Commands
// ============================================================================

/// SET key value [EX seconds | PX milliseconds]
///
/// A wrong number of option tokens is rejected before anything is written.
/// A bad unit or amount is only found after the value is stored, so that
/// error leaves the new value in place.
fn cmd_set(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let (key, value, expiry) = match cmd.args() {
        [key, value] => (key, value, None),
        [key, value, unit, amount] => (key, value, Some((unit, amount))),
        [_, _, _] => {
            return Err(Error::invalid_argument(
                "not enough arguments for 'set' command",
            ))
        }
        [_, _, ..] => return Err(Error::invalid_argument("syntax error")),
        _ => return Err(Error::wrong_arity("SET")),
    };

    storage.set(key.clone(), value.clone());

    if let Some((unit, amount)) = expiry {
        let secs = match String::from_utf8_lossy(unit).to_ascii_uppercase().as_str() {
            "EX" => parse_float(amount)?,
            "PX" => parse_float(amount)? / 1000.0,
            other => {
                return Err(Error::invalid_argument(format!(
                    "invalid time unit '{}', only EX (seconds) and PX (milliseconds) are supported",
                    other
                )))
            }
        };
        storage.expire(key, ttl_from_secs(secs, "SET")?);
    }

    Ok(RespValue::ok())
}

/// GET key
fn cmd_get(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key] = cmd.args() else {
        return Err(Error::wrong_arity("GET"));
    };

    Ok(match storage.get(key) {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null(),
    })
}

/// DEL key [key ...]
fn cmd_del(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    if cmd.args().is_empty() {
        return Err(Error::wrong_arity("DEL"));
    }

    for key in cmd.args() {
        storage.delete(key);
    }
    Ok(RespValue::ok())
}

/// EXISTS key [key ...]
fn cmd_exists(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    if cmd.args().is_empty() {
        return Err(Error::wrong_arity("EXISTS"));
    }

    let count = cmd.args().iter().filter(|key| storage.exists(key)).count();
    Ok(RespValue::integer(count as i64))
}

// ============================================================================
// Key Commands
// ============================================================================

/// EXPIRE key seconds
fn cmd_expire(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key, secs] = cmd.args() else {
        return Err(Error::wrong_arity("EXPIRE"));
    };

    let ttl = ttl_from_secs(parse_float(secs)?, "EXPIRE")?;
    storage.expire(key, ttl);
    Ok(RespValue::ok())
}

/// PEXPIRE key milliseconds
fn cmd_pexpire(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key, millis] = cmd.args() else {
        return Err(Error::wrong_arity("PEXPIRE"));
    };

    let ttl = ttl_from_secs(parse_float(millis)? / 1000.0, "PEXPIRE")?;
    storage.expire(key, ttl);
    Ok(RespValue::ok())
}

/// TTL key
fn cmd_ttl(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key] = cmd.args() else {
        return Err(Error::wrong_arity("TTL"));
    };
    Ok(ttl_reply(storage.ttl(key), Duration::from_secs(1)))
}

/// PTTL key
fn cmd_pttl(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key] = cmd.args() else {
        return Err(Error::wrong_arity("PTTL"));
    };
    Ok(ttl_reply(storage.ttl(key), Duration::from_millis(1)))
}

/// PERSIST key
fn cmd_persist(cmd: &Command, storage: &StorageEngine) -> Result<RespValue> {
    let [key] = cmd.args() else {
        return Err(Error::wrong_arity("PERSIST"));
    };
    Ok(RespValue::integer(i64::from(storage.persist(key))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(storage: &StorageEngine, parts: &[&str]) -> Result<RespValue> {
        let table = CommandTable::builtin();
        let cmd = Command::from_parts(parts.iter().map(|s| Bytes::from(s.to_string())));
        let handler = table.get(&cmd.verb()).expect("command registered");
        handler(&cmd, storage)
    }

    #[test]
    fn test_builtin_table() {
        let table = CommandTable::builtin();
        for verb in ["COMMAND", "PING", "ECHO", "SET", "GET", "DEL", "EXPIRE"] {
            assert!(table.get(verb).is_some(), "{} missing", verb);
        }
        assert!(table.get("FOO").is_none());
        assert!(table.get("get").is_none());
        assert!(CommandTable::empty().is_empty());
    }

    #[test]
    fn test_ping_with_message() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["PING"]), Ok(RespValue::pong()));
        assert_eq!(
            run(&storage, &["PING", "hello"]),
            Ok(RespValue::bulk_string(Bytes::from("hello")))
        );
        assert!(run(&storage, &["PING", "a", "b"]).is_err());
    }

    #[test]
    fn test_echo_requires_one_argument() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["ECHO"]), Err(Error::wrong_arity("ECHO")));
        assert_eq!(
            run(&storage, &["ECHO", "a", "b"]),
            Err(Error::wrong_arity("ECHO"))
        );
    }

    #[test]
    fn test_set_arity() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["SET"]), Err(Error::wrong_arity("SET")));
        assert_eq!(run(&storage, &["SET", "k"]), Err(Error::wrong_arity("SET")));
    }

    #[test]
    fn test_set_option_errors() {
        let storage = StorageEngine::new();

        assert!(matches!(
            run(&storage, &["SET", "k", "v", "EX"]),
            Err(Error::InvalidArgument(msg)) if msg.contains("not enough arguments")
        ));
        assert!(matches!(
            run(&storage, &["SET", "k", "v", "KEEPTTL", "1"]),
            Err(Error::InvalidArgument(msg)) if msg.contains("invalid time unit")
        ));
        assert!(matches!(
            run(&storage, &["SET", "k", "v", "EX", "soon"]),
            Err(Error::InvalidArgument(msg)) if msg.contains("not a valid float")
        ));
        assert!(matches!(
            run(&storage, &["SET", "k", "v", "EX", "1", "NX"]),
            Err(Error::InvalidArgument(msg)) if msg == "syntax error"
        ));
        assert!(matches!(
            run(&storage, &["SET", "k", "v", "EX", "inf"]),
            Err(Error::InvalidArgument(msg)) if msg.contains("invalid expire time")
        ));
    }

    #[test]
    fn test_set_option_count_checked_before_write() {
        let storage = StorageEngine::new();

        assert!(matches!(
            run(&storage, &["SET", "a", "v", "EX", "1", "NX"]),
            Err(Error::InvalidArgument(msg)) if msg == "syntax error"
        ));
        assert!(matches!(
            run(&storage, &["SET", "b", "v", "PX"]),
            Err(Error::InvalidArgument(msg)) if msg.contains("not enough arguments")
        ));
        assert!(storage.is_empty());

        // A bad unit is seen only after the write.
        assert!(run(&storage, &["SET", "c", "v", "KEEPTTL", "1"]).is_err());
        assert_eq!(storage.get(b"c"), Some(Bytes::from("v")));
        assert_eq!(storage.ttl(b"c"), Ttl::Persistent);
    }

    #[test]
    fn test_set_unit_is_case_insensitive() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["SET", "k", "v", "px", "1500"]), Ok(RespValue::ok()));
        assert!(matches!(storage.ttl(b"k"), Ttl::Expires(d) if d <= Duration::from_millis(1500)));
    }

    #[test]
    fn test_set_with_fractional_ex() {
        let storage = StorageEngine::new();
        run(&storage, &["SET", "k", "v", "EX", "0.25"]).unwrap();
        assert!(matches!(storage.ttl(b"k"), Ttl::Expires(d) if d <= Duration::from_millis(250)));
    }

    #[test]
    fn test_non_positive_ttl_expires_now() {
        let storage = StorageEngine::new();
        storage.set(Bytes::from("a"), Bytes::from("1"));
        storage.set(Bytes::from("b"), Bytes::from("2"));

        assert_eq!(run(&storage, &["EXPIRE", "a", "0"]), Ok(RespValue::ok()));
        assert_eq!(run(&storage, &["EXPIRE", "b", "-5"]), Ok(RespValue::ok()));
        assert_eq!(storage.get(b"a"), None);
        assert_eq!(storage.get(b"b"), None);
    }

    #[test]
    fn test_expire_bad_number() {
        let storage = StorageEngine::new();
        storage.set(Bytes::from("k"), Bytes::from("v"));
        assert!(run(&storage, &["EXPIRE", "k", "ten"]).is_err());
        assert_eq!(run(&storage, &["EXPIRE", "k"]), Err(Error::wrong_arity("EXPIRE")));
        assert_eq!(storage.ttl(b"k"), Ttl::Persistent);
    }

    #[test]
    fn test_ttl_and_pttl() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["TTL", "k"]), Ok(RespValue::integer(-2)));

        storage.set(Bytes::from("k"), Bytes::from("v"));
        assert_eq!(run(&storage, &["PTTL", "k"]), Ok(RespValue::integer(-1)));

        run(&storage, &["PEXPIRE", "k", "1500"]).unwrap();
        assert_eq!(run(&storage, &["TTL", "k"]), Ok(RespValue::integer(2)));
        match run(&storage, &["PTTL", "k"]) {
            Ok(RespValue::Integer(ms)) => assert!(ms > 1400 && ms <= 1500),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_persist_and_exists() {
        let storage = StorageEngine::new();
        storage.set(Bytes::from("k"), Bytes::from("v"));

        assert_eq!(run(&storage, &["PERSIST", "k"]), Ok(RespValue::integer(0)));
        run(&storage, &["EXPIRE", "k", "10"]).unwrap();
        assert_eq!(run(&storage, &["PERSIST", "k"]), Ok(RespValue::integer(1)));

        assert_eq!(
            run(&storage, &["EXISTS", "k", "k", "nope"]),
            Ok(RespValue::integer(2))
        );
    }

    #[test]
    fn test_dbsize() {
        let storage = StorageEngine::new();
        assert_eq!(run(&storage, &["DBSIZE"]), Ok(RespValue::integer(0)));
        run(&storage, &["SET", "a", "1"]).unwrap();
        run(&storage, &["SET", "b", "2"]).unwrap();
        assert_eq!(run(&storage, &["DBSIZE"]), Ok(RespValue::integer(2)));
    }
}
