//! Error types for command processing
//!
//! Codec and dispatcher failures reach the connection as an [`Error`]. The
//! connection decides what to do with each kind; see
//! [`crate::connection`] for the reply policy.

use crate::protocol::{ParseError, RespValue};
use thiserror::Error;

/// Everything that can go wrong between receiving a frame and producing a
/// reply.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The frame could not be decoded. Nothing from it was executed.
    #[error("Protocol error: {0}")]
    MalformedFrame(#[from] ParseError),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong arity, unparsable number or unsupported option.
    #[error("{0}")]
    InvalidArgument(String),

    /// Reserved for backing stores that can fail. The in-memory engine
    /// never produces it.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// The standard arity error for `command`.
    pub fn wrong_arity(command: &str) -> Self {
        Error::InvalidArgument(format!(
            "wrong number of arguments for '{}' command",
            command.to_ascii_lowercase()
        ))
    }

    /// Returns true if the connection must be closed after reporting this
    /// error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MalformedFrame(_))
    }

    /// Renders the error as a `-ERR ...` reply.
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(format!("ERR {}", self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_replies() {
        assert_eq!(
            Error::UnknownCommand("FOO".into()).to_resp(),
            RespValue::error("ERR unknown command 'FOO'")
        );
        assert_eq!(
            Error::wrong_arity("ECHO").to_resp(),
            RespValue::error("ERR wrong number of arguments for 'echo' command")
        );
        assert_eq!(
            Error::from(ParseError::EmptyCommand).to_resp(),
            RespValue::error("ERR Protocol error: empty command")
        );
    }

    #[test]
    fn test_error_reply_stays_on_one_line() {
        let reply = Error::UnknownCommand("FOO\r\n+OK".into()).to_resp().serialize();
        assert_eq!(&reply[..], b"-ERR unknown command 'FOO  +OK'\r\n");
    }

    #[test]
    fn test_only_malformed_frames_are_fatal() {
        assert!(Error::MalformedFrame(ParseError::Incomplete).is_fatal());
        assert!(!Error::UnknownCommand("FOO".into()).is_fatal());
        assert!(!Error::invalid_argument("syntax error").is_fatal());
        assert!(!Error::StorageFailure("disk".into()).is_fatal());
    }
}
