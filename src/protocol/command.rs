//! Parsed client commands.

use crate::protocol::types::RespValue;
use bytes::Bytes;
use std::fmt;

/// A request decoded from one frame: the verb followed by its arguments.
///
/// Immutable once parsed. The verb keeps the client's casing; lookups go
/// through [`Command::verb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: Bytes,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Builds a command from string-ish parts. Mostly useful in tests and
    /// client code.
    ///
    /// ```
    /// use spindle::protocol::Command;
    /// let cmd = Command::from_parts(["SET", "foo", "bar"]);
    /// assert_eq!(cmd.verb(), "SET");
    /// assert_eq!(cmd.args().len(), 2);
    /// ```
    pub fn from_parts<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        let mut parts = parts.into_iter().map(Into::into);
        let name = parts.next().unwrap_or_default();
        Self {
            name,
            args: parts.collect(),
        }
    }

    /// The raw verb bytes as sent by the client.
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// The verb, uppercased. Non-UTF-8 bytes are replaced lossily.
    pub fn verb(&self) -> String {
        String::from_utf8_lossy(&self.name).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Encodes the command as a request frame (`*<n>` array of bulk strings).
    pub fn to_frame(&self) -> Bytes {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(RespValue::BulkString(self.name.clone()));
        parts.extend(self.args.iter().cloned().map(RespValue::BulkString));
        RespValue::Array(parts).serialize()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb())?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}
