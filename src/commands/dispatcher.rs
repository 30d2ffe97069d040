//! Command Dispatcher
//!
//! Looks up a command's verb in the shared [`CommandTable`] and runs its
//! handler against the storage engine. Unknown verbs come back as
//! [`Error::UnknownCommand`]; the dispatcher never writes an error reply
//! itself.
//!
//! ```text
//! frame ──parse──> Command ──table lookup──> Handler ──> RespValue ──> bytes
//! ```

use crate::commands::handler::CommandTable;
use crate::error::{Error, Result};
use crate::protocol::{self, Command, RespValue};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

/// Routes commands to handlers. Cheap to clone; every connection gets one.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<CommandTable>,
    storage: Arc<StorageEngine>,
}

impl Dispatcher {
    pub fn new(table: Arc<CommandTable>, storage: Arc<StorageEngine>) -> Self {
        Self { table, storage }
    }

    /// A dispatcher over the built-in command table.
    pub fn with_builtin(storage: Arc<StorageEngine>) -> Self {
        Self::new(Arc::new(CommandTable::builtin()), storage)
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Runs `command` and returns its reply value.
    pub fn execute(&self, command: &Command) -> Result<RespValue> {
        let verb = command.verb();
        let handler = self
            .table
            .get(&verb)
            .ok_or_else(|| Error::UnknownCommand(verb.clone()))?;

        trace!(command = %verb, args = command.args().len(), "Dispatching command");
        handler(command, &self.storage)
    }

    /// Runs `command` and returns the serialized reply.
    pub fn handle(&self, command: &Command) -> Result<Bytes> {
        self.execute(command).map(|reply| reply.serialize())
    }

    /// Parses one complete frame and runs it.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Bytes> {
        let command = protocol::parse(frame)?;
        self.handle(&command)
    }
}
