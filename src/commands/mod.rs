//! Command Processing
//!
//! Receives parsed [`Command`](crate::protocol::Command)s, runs them against
//! the storage engine and returns reply values.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  verb → handler via CommandTable
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```

pub mod dispatcher;
pub mod handler;

pub use dispatcher::Dispatcher;
pub use handler::{CommandTable, Handler};
