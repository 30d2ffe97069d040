//! # Spindle - An In-Memory Key-Value Server with Timing-Wheel Expiry
//!
//! Spindle speaks the request side of RESP (arrays of bulk strings) and
//! stores binary-safe keys and values in memory. Keys with a time-to-live
//! are removed by a hashed timing wheel rather than by a periodic scan.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Spindle                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│ Dispatcher  │                  │
//! │  │ (server.rs) │    │  Session    │    │ + Table     │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   RESP      │    │              StorageEngine                   │    │
//! │  │   Codec     │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │  └─────────────┘    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                        ▲ expiry callbacks               │
//! │                     ┌──────────────────┴──────────────────────────┐     │
//! │                     │   TimingWheel  (driven by a Tokio task)     │     │
//! │                     └─────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use spindle::{Dispatcher, ServerConfig, StorageEngine, TimingWheel};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!
//!     let wheel = Arc::new(TimingWheel::new(config.wheel));
//!     let driver = wheel.start()?;
//!
//!     let storage = Arc::new(StorageEngine::with_wheel(wheel));
//!     let dispatcher = Dispatcher::with_builtin(storage);
//!
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!     spindle::server::run(listener, dispatcher, &config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     driver.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `COMMAND`
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`
//! - `DEL key [key ...]`
//! - `EXISTS key [key ...]`
//! - `EXPIRE key seconds` / `PEXPIRE key milliseconds`
//! - `TTL key` / `PTTL key`
//! - `PERSIST key`
//! - `DBSIZE`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP request decoding and reply encoding
//! - [`timer`]: Hashed timing wheel and its Tokio driver
//! - [`storage`]: Sharded keyspace with wheel-driven expiry
//! - [`commands`]: Command table and dispatcher
//! - [`connection`]: Per-client session loop
//! - [`server`]: Accept loop and graceful shutdown
//!
//! ## Expiry
//!
//! Every TTL schedules one wheel callback. The callback removes the key only
//! if the entry still carries the generation it was armed for, so a `SET`,
//! `DEL` or new `EXPIRE` that races with the wheel always wins. Reads also
//! compare the stored deadline, which hides a key the wheel has not reached
//! yet.

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod timer;

pub use commands::Dispatcher;
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use error::{Error, Result};
pub use protocol::{Command, ParseError, RespValue};
pub use storage::{StorageEngine, Ttl};
pub use timer::{TimerHandle, TimingWheel, WheelConfig, WheelDriver};

/// The default port Spindle listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host Spindle binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of Spindle
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
