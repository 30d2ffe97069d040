//! Storage Engine Module
//!
//! The in-memory keyspace: a sharded map of byte-string keys to values with
//! per-key TTL. Expiry is driven by the [`crate::timer`] wheel, one timer per
//! key with a TTL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ expiry callbacks
//!              ┌─────────────┴─────────────┐
//!              │       TimingWheel         │
//!              │  (driven by WheelDriver)  │
//!              └───────────────────────────┘
//! ```

pub mod engine;

pub use engine::{StorageEngine, StorageStats, Ttl};
