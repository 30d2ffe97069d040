//! Timer Scheduling
//!
//! A timing wheel for "run this after D" requests, plus the Tokio task that
//! drives it. The storage engine uses it to delete keys when their TTL runs
//! out; nothing in here knows about keys.
//!
//! ## Example
//!
//! ```ignore
//! use spindle::timer::{TimingWheel, WheelConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let wheel = Arc::new(TimingWheel::new(WheelConfig::default()));
//! let driver = wheel.start()?;
//!
//! let handle = wheel.after_func(Duration::from_secs(1), || println!("tick"));
//! handle.cancel();
//!
//! driver.shutdown().await;
//! ```

pub mod driver;
pub mod wheel;

pub use driver::{TimerError, WheelDriver};
pub use wheel::{Callback, TimerHandle, TimingWheel, WheelConfig};
