//! Background Wheel Driver
//!
//! Advances a [`TimingWheel`] once per tick from a Tokio task. The driver is
//! the only thing that moves the cursor in a running server; callers just
//! schedule and cancel.
//!
//! The loop sleeps between ticks and wakes early only for shutdown. Ticks
//! missed while the runtime was busy are caught up on the next wake, since
//! each wake advances the wheel to the current time rather than by one
//! bucket.

use crate::timer::wheel::TimingWheel;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// The wheel already has a driver.
    #[error("timing wheel driver already started")]
    AlreadyStarted,
}

/// A handle to the running driver.
///
/// When this handle is dropped, the driver task will be stopped. Pending
/// timers stay in the wheel but no longer fire.
#[derive(Debug)]
pub struct WheelDriver {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TimingWheel {
    /// Spawns the driving loop on the current Tokio runtime.
    ///
    /// A wheel can be started once; later calls fail with
    /// [`TimerError::AlreadyStarted`], even after the first driver stopped.
    pub fn start(self: &Arc<Self>) -> Result<WheelDriver, TimerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TimerError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(driver_loop(Arc::clone(self), shutdown_rx));

        info!(
            tick_us = self.tick().as_micros() as u64,
            buckets = self.size(),
            "Timing wheel driver started"
        );

        Ok(WheelDriver {
            shutdown_tx,
            task: Some(task),
        })
    }
}

impl WheelDriver {
    /// Signals the loop to exit. Returns immediately.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signals the loop and waits for it to finish. No callback runs after
    /// this returns.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Timing wheel driver stopped");
    }
}

impl Drop for WheelDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn driver_loop(wheel: Arc<TimingWheel>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(wheel.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fired = wheel.advance_to(Instant::now());
                if fired > 0 {
                    trace!(fired, "Timers fired");
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Timing wheel driver received shutdown signal");
                    return;
                }
            }
        }
    }
}
