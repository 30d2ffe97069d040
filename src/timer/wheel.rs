//! Bucketed Timing Wheel
//!
//! A fixed ring of `size` buckets, each covering one `tick`. Time is
//! measured in whole ticks since the wheel's origin. Scheduling a task
//! computes the first tick at or after its deadline and drops the task into
//! bucket `tick % size`; every time the cursor reaches a bucket it fires the
//! tasks whose tick has arrived and leaves the rest for a later revolution.
//!
//! ```text
//!              cursor
//!                │
//!   ┌────┬────┬──▼─┬────┬────┬────┬────┬────┐
//!   │ b0 │ b1 │ b2 │ b3 │ b4 │ b5 │ b6 │ b7 │
//!   └────┴────┴────┴────┴────┴────┴────┴────┘
//!     t=8      t=2                 t=6
//!     t=16     t=10
//! ```
//!
//! Scheduling and cancelling are O(1). A task never fires before its
//! deadline and, as long as the wheel is advanced every tick, fires within
//! one tick of it.
//!
//! ## Cancellation
//!
//! Each task carries an atomic state: `PENDING`, `FIRED` or `CANCELLED`.
//! Firing and cancelling both compare-and-set away from `PENDING`, so
//! exactly one of them wins. Cancelled tasks stay in their bucket until the
//! cursor next passes and are discarded then.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Callback run when a timer fires.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Smallest tick the wheel accepts.
const MIN_TICK: Duration = Duration::from_micros(100);

/// Shape of a timing wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelConfig {
    /// Duration covered by one bucket (default: 1ms)
    pub tick: Duration,

    /// Number of buckets in the ring (default: 1000)
    pub size: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1),
            size: 1000,
        }
    }
}

struct TimerTask {
    expiration_tick: u64,
    state: AtomicU8,
    callback: Mutex<Option<Callback>>,
}

impl TimerTask {
    /// Claims the task for firing. Returns the callback only if no cancel
    /// got there first.
    fn try_fire(&self) -> Option<Callback> {
        self.state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        lock(&self.callback).take()
    }

    fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            // Release whatever the closure captured right away.
            drop(lock(&self.callback).take());
        }
        won
    }

    fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

/// Handle to a scheduled timer.
///
/// Cloning shares the same timer. Dropping a handle does not cancel it.
#[derive(Clone)]
pub struct TimerHandle {
    task: Arc<TimerTask>,
}

impl TimerHandle {
    /// Prevents the callback from running.
    ///
    /// Returns `true` if this call cancelled the timer, `false` if it had
    /// already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    /// Returns true while the timer has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.task.is_pending()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.task.state.load(Ordering::Acquire) {
            PENDING => "pending",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_struct("TimerHandle")
            .field("expiration_tick", &self.task.expiration_tick)
            .field("state", &state)
            .finish()
    }
}

struct WheelState {
    buckets: Vec<Vec<Arc<TimerTask>>>,
    /// Last tick whose bucket has been processed.
    current_tick: u64,
    /// Tasks held by the buckets, including cancelled ones not yet swept.
    scheduled: usize,
}

impl WheelState {
    /// Fires due tasks in bucket `index` as of `now_tick` and drops
    /// cancelled ones. Callbacks are collected into `due`, not run.
    fn drain_bucket(&mut self, index: usize, now_tick: u64, due: &mut Vec<Callback>) {
        let tasks = std::mem::take(&mut self.buckets[index]);
        let mut keep = Vec::with_capacity(tasks.len());

        for task in tasks {
            if !task.is_pending() {
                self.scheduled -= 1;
            } else if task.expiration_tick <= now_tick {
                self.scheduled -= 1;
                if let Some(callback) = task.try_fire() {
                    due.push(callback);
                }
            } else {
                keep.push(task);
            }
        }

        self.buckets[index] = keep;
    }
}

/// A timing wheel scheduler.
///
/// The wheel itself never sleeps. Something has to call
/// [`TimingWheel::advance_to`] regularly; [`TimingWheel::start`] spawns a
/// Tokio task that does so once per tick.
///
/// # Example
///
/// ```
/// use spindle::timer::{TimingWheel, WheelConfig};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let wheel = TimingWheel::new(WheelConfig::default());
/// let fired = Arc::new(AtomicBool::new(false));
///
/// let flag = Arc::clone(&fired);
/// let handle = wheel.after_func(Duration::from_millis(5), move || {
///     flag.store(true, Ordering::SeqCst);
/// });
///
/// wheel.advance_to(Instant::now() + Duration::from_millis(10));
/// assert!(fired.load(Ordering::SeqCst));
/// assert!(!handle.cancel());
/// ```
pub struct TimingWheel {
    tick: Duration,
    size: usize,
    origin: Instant,
    state: Mutex<WheelState>,
    pub(super) started: AtomicBool,
}

impl fmt::Debug for TimingWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimingWheel")
            .field("tick", &self.tick)
            .field("size", &self.size)
            .field("scheduled", &self.scheduled())
            .finish()
    }
}

impl Default for TimingWheel {
    fn default() -> Self {
        Self::new(WheelConfig::default())
    }
}

impl TimingWheel {
    /// Creates a wheel. Ticks below 100µs and a size of zero are raised to
    /// the minimum.
    pub fn new(config: WheelConfig) -> Self {
        let size = config.size.max(1);
        Self {
            tick: config.tick.max(MIN_TICK),
            size,
            origin: Instant::now(),
            state: Mutex::new(WheelState {
                buckets: (0..size).map(|_| Vec::new()).collect(),
                current_tick: 0,
                scheduled: 0,
            }),
            started: AtomicBool::new(false),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `callback` roughly `delay` from now.
    pub fn after_func<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let tick = match now.checked_add(delay) {
            Some(deadline) => self.tick_at_or_after(deadline),
            None => u64::MAX,
        };
        self.insert(tick, Box::new(callback))
    }

    /// Runs `callback` once the wheel has been advanced past `deadline`.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.insert(self.tick_at_or_after(deadline), Box::new(callback))
    }

    fn insert(&self, tick: u64, callback: Callback) -> TimerHandle {
        let mut state = lock(&self.state);

        // Deadlines already behind the cursor fire on the next advance.
        let expiration_tick = tick.max(state.current_tick.saturating_add(1));
        let task = Arc::new(TimerTask {
            expiration_tick,
            state: AtomicU8::new(PENDING),
            callback: Mutex::new(Some(callback)),
        });

        let index = self.bucket_index(expiration_tick);
        state.buckets[index].push(Arc::clone(&task));
        state.scheduled += 1;

        TimerHandle { task }
    }

    /// Advances the cursor through every tick that has fully elapsed by
    /// `now`, firing due timers. Returns the number of callbacks run.
    ///
    /// Callbacks run on the calling thread after the wheel lock is released,
    /// so they may schedule or cancel timers themselves.
    pub fn advance_to(&self, now: Instant) -> usize {
        let target = self.tick_at_or_before(now);
        let mut due = Vec::new();

        {
            let mut state = lock(&self.state);
            if target <= state.current_tick {
                return 0;
            }

            if target - state.current_tick >= self.size as u64 {
                // A full revolution or more behind: every bucket is due.
                for index in 0..self.size {
                    state.drain_bucket(index, target, &mut due);
                }
            } else {
                for tick in state.current_tick + 1..=target {
                    let index = self.bucket_index(tick);
                    state.drain_bucket(index, tick, &mut due);
                }
            }

            state.current_tick = target;
        }

        let fired = due.len();
        for callback in due {
            callback();
        }
        fired
    }

    /// Number of tasks held by the buckets. Cancelled tasks count until the
    /// cursor next passes their bucket.
    pub fn scheduled(&self) -> usize {
        lock(&self.state).scheduled
    }

    #[inline]
    fn bucket_index(&self, tick: u64) -> usize {
        (tick % self.size as u64) as usize
    }

    fn tick_at_or_after(&self, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(self.origin).as_nanos();
        saturate(elapsed.div_ceil(self.tick.as_nanos()))
    }

    fn tick_at_or_before(&self, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(self.origin).as_nanos();
        saturate(elapsed / self.tick.as_nanos())
    }
}

#[inline]
fn saturate(ticks: u128) -> u64 {
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Locks a mutex, recovering the guard if a previous holder panicked.
/// Every critical section here leaves the state consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wheel(tick_ms: u64, size: usize) -> TimingWheel {
        TimingWheel::new(WheelConfig {
            tick: Duration::from_millis(tick_ms),
            size,
        })
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_fires_no_earlier_than_deadline() {
        let wheel = wheel(10, 8);
        let origin = wheel.origin;
        let (count, callback) = counter();

        wheel.schedule_at(origin + Duration::from_millis(25), callback);

        assert_eq!(wheel.advance_to(origin + Duration::from_millis(29)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(wheel.advance_to(origin + Duration::from_millis(30)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.scheduled(), 0);
    }

    #[test]
    fn test_deadline_beyond_one_revolution() {
        let wheel = wheel(10, 8);
        let origin = wheel.origin;
        let (count, callback) = counter();

        // Tick 20 shares bucket 4 with ticks 4 and 12.
        wheel.schedule_at(origin + Duration::from_millis(200), callback);

        wheel.advance_to(origin + Duration::from_millis(45));
        wheel.advance_to(origin + Duration::from_millis(125));
        wheel.advance_to(origin + Duration::from_millis(199));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        wheel.advance_to(origin + Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_catch_up_after_long_gap() {
        let wheel = wheel(1, 4);
        let origin = wheel.origin;
        let (early, early_cb) = counter();
        let (late, late_cb) = counter();

        wheel.schedule_at(origin + Duration::from_millis(3), early_cb);
        wheel.schedule_at(origin + Duration::from_millis(50), late_cb);

        wheel.advance_to(origin + Duration::from_millis(40));
        assert_eq!(early.load(Ordering::SeqCst), 1);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        wheel.advance_to(origin + Duration::from_millis(50));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_past_deadline_fires_on_next_tick() {
        let wheel = wheel(10, 8);
        let origin = wheel.origin;
        wheel.advance_to(origin + Duration::from_millis(50));

        let (count, callback) = counter();
        wheel.schedule_at(origin, callback);

        wheel.advance_to(origin + Duration::from_millis(59));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        wheel.advance_to(origin + Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_callback() {
        let wheel = wheel(10, 8);
        let origin = wheel.origin;
        let (count, callback) = counter();

        let handle = wheel.schedule_at(origin + Duration::from_millis(20), callback);
        assert!(handle.is_pending());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.is_pending());

        assert_eq!(wheel.advance_to(origin + Duration::from_millis(100)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.scheduled(), 0);
    }

    #[test]
    fn test_cancel_after_fire_reports_false() {
        let wheel = wheel(10, 8);
        let origin = wheel.origin;
        let (_, callback) = counter();

        let handle = wheel.schedule_at(origin + Duration::from_millis(10), callback);
        wheel.advance_to(origin + Duration::from_millis(10));
        assert!(!handle.cancel());
    }

    #[test]
    fn test_cancel_races_fire_exactly_once() {
        for _ in 0..200 {
            let wheel = Arc::new(wheel(1, 16));
            let (count, callback) = counter();
            let handle = wheel.schedule_at(wheel.origin, callback);
            let far = wheel.origin + Duration::from_secs(1);

            let cancelled = std::thread::scope(|s| {
                let driver = Arc::clone(&wheel);
                s.spawn(move || driver.advance_to(far));
                s.spawn(|| handle.cancel()).join().unwrap()
            });

            let fired = count.load(Ordering::SeqCst);
            assert_eq!(fired + usize::from(cancelled), 1);
        }
    }

    #[test]
    fn test_callback_may_reschedule() {
        let wheel = Arc::new(wheel(10, 8));
        let origin = wheel.origin;
        let (count, callback) = counter();

        let inner = Arc::clone(&wheel);
        wheel.schedule_at(origin + Duration::from_millis(10), move || {
            inner.schedule_at(origin + Duration::from_millis(30), callback);
        });

        wheel.advance_to(origin + Duration::from_millis(10));
        assert_eq!(wheel.scheduled(), 1);
        wheel.advance_to(origin + Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_degenerate_config_is_clamped() {
        let wheel = TimingWheel::new(WheelConfig {
            tick: Duration::ZERO,
            size: 0,
        });
        assert_eq!(wheel.size(), 1);
        assert_eq!(wheel.tick(), MIN_TICK);

        let (count, callback) = counter();
        wheel.after_func(Duration::ZERO, callback);
        wheel.advance_to(Instant::now() + Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
