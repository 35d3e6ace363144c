//! Host scheduler abstraction
//!
//! The engine never blocks. Waiting between steps is expressed as "run this
//! callback after N ticks" on a [`Scheduler`]; how long a tick lasts is the
//! host's business.
//!
//! Two implementations are provided:
//!
//! - [`ManualScheduler`]: a virtual tick clock driven by the host (call
//!   [`ManualScheduler::tick`] from the host's main loop) or by tests
//! - [`TokioScheduler`]: ticks of fixed wall-clock length on a tokio runtime

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

/// A callback handed to a scheduler
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation handle for a scheduled task
pub trait TaskHandle: Send + Sync {
    /// Prevent the task from running if it has not started yet
    fn cancel(&self);
}

/// "Run this callback after N ticks"
///
/// The task must not run inside the `schedule` call itself. A
/// multi-threaded implementation such as [`TokioScheduler`] may still run
/// it on another thread before the returned handle reaches the caller;
/// callers must tolerate a handle whose task already ran.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay_ticks: u64, task: ScheduledTask) -> Box<dyn TaskHandle>;
}

// ── Manual Scheduler ─────────────────────────────────────────────────

struct ManualQueue {
    now: u64,
    next_id: u64,
    /// Keyed by (due tick, insertion order)
    tasks: BTreeMap<(u64, u64), ScheduledTask>,
}

/// Virtual tick clock; tasks run synchronously inside [`tick`](Self::tick)
#[derive(Clone)]
pub struct ManualScheduler {
    queue: Arc<Mutex<ManualQueue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(ManualQueue {
                now: 0,
                next_id: 0,
                tasks: BTreeMap::new(),
            })),
        }
    }

    /// Current virtual tick
    pub fn now(&self) -> u64 {
        self.lock().now
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Advance the clock by one tick and run every task that is due
    ///
    /// Returns the number of tasks run. Tasks scheduled while ticking run
    /// on a later tick.
    pub fn tick(&self) -> usize {
        let now = {
            let mut queue = self.lock();
            queue.now += 1;
            queue.now
        };

        let mut ran = 0;
        loop {
            // Release the lock before running: tasks reschedule themselves
            let next = {
                let mut queue = self.lock();
                match queue.tasks.keys().next().copied() {
                    Some(key) if key.0 <= now => queue.tasks.remove(&key),
                    _ => None,
                }
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    /// Advance the clock by `ticks`, returning the number of tasks run
    pub fn advance(&self, ticks: u64) -> usize {
        (0..ticks).map(|_| self.tick()).sum()
    }

    /// Tick until no task is pending or `max_ticks` have passed
    ///
    /// Returns the number of ticks advanced.
    pub fn run_until_idle(&self, max_ticks: u64) -> u64 {
        let mut ticks = 0;
        while ticks < max_ticks && self.pending() > 0 {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay_ticks: u64, task: ScheduledTask) -> Box<dyn TaskHandle> {
        let mut queue = self.lock();
        let key = (queue.now + delay_ticks.max(1), queue.next_id);
        queue.next_id += 1;
        queue.tasks.insert(key, task);
        Box::new(ManualTaskHandle {
            key,
            queue: Arc::downgrade(&self.queue),
        })
    }
}

struct ManualTaskHandle {
    key: (u64, u64),
    queue: Weak<Mutex<ManualQueue>>,
}

impl TaskHandle for ManualTaskHandle {
    fn cancel(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tasks
                .remove(&self.key);
        }
    }
}

// ── Tokio Scheduler ──────────────────────────────────────────────────

/// Runs tasks on a tokio runtime after `delay_ticks * tick` of wall-clock time
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
    tick: Duration,
}

impl TokioScheduler {
    pub fn new(runtime: tokio::runtime::Handle, tick: Duration) -> Self {
        Self { runtime, tick }
    }

    /// Use the runtime of the calling context
    pub fn try_current(tick: Duration) -> Result<Self, tokio::runtime::TryCurrentError> {
        Ok(Self::new(tokio::runtime::Handle::try_current()?, tick))
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay_ticks: u64, task: ScheduledTask) -> Box<dyn TaskHandle> {
        let ticks = u32::try_from(delay_ticks.max(1)).unwrap_or(u32::MAX);
        let delay = self.tick.saturating_mul(ticks);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Box::new(TokioTaskHandle(handle))
    }
}

struct TokioTaskHandle(tokio::task::JoinHandle<()>);

impl TaskHandle for TokioTaskHandle {
    fn cancel(&self) {
        self.0.abort();
    }
}
