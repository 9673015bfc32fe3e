//! Idle timers for syncers.
//!
//! A single worker thread sleeps until the earliest deadline and runs the
//! due task without holding the timer lock. Timers are periodic: after
//! firing, a timer is rearmed one interval later until it is unregistered.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::ServiceResult;

/// Identifies a registered timer.
pub type TimerId = u64;

/// Work run when a timer fires.
pub type TimerTask = Arc<dyn Fn() + Send + Sync>;

struct TimerEntry {
    deadline: Instant,
    interval: Duration,
    task: TimerTask,
}

#[derive(Default)]
struct TimerState {
    next_id: TimerId,
    entries: HashMap<TimerId, TimerEntry>,
    queue: BTreeSet<(Instant, TimerId)>,
    shutdown: bool,
}

impl TimerState {
    fn schedule(&mut self, id: TimerId, deadline: Instant) {
        if let Some(entry) = self.entries.get_mut(&id) {
            self.queue.remove(&(entry.deadline, id));
            entry.deadline = deadline;
            self.queue.insert((deadline, id));
        }
    }
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Periodic timer service with one worker thread.
pub struct SyncerTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SyncerTimer {
    /// Starts the worker thread.
    pub fn start() -> ServiceResult<Self> {
        let shared = Arc::new(TimerShared::default());
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("rdbsync-timer".into())
            .spawn(move || run(&worker_shared))?;
        Ok(Self {
            shared,
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Registers `task` to run every `interval`, first after one interval.
    pub fn register(&self, task: TimerTask, interval: Duration) -> TimerId {
        let mut state = self.shared.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let deadline = Instant::now() + interval;
        state.entries.insert(
            id,
            TimerEntry {
                deadline,
                interval,
                task,
            },
        );
        state.queue.insert((deadline, id));
        drop(state);
        self.shared.wake.notify_one();
        id
    }

    /// Pushes the next firing of `id` one full interval into the future.
    /// Returns false if the timer is not registered.
    pub fn reset(&self, id: TimerId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(interval) = state.entries.get(&id).map(|entry| entry.interval) else {
            return false;
        };
        state.schedule(id, Instant::now() + interval);
        drop(state);
        self.shared.wake.notify_one();
        true
    }

    /// Cancels `id`. Returns false if it was not registered.
    pub fn unregister(&self, id: TimerId) -> bool {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.entries.remove(&id) else {
            return false;
        };
        state.queue.remove(&(entry.deadline, id));
        true
    }

    /// Number of registered timers.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Returns true if no timer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the worker. Pending timers never fire.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.entries.clear();
            state.queue.clear();
        }
        self.shared.wake.notify_all();
        if thread::current().id() == self.worker_id {
            // the worker exits once the running task returns
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncerTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SyncerTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncerTimer")
            .field("timers", &self.len())
            .finish()
    }
}

fn run(shared: &TimerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(&(deadline, id)) = state.queue.first() else {
            shared.wake.wait(&mut state);
            continue;
        };
        if deadline > Instant::now() {
            shared.wake.wait_until(&mut state, deadline);
            continue;
        }
        state.queue.remove(&(deadline, id));
        let Some(entry) = state.entries.get_mut(&id) else {
            continue;
        };
        let task = Arc::clone(&entry.task);
        entry.deadline = Instant::now() + entry.interval;
        let next = entry.deadline;
        state.queue.insert((next, id));

        drop(state);
        tracing::trace!(timer = id, "timer fired");
        task();
        state = shared.state.lock();
    }
    tracing::debug!("timer worker stopped");
}
