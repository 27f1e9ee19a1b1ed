use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::clock;
use crate::error::RejectedError;
use crate::schedule::definition::{DefinitionCore, TaskDefinition, TaskHandle};

/// Work the queue hands to a worker once an entry is due. Implemented by the
/// definition core, which knows its value type; the queue itself is untyped.
pub(crate) trait ScheduledWork: Send + Sync {
    /// Run the due occurrence: pre-run lifecycle check, producer execution,
    /// post-completion bookkeeping and rescheduling. `index` identifies the
    /// occurrence the queue entry was created for; an entry whose occurrence
    /// is no longer the definition's pending one is stale and ignored.
    fn run_due(self: Arc<Self>, engine: &Arc<EngineCore>, index: u64);

    /// Engine shutdown: cancel the pending (never-started) occurrence and
    /// finish the definition.
    fn discard_pending(&self);
}

/// One pending occurrence in the delay queue.
///
/// Ordered by `(scheduled start, definition ordinal, instance index)`, a
/// stable total order, so ties between definitions break by submission order
/// and ties within one definition by occurrence order.
pub(crate) struct QueueEntry {
    start: u64,
    ordinal: u64,
    index: u64,
    revoked: Arc<AtomicBool>,
    work: Arc<dyn ScheduledWork>,
}

impl QueueEntry {
    pub(crate) fn new(
        start: u64,
        ordinal: u64,
        index: u64,
        revoked: Arc<AtomicBool>,
        work: Arc<dyn ScheduledWork>,
    ) -> QueueEntry {
        QueueEntry {
            start,
            ordinal,
            index,
            revoked,
            work,
        }
    }

    fn key(&self) -> (u64, u64, u64) {
        (self.start, self.ordinal, self.index)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

pub(crate) struct EngineCore {
    queue: Mutex<EngineState>,
    available: Condvar,
}

struct EngineState {
    // BinaryHeap is a max-heap; Reverse turns it into the earliest-deadline
    // queue the workers block on
    heap: BinaryHeap<Reverse<QueueEntry>>,
    shutdown: bool,
}

impl EngineCore {
    pub(crate) fn enqueue(&self, entry: QueueEntry) -> Result<(), RejectedError> {
        let mut state = self.queue.lock().unwrap();
        if state.shutdown {
            return Err(RejectedError::new("scheduled task engine is shut down"));
        }
        state.heap.push(Reverse(entry));
        // any single worker can serve the new head
        self.available.notify_one();
        Ok(())
    }
}

/// The managed scheduled-task engine: accepts [`TaskDefinition`]s, runs their
/// occurrences on a fixed worker pool at their scheduled times, and drives
/// each definition's lifecycle state machine.
///
/// Occurrences of a single definition are strictly sequenced: a successor is
/// never enqueued until its predecessor completes. Across definitions no
/// ordering is guaranteed beyond earliest-deadline-first dispatch.
pub struct ScheduledTaskEngine {
    core: Arc<EngineCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ordinals: AtomicU64,
}

impl ScheduledTaskEngine {
    /// An engine with one worker per CPU.
    pub fn new() -> ScheduledTaskEngine {
        Self::with_pool_size(num_cpus::get())
    }

    /// # Panics
    ///
    /// Panics if `pool_size` is zero.
    pub fn with_pool_size(pool_size: usize) -> ScheduledTaskEngine {
        assert!(pool_size > 0, "pool size must be positive");
        let core = Arc::new(EngineCore {
            queue: Mutex::new(EngineState {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let workers = (0..pool_size)
            .map(|i| {
                let core = Arc::clone(&core);
                thread::Builder::new()
                    .name(format!("herald-sched-{}", i))
                    .spawn(move || worker_loop(&core))
                    .expect("failed to spawn scheduler worker")
            })
            .collect();
        ScheduledTaskEngine {
            core,
            workers: Mutex::new(workers),
            ordinals: AtomicU64::new(0),
        }
    }

    /// Submit a definition; its first occurrence is due after the configured
    /// initial delay. Fails once the engine has shut down.
    pub fn submit<V: Send + Sync + 'static>(
        &self,
        definition: TaskDefinition<V>,
    ) -> Result<TaskHandle<V>, RejectedError> {
        let ordinal = self.ordinals.fetch_add(1, Ordering::Relaxed);
        let core = DefinitionCore::from_definition(
            ordinal,
            clock::now_nanos(),
            definition,
            Arc::downgrade(&self.core),
        );
        core.start_first(&self.core)?;
        Ok(TaskHandle::new(core))
    }

    /// Refuse new submissions, cancel pending (never-started) occurrences,
    /// let running ones finish, and join the workers. Idempotent.
    pub fn shutdown(&self) {
        let entries: Vec<QueueEntry> = {
            let mut state = self.core.queue.lock().unwrap();
            if state.shutdown {
                Vec::new()
            } else {
                state.shutdown = true;
                state.heap.drain().map(|Reverse(entry)| entry).collect()
            }
        };
        self.core.available.notify_all();
        for entry in entries {
            if !entry.revoked.load(Ordering::Acquire) {
                entry.work.discard_pending();
            }
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        if !workers.is_empty() {
            log::debug!("scheduled task engine shutting down; joining workers");
        }
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Default for ScheduledTaskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScheduledTaskEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopWork;

    impl ScheduledWork for NoopWork {
        fn run_due(self: Arc<Self>, _engine: &Arc<EngineCore>, _index: u64) {}

        fn discard_pending(&self) {}
    }

    fn entry(start: u64, ordinal: u64, index: u64) -> QueueEntry {
        QueueEntry::new(
            start,
            ordinal,
            index,
            Arc::new(AtomicBool::new(false)),
            Arc::new(NoopWork),
        )
    }

    #[test]
    fn entries_order_by_start_then_ordinal_then_index() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(entry(200, 0, 0)));
        heap.push(Reverse(entry(100, 1, 0)));
        heap.push(Reverse(entry(100, 0, 2)));
        heap.push(Reverse(entry(100, 0, 1)));
        let order: Vec<(u64, u64, u64)> =
            std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.key())).collect();
        assert_eq!(
            order,
            vec![(100, 0, 1), (100, 0, 2), (100, 1, 0), (200, 0, 0)]
        );
    }
}

fn worker_loop(core: &Arc<EngineCore>) {
    loop {
        let entry = {
            let mut state = core.queue.lock().unwrap();
            loop {
                let now = clock::now_nanos();
                let head_start = state.heap.peek().map(|Reverse(entry)| entry.start);
                match head_start {
                    Some(start) if start <= now => {
                        let Reverse(entry) = state.heap.pop().expect("peeked head vanished");
                        break entry;
                    }
                    Some(start) => {
                        let wait = clock::until(start, now);
                        state = core.available.wait_timeout(state, wait).unwrap().0;
                    }
                    None => {
                        if state.shutdown {
                            return;
                        }
                        state = core.available.wait(state).unwrap();
                    }
                }
            }
        };
        if entry.revoked.load(Ordering::Acquire) {
            // tombstone left behind by pause() or cancel()
            continue;
        }
        // a panicking policy or predicate aborts its own definition, never
        // the worker
        let work = Arc::clone(&entry.work);
        if panic::catch_unwind(AssertUnwindSafe(|| work.run_due(core, entry.index))).is_err() {
            log::warn!("scheduled work panicked; abandoning that definition");
        }
    }
}
