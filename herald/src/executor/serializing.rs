use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::RejectedError;
use crate::executor::{Executor, ExecutorRef, Task};
use crate::future::{ObservableFuture, RunnableFuture};

/// Per-key FIFO over an arbitrary delegate executor.
///
/// Tasks submitted under the same key run in submission order, one at a time;
/// tasks under different keys may run concurrently (up to the delegate's
/// parallelism). Each key keeps a queue plus a "drain scheduled" bit, both
/// guarded by one map lock: a submission only schedules a drain on the
/// delegate when it flips the bit, and the drain pops tasks until the queue
/// is empty and then retires the key. Emptiness and retirement are decided
/// under the same lock submissions take, so a racing submission either lands
/// in a queue whose drain is still running or re-creates the key and flips
/// the bit itself.
pub struct SerializingExecutor<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for SerializingExecutor<K> {
    fn clone(&self) -> Self {
        SerializingExecutor {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<K> {
    delegate: ExecutorRef,
    keys: Mutex<HashMap<K, KeyQueue>>,
}

struct KeyQueue {
    tasks: VecDeque<Task>,
    drain_scheduled: bool,
}

impl KeyQueue {
    fn new() -> KeyQueue {
        KeyQueue {
            tasks: VecDeque::new(),
            drain_scheduled: false,
        }
    }
}

impl<K> SerializingExecutor<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(delegate: ExecutorRef) -> SerializingExecutor<K> {
        SerializingExecutor {
            shared: Arc::new(Shared {
                delegate,
                keys: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enqueue `task` under `key`. An `Err` means neither this task nor a
    /// drain could be handed to the delegate; the key's queue is dropped.
    pub fn execute(&self, key: K, task: Task) -> Result<(), RejectedError> {
        let schedule_drain = {
            let mut keys = self.shared.keys.lock().unwrap();
            let entry = keys.entry(key.clone()).or_insert_with(KeyQueue::new);
            entry.tasks.push_back(task);
            if entry.drain_scheduled {
                false
            } else {
                entry.drain_scheduled = true;
                true
            }
        };
        if !schedule_drain {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let drain_key = key.clone();
        let drain: Task = Box::new(move || shared.drain(&drain_key));
        if let Err(rejected) = self.shared.delegate.execute(drain) {
            let dropped = {
                let mut keys = self.shared.keys.lock().unwrap();
                keys.remove(&key).map(|q| q.tasks.len()).unwrap_or(0)
            };
            log::warn!(
                "delegate rejected serialized drain; dropping {} queued task(s) for the key",
                dropped
            );
            return Err(rejected);
        }
        Ok(())
    }

    /// Like [`execute`](Self::execute), but observable: the producer's
    /// outcome is reported through the returned future.
    pub fn submit<V, F, E>(&self, key: K, producer: F) -> ObservableFuture<V>
    where
        V: Send + Sync + 'static,
        F: FnOnce() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let runnable = Arc::new(RunnableFuture::new(producer));
        let future = runnable.future();
        let task: Task = Box::new(move || runnable.run());
        if let Err(rejected) = self.execute(key, task) {
            future.fail(rejected);
        }
        future
    }

    /// An executor bound to one key: everything submitted through it is
    /// serialized under `key`.
    pub fn executor_for(&self, key: K) -> ExecutorRef {
        Arc::new(KeyBound {
            key,
            parent: self.clone(),
        })
    }
}

impl<K> Shared<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn drain(&self, key: &K) {
        loop {
            let task = {
                let mut keys = self.keys.lock().unwrap();
                let Some(entry) = keys.get_mut(key) else {
                    return;
                };
                match entry.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        // submissions push under this same lock, so the queue
                        // cannot refill before the key retires here; the next
                        // submission re-creates it and schedules a fresh drain
                        keys.remove(key);
                        return;
                    }
                }
            };
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                log::warn!("serialized task panicked; continuing with the key's queue");
            }
        }
    }
}

struct KeyBound<K> {
    key: K,
    parent: SerializingExecutor<K>,
}

impl<K> Executor for KeyBound<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        self.parent.execute(self.key.clone(), task)
    }
}
