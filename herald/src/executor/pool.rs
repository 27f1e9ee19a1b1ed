use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::RejectedError;
use crate::executor::{Executor, Task};

/// The host thread pool: a fixed number of named workers draining one FIFO
/// queue.
///
/// This is the "plain executor" collaborator the rest of the crate builds on;
/// wrap it in an [`ObservableExecutor`](crate::executor::ObservableExecutor)
/// to get futures out of submissions.
pub struct FixedThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    queue: VecDeque<Task>,
    shutdown: bool,
}

impl FixedThreadPool {
    /// A pool with one worker per CPU.
    pub fn new() -> FixedThreadPool {
        Self::with_threads(num_cpus::get())
    }

    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn with_threads(threads: usize) -> FixedThreadPool {
        assert!(threads > 0, "thread count must be positive");
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("herald-pool-{}", i))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        FixedThreadPool {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Refuse new submissions, drain the tasks already queued, and join the
    /// workers. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.available.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Default for FixedThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for FixedThreadPool {
    fn execute(&self, task: Task) -> Result<(), RejectedError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Err(RejectedError::new("thread pool is shut down"));
        }
        state.queue.push_back(task);
        self.shared.available.notify_one();
        Ok(())
    }
}

impl Drop for FixedThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                state = shared.available.wait(state).unwrap();
            }
        };
        // a panicking task must not take the worker down with it
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::warn!("pool task panicked; worker continues");
        }
    }
}
