use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use herald::executor::{
    ContextPropagator, InterceptingExecutor, Interceptor, PropagatingExecutor, WrappingExecutor,
};
use herald::{
    same_thread, Awaitable, Executor, ExecutorRef, FixedThreadPool, FutureError,
    ObservableExecutor, Task,
};

#[derive(Debug)]
struct Boom(&'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

fn ok(value: i32) -> Result<i32, Boom> {
    Ok(value)
}

#[test]
fn same_thread_runs_inline() {
    let submitter = thread::current().id();
    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    same_thread()
        .execute(Box::new(move || {
            *slot.lock().unwrap() = Some(thread::current().id());
        }))
        .unwrap();
    // complete before execute() returned, on the submitting thread
    assert_eq!(observed.lock().unwrap().unwrap(), submitter);
}

#[test]
fn submissions_become_observable_futures() {
    let pool: ExecutorRef = Arc::new(FixedThreadPool::with_threads(2));
    let executor = ObservableExecutor::new(pool);

    let future = executor.submit(|| ok(41));
    assert_eq!(future.get().unwrap(), 41);

    let failed = executor.submit(|| -> Result<i32, Boom> { Err(Boom("nope")) });
    failed.await_uninterruptibly();
    assert!(failed.is_failed());
    assert_eq!(failed.failure().unwrap().to_string(), "boom: nope");

    let panicked = executor.submit(|| -> Result<i32, Boom> { panic!("worker bug") });
    panicked.await_uninterruptibly();
    assert!(panicked.is_failed());
    assert!(panicked
        .failure()
        .unwrap()
        .to_string()
        .contains("worker bug"));
}

#[test]
fn rejection_surfaces_on_the_returned_future() {
    let pool = Arc::new(FixedThreadPool::with_threads(1));
    pool.shutdown();
    let executor = ObservableExecutor::new(pool);

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let future = executor.submit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ok(1)
    });
    assert!(future.is_failed());
    assert!(future.failure().unwrap().to_string().contains("rejected"));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn invoke_all_returns_one_future_per_producer() {
    let pool: ExecutorRef = Arc::new(FixedThreadPool::with_threads(4));
    let executor = ObservableExecutor::new(pool);
    let futures = executor.invoke_all((0..8).map(|i| move || ok(i)).collect());
    let values: Vec<i32> = futures.iter().map(|f| f.get().unwrap()).collect();
    assert_eq!(values, (0..8).collect::<Vec<_>>());
}

#[test]
fn invoke_any_returns_the_first_success_and_cancels_the_rest() {
    let pool: ExecutorRef = Arc::new(FixedThreadPool::with_threads(3));
    let executor = ObservableExecutor::new(pool);
    let producers: Vec<fn() -> Result<&'static str, Boom>> = vec![
        || {
            thread::sleep(Duration::from_millis(200));
            Ok("slow")
        },
        || Ok("fast"),
        || Err(Boom("broken")),
    ];
    let value = executor.invoke_any(producers).unwrap();
    assert_eq!(value, "fast");
}

#[test]
fn invoke_any_fails_only_when_every_producer_failed() {
    let pool: ExecutorRef = Arc::new(FixedThreadPool::with_threads(2));
    let executor = ObservableExecutor::new(pool);
    let producers: Vec<fn() -> Result<i32, Boom>> = vec![|| Err(Boom("a")), || Err(Boom("b"))];
    let outcome = executor.invoke_any(producers);
    assert!(matches!(outcome, Err(FutureError::Failed(_))));
}

#[test]
fn wrapping_executor_rewrites_every_task() {
    let wrapped_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wrapped_count);
    let wrapper = move |task: Task| -> Task {
        let counter = Arc::clone(&counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            task();
        })
    };
    let executor = WrappingExecutor::new(same_thread(), Arc::new(wrapper));

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let ran = Arc::clone(&ran);
        executor
            .execute(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
    }
    assert_eq!(wrapped_count.load(Ordering::SeqCst), 3);
    assert_eq!(ran.load(Ordering::SeqCst), 3);
}

struct Bracketing {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Interceptor for Bracketing {
    fn intercept(&self, _delegate: &ExecutorRef, task: Task) {
        self.log.lock().unwrap().push(format!("{}:enter", self.name));
        task();
        self.log.lock().unwrap().push(format!("{}:exit", self.name));
    }
}

#[test]
fn interceptors_compose_outer_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = InterceptingExecutor::new(
        same_thread(),
        vec![
            Arc::new(Bracketing {
                name: "outer",
                log: Arc::clone(&log),
            }),
            Arc::new(Bracketing {
                name: "inner",
                log: Arc::clone(&log),
            }),
        ],
    );
    let task_log = Arc::clone(&log);
    executor
        .execute(Box::new(move || {
            task_log.lock().unwrap().push("task".to_string());
        }))
        .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["outer:enter", "inner:enter", "task", "inner:exit", "outer:exit"]
    );
}

/// A fake ambient context: one global slot standing in for a thread-local
/// tracing id or security principal.
struct SlotPropagator {
    name: &'static str,
    slot: Arc<Mutex<Option<String>>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ContextPropagator for SlotPropagator {
    fn capture(&self) -> Box<dyn std::any::Any + Send> {
        Box::new(self.slot.lock().unwrap().clone())
    }

    fn install(&self, snapshot: Box<dyn std::any::Any + Send>) -> Box<dyn std::any::Any + Send> {
        self.log.lock().unwrap().push(format!("{}:install", self.name));
        let snapshot = *snapshot.downcast::<Option<String>>().unwrap();
        let previous = std::mem::replace(&mut *self.slot.lock().unwrap(), snapshot);
        Box::new(previous)
    }

    fn restore(&self, token: Box<dyn std::any::Any + Send>) {
        self.log.lock().unwrap().push(format!("{}:restore", self.name));
        let previous = *token.downcast::<Option<String>>().unwrap();
        *self.slot.lock().unwrap() = previous;
    }
}

#[test]
fn propagators_install_in_order_and_restore_in_reverse() {
    let slot_a = Arc::new(Mutex::new(Some("submit-a".to_string())));
    let slot_b = Arc::new(Mutex::new(Some("submit-b".to_string())));
    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = PropagatingExecutor::new(
        same_thread(),
        vec![
            Arc::new(SlotPropagator {
                name: "a",
                slot: Arc::clone(&slot_a),
                log: Arc::clone(&log),
            }),
            Arc::new(SlotPropagator {
                name: "b",
                slot: Arc::clone(&slot_b),
                log: Arc::clone(&log),
            }),
        ],
    );

    // disturb the "worker side" context after capture, then check the task
    // sees the submit-site values
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (check_a, check_b, task_seen) = (Arc::clone(&slot_a), Arc::clone(&slot_b), Arc::clone(&seen));
    let task: Task = Box::new(move || {
        task_seen
            .lock()
            .unwrap()
            .push(check_a.lock().unwrap().clone());
        task_seen
            .lock()
            .unwrap()
            .push(check_b.lock().unwrap().clone());
    });
    *slot_a.lock().unwrap() = Some("worker-a".to_string());
    *slot_b.lock().unwrap() = Some("worker-b".to_string());
    executor.execute(task).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some("submit-a".to_string()), Some("submit-b".to_string())]
    );
    assert_eq!(
        *log.lock().unwrap(),
        vec!["a:install", "b:install", "b:restore", "a:restore"]
    );
    // the worker-side values were put back on exit
    assert_eq!(*slot_a.lock().unwrap(), Some("worker-a".to_string()));
    assert_eq!(*slot_b.lock().unwrap(), Some("worker-b".to_string()));
}

#[test]
fn pool_shutdown_is_idempotent_and_rejects_later_submissions() {
    let pool = FixedThreadPool::with_threads(2);
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let ran = Arc::clone(&ran);
        pool.execute(Box::new(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }
    pool.shutdown();
    pool.shutdown();
    // queued tasks drained before the workers exited
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    assert!(pool.execute(Box::new(|| {})).is_err());
}
