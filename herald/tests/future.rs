use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use herald::future::{from_fn, from_runnable, from_visitor};
use herald::{
    cancel_all, same_thread, Awaitable, Cancellable, Cause, ExecutorRef, FixedThreadPool,
    FutureError, FutureVisitor, ObservableFuture, RunnableFuture,
};

#[derive(Debug)]
struct Boom(&'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn first_transition_wins_and_the_rest_are_noops() {
    let future = ObservableFuture::<i32>::pending();
    assert!(!future.is_done());

    assert!(future.complete(42));
    assert!(!future.complete(43));
    assert!(!future.fail(Boom("late")));
    assert!(!future.cancel(false));

    assert!(future.is_done());
    assert!(future.is_successful());
    assert!(!future.is_failed());
    assert!(!future.is_cancelled());
    assert_eq!(future.result().unwrap(), 42);
    assert_eq!(future.get().unwrap(), 42);
}

#[test]
fn exactly_one_disposition_predicate_holds_when_done() {
    let success = ObservableFuture::successful(1);
    let failed = ObservableFuture::<i32>::failed(Boom("x"));
    let cancelled = ObservableFuture::<i32>::cancelled();
    for future in [&success, &failed, &cancelled] {
        assert!(future.is_done());
        let dispositions = [
            future.is_successful(),
            future.is_failed(),
            future.is_cancelled(),
        ];
        assert_eq!(dispositions.iter().filter(|d| **d).count(), 1);
    }
}

#[test]
fn get_surfaces_failure_and_cancellation() {
    let failed = ObservableFuture::<i32>::pending();
    assert!(failed.fail(Boom("E0")));
    match failed.get() {
        Err(FutureError::Failed(cause)) => assert_eq!(cause.to_string(), "boom: E0"),
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(failed.failure().unwrap().to_string(), "boom: E0");

    let cancelled = ObservableFuture::<i32>::pending();
    assert!(cancelled.cancel(false));
    assert!(matches!(cancelled.get(), Err(FutureError::Cancelled)));
}

#[test]
fn state_accessors_refuse_the_wrong_state() {
    let pending = ObservableFuture::<i32>::pending();
    assert!(matches!(
        pending.result(),
        Err(FutureError::IllegalState(_))
    ));
    assert!(matches!(
        pending.failure(),
        Err(FutureError::IllegalState(_))
    ));

    let success = ObservableFuture::successful(5);
    assert!(matches!(
        success.failure(),
        Err(FutureError::IllegalState(_))
    ));
}

#[test]
fn visit_requires_a_terminal_future() {
    struct Recording {
        seen: Vec<String>,
    }

    impl FutureVisitor<i32> for Recording {
        fn successful(&mut self, value: &i32) {
            self.seen.push(format!("ok:{}", value));
        }

        fn failed(&mut self, cause: &Cause) {
            self.seen.push(format!("err:{}", cause));
        }
    }

    let mut visitor = Recording { seen: Vec::new() };

    let pending = ObservableFuture::<i32>::pending();
    assert!(matches!(
        pending.visit(&mut visitor),
        Err(FutureError::IllegalState(_))
    ));

    ObservableFuture::successful(7).visit(&mut visitor).unwrap();
    ObservableFuture::<i32>::failed(Boom("v"))
        .visit(&mut visitor)
        .unwrap();
    // the default cancelled() delegates to failed() with the cancellation
    // cause
    ObservableFuture::<i32>::cancelled()
        .visit(&mut visitor)
        .unwrap();

    assert_eq!(
        visitor.seen,
        vec!["ok:7", "err:boom: v", "err:cancelled"]
    );
}

#[test]
fn listeners_on_three_executors_all_observe_success() {
    let pool_a: ExecutorRef = Arc::new(FixedThreadPool::with_threads(1));
    let pool_b: ExecutorRef = Arc::new(FixedThreadPool::with_threads(1));
    let future = ObservableFuture::<i32>::pending();
    let (tx, rx) = mpsc::channel();
    for ctx in [Arc::clone(&pool_a), Arc::clone(&pool_b), same_thread()] {
        let tx = tx.clone();
        future.add_listener(
            move |done| {
                tx.send(done.result().unwrap()).unwrap();
            },
            ctx,
        );
    }

    assert!(future.complete(42));
    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}

#[test]
fn listeners_before_and_after_completion_each_fire_once() {
    let future = ObservableFuture::<i32>::pending();
    let calls = Arc::new(AtomicUsize::new(0));

    let before = Arc::clone(&calls);
    future.add_listener(
        move |done| {
            assert_eq!(done.failure().unwrap().to_string(), "boom: E0");
            before.fetch_add(1, Ordering::SeqCst);
        },
        same_thread(),
    );

    assert!(future.fail(Boom("E0")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // late registration dispatches inline on its executor
    let after = Arc::clone(&calls);
    future.add_listener(
        move |done| {
            assert_eq!(done.failure().unwrap().to_string(), "boom: E0");
            after.fetch_add(1, Ordering::SeqCst);
        },
        same_thread(),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn a_panicking_listener_does_not_reach_the_completing_thread() {
    let future = ObservableFuture::<i32>::pending();
    let ran_after = Arc::new(AtomicBool::new(false));
    future.add_listener(|_| panic!("listener bug"), same_thread());
    let flag = Arc::clone(&ran_after);
    future.add_listener(
        move |_| {
            flag.store(true, Ordering::SeqCst);
        },
        same_thread(),
    );

    // the panic is swallowed by the dispatch loop
    assert!(future.complete(1));
    assert!(ran_after.load(Ordering::SeqCst));
}

#[test]
fn blocking_get_wakes_when_another_thread_completes() {
    let future = ObservableFuture::<&'static str>::pending();
    let completer = thread::spawn({
        let future = future.clone();
        move || {
            thread::sleep(Duration::from_millis(30));
            assert!(future.complete("ready"));
        }
    });
    assert_eq!(future.get().unwrap(), "ready");
    completer.join().unwrap();
}

#[test]
fn bounded_waits_time_out_without_touching_the_future() {
    let future = ObservableFuture::<i32>::pending();
    let limit = Duration::from_millis(40);

    assert!(matches!(future.get_within(limit), Err(FutureError::Timeout(_))));
    assert_eq!(future.await_completion_for(limit).unwrap(), false);
    assert!(!future.await_uninterruptibly_for(limit));
    assert!(!future.is_done());

    // the future is still perfectly completable afterwards
    assert!(future.complete(9));
    assert_eq!(future.get_within(limit).unwrap(), 9);
}

#[test]
fn interrupt_wakes_an_interruptible_wait() {
    let future = ObservableFuture::<i32>::pending();
    let slot: Arc<Mutex<Option<herald::interrupt::InterruptHandle>>> =
        Arc::new(Mutex::new(None));
    let waiter = thread::spawn({
        let future = future.clone();
        let slot = Arc::clone(&slot);
        move || {
            *slot.lock().unwrap() = Some(herald::interrupt::current());
            future.await_completion()
        }
    });
    let handle = loop {
        if let Some(handle) = slot.lock().unwrap().clone() {
            break handle;
        }
        thread::sleep(Duration::from_millis(1));
    };
    handle.interrupt();
    assert!(matches!(waiter.join().unwrap(), Err(FutureError::Interrupted)));
    // the wait was abandoned, the future untouched
    assert!(!future.is_done());
}

#[test]
fn can_be_awaited_from_async_code() {
    let future = ObservableFuture::<String>::pending();
    let completer = thread::spawn({
        let future = future.clone();
        move || {
            thread::sleep(Duration::from_millis(20));
            assert!(future.complete("done".to_string()));
        }
    });
    assert_eq!(futures::executor::block_on(future.clone()).unwrap(), "done");
    completer.join().unwrap();
}

#[test]
fn runnable_future_runs_at_most_once() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let runnable = Arc::new(RunnableFuture::from_supplier({
        let invocations = Arc::clone(&invocations);
        move || {
            invocations.fetch_add(1, Ordering::SeqCst);
            77
        }
    }));
    let threads: Vec<_> = (0..3)
        .map(|_| {
            let runnable = Arc::clone(&runnable);
            thread::spawn(move || runnable.run())
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(runnable.future().get().unwrap(), 77);

    // running again after completion is a no-op
    runnable.run();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[test]
fn cancelled_before_run_means_the_producer_never_runs() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let runnable = RunnableFuture::from_supplier({
        let invocations = Arc::clone(&invocations);
        move || {
            invocations.fetch_add(1, Ordering::SeqCst);
            1
        }
    });
    assert!(runnable.cancel(false));
    runnable.run();
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert!(runnable.future().is_cancelled());
}

#[test]
fn cancel_with_interrupt_reaches_the_running_producer() {
    let started = Arc::new(AtomicBool::new(false));
    let unblocked = Arc::new(AtomicBool::new(false));
    let runnable = Arc::new(RunnableFuture::from_supplier({
        let started = Arc::clone(&started);
        let unblocked = Arc::clone(&unblocked);
        move || {
            started.store(true, Ordering::SeqCst);
            while !herald::interrupt::requested() {
                thread::sleep(Duration::from_millis(1));
            }
            unblocked.store(true, Ordering::SeqCst);
            13
        }
    }));
    let runner = thread::spawn({
        let runnable = Arc::clone(&runnable);
        move || runnable.run()
    });
    assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst)));

    assert!(runnable.cancel(true));
    runner.join().unwrap();

    assert!(unblocked.load(Ordering::SeqCst));
    // the producer's late return value was discarded
    assert!(runnable.future().is_cancelled());
    assert!(!runnable.future().is_successful());
}

#[test]
fn a_panicking_producer_becomes_a_failure() {
    let runnable = RunnableFuture::<i32>::from_supplier(|| panic!("kaboom"));
    runnable.run();
    let future = runnable.future();
    assert!(future.is_failed());
    assert!(future.failure().unwrap().to_string().contains("kaboom"));
}

#[test]
fn listener_adapters_cover_visitor_consumer_and_runnable() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    struct Push(Arc<Mutex<Vec<String>>>);

    impl FutureVisitor<i32> for Push {
        fn successful(&mut self, value: &i32) {
            self.0.lock().unwrap().push(format!("visited:{}", value));
        }

        fn failed(&mut self, cause: &Cause) {
            self.0.lock().unwrap().push(format!("visited-err:{}", cause));
        }
    }

    let future = ObservableFuture::<i32>::pending();
    future.add_listener(from_visitor(Push(Arc::clone(&seen))), same_thread());
    future.add_listener(
        from_fn({
            let seen = Arc::clone(&seen);
            move |outcome: Result<i32, FutureError>| {
                seen.lock().unwrap().push(format!("consumed:{}", outcome.unwrap()));
            }
        }),
        same_thread(),
    );
    future.add_listener(
        from_runnable({
            let seen = Arc::clone(&seen);
            move || seen.lock().unwrap().push("ran".to_string())
        }),
        same_thread(),
    );

    assert!(future.complete(3));
    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["consumed:3", "ran", "visited:3"]);
}

#[test]
fn cancelling_a_group_ors_the_individual_results() {
    let a = ObservableFuture::<i32>::pending();
    let b = ObservableFuture::<i32>::pending();
    let done = ObservableFuture::successful(1);

    let group: Vec<&ObservableFuture<i32>> = vec![&a, &b, &done];
    assert!(cancel_all(group.clone(), false));
    assert!(a.is_cancelled());
    assert!(b.is_cancelled());
    assert!(done.is_successful());

    // idempotent: a second sweep transitions nothing
    assert!(!cancel_all(group, false));
}
