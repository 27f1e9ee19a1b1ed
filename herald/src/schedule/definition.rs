use std::collections::VecDeque;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use smallvec::SmallVec;

use crate::cancel::Cancellable;
use crate::clock;
use crate::error::{Cause, RejectedError};
use crate::executor::{ExecutorRef, Task};
use crate::future::RunnableFuture;
use crate::schedule::engine::{EngineCore, QueueEntry, ScheduledWork};
use crate::schedule::instance::TaskInstance;
use crate::schedule::policy::Rescheduler;

type ProducerFn<V> = Box<dyn FnMut() -> Result<V, Cause> + Send>;
type SchedulePredicate<V> = Arc<dyn Fn(&TaskInstance<V>) -> bool + Send + Sync>;

/// A listener invoked with each completed [`TaskInstance`] of a definition.
pub(crate) type InstanceListener<V> = Arc<dyn Fn(Arc<TaskInstance<V>>) + Send + Sync>;

/// What to do with the series after a failed occurrence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PolicyDecision {
    Abort,
    Continue,
}

/// How a definition reacts to a failed occurrence.
pub enum ExceptionPolicy<V> {
    /// Stop the series on the first failure. The default.
    Abort,
    /// Keep scheduling despite failures.
    Continue,
    /// Ask the handler, once per failed occurrence.
    Custom(Arc<dyn Fn(&TaskInstance<V>) -> PolicyDecision + Send + Sync>),
}

/// Identifies a listener registered on a [`TaskHandle`], for removal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

/// Immutable recipe for a (possibly recurring) scheduled job.
///
/// Built with one of the producer constructors plus the builder methods, then
/// handed to [`ScheduledTaskEngine::submit`](crate::schedule::ScheduledTaskEngine::submit).
pub struct TaskDefinition<V> {
    producer: ProducerFn<V>,
    initial_delay: Duration,
    rescheduler: Option<Arc<dyn Rescheduler<V>>>,
    should_schedule_next: Option<SchedulePredicate<V>>,
    exception_policy: ExceptionPolicy<V>,
    history_size: usize,
    listeners: Vec<(InstanceListener<V>, ExecutorRef)>,
}

const DEFAULT_HISTORY_SIZE: usize = 16;

impl<V: Send + Sync + 'static> TaskDefinition<V> {
    fn with_producer(producer: ProducerFn<V>) -> TaskDefinition<V> {
        TaskDefinition {
            producer,
            initial_delay: Duration::ZERO,
            rescheduler: None,
            should_schedule_next: None,
            exception_policy: ExceptionPolicy::Abort,
            history_size: DEFAULT_HISTORY_SIZE,
            listeners: Vec::new(),
        }
    }

    /// A definition around a fallible producer.
    pub fn calling<F, E>(mut producer: F) -> TaskDefinition<V>
    where
        F: FnMut() -> Result<V, E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::with_producer(Box::new(move || producer().map_err(crate::error::cause)))
    }

    /// A definition around an infallible producer.
    pub fn supplying<F>(mut supplier: F) -> TaskDefinition<V>
    where
        F: FnMut() -> V + Send + 'static,
    {
        Self::with_producer(Box::new(move || Ok(supplier())))
    }

    /// A definition around a runnable plus the constant value each successful
    /// occurrence reports.
    pub fn running<F>(mut runnable: F, value: V) -> TaskDefinition<V>
    where
        F: FnMut() + Send + 'static,
        V: Clone,
    {
        Self::with_producer(Box::new(move || {
            runnable();
            Ok(value.clone())
        }))
    }

    /// Delay before the first occurrence. Default: none.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Make the task recurring under `policy`. Without a rescheduler the task
    /// runs once.
    pub fn rescheduler<R>(mut self, policy: R) -> Self
    where
        R: Rescheduler<V> + 'static,
    {
        self.rescheduler = Some(Arc::new(policy));
        self
    }

    /// Consulted after every completion; returning `false` ends the series.
    pub fn should_schedule_next<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskInstance<V>) -> bool + Send + Sync + 'static,
    {
        self.should_schedule_next = Some(Arc::new(predicate));
        self
    }

    /// How failures affect the series. Default: [`ExceptionPolicy::Abort`].
    pub fn exception_policy(mut self, policy: ExceptionPolicy<V>) -> Self {
        self.exception_policy = policy;
        self
    }

    /// How many completed occurrences to retain, newest first. Default: 16.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn history_size(mut self, size: usize) -> Self {
        assert!(size >= 1, "history size must be at least 1");
        self.history_size = size;
        self
    }

    /// Register a per-occurrence listener at submit time. Repeatable.
    pub fn listener<F>(mut self, listener: F, ctx: ExecutorRef) -> Self
    where
        F: Fn(Arc<TaskInstance<V>>) + Send + Sync + 'static,
    {
        self.listeners.push((Arc::new(listener), ctx));
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    Active,
    Paused,
    Cancelled,
    Finished,
}

struct ListenerEntry<V> {
    id: ListenerId,
    listener: InstanceListener<V>,
    ctx: ExecutorRef,
}

/// The mutable lifecycle of a submitted definition, guarded by one coarse
/// lock. Counters, history and the current-instance slot always change
/// together under it.
struct Lifecycle<V> {
    status: Status,
    cancelled: bool,
    execution_count: u64,
    success_count: u64,
    failure_count: u64,
    cancelled_count: u64,
    instances_created: u64,
    history: VecDeque<Arc<TaskInstance<V>>>,
    current: Option<Arc<TaskInstance<V>>>,
    // revocation flag shared with the pending queue entry; raising it turns
    // the entry into a tombstone the workers skip
    queue_token: Option<Arc<AtomicBool>>,
    // a dequeued-but-never-started instance parked by pause()
    paused_pending: Option<Arc<TaskInstance<V>>>,
    // scheduled start of the occurrence that completed while paused
    resume_basis: Option<u64>,
    finish_cause: Option<Cause>,
    listeners: Vec<ListenerEntry<V>>,
    next_listener_id: u64,
}

pub(crate) struct DefinitionCore<V> {
    ordinal: u64,
    submitted_at: u64,
    engine: Weak<EngineCore>,
    producer: Mutex<ProducerFn<V>>,
    rescheduler: Option<Arc<dyn Rescheduler<V>>>,
    should_schedule_next: Option<SchedulePredicate<V>>,
    exception_policy: ExceptionPolicy<V>,
    history_size: usize,
    initial_delay: Duration,
    state: Mutex<Lifecycle<V>>,
}

impl<V: Send + Sync + 'static> DefinitionCore<V> {
    pub(crate) fn from_definition(
        ordinal: u64,
        submitted_at: u64,
        definition: TaskDefinition<V>,
        engine: Weak<EngineCore>,
    ) -> Arc<DefinitionCore<V>> {
        let mut listeners = Vec::with_capacity(definition.listeners.len());
        let mut next_listener_id = 0;
        for (listener, ctx) in definition.listeners {
            listeners.push(ListenerEntry {
                id: ListenerId(next_listener_id),
                listener,
                ctx,
            });
            next_listener_id += 1;
        }
        Arc::new(DefinitionCore {
            ordinal,
            submitted_at,
            engine,
            producer: Mutex::new(definition.producer),
            rescheduler: definition.rescheduler,
            should_schedule_next: definition.should_schedule_next,
            exception_policy: definition.exception_policy,
            history_size: definition.history_size,
            initial_delay: definition.initial_delay,
            state: Mutex::new(Lifecycle {
                status: Status::Active,
                cancelled: false,
                execution_count: 0,
                success_count: 0,
                failure_count: 0,
                cancelled_count: 0,
                instances_created: 0,
                history: VecDeque::new(),
                current: None,
                queue_token: None,
                paused_pending: None,
                resume_basis: None,
                finish_cause: None,
                listeners,
                next_listener_id,
            }),
        })
    }

    /// Create and enqueue the first occurrence. Called once, at submit.
    pub(crate) fn start_first(self: &Arc<Self>, engine: &Arc<EngineCore>) -> Result<(), RejectedError> {
        let doomed = {
            let mut state = self.state.lock().unwrap();
            let start = clock::now_nanos().saturating_add(clock::duration_nanos(self.initial_delay));
            let instance = self.make_instance(start, &mut state);
            self.enqueue_instance(&mut state, instance, engine).err()
        };
        match doomed {
            None => Ok(()),
            Some(instance) => {
                instance.cancel(false);
                Err(RejectedError::new("scheduled task engine is shut down"))
            }
        }
    }

    /// Build an occurrence whose producer borrows the definition's shared
    /// producer at run time. The instance deliberately holds no strong
    /// reference back to the definition (the definition owns its instances,
    /// not the other way around).
    fn make_instance(self: &Arc<Self>, start: u64, state: &mut Lifecycle<V>) -> Arc<TaskInstance<V>> {
        let index = state.instances_created;
        state.instances_created += 1;
        let weak = Arc::downgrade(self);
        let runnable = RunnableFuture::with_cause_producer(Box::new(move || {
            match weak.upgrade() {
                Some(core) => {
                    let mut producer = core.producer.lock().unwrap();
                    let producer = &mut *producer;
                    producer()
                }
                None => Err(crate::error::cause("task definition dropped before execution")),
            }
        }));
        Arc::new(TaskInstance::new(self.ordinal, index, start, runnable))
    }

    /// Hand an occurrence to the engine's queue. On rejection the definition
    /// is finished with the rejection attached, and the doomed instance is
    /// returned so the caller can cancel it outside the lock.
    fn enqueue_instance(
        self: &Arc<Self>,
        state: &mut Lifecycle<V>,
        instance: Arc<TaskInstance<V>>,
        engine: &Arc<EngineCore>,
    ) -> Result<(), Arc<TaskInstance<V>>> {
        let token = Arc::new(AtomicBool::new(false));
        let entry = QueueEntry::new(
            instance.scheduled_start_nanos(),
            self.ordinal,
            instance.index(),
            Arc::clone(&token),
            Arc::clone(self) as Arc<dyn ScheduledWork>,
        );
        match engine.enqueue(entry) {
            Ok(()) => {
                state.current = Some(instance);
                state.queue_token = Some(token);
                Ok(())
            }
            Err(rejected) => {
                log::warn!(
                    "engine rejected occurrence {} of definition {}; finishing",
                    instance.index(),
                    self.ordinal
                );
                state.current = None;
                state.queue_token = None;
                state.finish_cause = Some(Arc::new(rejected));
                state.status = Status::Finished;
                Err(instance)
            }
        }
    }

    /// Post-completion bookkeeping and the scheduling decision. Counters,
    /// history and the decision happen under the lock; listener dispatch and
    /// instance cancellation happen after it is released.
    fn after_completion(self: &Arc<Self>, instance: &Arc<TaskInstance<V>>, engine: &Arc<EngineCore>) {
        let now = clock::now_nanos();
        instance.mark_ended(now);
        let doomed;
        let listeners: SmallVec<[(InstanceListener<V>, ExecutorRef); 4]>;
        {
            let mut state = self.state.lock().unwrap();
            state.execution_count += 1;
            let future = instance.future();
            if future.is_successful() {
                state.success_count += 1;
            } else if future.is_cancelled() {
                state.cancelled_count += 1;
            } else {
                state.failure_count += 1;
            }
            state.current = None;
            state.history.push_front(Arc::clone(instance));
            state.history.truncate(self.history_size);
            listeners = state
                .listeners
                .iter()
                .map(|entry| (Arc::clone(&entry.listener), Arc::clone(&entry.ctx)))
                .collect();
            doomed = self.decide_next(&mut state, instance, now, engine);
        }
        if let Some(instance) = doomed {
            instance.cancel(false);
        }
        for (listener, ctx) in listeners {
            notify(Arc::clone(instance), listener, ctx);
        }
    }

    fn decide_next(
        self: &Arc<Self>,
        state: &mut Lifecycle<V>,
        instance: &Arc<TaskInstance<V>>,
        now: u64,
        engine: &Arc<EngineCore>,
    ) -> Option<Arc<TaskInstance<V>>> {
        if state.cancelled || state.status == Status::Cancelled {
            self.finish(state, None);
            return None;
        }
        let future = instance.future();
        if future.is_cancelled() {
            // an explicitly cancelled occurrence terminates the series
            self.finish(state, None);
            return None;
        }
        if future.is_failed() {
            let decision = match &self.exception_policy {
                ExceptionPolicy::Abort => PolicyDecision::Abort,
                ExceptionPolicy::Continue => PolicyDecision::Continue,
                ExceptionPolicy::Custom(handler) => (**handler)(instance.as_ref()),
            };
            if decision == PolicyDecision::Abort {
                let cause = future.failure().ok();
                self.finish(state, cause);
                return None;
            }
        }
        if let Some(predicate) = &self.should_schedule_next {
            if !(**predicate)(instance.as_ref()) {
                self.finish(state, None);
                return None;
            }
        }
        let Some(rescheduler) = &self.rescheduler else {
            // one-shot task
            self.finish(state, None);
            return None;
        };
        if state.status == Status::Paused {
            // park; resume() computes the next occurrence from this one
            state.resume_basis = Some(instance.scheduled_start_nanos());
            return None;
        }
        let next_start =
            future.with_result(|last| rescheduler.next_start(instance.scheduled_start_nanos(), now, last));
        let successor = self.make_instance(next_start, state);
        log::trace!(
            "definition {}: occurrence {} scheduled at {}ns",
            self.ordinal,
            successor.index(),
            next_start
        );
        self.enqueue_instance(state, successor, engine).err()
    }

    fn finish(&self, state: &mut Lifecycle<V>, cause: Option<Cause>) {
        state.status = Status::Finished;
        state.current = None;
        if let Some(token) = state.queue_token.take() {
            token.store(true, Ordering::Release);
        }
        if state.finish_cause.is_none() {
            state.finish_cause = cause;
        }
        log::debug!("definition {} finished", self.ordinal);
    }

    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        let mut doomed: SmallVec<[Arc<TaskInstance<V>>; 2]> = SmallVec::new();
        let mut running: Option<Arc<TaskInstance<V>>> = None;
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(state.status, Status::Active | Status::Paused) {
                return false;
            }
            state.cancelled = true;
            if let Some(token) = state.queue_token.take() {
                token.store(true, Ordering::Release);
            }
            if let Some(parked) = state.paused_pending.take() {
                doomed.push(parked);
            }
            let mid_run = state.current.as_ref().map(|c| c.started()).unwrap_or(false);
            if mid_run {
                // the worker's completion pass finishes the definition
                state.status = Status::Cancelled;
                running = state.current.take();
            } else {
                if let Some(current) = state.current.take() {
                    doomed.push(current);
                }
                state.status = Status::Finished;
            }
        }
        for instance in doomed {
            instance.cancel(false);
        }
        if let Some(instance) = running {
            instance.cancel(may_interrupt);
        }
        true
    }

    pub(crate) fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status != Status::Active {
            return false;
        }
        state.status = Status::Paused;
        let pending_unstarted = state.current.as_ref().map(|c| !c.started()).unwrap_or(false);
        if pending_unstarted {
            if let Some(token) = state.queue_token.take() {
                token.store(true, Ordering::Release);
            }
            state.paused_pending = state.current.take();
        }
        // a mid-run occurrence completes normally; its completion decision
        // sees Paused and parks
        true
    }

    pub(crate) fn resume(self: &Arc<Self>) -> bool {
        let Some(engine) = self.engine.upgrade() else {
            return false;
        };
        let doomed = {
            let mut state = self.state.lock().unwrap();
            if state.status != Status::Paused {
                return false;
            }
            state.status = Status::Active;
            let now = clock::now_nanos();
            if let Some(parked) = state.paused_pending.take() {
                // the parked occurrence never ran; re-enqueue it at the
                // policy's resume slot
                let start = match &self.rescheduler {
                    Some(rescheduler) => rescheduler.resume_start(parked.scheduled_start_nanos(), now),
                    None => parked.scheduled_start_nanos(),
                };
                parked.set_scheduled_start(start);
                self.enqueue_instance(&mut state, parked, &engine).err()
            } else if let Some(basis) = state.resume_basis.take() {
                match &self.rescheduler {
                    Some(rescheduler) => {
                        let start = match state.history.front() {
                            Some(prev) => prev
                                .future()
                                .with_result(|last| rescheduler.next_start(basis, now, last)),
                            None => rescheduler.next_start(basis, now, None),
                        };
                        let successor = self.make_instance(start, &mut state);
                        self.enqueue_instance(&mut state, successor, &engine).err()
                    }
                    None => None,
                }
            } else {
                // an occurrence is still mid-run: flipping the status back is
                // enough, its completion decision will reschedule
                None
            }
        };
        if let Some(instance) = doomed {
            instance.cancel(false);
        }
        true
    }

    pub(crate) fn add_listener(&self, listener: InstanceListener<V>, ctx: ExecutorRef) -> ListenerId {
        let mut state = self.state.lock().unwrap();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push(ListenerEntry { id, listener, ctx });
        id
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.listeners.len();
        state.listeners.retain(|entry| entry.id != id);
        state.listeners.len() < before
    }
}

impl<V: Send + Sync + 'static> ScheduledWork for DefinitionCore<V> {
    fn run_due(self: Arc<Self>, engine: &Arc<EngineCore>, index: u64) {
        let instance = {
            let mut state = self.state.lock().unwrap();
            // a pause/resume cycle can leave an unrevoked entry behind for an
            // occurrence that already ran or was replaced; only the entry
            // matching the still-unstarted pending occurrence may act
            let current_matches = state
                .current
                .as_ref()
                .map(|c| c.index() == index && !c.started())
                .unwrap_or(false);
            if !current_matches {
                return;
            }
            match state.status {
                Status::Cancelled | Status::Finished => return,
                Status::Paused => {
                    // pause() raced the dequeue; park the occurrence so
                    // resume() can reuse it instead of losing it
                    if let Some(current) = state.current.take() {
                        state.paused_pending = Some(current);
                    }
                    state.queue_token = None;
                    return;
                }
                Status::Active => {
                    let Some(instance) = state.current.clone() else {
                        return;
                    };
                    instance.mark_started(clock::now_nanos());
                    state.queue_token = None;
                    instance
                }
            }
        };
        instance.run();
        self.after_completion(&instance, engine);
    }

    fn discard_pending(&self) {
        let mut doomed: SmallVec<[Arc<TaskInstance<V>>; 2]> = SmallVec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(state.status, Status::Active | Status::Paused) {
                return;
            }
            let mid_run = state.current.as_ref().map(|c| c.started()).unwrap_or(false);
            if mid_run {
                // the completion pass will fail to re-enqueue and finish the
                // definition with the rejection attached
                return;
            }
            if let Some(parked) = state.paused_pending.take() {
                doomed.push(parked);
            }
            if let Some(current) = state.current.take() {
                doomed.push(current);
            }
            if let Some(token) = state.queue_token.take() {
                token.store(true, Ordering::Release);
            }
            state.cancelled = true;
            state.status = Status::Finished;
        }
        for instance in doomed {
            instance.cancel(false);
        }
    }
}

fn notify<V: Send + Sync + 'static>(
    instance: Arc<TaskInstance<V>>,
    listener: InstanceListener<V>,
    ctx: ExecutorRef,
) {
    let task: Task = Box::new(move || {
        if panic::catch_unwind(AssertUnwindSafe(|| (*listener)(instance))).is_err() {
            log::warn!("task listener panicked; ignoring");
        }
    });
    if let Err(rejected) = ctx.execute(task) {
        log::warn!("listener executor rejected task notification: {rejected}");
    }
}

/// Handle to a submitted definition: lifecycle control plus introspection.
///
/// Handles are cheap to clone; all clones control the same definition.
/// Dropping every handle does not cancel the task; the engine keeps it alive
/// until it finishes or the engine shuts down.
pub struct TaskHandle<V> {
    core: Arc<DefinitionCore<V>>,
}

impl<V> Clone for TaskHandle<V> {
    fn clone(&self) -> Self {
        TaskHandle {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V: Send + Sync + 'static> TaskHandle<V> {
    pub(crate) fn new(core: Arc<DefinitionCore<V>>) -> TaskHandle<V> {
        TaskHandle { core }
    }

    /// Stop the series. Returns `true` iff the definition left the
    /// Active/Paused states because of this call. With `may_interrupt`, a
    /// mid-run occurrence is asked to stop cooperatively.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.core.cancel(may_interrupt)
    }

    /// Park the series. Returns `true` iff it was Active. A not-yet-started
    /// pending occurrence is pulled out of the queue and kept for resume; a
    /// mid-run occurrence finishes first.
    pub fn pause(&self) -> bool {
        self.core.pause()
    }

    /// Restart a paused series. Returns `true` iff it was Paused. Fixed-rate
    /// schedules resume in the slot the pause vacated (skipping missed slots
    /// when far behind); fixed-delay schedules resume one delay from now.
    pub fn resume(&self) -> bool {
        self.core.resume()
    }

    pub fn is_paused(&self) -> bool {
        self.core.state.lock().unwrap().status == Status::Paused
    }

    /// Whether the definition was cancelled (directly or via engine
    /// shutdown). Remains `true` after the transition to finished.
    pub fn is_cancelled(&self) -> bool {
        self.core.state.lock().unwrap().cancelled
    }

    /// Whether the series is over: no occurrence is pending, running or will
    /// ever be scheduled again.
    pub fn is_finished(&self) -> bool {
        self.core.state.lock().unwrap().status == Status::Finished
    }

    /// Completed occurrences (any disposition).
    pub fn execution_count(&self) -> u64 {
        self.core.state.lock().unwrap().execution_count
    }

    pub fn success_count(&self) -> u64 {
        self.core.state.lock().unwrap().success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.core.state.lock().unwrap().failure_count
    }

    pub fn cancelled_count(&self) -> u64 {
        self.core.state.lock().unwrap().cancelled_count
    }

    /// Snapshot of the retained history, newest first.
    pub fn history(&self) -> Vec<Arc<TaskInstance<V>>> {
        self.core.state.lock().unwrap().history.iter().cloned().collect()
    }

    /// The pending or running occurrence, if any.
    pub fn current(&self) -> Option<Arc<TaskInstance<V>>> {
        self.core.state.lock().unwrap().current.clone()
    }

    /// The cause attached when the engine finished the definition (an abort
    /// after failure, or a rejected re-enqueue during shutdown).
    pub fn finish_cause(&self) -> Option<Cause> {
        self.core.state.lock().unwrap().finish_cause.clone()
    }

    /// Register a per-occurrence listener: invoked on `ctx`, after the
    /// history update, with each occurrence that completes from now on.
    pub fn add_listener<F>(&self, listener: F, ctx: ExecutorRef) -> ListenerId
    where
        F: Fn(Arc<TaskInstance<V>>) + Send + Sync + 'static,
    {
        self.core.add_listener(Arc::new(listener), ctx)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.remove_listener(id)
    }

    /// Submission order of this definition within its engine.
    pub fn ordinal(&self) -> u64 {
        self.core.ordinal
    }

    /// When the definition was submitted, in monotonic nanoseconds.
    pub fn submitted_at_nanos(&self) -> u64 {
        self.core.submitted_at
    }
}

impl<V: Send + Sync + 'static> Cancellable for TaskHandle<V> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        TaskHandle::cancel(self, may_interrupt)
    }
}
