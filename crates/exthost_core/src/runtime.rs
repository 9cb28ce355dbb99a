use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    future::poll_fn,
    ops::{Deref, DerefMut},
    rc::Rc,
    task::Poll,
    time::{Duration, Instant},
};

use boa_engine::{
    builtins::promise::{OperationType, PromiseState},
    context::HostHooks,
    job::NativeJob,
    object::builtins::{JsFunction, JsPromise},
    Context, JsData, JsError, JsObject, JsResult, JsValue,
};
use boa_gc::{Finalize, Gc, GcRefCell, Trace};

use crate::{error::Error, future, realm::Realm};

/// Source of time for timers and user-interaction gates, in milliseconds.
pub trait Clock {
    fn now(&self) -> u64;

    /// Blocks (or pretends to) until `deadline`.
    fn sleep_until(&self, deadline: u64);
}

/// Wall-clock time measured from the creation of the clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_until(&self, deadline: u64) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(Duration::from_millis(deadline - now));
        }
    }
}

/// A clock that only moves when told to. Sleeping jumps straight to the deadline.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.get()
    }

    fn sleep_until(&self, deadline: u64) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[derive(Trace, Finalize)]
struct Timer {
    deadline: u64,
    interval: Option<u64>,
    callback: JsFunction,
    args: Vec<JsValue>,
}

#[derive(Trace, Finalize, Default)]
struct TimerTable {
    next_id: u32,
    timers: BTreeMap<u32, Timer>,
}

/// The timer queue backing `setTimeout` and friends. Shared by every realm of
/// a runtime.
#[derive(Trace, Finalize, JsData, Clone)]
pub struct Timers {
    table: Gc<GcRefCell<TimerTable>>,
    #[unsafe_ignore_trace]
    clock: Rc<dyn Clock>,
}

impl Timers {
    fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            table: Gc::new(GcRefCell::new(TimerTable::default())),
            clock,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.clock.clone()
    }

    /// Schedules `callback` after `delay` ms, repeating when `repeat` is set.
    pub fn schedule(
        &self,
        callback: JsFunction,
        delay: u64,
        args: Vec<JsValue>,
        repeat: bool,
    ) -> u32 {
        let deadline = self.clock.now() + delay;
        let mut table = self.table.borrow_mut();
        table.next_id += 1;
        let id = table.next_id;
        table.timers.insert(
            id,
            Timer {
                deadline,
                interval: repeat.then_some(delay.max(1)),
                callback,
                args,
            },
        );
        id
    }

    pub fn cancel(&self, id: u32) {
        self.table.borrow_mut().timers.remove(&id);
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.table
            .borrow()
            .timers
            .values()
            .map(|timer| timer.deadline)
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().timers.is_empty()
    }

    /// Pops the earliest timer due at `now`. Intervals are re-armed in place.
    fn take_due(&self, now: u64) -> Option<(JsFunction, Vec<JsValue>)> {
        let mut table = self.table.borrow_mut();
        let id = table
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .min_by_key(|(id, timer)| (timer.deadline, **id))
            .map(|(id, _)| *id)?;

        let timer = table.timers.get_mut(&id)?;
        match timer.interval {
            Some(interval) => {
                timer.deadline = now + interval;
                Some((timer.callback.clone(), timer.args.clone()))
            }
            None => table
                .timers
                .remove(&id)
                .map(|timer| (timer.callback, timer.args)),
        }
    }
}

thread_local! {
    /// Promises rejected without a handler since the last idle point.
    static REJECTED: RefCell<Vec<JsObject>> = const { RefCell::new(Vec::new()) };
}

struct Hooks;

impl HostHooks for Hooks {
    fn promise_rejection_tracker(
        &self,
        promise: &JsObject,
        operation: OperationType,
        _context: &mut Context,
    ) {
        REJECTED.with(|rejected| {
            let mut rejected = rejected.borrow_mut();
            match operation {
                OperationType::Reject => rejected.push(promise.clone()),
                OperationType::Handle => {
                    rejected.retain(|pending| !JsObject::equals(pending, promise))
                }
            }
        });
    }
}

const HOOKS: &Hooks = &Hooks;

/// A 'pollable' job queue
#[derive(Default, Debug)]
struct JobQueue(RefCell<VecDeque<NativeJob>>);

impl JobQueue {
    fn next(&self) -> Option<NativeJob> {
        self.0.borrow_mut().pop_front()
    }

    fn call_next(&self, context: &mut Context) -> Option<JsResult<JsValue>> {
        let job = self.next()?;
        Some(job.call(context))
    }
}

impl boa_engine::job::JobQueue for JobQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.0.borrow_mut().push_back(job);
    }

    fn enqueue_future_job(&self, future: boa_engine::job::FutureJob, context: &mut Context) {
        let job = future::block_on(future);
        self.enqueue_promise_job(job, context);
    }

    fn run_jobs(&self, context: &mut Context) {
        while let Some(job) = self.next() {
            if let Err(err) = job.call(context) {
                log::debug!("job failed: {err}");
            }
        }
    }
}

/// The engine context of one host page plus its event loop.
pub struct Runtime {
    context: Context,
    realm: Realm,
    // There will only ever be 2 references to the `job_queue`.
    // The context's internal reference and the runtime's reference.
    job_queue: Rc<JobQueue>,
    timers: Timers,
    unhandled: Vec<JsValue>,
}

impl Deref for Runtime {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl DerefMut for Runtime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.context
    }
}

impl Runtime {
    pub fn new() -> JsResult<Self> {
        Self::with_clock(Rc::new(SystemClock::default()))
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> JsResult<Self> {
        // 1. Initialize job queue
        let job_queue = Rc::new(JobQueue::default());

        // 2. Initialize context with job queue
        // NB: At this point, the context contains a 'default' realm
        let mut context = Context::builder()
            .host_hooks(HOOKS)
            .job_queue(job_queue.clone())
            .build()?;

        // 3. The page realm, with the timer queue reachable from native code
        let realm = Realm::new(&mut context)?;
        let timers = Timers::new(clock);
        realm.insert_host_defined(timers.clone());
        context.enter_realm(realm.inner.clone());

        Ok(Self {
            context,
            realm,
            job_queue,
            timers,
            unhandled: Vec::new(),
        })
    }

    /// Evaluates `src` in the page realm.
    pub fn eval(&mut self, src: &str) -> JsResult<JsValue> {
        self.realm.clone().eval(src, &mut self.context)
    }

    pub fn context(&mut self) -> &mut Context {
        &mut self.context
    }

    /// The page realm: the one whose global object is the real `window`.
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    /// Creates a new realm sharing this runtime's timer queue.
    pub fn create_realm(&mut self) -> JsResult<Realm> {
        let realm = Realm::new(&mut self.context)?;
        realm.insert_host_defined(self.timers.clone());
        Ok(realm)
    }

    /// Rejection reasons nobody handled, oldest first. Draining.
    pub fn take_unhandled_rejections(&mut self) -> Vec<JsValue> {
        std::mem::take(&mut self.unhandled)
    }

    /// Runs the event loop (jobs and due timers) until nothing is runnable
    pub async fn run_event_loop(&mut self) {
        poll_fn(|_| self.poll_event_loop()).await
    }

    /// Blocking form of [`Runtime::run_event_loop`].
    pub fn run_until_stalled(&mut self) {
        future::block_on(self.run_event_loop())
    }

    /// Runs the event loop while letting `ms` milliseconds of timer time pass.
    pub fn run_for(&mut self, ms: u64) {
        let clock = self.timers.clock();
        let deadline = clock.now() + ms;
        loop {
            self.run_until_stalled();
            match self.timers.next_deadline() {
                Some(next) if next <= deadline => clock.sleep_until(next),
                _ => break,
            }
        }
        clock.sleep_until(deadline);
        self.run_until_stalled();
    }

    /// Runs a single tick of the event loop
    pub fn poll_event_loop(&mut self) -> Poll<()> {
        if let Some(result) = self.job_queue.call_next(&mut self.context) {
            if let Err(err) = result {
                log::debug!("job failed: {err}");
            }
            return Poll::Pending;
        }

        if let Some((callback, args)) = self.timers.take_due(self.timers.now()) {
            if let Err(err) = callback.call(&JsValue::undefined(), &args, &mut self.context) {
                log::error!("Uncaught {err}");
            }
            return Poll::Pending;
        }

        self.report_rejections();
        self.context.clear_kept_objects();
        Poll::Ready(())
    }

    fn report_rejections(&mut self) {
        let rejected = REJECTED.with(|rejected| std::mem::take(&mut *rejected.borrow_mut()));
        for promise in rejected {
            let Ok(promise) = JsPromise::from_object(promise) else {
                continue;
            };
            if let PromiseState::Rejected(reason) = promise.state() {
                log::error!("Uncaught (in promise) {}", reason.display());
                self.unhandled.push(reason);
            }
        }
    }

    /// Polls a given value to resolve by stepping the event loop, letting
    /// timer time pass when nothing else can make progress.
    pub fn poll_value(&mut self, value: &JsValue) -> Poll<JsResult<JsValue>> {
        let Some(promise) = value.as_promise() else {
            return Poll::Ready(Ok(value.clone()));
        };
        let promise = match JsPromise::from_object(promise.clone()) {
            Ok(promise) => promise,
            Err(err) => return Poll::Ready(Err(err)),
        };

        match promise.state() {
            PromiseState::Fulfilled(result) => Poll::Ready(Ok(result)),
            PromiseState::Rejected(err) => Poll::Ready(Err(JsError::from_opaque(err))),
            PromiseState::Pending => {
                if self.poll_event_loop().is_pending() {
                    return Poll::Pending;
                }
                match self.timers.next_deadline() {
                    Some(next) => {
                        self.timers.clock().sleep_until(next);
                        Poll::Pending
                    }
                    None => Poll::Ready(Err(Error::Unsettled {
                        description: "event loop is idle".to_string(),
                    }
                    .into())),
                }
            }
        }
    }

    /// Waits for the given value to resolve while polling the event loop
    pub async fn resolve_value(&mut self, value: &JsValue) -> JsResult<JsValue> {
        poll_fn(|_| self.poll_value(value)).await
    }

    /// Blocking form of [`Runtime::resolve_value`].
    pub fn block_on_value(&mut self, value: &JsValue) -> JsResult<JsValue> {
        future::block_on(self.resolve_value(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn runtime() -> (Runtime, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::default());
        (Runtime::with_clock(clock.clone()).unwrap(), clock)
    }

    #[test]
    fn resolves_promise_jobs() {
        let (mut rt, _) = runtime();
        let value = rt.eval("Promise.resolve(20).then(x => x + 22)").unwrap();

        let result = rt.block_on_value(&value).unwrap();

        assert_eq!(result, JsValue::from(42));
    }

    #[test]
    fn fires_timers_in_deadline_order() {
        let (mut rt, clock) = runtime();
        let log = rt.eval("globalThis.log = []; log").unwrap();
        let log = log.as_object().unwrap().clone();
        let push = |tag: &str, rt: &mut Runtime| {
            let callback = rt.eval(&format!("(() => log.push({tag:?}))")).unwrap();
            JsFunction::from_object(callback.as_object().unwrap().clone()).unwrap()
        };
        let late = push("late", &mut rt);
        let early = push("early", &mut rt);

        rt.timers().schedule(late, 50, vec![], false);
        rt.timers().schedule(early, 10, vec![], false);
        rt.run_for(100);

        assert_eq!(clock.now(), 100);
        let length = log
            .get(boa_engine::js_string!("length"), rt.context())
            .unwrap();
        assert_eq!(length, JsValue::from(2));
        let joined = rt.eval("log.join(',')").unwrap();
        assert_eq!(
            joined.as_string().unwrap().to_std_string_escaped(),
            "early,late"
        );
    }

    #[test]
    fn collects_unhandled_rejections() {
        let (mut rt, _) = runtime();
        rt.eval("Promise.reject(new Error('boom')); Promise.reject(1).catch(() => {})")
            .unwrap();

        rt.run_until_stalled();

        assert_eq!(rt.take_unhandled_rejections().len(), 1);
    }

    #[test]
    fn unsettled_promise_is_an_error() {
        let (mut rt, _) = runtime();
        let value = rt.eval("new Promise(() => {})").unwrap();

        assert!(rt.block_on_value(&value).is_err());
    }
}
