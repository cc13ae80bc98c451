//! # Promise support for the async generator engine
//!
//! This module provides the deferred-result machinery the async generator
//! state machine is built on:
//! - `JSPromise` with its settlement state and reaction list
//! - `PromiseCapability`, the one-shot settlement handle given to each request
//! - `await_value`, which registers a fulfil/reject continuation pair on a value
//! - a thread-local task queue drained by `run_event_loop` / `poll_event_loop`
//!
//! ## Architecture Overview
//!
//! 1. **JSPromise**: state (`Pending` / `Fulfilled` / `Rejected`) plus the
//!    reactions registered while pending.
//! 2. **Reactions**: a pair of typed handlers and an optional derived promise.
//!    Async generator continuations are handler variants, so a promise never
//!    owns a closure back into a generator.
//! 3. **Task Queue**: one FIFO per thread. Settling a promise never runs a
//!    handler synchronously; it queues one task per reaction.
//! 4. **Event Loop**: processes queued tasks until the queue is empty.
//!
//! Combinators (`all`, `race`, ...) are not provided.

use crate::core::{Value, call_function, get_property, is_callable, new_native_function, value_to_string};
use crate::error::{EvalError, JSError, js_error_to_value};
use crate::js_async_generator::{self, JSAsyncGeneratorPtr};
use crate::{raise_internal_error, raise_type_error};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type JSPromisePtr = Rc<RefCell<JSPromise>>;

#[derive(Clone, Debug)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

pub struct JSPromise {
    pub id: usize,
    pub state: PromiseState,
    pub reactions: Vec<PromiseReaction>,
    /// Set once a resolving function has been called, even when the promise
    /// stays pending while it follows a thenable.
    pub already_resolved: bool,
    /// Whether a reaction has ever been attached. Used to avoid reporting
    /// unhandled rejections after the promise has been handled.
    pub handled: bool,
}

static UNIQUE_ID_SEED: AtomicUsize = AtomicUsize::new(1);

pub fn generate_unique_id() -> usize {
    UNIQUE_ID_SEED.fetch_add(1, Ordering::SeqCst)
}

impl JSPromise {
    pub fn new() -> Self {
        Self {
            id: generate_unique_id(),
            state: PromiseState::Pending,
            reactions: Vec::new(),
            already_resolved: false,
            handled: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PromiseState::Pending)
    }
}

impl Default for JSPromise {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JSPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSPromise {{ id: {}, state: {:?}, reactions: {} }}", self.id, self.state, self.reactions.len())
    }
}

pub fn new_promise_ptr() -> JSPromisePtr {
    Rc::new(RefCell::new(JSPromise::new()))
}

/// What runs when a reaction fires.
#[derive(Clone)]
pub enum ReactionHandler {
    /// Pass the fulfilment value through to the derived promise.
    Identity,
    /// Pass the rejection reason through to the derived promise.
    Thrower,
    /// Call a script-visible function with the settlement value.
    Function(Value),
    /// Return-await continuation: the awaited `return()` value fulfilled.
    AsyncGeneratorReturnFulfilled(JSAsyncGeneratorPtr),
    /// Return-await continuation: the awaited `return()` value rejected.
    AsyncGeneratorReturnRejected(JSAsyncGeneratorPtr),
    /// Body-await continuation: resume the body with the fulfilment value.
    AsyncGeneratorAwaitFulfilled(JSAsyncGeneratorPtr),
    /// Body-await continuation: inject the rejection reason into the body.
    AsyncGeneratorAwaitRejected(JSAsyncGeneratorPtr),
}

impl ReactionHandler {
    /// Handler slot for a script-supplied callback; non-callables fall back to
    /// pass-through like `then(undefined, ...)` does.
    pub fn from_callback(callback: Value, is_reject: bool) -> Self {
        if is_callable(&callback) {
            ReactionHandler::Function(callback)
        } else if is_reject {
            ReactionHandler::Thrower
        } else {
            ReactionHandler::Identity
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ReactionHandler::Identity => "identity",
            ReactionHandler::Thrower => "thrower",
            ReactionHandler::Function(_) => "function",
            ReactionHandler::AsyncGeneratorReturnFulfilled(_) => "async-generator-return-fulfilled",
            ReactionHandler::AsyncGeneratorReturnRejected(_) => "async-generator-return-rejected",
            ReactionHandler::AsyncGeneratorAwaitFulfilled(_) => "async-generator-await-fulfilled",
            ReactionHandler::AsyncGeneratorAwaitRejected(_) => "async-generator-await-rejected",
        }
    }
}

#[derive(Clone)]
pub struct PromiseReaction {
    pub on_fulfilled: ReactionHandler,
    pub on_rejected: ReactionHandler,
    pub result: Option<JSPromisePtr>,
}

/// A caller-visible promise paired with its settlement functions.
///
/// Settling consumes the capability, so a holder can settle it at most once.
/// Settling a promise that some other path already resolved is reported as an
/// internal error.
pub struct PromiseCapability {
    promise: JSPromisePtr,
}

impl PromiseCapability {
    pub fn promise(&self) -> Value {
        Value::Promise(self.promise.clone())
    }

    pub fn promise_ptr(&self) -> &JSPromisePtr {
        &self.promise
    }

    fn check_unsettled(&self) -> Result<(), JSError> {
        let promise = self.promise.borrow();
        if promise.already_resolved || !promise.is_pending() {
            return Err(raise_internal_error!("promise capability #{} settled twice", promise.id));
        }
        Ok(())
    }

    pub fn fulfil(self, value: Value) -> Result<(), JSError> {
        self.check_unsettled()?;
        resolve_promise(&self.promise, value);
        Ok(())
    }

    pub fn reject(self, reason: Value) -> Result<(), JSError> {
        self.check_unsettled()?;
        reject_promise(&self.promise, reason);
        Ok(())
    }
}

impl std::fmt::Debug for PromiseCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PromiseCapability(#{})", self.promise.borrow().id)
    }
}

pub fn create_promise_capability() -> PromiseCapability {
    PromiseCapability { promise: new_promise_ptr() }
}

enum Task {
    /// Run the fulfil side of one reaction.
    Resolution {
        promise_id: usize,
        handler: ReactionHandler,
        result: Option<JSPromisePtr>,
        value: Value,
    },
    /// Run the reject side of one reaction.
    Rejection {
        promise_id: usize,
        handler: ReactionHandler,
        result: Option<JSPromisePtr>,
        reason: Value,
    },
    /// A promise resolved with another engine promise follows its settlement.
    AdoptPromise { promise: JSPromisePtr, source: JSPromisePtr },
    /// PromiseResolveThenableJob: call thenable.then(resolve, reject).
    ResolveThenableJob {
        promise: JSPromisePtr,
        thenable: Value,
        then_fn: Value,
    },
}

impl Task {
    fn summary(&self) -> String {
        match self {
            Task::Resolution { promise_id, handler, .. } => format!("Resolution promise=#{} handler={}", promise_id, handler.describe()),
            Task::Rejection { promise_id, handler, .. } => format!("Rejection promise=#{} handler={}", promise_id, handler.describe()),
            Task::AdoptPromise { promise, source } => format!("AdoptPromise promise=#{} source=#{}", promise.borrow().id, source.borrow().id),
            Task::ResolveThenableJob { promise, .. } => format!("ResolveThenableJob promise=#{}", promise.borrow().id),
        }
    }
}

/// Default ceiling on tasks processed by one `run_event_loop` call.
pub const DEFAULT_EVENT_LOOP_TASK_LIMIT: usize = 1_000_000;

thread_local! {
    /// Task queue for asynchronous promise operations, one per thread.
    static GLOBAL_TASK_QUEUE: RefCell<VecDeque<(usize, Task)>> = const { RefCell::new(VecDeque::new()) };

    /// Compact task ids to correlate enqueue and process logs.
    static TASK_COUNTER: Cell<usize> = const { Cell::new(1) };

    /// How many nested invocations of `run_event_loop` are active.
    static RUN_LOOP_NESTING: Cell<usize> = const { Cell::new(0) };

    /// Rejected promises without any reaction: (promise id, reason, already logged).
    static UNHANDLED_REJECTIONS: RefCell<Vec<(usize, Value, bool)>> = const { RefCell::new(Vec::new()) };

    static EVENT_LOOP_TASK_LIMIT: Cell<usize> = const { Cell::new(DEFAULT_EVENT_LOOP_TASK_LIMIT) };

    static TRACK_UNHANDLED_REJECTIONS: Cell<bool> = const { Cell::new(true) };
}

/// Set the maximum number of tasks one `run_event_loop` call may process
/// before failing with `InfiniteLoopError`. Zero disables the limit.
pub fn set_event_loop_task_limit(limit: usize) {
    EVENT_LOOP_TASK_LIMIT.with(|l| l.set(limit));
}

pub fn event_loop_task_limit() -> usize {
    EVENT_LOOP_TASK_LIMIT.with(|l| l.get())
}

pub fn set_unhandled_rejection_tracking(enabled: bool) {
    TRACK_UNHANDLED_REJECTIONS.with(|t| t.set(enabled));
}

pub fn unhandled_rejection_tracking() -> bool {
    TRACK_UNHANDLED_REJECTIONS.with(|t| t.get())
}

/// Reset this thread's promise runtime state (for test isolation).
pub fn reset_global_state() {
    GLOBAL_TASK_QUEUE.with(|q| q.borrow_mut().clear());
    UNHANDLED_REJECTIONS.with(|u| u.borrow_mut().clear());
    TASK_COUNTER.with(|c| c.set(1));
    EVENT_LOOP_TASK_LIMIT.with(|l| l.set(DEFAULT_EVENT_LOOP_TASK_LIMIT));
    TRACK_UNHANDLED_REJECTIONS.with(|t| t.set(true));
}

pub fn pending_task_count() -> usize {
    GLOBAL_TASK_QUEUE.with(|q| q.borrow().len())
}

fn queue_task(task: Task) {
    let task_id = TASK_COUNTER.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    });
    log::debug!("queue_task: enqueuing task -> id={} {}", task_id, task.summary());
    GLOBAL_TASK_QUEUE.with(|q| {
        let mut queue = q.borrow_mut();
        queue.push_back((task_id, task));
        log::trace!("queue_task: id={} queue_len after push = {}", task_id, queue.len());
    });
}

fn track_unhandled(promise_id: usize, reason: &Value) {
    if !unhandled_rejection_tracking() {
        return;
    }
    log::trace!("track_unhandled: promise=#{} reason={}", promise_id, value_to_string(reason));
    UNHANDLED_REJECTIONS.with(|u| u.borrow_mut().push((promise_id, reason.clone(), false)));
}

fn forget_unhandled(promise_id: usize) {
    UNHANDLED_REJECTIONS.with(|u| u.borrow_mut().retain(|(id, ..)| *id != promise_id));
}

fn report_unhandled() {
    UNHANDLED_REJECTIONS.with(|u| {
        for (id, reason, logged) in u.borrow_mut().iter_mut().filter(|(.., logged)| !*logged) {
            log::warn!("unhandled promise rejection: promise=#{} reason={}", id, value_to_string(reason));
            *logged = true;
        }
    });
}

/// Drain the rejection reasons of promises that were rejected and never had a
/// reaction attached.
pub fn take_unhandled_rejections() -> Vec<Value> {
    UNHANDLED_REJECTIONS.with(|u| u.borrow_mut().drain(..).map(|(_, reason, _)| reason).collect())
}

/// Transition a pending promise and queue one task per registered reaction.
fn settle_promise(promise: &JSPromisePtr, outcome: PromiseState) {
    let mut p = promise.borrow_mut();
    if !p.is_pending() {
        log::trace!("settle_promise: promise=#{} already settled, ignoring", p.id);
        return;
    }
    p.already_resolved = true;
    p.state = outcome.clone();
    let reactions = std::mem::take(&mut p.reactions);
    let promise_id = p.id;
    let handled = p.handled;
    drop(p);

    match outcome {
        PromiseState::Fulfilled(value) => {
            log::trace!("settle_promise: promise=#{} fulfilled with {:?}, {} reactions", promise_id, value, reactions.len());
            for reaction in reactions {
                queue_task(Task::Resolution {
                    promise_id,
                    handler: reaction.on_fulfilled,
                    result: reaction.result,
                    value: value.clone(),
                });
            }
        }
        PromiseState::Rejected(reason) => {
            log::debug!("settle_promise: promise=#{} rejected with {}", promise_id, value_to_string(&reason));
            if !handled {
                track_unhandled(promise_id, &reason);
            }
            for reaction in reactions {
                queue_task(Task::Rejection {
                    promise_id,
                    handler: reaction.on_rejected,
                    result: reaction.result,
                    reason: reason.clone(),
                });
            }
        }
        PromiseState::Pending => {}
    }
}

/// Resolution procedure without the already-resolved guard: adopt engine
/// promises and thenables, fulfil with anything else.
fn resolve_promise_with(promise: &JSPromisePtr, value: Value) {
    if let Value::Promise(other) = &value {
        if Rc::ptr_eq(other, promise) {
            let type_error = js_error_to_value(&raise_type_error!("Chaining cycle detected for promise"));
            settle_promise(promise, PromiseState::Rejected(type_error));
        } else {
            queue_task(Task::AdoptPromise {
                promise: promise.clone(),
                source: other.clone(),
            });
        }
        return;
    }

    if let Value::Object(_) = &value {
        let then_fn = get_property(&value, "then");
        if is_callable(&then_fn) {
            queue_task(Task::ResolveThenableJob {
                promise: promise.clone(),
                thenable: value,
                then_fn,
            });
            return;
        }
    }

    settle_promise(promise, PromiseState::Fulfilled(value));
}

/// The resolve function of a promise: only the first call has any effect.
pub fn resolve_promise(promise: &JSPromisePtr, value: Value) {
    {
        let mut p = promise.borrow_mut();
        if p.already_resolved {
            log::trace!("resolve_promise: promise=#{} already resolved, ignoring", p.id);
            return;
        }
        p.already_resolved = true;
    }
    resolve_promise_with(promise, value);
}

/// The reject function of a promise: only the first call has any effect.
pub fn reject_promise(promise: &JSPromisePtr, reason: Value) {
    {
        let mut p = promise.borrow_mut();
        if p.already_resolved {
            log::trace!("reject_promise: promise=#{} already resolved, ignoring", p.id);
            return;
        }
        p.already_resolved = true;
    }
    settle_promise(promise, PromiseState::Rejected(reason));
}

/// Fresh resolve/reject function values sharing one already-resolved flag,
/// handed to a thenable's `then`.
fn create_resolving_functions(promise: &JSPromisePtr) -> (Value, Value) {
    let already_resolved = Rc::new(Cell::new(false));

    let resolve = {
        let promise = promise.clone();
        let already_resolved = already_resolved.clone();
        new_native_function("resolve", move |_this, args| {
            if !already_resolved.replace(true) {
                resolve_promise_with(&promise, args.first().cloned().unwrap_or_default());
            }
            Ok(Value::Undefined)
        })
    };
    let reject = {
        let promise = promise.clone();
        new_native_function("reject", move |_this, args| {
            if !already_resolved.replace(true) {
                settle_promise(&promise, PromiseState::Rejected(args.first().cloned().unwrap_or_default()));
            }
            Ok(Value::Undefined)
        })
    };
    (resolve, reject)
}

/// Register a reaction on `promise`. If the promise is already settled the
/// matching handler is queued right away.
pub fn perform_promise_then(
    promise: &JSPromisePtr,
    on_fulfilled: ReactionHandler,
    on_rejected: ReactionHandler,
    result: Option<JSPromisePtr>,
) {
    let mut p = promise.borrow_mut();
    if !p.handled {
        p.handled = true;
        forget_unhandled(p.id);
    }
    let promise_id = p.id;
    match p.state.clone() {
        PromiseState::Pending => p.reactions.push(PromiseReaction {
            on_fulfilled,
            on_rejected,
            result,
        }),
        PromiseState::Fulfilled(value) => {
            drop(p);
            queue_task(Task::Resolution {
                promise_id,
                handler: on_fulfilled,
                result,
                value,
            });
        }
        PromiseState::Rejected(reason) => {
            drop(p);
            queue_task(Task::Rejection {
                promise_id,
                handler: on_rejected,
                result,
                reason,
            });
        }
    }
}

/// `promise.then(onFulfilled, onRejected)` on a script value.
pub fn promise_then(promise: &Value, on_fulfilled: Value, on_rejected: Value) -> Result<Value, JSError> {
    let Value::Promise(promise) = promise else {
        return Err(raise_type_error!("{} is not a promise", value_to_string(promise)));
    };
    let derived = new_promise_ptr();
    perform_promise_then(
        promise,
        ReactionHandler::from_callback(on_fulfilled, false),
        ReactionHandler::from_callback(on_rejected, true),
        Some(derived.clone()),
    );
    Ok(Value::Promise(derived))
}

/// PromiseResolve: engine promises are used as-is, anything else is wrapped
/// in a new promise resolved with it.
pub fn promise_resolve(value: Value) -> JSPromisePtr {
    if let Value::Promise(p) = value {
        return p;
    }
    let promise = new_promise_ptr();
    resolve_promise(&promise, value);
    promise
}

pub fn new_resolved_promise(value: Value) -> Value {
    Value::Promise(promise_resolve(value))
}

pub fn new_rejected_promise(reason: Value) -> Value {
    let promise = new_promise_ptr();
    reject_promise(&promise, reason);
    Value::Promise(promise)
}

/// Await `value`: the matching continuation runs from the task queue once the
/// value settles, never synchronously.
pub fn await_value(value: Value, on_fulfilled: ReactionHandler, on_rejected: ReactionHandler) {
    let promise = promise_resolve(value);
    log::trace!(
        "await_value: awaiting promise=#{} with {}/{}",
        promise.borrow().id,
        on_fulfilled.describe(),
        on_rejected.describe()
    );
    perform_promise_then(&promise, on_fulfilled, on_rejected, None);
}

pub fn get_promise_state(value: &Value) -> Option<PromiseState> {
    match value {
        Value::Promise(p) => Some(p.borrow().state.clone()),
        _ => None,
    }
}

fn run_reaction(handler: ReactionHandler, argument: Value, result: Option<JSPromisePtr>) -> Result<(), JSError> {
    let outcome: Result<Value, Value> = match handler {
        ReactionHandler::Identity => Ok(argument),
        ReactionHandler::Thrower => Err(argument),
        ReactionHandler::Function(callback) => match call_function(&callback, &Value::Undefined, &[argument]) {
            Ok(v) => Ok(v),
            Err(EvalError::Js(err)) if err.is_internal() => return Err(err),
            Err(err) => Err(err.into_value()),
        },
        ReactionHandler::AsyncGeneratorReturnFulfilled(generator) => {
            js_async_generator::async_generator_return_fulfilled(&generator, argument)?;
            Ok(Value::Undefined)
        }
        ReactionHandler::AsyncGeneratorReturnRejected(generator) => {
            js_async_generator::async_generator_return_rejected(&generator, argument)?;
            Ok(Value::Undefined)
        }
        ReactionHandler::AsyncGeneratorAwaitFulfilled(generator) => {
            js_async_generator::async_generator_await_fulfilled(&generator, argument)?;
            Ok(Value::Undefined)
        }
        ReactionHandler::AsyncGeneratorAwaitRejected(generator) => {
            js_async_generator::async_generator_await_rejected(&generator, argument)?;
            Ok(Value::Undefined)
        }
    };

    if let Some(result) = result {
        match outcome {
            Ok(value) => resolve_promise_with(&result, value),
            Err(reason) => settle_promise(&result, PromiseState::Rejected(reason)),
        }
    }
    Ok(())
}

fn process_task(task_id: usize, task: Task) -> Result<(), JSError> {
    log::debug!("process_task: running task -> id={} {}", task_id, task.summary());
    match task {
        Task::Resolution { handler, result, value, .. } => run_reaction(handler, value, result),
        Task::Rejection { handler, result, reason, .. } => run_reaction(handler, reason, result),
        Task::AdoptPromise { promise, source } => {
            perform_promise_then(&source, ReactionHandler::Identity, ReactionHandler::Thrower, Some(promise));
            Ok(())
        }
        Task::ResolveThenableJob {
            promise,
            thenable,
            then_fn,
        } => {
            let (resolve, reject) = create_resolving_functions(&promise);
            match call_function(&then_fn, &thenable, &[resolve, reject.clone()]) {
                Ok(_) => Ok(()),
                Err(EvalError::Js(err)) if err.is_internal() => Err(err),
                Err(err) => call_function(&reject, &Value::Undefined, &[err.into_value()])
                    .map(|_| ())
                    .map_err(JSError::from),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollResult {
    /// A task was executed.
    Executed,
    /// The queue is empty.
    Empty,
}

/// Process a single queued task, if any.
pub fn poll_event_loop() -> Result<PollResult, JSError> {
    let next = GLOBAL_TASK_QUEUE.with(|q| q.borrow_mut().pop_front());
    match next {
        Some((task_id, task)) => {
            process_task(task_id, task)?;
            Ok(PollResult::Executed)
        }
        None => Ok(PollResult::Empty),
    }
}

struct NestingGuard;

impl NestingGuard {
    fn enter() -> (Self, bool) {
        let depth = RUN_LOOP_NESTING.with(|n| {
            let depth = n.get() + 1;
            n.set(depth);
            depth
        });
        (NestingGuard, depth == 1)
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        RUN_LOOP_NESTING.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// Execute queued tasks in FIFO order until the queue is empty and return how
/// many ran. Tasks queued while running are processed in the same call.
pub fn run_event_loop() -> Result<usize, JSError> {
    let (_guard, outermost) = NestingGuard::enter();
    let limit = event_loop_task_limit();
    let mut executed = 0usize;
    loop {
        if limit != 0 && executed >= limit && pending_task_count() > 0 {
            return Err(JSError::InfiniteLoopError { iterations: executed });
        }
        match poll_event_loop()? {
            PollResult::Executed => executed += 1,
            PollResult::Empty => break,
        }
    }
    if outermost {
        report_unhandled();
    }
    log::trace!("run_event_loop: executed {} tasks", executed);
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{new_js_object_data, object_set_key_value};

    fn recorder(log: &Rc<RefCell<Vec<String>>>, label: &'static str) -> Value {
        let log = log.clone();
        new_native_function(label, move |_this, args| {
            let arg = args.first().cloned().unwrap_or_default();
            log.borrow_mut().push(format!("{label}:{}", value_to_string(&arg)));
            Ok(arg)
        })
    }

    #[test]
    fn reactions_run_from_task_queue_not_synchronously() {
        reset_global_state();
        let log = Rc::new(RefCell::new(Vec::new()));
        let cap = create_promise_capability();
        let p = cap.promise();
        promise_then(&p, recorder(&log, "ok"), Value::Undefined).unwrap();
        cap.fulfil(Value::Number(1.0)).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(run_event_loop().unwrap(), 1);
        assert_eq!(*log.borrow(), vec!["ok:1"]);
    }

    #[test]
    fn capability_reports_second_settlement() {
        reset_global_state();
        let cap = create_promise_capability();
        let promise = cap.promise_ptr().clone();
        cap.fulfil(Value::Number(1.0)).unwrap();
        let again = PromiseCapability { promise };
        let err = again.reject(Value::from("late")).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn derived_promise_follows_handler_result() {
        reset_global_state();
        let thrower = new_native_function("boom", |_this, _args| Err(EvalError::Throw(Value::from("boom"))));
        let derived = promise_then(&new_resolved_promise(Value::Number(2.0)), thrower, Value::Undefined).unwrap();
        run_event_loop().unwrap();
        match get_promise_state(&derived) {
            Some(PromiseState::Rejected(r)) => assert_eq!(r.as_string().as_deref(), Some("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn thenable_objects_are_assimilated() {
        reset_global_state();
        let thenable = new_js_object_data();
        object_set_key_value(
            &thenable,
            "then",
            new_native_function("then", |_this, args| {
                call_function(&args[0], &Value::Undefined, &[Value::Number(9.0)])?;
                // Later calls are ignored by the shared already-resolved flag.
                call_function(&args[1], &Value::Undefined, &[Value::from("ignored")])
            }),
        );
        let p = new_resolved_promise(Value::Object(thenable));
        assert!(matches!(get_promise_state(&p), Some(PromiseState::Pending)));
        run_event_loop().unwrap();
        match get_promise_state(&p) {
            Some(PromiseState::Fulfilled(v)) => assert_eq!(v.as_number(), Some(9.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn self_resolution_rejects_with_type_error() {
        reset_global_state();
        let cap = create_promise_capability();
        let p = cap.promise();
        cap.fulfil(p.clone()).unwrap();
        match get_promise_state(&p) {
            Some(PromiseState::Rejected(reason)) => {
                assert_eq!(value_to_string(&reason), "TypeError: Chaining cycle detected for promise")
            }
            other => panic!("unexpected {other:?}"),
        }
        take_unhandled_rejections();
    }

    #[test]
    fn unhandled_rejection_is_forgotten_once_handled() {
        reset_global_state();
        let p = new_rejected_promise(Value::from("nobody"));
        let _ = new_rejected_promise(Value::from("lost"));
        promise_then(&p, Value::Undefined, recorder(&Rc::new(RefCell::new(Vec::new())), "caught")).unwrap();
        run_event_loop().unwrap();
        let reasons: Vec<String> = take_unhandled_rejections().iter().map(value_to_string).collect();
        assert_eq!(reasons, vec!["lost"]);
    }

    #[test]
    fn task_limit_stops_runaway_loops() {
        reset_global_state();
        set_event_loop_task_limit(3);
        for i in 0..5 {
            promise_then(&new_resolved_promise(Value::Number(i as f64)), Value::Undefined, Value::Undefined).unwrap();
        }
        match run_event_loop() {
            Err(JSError::InfiniteLoopError { iterations }) => assert_eq!(iterations, 3),
            other => panic!("unexpected {other:?}"),
        }
        reset_global_state();
        assert_eq!(pending_task_count(), 0);
    }
}
