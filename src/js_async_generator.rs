use crate::core::{JSObjectDataPtr, Value, new_js_object_data, new_native_function, object_set_key_value, value_to_string};
use crate::error::{EvalError, JSError, js_error_to_value};
use crate::js_execution_pauser::{CoroutineStep, ExecutionPauser, ResumeInput};
use crate::js_promise::{PromiseCapability, ReactionHandler, await_value, create_promise_capability, generate_unique_id};
use crate::{raise_internal_error, raise_type_error};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncGeneratorState {
    SuspendedStart,
    SuspendedYield,
    Executing,
    AwaitingReturn,
    Completed,
}

impl AsyncGeneratorState {
    /// No resumption or return-await is in flight.
    pub fn is_idle(self) -> bool {
        !matches!(self, AsyncGeneratorState::Executing | AsyncGeneratorState::AwaitingReturn)
    }
}

/// The operation a caller asked for, with its payload.
#[derive(Clone, Debug)]
pub enum AsyncGeneratorRequestKind {
    Next(Value),
    Return(Value),
    Throw(Value),
}

impl AsyncGeneratorRequestKind {
    fn name(&self) -> &'static str {
        match self {
            AsyncGeneratorRequestKind::Next(_) => "next",
            AsyncGeneratorRequestKind::Return(_) => "return",
            AsyncGeneratorRequestKind::Throw(_) => "throw",
        }
    }
}

#[derive(Debug)]
pub struct AsyncGeneratorRequest {
    pub kind: AsyncGeneratorRequestKind,
    pub capability: PromiseCapability,
}

pub struct JSAsyncGenerator {
    id: usize,
    state: AsyncGeneratorState,
    queue: VecDeque<AsyncGeneratorRequest>,
    // Moved out while the body runs and put back when it stops.
    pauser: Option<Box<dyn ExecutionPauser>>,
}

pub type JSAsyncGeneratorPtr = Rc<RefCell<JSAsyncGenerator>>;

impl JSAsyncGenerator {
    pub fn new(pauser: Box<dyn ExecutionPauser>) -> Self {
        // A host that already ran the body up to an initial suspension point
        // hands over a started pauser.
        let state = if pauser.has_finished() {
            AsyncGeneratorState::Completed
        } else if pauser.has_started() {
            AsyncGeneratorState::SuspendedYield
        } else {
            AsyncGeneratorState::SuspendedStart
        };
        JSAsyncGenerator {
            id: generate_unique_id(),
            state,
            queue: VecDeque::new(),
            pauser: Some(pauser),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> AsyncGeneratorState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn set_state(&mut self, state: AsyncGeneratorState) {
        log::trace!("async generator #{}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}

/// Create an async generator object driving `pauser`.
pub fn new_async_generator<P: ExecutionPauser + 'static>(pauser: P) -> Value {
    Value::AsyncGenerator(Rc::new(RefCell::new(JSAsyncGenerator::new(Box::new(pauser)))))
}

pub fn async_generator_state(generator: &Value) -> Option<AsyncGeneratorState> {
    match generator {
        Value::AsyncGenerator(g) => Some(g.borrow().state),
        _ => None,
    }
}

pub fn create_iterator_result_obj(value: Value, done: bool) -> Value {
    let obj = new_js_object_data();
    object_set_key_value(&obj, "value", value);
    object_set_key_value(&obj, "done", Value::Boolean(done));
    Value::Object(obj)
}

/// What `ResumeNext` decided for the front request.
enum Dispatch {
    /// Nothing to do: the queue is empty or an operation is in flight.
    Wait,
    /// Settle the front request against the completed generator.
    SettleCompleted,
    /// `throw()` before the body ever ran.
    RejectUnstarted,
    /// Await the value given to `return()`.
    AwaitReturn(Value),
    /// Resume the body.
    Resume(ResumeInput),
}

// https://www.ecma-international.org/ecma-262/10.0/index.html#sec-asyncgeneratorenqueue
fn async_generator_enqueue(generator: &JSAsyncGeneratorPtr, kind: AsyncGeneratorRequestKind) -> Result<Value, JSError> {
    let capability = create_promise_capability();
    let promise = capability.promise();
    let idle = {
        let mut g = generator.borrow_mut();
        log::debug!(
            "async generator #{}: enqueue {} (state {:?}, {} queued)",
            g.id,
            kind.name(),
            g.state,
            g.queue.len()
        );
        g.queue.push_back(AsyncGeneratorRequest { kind, capability });
        g.state.is_idle()
    };
    if idle {
        async_generator_resume_next(generator)?;
    }
    Ok(promise)
}

// https://www.ecma-international.org/ecma-262/10.0/index.html#sec-asyncgeneratorresumenext
fn async_generator_resume_next(generator: &JSAsyncGeneratorPtr) -> Result<(), JSError> {
    use AsyncGeneratorRequestKind as Kind;
    use AsyncGeneratorState as State;

    // Drain until the queue is empty or an operation goes in flight.
    loop {
        let dispatch = {
            let mut guard = generator.borrow_mut();
            let g = &mut *guard;
            let Some(front) = g.queue.front_mut() else {
                return Ok(());
            };
            let dispatch = match (g.state, &mut front.kind) {
                (State::Executing | State::AwaitingReturn, _) => Dispatch::Wait,
                (State::Completed, _) => Dispatch::SettleCompleted,
                // The request keeps no handle on the awaited value; it reaches
                // the continuation through the reaction.
                (State::SuspendedStart | State::SuspendedYield, Kind::Return(value)) => Dispatch::AwaitReturn(std::mem::take(value)),
                (State::SuspendedStart, Kind::Throw(_)) => Dispatch::RejectUnstarted,
                (State::SuspendedStart | State::SuspendedYield, Kind::Next(value)) => Dispatch::Resume(ResumeInput::Next(value.clone())),
                (State::SuspendedYield, Kind::Throw(exception)) => Dispatch::Resume(ResumeInput::Throw(exception.clone())),
            };
            match &dispatch {
                Dispatch::Wait | Dispatch::SettleCompleted => {}
                Dispatch::RejectUnstarted => g.set_state(State::Completed),
                Dispatch::AwaitReturn(_) => g.set_state(State::AwaitingReturn),
                Dispatch::Resume(_) => g.set_state(State::Executing),
            }
            dispatch
        };

        match dispatch {
            Dispatch::Wait => return Ok(()),
            Dispatch::SettleCompleted => {
                let request = dequeue(generator)?;
                match request.kind {
                    Kind::Next(_) => request.capability.fulfil(create_iterator_result_obj(Value::Undefined, true))?,
                    Kind::Return(value) => request.capability.fulfil(create_iterator_result_obj(value, true))?,
                    Kind::Throw(exception) => request.capability.reject(exception)?,
                }
            }
            Dispatch::RejectUnstarted => {
                let request = dequeue(generator)?;
                let Kind::Throw(exception) = request.kind else {
                    return Err(raise_internal_error!("front request changed while dispatching"));
                };
                request.capability.reject(exception)?;
            }
            Dispatch::AwaitReturn(value) => {
                await_value(
                    value,
                    ReactionHandler::AsyncGeneratorReturnFulfilled(generator.clone()),
                    ReactionHandler::AsyncGeneratorReturnRejected(generator.clone()),
                );
                return Ok(());
            }
            Dispatch::Resume(input) => return async_generator_resume_body(generator, input),
        }
    }
}

fn dequeue(generator: &JSAsyncGeneratorPtr) -> Result<AsyncGeneratorRequest, JSError> {
    let mut g = generator.borrow_mut();
    let id = g.id;
    g.queue
        .pop_front()
        .ok_or_else(|| raise_internal_error!("async generator #{} settled with an empty request queue", id))
}

/// Run the body until its next suspension and feed the outcome back into the
/// state machine.
fn async_generator_resume_body(generator: &JSAsyncGeneratorPtr, input: ResumeInput) -> Result<(), JSError> {
    let mut pauser = {
        let mut g = generator.borrow_mut();
        let id = g.id;
        g.pauser
            .take()
            .ok_or_else(|| raise_internal_error!("async generator #{} resumed while its body is already running", id))?
    };
    // No borrow of the generator is held here, so the body may enqueue
    // further requests on it.
    let outcome = pauser.resume(input);
    generator.borrow_mut().pauser = Some(pauser);

    match outcome {
        Ok(CoroutineStep::Yield(value)) => async_generator_resolve(generator, value, false),
        Ok(CoroutineStep::Return(value)) => async_generator_resolve(generator, value, true),
        Ok(CoroutineStep::Await(value)) => {
            await_value(
                value,
                ReactionHandler::AsyncGeneratorAwaitFulfilled(generator.clone()),
                ReactionHandler::AsyncGeneratorAwaitRejected(generator.clone()),
            );
            Ok(())
        }
        Err(EvalError::Throw(exception)) => async_generator_reject(generator, exception),
        Err(EvalError::Js(err)) if err.is_internal() => {
            // The body is unusable; settle what is queued before reporting.
            async_generator_reject(generator, js_error_to_value(&err))?;
            Err(err)
        }
        Err(EvalError::Js(err)) => async_generator_reject(generator, js_error_to_value(&err)),
    }
}

fn expect_in_flight(generator: &JSAsyncGeneratorPtr, operation: &str) -> Result<(), JSError> {
    let g = generator.borrow();
    if g.state.is_idle() {
        return Err(raise_internal_error!(
            "async generator #{}: {} while {:?}, no operation in flight",
            g.id,
            operation,
            g.state
        ));
    }
    Ok(())
}

// https://www.ecma-international.org/ecma-262/10.0/index.html#sec-asyncgeneratorresolve
fn async_generator_resolve(generator: &JSAsyncGeneratorPtr, value: Value, done: bool) -> Result<(), JSError> {
    expect_in_flight(generator, "resolve")?;
    generator.borrow_mut().set_state(if done {
        AsyncGeneratorState::Completed
    } else {
        AsyncGeneratorState::SuspendedYield
    });
    let request = dequeue(generator)?;
    log::trace!("async generator: fulfilling {} with done={}", request.kind.name(), done);
    request.capability.fulfil(create_iterator_result_obj(value, done))?;
    async_generator_resume_next(generator)
}

// https://www.ecma-international.org/ecma-262/10.0/index.html#sec-asyncgeneratorreject
fn async_generator_reject(generator: &JSAsyncGeneratorPtr, exception: Value) -> Result<(), JSError> {
    expect_in_flight(generator, "reject")?;
    generator.borrow_mut().set_state(AsyncGeneratorState::Completed);
    let request = dequeue(generator)?;
    log::trace!("async generator: rejecting {} with {}", request.kind.name(), value_to_string(&exception));
    request.capability.reject(exception)?;
    async_generator_resume_next(generator)
}

fn expect_state(generator: &JSAsyncGeneratorPtr, expected: AsyncGeneratorState) -> Result<(), JSError> {
    let g = generator.borrow();
    if g.state != expected {
        return Err(raise_internal_error!(
            "async generator #{}: continuation fired in {:?}, expected {:?}",
            g.id,
            g.state,
            expected
        ));
    }
    Ok(())
}

pub(crate) fn async_generator_return_fulfilled(generator: &JSAsyncGeneratorPtr, value: Value) -> Result<(), JSError> {
    expect_state(generator, AsyncGeneratorState::AwaitingReturn)?;
    async_generator_resolve(generator, value, true)
}

pub(crate) fn async_generator_return_rejected(generator: &JSAsyncGeneratorPtr, reason: Value) -> Result<(), JSError> {
    expect_state(generator, AsyncGeneratorState::AwaitingReturn)?;
    async_generator_reject(generator, reason)
}

pub(crate) fn async_generator_await_fulfilled(generator: &JSAsyncGeneratorPtr, value: Value) -> Result<(), JSError> {
    expect_state(generator, AsyncGeneratorState::Executing)?;
    async_generator_resume_body(generator, ResumeInput::Next(value))
}

pub(crate) fn async_generator_await_rejected(generator: &JSAsyncGeneratorPtr, reason: Value) -> Result<(), JSError> {
    expect_state(generator, AsyncGeneratorState::Executing)?;
    async_generator_resume_body(generator, ResumeInput::Throw(reason))
}

/// Enqueue `kind` on `this_val`. A receiver that is not an async generator
/// gets a rejected promise rather than an error.
fn enqueue_on_receiver(this_val: &Value, kind: AsyncGeneratorRequestKind) -> Result<Value, JSError> {
    match this_val {
        Value::AsyncGenerator(generator) => async_generator_enqueue(generator, kind),
        other => {
            let capability = create_promise_capability();
            let promise = capability.promise();
            let error = raise_type_error!("AsyncGenerator.prototype.{} called on incompatible receiver {}", kind.name(), value_to_string(other));
            capability.reject(js_error_to_value(&error))?;
            Ok(promise)
        }
    }
}

pub fn async_generator_next(generator: &Value, value: Value) -> Result<Value, JSError> {
    enqueue_on_receiver(generator, AsyncGeneratorRequestKind::Next(value))
}

pub fn async_generator_return(generator: &Value, value: Value) -> Result<Value, JSError> {
    enqueue_on_receiver(generator, AsyncGeneratorRequestKind::Return(value))
}

pub fn async_generator_throw(generator: &Value, exception: Value) -> Result<Value, JSError> {
    enqueue_on_receiver(generator, AsyncGeneratorRequestKind::Throw(exception))
}

// Native implementation for the AsyncGenerator.prototype methods
pub fn handle_async_generator_prototype_method(method: &str, this_val: Option<&Value>, args: &[Value]) -> Result<Value, JSError> {
    let this = this_val.cloned().unwrap_or_default();
    let arg = args.first().cloned().unwrap_or_default();
    match method {
        "next" => async_generator_next(&this, arg),
        "return" => async_generator_return(&this, arg),
        "throw" => async_generator_throw(&this, arg),
        // [Symbol.asyncIterator]() returns the generator itself
        "asyncIterator" => Ok(this),
        _ => Err(raise_type_error!("AsyncGenerator.prototype.{} is not a function", method)),
    }
}

/// Build the AsyncGenerator.prototype object with `next`, `return`, `throw`
/// and `asyncIterator` as native functions dispatching to the handler above.
pub fn initialize_async_generator_prototype() -> JSObjectDataPtr {
    let proto = new_js_object_data();
    for method in ["next", "return", "throw", "asyncIterator"] {
        let func = new_native_function(&format!("AsyncGenerator.prototype.{method}"), move |this, args| {
            handle_async_generator_prototype_method(method, Some(this), args).map_err(EvalError::from)
        });
        object_set_key_value(&proto, method, func);
    }
    proto
}
