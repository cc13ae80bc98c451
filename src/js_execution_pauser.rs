//! Suspended computations driven by the async generator state machine.
//!
//! A generator body is anything implementing [`ExecutionPauser`]: it is
//! resumed with a value or an injected exception and runs synchronously until
//! it yields, awaits, returns or throws. The state machine never inspects how
//! the body keeps its program counter or locals.

use crate::core::Value;
use crate::error::EvalError;
use crate::raise_internal_error;

/// How a suspended body is resumed.
#[derive(Clone, Debug)]
pub enum ResumeInput {
    /// Continue with a normal value (the result of the pending `yield` or `await`).
    Next(Value),
    /// Raise an exception at the suspension point.
    Throw(Value),
}

/// Where a resumed body stopped.
#[derive(Clone, Debug)]
pub enum CoroutineStep {
    /// Suspended at a `yield` with the yielded value.
    Yield(Value),
    /// Suspended at an `await` on the given operand.
    Await(Value),
    /// Ran to completion with a return value.
    Return(Value),
}

pub trait ExecutionPauser {
    /// Resume the body. `Err(EvalError::Throw(v))` means the body threw `v`.
    fn resume(&mut self, input: ResumeInput) -> Result<CoroutineStep, EvalError>;

    /// Whether the body has begun executing.
    fn has_started(&self) -> bool;

    fn is_suspended_at_yield(&self) -> bool;

    fn is_suspended_at_await(&self) -> bool;

    /// Whether the body ran to completion or threw. A finished body cannot be
    /// resumed again.
    fn has_finished(&self) -> bool {
        self.has_started() && !self.is_suspended_at_yield() && !self.is_suspended_at_await()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Suspension {
    NotStarted,
    Running,
    AtYield,
    AtAwait,
    Finished,
}

impl Suspension {
    fn after(step: &Result<CoroutineStep, EvalError>) -> Self {
        match step {
            Ok(CoroutineStep::Yield(_)) => Suspension::AtYield,
            Ok(CoroutineStep::Await(_)) => Suspension::AtAwait,
            Ok(CoroutineStep::Return(_)) | Err(_) => Suspension::Finished,
        }
    }
}

/// A pauser backed by a step function that keeps its own position between
/// calls, e.g. a closure matching on a captured counter.
pub struct StepFunction<F> {
    step: F,
    suspension: Suspension,
}

impl<F> StepFunction<F>
where
    F: FnMut(ResumeInput) -> Result<CoroutineStep, EvalError>,
{
    pub fn new(step: F) -> Self {
        StepFunction {
            step,
            suspension: Suspension::NotStarted,
        }
    }
}

impl<F> ExecutionPauser for StepFunction<F>
where
    F: FnMut(ResumeInput) -> Result<CoroutineStep, EvalError>,
{
    fn resume(&mut self, input: ResumeInput) -> Result<CoroutineStep, EvalError> {
        if self.suspension == Suspension::Finished {
            return Err(raise_internal_error!("resumed a generator body that already finished").into());
        }
        self.suspension = Suspension::Running;
        let step = (self.step)(input);
        self.suspension = Suspension::after(&step);
        step
    }

    fn has_started(&self) -> bool {
        self.suspension != Suspension::NotStarted
    }

    fn is_suspended_at_yield(&self) -> bool {
        self.suspension == Suspension::AtYield
    }

    fn is_suspended_at_await(&self) -> bool {
        self.suspension == Suspension::AtAwait
    }

    fn has_finished(&self) -> bool {
        self.suspension == Suspension::Finished
    }
}

/// One step of a [`ScriptedBody`].
#[derive(Clone, Debug)]
pub enum Instruction {
    Yield(Value),
    /// Yield the value most recently received from a resumption, an await or
    /// a caught exception.
    YieldReceived,
    Await(Value),
    Throw(Value),
    Return(Value),
    ReturnReceived,
    /// Exceptions raised until the matching `LeaveTry` jump to `catch_pc`,
    /// with the exception as the received value.
    EnterTry { catch_pc: usize },
    LeaveTry,
}

/// A generator body given as a flat instruction list. Running past the last
/// instruction returns `undefined`.
pub struct ScriptedBody {
    code: Vec<Instruction>,
    pc: usize,
    received: Value,
    try_stack: Vec<usize>,
    suspension: Suspension,
}

impl ScriptedBody {
    pub fn new(code: Vec<Instruction>) -> Self {
        ScriptedBody {
            code,
            pc: 0,
            received: Value::Undefined,
            try_stack: Vec::new(),
            suspension: Suspension::NotStarted,
        }
    }

    /// Route an exception to the innermost try region, or finish with it.
    fn raise(&mut self, exception: Value) -> Result<(), EvalError> {
        match self.try_stack.pop() {
            Some(catch_pc) => {
                log::trace!("ScriptedBody: exception caught, jumping to {}", catch_pc);
                self.pc = catch_pc;
                self.received = exception;
                Ok(())
            }
            None => Err(EvalError::Throw(exception)),
        }
    }

    fn run(&mut self) -> Result<CoroutineStep, EvalError> {
        loop {
            let Some(instruction) = self.code.get(self.pc).cloned() else {
                return Ok(CoroutineStep::Return(Value::Undefined));
            };
            self.pc += 1;
            match instruction {
                Instruction::Yield(v) => return Ok(CoroutineStep::Yield(v)),
                Instruction::YieldReceived => return Ok(CoroutineStep::Yield(self.received.clone())),
                Instruction::Await(v) => return Ok(CoroutineStep::Await(v)),
                Instruction::Throw(v) => self.raise(v)?,
                Instruction::Return(v) => return Ok(CoroutineStep::Return(v)),
                Instruction::ReturnReceived => return Ok(CoroutineStep::Return(self.received.clone())),
                Instruction::EnterTry { catch_pc } => self.try_stack.push(catch_pc),
                Instruction::LeaveTry => {
                    self.try_stack.pop();
                }
            }
        }
    }
}

impl ExecutionPauser for ScriptedBody {
    fn resume(&mut self, input: ResumeInput) -> Result<CoroutineStep, EvalError> {
        match self.suspension {
            Suspension::Finished => return Err(raise_internal_error!("resumed a generator body that already finished").into()),
            Suspension::Running => return Err(raise_internal_error!("generator body resumed while running").into()),
            Suspension::NotStarted => {
                self.suspension = Suspension::Running;
                if let ResumeInput::Throw(e) = input {
                    self.suspension = Suspension::Finished;
                    return Err(EvalError::Throw(e));
                }
            }
            Suspension::AtYield | Suspension::AtAwait => {
                self.suspension = Suspension::Running;
                match input {
                    ResumeInput::Next(v) => self.received = v,
                    ResumeInput::Throw(e) => {
                        if let Err(uncaught) = self.raise(e) {
                            self.suspension = Suspension::Finished;
                            return Err(uncaught);
                        }
                    }
                }
            }
        }
        let step = self.run();
        self.suspension = Suspension::after(&step);
        step
    }

    fn has_started(&self) -> bool {
        self.suspension != Suspension::NotStarted
    }

    fn is_suspended_at_yield(&self) -> bool {
        self.suspension == Suspension::AtYield
    }

    fn is_suspended_at_await(&self) -> bool {
        self.suspension == Suspension::AtAwait
    }

    fn has_finished(&self) -> bool {
        self.suspension == Suspension::Finished
    }
}
