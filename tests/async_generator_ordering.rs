use async_generator_engine::{
    AsyncGeneratorState, CoroutineStep, EvalError, Instruction, JSError, ResumeInput, ScriptedBody, StepFunction, Value,
    async_generator_next, async_generator_return, async_generator_state, async_generator_throw, event_loop_task_limit, get_property,
    new_async_generator, new_native_function, pending_task_count, promise_then, reset_global_state, run_event_loop,
    set_event_loop_task_limit, set_unhandled_rejection_tracking, take_unhandled_rejections, value_to_string,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

// Initialize logger for this integration test binary so `RUST_LOG` is honored.
// Using `ctor` ensures initialization runs before tests start.
#[ctor::ctor]
fn __init_test_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default()).is_test(true).try_init();
}

#[cfg(test)]
mod async_generator_ordering {
    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Attach fulfil/reject callbacks to `promise` that append
    /// `"<tag>:<value>"` or `"<tag>!<reason>"` to `log`.
    fn observe(promise: &Value, tag: &str, log: &Log) {
        let on_fulfilled = {
            let log = log.clone();
            let tag = tag.to_string();
            new_native_function("onFulfilled", move |_this, args| {
                let result = args.first().cloned().unwrap_or_default();
                let entry = format!(
                    "{tag}:{}/{}",
                    value_to_string(&get_property(&result, "value")),
                    value_to_string(&get_property(&result, "done"))
                );
                log.borrow_mut().push(entry);
                Ok(Value::Undefined)
            })
        };
        let on_rejected = {
            let log = log.clone();
            let tag = tag.to_string();
            new_native_function("onRejected", move |_this, args| {
                let reason = args.first().cloned().unwrap_or_default();
                log.borrow_mut().push(format!("{tag}!{}", value_to_string(&reason)));
                Ok(Value::Undefined)
            })
        };
        promise_then(promise, on_fulfilled, on_rejected).unwrap();
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn test_settlement_follows_request_order() {
        reset_global_state();
        let generator = new_async_generator(ScriptedBody::new(vec![
            Instruction::Await(num(1.0)),
            Instruction::Yield(Value::from("a")),
            Instruction::Await(num(2.0)),
            Instruction::Yield(Value::from("b")),
            Instruction::Return(Value::from("c")),
        ]));
        let log: Log = Rc::default();

        for i in 0..4 {
            let p = async_generator_next(&generator, Value::Undefined).unwrap();
            observe(&p, &i.to_string(), &log);
        }
        let t = async_generator_throw(&generator, Value::from("x")).unwrap();
        observe(&t, "4", &log);

        run_event_loop().unwrap();
        assert_eq!(*log.borrow(), vec!["0:a/false", "1:b/false", "2:c/true", "3:undefined/true", "4!x"]);
    }

    #[test]
    fn test_at_most_one_resumption_in_flight() {
        reset_global_state();
        let active = Rc::new(Cell::new(0usize));
        let max_active = Rc::new(Cell::new(0usize));
        let steps = Rc::new(Cell::new(0usize));
        let generator = {
            let (active, max_active, steps) = (active.clone(), max_active.clone(), steps.clone());
            new_async_generator(StepFunction::new(move |_input| {
                active.set(active.get() + 1);
                max_active.set(max_active.get().max(active.get()));
                let step = steps.get();
                steps.set(step + 1);
                let outcome = match step % 3 {
                    0 | 1 => CoroutineStep::Await(num(step as f64)),
                    _ if step >= 8 => CoroutineStep::Return(Value::Undefined),
                    _ => CoroutineStep::Yield(num(step as f64)),
                };
                active.set(active.get() - 1);
                Ok(outcome)
            }))
        };

        let promises: Vec<Value> = (0..5).map(|_| async_generator_next(&generator, Value::Undefined).unwrap()).collect();
        assert_eq!(steps.get(), 1);
        run_event_loop().unwrap();

        assert_eq!(max_active.get(), 1);
        assert_eq!(steps.get(), 9);
        assert_eq!(async_generator_state(&generator), Some(AsyncGeneratorState::Completed));
        assert_eq!(promises.len(), 5);
    }

    #[test]
    fn test_request_from_inside_body_waits_for_current_step() {
        reset_global_state();
        let slot: Rc<RefCell<Option<Value>>> = Rc::default();
        let inner: Rc<RefCell<Option<Value>>> = Rc::default();
        let generator = {
            let (slot, inner) = (slot.clone(), inner.clone());
            let mut step = 0;
            new_async_generator(StepFunction::new(move |_input| {
                step += 1;
                if step == 1 {
                    let this = slot.borrow().clone().unwrap_or_default();
                    let p = async_generator_next(&this, Value::Undefined)?;
                    assert_eq!(async_generator_state(&this), Some(AsyncGeneratorState::Executing));
                    *inner.borrow_mut() = Some(p);
                }
                Ok(CoroutineStep::Yield(num(step as f64)))
            }))
        };
        *slot.borrow_mut() = Some(generator.clone());
        let log: Log = Rc::default();

        let outer = async_generator_next(&generator, Value::Undefined).unwrap();
        observe(&outer, "outer", &log);
        let nested = inner.borrow().clone().unwrap();
        observe(&nested, "nested", &log);
        run_event_loop().unwrap();

        assert_eq!(*log.borrow(), vec!["outer:1/false", "nested:2/false"]);
        // break the generator <-> body cycle
        slot.borrow_mut().take();
    }

    #[test]
    fn test_completed_generator_is_terminal() {
        reset_global_state();
        let generator = new_async_generator(ScriptedBody::new(vec![]));
        async_generator_next(&generator, Value::Undefined).unwrap();
        run_event_loop().unwrap();
        let log: Log = Rc::default();

        for round in 0..3 {
            let n = async_generator_next(&generator, Value::from("ignored")).unwrap();
            observe(&n, &format!("n{round}"), &log);
            let r = async_generator_return(&generator, num(round as f64)).unwrap();
            observe(&r, &format!("r{round}"), &log);
            let t = async_generator_throw(&generator, Value::from("e")).unwrap();
            observe(&t, &format!("t{round}"), &log);
            assert_eq!(async_generator_state(&generator), Some(AsyncGeneratorState::Completed));
        }
        run_event_loop().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                "n0:undefined/true",
                "r0:0/true",
                "t0!e",
                "n1:undefined/true",
                "r1:1/true",
                "t1!e",
                "n2:undefined/true",
                "r2:2/true",
                "t2!e",
            ]
        );
        assert!(take_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_each_request_settles_once() {
        reset_global_state();
        let generator = new_async_generator(ScriptedBody::new(vec![
            Instruction::Yield(num(1.0)),
            Instruction::Await(num(2.0)),
            Instruction::Throw(Value::from("fail")),
        ]));
        let log: Log = Rc::default();

        let requests = [
            async_generator_next(&generator, Value::Undefined).unwrap(),
            async_generator_next(&generator, Value::Undefined).unwrap(),
            async_generator_return(&generator, num(3.0)).unwrap(),
        ];
        for (i, p) in requests.iter().enumerate() {
            observe(p, &i.to_string(), &log);
        }
        run_event_loop().unwrap();
        run_event_loop().unwrap();

        assert_eq!(*log.borrow(), vec!["0:1/false", "1!fail", "2:3/true"]);
    }

    #[test]
    fn test_resume_input_reaches_body() {
        reset_global_state();
        let seen: Rc<RefCell<Vec<String>>> = Rc::default();
        let generator = {
            let seen = seen.clone();
            new_async_generator(StepFunction::new(move |input| {
                let entry = match input {
                    ResumeInput::Next(v) => format!("next {}", value_to_string(&v)),
                    ResumeInput::Throw(v) => format!("throw {}", value_to_string(&v)),
                };
                seen.borrow_mut().push(entry);
                Ok(CoroutineStep::Yield(Value::Undefined))
            }))
        };

        async_generator_next(&generator, Value::from("first")).unwrap();
        async_generator_next(&generator, Value::from("second")).unwrap();
        async_generator_throw(&generator, Value::from("third")).unwrap();
        assert_eq!(*seen.borrow(), vec!["next first", "next second", "throw third"]);
    }

    #[test]
    fn test_unhandled_rejection_tracking() {
        reset_global_state();
        let generator = new_async_generator(ScriptedBody::new(vec![]));
        let p = async_generator_throw(&generator, Value::from("lost")).unwrap();
        run_event_loop().unwrap();
        let reasons = take_unhandled_rejections();
        assert_eq!(reasons.len(), 1);
        assert_eq!(value_to_string(&reasons[0]), "lost");

        let log: Log = Rc::default();
        observe(&p, "late", &log);
        run_event_loop().unwrap();
        assert_eq!(*log.borrow(), vec!["late!lost"]);

        set_unhandled_rejection_tracking(false);
        async_generator_throw(&generator, Value::from("quiet")).unwrap();
        run_event_loop().unwrap();
        assert!(take_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_task_limit_stops_endless_awaits() {
        reset_global_state();
        assert_eq!(event_loop_task_limit(), 1_000_000);
        set_event_loop_task_limit(50);
        let generator = new_async_generator(StepFunction::new(|_input| Ok(CoroutineStep::Await(Value::Undefined))));

        async_generator_next(&generator, Value::Undefined).unwrap();
        let err = run_event_loop().unwrap_err();
        assert!(matches!(err, JSError::InfiniteLoopError { iterations: 50 }));
        assert!(pending_task_count() > 0);
        reset_global_state();
    }

    #[test]
    fn test_internal_error_from_body_propagates() {
        reset_global_state();
        let generator = new_async_generator(StepFunction::new(|_input| {
            Err(EvalError::Js(JSError::InternalError {
                message: "corrupt frame".to_string(),
                file: file!().to_string(),
                line: line!() as usize,
                method: "test".to_string(),
            }))
        }));

        let err = async_generator_next(&generator, Value::Undefined).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(err.message(), "corrupt frame");
        assert_eq!(async_generator_state(&generator), Some(AsyncGeneratorState::Completed));

        let after = async_generator_next(&generator, Value::Undefined).unwrap();
        let log: Log = Rc::default();
        observe(&after, "after", &log);
        run_event_loop().unwrap();
        assert_eq!(*log.borrow(), vec!["after:undefined/true"]);
        take_unhandled_rejections();
    }
}
