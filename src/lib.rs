pub(crate) mod core;
pub(crate) mod error;
pub(crate) mod js_async_generator;
pub(crate) mod js_execution_pauser;
pub(crate) mod js_json;
pub(crate) mod js_promise;
pub(crate) mod unicode;

pub use core::{
    JSNativeFunction, JSObjectData, JSObjectDataPtr, Value, call_function, get_property, is_callable, new_js_object_data,
    new_native_function, object_get_key_value, object_set_key_value, same_value, value_to_string,
};
pub use error::{EvalError, JSError, js_error_to_value};
pub use js_async_generator::{
    AsyncGeneratorRequest, AsyncGeneratorRequestKind, AsyncGeneratorState, JSAsyncGenerator, JSAsyncGeneratorPtr, async_generator_next,
    async_generator_return, async_generator_state, async_generator_throw, create_iterator_result_obj, handle_async_generator_prototype_method,
    initialize_async_generator_prototype, new_async_generator,
};
pub use js_execution_pauser::{CoroutineStep, ExecutionPauser, Instruction, ResumeInput, ScriptedBody, StepFunction};
pub use js_json::{instructions_from_json, js_value_to_json_value, json_value_to_js_value, parse_json_value, settlement_to_json};
pub use js_promise::{
    JSPromise, JSPromisePtr, PollResult, PromiseCapability, PromiseState, create_promise_capability, event_loop_task_limit,
    get_promise_state, new_rejected_promise, new_resolved_promise, pending_task_count, poll_event_loop, promise_resolve, promise_then,
    reject_promise, reset_global_state, resolve_promise, run_event_loop, set_event_loop_task_limit, set_unhandled_rejection_tracking,
    take_unhandled_rejections, unhandled_rejection_tracking,
};
pub use unicode::{utf8_to_utf16, utf16_to_utf8};
