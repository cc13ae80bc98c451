use crate::core::Value;

#[derive(thiserror::Error, Debug)]
pub enum JSError {
    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Internal error at {method} {file}:{line}: {message}")]
    InternalError {
        message: String,
        file: String,
        line: usize,
        method: String,
    },

    #[error("Syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Infinite loop detected (executed {iterations} iterations)")]
    InfiniteLoopError { iterations: usize },

    #[error("Thrown value: {value:?}")]
    Throw { value: Value },
}

impl JSError {
    pub fn message(&self) -> String {
        match self {
            JSError::TypeError { message } | JSError::SyntaxError { message } | JSError::InternalError { message, .. } => message.clone(),
            JSError::InfiniteLoopError { iterations } => format!("task budget exhausted after {iterations} tasks"),
            JSError::Throw { value } => crate::core::value_to_string(value),
        }
    }

    /// Whether the error reports a defect in the engine itself rather than a
    /// language-level failure.
    pub fn is_internal(&self) -> bool {
        matches!(self, JSError::InternalError { .. })
    }
}

/// Either an engine fault or a language-level exception carrying a value.
#[derive(Debug)]
pub enum EvalError {
    Js(JSError),
    Throw(Value),
}

impl From<JSError> for EvalError {
    fn from(e: JSError) -> Self {
        EvalError::Js(e)
    }
}

impl From<EvalError> for JSError {
    fn from(e: EvalError) -> Self {
        match e {
            EvalError::Js(j) => j,
            EvalError::Throw(value) => JSError::Throw { value },
        }
    }
}

impl EvalError {
    /// Convert into the value a rejection or `catch` would observe.
    pub fn into_value(self) -> Value {
        match self {
            EvalError::Throw(v) => v,
            EvalError::Js(JSError::Throw { value }) => value,
            EvalError::Js(j) => js_error_to_value(&j),
        }
    }
}

/// Build an error object `{ name, message }` for a `JSError` so it can travel
/// through promise rejections.
pub fn js_error_to_value(err: &JSError) -> Value {
    let name = match err {
        JSError::TypeError { .. } => "TypeError",
        JSError::SyntaxError { .. } => "SyntaxError",
        JSError::InfiniteLoopError { .. } => "RangeError",
        JSError::InternalError { .. } => "InternalError",
        JSError::Throw { value } => return value.clone(),
    };
    let obj = crate::core::new_js_object_data();
    crate::core::object_set_key_value(&obj, "name", Value::from(name));
    crate::core::object_set_key_value(&obj, "message", Value::from(err.message().as_str()));
    Value::Object(obj)
}

#[macro_export]
macro_rules! raise_type_error {
    ($($arg:tt)*) => {
        $crate::JSError::TypeError {
            message: format!($($arg)*),
        }
    };
}

#[macro_export]
macro_rules! raise_syntax_error {
    ($($arg:tt)*) => {
        $crate::JSError::SyntaxError {
            message: format!($($arg)*),
        }
    };
}

// Macro that constructs an InternalError using the compile-time caller
// location. Using a macro (rather than a function) ensures `file!()` and
// `line!()` expand to the site where the macro is invoked.
#[macro_export]
macro_rules! raise_internal_error {
    ($($arg:tt)*) => {
        $crate::JSError::InternalError {
            message: format!($($arg)*),
            file: file!().to_string(),
            line: line!() as usize,
            method: $crate::function_name!().to_string(),
        }
    };
}

#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // remove the trailing "::f"
        &name[..name.len() - 3]
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_records_call_site() {
        let err = raise_internal_error!("pauser missing for generator {}", 3);
        match &err {
            JSError::InternalError { message, file, method, .. } => {
                assert_eq!(message, "pauser missing for generator 3");
                assert!(file.ends_with("error.rs"));
                assert!(method.contains("internal_error_records_call_site"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_internal());
    }

    #[test]
    fn type_error_becomes_error_object() {
        let err = raise_type_error!("bad receiver");
        let v = js_error_to_value(&err);
        assert_eq!(crate::core::value_to_string(&crate::core::get_property(&v, "name")), "TypeError");
        assert_eq!(crate::core::value_to_string(&crate::core::get_property(&v, "message")), "bad receiver");
    }

    #[test]
    fn thrown_values_pass_through_unchanged() {
        let e: JSError = EvalError::Throw(Value::Number(4.0)).into();
        match EvalError::from(e).into_value() {
            Value::Number(n) => assert_eq!(n, 4.0),
            other => panic!("unexpected {other:?}"),
        }
    }
}
