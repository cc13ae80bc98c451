use crate::error::EvalError;
use crate::js_async_generator::JSAsyncGeneratorPtr;
use crate::js_promise::JSPromisePtr;
use crate::raise_type_error;
use crate::unicode::{utf8_to_utf16, utf16_to_utf8};
use std::cell::RefCell;
use std::rc::Rc;

pub type JSObjectDataPtr = Rc<RefCell<JSObjectData>>;

#[inline]
pub fn new_js_object_data() -> JSObjectDataPtr {
    Rc::new(RefCell::new(JSObjectData::new()))
}

#[derive(Clone, Default)]
pub struct JSObjectData {
    pub properties: indexmap::IndexMap<String, Value>,
}

impl JSObjectData {
    pub fn new() -> Self {
        Self::default()
    }
}

pub type NativeFn = dyn Fn(&Value, &[Value]) -> Result<Value, EvalError>;

/// A host function callable from script values, e.g. promise resolving
/// functions or a thenable's `then`.
pub struct JSNativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
}

pub fn new_native_function<F>(name: &str, func: F) -> Value
where
    F: Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
{
    Value::Function(Rc::new(JSNativeFunction {
        name: name.to_string(),
        func: Box::new(func),
    }))
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Vec<u16>), // UTF-16 code units
    Object(JSObjectDataPtr),
    Function(Rc<JSNativeFunction>),
    Promise(JSPromisePtr),
    AsyncGenerator(JSAsyncGeneratorPtr),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(utf8_to_utf16(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(utf16_to_utf8(s)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", utf16_to_utf8(s)),
            Value::Object(obj) => match obj.try_borrow() {
                Ok(data) => f.debug_map().entries(data.properties.iter()).finish(),
                Err(_) => write!(f, "{{...}}"),
            },
            Value::Function(func) => write!(f, "[Function: {}]", func.name),
            Value::Promise(p) => match p.try_borrow() {
                Ok(promise) => write!(f, "Promise#{} {:?}", promise.id, promise.state),
                Err(_) => write!(f, "Promise"),
            },
            Value::AsyncGenerator(g) => match g.try_borrow() {
                Ok(generator) => write!(f, "AsyncGenerator#{} {:?}", generator.id(), generator.state()),
                Err(_) => write!(f, "AsyncGenerator"),
            },
        }
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        format!("{}", n as i64)
    } else if n == n.trunc() && n.abs() < 1e21 {
        // Exact integers past 2^53 print in full through f64 formatting.
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => number_to_string(*n),
        Value::String(s) => utf16_to_utf8(s),
        Value::Object(obj) => {
            // Error-like objects render as `Name: message`.
            let name = object_get_key_value(obj, "name");
            let message = object_get_key_value(obj, "message");
            match (name, message) {
                (Some(Value::String(n)), Some(Value::String(m))) => format!("{}: {}", utf16_to_utf8(&n), utf16_to_utf8(&m)),
                _ => "[object Object]".to_string(),
            }
        }
        Value::Function(func) => format!("function {}() {{ [native code] }}", func.name),
        Value::Promise(_) => "[object Promise]".to_string(),
        Value::AsyncGenerator(_) => "[object AsyncGenerator]".to_string(),
    }
}

pub fn object_set_key_value(obj: &JSObjectDataPtr, key: &str, value: Value) {
    obj.borrow_mut().properties.insert(key.to_string(), value);
}

pub fn object_get_key_value(obj: &JSObjectDataPtr, key: &str) -> Option<Value> {
    obj.borrow().properties.get(key).cloned()
}

/// Property read on an arbitrary value; anything that is not an object, or a
/// missing key, reads as `undefined`.
pub fn get_property(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(obj) => object_get_key_value(obj, key).unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

pub fn is_callable(value: &Value) -> bool {
    matches!(value, Value::Function(_))
}

pub fn call_function(func: &Value, this_val: &Value, args: &[Value]) -> Result<Value, EvalError> {
    match func {
        Value::Function(native) => {
            log::trace!("call_function: invoking native function {}", native.name);
            (native.func)(this_val, args)
        }
        other => Err(raise_type_error!("{} is not a function", value_to_string(other)).into()),
    }
}

/// Identity comparison for reference values, `SameValue` for primitives.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Promise(x), Value::Promise(y)) => Rc::ptr_eq(x, y),
        (Value::AsyncGenerator(x), Value::AsyncGenerator(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}
