use crate::core::{JSObjectDataPtr, Value, new_js_object_data, object_get_key_value, object_set_key_value};
use crate::error::JSError;
use crate::js_execution_pauser::Instruction;
use crate::js_promise::{PromiseState, get_promise_state, new_rejected_promise};
use crate::raise_syntax_error;
use crate::unicode::{utf8_to_utf16, utf16_to_utf8};

pub fn json_value_to_js_value(json_value: serde_json::Value) -> Value {
    match json_value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or_default(),
        serde_json::Value::String(s) => Value::String(utf8_to_utf16(&s)),
        serde_json::Value::Array(arr) => {
            let obj = new_js_object_data();
            let len = arr.len();
            for (i, item) in arr.into_iter().enumerate() {
                object_set_key_value(&obj, &i.to_string(), json_value_to_js_value(item));
            }
            object_set_key_value(&obj, "length", Value::Number(len as f64));
            Value::Object(obj)
        }
        serde_json::Value::Object(map) => {
            let obj = new_js_object_data();
            for (key, value) in map.into_iter() {
                object_set_key_value(&obj, &key, json_value_to_js_value(value));
            }
            Value::Object(obj)
        }
    }
}

fn array_length(obj: &JSObjectDataPtr) -> Option<usize> {
    let len = object_get_key_value(obj, "length")?.as_number()?;
    if len < 0.0 || len.fract() != 0.0 {
        return None;
    }
    let len = len as usize;
    // Only objects shaped exactly like a dense array serialize as one.
    let shaped = obj.borrow().properties.len() == len + 1 && (0..len).all(|i| obj.borrow().properties.contains_key(&i.to_string()));
    shaped.then_some(len)
}

/// `None` for values JSON cannot carry (undefined, functions, promises,
/// generators, non-finite numbers); object members holding them are skipped.
pub fn js_value_to_json_value(js_value: &Value) -> Option<serde_json::Value> {
    match js_value {
        Value::Undefined | Value::Function(_) | Value::Promise(_) | Value::AsyncGenerator(_) => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
        Value::Number(n) => {
            if !n.is_finite() {
                None
            } else if *n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
                Some(serde_json::Value::Number(serde_json::Number::from(*n as i64)))
            } else {
                Some(serde_json::Value::Number(serde_json::Number::from_f64(*n)?))
            }
        }
        Value::String(s) => Some(serde_json::Value::String(utf16_to_utf8(s))),
        Value::Object(obj) => {
            if let Some(len) = array_length(obj) {
                let arr = (0..len)
                    .map(|i| {
                        object_get_key_value(obj, &i.to_string())
                            .and_then(|v| js_value_to_json_value(&v))
                            .unwrap_or(serde_json::Value::Null)
                    })
                    .collect();
                return Some(serde_json::Value::Array(arr));
            }
            let mut map = serde_json::Map::new();
            for (key, value) in obj.borrow().properties.iter() {
                if let Some(json_val) = js_value_to_json_value(value) {
                    map.insert(key.clone(), json_val);
                }
            }
            Some(serde_json::Value::Object(map))
        }
    }
}

pub fn parse_json_value(text: &str) -> Result<Value, JSError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| raise_syntax_error!("invalid JSON {text:?}: {e}"))?;
    Ok(json_value_to_js_value(json))
}

/// Describe how a promise has settled so far:
/// `{"status": "pending" | "fulfilled" | "rejected", "value" | "reason": ...}`.
pub fn settlement_to_json(promise: &Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    match get_promise_state(promise) {
        Some(PromiseState::Pending) | None => {
            map.insert("status".into(), "pending".into());
        }
        Some(PromiseState::Fulfilled(value)) => {
            map.insert("status".into(), "fulfilled".into());
            map.insert("value".into(), js_value_to_json_value(&value).unwrap_or(serde_json::Value::Null));
        }
        Some(PromiseState::Rejected(reason)) => {
            map.insert("status".into(), "rejected".into());
            map.insert("reason".into(), js_value_to_json_value(&reason).unwrap_or(serde_json::Value::Null));
        }
    }
    serde_json::Value::Object(map)
}

fn instruction_from_json(item: serde_json::Value) -> Result<Instruction, JSError> {
    match item {
        serde_json::Value::String(op) => match op.as_str() {
            "yieldReceived" => Ok(Instruction::YieldReceived),
            "returnReceived" => Ok(Instruction::ReturnReceived),
            "leaveTry" => Ok(Instruction::LeaveTry),
            "return" => Ok(Instruction::Return(Value::Undefined)),
            other => Err(raise_syntax_error!("unknown instruction \"{other}\"")),
        },
        serde_json::Value::Object(map) if map.len() == 1 => {
            let Some((op, operand)) = map.into_iter().next() else {
                return Err(raise_syntax_error!("empty instruction object"));
            };
            match op.as_str() {
                "yield" => Ok(Instruction::Yield(json_value_to_js_value(operand))),
                "await" => Ok(Instruction::Await(json_value_to_js_value(operand))),
                // Await an already-rejected promise.
                "awaitRejected" => Ok(Instruction::Await(new_rejected_promise(json_value_to_js_value(operand)))),
                "throw" => Ok(Instruction::Throw(json_value_to_js_value(operand))),
                "return" => Ok(Instruction::Return(json_value_to_js_value(operand))),
                "try" => {
                    let catch_pc = operand
                        .as_u64()
                        .ok_or_else(|| raise_syntax_error!("\"try\" expects a catch target index, got {operand}"))?;
                    Ok(Instruction::EnterTry { catch_pc: catch_pc as usize })
                }
                other => Err(raise_syntax_error!("unknown instruction \"{other}\"")),
            }
        }
        other => Err(raise_syntax_error!("malformed instruction {other}")),
    }
}

/// Parse a generator body written as a JSON array, e.g.
/// `[{"yield": 1}, {"await": 2}, "yieldReceived", {"try": 5}, {"return": 3}]`.
pub fn instructions_from_json(text: &str) -> Result<Vec<Instruction>, JSError> {
    let json: serde_json::Value = serde_json::from_str(text).map_err(|e| raise_syntax_error!("invalid JSON: {e}"))?;
    let serde_json::Value::Array(items) = json else {
        return Err(raise_syntax_error!("a generator body must be a JSON array"));
    };
    let code = items.into_iter().map(instruction_from_json).collect::<Result<Vec<_>, _>>()?;
    log::debug!("instructions_from_json: parsed {} instructions", code.len());
    Ok(code)
}
