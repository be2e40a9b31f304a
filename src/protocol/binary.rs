//! Binary attachments embedded in JSON payloads via placeholder objects of
//! the shape `{"_placeholder": true, "num": k}`.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ProtocolError, Result};

/// One argument of an emitted event.
///
/// JSON arguments travel inside the packet's text frame; binary arguments
/// are extracted into attachment frames and replaced by placeholders.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A JSON value.
    Json(Value),
    /// A raw byte blob, sent as a binary attachment.
    Binary(Bytes),
}

impl Arg {
    /// Serialize any value into a JSON argument.
    pub fn json<T: Serialize>(value: &T) -> Result<Arg> {
        Ok(Arg::Json(serde_json::to_value(value)?))
    }

    /// A binary argument.
    pub fn binary(data: impl Into<Bytes>) -> Arg {
        Arg::Binary(data.into())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Arg {
        Arg::Json(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Arg {
        Arg::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Arg {
        Arg::Json(Value::String(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Arg {
        Arg::Json(Value::Bool(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Arg {
        Arg::Json(Value::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Arg {
        Arg::Json(Value::from(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Arg {
        Arg::Binary(value)
    }
}

/// Turn an argument list into the JSON values for the text frame plus the
/// extracted attachments, numbering each placeholder by position.
pub fn deconstruct_args(args: Vec<Arg>) -> (Vec<Value>, Vec<Bytes>) {
    let mut attachments = Vec::new();
    let values = args
        .into_iter()
        .map(|arg| match arg {
            Arg::Json(value) => value,
            Arg::Binary(data) => {
                let num = attachments.len();
                attachments.push(data);
                json!({ "_placeholder": true, "num": num })
            }
        })
        .collect();
    (values, attachments)
}

/// Replace every placeholder in `value` with the bytes of the attachment it
/// names, rendered as a JSON byte array.
///
/// Placeholders may sit at any nesting depth. An index outside the
/// attachment list is a protocol error.
pub fn reconstruct(value: &mut Value, attachments: &[Bytes]) -> Result<()> {
    if let Some(num) = placeholder_index(value) {
        let data = attachments
            .get(num)
            .ok_or(ProtocolError::AttachmentOutOfRange(num))?;
        *value = Value::Array(data.iter().map(|&b| Value::from(b)).collect());
        return Ok(());
    }
    match value {
        Value::Array(items) => {
            for item in items {
                reconstruct(item, attachments)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                reconstruct(item, attachments)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn placeholder_index(value: &Value) -> Option<usize> {
    let map = value.as_object()?;
    if map.get("_placeholder")?.as_bool()? {
        map.get("num")?.as_u64().map(|num| num as usize)
    } else {
        None
    }
}
