//! HTTP request → RPC request message translation.
//!
//! # Responsibilities
//! - Decode the JSON body into the whole input message or one of its fields
//! - Apply path captures to (possibly dotted) field paths
//! - Apply query parameters to the remaining scalar fields
//! - Split a streaming body into one message per JSON value
//!
//! # Design Decisions
//! - Order: body, then path, then query; later sources overwrite singular fields
//! - Stream frames replace, field by field, whatever the path and query put in the template
//! - Unknown query parameters are ignored, unknown body fields are rejected
//! - Every failure names the field that could not be decoded

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value};
use thiserror::Error;

use crate::routing::matcher::Captures;
use crate::rpc::descriptor::{find_field, resolve_field_path, BodyBinding, MethodBinding};

/// Field name reported when the body itself is malformed.
pub const BODY_FIELD: &str = "body";

/// A request value that could not be turned into the input message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value for {field:?}: {reason}")]
pub struct DecodeFailure {
    pub field: String,
    pub reason: String,
}

impl DecodeFailure {
    fn new(field: &str, reason: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Build the input message for a unary call or a single-request stream.
pub fn translate(
    binding: &MethodBinding,
    captures: &Captures,
    query: Option<&str>,
    body: &[u8],
) -> Result<DynamicMessage, DecodeFailure> {
    let input = binding.method.input();
    let mut message = match &binding.body {
        BodyBinding::None => DynamicMessage::new(input),
        BodyBinding::Whole => decode_json(input, body)?,
        BodyBinding::Field(field) => {
            let mut message = DynamicMessage::new(input);
            if let Kind::Message(target) = field.kind() {
                if !is_blank(body) {
                    let value = decode_json(target, body)?;
                    message.set_field(field, Value::Message(value));
                }
            }
            message
        }
    };

    apply_captures(&mut message, captures)?;
    if !matches!(binding.body, BodyBinding::Whole) {
        apply_query(&mut message, binding, query)?;
    }
    Ok(message)
}

/// Request template for streaming calls: path captures and query parameters only.
pub fn template(
    binding: &MethodBinding,
    captures: &Captures,
    query: Option<&str>,
) -> Result<DynamicMessage, DecodeFailure> {
    let mut message = DynamicMessage::new(binding.method.input());
    apply_captures(&mut message, captures)?;
    apply_query(&mut message, binding, query)?;
    Ok(message)
}

/// Decode one JSON message and layer it on top of `template`.
pub fn merge_json(template: &DynamicMessage, json: &[u8]) -> Result<DynamicMessage, DecodeFailure> {
    if is_blank(json) {
        return Ok(template.clone());
    }
    let value: serde_json::Value =
        serde_json::from_slice(json).map_err(|e| DecodeFailure::new(BODY_FIELD, e))?;
    layer(template, &value)
}

/// Decode concatenated or newline-delimited JSON messages, each layered on `template`.
pub fn decode_stream_body(
    template: &DynamicMessage,
    body: &[u8],
) -> Result<Vec<DynamicMessage>, DecodeFailure> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<serde_json::Value>()
        .map(|value| {
            let value = value.map_err(|e| DecodeFailure::new(BODY_FIELD, e))?;
            layer(template, &value)
        })
        .collect()
}

/// Every field named in `json` replaces the template's value, lists and defaults included.
fn layer(template: &DynamicMessage, json: &serde_json::Value) -> Result<DynamicMessage, DecodeFailure> {
    let descriptor = template.descriptor();
    let decoded = DynamicMessage::deserialize(descriptor.clone(), json)
        .map_err(|e| DecodeFailure::new(BODY_FIELD, e))?;

    let mut merged = template.clone();
    if let serde_json::Value::Object(fields) = json {
        for name in fields.keys() {
            if let Some(field) = find_field(&descriptor, name) {
                merged.set_field(&field, decoded.get_field(&field).into_owned());
            }
        }
    }
    Ok(merged)
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(u8::is_ascii_whitespace)
}

fn decode_json(descriptor: MessageDescriptor, body: &[u8]) -> Result<DynamicMessage, DecodeFailure> {
    if is_blank(body) {
        return Ok(DynamicMessage::new(descriptor));
    }
    let mut deserializer = serde_json::Deserializer::from_slice(body);
    let message = DynamicMessage::deserialize(descriptor, &mut deserializer)
        .map_err(|e| DecodeFailure::new(BODY_FIELD, e))?;
    deserializer
        .end()
        .map_err(|e| DecodeFailure::new(BODY_FIELD, e))?;
    Ok(message)
}

fn apply_captures(message: &mut DynamicMessage, captures: &Captures) -> Result<(), DecodeFailure> {
    for (name, value) in captures {
        // Positional captures match but bind no field.
        if name.parse::<usize>().is_ok() {
            continue;
        }
        let chain = resolve_field_path(&message.descriptor(), name)
            .ok_or_else(|| DecodeFailure::new(name, "no such field"))?;
        set_path(message, &chain, name, value)?;
    }
    Ok(())
}

fn apply_query(
    message: &mut DynamicMessage,
    binding: &MethodBinding,
    query: Option<&str>,
) -> Result<(), DecodeFailure> {
    let Some(query) = query else {
        return Ok(());
    };
    let body_field = match &binding.body {
        BodyBinding::Field(field) => Some(field.name().to_string()),
        _ => None,
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if binding.path_fields.iter().any(|f| *f == key) {
            continue;
        }
        if body_field
            .as_deref()
            .is_some_and(|b| key.split('.').next() == Some(b))
        {
            continue;
        }
        let Some(chain) = resolve_field_path(&message.descriptor(), &key) else {
            tracing::trace!(param = %key, "Ignoring unknown query parameter");
            continue;
        };
        let scalar = chain
            .last()
            .is_some_and(|f| !matches!(f.kind(), Kind::Message(_)) && !f.is_map());
        if !scalar {
            tracing::trace!(param = %key, "Ignoring query parameter bound to a message field");
            continue;
        }
        set_path(message, &chain, &key, &value)?;
    }
    Ok(())
}

/// Walk `chain` from `message`, creating nested messages, and set the leaf from `raw`.
fn set_path(
    message: &mut DynamicMessage,
    chain: &[FieldDescriptor],
    name: &str,
    raw: &str,
) -> Result<(), DecodeFailure> {
    let Some((leaf, parents)) = chain.split_last() else {
        return Err(DecodeFailure::new(name, "empty field path"));
    };

    let mut current = message;
    for field in parents {
        let Value::Message(next) = current.get_field_mut(field) else {
            return Err(DecodeFailure::new(name, "not a message field"));
        };
        current = next;
    }

    let value = coerce(leaf, raw).map_err(|reason| DecodeFailure::new(name, reason))?;
    if leaf.is_list() {
        match current.get_field_mut(leaf) {
            Value::List(values) => values.push(value),
            _ => return Err(DecodeFailure::new(name, "not a repeated field")),
        }
    } else {
        current.set_field(leaf, value);
    }
    Ok(())
}

/// Parse a textual value for a scalar, bytes or enum field.
fn coerce(field: &FieldDescriptor, raw: &str) -> Result<Value, String> {
    let number = |e: &dyn std::fmt::Display| format!("{raw:?} is not a valid number: {e}");
    let value = match field.kind() {
        Kind::Double => Value::F64(raw.parse().map_err(|e| number(&e))?),
        Kind::Float => Value::F32(raw.parse().map_err(|e| number(&e))?),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => {
            Value::I32(raw.parse().map_err(|e| number(&e))?)
        }
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            Value::I64(raw.parse().map_err(|e| number(&e))?)
        }
        Kind::Uint32 | Kind::Fixed32 => Value::U32(raw.parse().map_err(|e| number(&e))?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(raw.parse().map_err(|e| number(&e))?),
        Kind::Bool => match raw {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(format!("{raw:?} is not a boolean")),
        },
        Kind::String => Value::String(raw.to_string()),
        Kind::Bytes => {
            let decoded = [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
                .iter()
                .find_map(|engine| engine.decode(raw).ok())
                .ok_or_else(|| format!("{raw:?} is not valid base64"))?;
            Value::Bytes(Bytes::from(decoded))
        }
        Kind::Enum(descriptor) => match descriptor.get_value_by_name(raw) {
            Some(value) => Value::EnumNumber(value.number()),
            None => Value::EnumNumber(
                raw.parse()
                    .map_err(|_| format!("{raw:?} is not a value of {}", descriptor.full_name()))?,
            ),
        },
        Kind::Message(descriptor) => {
            return Err(format!("{} is not a scalar type", descriptor.full_name()))
        }
    };
    Ok(value)
}
