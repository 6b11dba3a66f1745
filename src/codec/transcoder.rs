//! Schema-driven conversion between raw characteristic bytes and typed values.

use super::bits;
use crate::domain::schema::{
    Addressing, ArraySchema, Frame, NumericFrame, NumericSchema, ObjectSchema, ResourceSchema,
    StringFormat, StringSchema, MAX_INTEGER_BYTES,
};
use crate::domain::value::Value;
use crate::error::{CodecError, CodecResult};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Decode a characteristic payload into a typed value.
pub fn decode(payload: &[u8], schema: &ResourceSchema) -> CodecResult<Value> {
    match schema {
        ResourceSchema::Integer(n) => decode_numeric(payload, n, true),
        ResourceSchema::Number(n) => decode_numeric(payload, n, false),
        ResourceSchema::String(s) => decode_string(payload, s),
        ResourceSchema::Object(ObjectSchema::Frame(frame)) => {
            Ok(Value::Object(decode_frame(payload, frame)?.into_iter().collect()))
        }
        ResourceSchema::Object(ObjectSchema::Fields(fields)) => fields
            .iter()
            .map(|(name, field)| Ok((name.clone(), decode_field(payload, field)?)))
            .collect::<CodecResult<BTreeMap<_, _>>>()
            .map(Value::Object),
        ResourceSchema::Array(ArraySchema::Frame(frame)) => Ok(Value::Array(
            decode_frame(payload, frame)?.into_iter().map(|(_, v)| v).collect(),
        )),
        ResourceSchema::Array(ArraySchema::Items(item)) => {
            let width = item.fixed_width().unwrap_or(1);
            if payload.len() < width {
                return Err(CodecError::PayloadTooShort {
                    needed: width,
                    actual: payload.len(),
                });
            }
            log_remainder(payload.len(), width);
            payload
                .chunks_exact(width)
                .map(|chunk| decode(chunk, item))
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array)
        }
    }
}

/// Encode a typed value into characteristic bytes.
pub fn encode(value: &Value, schema: &ResourceSchema) -> CodecResult<Vec<u8>> {
    match schema {
        ResourceSchema::Integer(n) | ResourceSchema::Number(n) => encode_numeric(value, n),
        ResourceSchema::String(s) => encode_string(value, s),
        ResourceSchema::Object(ObjectSchema::Frame(frame)) => {
            let map = expect_object(value)?;
            encode_frame(frame, |name| map.get(name))
        }
        ResourceSchema::Object(ObjectSchema::Fields(fields)) => {
            let map = expect_object(value)?;
            let mut buf = Vec::new();
            for (name, field) in fields {
                let member = map
                    .get(name)
                    .ok_or_else(|| CodecError::ValueMismatch(format!("missing field '{name}'")))?;
                let bytes = encode(member, field)?;
                if buf.len() < bytes.len() {
                    buf.resize(bytes.len(), 0);
                }
                // Fields occupy disjoint bits of a zeroed buffer.
                for (slot, b) in buf.iter_mut().zip(&bytes) {
                    *slot |= b;
                }
            }
            Ok(buf)
        }
        ResourceSchema::Array(ArraySchema::Frame(frame)) => {
            let items = expect_array(value)?;
            let names: Vec<&str> = frame.template.locate().into_iter().map(|(n, _)| n).collect();
            if items.len() != names.len() {
                return Err(CodecError::ValueMismatch(format!(
                    "pattern takes {} values, got {}",
                    names.len(),
                    items.len()
                )));
            }
            let by_name: HashMap<&str, &Value> = names.into_iter().zip(items).collect();
            encode_frame(frame, |name| by_name.get(name).copied())
        }
        ResourceSchema::Array(ArraySchema::Items(item)) => {
            let items = expect_array(value)?;
            let mut out = Vec::new();
            for v in items {
                out.extend(encode(v, item)?);
            }
            Ok(out)
        }
    }
}

fn expect_object(value: &Value) -> CodecResult<&BTreeMap<String, Value>> {
    value.as_object().ok_or_else(|| {
        CodecError::ValueMismatch(format!("expected an object, got {}", value.type_name()))
    })
}

fn expect_array(value: &Value) -> CodecResult<&[Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(CodecError::ValueMismatch(format!(
            "expected an array, got {}",
            other.type_name()
        ))),
    }
}

fn log_remainder(len: usize, width: usize) {
    let remainder = len % width;
    if remainder != 0 {
        debug!(
            "Ignoring {} trailing byte(s) that do not fill a {}-byte element",
            remainder, width
        );
    }
}

fn scaled(raw: i64, schema: &NumericSchema, integer: bool) -> CodecResult<Value> {
    if integer && schema.is_unscaled() {
        return raw
            .checked_add(schema.add as i64)
            .map(Value::Integer)
            .ok_or(CodecError::OutOfRange {
                value: i128::from(raw) + schema.add as i128,
                bits: 64,
            });
    }
    Ok(Value::Number(raw as f64 * schema.scale + schema.add))
}

fn unscaled(value: &Value, schema: &NumericSchema) -> CodecResult<i64> {
    let v = value.as_f64().ok_or_else(|| {
        CodecError::ValueMismatch(format!("expected a number, got {}", value.type_name()))
    })?;
    if !v.is_finite() {
        return Err(CodecError::ValueMismatch(format!("{v} is not a finite number")));
    }
    // Integer inputs with unit scaling skip the float round trip.
    if let (Value::Integer(i), true) = (value, schema.is_unscaled()) {
        return i.checked_sub(schema.add as i64).ok_or(CodecError::OutOfRange {
            value: i128::from(*i) - schema.add as i128,
            bits: 64,
        });
    }
    Ok(((v - schema.add) / schema.scale).round() as i64)
}

/// Sub-fields of a field-mapped object share one payload and never repeat.
fn decode_field(payload: &[u8], schema: &ResourceSchema) -> CodecResult<Value> {
    match schema {
        ResourceSchema::Integer(n) if n.frame.is_none() => decode_scalar(payload, n, true, false),
        ResourceSchema::Number(n) if n.frame.is_none() => decode_scalar(payload, n, false, false),
        other => decode(payload, other),
    }
}

fn decode_numeric(payload: &[u8], schema: &NumericSchema, integer: bool) -> CodecResult<Value> {
    decode_scalar(payload, schema, integer, true)
}

fn decode_scalar(
    payload: &[u8],
    schema: &NumericSchema,
    integer: bool,
    chunked: bool,
) -> CodecResult<Value> {
    if let Some(frame) = &schema.frame {
        return decode_numeric_frame(payload, frame, integer);
    }

    match &schema.addressing {
        Addressing::Bits(fragments) => {
            let raw = bits::extract_fragments(payload, fragments, schema.byte_order)?;
            let raw = if schema.signed {
                bits::sign_extend(raw, bits::total_bits(fragments))
            } else {
                raw as i64
            };
            scaled(raw, schema, integer)
        }
        Addressing::Bytes { offset, length } => {
            let end = offset + length;
            if payload.len() < end {
                return Err(CodecError::PayloadTooShort {
                    needed: end,
                    actual: payload.len(),
                });
            }
            let repeated = chunked && *offset == 0 && (schema.repeated || payload.len() > *length);
            if !repeated {
                let raw = bits::read_int(&payload[*offset..end], schema.byte_order, schema.signed)?;
                return scaled(raw, schema, integer);
            }

            log_remainder(payload.len(), *length);
            payload
                .chunks_exact(*length)
                .map(|chunk| {
                    bits::read_int(chunk, schema.byte_order, schema.signed)
                        .and_then(|raw| scaled(raw, schema, integer))
                })
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array)
        }
        Addressing::Payload => {
            if payload.is_empty() {
                return Err(CodecError::PayloadTooShort { needed: 1, actual: 0 });
            }
            let raw = bits::read_int(payload, schema.byte_order, schema.signed)?;
            scaled(raw, schema, integer)
        }
    }
}

fn decode_numeric_frame(payload: &[u8], frame: &NumericFrame, integer: bool) -> CodecResult<Value> {
    let fields = frame.template.slice(payload)?;
    let Some((_, bytes)) = fields.into_iter().next() else {
        return Err(CodecError::InvalidSchema(format!(
            "pattern '{}' has no placeholder",
            frame.template.source()
        )));
    };
    decode_numeric(bytes, &frame.field, integer)
}

fn decode_frame(payload: &[u8], frame: &Frame) -> CodecResult<Vec<(String, Value)>> {
    frame
        .template
        .slice(payload)?
        .into_iter()
        .map(|(name, bytes)| {
            let schema = frame
                .variables
                .get(name)
                .ok_or_else(|| CodecError::UnresolvedPlaceholder { name: name.to_string() })?;
            Ok((name.to_string(), decode(bytes, schema)?))
        })
        .collect()
}

fn decode_string(payload: &[u8], schema: &StringSchema) -> CodecResult<Value> {
    if let Some(frame) = &schema.frame {
        return Ok(Value::Object(decode_frame(payload, frame)?.into_iter().collect()));
    }

    let start = schema.byte_offset;
    let end = match schema.byte_length {
        Some(len) => start + len,
        None => payload.len().max(start),
    };
    if payload.len() < end {
        return Err(CodecError::PayloadTooShort {
            needed: end,
            actual: payload.len(),
        });
    }
    let bytes = &payload[start..end];

    match schema.format {
        StringFormat::Hex => Ok(Value::String(hex::encode(bytes))),
        StringFormat::Utf8 => {
            let text = std::str::from_utf8(bytes).map_err(|e| CodecError::InvalidUtf8(e.to_string()))?;
            Ok(Value::String(text.trim_end_matches('\0').to_string()))
        }
    }
}

fn encode_numeric(value: &Value, schema: &NumericSchema) -> CodecResult<Vec<u8>> {
    if let Some(frame) = &schema.frame {
        // Accept both the bare number and a record keyed by the placeholder.
        let value = match value {
            Value::Object(map) => map.get(&frame.name).ok_or_else(|| {
                CodecError::ValueMismatch(format!("no value for placeholder '{}'", frame.name))
            })?,
            other => other,
        };
        let inner = encode_numeric(value, &frame.field)?;
        let values = HashMap::from([(frame.name.as_str(), hex::encode(inner))]);
        return Ok(hex::decode(frame.template.expand(&values)?)?);
    }

    if let Value::Array(items) = value {
        if !matches!(schema.addressing, Addressing::Bytes { offset: 0, .. }) {
            return Err(CodecError::ValueMismatch(
                "only byte-addressed fields accept repeated values".into(),
            ));
        }
        let mut out = Vec::new();
        for item in items {
            out.extend(encode_numeric(item, schema)?);
        }
        return Ok(out);
    }

    let raw = unscaled(value, schema)?;
    match &schema.addressing {
        Addressing::Bytes { offset, length } => {
            let mut out = vec![0u8; *offset];
            out.extend(bits::write_int(raw, *length, schema.byte_order, schema.signed)?);
            Ok(out)
        }
        Addressing::Bits(fragments) => {
            let unsigned = bits::check_range(raw, bits::total_bits(fragments), schema.signed)?;
            let mut buf = vec![0u8; schema.fixed_width().unwrap_or(0)];
            bits::insert_fragments(&mut buf, fragments, schema.byte_order, unsigned);
            Ok(buf)
        }
        Addressing::Payload => {
            let width = bits::minimal_width(raw, schema.signed).min(MAX_INTEGER_BYTES);
            bits::write_int(raw, width, schema.byte_order, schema.signed)
        }
    }
}

fn encode_string(value: &Value, schema: &StringSchema) -> CodecResult<Vec<u8>> {
    if let (Some(frame), Value::Object(map)) = (&schema.frame, value) {
        return encode_frame(frame, |name| map.get(name));
    }

    let text = value.as_str().ok_or_else(|| {
        CodecError::ValueMismatch(format!("expected a string, got {}", value.type_name()))
    })?;
    let mut bytes = match schema.format {
        StringFormat::Hex => {
            let cleaned: String = text
                .trim_start_matches("0x")
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            hex::decode(cleaned)?
        }
        StringFormat::Utf8 => text.as_bytes().to_vec(),
    };

    if let Some(len) = schema.byte_length {
        if bytes.len() > len {
            return Err(CodecError::ValueMismatch(format!(
                "string of {} bytes does not fit {len} bytes",
                bytes.len()
            )));
        }
        bytes.resize(len, 0);
    }
    let mut out = vec![0u8; schema.byte_offset];
    out.extend(bytes);
    Ok(out)
}

/// Render each placeholder through its own schema and expand the template.
fn encode_frame<'v, F>(frame: &Frame, lookup: F) -> CodecResult<Vec<u8>>
where
    F: Fn(&str) -> Option<&'v Value>,
{
    let mut rendered = HashMap::new();
    for (name, span) in frame.template.locate() {
        let schema = frame
            .variables
            .get(name)
            .ok_or_else(|| CodecError::UnresolvedPlaceholder { name: name.to_string() })?;
        let value = lookup(name)
            .ok_or_else(|| CodecError::ValueMismatch(format!("no value for placeholder '{name}'")))?;
        let mut bytes = encode(value, schema)?;
        if bytes.len() < span.len() {
            bytes.resize(span.len(), 0);
        }
        rendered.insert(name, hex::encode(bytes));
    }
    Ok(hex::decode(frame.template.expand(&rendered)?)?)
}
