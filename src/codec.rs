//! Bridge between serde data models and stored field maps.
//!
//! User payloads go through `serde_json::Value` on their way in and out of a
//! [`MapValue`]. Stored timestamps surface as RFC 3339 strings (which is also how
//! [`Timestamp`](crate::model::Timestamp) deserializes), references as their path,
//! and unresolved server-timestamp sentinels as `null`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::error::{decode_error, invalid_argument, OdmResult};
use crate::value::{FieldValue, MapValue, ValueKind};

/// Encodes a serializable model into a field map.
///
/// The model must serialize to a JSON object; scalars and sequences are rejected.
pub fn encode<T>(value: &T) -> OdmResult<MapValue>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_value(value)
        .map_err(|err| invalid_argument(format!("failed to encode document data: {err}")))?;
    match json {
        JsonValue::Object(object) => Ok(encode_object(object)),
        other => Err(invalid_argument(format!(
            "document data must encode to an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decodes a field map into the requested model type.
pub fn decode<T>(map: &MapValue) -> OdmResult<T>
where
    T: DeserializeOwned,
{
    let json = map_to_json(map);
    serde_json::from_value(json).map_err(|err| decode_error(format!("failed to decode document: {err}")))
}

pub fn json_to_value(json: JsonValue) -> FieldValue {
    match json {
        JsonValue::Null => FieldValue::null(),
        JsonValue::Bool(value) => FieldValue::from_bool(value),
        JsonValue::Number(number) => encode_number(&number),
        JsonValue::String(value) => FieldValue::from_string(value),
        JsonValue::Array(values) => {
            FieldValue::from_array(values.into_iter().map(json_to_value).collect())
        }
        JsonValue::Object(object) => FieldValue::from_map(encode_object(object).into_fields()),
    }
}

pub fn value_to_json(value: &FieldValue) -> JsonValue {
    match value.kind() {
        ValueKind::Null | ValueKind::ServerTimestamp => JsonValue::Null,
        ValueKind::Boolean(value) => JsonValue::Bool(*value),
        ValueKind::Integer(value) => JsonValue::Number(Number::from(*value)),
        ValueKind::Double(value) => Number::from_f64(*value)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueKind::Timestamp(value) => JsonValue::String(value.to_rfc3339()),
        ValueKind::String(value) | ValueKind::Reference(value) => JsonValue::String(value.clone()),
        ValueKind::Array(array) => JsonValue::Array(array.values().iter().map(value_to_json).collect()),
        ValueKind::Map(map) => map_to_json(map),
    }
}

pub fn map_to_json(map: &MapValue) -> JsonValue {
    let object: JsonMap<String, JsonValue> = map
        .fields()
        .iter()
        .map(|(key, value)| (key.clone(), value_to_json(value)))
        .collect();
    JsonValue::Object(object)
}

fn encode_object(object: JsonMap<String, JsonValue>) -> MapValue {
    MapValue::new(
        object
            .into_iter()
            .map(|(key, value)| (key, json_to_value(value)))
            .collect(),
    )
}

fn encode_number(number: &Number) -> FieldValue {
    if let Some(value) = number.as_i64() {
        FieldValue::from_integer(value)
    } else {
        FieldValue::from_double(number.as_f64().unwrap_or(f64::NAN))
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
