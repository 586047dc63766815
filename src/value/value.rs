use std::collections::BTreeMap;

use crate::model::Timestamp;
use crate::value::{ArrayValue, MapValue};

/// A single stored field value.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldValue {
    kind: ValueKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    Reference(String),
    Array(ArrayValue),
    Map(MapValue),
    /// Placeholder replaced by the commit time when the write is applied.
    ServerTimestamp,
}

impl FieldValue {
    pub fn null() -> Self {
        Self {
            kind: ValueKind::Null,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean(value),
        }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            kind: ValueKind::Integer(value),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double(value),
        }
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        Self {
            kind: ValueKind::Timestamp(value),
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String(value.into()),
        }
    }

    pub fn from_reference(path: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Reference(path.into()),
        }
    }

    pub fn from_array(values: Vec<FieldValue>) -> Self {
        Self {
            kind: ValueKind::Array(ArrayValue::new(values)),
        }
    }

    pub fn from_map(map: BTreeMap<String, FieldValue>) -> Self {
        Self {
            kind: ValueKind::Map(MapValue::new(map)),
        }
    }

    /// Returns the sentinel that asks the store to write its commit time.
    pub fn server_timestamp() -> Self {
        Self {
            kind: ValueKind::ServerTimestamp,
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn into_kind(self) -> ValueKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn is_server_timestamp(&self) -> bool {
        matches!(self.kind, ValueKind::ServerTimestamp)
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match &self.kind {
            ValueKind::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(value) => Some(value),
            _ => None,
        }
    }

    /// Copies the value, replacing every server-timestamp sentinel with `now`.
    pub fn resolve_server_timestamps(&self, now: Timestamp) -> FieldValue {
        match &self.kind {
            ValueKind::ServerTimestamp => FieldValue::from_timestamp(now),
            ValueKind::Array(array) => FieldValue::from_array(
                array
                    .values()
                    .iter()
                    .map(|value| value.resolve_server_timestamps(now))
                    .collect(),
            ),
            ValueKind::Map(map) => FieldValue::from_map(
                map.fields()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.resolve_server_timestamps(now)))
                    .collect(),
            ),
            _ => self.clone(),
        }
    }
}

impl From<ValueKind> for FieldValue {
    fn from(kind: ValueKind) -> Self {
        Self { kind }
    }
}
