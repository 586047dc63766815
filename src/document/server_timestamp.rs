use std::cmp::Ordering;

use crate::model::Timestamp;
use crate::value::{FieldValue, ValueKind};

/// A timestamp the server assigns at commit time.
///
/// Until the next read the client only knows that the value is `Pending`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServerTimestamp {
    #[default]
    Pending,
    Resolved(Timestamp),
}

impl ServerTimestamp {
    /// Pending encodes to the server-timestamp sentinel, resolved to the literal instant.
    pub fn encode(&self) -> FieldValue {
        match self {
            ServerTimestamp::Pending => FieldValue::server_timestamp(),
            ServerTimestamp::Resolved(value) => FieldValue::from_timestamp(*value),
        }
    }

    /// Absent, null or sentinel values decode as `Pending`.
    ///
    /// RFC 3339 strings are accepted as well, since that is how timestamps
    /// travel through serde payloads.
    pub fn decode(value: Option<&FieldValue>) -> Self {
        match value.map(FieldValue::kind) {
            Some(ValueKind::Timestamp(value)) => ServerTimestamp::Resolved(*value),
            Some(ValueKind::String(text)) => Timestamp::parse_rfc3339(text)
                .map(ServerTimestamp::Resolved)
                .unwrap_or(ServerTimestamp::Pending),
            _ => ServerTimestamp::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ServerTimestamp::Pending)
    }

    pub fn resolved(&self) -> Option<Timestamp> {
        match self {
            ServerTimestamp::Pending => None,
            ServerTimestamp::Resolved(value) => Some(*value),
        }
    }
}

impl From<Timestamp> for ServerTimestamp {
    fn from(value: Timestamp) -> Self {
        ServerTimestamp::Resolved(value)
    }
}

impl PartialOrd for ServerTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `Pending` sorts after every resolved instant: an unacknowledged write is the newest.
impl Ord for ServerTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ServerTimestamp::Pending, ServerTimestamp::Pending) => Ordering::Equal,
            (ServerTimestamp::Pending, ServerTimestamp::Resolved(_)) => Ordering::Greater,
            (ServerTimestamp::Resolved(_), ServerTimestamp::Pending) => Ordering::Less,
            (ServerTimestamp::Resolved(a), ServerTimestamp::Resolved(b)) => a.cmp(b),
        }
    }
}
