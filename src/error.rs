use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OdmErrorCode {
    InvalidArgument,
    /// A resolution returned neither a document nor an explicit error.
    InvalidReference,
    /// A query or collection returned nothing. Informational.
    Empty,
    Timeout,
    Decode,
    Subscription,
    InvalidState,
    NotFound,
    ResourceExhausted,
    Internal,
}

impl OdmErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OdmErrorCode::InvalidArgument => "odm/invalid-argument",
            OdmErrorCode::InvalidReference => "odm/invalid-reference",
            OdmErrorCode::Empty => "odm/empty",
            OdmErrorCode::Timeout => "odm/timeout",
            OdmErrorCode::Decode => "odm/decode",
            OdmErrorCode::Subscription => "odm/subscription",
            OdmErrorCode::InvalidState => "odm/invalid-state",
            OdmErrorCode::NotFound => "odm/not-found",
            OdmErrorCode::ResourceExhausted => "odm/resource-exhausted",
            OdmErrorCode::Internal => "odm/internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OdmError {
    pub code: OdmErrorCode,
    message: String,
}

impl OdmError {
    pub fn new(code: OdmErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for OdmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for OdmError {}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        decode_error(err.to_string())
    }
}

pub type OdmResult<T> = Result<T, OdmError>;

pub fn invalid_argument(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::InvalidArgument, message)
}

pub fn invalid_reference(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::InvalidReference, message)
}

pub fn empty(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::Empty, message)
}

pub fn timeout(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::Timeout, message)
}

pub fn decode_error(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::Decode, message)
}

pub fn subscription_error(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::Subscription, message)
}

pub fn invalid_state(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::InvalidState, message)
}

pub fn not_found(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::NotFound, message)
}

pub fn resource_exhausted(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::ResourceExhausted, message)
}

pub fn internal_error(message: impl Into<String>) -> OdmError {
    OdmError::new(OdmErrorCode::Internal, message)
}
