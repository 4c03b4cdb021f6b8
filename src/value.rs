//! The common value and error types shared by every driver.

use thiserror::Error;

/// The closed set of error categories a driver may report.
///
/// Mirrors the `common_type_error_t` enumeration of the original
/// implementation: every failure a MAC or application driver can produce
/// falls into exactly one of these buckets.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldbusError {
    #[error("generic failure")]
    Generic,
    #[error("configuration error")]
    Config,
    #[error("failed to load driver module")]
    LoadModule,
    #[error("address is not valid for this sample type")]
    InvalidAddress,
    #[error("I/O error")]
    Io,
    #[error("operation timed out")]
    Timeout,
    #[error("device sent an invalid or unexpected response")]
    InvalidResponse,
    #[error("no matching device found")]
    DeviceNotFound,
}

pub type FieldbusResult<T> = Result<T, FieldbusError>;

/// A tagged value as returned by a channel fetch.
///
/// Only one payload is ever live; callers must branch on the variant
/// before reading, same discipline as the C union it replaces.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i64),
    Double(f64),
    String(String),
    Error(FieldbusError),
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl From<FieldbusError> for Value {
    fn from(e: FieldbusError) -> Self {
        Value::Error(e)
    }
}
