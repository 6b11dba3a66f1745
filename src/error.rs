//! Error types for the binding.
//!
//! `CodecError` covers everything the transcoder can reject, split into
//! configuration-class failures (a bad resource description) and data-class
//! failures (a payload or value that does not fit a valid schema).
//! `BindingError` is what the façade hands back to callers.

use std::time::Duration;
use thiserror::Error;

use crate::domain::locator::DeviceAddress;

pub type CodecResult<T> = Result<T, CodecError>;
pub type BindingResult<T> = Result<T, BindingError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Unsupported schema type: {0}")]
    UnsupportedType(String),
    #[error("Malformed pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },
    #[error("Placeholder '{{{name}}}' has no variable schema with a fixed byte width")]
    UnresolvedPlaceholder { name: String },
    #[error("Integer width of {bits} bits exceeds the supported maximum of {max} bits")]
    IntegerTooWide { bits: usize, max: usize },
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Payload too short: need {needed} bytes, got {actual}")]
    PayloadTooShort { needed: usize, actual: usize },
    #[error("Value does not match schema: {0}")]
    ValueMismatch(String),
    #[error("Value {value} out of range for {bits}-bit field")]
    OutOfRange { value: i128, bits: usize },
    #[error("Invalid hex text: {0}")]
    InvalidHex(String),
    #[error("Invalid UTF-8 payload: {0}")]
    InvalidUtf8(String),
}

impl CodecError {
    /// Configuration errors point at a bad resource description and are never
    /// worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CodecError::UnsupportedType(_)
                | CodecError::MalformedPattern { .. }
                | CodecError::UnresolvedPlaceholder { .. }
                | CodecError::IntegerTooWide { .. }
                | CodecError::InvalidSchema(_)
        )
    }
}

impl From<hex::FromHexError> for CodecError {
    fn from(err: hex::FromHexError) -> Self {
        CodecError::InvalidHex(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Cannot resolve resource address '{locator}': {reason}")]
    AddressResolution { locator: String, reason: String },

    #[error("Bluetooth device {device} was not found within {timeout:?}")]
    DiscoveryTimeout {
        device: DeviceAddress,
        timeout: Duration,
    },

    #[error("Error connecting to Bluetooth device {device}: {source}")]
    Connection {
        device: DeviceAddress,
        #[source]
        source: anyhow::Error,
    },

    #[error("No service matching UUID {service} found on device {device}")]
    ServiceNotFound {
        device: DeviceAddress,
        service: uuid::Uuid,
    },

    #[error("Device {device} has no characteristic {characteristic} in service {service}")]
    CharacteristicNotFound {
        device: DeviceAddress,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Advertisement of {device}: {reason}")]
    Advertisement {
        device: DeviceAddress,
        reason: String,
    },

    #[error("Unsupported operation: {0}")]
    Operation(String),

    #[error("Bluetooth operation '{operation}' failed on {context}: {source}")]
    Radio {
        operation: &'static str,
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid resource description: {0}")]
    Description(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl BindingError {
    pub fn is_configuration(&self) -> bool {
        match self {
            BindingError::Codec(e) => e.is_configuration(),
            BindingError::AddressResolution { .. }
            | BindingError::Description(_)
            | BindingError::Operation(_) => true,
            _ => false,
        }
    }

    /// Discovery and connection failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BindingError::DiscoveryTimeout { .. }
                | BindingError::Connection { .. }
                | BindingError::Advertisement { .. }
                | BindingError::Radio { .. }
        )
    }
}
