//! Error types for the polling client.
//!
//! All fallible operations return [`ModbusResult`]. The variants are grouped
//! by how the client reacts to them:
//!
//! | Variant | Reaction |
//! |---------|----------|
//! | `Io`, `Connection`, `Timeout`, `Frame` | transport fault: retried per profile, connection dropped |
//! | `Exception` | device-reported error: retried like a transport fault |
//! | `Protocol`, `InvalidData` | malformed response: span abandoned |
//! | `ShapeRejected`, `UnsupportedTransport` | transport library mismatch: fatal |
//! | `Cancelled` | operation abandoned by `close()` |

use thiserror::Error;

use crate::constants::{
    EXCEPTION_ACKNOWLEDGE, EXCEPTION_GATEWAY_PATH_UNAVAILABLE, EXCEPTION_GATEWAY_TARGET_FAILED,
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_MEMORY_PARITY_ERROR, EXCEPTION_SERVER_DEVICE_BUSY, EXCEPTION_SERVER_DEVICE_FAILURE,
};
use crate::protocol::UnitAddressing;

/// Result alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by the transport, client and codec layers.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection could not be established or was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No response within the request timeout.
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The device answered with a Modbus exception response.
    #[error("Modbus exception: function=0x{function:02X}, code=0x{code:02X} ({message})")]
    Exception {
        function: u8,
        code: u8,
        message: String,
    },

    /// Response violates the protocol (wrong function code, bad echo).
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// MBAP frame could not be parsed.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Request or payload data is out of range.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Invalid client or profile configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The transport does not accept this unit addressing shape.
    #[error("Transport rejected {shape} unit addressing")]
    ShapeRejected { shape: UnitAddressing },

    /// The transport accepted none of the supported call shapes.
    #[error("Transport accepts no supported call shape for {operation}")]
    UnsupportedTransport { operation: &'static str },

    /// The operation was abandoned because the connection was closed.
    #[error("Operation cancelled: connection closed")]
    Cancelled,
}

impl ModbusError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build an exception error with a readable description of `code`.
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function,
            code,
            message: exception_description(code).to_string(),
        }
    }

    /// Faults after which the socket can no longer be trusted.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Connection { .. } | Self::Timeout { .. } | Self::Frame { .. }
        )
    }

    /// Device busy / gateway timeout conditions, weighted heavier in backoff.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Exception { code, .. } => {
                *code == EXCEPTION_SERVER_DEVICE_BUSY || *code == EXCEPTION_GATEWAY_TARGET_FAILED
            }
            _ => false,
        }
    }

    /// Errors that must escape the poll cycle instead of being swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedTransport { .. } | Self::Configuration { .. }
        )
    }
}

fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "illegal function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "illegal data address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "illegal data value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "server device failure",
        EXCEPTION_ACKNOWLEDGE => "acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "server device busy",
        EXCEPTION_MEMORY_PARITY_ERROR => "memory parity error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "gateway path unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "gateway target failed to respond",
        _ => "unknown exception",
    }
}
