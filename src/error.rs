//! Error types for the MEX protocol layer.
//!
//! Every fallible operation in this crate returns [`MexError`]. The variants
//! follow the order in which a request/response cycle can fail:
//!
//! - **`Connection`**: the serial port could not be opened, or was already closed.
//! - **`Io`**: writing to (or reading from) an open port failed.
//! - **`FormatMismatch`**: the reply line does not have the `echo_payload` shape.
//!   A read timeout ends up here, because it yields an empty or partial line.
//! - **`EchoMismatch`**: the echoed command does not match the request that was sent.
//! - **`ValueParse`**: a payload that should be numeric is not.
//! - **`StatusPrefixMismatch`**: a status reply is missing its fixed literal prefix.
//! - **`Range`**: a status code does not fit in the 8-bit status word.
//! - **`UnknownParameter`**: a caller asked for a name outside the parameter table.
//! - **`InvalidValue`**: a set value has no decimal rendering (NaN or infinite).
//!
//! None of these are recovered from inside the crate. Callers match on
//! [`MexError::kind`] and decide whether to report, abort or retry.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MexResult<T> = std::result::Result<T, MexError>;

/// Discriminant of a [`MexError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Port could not be opened or is closed
    Connection,
    /// Read or write failure
    Io,
    /// Reply is not `<echo>_<payload>`
    FormatMismatch,
    /// Echo token differs from the request
    EchoMismatch,
    /// Payload is not a number
    ValueParse,
    /// Status reply lacks the expected prefix
    StatusPrefixMismatch,
    /// Status code outside 0..=255
    Range,
    /// Name not in the parameter table
    UnknownParameter,
    /// NaN or infinite value
    InvalidValue,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Io => "io",
            ErrorKind::FormatMismatch => "format_mismatch",
            ErrorKind::EchoMismatch => "echo_mismatch",
            ErrorKind::ValueParse => "value_parse",
            ErrorKind::StatusPrefixMismatch => "status_prefix_mismatch",
            ErrorKind::Range => "range",
            ErrorKind::UnknownParameter => "unknown_parameter",
            ErrorKind::InvalidValue => "invalid_value",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type of the protocol layer.
#[derive(Error, Debug)]
pub enum MexError {
    /// The serial port could not be opened with the requested settings, or the
    /// connection has already been closed.
    ///
    /// **Error Type**: Fatal for the connection until it is reopened.
    #[error("Serial connection error on '{port}': {message}")]
    Connection {
        /// Port identifier (e.g. `/dev/ttyMEX`).
        port: String,
        /// What went wrong.
        message: String,
    },

    /// A write (or read) on an open port failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reply does not split into an echo token and a payload token.
    ///
    /// An empty reply is the usual symptom of a read timeout.
    #[error("Reply '{reply}' does not match the expected '<echo>_<payload>' format")]
    FormatMismatch {
        /// The raw reply line, line terminator stripped.
        reply: String,
    },

    /// The echoed command token differs from the request.
    ///
    /// This is the device's only acknowledgment: a mismatch means the command
    /// was dropped, garbled, or the reply belongs to another request.
    #[error("Reply does not match expected format ({expected} -> {reply})")]
    EchoMismatch {
        /// Echo token that was expected, e.g. `MEX>CWL`.
        expected: String,
        /// The raw reply line.
        reply: String,
    },

    /// A payload could not be parsed as a number.
    #[error("Cannot parse '{payload}' as a number: {reason}")]
    ValueParse {
        /// The offending payload text.
        payload: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The status reply does not start with the fixed status prefix.
    #[error("Unexpected status reply ({reply})")]
    StatusPrefixMismatch {
        /// The raw reply line.
        reply: String,
    },

    /// The decoded status code does not fit in 8 bits.
    #[error("Status code {code} is out of range (0-255)")]
    Range {
        /// The decoded code, saturated at `u64::MAX` when it overflowed.
        code: u64,
    },

    /// The requested parameter name is not in the parameter table.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// The value cannot be rendered as a decimal number for the device.
    #[error("Value {0} cannot be sent to the device")]
    InvalidValue(f64),
}

impl MexError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MexError::Connection { .. } => ErrorKind::Connection,
            MexError::Io(_) => ErrorKind::Io,
            MexError::FormatMismatch { .. } => ErrorKind::FormatMismatch,
            MexError::EchoMismatch { .. } => ErrorKind::EchoMismatch,
            MexError::ValueParse { .. } => ErrorKind::ValueParse,
            MexError::StatusPrefixMismatch { .. } => ErrorKind::StatusPrefixMismatch,
            MexError::Range { .. } => ErrorKind::Range,
            MexError::UnknownParameter(_) => ErrorKind::UnknownParameter,
            MexError::InvalidValue(_) => ErrorKind::InvalidValue,
        }
    }

    pub(crate) fn connection(port: impl Into<String>, message: impl Into<String>) -> Self {
        MexError::Connection {
            port: port.into(),
            message: message.into(),
        }
    }
}
