use std::fmt;

/// Error code, part of the public contract between the runtime and
/// extensions. Codes travel across the Env boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok,
    Generic,
    InvalidArgument,
    MsgNotConnected,
    /// The owner of the handle is closing; no further operations accepted.
    Closed,
    UnsupportedTypeConversion,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::Generic => 1,
            ErrorCode::InvalidArgument => 2,
            ErrorCode::MsgNotConnected => 3,
            ErrorCode::Closed => 4,
            ErrorCode::UnsupportedTypeConversion => 5,
        }
    }
}

/// Error record, returned by all value, schema and message operations.
#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self { code: ErrorCode::Generic, message: msg.into() }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self { code: ErrorCode::InvalidArgument, message: msg.into() }
    }

    pub fn msg_not_connected(msg: impl Into<String>) -> Self {
        Self { code: ErrorCode::MsgNotConnected, message: msg.into() }
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self { code: ErrorCode::Closed, message: msg.into() }
    }

    pub fn unsupported_conversion(msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UnsupportedTypeConversion,
            message: msg.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Add context to the error, preserving the original code.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            code: self.code,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// From impls: standard error types → Error with correct ErrorCode
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
