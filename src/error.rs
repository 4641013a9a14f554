use std::fmt;
use std::io;
use thiserror::Error;

use crate::constants::{ERROR_LABEL_MAX, ERROR_MESSAGE_MAX, STORE_LABEL};

/// Reserved error codes.
///
/// The numeric values are stable and shared by every layer of the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Generic = -3000,
    InvalidArg = -3001,
    OutOfMemory = -3002,
    KeyExists = -3003,
    NotFound = -3004,
    MapFull = -3005,
    TxnFull = -3006,
    IndexError = -3007,
    Unsupported = -3008,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::Ok),
            -3000 => Some(ErrorCode::Generic),
            -3001 => Some(ErrorCode::InvalidArg),
            -3002 => Some(ErrorCode::OutOfMemory),
            -3003 => Some(ErrorCode::KeyExists),
            -3004 => Some(ErrorCode::NotFound),
            -3005 => Some(ErrorCode::MapFull),
            -3006 => Some(ErrorCode::TxnFull),
            -3007 => Some(ErrorCode::IndexError),
            -3008 => Some(ErrorCode::Unsupported),
            _ => None,
        }
    }

    /// Only a full map can be fixed by the caller (resize, then retry).
    pub fn is_recoverable(self) -> bool {
        self == ErrorCode::MapFull
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(strerror(self.as_i32()))
    }
}

/// Canonical text for a numeric error code.
pub fn strerror(code: i32) -> &'static str {
    match ErrorCode::from_i32(code) {
        Some(ErrorCode::Ok) => "Success",
        Some(ErrorCode::Generic) => "Generic error",
        Some(ErrorCode::InvalidArg) => "Invalid argument",
        Some(ErrorCode::OutOfMemory) => "Out of memory",
        Some(ErrorCode::KeyExists) => "Key already exists",
        Some(ErrorCode::NotFound) => "Key not found",
        Some(ErrorCode::MapFull) => "Database map is full, resize needed",
        Some(ErrorCode::TxnFull) => "Transaction is full",
        Some(ErrorCode::IndexError) => "Index operation failed",
        Some(ErrorCode::Unsupported) => "Not supported on this platform",
        None => "Unknown error",
    }
}

/// True when the caller may resize the map and retry.
pub fn is_recoverable(code: i32) -> bool {
    ErrorCode::from_i32(code).is_some_and(ErrorCode::is_recoverable)
}

/// Error record carried by every fallible operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{label}: {message}")]
pub struct Error {
    code: ErrorCode,
    label: String,
    message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::with_label(STORE_LABEL, code, message)
    }

    pub fn with_label(label: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            label: truncate(label.to_string(), ERROR_LABEL_MAX - 1),
            message: truncate(message.into(), ERROR_MESSAGE_MAX - 1),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Generic, message)
    }

    pub fn invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArg, message)
    }

    pub fn key_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KeyExists, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IndexError, message)
    }

    pub fn map_full(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MapFull, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unsupported, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    /// Re-tag an error raised by a lower layer.
    pub(crate) fn relabel(mut self, label: &str) -> Self {
        self.label = truncate(label.to_string(), ERROR_LABEL_MAX - 1);
        self
    }
}

impl From<redb::Error> for Error {
    fn from(err: redb::Error) -> Self {
        match err {
            redb::Error::TableDoesNotExist(name) => {
                Error::not_found(format!("Table '{}' does not exist", name))
            }
            redb::Error::ValueTooLarge(len) => Error::new(
                ErrorCode::TxnFull,
                format!("Value of {} bytes exceeds engine limits", len),
            ),
            other => Error::generic(other.to_string()),
        }
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::not_found(err.to_string()),
            io::ErrorKind::OutOfMemory => Error::new(ErrorCode::OutOfMemory, err.to_string()),
            io::ErrorKind::Unsupported => Error::unsupported(err.to_string()),
            _ => Error::generic(err.to_string()),
        }
    }
}
