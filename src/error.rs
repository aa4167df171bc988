use std::fmt;

// ============================================================================
// Error Kind - discriminable error category exposed by the core
// ============================================================================
//
// Every module keeps its own thiserror enum. Each of them maps onto one of
// these kinds so a transport layer can pick a status code without matching
// on every variant.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed command or value. Never retried.
    Validation,
    /// Absent aggregate or record.
    NotFound,
    /// Duplicate email, failed password check, version conflict.
    Conflict,
    /// Token rejected: expired, revoked, bad signature or algorithm.
    Unauthorized,
    /// Store or broker unreachable.
    Infrastructure,
    /// Caller cancelled or the deadline elapsed.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error type the crate returns from a public operation.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}
