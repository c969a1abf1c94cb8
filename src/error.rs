//! Processing error taxonomy and retry policy.
//!
//! Every failure that can reach the retry loop is a [`ProcessError`] tagged
//! with an [`ErrorClass`] at the point it was raised. The retry decision is a
//! pure function of that class and the number of retries already spent.
//!
//! | Class | Examples | Policy |
//! |-------|----------|--------|
//! | `Transient` | timeouts, refused connections, lock contention, HTTP 429/5xx | retry up to the limit |
//! | `Permanent` | corrupt or unsupported content, missing file, permission denied, OOM | quarantine immediately |
//! | `Unclassified` | anything else | retry once, then quarantine |

use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unclassified,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporary",
    "busy",
    "locked",
    "unavailable",
];

const PERMANENT_MARKERS: &[&str] = &[
    "corrupted",
    "corrupt",
    "invalid",
    "unsupported",
    "not found",
    "permission denied",
    "out of memory",
];

/// A failure raised while processing one file.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcessError {
    pub class: ErrorClass,
    pub message: String,
}

impl ProcessError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unclassified, message)
    }

    /// Wrap an untyped message from a third-party library.
    ///
    /// Only used where the library gives us nothing better than a string;
    /// typed sources go through the `From` impls below.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let class = class_from_message(&message);
        Self { class, message }
    }

    /// Classify an `anyhow` chain by its root I/O error when it has one.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        match err.downcast_ref::<std::io::Error>() {
            Some(io) => Self::new(class_from_io_kind(io.kind()), message),
            None => Self::from_message(message),
        }
    }

    /// Prefix the message with context while keeping the class.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        Self {
            class: self.class,
            message: format!("{}: {}", ctx, self.message),
        }
    }
}

/// Keyword fallback for untyped error text. Permanent markers win over
/// transient ones so that "invalid connection string" is not retried.
pub fn class_from_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Permanent
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unclassified
    }
}

pub fn class_from_io_kind(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::TimedOut
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => ErrorClass::Transient,
        ErrorKind::NotFound
        | ErrorKind::PermissionDenied
        | ErrorKind::InvalidData
        | ErrorKind::InvalidInput
        | ErrorKind::UnexpectedEof
        | ErrorKind::Unsupported
        | ErrorKind::OutOfMemory => ErrorClass::Permanent,
        _ => ErrorClass::Unclassified,
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        Self::new(class_from_io_kind(err.kind()), err.to_string())
    }
}

impl From<reqwest::Error> for ProcessError {
    fn from(err: reqwest::Error) -> Self {
        let class = if err.is_timeout() || err.is_connect() {
            ErrorClass::Transient
        } else if let Some(status) = err.status() {
            class_from_status(status.as_u16())
        } else if err.is_decode() || err.is_builder() {
            ErrorClass::Permanent
        } else {
            ErrorClass::Unclassified
        };
        Self::new(class, err.to_string())
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("invalid JSON: {}", err))
    }
}

pub fn class_from_status(status: u16) -> ErrorClass {
    match status {
        408 | 429 | 500..=599 => ErrorClass::Transient,
        400..=499 => ErrorClass::Permanent,
        _ => ErrorClass::Unclassified,
    }
}

/// Files that were never eligible for processing.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("file not found: {0}")]
    Missing(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Quarantine,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Decide what to do after a failure, given how many retries were
    /// already spent on this file.
    pub fn decide(&self, class: ErrorClass, retries_so_far: u32) -> RetryDecision {
        let allowed = match class {
            ErrorClass::Transient => self.max_retries,
            ErrorClass::Permanent => 0,
            ErrorClass::Unclassified => self.max_retries.min(1),
        };
        if retries_so_far < allowed {
            RetryDecision::Retry
        } else {
            RetryDecision::Quarantine
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::ZERO)
    }

    #[test]
    fn test_keyword_fallback() {
        assert_eq!(class_from_message("Read timeout after 30s"), ErrorClass::Transient);
        assert_eq!(class_from_message("Database is LOCKED"), ErrorClass::Transient);
        assert_eq!(class_from_message("PDF file is corrupted"), ErrorClass::Permanent);
        assert_eq!(class_from_message("Permission denied (os error 13)"), ErrorClass::Permanent);
        assert_eq!(class_from_message("something odd happened"), ErrorClass::Unclassified);
        assert_eq!(
            class_from_message("invalid connection string"),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_transient_retries_up_to_limit() {
        let p = policy();
        assert_eq!(p.decide(ErrorClass::Transient, 0), RetryDecision::Retry);
        assert_eq!(p.decide(ErrorClass::Transient, 1), RetryDecision::Retry);
        assert_eq!(p.decide(ErrorClass::Transient, 2), RetryDecision::Quarantine);
    }

    #[test]
    fn test_permanent_never_retries() {
        assert_eq!(policy().decide(ErrorClass::Permanent, 0), RetryDecision::Quarantine);
    }

    #[test]
    fn test_unclassified_retries_once() {
        let p = policy();
        assert_eq!(p.decide(ErrorClass::Unclassified, 0), RetryDecision::Retry);
        assert_eq!(p.decide(ErrorClass::Unclassified, 1), RetryDecision::Quarantine);

        let none = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(none.decide(ErrorClass::Unclassified, 0), RetryDecision::Quarantine);
    }

    #[test]
    fn test_io_errors_are_typed() {
        let e: ProcessError = std::io::Error::new(ErrorKind::TimedOut, "slow disk").into();
        assert_eq!(e.class, ErrorClass::Transient);
        let e: ProcessError = std::io::Error::new(ErrorKind::NotFound, "gone").into();
        assert_eq!(e.class, ErrorClass::Permanent);
        // The kind decides, not the text.
        let e: ProcessError = std::io::Error::new(ErrorKind::Other, "timeout").into();
        assert_eq!(e.class, ErrorClass::Unclassified);
    }

    #[test]
    fn test_http_status_classes() {
        assert_eq!(class_from_status(503), ErrorClass::Transient);
        assert_eq!(class_from_status(429), ErrorClass::Transient);
        assert_eq!(class_from_status(415), ErrorClass::Permanent);
    }

    #[test]
    fn test_anyhow_chain_uses_root_io_kind() {
        let io = std::io::Error::new(ErrorKind::PermissionDenied, "nope");
        let err = anyhow::Error::new(io).context("Failed to open /in/a.pdf");
        let e = ProcessError::from_anyhow(&err);
        assert_eq!(e.class, ErrorClass::Permanent);
        assert!(e.message.starts_with("Failed to open /in/a.pdf"));
    }

    #[test]
    fn test_context_keeps_class() {
        let e = ProcessError::transient("socket closed").context("ocr request");
        assert_eq!(e.class, ErrorClass::Transient);
        assert_eq!(e.to_string(), "ocr request: socket closed");
    }
}
