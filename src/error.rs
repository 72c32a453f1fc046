use std::io;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::error;

use crate::model::OidKind;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FragmaError>;

/// Recoverable failure conditions surfaced by the fragment storage layer.
///
/// Caller contract violations (out-of-range ids, crossed id ranges) are not
/// represented here; those abort at the detection point.
#[derive(Debug, Error)]
pub enum FragmaError {
    /// Underlying file IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An archive failed validation while decoding.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// A mutation line could not be parsed.
    #[error("malformed mutation line: {0}")]
    Parse(String),
    /// An oid's scalar kind disagrees with the kind the vertex map holds.
    #[error("oid kind mismatch: expected {expected}, found {found}")]
    OidKindMismatch {
        /// Kind already established for the vertex map.
        expected: OidKind,
        /// Kind carried by the offending oid.
        found: OidKind,
    },
    /// A value cannot be represented in the archive encoding.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Locks a mutex, mapping poisoning to a corruption error.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("cluster lock poisoned - fatal error");
        FragmaError::Corruption("cluster lock poisoned - fatal error".into())
    })
}
