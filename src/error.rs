// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Error taxonomy for file handles.
//!
//! Remote plumbing works in `anyhow::Result`; everything that crosses the
//! file contract is a [`SourceError`]. The type is `Clone` because a write
//! handle latches the first failure and hands it back on every later call.

use std::sync::Arc;
use thiserror::Error;

use crate::object_client::RangeNotSatisfiable;

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Seek: invalid whence {0}")]
    InvalidWhence(i32),

    #[error("Seek: invalid offset {offset} for object of {size} bytes")]
    InvalidOffset { offset: i64, size: u64 },

    #[error("Seek: unable to seek to a location <0 ({0})")]
    NegativeOffset(i64),

    #[error("Read: body ended at offset {offset} of {size} bytes")]
    UnexpectedEof { offset: i64, size: u64 },

    #[error("Write: failed upload, upload pipe closed")]
    UploadPipeClosed,

    #[error("Write: handle already closed")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Remote failure, kept verbatim (with its context chain).
    #[error("{0:#}")]
    Backend(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for SourceError {
    fn from(e: anyhow::Error) -> Self {
        SourceError::Backend(Arc::new(e))
    }
}

impl SourceError {
    /// The remote rejected a ranged GET as starting past the object's end.
    pub fn is_range_not_satisfiable(&self) -> bool {
        match self {
            SourceError::Backend(e) => e.downcast_ref::<RangeNotSatisfiable>().is_some(),
            _ => false,
        }
    }
}

impl From<SourceError> for std::io::Error {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::InvalidWhence(_)
            | SourceError::InvalidOffset { .. }
            | SourceError::NegativeOffset(_)
            | SourceError::InvalidConfig(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            }
            SourceError::Cancelled => std::io::Error::new(std::io::ErrorKind::Interrupted, e),
            SourceError::UnexpectedEof { .. } => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e),
            SourceError::Closed | SourceError::UploadPipeClosed => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)
            }
            SourceError::Backend(_) => std::io::Error::other(e),
        }
    }
}

pub type Result<T, E = SourceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection reset").context("GetObject failed");
        let err: SourceError = inner.into();
        let msg = err.to_string();
        assert!(msg.contains("GetObject failed"), "{msg}");
        assert!(msg.contains("connection reset"), "{msg}");
    }

    #[test]
    fn io_error_kinds() {
        let e: std::io::Error = SourceError::InvalidWhence(7).into();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput);
        let e: std::io::Error = SourceError::Closed.into();
        assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe);
        let e: std::io::Error = SourceError::Cancelled.into();
        assert_eq!(e.kind(), std::io::ErrorKind::Interrupted);
        let e: std::io::Error = SourceError::UnexpectedEof { offset: 0, size: 10 }.into();
        assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn range_not_satisfiable_is_recognised() {
        let err: SourceError = anyhow::Error::from(RangeNotSatisfiable {
            loc: "s3://b/k".into(),
            range: "bytes=32-47".into(),
        })
        .into();
        assert!(err.is_range_not_satisfiable());
        assert!(err.to_string().contains("bytes=32-47"));

        let other: SourceError = anyhow::anyhow!("InvalidRange (416)").into();
        assert!(!other.is_range_not_satisfiable());
    }
}
