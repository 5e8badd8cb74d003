use thiserror::Error;

use crate::stream::StreamIndex;

/// Classifies a job-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("invalid configuration")]
    Configuration,
    #[error("cannot open media source")]
    SourceOpen,
    #[error("cannot build resampler or mix graph")]
    GraphBuild,
    #[error("cannot open output")]
    SinkOpen,
    #[error("cannot write output")]
    SinkWrite,
    #[error("cannot finalize output")]
    SinkFinalize,
    #[error("invalid job state")]
    InvalidState,
    #[error("cannot start worker")]
    Worker,
}

/// Error delivered through `did_error`: a kind plus the underlying cause.
#[derive(Debug, Error)]
#[error("{kind}: {cause:#}")]
pub struct MergeError {
    kind: ErrorKind,
    cause: anyhow::Error,
}

impl MergeError {
    pub fn new(kind: ErrorKind, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

/// Attaches an [`ErrorKind`] to an `anyhow` result.
pub trait MergeResultExt<T> {
    fn merge_err(self, kind: ErrorKind) -> Result<T, MergeError>;
}

impl<T> MergeResultExt<T> for anyhow::Result<T> {
    fn merge_err(self, kind: ErrorKind) -> Result<T, MergeError> {
        self.map_err(|e| MergeError::new(kind, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("resampler already registered for stream {0}")]
    AlreadyRegistered(StreamIndex),
}
