//! Upload error types.
//!
//! [`UploadError`] is what every public operation returns. Framing problems
//! carry a [`MalformedUpload`] detail so callers can tell a truncated body
//! from a bad header without string matching.

use std::path::PathBuf;

use thiserror::Error;

/// Why a multipart body could not be framed into parts.
#[derive(Debug, Error)]
pub enum MalformedUpload {
    /// The request carries no Content-Type header.
    #[error("missing Content-Type header")]
    MissingContentType,
    /// The request is not a `multipart/*` request.
    #[error("request content type is not multipart: {content_type}")]
    NotMultipart { content_type: String },
    /// Missing boundary in Content-Type header.
    #[error("missing boundary in multipart Content-Type")]
    MissingBoundary,
    /// Invalid boundary format.
    #[error("invalid multipart boundary")]
    InvalidBoundary,
    /// Missing Content-Disposition header.
    #[error("missing Content-Disposition header in part")]
    MissingContentDisposition,
    /// Invalid Content-Disposition header.
    #[error("invalid Content-Disposition: {detail}")]
    InvalidContentDisposition { detail: String },
    /// Invalid part headers.
    #[error("invalid part headers: {detail}")]
    InvalidPartHeaders { detail: String },
    /// Part header block larger than the parser accepts.
    #[error("part header block exceeds {max} bytes")]
    HeadersTooLarge { max: usize },
    /// The body ended before the closing boundary.
    #[error("unexpected end of multipart data")]
    UnexpectedEof,
    /// Invalid multipart format.
    #[error("invalid multipart format: {detail}")]
    InvalidFormat { detail: &'static str },
    /// Reading the request stream failed.
    #[error("failed to read request body: {0}")]
    Io(#[source] std::io::Error),
}

/// Errors surfaced by upload parsing and item access.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The request body is larger than the configured aggregate ceiling.
    #[error("upload too large: {size} bytes exceeds limit of {max}")]
    SizeLimitExceeded { size: u64, max: u64 },
    /// The multipart body could not be parsed.
    #[error("malformed upload: {0}")]
    Malformed(#[from] MalformedUpload),
    /// No writable location exists for spooled data.
    #[error("no writable spool location (tried {}): {source}", display_dirs(.tried))]
    StorageUnavailable {
        tried: Vec<PathBuf>,
        #[source]
        source: std::io::Error,
    },
    /// Materializing an item's bytes failed.
    #[error("failed to read upload item '{field}': {detail}")]
    ReadFailure {
        field: String,
        detail: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl UploadError {
    /// HTTP status a handler should answer with for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::SizeLimitExceeded { .. } => 413,
            Self::Malformed(_) => 400,
            Self::StorageUnavailable { .. } | Self::ReadFailure { .. } => 500,
        }
    }

    /// Returns true when the client can fix the request and retry.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::SizeLimitExceeded { .. } | Self::Malformed(_))
    }

    pub(crate) fn read_io(field: &str, source: std::io::Error) -> Self {
        Self::ReadFailure {
            field: field.to_string(),
            detail: source.to_string(),
            source: Some(source),
        }
    }
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
