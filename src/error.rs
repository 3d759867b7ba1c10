use std::io;

pub type PdfResult<T> = anyhow::Result<T>;

/// Classified failure attached to every error this crate originates.
///
/// Callers that need to branch on the failure class can recover it with
/// `err.downcast_ref::<PdfError>()`.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// The backing store returned a short read/write or an OS error.
    #[error("i/o error: {0}")]
    Io(String),

    /// Malformed header, xref, token, string, or nesting too deep.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Missing /Root, dangling indirect reference, object number out of
    /// range, generation mismatch.
    #[error("reference error: {0}")]
    Reference(String),

    /// Unsupported handler, rejected password, bad padding, key mismatch.
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Unknown filter, Flate/predictor decode failure, invalid DecodeParms.
    #[error("filter error: {0}")]
    Filter(String),

    /// Write operation on a read-mode file and similar misuse.
    #[error("state error: {0}")]
    State(String),

    /// Allocation or size-limit failure.
    #[error("resource error: {0}")]
    Resource(String),
}

impl From<io::Error> for PdfError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
