//! Crate-wide error type.

/// Errors surfaced by the sorter core. None of these are recoverable; the
/// executables report them as a single diagnostic line and exit non-zero.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The run configuration is invalid. Raised before any collective.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// A container invariant was violated during construction.
    #[error("malformed container: {0}")]
    Malformed(String),
    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// An output verification failed.
    #[error("check failed: {0}")]
    CheckFailed(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
