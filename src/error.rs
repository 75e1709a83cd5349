//! Error types surfaced by the public entry points.

/// Errors produced by the hash engine.
///
/// Internal helpers that cannot fail stay infallible; these variants only
/// appear at the public seams.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A size or shape violation at a public entry point (empty input,
    /// mismatched cache size, undersized salt).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An invariant violation or platform failure. Fatal for the current
    /// operation; no partial state is exposed.
    #[error("internal error: {0}")]
    Internal(String),

    /// A mandatory CPU feature is absent. The portable build carries
    /// software fallbacks for every accelerated path, so this is reserved
    /// for configurations that disable them.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
