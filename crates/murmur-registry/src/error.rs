//! Registry error types.

use thiserror::Error;

/// Errors produced by registry lookups and proof verification.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry has no record for the requested name.
    #[error("no profile registered for {0:?}")]
    UnknownName(String),

    /// The reply's signature does not verify under the registry key.
    #[error("registry reply signature did not verify")]
    BadSignature,

    /// The reply is for a different name than the one being resolved.
    #[error("registry reply names {got:?}, expected {want:?}")]
    WrongName {
        /// Name the reply actually attests to.
        got: String,
        /// Name the caller asked about.
        want: String,
    },

    /// The reply is older than the verifier's freshness window.
    #[error("registry reply is {age_secs}s old, limit {limit_secs}s")]
    Stale {
        /// Age of the reply at verification time.
        age_secs: i64,
        /// Freshness window the verifier enforces.
        limit_secs: i64,
    },

    /// A record failed to encode or decode.
    #[error("registry encoding error: {0}")]
    Encoding(String),

    /// The profile does not carry the requested field.
    #[error("profile has no field {0}")]
    MissingField(u32),
}
