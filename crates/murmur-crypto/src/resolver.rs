//! Profile resolution capability.

use murmur_registry::{ChatProfile, LookupReply};

use crate::Result;

/// Resolves a claimed sender name to an authenticated chat profile.
///
/// Injected into first-contact decryption: after the ciphertext opens, the
/// session layer hands the claimed name and any embedded registry proof to
/// the resolver and binds the returned auth key into the MAC check. The
/// capability is passed explicitly so cache policy and registry access
/// stay with the caller (and tests can substitute fixtures).
pub trait ProfileResolver {
    /// Resolve `name` to its chat profile, using `embedded_proof` when it
    /// is acceptable evidence.
    ///
    /// # Errors
    ///
    /// `UnknownProfile` when no binding can be established;
    /// `ProfileStale` when the only evidence is older than policy allows.
    fn resolve(
        &mut self,
        name: &str,
        embedded_proof: Option<&LookupReply>,
    ) -> Result<ChatProfile>;
}
