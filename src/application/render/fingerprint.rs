//! Cache key derivation for render requests.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::types::RenderRequest;

/// Deterministic key derived from source, dialect and theme.
///
/// Collisions are tolerated: the hash is not cryptographic and equal
/// fingerprints are treated as the same artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &RenderRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        request.source.hash(&mut hasher);
        request.dialect.hash(&mut hasher);
        request.theme.hash(&mut hasher);
        Self(format!(
            "{}:{}:{:016x}",
            request.dialect,
            request.theme,
            hasher.finish()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
