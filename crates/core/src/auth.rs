//! Shared-credential gate checked before any tool is dispatched.

use crate::error::{ConfigError, GatewayError};

/// Constant-time string comparison to prevent timing side-channel attacks.
/// XORs all bytes and accumulates differences; the result reveals nothing
/// about *which* byte differed.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let result = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    result == 0
}

/// Validates caller credentials against the configured secret.
///
/// Construction fails when the secret is empty, so a gate that exists is
/// always closed to callers without the key.
#[derive(Clone)]
pub struct AuthGate {
    secret: String,
}

impl AuthGate {
    pub fn new(secret: impl Into<String>) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(Self { secret })
    }

    /// Authorize a credential. Messages never echo either value.
    pub fn authorize(&self, credential: Option<&str>) -> Result<(), GatewayError> {
        match credential {
            None => Err(GatewayError::auth("missing credential")),
            Some(c) if c.is_empty() => Err(GatewayError::auth("missing credential")),
            Some(c) if constant_time_eq(c.as_bytes(), self.secret.as_bytes()) => Ok(()),
            Some(_) => Err(GatewayError::auth("could not validate credentials")),
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").field("secret", &"<redacted>").finish()
    }
}
