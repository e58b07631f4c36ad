//! Shared-password gate in front of every command.

use tracing::warn;

use crate::error::{CostingError, Result};

/// Holds the configured access secret
#[derive(Clone)]
pub struct AccessGate {
    secret: String,
}

impl AccessGate {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compare a typed password with the configured secret
    pub fn check(&self, input: &str) -> Result<()> {
        if constant_time_eq(self.secret.as_bytes(), input.as_bytes()) {
            Ok(())
        } else {
            warn!("Rejected access attempt with wrong password");
            Err(CostingError::AccessDenied)
        }
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate").field("secret", &"***").finish()
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ, so response timing leaks nothing about the secret's prefix
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
