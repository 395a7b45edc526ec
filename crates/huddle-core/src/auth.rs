//! Identity verification seam.
//!
//! Token issuance and verification live outside the engine; at handshake the
//! server exchanges the client's token for an [`Identity`] exactly once.

use crate::model::Identity;
use async_trait::async_trait;
use thiserror::Error;

/// Verification errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Authentication token required")]
    MissingToken,

    /// The token was rejected.
    #[error("Invalid authentication token")]
    InvalidToken,

    /// The verifier could not be reached.
    #[error("Identity verifier failed: {0}")]
    Backend(String),
}

/// Exchanges a bearer token for a verified identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` and return the identity it belongs to.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}
