//! Static token verification.
//!
//! Maps configured bearer tokens to identities. Stands in for a real identity
//! provider in development and tests.

use crate::config::TokenEntry;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use huddle_core::{AuthError, Identity, IdentityVerifier};
use std::collections::HashMap;

/// Verifier backed by a fixed token table.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity {
                        id: entry.id.clone(),
                        username: entry.username.clone(),
                        avatar: entry.avatar.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}
