//! Bearer token sources.
//!
//! Token acquisition (the OAuth client-credentials exchange) happens outside
//! this crate. The session manager asks its [`TokenProvider`] for a token on
//! every transport open, so a provider may refresh between reconnects.

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::fmt;

use async_trait::async_trait;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable read by [`EnvToken::default`].
pub const TOKEN_ENV_VAR: &str = "ESOLOGS_TOKEN";

// ============================================================================
// TokenProvider
// ============================================================================

/// Supplies the bearer token used when opening a session.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if no usable token is available.
    async fn token(&self) -> Result<String>;
}

// ============================================================================
// StaticToken
// ============================================================================

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a token.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        if self.0.trim().is_empty() {
            return Err(Error::auth("Empty bearer token"));
        }
        Ok(self.0.clone())
    }
}

// ============================================================================
// EnvToken
// ============================================================================

/// Reads the token from an environment variable on every open.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Reads from `var`.
    #[inline]
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Returns the variable name.
    #[inline]
    #[must_use]
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Result<String> {
        match env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            Ok(_) => Err(Error::auth(format!("{} is empty", self.var))),
            Err(_) => Err(Error::auth(format!("{} is not set", self.var))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
