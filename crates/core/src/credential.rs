//! Bearer credential for the remote endpoints
//!
//! The credential is read once at process start. A missing or empty value is a
//! startup configuration error, never a per-request one.

use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Bearer token sent in the `Authorization` header
///
/// `Debug` output never includes the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Environment variable consulted by [`Credential::from_env`]
    pub const ENV_VAR: &'static str = "OPENAI_API_KEY";

    /// Wrap an explicit token
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Read the credential from `OPENAI_API_KEY`
    pub fn from_env() -> Result<Self> {
        Self::from_env_var(Self::ENV_VAR)
    }

    /// Read the credential from a named environment variable
    pub fn from_env_var(name: &str) -> Result<Self> {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(Self::new(value.trim())),
            _ => Err(Error::MissingCredential(name.to_string())),
        }
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    /// Raw token
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
