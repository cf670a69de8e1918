//! Secrets and persisted session state.
//!
//! Login credentials and the budgeting token come from a secrets vault
//! addressed by reference strings (e.g. `op://dev/pge-credentials/username`).
//! The vault is reached through the [`SecretResolver`] trait so the run can be
//! driven by a fake in tests.
//!
//! Authenticated browser state is cached on disk by [`AuthStateStore`] so
//! back-to-back runs can skip the login form.

mod op;
mod session;

pub use op::OpSecretResolver;
pub use session::{AuthStateStore, SessionArtifact, StoredCookie, StorageState, FRESHNESS_WINDOW};

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

use crate::config::VaultConfig;
use crate::error::BillError;

/// Resolves a secret by its vault reference.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns `Err` if the reference does not exist or the vault is unreachable.
    async fn resolve(&self, reference: &str) -> Result<SecretString>;
}

/// Provider login material, resolved once per run.
#[derive(Debug)]
pub struct Credentials {
    pub username: SecretString,
    pub password: SecretString,
    pub account_number: SecretString,
}

impl Credentials {
    /// Resolve all three secrets. Any failure is a configuration error:
    /// retrying will not make a missing secret appear.
    pub async fn resolve(vault: &dyn SecretResolver, refs: &VaultConfig) -> Result<Self, BillError> {
        Ok(Self {
            username: resolve_required(vault, &refs.username).await?,
            password: resolve_required(vault, &refs.password).await?,
            account_number: resolve_required(vault, &refs.account_number).await?,
        })
    }
}

/// Resolve one secret, mapping failure (or an empty value) to a config error.
pub async fn resolve_required(
    vault: &dyn SecretResolver,
    reference: &str,
) -> Result<SecretString, BillError> {
    use secrecy::ExposeSecret;

    let secret = vault
        .resolve(reference)
        .await
        .map_err(|e| BillError::config(format!("could not resolve secret {reference}: {e}")))?;

    if secret.expose_secret().trim().is_empty() {
        return Err(BillError::config(format!("secret {reference} is empty")));
    }

    Ok(secret)
}
