//! 1Password CLI secret backend.
//!
//! Shells out to `op read <reference>`. The CLI authenticates itself from
//! `OP_SERVICE_ACCOUNT_TOKEN` in the environment.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use tokio::process::Command;

use super::SecretResolver;

/// Secret resolver backed by the `op` CLI.
#[derive(Debug, Clone)]
pub struct OpSecretResolver {
    program: String,
    timeout: Duration,
}

impl OpSecretResolver {
    pub fn new() -> Self {
        Self::with_program("op")
    }

    /// Use a specific `op` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Give up on a single `op read` after `timeout`. The child is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OpSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that `reference` looks like `op://vault/item/field`.
fn validate_reference(reference: &str) -> Result<()> {
    let Some(rest) = reference.strip_prefix("op://") else {
        anyhow::bail!("secret reference must start with op://");
    };

    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() < 3 || segments.iter().any(|s| s.trim().is_empty()) {
        anyhow::bail!("secret reference must look like op://vault/item/field");
    }

    Ok(())
}

#[async_trait]
impl SecretResolver for OpSecretResolver {
    async fn resolve(&self, reference: &str) -> Result<SecretString> {
        validate_reference(reference)?;

        let output = Command::new(&self.program)
            .arg("read")
            .arg("--no-newline")
            .arg(reference)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                anyhow::anyhow!("{} read timed out after {:?}", self.program, self.timeout)
            })?
            .with_context(|| format!("Failed to run {} command", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("op read failed: {}", stderr.trim());
        }

        let value = String::from_utf8(output.stdout).context("Invalid UTF-8 in op output")?;

        Ok(SecretString::from(value.trim_end_matches(['\r', '\n']).to_string()))
    }
}
