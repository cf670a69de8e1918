//! Drives attempts until the bill is recorded, retries are exhausted, or a
//! fatal error stops the run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::{BrowserLauncher, RunResources};
use crate::budget::{SubmitOutcome, TransactionSubmitter};
use crate::config::VaultConfig;
use crate::credentials::{Credentials, SecretResolver};
use crate::error::{BillError, RunFailure};

use super::{BillExtractor, BillRecord, SessionManager};

/// Where the bill is recorded.
#[derive(Debug, Clone)]
pub struct BillTarget {
    pub budget_name: String,
    pub account_name: String,
    pub category_id: String,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: BillRecord,
    pub outcome: SubmitOutcome,
    /// Whether the cached session was accepted on the final attempt.
    pub reused_session: bool,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

struct AttemptSuccess {
    record: BillRecord,
    outcome: SubmitOutcome,
    reused_session: bool,
}

enum AttemptOutcome {
    Success(AttemptSuccess),
    Retryable(BillError),
    Fatal(BillError),
}

pub struct RetryOrchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    vault: Arc<dyn SecretResolver>,
    secrets: VaultConfig,
    sessions: SessionManager,
    extractor: BillExtractor,
    submitter: TransactionSubmitter,
    target: BillTarget,
    max_attempts: u32,
    close_timeout: Duration,
    retry_delay: Duration,
}

impl RetryOrchestrator {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        vault: Arc<dyn SecretResolver>,
        sessions: SessionManager,
        extractor: BillExtractor,
        submitter: TransactionSubmitter,
        target: BillTarget,
    ) -> Self {
        Self {
            launcher,
            vault,
            secrets: VaultConfig::default(),
            sessions,
            extractor,
            submitter,
            target,
            max_attempts: 3,
            close_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_secrets(mut self, secrets: VaultConfig) -> Self {
        self.secrets = secrets;
        self
    }

    /// Total attempts including the first. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Bound on closing each of page, context, and browser.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run to completion.
    ///
    /// Credentials are resolved once up front; a failure there is reported
    /// as fatal with `attempt` 0. Attempts run strictly one after another and
    /// each releases its browser before the next starts.
    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        let credentials = Credentials::resolve(self.vault.as_ref(), &self.secrets)
            .await
            .map_err(|error| {
                tracing::error!(error = %error, "Could not resolve credentials");
                RunFailure::Fatal { attempt: 0, error }
            })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(attempt, max_attempts = self.max_attempts, "Starting attempt");

            match self.attempt(&credentials).await {
                AttemptOutcome::Success(success) => {
                    tracing::info!(attempt, "Run succeeded");
                    return Ok(RunReport {
                        record: success.record,
                        outcome: success.outcome,
                        reused_session: success.reused_session,
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Fatal(error) => {
                    tracing::error!(attempt, error = %error, "Fatal error; not retrying");
                    return Err(RunFailure::Fatal { attempt, error });
                }
                AttemptOutcome::Retryable(error) => {
                    tracing::warn!(attempt, error = %error, "Attempt failed");
                    if attempt >= self.max_attempts {
                        tracing::error!(attempts = attempt, "Retries exhausted");
                        return Err(RunFailure::Exhausted {
                            attempts: attempt,
                            last: error,
                        });
                    }
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }

    async fn attempt(&self, credentials: &Credentials) -> AttemptOutcome {
        let mut resources = RunResources::new();
        let result = self.fetch_and_record(&mut resources, credentials).await;
        let cleanup = self.release(&mut resources).await;

        match (result, cleanup) {
            (Ok(success), Ok(())) => AttemptOutcome::Success(success),
            (Ok(success), Err(cleanup)) => {
                // The transaction already exists; failing now would only
                // invite a duplicate on the next run.
                tracing::warn!(error = %cleanup, "Bill recorded but cleanup failed");
                AttemptOutcome::Success(success)
            }
            (Err(error), Ok(())) if error.is_fatal() => AttemptOutcome::Fatal(error),
            (Err(error), Ok(())) => AttemptOutcome::Retryable(error),
            (Err(error), Err(BillError::Cleanup(detail))) => {
                AttemptOutcome::Fatal(BillError::Cleanup(format!("{detail} (after: {error})")))
            }
            (Err(_), Err(cleanup)) => AttemptOutcome::Fatal(cleanup),
        }
    }

    async fn fetch_and_record(
        &self,
        resources: &mut RunResources,
        credentials: &Credentials,
    ) -> Result<AttemptSuccess, BillError> {
        let browser = self.launcher.launch().await.map_err(BillError::Browser)?;
        resources.browser = Some(browser);
        tracing::debug!("Browser launched");

        let reused_session = self.sessions.obtain_session(resources, credentials).await?;

        let page = resources
            .page
            .as_deref()
            .ok_or_else(|| BillError::Browser(anyhow::anyhow!("no page after login")))?;
        let record = self.extractor.extract(page).await?;

        let outcome = self
            .submitter
            .submit(
                &record,
                &self.target.budget_name,
                &self.target.account_name,
                &self.target.category_id,
            )
            .await?;

        Ok(AttemptSuccess {
            record,
            outcome,
            reused_session,
        })
    }

    /// Close page, then context, then browser. Every held resource gets a
    /// close call even when an earlier one fails or hangs.
    async fn release(&self, resources: &mut RunResources) -> Result<(), BillError> {
        let mut failures = Vec::new();

        if let Some(mut page) = resources.page.take() {
            if let Err(e) = close_within(self.close_timeout, "page", page.close()).await {
                failures.push(e);
            }
        }
        if let Some(mut context) = resources.context.take() {
            if let Err(e) = close_within(self.close_timeout, "context", context.close()).await {
                failures.push(e);
            }
        }
        if let Some(mut browser) = resources.browser.take() {
            if let Err(e) = close_within(self.close_timeout, "browser", browser.close()).await {
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BillError::Cleanup(failures.join("; ")))
        }
    }
}

async fn close_within<F>(timeout: Duration, resource: &str, close: F) -> Result<(), String>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(timeout, close).await {
        Ok(Ok(())) => {
            tracing::debug!(resource, "Closed");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::warn!(resource, error = %e, "Close failed");
            Err(format!("{resource}: {e}"))
        }
        Err(_) => {
            tracing::warn!(resource, timeout = ?timeout, "Close timed out; abandoning");
            Err(format!("{resource}: timed out after {timeout:?}"))
        }
    }
}
