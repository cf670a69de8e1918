//! YNAB REST client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Account, Budget, BudgetService, ScheduledTransaction, TransactionRequest};
use crate::config::DEFAULT_YNAB_BASE_URL;

/// YNAB API client authenticated with a personal access token.
pub struct YnabClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct BudgetsData {
    budgets: Vec<Budget>,
}

#[derive(Debug, Deserialize)]
struct AccountsData {
    accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct ScheduledTransactionsData {
    scheduled_transactions: Vec<ScheduledTransaction>,
}

#[derive(Debug, Deserialize)]
struct ScheduledTransactionData {
    scheduled_transaction: ScheduledTransaction,
}

#[derive(Debug, Serialize)]
struct NewScheduledTransaction<'a> {
    account_id: &'a str,
    date: chrono::NaiveDate,
    amount: i64,
    payee_name: &'a str,
    category_id: &'a str,
    memo: &'a str,
    frequency: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    scheduled_transaction: NewScheduledTransaction<'a>,
}

/// Per-request bound when none is configured.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl YnabClient {
    pub fn new(token: SecretString) -> Result<Self> {
        Self::with_timeout(token, DEFAULT_HTTP_TIMEOUT)
    }

    /// Client whose requests fail once `timeout` passes without a full
    /// response.
    pub fn with_timeout(token: SecretString, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("billsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: DEFAULT_YNAB_BASE_URL.to_string(),
            token,
        })
    }

    /// Point the client at a different API root (e.g. a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn budget_path(budget_id: &str, rest: &str) -> String {
        format!("/budgets/{}{rest}", urlencoding::encode(budget_id))
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req
            .bearer_auth(self.token.expose_secret())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("YNAB request timed out: {e}")
                } else {
                    anyhow::anyhow!("HTTP request failed: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("YNAB request failed ({status}): {body}");
        }

        let body = response.text().await.context("Failed to read response")?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).context("Failed to parse JSON response")?;
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.send(self.client.get(&url)).await
    }
}

#[async_trait::async_trait]
impl BudgetService for YnabClient {
    async fn list_budgets(&self) -> Result<Vec<Budget>> {
        let data: BudgetsData = self.get("/budgets").await?;
        tracing::info!(count = data.budgets.len(), "Retrieved budgets");
        Ok(data.budgets)
    }

    async fn list_accounts(&self, budget_id: &str) -> Result<Vec<Account>> {
        let data: AccountsData = self
            .get(&Self::budget_path(budget_id, "/accounts"))
            .await?;
        tracing::info!(count = data.accounts.len(), budget_id, "Retrieved accounts");
        Ok(data.accounts)
    }

    async fn list_scheduled_transactions(
        &self,
        budget_id: &str,
    ) -> Result<Vec<ScheduledTransaction>> {
        let data: ScheduledTransactionsData = self
            .get(&Self::budget_path(budget_id, "/scheduled_transactions"))
            .await?;
        Ok(data.scheduled_transactions)
    }

    async fn create_scheduled_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<ScheduledTransaction> {
        let url = format!(
            "{}{}",
            self.base_url,
            Self::budget_path(&request.budget_id, "/scheduled_transactions")
        );
        let body = CreateBody {
            scheduled_transaction: NewScheduledTransaction {
                account_id: &request.account_id,
                date: request.date,
                amount: request.amount_milliunits,
                payee_name: &request.payee_name,
                category_id: &request.category_id,
                memo: &request.memo,
                frequency: &request.frequency,
            },
        };

        let data: ScheduledTransactionData =
            self.send(self.client.post(&url).json(&body)).await?;
        Ok(data.scheduled_transaction)
    }
}
