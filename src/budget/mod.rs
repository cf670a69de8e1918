//! Budgeting service collaborator.
//!
//! [`BudgetService`] is the narrow slice of the YNAB API the run needs;
//! [`YnabClient`] implements it over HTTP and [`TransactionSubmitter`] turns an
//! extracted bill into a scheduled transaction.

mod submitter;
mod ynab;

pub use submitter::{
    outflow_milliunits, SubmitOutcome, TransactionSubmitter, MEMO, PAYEE_NAME,
};
pub use ynab::{YnabClient, DEFAULT_HTTP_TIMEOUT};

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One-time scheduled transaction.
pub const FREQUENCY_NEVER: &str = "never";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// A scheduled transaction as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTransaction {
    pub id: String,
    pub date_first: NaiveDate,
    #[serde(default)]
    pub date_next: Option<NaiveDate>,
    pub frequency: String,
    /// Milliunits; negative for outflows.
    pub amount: i64,
    pub account_id: String,
    #[serde(default)]
    pub payee_name: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

/// A scheduled transaction to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub budget_id: String,
    pub account_id: String,
    pub category_id: String,
    pub date: NaiveDate,
    /// Milliunits; negative for outflows.
    pub amount_milliunits: i64,
    pub payee_name: String,
    pub memo: String,
    pub frequency: String,
}

#[async_trait::async_trait]
pub trait BudgetService: Send + Sync {
    async fn list_budgets(&self) -> Result<Vec<Budget>>;

    async fn list_accounts(&self, budget_id: &str) -> Result<Vec<Account>>;

    async fn list_scheduled_transactions(
        &self,
        budget_id: &str,
    ) -> Result<Vec<ScheduledTransaction>>;

    async fn create_scheduled_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<ScheduledTransaction>;
}
