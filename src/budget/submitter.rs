use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::{BudgetService, ScheduledTransaction, TransactionRequest, FREQUENCY_NEVER};
use crate::error::BillError;
use crate::sync::BillRecord;

pub const PAYEE_NAME: &str = "PG&E";
pub const MEMO: &str = "Electricity bill";

/// What `submit` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created { id: String },
    /// An identical scheduled transaction already existed; nothing was sent.
    AlreadyScheduled { id: String },
}

/// Convert a currency amount to negative milliunits (an outflow).
pub fn outflow_milliunits(amount: Decimal) -> Result<i64, BillError> {
    let milliunits = amount
        .checked_mul(Decimal::from(1000))
        .map(|m| m.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|m| m.to_i64())
        .ok_or_else(|| BillError::extraction(format!("amount {amount} is out of range")))?;
    Ok(-milliunits)
}

/// Records an extracted bill as a one-time scheduled transaction.
pub struct TransactionSubmitter {
    service: Arc<dyn BudgetService>,
    skip_duplicates: bool,
}

impl TransactionSubmitter {
    pub fn new(service: Arc<dyn BudgetService>) -> Self {
        Self {
            service,
            skip_duplicates: true,
        }
    }

    pub fn with_skip_duplicates(mut self, skip_duplicates: bool) -> Self {
        self.skip_duplicates = skip_duplicates;
        self
    }

    pub async fn submit(
        &self,
        record: &BillRecord,
        budget_name: &str,
        account_name: &str,
        category_id: &str,
    ) -> Result<SubmitOutcome, BillError> {
        let budgets = self.service.list_budgets().await.map_err(BillError::Budget)?;
        let budget = budgets
            .into_iter()
            .find(|b| b.name == budget_name)
            .ok_or_else(|| BillError::NotFound {
                kind: "budget",
                name: budget_name.to_string(),
            })?;
        tracing::info!(budget_id = %budget.id, "Resolved budget");

        let accounts = self
            .service
            .list_accounts(&budget.id)
            .await
            .map_err(BillError::Budget)?;
        let account = accounts
            .into_iter()
            .find(|a| a.name == account_name && !a.deleted)
            .ok_or_else(|| BillError::NotFound {
                kind: "account",
                name: account_name.to_string(),
            })?;

        let request = TransactionRequest {
            budget_id: budget.id,
            account_id: account.id,
            category_id: category_id.to_string(),
            date: record.due_date,
            amount_milliunits: outflow_milliunits(record.amount_due)?,
            payee_name: PAYEE_NAME.to_string(),
            memo: MEMO.to_string(),
            frequency: FREQUENCY_NEVER.to_string(),
        };

        if self.skip_duplicates {
            let existing = self
                .service
                .list_scheduled_transactions(&request.budget_id)
                .await
                .map_err(BillError::Budget)?;
            if let Some(duplicate) = existing.iter().find(|t| is_same_bill(t, &request)) {
                tracing::info!(
                    scheduled_transaction_id = %duplicate.id,
                    date = %request.date,
                    "Bill already scheduled; skipping"
                );
                return Ok(SubmitOutcome::AlreadyScheduled {
                    id: duplicate.id.clone(),
                });
            }
        }

        let created = self
            .service
            .create_scheduled_transaction(&request)
            .await
            .map_err(BillError::Budget)?;

        tracing::info!(
            scheduled_transaction_id = %created.id,
            date = %request.date,
            amount_milliunits = request.amount_milliunits,
            "Scheduled transaction created"
        );
        Ok(SubmitOutcome::Created { id: created.id })
    }
}

fn is_same_bill(existing: &ScheduledTransaction, request: &TransactionRequest) -> bool {
    let same_date =
        existing.date_first == request.date || existing.date_next == Some(request.date);
    !existing.deleted
        && same_date
        && existing.amount == request.amount_milliunits
        && existing.account_id == request.account_id
        && existing.payee_name.as_deref() == Some(request.payee_name.as_str())
}
