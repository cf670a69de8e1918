//! Fetching the bill and recording it.

pub mod artifacts;
mod due_date;
mod extractor;
mod orchestrator;
mod session;

pub use due_date::{parse_due_date, DueDateError};
pub use extractor::{parse_amount, BillExtractor};
pub use orchestrator::{BillTarget, RetryOrchestrator, RunReport};
pub use session::{dashboard_url, login_url, SessionManager, PROVIDER};

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::BillError;

/// The amount due and when it is due, as read off the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRecord {
    pub amount_due: Decimal,
    pub due_date: NaiveDate,
}

/// Await one browser call for at most `limit`. Driver errors become
/// [`BillError::Browser`]; running out of time becomes a timeout on `what`.
pub(crate) async fn bounded<T, F>(what: &str, limit: Duration, call: F) -> Result<T, BillError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(BillError::Browser),
        Err(_) => Err(BillError::timeout(what, limit)),
    }
}
