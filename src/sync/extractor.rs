//! Reads the amount due and due date off the dashboard.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;

use super::due_date::parse_due_date;
use super::{bounded, BillRecord};
use crate::browser::Page;
use crate::clock::{Clock, SystemClock};
use crate::error::BillError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct BillExtractor {
    amount_selector: String,
    due_date_selector: String,
    element_timeout: Duration,
    screenshot_dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl BillExtractor {
    pub fn new(amount_selector: impl Into<String>, due_date_selector: impl Into<String>) -> Self {
        Self {
            amount_selector: amount_selector.into(),
            due_date_selector: due_date_selector.into(),
            element_timeout: Duration::from_secs(10),
            screenshot_dir: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    /// Save a screenshot of the dashboard into `dir` on every extraction.
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Extract the bill from a page already showing the account dashboard.
    pub async fn extract(&self, page: &dyn Page) -> Result<BillRecord, BillError> {
        let amount_text = self.wait_for_text(page, &self.amount_selector).await?;

        self.capture_screenshot(page).await;

        let amount_text = amount_text.ok_or_else(|| BillError::extraction("amount not found"))?;
        let due_text = self
            .wait_for_text(page, &self.due_date_selector)
            .await?
            .ok_or_else(|| BillError::extraction("due date not found"))?;

        let amount_due = parse_amount(&amount_text)?;
        let due_date = parse_due_date(&due_text, self.clock.today())
            .map_err(|e| BillError::extraction(format!("due date: {e}")))?;

        let record = BillRecord {
            amount_due,
            due_date,
        };
        tracing::info!(amount_due = %record.amount_due, due_date = %record.due_date, "Bill extracted");
        Ok(record)
    }

    /// Poll until `selector` renders non-blank text or the element timeout
    /// passes. `Ok(None)` means the deadline passed with the page answering;
    /// a read that is still pending at the deadline is a timeout.
    async fn wait_for_text(
        &self,
        page: &dyn Page,
        selector: &str,
    ) -> Result<Option<String>, BillError> {
        let deadline = Instant::now() + self.element_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let text = bounded(selector, remaining, page.read_text(selector))
                .await
                .map_err(|e| match e {
                    BillError::Timeout { what, .. } => {
                        BillError::timeout(what, self.element_timeout)
                    }
                    other => other,
                })?;
            if let Some(text) = text.map(|t| t.trim().to_string()) {
                if !text.is_empty() {
                    return Ok(Some(text));
                }
            }

            if Instant::now() >= deadline {
                tracing::debug!(selector, timeout = ?self.element_timeout, "Element never rendered text");
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(self.element_timeout)).await;
        }
    }

    async fn capture_screenshot(&self, page: &dyn Page) {
        let Some(dir) = &self.screenshot_dir else {
            return;
        };
        let path = dir.join("dashboard.png");
        match bounded("screenshot", self.element_timeout, page.screenshot(&path)).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Dashboard screenshot saved"),
            Err(e) => tracing::warn!(error = %e, "Could not capture dashboard screenshot"),
        }
    }
}

/// Parse a displayed currency amount such as "$1,234.56".
pub fn parse_amount(text: &str) -> Result<Decimal, BillError> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(BillError::extraction("amount not found"));
    }

    Decimal::from_str(&cleaned)
        .map_err(|_| BillError::extraction(format!("amount is not numeric: {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$120.50").unwrap(), dec("120.50"));
        assert_eq!(parse_amount(" $1,234.56 ").unwrap(), dec("1234.56"));
        assert_eq!(parse_amount("45.67").unwrap(), dec("45.67"));
        assert_eq!(parse_amount("-$5.00").unwrap(), dec("-5.00"));
    }

    #[test]
    fn test_parse_amount_rejects_non_numeric() {
        assert!(matches!(parse_amount("$"), Err(BillError::Extraction(_))));
        assert!(matches!(parse_amount("N/A"), Err(BillError::Extraction(_))));
        assert!(matches!(parse_amount("$12.3.4"), Err(BillError::Extraction(_))));
    }
}
