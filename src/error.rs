//! Error taxonomy for a bill sync run.
//!
//! Components raise [`BillError`] with enough detail to tell which field,
//! selector, or value was involved. Only the retry loop decides what to do
//! with an error, using [`BillError::is_fatal`].

use std::time::Duration;

use thiserror::Error;

/// Errors produced while fetching and recording a bill.
#[derive(Debug, Error)]
pub enum BillError {
    /// A required secret or environment value is missing or unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Page navigation failed outright.
    #[error("navigation to {target} failed: {source}")]
    Navigation {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    /// A network-facing wait ran past its deadline.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// The dashboard did not contain what we expected.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A named budget or account does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Releasing browser resources failed or timed out.
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// The session artifact could not be persisted.
    #[error("session store error: {0}")]
    SessionStore(#[source] anyhow::Error),

    /// Any other browser driver failure.
    #[error("browser error: {0}")]
    Browser(#[source] anyhow::Error),

    /// The budgeting service rejected or failed a request.
    #[error("budget service error: {0}")]
    Budget(#[source] anyhow::Error),
}

impl BillError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Whether retrying the whole run could possibly help.
    ///
    /// Missing secrets, missing budgets/accounts, and disk failures will not
    /// fix themselves; a failed cleanup means another attempt would pile more
    /// leaked browser processes on top of the current ones.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::NotFound { .. } | Self::Cleanup(_) | Self::SessionStore(_) => {
                true
            }
            Self::Navigation { .. }
            | Self::Timeout { .. }
            | Self::Extraction(_)
            | Self::Browser(_)
            | Self::Budget(_) => false,
        }
    }
}

/// Why a whole run failed.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("giving up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: BillError },

    #[error("fatal error on attempt {attempt}: {error}")]
    Fatal { attempt: u32, error: BillError },
}

impl RunFailure {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Exhausted { .. } => 1,
            Self::Fatal { .. } => 2,
        }
    }

    pub fn error(&self) -> &BillError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal { error, .. } => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(BillError::config("missing PGE_BASE_URL").is_fatal());
        assert!(BillError::NotFound {
            kind: "budget",
            name: "Household".to_string()
        }
        .is_fatal());
        assert!(BillError::Cleanup("page close timed out".to_string()).is_fatal());
        assert!(BillError::SessionStore(anyhow::anyhow!("disk full")).is_fatal());

        assert!(!BillError::timeout("dashboard", Duration::from_secs(10)).is_fatal());
        assert!(!BillError::extraction("amount not found").is_fatal());
        assert!(!BillError::Navigation {
            target: "login page".to_string(),
            source: anyhow::anyhow!("net::ERR_CONNECTION_RESET"),
        }
        .is_fatal());
        assert!(!BillError::Browser(anyhow::anyhow!("target crashed")).is_fatal());
        assert!(!BillError::Budget(anyhow::anyhow!("503")).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        let exhausted = RunFailure::Exhausted {
            attempts: 3,
            last: BillError::extraction("due date not found"),
        };
        let fatal = RunFailure::Fatal {
            attempt: 1,
            error: BillError::config("missing secret"),
        };
        assert_eq!(exhausted.exit_code(), 1);
        assert_eq!(fatal.exit_code(), 2);
        assert!(exhausted.to_string().contains("3 attempt(s)"));
    }
}
