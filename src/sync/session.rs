//! Gets an authenticated dashboard page, reusing a cached session when the
//! provider still accepts it.

use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::time::Instant;

use crate::browser::{Page, RunResources};
use crate::config::SelectorConfig;
use crate::credentials::{AuthStateStore, Credentials};
use crate::error::BillError;

use super::bounded;

/// Key of the session artifact.
pub const PROVIDER: &str = "pge";

const DASHBOARD_MARKER: &str = "#myaccount/dashboard";
const CONSENT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub fn login_url(base_url: &str) -> String {
    format!("{base_url}/#login")
}

pub fn dashboard_url(base_url: &str, account_number: &str) -> String {
    format!("{base_url}/#myaccount/dashboard/summary/{account_number}")
}

fn is_dashboard(url: &str) -> bool {
    url.contains(DASHBOARD_MARKER)
}

pub struct SessionManager {
    store: AuthStateStore,
    base_url: String,
    selectors: SelectorConfig,
    navigation_timeout: Duration,
    login_timeout: Duration,
    element_timeout: Duration,
}

impl SessionManager {
    pub fn new(store: AuthStateStore, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into(),
            selectors: SelectorConfig::default(),
            navigation_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(60),
            element_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_selectors(mut self, selectors: SelectorConfig) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn with_timeouts(mut self, navigation: Duration, login: Duration) -> Self {
        self.navigation_timeout = navigation;
        self.login_timeout = login;
        self
    }

    /// Bound on each form interaction (typing, clicking, reading state).
    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    /// Open a context and page in `resources` and leave the page on the
    /// account dashboard.
    ///
    /// Returns `true` when a cached session was reused, `false` when the
    /// login form had to be filled in.
    pub async fn obtain_session(
        &self,
        resources: &mut RunResources,
        credentials: &Credentials,
    ) -> Result<bool, BillError> {
        let browser = resources
            .browser
            .as_ref()
            .ok_or_else(|| BillError::Browser(anyhow::anyhow!("browser is not running")))?;

        let artifact = match self.store.load(PROVIDER) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable session artifact; logging in fresh");
                self.store.invalidate(PROVIDER);
                None
            }
        };

        let context = match browser
            .new_context(artifact.as_ref().map(|a| a.state.as_slice()))
            .await
        {
            Ok(context) => context,
            Err(e) => {
                if artifact.is_some() {
                    self.store.invalidate(PROVIDER);
                }
                return Err(BillError::Browser(e));
            }
        };
        let context = resources.context.insert(context);
        let page = context.new_page().await.map_err(BillError::Browser)?;
        let page: &dyn Page = &**resources.page.insert(page);

        let dashboard = dashboard_url(&self.base_url, credentials.account_number.expose_secret());

        if artifact.is_some() {
            self.navigate(page, &dashboard, "account dashboard").await?;
            if self
                .current_url(page, self.element_timeout)
                .await?
                .is_some_and(|url| is_dashboard(&url))
            {
                tracing::info!("Reusing cached session");
                return Ok(true);
            }
            tracing::info!("Cached session was rejected; logging in");
            self.store.invalidate(PROVIDER);
        } else {
            tracing::info!("No reusable session; logging in");
        }

        self.login(page, credentials).await?;
        self.navigate(page, &dashboard, "account dashboard").await?;
        Ok(false)
    }

    async fn login(&self, page: &dyn Page, credentials: &Credentials) -> Result<(), BillError> {
        tracing::info!("Navigating to the login page");
        self.navigate(page, &login_url(&self.base_url), "login page")
            .await?;

        self.dismiss_consent_banner(page).await;

        let selectors = &self.selectors;
        bounded(
            &selectors.username,
            self.element_timeout,
            page.type_sequentially(&selectors.username, credentials.username.expose_secret()),
        )
        .await?;
        bounded(
            &selectors.password,
            self.element_timeout,
            page.type_sequentially(&selectors.password, credentials.password.expose_secret()),
        )
        .await?;
        bounded(
            &selectors.submit,
            self.element_timeout,
            page.click(&selectors.submit),
        )
        .await?;

        self.wait_for_dashboard(page).await?;

        let state = bounded(
            "session state export",
            self.element_timeout,
            page.storage_state(),
        )
        .await?;
        self.store
            .save(PROVIDER, &state)
            .map_err(BillError::SessionStore)?;

        tracing::info!("Logged in; session saved");
        Ok(())
    }

    /// The consent banner doesn't always show up; missing it is fine.
    async fn dismiss_consent_banner(&self, page: &dyn Page) {
        match tokio::time::timeout(CONSENT_TIMEOUT, page.click(&self.selectors.consent_reject)).await
        {
            Ok(Ok(())) => tracing::debug!("Dismissed consent banner"),
            Ok(Err(e)) => tracing::debug!(error = %e, "No consent banner to dismiss"),
            Err(_) => tracing::debug!("Consent banner click timed out"),
        }
    }

    async fn navigate(&self, page: &dyn Page, url: &str, label: &str) -> Result<(), BillError> {
        match tokio::time::timeout(self.navigation_timeout, page.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(BillError::Navigation {
                target: label.to_string(),
                source,
            }),
            Err(_) => Err(BillError::timeout(label, self.navigation_timeout)),
        }
    }

    async fn wait_for_dashboard(&self, page: &dyn Page) -> Result<(), BillError> {
        let deadline = Instant::now() + self.login_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let url = self.current_url(page, remaining).await.map_err(|e| match e {
                BillError::Timeout { .. } => {
                    BillError::timeout("dashboard after login", self.login_timeout)
                }
                other => other,
            })?;
            if url.is_some_and(|url| is_dashboard(&url)) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BillError::timeout("dashboard after login", self.login_timeout));
            }
            tokio::time::sleep(POLL_INTERVAL.min(self.login_timeout)).await;
        }
    }

    async fn current_url(
        &self,
        page: &dyn Page,
        limit: Duration,
    ) -> Result<Option<String>, BillError> {
        bounded("current page URL", limit, page.url()).await
    }
}
