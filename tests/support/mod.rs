#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use billsync::browser::{Browser, BrowserContext, BrowserLauncher, Page};
use billsync::budget::{
    Account, Budget, BudgetService, ScheduledTransaction, TransactionRequest, TransactionSubmitter,
};
use billsync::clock::{Clock, FixedClock, SystemClock};
use billsync::config::{SelectorConfig, VaultConfig};
use billsync::credentials::{AuthStateStore, SecretResolver, StorageState, StoredCookie};
use billsync::sync::{BillExtractor, BillTarget, RetryOrchestrator, SessionManager};
use chrono::NaiveDate;
use secrecy::SecretString;

pub const BASE_URL: &str = "https://pge.test";
pub const ACCOUNT_NUMBER: &str = "1234567890";
pub const BUDGET_NAME: &str = "Household";
pub const ACCOUNT_NAME: &str = "Checking";
pub const CATEGORY_ID: &str = "cat-electric";

/// Which resource a close-behavior override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Page,
    Context,
    Browser,
}

impl Resource {
    fn label(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Context => "context",
            Self::Browser => "browser",
        }
    }
}

/// Scripted behavior of the fake provider site and browser.
#[derive(Debug)]
pub struct SiteState {
    pub events: Vec<String>,
    pub amount_text: Option<String>,
    pub due_text: Option<String>,
    pub consent_banner: bool,
    /// Whether restored cookies still count as logged in.
    pub accept_restored_session: bool,
    pub fail_goto: bool,
    pub hang_goto: bool,
    /// Element reads never answer.
    pub hang_read_text: bool,
    /// Typing into the login form never finishes.
    pub hang_typing: bool,
    pub fail_close: Option<Resource>,
    pub hang_close: Option<Resource>,
}

impl Default for SiteState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            amount_text: Some("$120.50".to_string()),
            due_text: Some("Due 3/5".to_string()),
            consent_banner: true,
            accept_restored_session: true,
            fail_goto: false,
            hang_goto: false,
            hang_read_text: false,
            hang_typing: false,
            fail_close: None,
            hang_close: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new(state: SiteState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut SiteState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn saw_login(&self) -> bool {
        let submit = SelectorConfig::default().submit;
        self.count(&format!("click {submit}")) > 0
    }

    /// Close events in the order they happened.
    pub fn closes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("close "))
            .collect()
    }

    fn record(&self, event: impl Into<String>) {
        self.state.lock().unwrap().events.push(event.into());
    }

    fn with<T>(&self, f: impl FnOnce(&SiteState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    async fn close(&self, resource: Resource) -> Result<()> {
        self.record(format!("close {}", resource.label()));
        let (fail, hang) = self.with(|s| (s.fail_close, s.hang_close));
        if hang == Some(resource) {
            std::future::pending::<()>().await;
        }
        if fail == Some(resource) {
            anyhow::bail!("{} refused to close", resource.label());
        }
        Ok(())
    }
}

pub struct FakeLauncher {
    site: FakeSite,
}

impl FakeLauncher {
    pub fn new(site: FakeSite) -> Self {
        Self { site }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        self.site.record("launch");
        Ok(Box::new(FakeBrowser {
            site: self.site.clone(),
        }))
    }
}

struct FakeBrowser {
    site: FakeSite,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self, state: Option<&[u8]>) -> Result<Box<dyn BrowserContext>> {
        let restored = match state {
            Some(bytes) => !StorageState::from_bytes(bytes)?.cookies.is_empty(),
            None => false,
        };
        self.site.record(if restored {
            "new_context restored"
        } else {
            "new_context fresh"
        });
        let logged_in = restored && self.site.with(|s| s.accept_restored_session);
        Ok(Box::new(FakeContext {
            site: self.site.clone(),
            logged_in: Arc::new(AtomicBool::new(logged_in)),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.site.close(Resource::Browser).await
    }
}

struct FakeContext {
    site: FakeSite,
    logged_in: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        self.site.record("new_page");
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            logged_in: self.logged_in.clone(),
            url: Mutex::new(None),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.site.close(Resource::Context).await
    }
}

struct FakePage {
    site: FakeSite,
    logged_in: Arc<AtomicBool>,
    url: Mutex<Option<String>>,
}

impl FakePage {
    fn set_url(&self, url: String) {
        *self.url.lock().unwrap() = Some(url);
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.site.record(format!("goto {url}"));
        let (fail, hang) = self.site.with(|s| (s.fail_goto, s.hang_goto));
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            anyhow::bail!("net::ERR_CONNECTION_RESET");
        }

        // Unauthenticated visits to the dashboard bounce to the login page.
        if url.contains("#myaccount") && !self.logged_in.load(Ordering::SeqCst) {
            self.set_url(format!("{BASE_URL}/#login"));
        } else {
            self.set_url(url.to_string());
        }
        Ok(())
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn type_sequentially(&self, selector: &str, _text: &str) -> Result<()> {
        self.site.record(format!("type {selector}"));
        if self.site.with(|s| s.hang_typing) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.site.record(format!("click {selector}"));
        let selectors = SelectorConfig::default();
        if selector == selectors.consent_reject {
            if !self.site.with(|s| s.consent_banner) {
                anyhow::bail!("Element not found: {selector}");
            }
        } else if selector == selectors.submit {
            self.logged_in.store(true, Ordering::SeqCst);
            self.set_url(format!("{BASE_URL}/#myaccount/dashboard/summary"));
        }
        Ok(())
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>> {
        let selectors = SelectorConfig::default();
        if self.site.with(|s| s.hang_read_text) {
            std::future::pending::<()>().await;
        }
        if !self.logged_in.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.site.with(|s| {
            if selector == selectors.amount_due {
                s.amount_text.clone()
            } else if selector == selectors.due_date {
                s.due_text.clone()
            } else {
                None
            }
        }))
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.site.record("screenshot");
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }

    async fn storage_state(&self) -> Result<Vec<u8>> {
        session_state()
    }

    async fn close(&mut self) -> Result<()> {
        self.site.close(Resource::Page).await
    }
}

/// Serialized storage state holding one session cookie.
pub fn session_state() -> Result<Vec<u8>> {
    StorageState {
        cookies: vec![StoredCookie {
            name: "SESSION".to_string(),
            value: "abc123".to_string(),
            domain: Some("pge.test".to_string()),
            path: Some("/".to_string()),
            secure: true,
            http_only: true,
        }],
    }
    .to_bytes()
}

/// Resolves references from a fixed map.
#[derive(Default)]
pub struct StaticResolver {
    secrets: HashMap<String, String>,
}

impl StaticResolver {
    /// Every reference in the default vault config, filled in.
    pub fn with_defaults() -> Self {
        let refs = VaultConfig::default();
        let mut secrets = HashMap::new();
        secrets.insert(refs.username, "user@example.com".to_string());
        secrets.insert(refs.password, "hunter2".to_string());
        secrets.insert(refs.account_number, ACCOUNT_NUMBER.to_string());
        secrets.insert(refs.ynab_token, "ynab-token".to_string());
        Self { secrets }
    }

    pub fn without(mut self, reference: &str) -> Self {
        self.secrets.remove(reference);
        self
    }
}

#[async_trait]
impl SecretResolver for StaticResolver {
    async fn resolve(&self, reference: &str) -> Result<SecretString> {
        match self.secrets.get(reference) {
            Some(value) => Ok(SecretString::from(value.clone())),
            None => anyhow::bail!("no item found for {reference}"),
        }
    }
}

/// In-memory budgeting service recording what was created.
pub struct MemoryBudget {
    pub budgets: Vec<Budget>,
    pub accounts: Vec<Account>,
    pub scheduled: Mutex<Vec<ScheduledTransaction>>,
    pub created: Mutex<Vec<TransactionRequest>>,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            budgets: vec![
                Budget {
                    id: "budget-other".to_string(),
                    name: "Business".to_string(),
                },
                Budget {
                    id: "budget-1".to_string(),
                    name: BUDGET_NAME.to_string(),
                },
            ],
            accounts: vec![Account {
                id: "account-1".to_string(),
                name: ACCOUNT_NAME.to_string(),
                closed: false,
                deleted: false,
            }],
            scheduled: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryBudget {
    pub fn created(&self) -> Vec<TransactionRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl BudgetService for MemoryBudget {
    async fn list_budgets(&self) -> Result<Vec<Budget>> {
        Ok(self.budgets.clone())
    }

    async fn list_accounts(&self, _budget_id: &str) -> Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    async fn list_scheduled_transactions(
        &self,
        _budget_id: &str,
    ) -> Result<Vec<ScheduledTransaction>> {
        Ok(self.scheduled.lock().unwrap().clone())
    }

    async fn create_scheduled_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<ScheduledTransaction> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let transaction = ScheduledTransaction {
            id: format!("st-{}", created.len()),
            date_first: request.date,
            date_next: Some(request.date),
            frequency: request.frequency.clone(),
            amount: request.amount_milliunits,
            account_id: request.account_id.clone(),
            payee_name: Some(request.payee_name.clone()),
            category_id: Some(request.category_id.clone()),
            memo: Some(request.memo.clone()),
            deleted: false,
        };
        self.scheduled.lock().unwrap().push(transaction.clone());
        Ok(transaction)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Everything a flow test needs to drive one run.
pub struct Harness {
    pub site: FakeSite,
    pub budget: Arc<MemoryBudget>,
    pub vault: StaticResolver,
    pub auth_dir: std::path::PathBuf,
    pub screenshot_dir: std::path::PathBuf,
    pub today: NaiveDate,
    pub max_attempts: u32,
}

impl Harness {
    pub fn new(root: &Path) -> Self {
        Self {
            site: FakeSite::default(),
            budget: Arc::new(MemoryBudget::default()),
            vault: StaticResolver::with_defaults(),
            auth_dir: root.join(".auth"),
            screenshot_dir: root.join("screenshots"),
            today: date(2024, 2, 1),
            max_attempts: 3,
        }
    }

    pub fn store(&self) -> AuthStateStore {
        AuthStateStore::new(&self.auth_dir).with_clock(Arc::new(SystemClock))
    }

    /// Write a session artifact last modified `age` ago.
    pub fn seed_session(&self, age: Duration) -> Result<()> {
        self.store().save(billsync::sync::PROVIDER, &session_state()?)?;
        let path = self.auth_dir.join(format!("{}.json", billsync::sync::PROVIDER));
        let file = std::fs::File::options().write(true).open(path)?;
        file.set_modified(std::time::SystemTime::now() - age)?;
        Ok(())
    }

    pub fn session_exists(&self) -> bool {
        self.auth_dir
            .join(format!("{}.json", billsync::sync::PROVIDER))
            .exists()
    }

    pub fn orchestrator(self) -> (RetryOrchestrator, FakeSite, Arc<MemoryBudget>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::on(self.today));
        let sessions = SessionManager::new(self.store(), BASE_URL)
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(500))
            .with_element_timeout(Duration::from_millis(300));
        let selectors = SelectorConfig::default();
        std::fs::create_dir_all(&self.screenshot_dir).unwrap();
        let extractor = BillExtractor::new(selectors.amount_due, selectors.due_date)
            .with_element_timeout(Duration::from_millis(300))
            .with_screenshot_dir(self.screenshot_dir.clone())
            .with_clock(clock);
        let submitter = TransactionSubmitter::new(self.budget.clone());

        let orchestrator = RetryOrchestrator::new(
            Arc::new(FakeLauncher::new(self.site.clone())),
            Arc::new(self.vault),
            sessions,
            extractor,
            submitter,
            BillTarget {
                budget_name: BUDGET_NAME.to_string(),
                account_name: ACCOUNT_NAME.to_string(),
                category_id: CATEGORY_ID.to_string(),
            },
        )
        .with_max_attempts(self.max_attempts)
        .with_close_timeout(Duration::from_millis(200))
        .with_retry_delay(Duration::ZERO);

        (orchestrator, self.site, self.budget)
    }
}
