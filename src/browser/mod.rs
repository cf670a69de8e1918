//! Browser automation seam.
//!
//! The run only needs a handful of capabilities from a browser: open an
//! isolated context (optionally restoring saved cookies), navigate, type,
//! click, read text, take a screenshot, export state, and close. They are
//! expressed as traits so the session and extraction logic can be exercised
//! without a real Chromium.

#[cfg(feature = "chromium")]
pub mod chromium;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Starts a browser process.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Open an isolated context. `state` is a serialized
    /// [`StorageState`](crate::credentials::StorageState) to restore.
    async fn new_context(&self, state: Option<&[u8]>) -> Result<Box<dyn BrowserContext>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the load to finish. Callers bound this with a
    /// timeout.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current location, if the page has one.
    async fn url(&self) -> Result<Option<String>>;

    /// Focus the element and type `text` one key at a time.
    async fn type_sequentially(&self, selector: &str, text: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Rendered text of the first element matching `selector`, or `None`
    /// when no such element exists yet.
    async fn read_text(&self, selector: &str) -> Result<Option<String>>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Serialized storage state of the page's context.
    async fn storage_state(&self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// Browser resources held by one attempt, acquired browser → context → page.
///
/// Released in the opposite order by the orchestrator on every exit path.
#[derive(Default)]
pub struct RunResources {
    pub browser: Option<Box<dyn Browser>>,
    pub context: Option<Box<dyn BrowserContext>>,
    pub page: Option<Box<dyn Page>>,
}

impl RunResources {
    pub fn new() -> Self {
        Self::default()
    }
}
