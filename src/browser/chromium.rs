//! Chromium driver built on the Chrome DevTools Protocol.
//!
//! Each context is a CDP browser context, so cookies restored into one never
//! leak into another. Storage state is exported and restored as cookies.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{Browser, BrowserContext, BrowserLauncher, Page};
use crate::credentials::{StorageState, StoredCookie};

/// Launches a local Chrome/Chromium.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            executable: None,
        }
    }

    /// Use a specific browser binary instead of searching for one.
    pub fn with_executable(mut self, executable: Option<PathBuf>) -> Self {
        self.executable = executable;
        self
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        let chrome_path = match &self.executable {
            Some(path) => path.clone(),
            None => find_chrome()
                .context("Chrome/Chromium not found. Please install Chrome or Chromium.")?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        Ok(Box::new(ChromiumBrowser {
            inner: Arc::new(Mutex::new(browser)),
            handler_task: Some(handler_task),
        }))
    }
}

pub struct ChromiumBrowser {
    inner: Arc<Mutex<CdpBrowser>>,
    handler_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_context(&self, state: Option<&[u8]>) -> Result<Box<dyn BrowserContext>> {
        let cookies = match state {
            Some(bytes) => StorageState::from_bytes(bytes)?.cookies,
            None => Vec::new(),
        };

        let created = {
            let browser = self.inner.lock().await;
            browser
                .execute(CreateBrowserContextParams::default())
                .await
                .context("Failed to create browser context")?
        };

        Ok(Box::new(ChromiumContext {
            browser: self.inner.clone(),
            id: Some(created.result.browser_context_id.clone()),
            cookies,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let result = {
            let mut browser = self.inner.lock().await;
            browser.close().await
        };
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        result.context("Failed to close browser")?;
        Ok(())
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}

pub struct ChromiumContext {
    browser: Arc<Mutex<CdpBrowser>>,
    id: Option<BrowserContextId>,
    cookies: Vec<StoredCookie>,
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let id = self.id.clone().context("Browser context already closed")?;
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(id)
            .build()
            .map_err(|e| anyhow!("Failed to build target params: {e}"))?;

        let page = {
            let browser = self.browser.lock().await;
            browser.new_page(params).await.context("Failed to open page")?
        };

        let params = cookie_params(&self.cookies);
        if !params.is_empty() {
            page.set_cookies(params)
                .await
                .context("Failed to restore session cookies")?;
        }

        Ok(Box::new(ChromiumPage { page: Some(page) }))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            let browser = self.browser.lock().await;
            browser
                .execute(DisposeBrowserContextParams::new(id))
                .await
                .context("Failed to dispose browser context")?;
        }
        Ok(())
    }
}

fn cookie_params(cookies: &[StoredCookie]) -> Vec<CookieParam> {
    cookies
        .iter()
        .filter_map(|stored| {
            let Some(domain) = stored.domain.clone() else {
                tracing::debug!(cookie = %stored.name, "Skipping cookie without domain");
                return None;
            };
            let mut cookie = CookieParam::new(stored.name.clone(), stored.value.clone());
            cookie.domain = Some(domain);
            cookie.path = stored.path.clone();
            cookie.secure = Some(stored.secure);
            cookie.http_only = Some(stored.http_only);
            Some(cookie)
        })
        .collect()
}

pub struct ChromiumPage {
    page: Option<chromiumoxide::Page>,
}

impl ChromiumPage {
    fn page(&self) -> Result<&chromiumoxide::Page> {
        self.page.as_ref().context("Page already closed")
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.page()?.goto(url).await?;
        Ok(())
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.page()?.url().await?)
    }

    async fn type_sequentially(&self, selector: &str, text: &str) -> Result<()> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .with_context(|| format!("Element not found: {selector}"))?;
        element.click().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page()?
            .find_element(selector)
            .await
            .with_context(|| format!("Element not found: {selector}"))?
            .click()
            .await?;
        Ok(())
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>> {
        let element = match self.page()?.find_element(selector).await {
            Ok(element) => element,
            Err(e) => {
                tracing::trace!(selector, error = %e, "Element not present yet");
                return Ok(None);
            }
        };
        Ok(element.inner_text().await?)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page()?
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .with_context(|| format!("Failed to save screenshot: {}", path.display()))?;
        Ok(())
    }

    async fn storage_state(&self) -> Result<Vec<u8>> {
        let cookies = self.page()?.get_cookies().await?;
        let state = StorageState {
            cookies: cookies
                .into_iter()
                .map(|c| StoredCookie {
                    name: c.name,
                    value: c.value,
                    domain: Some(c.domain),
                    path: Some(c.path),
                    secure: c.secure,
                    http_only: c.http_only,
                })
                .collect(),
        };
        state.to_bytes()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            page.close().await.context("Failed to close page")?;
        }
        Ok(())
    }
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<PathBuf> {
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_params_skip_cookies_without_domain() {
        let cookies = vec![
            StoredCookie {
                name: "SESSION".to_string(),
                value: "abc".to_string(),
                domain: Some(".pge.example".to_string()),
                path: Some("/".to_string()),
                secure: true,
                http_only: true,
            },
            StoredCookie {
                name: "orphan".to_string(),
                value: "x".to_string(),
                domain: None,
                path: None,
                secure: false,
                http_only: false,
            },
        ];

        let params = cookie_params(&cookies);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "SESSION");
        assert_eq!(params[0].domain.as_deref(), Some(".pge.example"));
        assert_eq!(params[0].http_only, Some(true));
    }
}
