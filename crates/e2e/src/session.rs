//! Per-navigation browser sessions
//!
//! Each [`BrowserSession::navigate_and_run`] call launches its own browser,
//! opens an isolated context and a page, and releases all three before it
//! returns, whatever the callback did.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::browser::{BrowserContext, BrowserEngine, BrowserInstance, ContextOptions, Page};
use crate::config::BrowserSettings;
use crate::error::{E2eError, E2eResult};

/// Navigates to app pages and runs assertions against them.
#[derive(Clone)]
pub struct BrowserSession {
    engine: Option<Arc<dyn BrowserEngine>>,
    base_url: Url,
    settings: BrowserSettings,
}

impl BrowserSession {
    /// `engine` is `None` until the owning fixture has been initialized.
    pub fn new(
        engine: Option<Arc<dyn BrowserEngine>>,
        base_url: Url,
        settings: BrowserSettings,
    ) -> Self {
        Self {
            engine,
            base_url,
            settings,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path like `/` or `counter?x=1` against the base URL.
    pub fn resolve(&self, relative_path: &str) -> E2eResult<Url> {
        Ok(self.base_url.join(relative_path)?)
    }

    /// Open `relative_path` in a fresh browser and, once the app has raised
    /// its page-loaded signal, run `callback` against the page.
    ///
    /// The callback is skipped when the navigation yields no response.
    /// Callback errors and panics reach the caller only after the page,
    /// context and browser are closed.
    pub async fn navigate_and_run<F, Fut>(&self, relative_path: &str, callback: F) -> E2eResult<()>
    where
        F: FnOnce(Arc<dyn Page>) -> Fut + Send,
        Fut: Future<Output = E2eResult<()>> + Send,
    {
        let engine = self.engine.clone().ok_or_else(|| {
            E2eError::Precondition(
                "browser engine not initialized; call LifecycleFixture::initialize first"
                    .to_string(),
            )
        })?;
        let url = self.resolve(relative_path)?;

        let mut scope = SessionScope::default();
        let outcome = AssertUnwindSafe(self.visit(engine.as_ref(), &mut scope, &url, callback))
            .catch_unwind()
            .await;
        scope.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn visit<F, Fut>(
        &self,
        engine: &dyn BrowserEngine,
        scope: &mut SessionScope,
        url: &Url,
        callback: F,
    ) -> E2eResult<()>
    where
        F: FnOnce(Arc<dyn Page>) -> Fut + Send,
        Fut: Future<Output = E2eResult<()>> + Send,
    {
        let browser = scope.browser.insert(engine.launch().await?);
        scope.baseline_pages = browser.open_pages().await.unwrap_or(0);
        let options = ContextOptions {
            ignore_https_errors: self.settings.ignore_https_errors,
        };
        let context = scope.context.insert(browser.new_context(&options).await?);
        let page = Arc::clone(scope.page.insert(context.new_page().await?));

        page.add_init_script(&loaded_listener_script(&self.settings.loaded_event)?)
            .await?;

        let Some(response) = page.goto(url.as_str(), self.settings.wait_until).await? else {
            debug!("No response navigating to {}; skipping callback", url);
            return Ok(());
        };
        if response.ok() {
            debug!("{} answered {}", response.url, response.status);
        } else {
            warn!("{} answered {}", response.url, response.status);
        }

        timeout(self.settings.loaded_timeout, page.evaluate(LOADED_AWAIT_SCRIPT))
            .await
            .map_err(|_| {
                E2eError::Timeout(format!("'{}' on {}", self.settings.loaded_event, url))
            })??;

        callback(page).await
    }
}

/// Resolves once the listener installed by [`loaded_listener_script`] fired.
const LOADED_AWAIT_SCRIPT: &str = "window.__e2ePageLoaded";

/// Init script that starts listening for `event` before any page script runs,
/// so an early signal is not missed.
fn loaded_listener_script(event: &str) -> E2eResult<String> {
    let event = serde_json::to_string(event)?;
    Ok(format!(
        "window.__e2ePageLoaded = new Promise(resolve => window.addEventListener({event}, () => resolve(true), {{ once: true }}));"
    ))
}

/// Browser resources acquired by one navigation, released in reverse order.
#[derive(Default)]
struct SessionScope {
    browser: Option<Box<dyn BrowserInstance>>,
    context: Option<Box<dyn BrowserContext>>,
    page: Option<Arc<dyn Page>>,
    /// Pages the browser had open before this session opened its own
    baseline_pages: usize,
}

impl SessionScope {
    async fn release(&mut self) {
        self.take().release().await;
    }

    fn take(&mut self) -> Acquired {
        Acquired {
            page: self.page.take(),
            context: self.context.take(),
            browser: self.browser.take(),
            baseline_pages: self.baseline_pages,
        }
    }
}

impl Drop for SessionScope {
    // Only reached with resources left if the navigation future was dropped
    fn drop(&mut self) {
        if self.page.is_none() && self.context.is_none() && self.browser.is_none() {
            return;
        }
        let acquired = self.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(acquired.release());
            }
            Err(_) => warn!("Browser session dropped outside a runtime; resources leaked"),
        }
    }
}

struct Acquired {
    page: Option<Arc<dyn Page>>,
    context: Option<Box<dyn BrowserContext>>,
    browser: Option<Box<dyn BrowserInstance>>,
    baseline_pages: usize,
}

impl Acquired {
    async fn release(self) {
        if let Some(page) = self.page {
            if let Err(e) = page.close().await {
                warn!("Failed to close page: {}", e);
            }
        }
        if let Some(context) = self.context {
            if let Err(e) = context.close().await {
                warn!("Failed to close browser context: {}", e);
            }
        }
        if let Some(browser) = self.browser {
            match browser.open_pages().await {
                Ok(open) if open > self.baseline_pages => warn!(
                    "{} page(s) still open after releasing the session",
                    open - self.baseline_pages
                ),
                Ok(_) => {}
                Err(e) => debug!("Could not count open pages: {}", e),
            }
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {}", e);
            }
        }
    }
}
