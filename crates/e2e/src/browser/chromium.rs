//! Chromium over the DevTools protocol

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLifecycleEvent,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{
    text_content_script, BrowserContext, BrowserEngine, BrowserInstance, ContextOptions,
    NavigationResponse, Page, WaitUntil,
};
use crate::config::BrowserSettings;
use crate::error::{E2eError, E2eResult};

/// Launches headless Chromium instances, one fresh profile per launch.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    settings: BrowserSettings,
}

impl ChromiumEngine {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn config(&self, profile_dir: Option<&std::path::Path>) -> E2eResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder().request_timeout(self.settings.navigation_timeout);

        if !self.settings.headless {
            builder = builder.with_head();
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &self.settings.executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(dir) = profile_dir {
            builder = builder.user_data_dir(dir);
        }

        builder.build().map_err(E2eError::BrowserNotFound)
    }
}

#[async_trait]
impl BrowserEngine for ChromiumEngine {
    async fn prepare(&self) -> E2eResult<()> {
        if let Some(path) = &self.settings.executable {
            if !path.exists() {
                return Err(E2eError::BrowserNotFound(path.display().to_string()));
            }
        }
        // Building the config runs executable detection
        self.config(None)?;
        Ok(())
    }

    async fn launch(&self) -> E2eResult<Box<dyn BrowserInstance>> {
        let profile = tempfile::Builder::new().prefix("webapp-e2e-chrome").tempdir()?;
        let config = self.config(Some(profile.path()))?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        debug!("Launched Chromium with profile {}", profile.path().display());

        Ok(Box::new(ChromiumInstance {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            profile,
            navigation_timeout: self.settings.navigation_timeout,
        }))
    }
}

struct ChromiumInstance {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<()>,
    profile: tempfile::TempDir,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserInstance for ChromiumInstance {
    async fn new_context(&mut self, options: &ContextOptions) -> E2eResult<Box<dyn BrowserContext>> {
        let id = self
            .browser
            .lock()
            .await
            .create_browser_context(CreateBrowserContextParams::default())
            .await?;

        Ok(Box::new(ChromiumContext {
            browser: Arc::clone(&self.browser),
            id,
            ignore_https_errors: options.ignore_https_errors,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn open_pages(&self) -> E2eResult<usize> {
        Ok(self.browser.lock().await.pages().await?.len())
    }

    async fn close(self: Box<Self>) -> E2eResult<()> {
        let ChromiumInstance {
            browser,
            handler,
            profile,
            navigation_timeout,
        } = *self;
        let mut browser = browser.lock().await;

        let result = browser.close().await.map(|_| ()).map_err(E2eError::from);
        if result.is_err() {
            let _ = browser.kill().await;
        }
        reap(&mut *browser, navigation_timeout).await;

        handler.abort();
        if let Err(e) = profile.close() {
            debug!("Failed to remove Chromium profile: {}", e);
        }
        result
    }
}

/// The browser process, as far as shutting it down goes.
#[async_trait]
trait BrowserProcess: Send {
    async fn wait_exit(&mut self) -> std::io::Result<()>;

    async fn kill_now(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl BrowserProcess for Browser {
    async fn wait_exit(&mut self) -> std::io::Result<()> {
        self.wait().await.map(|_| ())
    }

    async fn kill_now(&mut self) -> std::io::Result<()> {
        self.kill().await.unwrap_or(Ok(()))
    }
}

/// Wait up to `limit` for the browser to exit, then kill it.
///
/// Returns whether the process exited on its own.
async fn reap(process: &mut dyn BrowserProcess, limit: Duration) -> bool {
    match timeout(limit, process.wait_exit()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Failed to reap Chromium: {}", e);
            false
        }
        Err(_) => {
            warn!("Chromium did not exit within {:?}; killing it", limit);
            if let Err(e) = process.kill_now().await {
                warn!("Failed to kill Chromium: {}", e);
            }
            false
        }
    }
}

struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    id: BrowserContextId,
    ignore_https_errors: bool,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn new_page(&mut self) -> E2eResult<Arc<dyn Page>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.id.clone())
            .build()
            .map_err(E2eError::Browser)?;
        let page = self.browser.lock().await.new_page(params).await?;

        if self.ignore_https_errors {
            page.execute(SetIgnoreCertificateErrorsParams::new(true)).await?;
        }

        Ok(Arc::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(self: Box<Self>) -> E2eResult<()> {
        self.browser
            .lock()
            .await
            .dispose_browser_context(self.id.clone())
            .await?;
        Ok(())
    }
}

struct ChromiumPage {
    page: chromiumoxide::Page,
    navigation_timeout: Duration,
}

impl ChromiumPage {
    async fn evaluate_value(&self, expression: &str) -> E2eResult<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(E2eError::Browser)?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn goto(&self, url: &str, wait_until: WaitUntil) -> E2eResult<Option<NavigationResponse>> {
        let mut lifecycle = self.page.event_listener::<EventLifecycleEvent>().await?;

        self.page.goto(url).await.map_err(|e| E2eError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if wait_until == WaitUntil::NetworkIdle {
            // `init` marks the new document; idle events before it belong to about:blank
            let idle = async {
                let mut committed = false;
                while let Some(event) = lifecycle.next().await {
                    match event.name.as_str() {
                        "init" => committed = true,
                        "networkIdle" if committed => return true,
                        _ => {}
                    }
                }
                false
            };

            match timeout(self.navigation_timeout, idle).await {
                Ok(true) => debug!("Network idle on {}", url),
                Ok(false) => {
                    return Err(E2eError::Navigation {
                        url: url.to_string(),
                        reason: "page closed before network idle".to_string(),
                    })
                }
                Err(_) => return Err(E2eError::Timeout(format!("network idle on {}", url))),
            }
        }

        let request = self.page.wait_for_navigation_response().await?;
        let response = request.and_then(|request| {
            request.response.as_ref().map(|resp| NavigationResponse {
                url: resp.url.clone(),
                status: u16::try_from(resp.status).unwrap_or(0),
            })
        });

        if let Some(resp) = &response {
            info!("Navigated to {} ({})", resp.url, resp.status);
        }
        Ok(response)
    }

    async fn add_init_script(&self, script: &str) -> E2eResult<()> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        self.evaluate_value(expression).await
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        match self.evaluate_value(&text_content_script(selector)?).await? {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        self.page.clone().close().await?;
        Ok(())
    }
}
