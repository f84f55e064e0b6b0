//! Collection-scoped lifecycle fixture
//!
//! One [`LifecycleFixture`] owns the app process for a whole group of test
//! cases. It is shared as an `Arc` and handed to each case explicitly.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use url::Url;

use crate::browser::{BrowserEngine, ChromiumEngine, Page};
use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::process::{AppProcess, ProcessLauncher};
use crate::readiness::{poll, HttpProbe, Probe};
use crate::session::BrowserSession;

/// Where a fixture is in its life.
///
/// `NotStarted -> Starting -> Running -> Stopping -> Stopped`; a failed start
/// goes straight from `Starting` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FixtureState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct Inner {
    state: FixtureState,
    process: Option<AppProcess>,
    engine_ready: bool,
}

/// Starts the app once, serves browser sessions against it, stops it once.
pub struct LifecycleFixture {
    config: HarnessConfig,
    base_url: Url,
    launcher: ProcessLauncher,
    probe: Arc<dyn Probe>,
    engine: Arc<dyn BrowserEngine>,
    inner: Mutex<Inner>,
}

impl LifecycleFixture {
    /// Fixture probing `config.base_url` over HTTP and driving Chromium.
    pub fn new(config: HarnessConfig) -> E2eResult<Self> {
        let probe = HttpProbe::new(config.base_url.clone(), config.readiness.request_timeout)?;
        let engine = ChromiumEngine::new(config.browser.clone());
        Self::with_parts(config, Arc::new(probe), Arc::new(engine))
    }

    /// Fixture with an injected readiness probe and browser engine.
    pub fn with_parts(
        config: HarnessConfig,
        probe: Arc<dyn Probe>,
        engine: Arc<dyn BrowserEngine>,
    ) -> E2eResult<Self> {
        let base_url = Url::parse(&config.base_url)?;
        Ok(Self {
            launcher: ProcessLauncher::new(config.shutdown_grace),
            config,
            base_url,
            probe,
            engine,
            inner: Mutex::new(Inner {
                state: FixtureState::NotStarted,
                process: None,
                engine_ready: false,
            }),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn state(&self) -> FixtureState {
        self.inner.lock().await.state
    }

    /// Pid of the app process while one is held.
    pub async fn process_id(&self) -> Option<u32> {
        self.inner.lock().await.process.as_ref().and_then(AppProcess::id)
    }

    /// Start the app and wait until it answers.
    ///
    /// A no-op once the fixture is `Running` or beyond. On a failed start the
    /// process is killed and the fixture ends up `Stopped`.
    pub async fn initialize(&self) -> E2eResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state >= FixtureState::Running {
            return Ok(());
        }

        info!("Initializing fixture for {}", self.base_url);
        inner.state = FixtureState::Starting;

        if let Err(e) = self.engine.prepare().await {
            error!("Browser engine unavailable: {}", e);
            inner.state = FixtureState::Stopped;
            return Err(e);
        }

        let process = match self.launcher.start(&self.config.launch) {
            Ok(process) => process,
            Err(e) => {
                error!("{}", e);
                inner.state = FixtureState::Stopped;
                return Err(e);
            }
        };
        inner.process = Some(process);

        let readiness = &self.config.readiness;
        let result = poll(self.probe.as_ref(), readiness.max_attempts, readiness.interval).await;
        if !result.ready {
            error!("App did not become ready; stopping it");
            self.launcher.stop(inner.process.take()).await;
            inner.state = FixtureState::Stopped;
            return Err(E2eError::StartupTimeout {
                url: self.config.base_url.clone(),
                attempts: result.attempts,
            });
        }

        inner.engine_ready = true;
        inner.state = FixtureState::Running;
        info!("App running at {}", self.base_url);
        Ok(())
    }

    /// Release the browser engine and stop the app. Never fails; a no-op
    /// before `initialize` and after a previous teardown.
    pub async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            FixtureState::NotStarted | FixtureState::Stopped => return,
            _ => {}
        }

        info!("Tearing down fixture for {}", self.base_url);
        inner.state = FixtureState::Stopping;
        inner.engine_ready = false;
        self.launcher.stop(inner.process.take()).await;
        inner.state = FixtureState::Stopped;
    }

    /// Browser session bound to this fixture's base URL.
    ///
    /// Sessions taken before `initialize` (or after `teardown`) refuse to
    /// navigate.
    pub async fn session(&self) -> BrowserSession {
        let engine = self
            .inner
            .lock()
            .await
            .engine_ready
            .then(|| Arc::clone(&self.engine));
        BrowserSession::new(engine, self.base_url.clone(), self.config.browser.clone())
    }

    /// Shorthand for `self.session().await.navigate_and_run(..)`.
    pub async fn navigate_and_run<F, Fut>(&self, relative_path: &str, callback: F) -> E2eResult<()>
    where
        F: FnOnce(Arc<dyn Page>) -> Fut + Send,
        Fut: Future<Output = E2eResult<()>> + Send,
    {
        self.session().await.navigate_and_run(relative_path, callback).await
    }
}

impl Drop for LifecycleFixture {
    fn drop(&mut self) {
        if let Some(process) = self.inner.get_mut().process.as_ref() {
            warn!(
                "Fixture dropped without teardown; killing app (pid {:?})",
                process.id()
            );
        }
    }
}
