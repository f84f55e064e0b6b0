//! In-memory stand-ins for the browser engine and readiness probe.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use webapp_e2e::browser::{
    BrowserContext, BrowserEngine, BrowserInstance, ContextOptions, NavigationResponse, Page,
    WaitUntil,
};
use webapp_e2e::{E2eError, E2eResult, Probe};

/// Live resource counts and call log shared by everything a [`FakeEngine`] creates.
#[derive(Default)]
pub struct Tracker {
    pub browsers: AtomicUsize,
    pub contexts: AtomicUsize,
    pub pages: AtomicUsize,
    pub launches: AtomicUsize,
    pub ignored_https_errors: AtomicBool,
    /// Extra pages reported by `open_pages` that no close can release
    pub leaked_pages: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl Tracker {
    pub fn open_browsers(&self) -> usize {
        self.browsers.load(Ordering::SeqCst)
    }

    pub fn open_contexts(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn open_pages(&self) -> usize {
        self.pages.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

/// How the fake page answers a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Main document answered with this status
    Respond(u16),
    /// Navigation produced no response object
    NoResponse,
    /// Navigation itself failed
    Fail,
}

pub struct FakeEngine {
    pub tracker: Arc<Tracker>,
    pub navigation: Navigation,
    pub prepared: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_navigation(Navigation::Respond(200))
    }

    pub fn with_navigation(navigation: Navigation) -> Self {
        Self {
            tracker: Arc::new(Tracker::default()),
            navigation,
            prepared: true,
        }
    }
}

#[async_trait]
impl BrowserEngine for FakeEngine {
    async fn prepare(&self) -> E2eResult<()> {
        if self.prepared {
            Ok(())
        } else {
            Err(E2eError::BrowserNotFound("fake".to_string()))
        }
    }

    async fn launch(&self) -> E2eResult<Box<dyn BrowserInstance>> {
        self.tracker.launches.fetch_add(1, Ordering::SeqCst);
        self.tracker.browsers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            tracker: Arc::clone(&self.tracker),
            navigation: self.navigation,
        }))
    }
}

struct FakeBrowser {
    tracker: Arc<Tracker>,
    navigation: Navigation,
}

#[async_trait]
impl BrowserInstance for FakeBrowser {
    async fn new_context(&mut self, options: &ContextOptions) -> E2eResult<Box<dyn BrowserContext>> {
        self.tracker
            .ignored_https_errors
            .store(options.ignore_https_errors, Ordering::SeqCst);
        self.tracker.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            tracker: Arc::clone(&self.tracker),
            navigation: self.navigation,
        }))
    }

    async fn open_pages(&self) -> E2eResult<usize> {
        self.tracker.record("browser.open_pages");
        Ok(self.tracker.open_pages() + self.tracker.leaked_pages.load(Ordering::SeqCst))
    }

    async fn close(self: Box<Self>) -> E2eResult<()> {
        self.tracker.record("browser.close");
        self.tracker.browsers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeContext {
    tracker: Arc<Tracker>,
    navigation: Navigation,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&mut self) -> E2eResult<Arc<dyn Page>> {
        self.tracker.pages.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePage {
            tracker: Arc::clone(&self.tracker),
            navigation: self.navigation,
            counter: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(self: Box<Self>) -> E2eResult<()> {
        self.tracker.record("context.close");
        self.tracker.contexts.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mimics the example app's index page: a heading and a counter.
struct FakePage {
    tracker: Arc<Tracker>,
    navigation: Navigation,
    counter: AtomicI64,
    closed: AtomicBool,
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, wait_until: WaitUntil) -> E2eResult<Option<NavigationResponse>> {
        self.tracker.record(format!("goto {} {:?}", url, wait_until));
        match self.navigation {
            Navigation::Respond(status) => Ok(Some(NavigationResponse {
                url: url.to_string(),
                status,
            })),
            Navigation::NoResponse => Ok(None),
            Navigation::Fail => Err(E2eError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            }),
        }
    }

    async fn add_init_script(&self, script: &str) -> E2eResult<()> {
        self.tracker.record(format!("init {}", script));
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> E2eResult<Value> {
        self.tracker.record(format!("evaluate {}", expression));
        Ok(Value::Bool(true))
    }

    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>> {
        Ok(match selector {
            "h1" => Some("Example Blazor WASM Application".to_string()),
            "#counter-value" => Some(self.counter.load(Ordering::SeqCst).to_string()),
            _ => None,
        })
    }

    async fn click(&self, selector: &str) -> E2eResult<()> {
        match selector {
            "#increment" => self.counter.fetch_add(1, Ordering::SeqCst),
            "#decrement" => self.counter.fetch_sub(1, Ordering::SeqCst),
            other => return Err(E2eError::Browser(format!("no element matches {}", other))),
        };
        Ok(())
    }

    async fn close(&self) -> E2eResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.tracker.record("page.close");
            self.tracker.pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Probe with a fixed answer.
pub struct FixedProbe(pub bool);

#[async_trait]
impl Probe for FixedProbe {
    async fn check(&self) -> E2eResult<bool> {
        Ok(self.0)
    }

    fn target(&self) -> &str {
        "fixed"
    }
}

/// Whether a process with this pid still exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
