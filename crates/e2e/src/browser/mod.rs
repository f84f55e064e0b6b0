//! Browser engine abstraction
//!
//! The session code only talks to these traits. [`ChromiumEngine`] drives a
//! real Chromium over the DevTools protocol; tests substitute their own
//! engine to observe what the session opens and closes.

mod chromium;

pub use chromium::ChromiumEngine;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::E2eResult;

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitUntil {
    /// The `load` event fired.
    Load,
    /// No network activity for a short quiescence window.
    #[default]
    NetworkIdle,
}

/// Options for a fresh browsing context.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub ignore_https_errors: bool,
}

/// Main-document response of a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResponse {
    pub url: String,
    pub status: u16,
}

impl NavigationResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can launch browser instances.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Make sure browsers can be launched at all (executable present, etc.).
    async fn prepare(&self) -> E2eResult<()>;

    async fn launch(&self) -> E2eResult<Box<dyn BrowserInstance>>;
}

/// A launched browser process.
#[async_trait]
pub trait BrowserInstance: Send + Sync {
    async fn new_context(&mut self, options: &ContextOptions) -> E2eResult<Box<dyn BrowserContext>>;

    /// Number of pages currently open across all contexts. Used as a leak
    /// check when a session is released.
    async fn open_pages(&self) -> E2eResult<usize>;

    async fn close(self: Box<Self>) -> E2eResult<()>;
}

/// An isolated browsing context (own cookies, cache and storage).
#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&mut self) -> E2eResult<Arc<dyn Page>>;

    async fn close(self: Box<Self>) -> E2eResult<()>;
}

/// A single tab.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait per `wait_until`. `None` when the navigation produced
    /// no main-document response (e.g. same-document navigation).
    async fn goto(&self, url: &str, wait_until: WaitUntil) -> E2eResult<Option<NavigationResponse>>;

    /// Register a script that runs in every new document before page scripts.
    async fn add_init_script(&self, script: &str) -> E2eResult<()>;

    /// Evaluate an expression, awaiting it if it is a promise.
    async fn evaluate(&self, expression: &str) -> E2eResult<Value>;

    /// `textContent` of the first element matching `selector`, or `None` if
    /// nothing matches.
    async fn text_content(&self, selector: &str) -> E2eResult<Option<String>>;

    /// Click the first element matching `selector`.
    async fn click(&self, selector: &str) -> E2eResult<()>;

    async fn close(&self) -> E2eResult<()>;
}

/// JavaScript returning the `textContent` of the first match, or `null`.
pub(crate) fn text_content_script(selector: &str) -> E2eResult<String> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        "(() => {{ const el = document.querySelector({selector}); return el ? el.textContent : null; }})()"
    ))
}
