//! Example web app E2E harness
//!
//! This crate provides the lifecycle fixture behind the browser tests:
//! - Spawns the app under test as a subprocess
//! - Polls it over HTTP until it answers
//! - Drives headless Chromium against it, one isolated session per navigation
//! - Stops the app gracefully, then forcibly, when the run ends
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Collection (one per test group)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LifecycleFixture                                           │
//! │    ├── initialize()                                         │
//! │    │     ├── ProcessLauncher::start(LaunchSpec)             │
//! │    │     └── readiness::poll(probe, attempts, interval)     │
//! │    ├── session() -> BrowserSession                          │
//! │    │     └── navigate_and_run(path, |page| async { .. })    │
//! │    │           launch → context → page → goto → loaded     │
//! │    │           → callback → close page/context/browser     │
//! │    └── teardown()                                           │
//! │          └── ProcessLauncher::stop (SIGTERM, grace, KILL)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod collection;
pub mod config;
pub mod error;
pub mod fixture;
pub mod process;
pub mod readiness;
pub mod session;

pub use browser::{BrowserEngine, ChromiumEngine, Page};
pub use collection::{Collection, TestResult, TestSuiteResult};
pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use fixture::{FixtureState, LifecycleFixture};
pub use process::{AppProcess, LaunchSpec, ProcessLauncher};
pub use readiness::{poll, wait_until_ready, HttpProbe, Probe, ReadinessResult};
pub use session::BrowserSession;
