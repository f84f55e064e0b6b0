//! Harness configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::WaitUntil;
use crate::process::{LaunchSpec, DEFAULT_SHUTDOWN_GRACE};
use crate::readiness::{DEFAULT_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT};

/// URL the app under test is bound to and probed on.
pub const TEST_URL: &str = "http://localhost:5000";

/// Cargo package of the app under test.
pub const DEFAULT_PROJECT: &str = "example-app";

/// DOM event the app raises on `window` once its client runtime is up.
pub const PAGE_LOADED_EVENT: &str = "blazorPageLoaded";

/// Configuration for one fixture
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL; relative navigation paths resolve against it
    pub base_url: String,

    /// Cargo package behind `launch`; `None` for a custom launch spec
    pub project: Option<String>,

    /// How to start the app
    pub launch: LaunchSpec,

    pub readiness: ReadinessConfig,

    /// Time between the close request and the forced kill
    pub shutdown_grace: Duration,

    pub browser: BrowserSettings,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::for_project(DEFAULT_PROJECT, TEST_URL, workspace_root())
    }
}

impl HarnessConfig {
    /// Run `project` from `workspace_root` via `cargo run`, bound to `base_url`.
    pub fn for_project(project: &str, base_url: &str, workspace_root: impl AsRef<Path>) -> Self {
        Self {
            base_url: base_url.to_string(),
            project: Some(project.to_string()),
            launch: LaunchSpec::cargo_project(project, base_url, workspace_root),
            readiness: ReadinessConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            browser: BrowserSettings::default(),
        }
    }

    /// Defaults, overridden by `WEBAPP_E2E_*` environment variables.
    ///
    /// - `WEBAPP_E2E_URL`: base URL
    /// - `WEBAPP_E2E_PROJECT`: cargo package to run
    /// - `WEBAPP_E2E_WORKDIR`: workspace root to run it from
    /// - `WEBAPP_E2E_CHROME`: Chromium executable
    /// - `WEBAPP_E2E_NO_SANDBOX`: `1`/`true` disables the Chromium sandbox
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("WEBAPP_E2E_URL").unwrap_or_else(|| TEST_URL.to_string());
        let project = lookup("WEBAPP_E2E_PROJECT").unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        let workdir = lookup("WEBAPP_E2E_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(workspace_root);

        let mut config = Self::for_project(&project, &base_url, workdir);
        if let Some(chrome) = lookup("WEBAPP_E2E_CHROME") {
            config.browser.executable = Some(PathBuf::from(chrome));
        }
        if let Some(flag) = lookup("WEBAPP_E2E_NO_SANDBOX") {
            config.browser.no_sandbox = matches!(flag.trim(), "1" | "true" | "yes");
        }
        config
    }

    /// Switch the cargo package and/or base URL, keeping the working
    /// directory of the current launch spec. A no-op when both are `None`.
    pub fn override_app(&mut self, project: Option<&str>, base_url: Option<&str>) {
        if project.is_none() && base_url.is_none() {
            return;
        }

        let project = project
            .map(str::to_string)
            .or_else(|| self.project.clone())
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        if let Some(url) = base_url {
            self.base_url = url.to_string();
        }

        self.launch = LaunchSpec::cargo_project(&project, &self.base_url, &self.launch.working_dir);
        self.project = Some(project);
    }

    /// `cargo build` for the app package, run from the launch working
    /// directory. `None` when the app is not a cargo project.
    pub fn build_spec(&self) -> Option<LaunchSpec> {
        let project = self.project.as_deref()?;
        Some(
            LaunchSpec::new("cargo")
                .args(["build", "--quiet", "--package", project])
                .current_dir(&self.launch.working_dir),
        )
    }
}

/// Readiness polling settings
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Browser launch and navigation settings
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub headless: bool,

    /// Pass `--no-sandbox` (needed in most containers)
    pub no_sandbox: bool,

    /// Chromium executable; auto-detected when `None`
    pub executable: Option<PathBuf>,

    pub ignore_https_errors: bool,

    pub wait_until: WaitUntil,

    /// Upper bound for a navigation and for each DevTools request
    pub navigation_timeout: Duration,

    /// Event signalling that the client app finished initializing
    pub loaded_event: String,

    /// How long to wait for `loaded_event` after navigation settles
    pub loaded_timeout: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: false,
            executable: None,
            ignore_https_errors: true,
            wait_until: WaitUntil::NetworkIdle,
            navigation_timeout: Duration::from_secs(30),
            loaded_event: PAGE_LOADED_EVENT.to_string(),
            loaded_timeout: Duration::from_secs(30),
        }
    }
}

/// Root of this cargo workspace (two levels above this crate).
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
