//! Test collections - a group of cases sharing one fixture

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::error::E2eResult;
use crate::fixture::LifecycleFixture;

type CaseFn = Box<dyn FnOnce(Arc<LifecycleFixture>) -> BoxFuture<'static, E2eResult<()>> + Send>;

/// Result of running a single case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a whole collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub collection: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    /// Set when the fixture could not be initialized
    pub setup_error: Option<String>,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.setup_error.is_none() && self.failed == 0
    }

    /// Write the results as `test-results.json` under `output_dir`.
    pub fn write_results(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Ordered test cases run against one shared [`LifecycleFixture`].
pub struct Collection {
    name: String,
    cases: Vec<(String, CaseFn)>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    /// Add a case. It receives the shared fixture, already initialized.
    pub fn case<F, Fut>(mut self, name: impl Into<String>, case: F) -> Self
    where
        F: FnOnce(Arc<LifecycleFixture>) -> Fut + Send + 'static,
        Fut: Future<Output = E2eResult<()>> + Send + 'static,
    {
        let case: CaseFn = Box::new(move |fixture| case(fixture).boxed());
        self.cases.push((name.into(), case));
        self
    }

    /// Initialize the fixture, run every case in order, tear the fixture down.
    ///
    /// A failing or panicking case is recorded and the run moves on. If
    /// initialization fails, every case is reported failed with that error.
    pub async fn run(self, fixture: Arc<LifecycleFixture>) -> TestSuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let total = self.cases.len();
        let mut results = Vec::with_capacity(total);

        info!("Running collection '{}' ({} case(s))...", self.name, total);

        let setup_error = match fixture.initialize().await {
            Ok(()) => None,
            Err(e) => {
                error!("Fixture setup failed: {}", e);
                Some(e.to_string())
            }
        };

        for (name, case) in self.cases {
            if let Some(setup) = &setup_error {
                results.push(TestResult {
                    name,
                    success: false,
                    duration_ms: 0,
                    error: Some(format!("fixture setup failed: {}", setup)),
                });
                continue;
            }

            let case_start = Instant::now();
            let outcome = AssertUnwindSafe(case(Arc::clone(&fixture)))
                .catch_unwind()
                .await;
            let duration_ms = case_start.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
            };

            match &error {
                None => info!("✓ {} ({} ms)", name, duration_ms),
                Some(e) => error!("✗ {} - {}", name, e),
            }

            results.push(TestResult {
                name,
                success: error.is_none(),
                duration_ms,
                error,
            });
        }

        fixture.teardown().await;

        let passed = results.iter().filter(|r| r.success).count();
        let failed = total - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        TestSuiteResult {
            collection: self.name,
            started_at,
            total,
            passed,
            failed,
            duration_ms,
            setup_error,
            results,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let static_payload: Box<dyn Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("assertion `left == right` failed"));
        let other_payload: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(&*static_payload), "boom");
        assert_eq!(
            panic_message(&*owned_payload),
            "assertion `left == right` failed"
        );
        assert_eq!(panic_message(&*other_payload), "non-string panic payload");
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let suite = TestSuiteResult {
            collection: "index".to_string(),
            started_at: Utc::now(),
            total: 1,
            passed: 1,
            failed: 0,
            duration_ms: 12,
            setup_error: None,
            results: vec![TestResult {
                name: "heading".to_string(),
                success: true,
                duration_ms: 12,
                error: None,
            }],
        };

        let path = suite.write_results(&dir.path().join("out")).unwrap();
        let written: TestSuiteResult =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert!(written.success());
        assert_eq!(written.collection, "index");
        assert_eq!(written.results[0].name, "heading");
    }
}
