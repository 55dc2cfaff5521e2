//! Background build with status polling
//!
//! Runs the blocking engine build on a tokio blocking task so callers can
//! keep serving status requests while the catalog is embedded.

use super::MappingEngine;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// Snapshot of the build for pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStatus {
    pub state: BuildState,
    /// Fraction of catalog entries embedded, 0.0..=1.0
    pub progress: f32,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl BuildStatus {
    fn new(state: BuildState, progress: f32, message: impl Into<String>) -> Self {
        Self {
            state,
            progress,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Handle given to the build closure for progress updates
#[derive(Clone)]
pub struct ProgressReporter {
    status: Arc<RwLock<BuildStatus>>,
}

impl ProgressReporter {
    pub fn report(&self, done: usize, total: usize) {
        let progress = if total == 0 {
            1.0
        } else {
            done as f32 / total as f32
        };
        *self.status.write() = BuildStatus::new(
            BuildState::InProgress,
            progress,
            format!("Embedded {}/{} catalog entries", done, total),
        );
    }
}

pub struct BuildLifecycle {
    status: Arc<RwLock<BuildStatus>>,
    engine: Arc<RwLock<Option<Arc<MappingEngine>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for BuildLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildLifecycle {
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(BuildStatus::new(
                BuildState::NotStarted,
                0.0,
                "Build not started",
            ))),
            engine: Arc::new(RwLock::new(None)),
            handle: Mutex::new(None),
        }
    }

    /// Spawn `build` on a blocking task
    ///
    /// Returns `false` without spawning when a build is already in progress
    /// or has completed. A failed build may be started again. Must be called
    /// from within a tokio runtime.
    pub fn start<F>(&self, build: F) -> bool
    where
        F: FnOnce(ProgressReporter) -> Result<MappingEngine> + Send + 'static,
    {
        {
            let mut status = self.status.write();
            if matches!(status.state, BuildState::InProgress | BuildState::Completed) {
                info!("Build already {:?}, not starting another", status.state);
                return false;
            }
            *status = BuildStatus::new(BuildState::InProgress, 0.0, "Build started");
        }

        let reporter = ProgressReporter {
            status: Arc::clone(&self.status),
        };
        let status = Arc::clone(&self.status);
        let slot = Arc::clone(&self.engine);

        let handle = tokio::task::spawn_blocking(move || match build(reporter) {
            Ok(engine) => {
                let size = engine.catalog().size();
                *slot.write() = Some(Arc::new(engine));
                *status.write() = BuildStatus::new(
                    BuildState::Completed,
                    1.0,
                    format!("Ready: {} codes indexed", size),
                );
                info!("Build completed: {} codes indexed", size);
            }
            Err(e) => {
                error!("Build failed: {}", e);
                let progress = status.read().progress;
                *status.write() =
                    BuildStatus::new(BuildState::Failed, progress, format!("Build failed: {}", e));
            }
        });

        *self.handle.lock() = Some(handle);
        true
    }

    /// Start the standard build: load the configured catalog and embed it
    pub fn start_from_config(
        &self,
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        rebuild: bool,
    ) -> bool {
        self.start(move |reporter| {
            MappingEngine::initialize(&config, provider, rebuild, |done, total| {
                reporter.report(done, total)
            })
        })
    }

    pub fn poll(&self) -> BuildStatus {
        self.status.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.read().state == BuildState::Completed
    }

    /// The built engine, once the build has completed
    pub fn engine(&self) -> Option<Arc<MappingEngine>> {
        self.engine.read().clone()
    }

    /// Wait for the running build, if any, and return the final status
    pub async fn wait(&self) -> BuildStatus {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Build task aborted: {}", e);
                *self.status.write() =
                    BuildStatus::new(BuildState::Failed, 0.0, format!("Build task aborted: {}", e));
            }
        }
        self.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use crate::error::MapperError;
    use crate::resolver::tests::{sample_catalog, sample_vectors, StubProvider};

    fn build_engine(reporter: ProgressReporter) -> Result<MappingEngine> {
        reporter.report(2, 4);
        reporter.report(4, 4);
        MappingEngine::from_parts(
            sample_catalog(),
            Arc::new(StubProvider::new(4)),
            &sample_vectors(),
            EngineOptions::default(),
        )
    }

    #[test]
    fn test_initial_status() {
        let lifecycle = BuildLifecycle::new();
        let status = lifecycle.poll();
        assert_eq!(status.state, BuildState::NotStarted);
        assert_eq!(status.progress, 0.0);
        assert!(!lifecycle.is_ready());
        assert!(lifecycle.engine().is_none());
    }

    #[tokio::test]
    async fn test_build_completes() {
        let lifecycle = BuildLifecycle::new();
        assert!(lifecycle.start(build_engine));

        let status = lifecycle.wait().await;
        assert_eq!(status.state, BuildState::Completed);
        assert_eq!(status.progress, 1.0);
        assert!(status.message.contains("4 codes"));
        assert!(lifecycle.is_ready());

        let engine = lifecycle.engine().unwrap();
        assert_eq!(engine.catalog().size(), 4);

        // Completed builds are not restarted
        assert!(!lifecycle.start(build_engine));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_in_progress() {
        let lifecycle = BuildLifecycle::new();
        let (release, gate) = std::sync::mpsc::channel::<()>();

        assert!(lifecycle.start(move |reporter| {
            reporter.report(1, 4);
            let _ = gate.recv();
            build_engine(reporter)
        }));
        assert_eq!(lifecycle.poll().state, BuildState::InProgress);
        assert!(!lifecycle.start(build_engine));

        release.send(()).unwrap();
        assert_eq!(lifecycle.wait().await.state, BuildState::Completed);
    }

    #[tokio::test]
    async fn test_failed_build_can_restart() {
        let lifecycle = BuildLifecycle::new();
        assert!(lifecycle.start(|reporter| {
            reporter.report(1, 4);
            Err(MapperError::Build("catalog unreadable".to_string()))
        }));

        let status = lifecycle.wait().await;
        assert_eq!(status.state, BuildState::Failed);
        assert_eq!(status.progress, 0.25);
        assert!(status.message.contains("catalog unreadable"));
        assert!(lifecycle.engine().is_none());

        assert!(lifecycle.start(build_engine));
        assert_eq!(lifecycle.wait().await.state, BuildState::Completed);
    }

    #[test]
    fn test_progress_for_empty_catalog() {
        let reporter = ProgressReporter {
            status: Arc::new(RwLock::new(BuildStatus::new(
                BuildState::InProgress,
                0.0,
                "",
            ))),
        };
        reporter.report(0, 0);
        assert_eq!(reporter.status.read().progress, 1.0);
    }
}
