//! Component lifecycle management
//!
//! This module brings the orchestrator up in a fixed order and owns the
//! background tasks that run beside it, stopping them in reverse order.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};

use super::orchestrator::Orchestrator;
use crate::{
    config::{self, Config},
    core::OrchestratorResult,
    health::SystemStatus,
    logging::FileLogger,
    metrics::MetricsReporter,
};

/// Starts and stops the orchestrator and its background tasks
pub struct ComponentLifecycle {
    orchestrator: Arc<Orchestrator>,
    health_interval: Option<Duration>,
    report_interval: Option<Duration>,
    log: Option<config::Log>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    // stopped after every other task so their last lines reach the file
    log_shutdown: watch::Sender<bool>,
    log_task: Mutex<Option<JoinHandle<()>>>,
}

impl ComponentLifecycle {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (log_shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            health_interval: config.health.interval(),
            report_interval: config.metrics.report_interval(),
            log: config.log.clone(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            log_shutdown,
            log_task: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Initialize all components in the correct order
    pub async fn initialize(&self) -> OrchestratorResult<()> {
        // Phase 0: file logging, so startup lines land in the file
        self.initialize_logging().await?;

        info!("Starting component initialization...");

        // Phase 1: dependencies
        self.initialize_dependencies().await;

        // Phase 2: first health snapshot, then accept work
        let report = self.orchestrator.health().check_health().await;
        if report.status != SystemStatus::Healthy {
            warn!(
                "Starting with system health {:?} (score {:.1})",
                report.status, report.score
            );
        }
        self.orchestrator.readiness().mark_ready();

        // Phase 3: background tasks
        self.spawn_background_tasks().await;

        info!("Component initialization completed successfully");
        Ok(())
    }

    /// Shutdown all components in reverse order
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        info!("Starting graceful shutdown...");

        self.orchestrator.readiness().reset();
        // receivers may already be gone
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {e}");
            }
        }

        info!("Graceful shutdown completed");

        if let Some(task) = self.log_task.lock().await.take() {
            let _ = self.log_shutdown.send(true);
            if let Err(e) = task.await {
                eprintln!("File logger ended abnormally: {e}");
            }
        }
        Ok(())
    }

    /// A receiver tied to this lifecycle's shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    async fn initialize_logging(&self) -> OrchestratorResult<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };

        let logger = FileLogger::open(log).await?;
        if let Err(e) = logger.install() {
            warn!("{e}, keeping the current logger");
        }

        let shutdown = self.log_shutdown.subscribe();
        *self.log_task.lock().await = Some(tokio::spawn(async move {
            if let Err(e) = logger.run(shutdown).await {
                // the log pipeline itself is gone at this point
                eprintln!("{e}");
            }
        }));
        Ok(())
    }

    async fn initialize_dependencies(&self) {
        let dependencies = self.orchestrator.container().secondaries();
        info!("Initializing {} dependencies...", dependencies.len());

        let results = join_all(dependencies.iter().map(|dependency| async move {
            (dependency.key(), dependency.initialize().await)
        }))
        .await;

        for (key, result) in results {
            if let Err(e) = result {
                // health polling and the breaker take it from here
                warn!("Dependency '{key}' failed to initialize: {e}");
            }
        }
    }

    async fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock().await;

        if let Some(interval) = self.health_interval {
            let health = self.orchestrator.health().clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                health.run(interval, shutdown).await
            }));
        }

        if let Some(interval) = self.report_interval {
            let reporter = MetricsReporter::new(self.orchestrator.metrics().clone(), interval);
            tasks.push(tokio::spawn(reporter.run(self.shutdown.subscribe())));
        }

        info!("Started {} background tasks", tasks.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{OrchestratorError, SecondaryDependency, ServiceContainer},
        testing::{MockDependency, MockPrimary},
    };

    fn lifecycle(config: &Config, dependencies: &[Arc<MockDependency>]) -> ComponentLifecycle {
        let container = dependencies.iter().fold(
            ServiceContainer::new(Arc::new(MockPrimary::new())),
            |container, dependency| {
                container.with_secondary(dependency.clone() as Arc<dyn SecondaryDependency>)
            },
        );
        let orchestrator = Arc::new(Orchestrator::new(config, container).unwrap());
        ComponentLifecycle::new(orchestrator, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_then_shutdown() {
        let dependencies = vec![
            Arc::new(MockDependency::new("analytics")),
            Arc::new(MockDependency::new("performance")),
        ];
        let lifecycle = lifecycle(&Config::default(), &dependencies);

        lifecycle.initialize().await.unwrap();
        assert!(dependencies.iter().all(|d| d.is_initialized()));
        assert!(lifecycle.orchestrator().readiness().is_ready());
        assert_eq!(lifecycle.tasks.lock().await.len(), 2);

        lifecycle.orchestrator().enroll("u1", "rust-101").await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        lifecycle.shutdown().await.unwrap();
        assert!(lifecycle.tasks.lock().await.is_empty());
        assert!(matches!(
            lifecycle.orchestrator().enroll("u1", "rust-101").await,
            Err(OrchestratorError::SystemNotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_file_logger_started_and_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var").join("conductor.log");
        let config = Config::from_yaml(&format!(
            "log:\n  path: {}\nhealth:\n  interval_secs: 0\nmetrics:\n  report_interval_secs: 0\n",
            path.display()
        ))
        .unwrap();
        let lifecycle = lifecycle(&config, &[Arc::new(MockDependency::new("analytics"))]);

        lifecycle.initialize().await.unwrap();
        assert!(path.exists());
        assert!(lifecycle.log_task.lock().await.is_some());
        assert!(lifecycle.tasks.lock().await.is_empty());

        lifecycle.shutdown().await.unwrap();
        assert!(lifecycle.log_task.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_unusable_log_path_fails_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.log = Some(config::Log {
            path: dir.path().to_string_lossy().into_owned(),
        });
        let lifecycle = lifecycle(&config, &[]);

        assert!(matches!(
            lifecycle.initialize().await,
            Err(OrchestratorError::Internal(_))
        ));
        assert!(!lifecycle.orchestrator().readiness().is_ready());
    }

    #[tokio::test]
    async fn test_disabled_background_tasks() {
        let config = Config::from_yaml(
            r#"
health:
  interval_secs: 0
metrics:
  report_interval_secs: 0
            "#,
        )
        .unwrap();
        let lifecycle = lifecycle(&config, &[Arc::new(MockDependency::new("analytics"))]);

        lifecycle.initialize().await.unwrap();
        assert!(lifecycle.tasks.lock().await.is_empty());
        lifecycle.shutdown().await.unwrap();
    }
}
