//! Scheduler for the indexing pipelines.
//!
//! Runs every pipeline to completion, one at a time, then sleeps and starts
//! over. A failing pipeline is logged and the cycle moves on to the next one.

use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{error, info, instrument, warn};

use crate::pipeline::{Pipeline, RunReport};

/// Default pause between two cycles.
pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub sleep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
        }
    }
}

/// A pipeline run that ended in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub pipeline: String,
    pub error: String,
    pub transient: bool,
}

/// Results of one pass over all pipelines.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub runs: Vec<RunReport>,
    pub failures: Vec<PipelineFailure>,
    /// Set when shutdown was requested before every pipeline ran.
    pub interrupted: bool,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

/// Scheduler that runs the pipelines in order, forever.
pub struct Scheduler {
    pipelines: Vec<Pipeline>,
    config: SchedulerConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(pipelines: Vec<Pipeline>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pipelines,
            config,
            shutdown_tx,
        }
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    /// Trigger a graceful shutdown.
    ///
    /// Observed between pipelines and during the sleep between cycles.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// A handle that can request shutdown from another task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run every pipeline once.
    pub async fn run_once(&self) -> CycleReport {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.run_cycle(&mut shutdown_rx).await
    }

    /// Run cycles until Ctrl-C or [`Scheduler::shutdown`].
    #[instrument(skip(self), fields(pipelines = self.pipelines.len()))]
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let signal_tx = self.shutdown_tx.clone();
        let signal_task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                let _ = signal_tx.send(());
            }
        });

        info!(
            sleep_secs = self.config.sleep_interval.as_secs(),
            "Starting scheduler"
        );

        loop {
            let cycle = self.run_cycle(&mut shutdown_rx).await;
            if cycle.interrupted {
                break;
            }

            info!(
                sleep_secs = self.config.sleep_interval.as_secs(),
                "Cycle finished, sleeping"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.sleep_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        signal_task.abort();
        info!("Scheduler shutdown complete");
    }

    async fn run_cycle(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> CycleReport {
        let mut report = CycleReport::default();

        for pipeline in &self.pipelines {
            if stop_requested(shutdown_rx) {
                warn!(next = %pipeline.name(), "Shutdown requested, skipping remaining pipelines");
                report.interrupted = true;
                break;
            }

            match pipeline.run().await {
                Ok(run) => {
                    info!(pipeline = %pipeline.name(), "{}", run);
                    report.runs.push(run);
                }
                Err(e) => {
                    error!(
                        pipeline = %pipeline.name(),
                        error = %e,
                        transient = e.is_transient(),
                        "Pipeline failed"
                    );
                    report.failures.push(PipelineFailure {
                        pipeline: pipeline.name().to_string(),
                        error: e.to_string(),
                        transient: e.is_transient(),
                    });
                }
            }
        }

        if !report.interrupted && stop_requested(shutdown_rx) {
            report.interrupted = true;
        }

        report
    }
}

fn stop_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(TryRecvError::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_requested() {
        let (tx, mut rx) = broadcast::channel(1);
        assert!(!stop_requested(&mut rx));

        tx.send(()).unwrap();
        assert!(stop_requested(&mut rx));
    }

    #[tokio::test]
    async fn test_empty_scheduler_cycle() {
        let scheduler = Scheduler::new(Vec::new(), SchedulerConfig::default());

        let report = scheduler.run_once().await;

        assert!(report.is_success());
        assert!(report.runs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_sleep() {
        let scheduler = std::sync::Arc::new(Scheduler::new(
            Vec::new(),
            SchedulerConfig {
                sleep_interval: Duration::from_secs(3600),
            },
        ));
        let handle = scheduler.shutdown_handle();

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.send(()).unwrap();

        running.await.unwrap();
    }
}
