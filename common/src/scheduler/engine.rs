// Trigger engine: one sequential poll loop per trigger

use crate::models::TickOutcome;
use crate::trigger::DosTrigger;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler trait for trigger polling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run all poll loops until `stop` is called
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop the scheduler; in-flight polls complete first
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Main trigger engine implementation
pub struct TriggerEngine {
    triggers: Vec<Arc<DosTrigger>>,
    quiet_down: Arc<AtomicBool>,
    /// Latched: a receiver subscribed after `stop` still sees it
    shutdown_tx: watch::Sender<bool>,
}

impl TriggerEngine {
    /// Create an engine; every trigger shares the engine's quiet-down flag
    pub fn new(triggers: Vec<DosTrigger>) -> Self {
        let quiet_down = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        let triggers = triggers
            .into_iter()
            .map(|t| Arc::new(t.with_quiet_down(quiet_down.clone())))
            .collect();

        Self {
            triggers,
            quiet_down,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Skip polls until `resume` is called
    pub fn quiet_down(&self) {
        info!("Quieting down, polls will be skipped");
        self.quiet_down.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        info!("Resuming polls");
        self.quiet_down.store(false, Ordering::SeqCst);
    }

    pub fn is_quieting_down(&self) -> bool {
        self.quiet_down.load(Ordering::SeqCst)
    }

    /// Poll every trigger once, in order
    pub async fn poll_all(&self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            outcomes.push(trigger.run().await);
        }
        outcomes
    }
}

/// Poll one trigger on its schedule until shutdown.
///
/// The next fire time is computed after each poll completes, so polls of
/// the same trigger never overlap and missed fire times are not queued.
#[instrument(skip_all, fields(job = %trigger.job()))]
async fn poll_loop(trigger: Arc<DosTrigger>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        schedule = %trigger.schedule().expression(),
        timezone = %trigger.schedule().timezone(),
        "Starting poll loop"
    );

    loop {
        if *shutdown_rx.borrow() {
            info!("Engine stopped, leaving poll loop");
            return;
        }

        let now = Utc::now();
        let next = match trigger.schedule().next_after(now) {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "No further poll times, stopping poll loop");
                return;
            }
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(next_poll = %next, "Waiting for next poll");

        tokio::select! {
            _ = sleep(wait) => {
                match trigger.run().await {
                    TickOutcome::Triggered(cause) => debug!(cause = %cause, "Poll triggered a build"),
                    TickOutcome::Failed(reason) => warn!(reason = %reason, "Poll failed, waiting for next tick"),
                    TickOutcome::NoCause | TickOutcome::Skipped => {}
                }
            }
            _ = async { let _ = shutdown_rx.wait_for(|stopped| *stopped).await; } => {
                info!("Shutdown signal received, stopping poll loop");
                return;
            }
        }
    }
}

#[async_trait]
impl Scheduler for TriggerEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(triggers = self.triggers.len(), "Starting trigger engine");

        let loops = self
            .triggers
            .iter()
            .map(|trigger| tokio::spawn(poll_loop(trigger.clone(), self.shutdown_receiver())));

        for result in join_all(loops).await {
            if let Err(e) = result {
                error!(error = %e, "Poll loop terminated abnormally");
            }
        }

        info!("Trigger engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Stopping trigger engine");
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}
