//! Restart supervisor for the metadata subscriber.
//!
//! Any subscriber exit (clean end of stream, connection failure, decode
//! failure, panic) is treated as transient: the subscriber is relaunched on
//! a fresh subscription after an exponentially growing delay. Only a
//! shutdown signal stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BackoffConfig;
use crate::metadata::{MetadataSource, SubscriberExit, run_subscriber};
use crate::registry::SharedRegistry;

/// Exponential restart delay: `initial`, doubled per attempt, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial,
            config,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.config.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

pub struct Watchdog<S> {
    source: Arc<S>,
    registry: SharedRegistry,
    backoff: Backoff,
}

impl<S: MetadataSource> Watchdog<S> {
    pub fn new(source: S, registry: SharedRegistry, backoff: BackoffConfig) -> Self {
        Self {
            source: Arc::new(source),
            registry,
            backoff: Backoff::new(backoff),
        }
    }

    /// Run on a background task until `shutdown` turns true
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }

    /// Supervise the subscriber until shutdown. Returns the number of
    /// restarts performed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        // One exit report in flight at a time
        let (exit_tx, mut exit_rx) = mpsc::channel::<SubscriberExit>(1);
        let mut restarts = 0u64;

        loop {
            let mut handle = self.launch(exit_tx.clone());

            let exit = tokio::select! {
                Some(exit) = exit_rx.recv() => exit,
                joined = &mut handle => match joined {
                    // Finished normally, so its report is already queued
                    Ok(()) => match exit_rx.recv().await {
                        Some(exit) => exit,
                        None => return restarts,
                    },
                    Err(e) => {
                        warn!("Metadata subscriber panicked: {}", e);
                        SubscriberExit { consumed: 0, error: None }
                    }
                },
                _ = stopped(&mut shutdown) => {
                    handle.abort();
                    info!("Metadata watchdog stopped");
                    return restarts;
                }
            };

            match &exit.error {
                Some(e) => warn!(
                    "Metadata subscriber failed after {} events: {}",
                    exit.consumed, e
                ),
                None => warn!("Metadata stream ended after {} events", exit.consumed),
            }
            if exit.consumed > 0 {
                self.backoff.reset();
            }

            let delay = self.backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown) => {
                    info!("Metadata watchdog stopped");
                    return restarts;
                }
            }

            restarts += 1;
            info!(
                "Restarting metadata subscriber (restart {} after {:?})",
                restarts, delay
            );
        }
    }

    fn launch(&self, exit_tx: mpsc::Sender<SubscriberExit>) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let exit = run_subscriber(source.as_ref(), &registry).await;
            let _ = exit_tx.send(exit).await;
        })
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
