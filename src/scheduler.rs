//! The control cycle that drives producers, the active policy, and consumers
//! at a configured cadence.

use crate::registry::Registry;
use crate::situation::Situation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

/// Drives the control cycle until told to stop.
pub struct Scheduler {
    registry: Arc<Mutex<Registry>>,
    interval: Duration,
    n_phases: usize,
}

impl Scheduler {
    pub fn new(registry: Arc<Mutex<Registry>>, interval: Duration, n_phases: usize) -> Self {
        Self {
            registry,
            interval,
            n_phases,
        }
    }

    /// Run one tick: poll every producer, apply the active policy, drive every consumer.
    ///
    /// Holds the registry lock for the whole call, so a tick always observes an
    /// internally consistent situation and is never raced by an RPC write mid-tick.
    pub async fn tick(&self) {
        let started_at = std::time::Instant::now();
        let mut registry = self.registry.lock().await;
        let tick_number = registry.increment_tick_count();
        let mut situation = Situation::new(self.n_phases);

        for index in registry.producer_indices() {
            if let Some(producer) = registry.producer_mut(index) {
                let name = producer.name().to_string();
                if let Err(e) = producer.poll(&mut situation).await {
                    error!("Producer '{name}' failed on tick {tick_number}: {e}");
                }
            }
        }

        let previous_name = registry.active_policy_name();
        match registry.active_policy_or_err() {
            Ok(policy) => {
                let current_name = policy.info().name;
                if previous_name.as_deref() != Some(current_name.as_str()) {
                    info!("Activating policy {current_name}");
                }
                match policy.apply(&situation) {
                    Ok(budget) => registry.set_last_budget(budget),
                    Err(e) => {
                        error!("Policy '{current_name}' failed on tick {tick_number}: {e}");
                    }
                }
            }
            Err(e) => {
                warn!("No usable active policy on tick {tick_number}: {e}");
            }
        }

        let budget = registry.snapshot_budget();
        for index in registry.consumer_indices() {
            if let Some(consumer) = registry.consumer_mut(index) {
                let name = consumer.name().to_string();
                if let Err(e) = consumer.handle(&budget, &situation).await {
                    error!("Consumer '{name}' failed on tick {tick_number}: {e}");
                }
            }
        }

        registry.set_last_situation(situation);

        let duration = started_at.elapsed();
        registry.set_last_tick_duration(duration);
        if duration > self.interval {
            info!(
                "Tick {tick_number} took {duration:?}, exceeding the {:?} interval, budget={:.3} A",
                self.interval, budget.current
            );
        } else {
            debug!("Tick {tick_number} complete in {duration:?}, budget={:.3} A", budget.current);
        }
    }

    /// Run the scheduler until a shutdown signal (`SIGINT`/`SIGTERM`) is observed
    /// during the inter-tick sleep.
    ///
    /// Deadlines advance monotonically: `t0, t0+interval, t0+2*interval, ...`.
    /// If a tick overruns its deadline, the next deadline becomes the tick's own
    /// finish time rather than attempting to catch up with a burst of ticks.
    pub async fn run(&self) {
        let mut deadline = Instant::now();
        loop {
            self.tick().await;

            let now = Instant::now();
            let next_deadline = deadline + self.interval;
            deadline = if now > next_deadline {
                warn!(
                    "Tick overran its deadline by {:?}; skipping to the next tick without catch-up",
                    now - next_deadline
                );
                now
            } else {
                next_deadline
            };

            tokio::select! {
                () = sleep_until(deadline) => {}
                () = shutdown_signal() => {
                    info!("Shutdown signal received during sleep, stopping scheduler");
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
