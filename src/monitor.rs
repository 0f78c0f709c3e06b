//! # Monitor Module
//! Wires provisioning, the event source, the alert policy and the notifier
//! into the long running watch loop, plus the one-shot self-test.

use crate::alert::{AlertMessage, Delivery, Notifier, hostname};
use crate::canary::{Provisioned, ensure_sentinel};
use crate::error::{Error, Result, SubscriptionError};
use crate::policy::{AlertPolicy, AlertState, Decision};
use crate::settings::Settings;
use crate::watch::{self, EventMask, EventSource, Poll, RawEvent};
use chrono::{DateTime, Local};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pause after a poll that found nothing.
pub const POLL_BACKOFF: Duration = Duration::from_millis(200);

/// Watch loop state for one sentinel.
pub struct Monitor<S> {
    sentinel: PathBuf,
    source: S,
    policy: AlertPolicy,
    state: AlertState,
    notifier: Notifier,
    host: String,
}

impl<S: EventSource> Monitor<S> {
    pub fn new(sentinel: PathBuf, source: S, policy: AlertPolicy, notifier: Notifier) -> Self {
        Monitor {
            sentinel,
            source,
            policy,
            state: AlertState::new(Instant::now()),
            notifier,
            host: hostname(),
        }
    }

    /// Replaces the start time used for the startup window.
    pub fn with_start(mut self, start: Instant) -> Self {
        self.state = AlertState::new(start);
        self
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Polls until `shutdown` resolves or the source fails.
    pub async fn watch<F>(&mut self, shutdown: F) -> std::result::Result<(), SubscriptionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            match self.source.poll()? {
                Poll::WouldBlock => {
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_BACKOFF) => {}
                        _ = &mut shutdown => {
                            info!("Shutdown requested, releasing watch on {}.", self.sentinel.display());
                            return Ok(());
                        }
                    }
                }
                Poll::Events(events) => {
                    self.handle_batch(&events, Instant::now(), Local::now()).await;
                }
            }
        }
    }

    /// Runs every event of one read through the policy, notifying on each
    /// approval. Returns the deliveries made, in order.
    pub async fn handle_batch(
        &mut self,
        events: &[RawEvent],
        now: Instant,
        time: DateTime<Local>,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for event in events {
            if event.mask.contains(EventMask::IGNORED) {
                warn!(
                    "Kernel released the watch on {}; it is no longer observed.",
                    self.sentinel.display()
                );
            }
            match self.policy.evaluate(event, now, &mut self.state) {
                Decision::Approved(description) => {
                    info!("{} on {}", description, self.sentinel.display());
                    let message =
                        AlertMessage::alert(&self.sentinel, description, time, &self.host);
                    let delivery = self.notifier.notify(&message).await;
                    delivery.log();
                    deliveries.push(delivery);
                }
                decision => debug!("{} suppressed: {:?}", event.mask, decision),
            }
        }
        deliveries
    }
}

/// Provisions the sentinel, subscribes to it and watches until `shutdown`.
pub async fn run<F>(settings: &Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    match ensure_sentinel(&settings.sentinel_path)? {
        Provisioned::Created { .. } => {}
        Provisioned::Existing => info!(
            "Using existing sentinel {}.",
            settings.sentinel_path.display()
        ),
    }

    let source = watch::subscribe(&settings.sentinel_path)?;
    let notifier = Notifier::from_settings(settings)?;
    info!(
        "Watching {} (min interval {}s, startup suppression {}s).",
        settings.sentinel_path.display(),
        settings.alert_min_interval.as_secs(),
        settings.startup_suppress.as_secs()
    );

    let mut monitor = Monitor::new(
        settings.sentinel_path.clone(),
        source,
        AlertPolicy::from_settings(settings),
        notifier,
    );
    monitor.watch(shutdown).await?;
    Ok(())
}

/// Sends a test message on both channels.
pub async fn self_test(settings: &Settings) -> Result<()> {
    let notifier =
        Notifier::from_settings(settings).map_err(|e| Error::SelfTest(e.to_string()))?;
    let message = AlertMessage::test(&settings.sentinel_path, Local::now(), &hostname());
    let delivery = notifier.notify(&message).await;
    delivery.log();
    if delivery.all_sent() {
        Ok(())
    } else {
        let failures = delivery.failures();
        error!("Self-test failed on {} channel(s).", failures.len());
        Err(Error::SelfTest(failures.join("; ")))
    }
}
