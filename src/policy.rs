//! # Policy Module
//! Decides, event by event, whether an alert goes out.

use crate::settings::{Settings, SignatureMode};
use crate::watch::RawEvent;
use std::time::{Duration, Instant};

/// Fingerprint used to tell repeated events apart from new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(u32);

/// Rate limiting bookkeeping, owned by the monitor loop.
#[derive(Debug, Clone)]
pub struct AlertState {
    pub start: Instant,
    pub last_alert: Option<Instant>,
    pub last_signature: Option<Signature>,
}

impl AlertState {
    pub fn new(start: Instant) -> Self {
        AlertState {
            start,
            last_alert: None,
            last_signature: None,
        }
    }
}

/// Outcome of [`AlertPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Inside the startup window.
    SuppressedStartup,
    /// Same signature as the last alert, within the minimum interval.
    SuppressedRateLimit,
    /// Send an alert with this event description.
    Approved(String),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub min_interval: Duration,
    pub startup_suppress: Duration,
    pub signature_mode: SignatureMode,
}

impl AlertPolicy {
    pub fn new(min_interval: Duration, startup_suppress: Duration, mode: SignatureMode) -> Self {
        AlertPolicy {
            min_interval,
            startup_suppress,
            signature_mode: mode,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.alert_min_interval,
            settings.startup_suppress,
            settings.signature_mode,
        )
    }

    pub fn signature(&self, event: &RawEvent) -> Signature {
        match self.signature_mode {
            SignatureMode::EventClass => Signature(event.mask.bits()),
            SignatureMode::Collapsed => Signature(0),
        }
    }

    /// Evaluates `event` observed at `now`. `state` changes only when the
    /// decision is [`Decision::Approved`].
    pub fn evaluate(&self, event: &RawEvent, now: Instant, state: &mut AlertState) -> Decision {
        if !self.startup_suppress.is_zero()
            && now.saturating_duration_since(state.start) < self.startup_suppress
        {
            return Decision::SuppressedStartup;
        }

        let signature = self.signature(event);
        if let Some(last) = state.last_alert {
            if state.last_signature == Some(signature)
                && now.saturating_duration_since(last) < self.min_interval
            {
                return Decision::SuppressedRateLimit;
            }
        }

        state.last_alert = Some(now);
        state.last_signature = Some(signature);
        Decision::Approved(event.mask.to_string())
    }
}
