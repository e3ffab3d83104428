//! Pacing gate for outgoing commands.
//!
//! Query servers throttle or ban clients that send commands too quickly
//! ("flood protection"). The gate closes for a fixed interval after every
//! write; the dispatcher holds the next command until it reopens.
//!
//! # Configuration
//!
//! - `enabled`: whether the gate ever closes (default: true)
//! - `interval`: how long it stays closed after a write (default: 350ms)
//!
//! The gate uses `tokio::time::Instant` so that paused-clock tests can drive
//! it deterministically.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::PacingConfig;

/// Default pause between two writes.
pub const DEFAULT_PACING_INTERVAL: Duration = Duration::from_millis(350);

/// Anti-flood gate for the command writer.
#[derive(Debug, Clone)]
pub struct PacingGate {
    /// Whether the gate ever closes.
    enabled: bool,
    /// How long the gate stays closed after a write.
    interval: Duration,
    /// When the gate opens again, if it is closed.
    reopens_at: Option<Instant>,
}

impl PacingGate {
    /// Create a gate with the given interval.
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            reopens_at: None,
        }
    }

    /// Create a gate from configuration.
    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(config.enabled, Duration::from_millis(config.interval_ms))
    }

    /// Whether pacing is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured interval.
    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a write may happen at `now`.
    #[inline]
    pub fn is_open(&self, now: Instant) -> bool {
        match self.reopens_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// When the gate opens after the last write.
    ///
    /// The instant may already be in the past; sleeping until it then
    /// returns at once. `None` if no write has closed the gate.
    pub fn reopens_at(&self) -> Option<Instant> {
        self.reopens_at
    }

    /// Record a write at `now`, closing the gate for one interval.
    pub fn close(&mut self, now: Instant) {
        if self.enabled && !self.interval.is_zero() {
            self.reopens_at = Some(now + self.interval);
        }
    }
}

impl Default for PacingGate {
    fn default() -> Self {
        Self::new(true, DEFAULT_PACING_INTERVAL)
    }
}
