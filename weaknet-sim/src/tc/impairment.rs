//! Impairment profile configuration.
//!
//! This module defines the parameters applied to a single impaired class: an HTB rate cap
//! plus the delay, jitter and loss injected by the netem qdisc below it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rate used when a profile only cares about delay, jitter or loss. High enough to never be
/// the bottleneck.
pub const UNCAPPED_RATE_KBIT: u32 = 500_000;

/// Maximum number of packets the netem qdisc may hold. Keeps long delays from queueing an
/// unbounded amount of traffic.
pub const NETEM_LIMIT: u32 = 2_000;

/// The impairments applied to the traffic of one host.
///
/// # Example
///
/// ```
/// use weaknet_sim::tc::impairment::ImpairmentProfile;
///
/// // 30% loss on top of 100ms delay.
/// let profile = ImpairmentProfile::default().with_loss(30).with_delay(100);
/// assert_eq!(profile.rate_kbit, 500_000);
///
/// // A 1 Mbit/s link without any other impairment.
/// let capped = ImpairmentProfile::rate(1_000);
/// assert_eq!(capped.loss_percent, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpairmentProfile {
    /// HTB rate of the class, in kbit/s.
    pub rate_kbit: u32,
    /// Netem base delay, in milliseconds.
    pub delay_ms: u32,
    /// Netem jitter around the base delay, in milliseconds.
    pub jitter_ms: u32,
    /// Netem random loss, in percent (0 to 100).
    pub loss_percent: u8,
}

impl Default for ImpairmentProfile {
    fn default() -> Self {
        Self { rate_kbit: UNCAPPED_RATE_KBIT, delay_ms: 0, jitter_ms: 0, loss_percent: 0 }
    }
}

impl ImpairmentProfile {
    /// A profile that only caps bandwidth.
    pub fn rate(rate_kbit: u32) -> Self {
        Self { rate_kbit, ..Default::default() }
    }

    pub fn with_rate(mut self, rate_kbit: u32) -> Self {
        self.rate_kbit = rate_kbit;
        self
    }

    pub fn with_delay(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: u32) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_loss(mut self, loss_percent: u8) -> Self {
        self.loss_percent = loss_percent;
        self
    }
}

impl fmt::Display for ImpairmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate {}kbit, delay {}ms, jitter {}ms, loss {}%",
            self.rate_kbit, self.delay_ms, self.jitter_ms, self.loss_percent
        )
    }
}
