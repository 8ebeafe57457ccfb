//! Test plans: which impairment profiles are run, in which order.
//!
//! The built-in plan mirrors the conditions used for weak-network acceptance runs. A plan can
//! also be loaded from TOML:
//!
//! ```toml
//! pause_secs = 5
//! loss = [5, 15]
//! loss_delay = [{ loss = 30, delay_ms = 50 }, { loss = 40, delay_ms = 100 }]
//! jitter_ms = [100, 400]
//! rate_kbit = [2000, 500]
//! ```

use std::{fmt, io, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    ip::Direction,
    tc::impairment::{ImpairmentProfile, UNCAPPED_RATE_KBIT},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid plan: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("module must be 'all', 'loss', 'delay', 'rate' or 'jitter', got '{0}'")]
    InvalidModule(String),
    #[error("loss must be at most 100%, got {0}%")]
    InvalidLoss(u8),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A family of profiles run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Loss,
    LossDelay,
    Jitter,
    Rate,
}

impl Category {
    /// All categories, in the order a full run executes them.
    pub const ALL: [Self; 4] = [Self::Loss, Self::LossDelay, Self::Jitter, Self::Rate];

    /// Returns `true` if the category applies to traffic flowing in `direction`. Bandwidth
    /// shaping is only exercised on downloads.
    pub fn supports(self, direction: Direction) -> bool {
        match self {
            Self::Rate => direction == Direction::Download,
            _ => true,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loss => f.write_str("loss"),
            Self::LossDelay => f.write_str("loss+delay"),
            Self::Jitter => f.write_str("jitter"),
            Self::Rate => f.write_str("rate"),
        }
    }
}

/// Which categories of a plan to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSelector {
    All,
    Only(Category),
}

impl ModuleSelector {
    pub fn includes(self, category: Category) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => only == category,
        }
    }
}

impl FromStr for ModuleSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "loss" => Ok(Self::Only(Category::Loss)),
            "delay" => Ok(Self::Only(Category::LossDelay)),
            "jitter" => Ok(Self::Only(Category::Jitter)),
            "rate" => Ok(Self::Only(Category::Rate)),
            other => Err(Error::InvalidModule(other.to_string())),
        }
    }
}

impl fmt::Display for ModuleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(Category::LossDelay) => f.write_str("delay"),
            Self::Only(category) => fmt::Display::fmt(category, f),
        }
    }
}

/// A loss percentage paired with a delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossDelay {
    pub loss: u8,
    pub delay_ms: u32,
}

/// The serialized form of a [`TestPlan`]. Missing fields take the built-in values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanConfig {
    /// Pause between two profiles, in seconds.
    pub pause_secs: u64,
    /// Rate of the class when a profile does not cap bandwidth, in kbit/s.
    pub base_rate_kbit: u32,
    /// Loss percentages of the loss category.
    pub loss: Vec<u8>,
    /// Loss and delay pairs of the loss+delay category.
    pub loss_delay: Vec<LossDelay>,
    /// Jitter magnitudes of the jitter category, in milliseconds. Each is split in equal
    /// halves of base delay and jitter.
    pub jitter_ms: Vec<u32>,
    /// Bandwidth caps of the rate category, in kbit/s.
    pub rate_kbit: Vec<u32>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        const LOSS: [u8; 8] = [30, 30, 40, 40, 50, 50, 60, 70];
        const DELAY: [u32; 8] = [50, 100, 50, 100, 50, 100, 50, 50];

        Self {
            pause_secs: 10,
            base_rate_kbit: UNCAPPED_RATE_KBIT,
            loss: vec![10, 20, 30, 40, 50, 60, 70],
            loss_delay: LOSS
                .into_iter()
                .zip(DELAY)
                .map(|(loss, delay_ms)| LossDelay { loss, delay_ms })
                .collect(),
            jitter_ms: vec![100, 200, 500, 1000],
            rate_kbit: vec![1000, 600, 300],
        }
    }
}

impl PlanConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

/// A profile of a plan, with the label used in log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedProfile {
    pub label: String,
    pub profile: ImpairmentProfile,
}

/// The profiles of every category, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    pub pause: Duration,
    pub loss: Vec<PlannedProfile>,
    pub loss_delay: Vec<PlannedProfile>,
    pub jitter: Vec<PlannedProfile>,
    pub rate: Vec<PlannedProfile>,
}

impl Default for TestPlan {
    fn default() -> Self {
        Self::build(&PlanConfig::default())
    }
}

impl TestPlan {
    pub fn from_config(config: &PlanConfig) -> Result<Self> {
        let losses = config.loss.iter().copied().chain(config.loss_delay.iter().map(|p| p.loss));
        for loss in losses {
            if loss > 100 {
                return Err(Error::InvalidLoss(loss));
            }
        }

        Ok(Self::build(config))
    }

    fn build(config: &PlanConfig) -> Self {
        let base = ImpairmentProfile::default().with_rate(config.base_rate_kbit);

        let loss = config
            .loss
            .iter()
            .map(|&loss| PlannedProfile {
                label: format!("{loss}% packet loss"),
                profile: base.with_loss(loss),
            })
            .collect();

        let loss_delay = config
            .loss_delay
            .iter()
            .map(|&LossDelay { loss, delay_ms }| PlannedProfile {
                label: format!("{loss}% packet loss and {delay_ms}ms delay"),
                profile: base.with_loss(loss).with_delay(delay_ms),
            })
            .collect();

        let jitter = config
            .jitter_ms
            .iter()
            .map(|&magnitude| {
                let half = magnitude / 2;
                PlannedProfile {
                    label: format!("{half}ms jitter and {half}ms delay"),
                    profile: base.with_delay(half).with_jitter(half),
                }
            })
            .collect();

        let rate = config
            .rate_kbit
            .iter()
            .map(|&rate_kbit| PlannedProfile {
                label: format!("{rate_kbit}kbit bandwidth"),
                profile: ImpairmentProfile::rate(rate_kbit),
            })
            .collect();

        Self { pause: Duration::from_secs(config.pause_secs), loss, loss_delay, jitter, rate }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn profiles(&self, category: Category) -> &[PlannedProfile] {
        match category {
            Category::Loss => &self.loss,
            Category::LossDelay => &self.loss_delay,
            Category::Jitter => &self.jitter,
            Category::Rate => &self.rate,
        }
    }
}
