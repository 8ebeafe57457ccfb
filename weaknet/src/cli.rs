use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use weaknet_sim::{
    tc::requests::DEFAULT_ROOT_RATE_KBIT, Direction, HostAddress, ModuleSelector, PlanConfig,
    RunTarget, TestPlan,
};

/// Impair the UDP traffic of one host with `tc`, running a plan of loss, delay, jitter and
/// bandwidth profiles one after another.
#[derive(Parser, Debug)]
#[command(
    name = "weaknet",
    version,
    after_help = "Example: weaknet down 192.168.10.20 all 60"
)]
pub struct Cli {
    /// Direction of the impaired traffic: `up` or `down`.
    pub direction: Direction,

    /// IPv4 address of the impaired host.
    pub host: HostAddress,

    /// Profiles to run: `all`, `loss`, `delay`, `jitter` or `rate`.
    pub module: ModuleSelector,

    /// How long every profile is held, in seconds.
    pub hold_secs: u64,

    /// Interface shaping upload traffic.
    #[arg(long, env = "WEAKNET_UP_INTERFACE", default_value = "ifb0")]
    pub up_interface: String,

    /// Interface shaping download traffic.
    #[arg(long, env = "WEAKNET_DOWN_INTERFACE", default_value = "eth1")]
    pub down_interface: String,

    /// TOML plan replacing the built-in profiles.
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Pause between two profiles, in seconds. Overrides the plan.
    #[arg(long)]
    pub pause_secs: Option<u64>,

    /// Run `tc` directly instead of through `sudo`.
    #[arg(long, default_value_t = false)]
    pub no_sudo: bool,

    /// Path of the `tc` binary.
    #[arg(long, value_name = "PATH", default_value = "tc")]
    pub tc_bin: PathBuf,

    /// Log the `tc` commands instead of running them.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Install the HTB root qdisc and parent class before running.
    #[arg(long, default_value_t = false)]
    pub bootstrap: bool,

    /// Rate of the parent class installed by `--bootstrap`, in kbit/s.
    #[arg(long, default_value_t = DEFAULT_ROOT_RATE_KBIT)]
    pub root_rate_kbit: u32,
}

impl Cli {
    /// The interface carrying traffic in the requested direction.
    pub fn interface(&self) -> &str {
        match self.direction {
            Direction::Upload => &self.up_interface,
            Direction::Download => &self.down_interface,
        }
    }

    pub fn target(&self) -> RunTarget {
        RunTarget {
            host: self.host,
            interface: self.interface().to_string(),
            direction: self.direction,
        }
    }

    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }

    /// Loads the plan file if one was given, and applies the pause override.
    pub fn load_plan(&self) -> anyhow::Result<TestPlan> {
        let config = match &self.plan {
            Some(path) => PlanConfig::load(path)
                .with_context(|| format!("failed to load plan {}", path.display()))?,
            None => PlanConfig::default(),
        };

        let mut plan = TestPlan::from_config(&config).context("invalid plan")?;
        if let Some(pause) = self.pause_secs {
            plan = plan.with_pause(Duration::from_secs(pause));
        }

        Ok(plan)
    }
}
