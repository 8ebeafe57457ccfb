//! Builders for the `tc` invocations used by the controller.
//!
//! Each request is a small builder that renders into a [`Command`]. Nothing here runs
//! anything; see [`crate::command::Executor`].

use crate::{
    command::Command,
    ip::{Direction, HostAddress},
    tc::{
        handle::{ClassId, FilterHandle, QdiscHandle, ROOT_MAJOR},
        impairment::{ImpairmentProfile, NETEM_LIMIT},
        TC,
    },
};

/// Priority of the per-host u32 filters.
pub const FILTER_PRIORITY: u16 = 3;

/// IP protocol number matched by the per-host filters (UDP).
pub const IP_PROTOCOL_UDP: u8 = 17;

/// Default rate of the HTB parent class installed by [`HtbRootRequest`], in kbit/s.
pub const DEFAULT_ROOT_RATE_KBIT: u32 = 1_000_000;

fn tc(device: &str, object: &str, verb: &str) -> Command {
    Command::new(TC).args([object, verb, "dev", device])
}

/// `tc filter show dev <device>`
#[derive(Debug, Clone)]
pub struct FilterShowRequest {
    pub device: String,
}

impl FilterShowRequest {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into() }
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "filter", "show")
    }
}

/// Installs the HTB root `1:` and its parent class `1:1`, replacing whatever root qdisc the
/// device had.
#[derive(Debug, Clone)]
pub struct HtbRootRequest {
    pub device: String,
    pub rate_kbit: u32,
}

impl HtbRootRequest {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into(), rate_kbit: DEFAULT_ROOT_RATE_KBIT }
    }

    /// Set the rate of the parent class.
    pub fn with_rate(mut self, rate_kbit: u32) -> Self {
        self.rate_kbit = rate_kbit;
        self
    }

    /// Builds the root qdisc and parent class commands, in order.
    pub fn build(&self) -> [Command; 2] {
        let root = tc(&self.device, "qdisc", "replace").args([
            "root".to_string(),
            "handle".to_string(),
            QdiscHandle(ROOT_MAJOR).to_string(),
            "htb".to_string(),
        ]);

        let parent = ClassId::parent();
        let class = tc(&self.device, "class", "replace").args([
            "parent".to_string(),
            QdiscHandle(ROOT_MAJOR).to_string(),
            "classid".to_string(),
            parent.to_string(),
            "htb".to_string(),
            "rate".to_string(),
            format!("{}kbit", self.rate_kbit),
        ]);

        [root, class]
    }
}

/// Creates (or replaces) the rate limited HTB class for an impaired host under `1:1`.
#[derive(Debug, Clone)]
pub struct HtbClassRequest {
    pub device: String,
    pub class_id: ClassId,
    pub rate_kbit: u32,
}

impl HtbClassRequest {
    pub fn new(device: impl Into<String>, class_id: ClassId, rate_kbit: u32) -> Self {
        Self { device: device.into(), class_id, rate_kbit }
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "class", "replace").args([
            "parent".to_string(),
            ClassId::parent().to_string(),
            "classid".to_string(),
            self.class_id.to_string(),
            "htb".to_string(),
            "rate".to_string(),
            format!("{}kbit", self.rate_kbit),
        ])
    }
}

/// Routes the host's UDP traffic into a class with a u32 filter on the root qdisc.
///
/// Upload traffic is matched on the IPv4 source address, download traffic on the
/// destination address.
#[derive(Debug, Clone)]
pub struct U32FilterRequest {
    pub device: String,
    pub class_id: ClassId,
    pub direction: Direction,
    pub host: HostAddress,
}

impl U32FilterRequest {
    pub fn new(
        device: impl Into<String>,
        class_id: ClassId,
        direction: Direction,
        host: HostAddress,
    ) -> Self {
        Self { device: device.into(), class_id, direction, host }
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "filter", "add").args([
            "protocol".to_string(),
            "ip".to_string(),
            "parent".to_string(),
            ClassId::new(ROOT_MAJOR, 0).to_string(),
            "prio".to_string(),
            FILTER_PRIORITY.to_string(),
            "u32".to_string(),
            "match".to_string(),
            "ip".to_string(),
            self.direction.match_selector().to_string(),
            self.host.to_string(),
            "match".to_string(),
            "ip".to_string(),
            "protocol".to_string(),
            IP_PROTOCOL_UDP.to_string(),
            "0xff".to_string(),
            "flowid".to_string(),
            self.class_id.to_string(),
        ])
    }
}

/// Attaches the netem qdisc carrying delay, jitter and loss below a class.
#[derive(Debug, Clone)]
pub struct NetemQdiscRequest {
    pub device: String,
    pub class_id: ClassId,
    pub profile: ImpairmentProfile,
    pub limit: u32,
}

impl NetemQdiscRequest {
    pub fn new(device: impl Into<String>, class_id: ClassId, profile: ImpairmentProfile) -> Self {
        Self { device: device.into(), class_id, profile, limit: NETEM_LIMIT }
    }

    /// Set the netem queue limit, in packets.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "qdisc", "add").args([
            "parent".to_string(),
            self.class_id.to_string(),
            "handle".to_string(),
            self.class_id.netem_handle().to_string(),
            "netem".to_string(),
            "delay".to_string(),
            format!("{}ms", self.profile.delay_ms),
            format!("{}ms", self.profile.jitter_ms),
            "loss".to_string(),
            format!("{}%", self.profile.loss_percent),
            "limit".to_string(),
            self.limit.to_string(),
        ])
    }
}

/// Deletes a u32 filter by its kernel handle.
#[derive(Debug, Clone)]
pub struct FilterDeleteRequest {
    pub device: String,
    pub handle: FilterHandle,
}

impl FilterDeleteRequest {
    pub fn new(device: impl Into<String>, handle: FilterHandle) -> Self {
        Self { device: device.into(), handle }
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "filter", "del").args([
            "protocol".to_string(),
            "ip".to_string(),
            "prio".to_string(),
            FILTER_PRIORITY.to_string(),
            "handle".to_string(),
            self.handle.to_string(),
            "u32".to_string(),
        ])
    }
}

/// Deletes an impaired class, together with the netem qdisc attached to it.
#[derive(Debug, Clone)]
pub struct ClassDeleteRequest {
    pub device: String,
    pub class_id: ClassId,
}

impl ClassDeleteRequest {
    pub fn new(device: impl Into<String>, class_id: ClassId) -> Self {
        Self { device: device.into(), class_id }
    }

    pub fn build(&self) -> Command {
        tc(&self.device, "class", "del").args([
            "parent".to_string(),
            ClassId::parent().to_string(),
            "classid".to_string(),
            self.class_id.to_string(),
        ])
    }
}
