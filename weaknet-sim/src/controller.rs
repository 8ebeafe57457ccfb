//! Lifecycle of the classifiers impairing a host: allocation, application and removal.
//!
//! A classifier is a class plus the u32 filter routing the host into it. The controller never
//! keeps state of its own between calls; the interface's filter table, as reported by
//! `tc filter show`, is the only source of truth.

use std::{collections::BTreeSet, fmt, ops::Range};

use crate::{
    command::{self, Executor},
    ip::{Direction, HostAddress},
    tc::{
        handle::{generate_new_class_id, ClassId, FilterHandle, DEFAULT_MINOR_POOL, ROOT_MAJOR},
        impairment::ImpairmentProfile,
        listing::{parse_filter_listing, FilterEntry, ListingError},
        requests::{
            ClassDeleteRequest, FilterDeleteRequest, FilterShowRequest, HtbClassRequest,
            HtbRootRequest, NetemQdiscRequest, U32FilterRequest,
        },
    },
};

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("failed to list filters on {interface}: {source}")]
    Query { interface: String, source: command::Error },
    #[error("failed to parse filters on {interface}: {source}")]
    Listing { interface: String, source: ListingError },
    #[error("no free class id left in {:x}:{:x}-{:x}", ROOT_MAJOR, .pool.start, .pool.end)]
    PoolExhausted { pool: Range<u16> },
}

/// The apply steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    Class,
    Filter,
    Netem,
}

impl fmt::Display for ApplyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class => f.write_str("class"),
            Self::Filter => f.write_str("filter"),
            Self::Netem => f.write_str("netem qdisc"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to add {step} for {class_id}: {source}")]
pub struct ApplyError {
    pub step: ApplyStep,
    pub class_id: ClassId,
    pub source: command::Error,
}

impl ApplyError {
    /// Returns `true` if earlier steps succeeded, so part of the classifier may exist.
    pub fn left_state(&self) -> bool {
        self.step != ApplyStep::Class
    }
}

/// The classifier to use for a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub class_id: ClassId,
    /// Handle of the host's existing filter. `None` for a freshly allocated class id.
    pub handle: Option<FilterHandle>,
    /// Class minors observed on the interface.
    pub in_use: BTreeSet<u16>,
}

impl Allocation {
    /// Returns `true` if the host already had a filter on the interface.
    pub fn reused(&self) -> bool {
        self.handle.is_some()
    }
}

/// A failure during teardown.
#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    /// The host's filter could not be looked up, so it was left in place.
    #[error("filter not resolved: {0}")]
    Resolve(#[source] AllocError),
    #[error(transparent)]
    Command(#[from] command::Error),
}

/// What a teardown managed to do. Teardown is best effort: failures are collected, not
/// returned.
#[derive(Debug, Default)]
pub struct RemoveReport {
    /// The class that was targeted, if any could be resolved.
    pub class_id: Option<ClassId>,
    pub filter_removed: bool,
    pub class_removed: bool,
    pub errors: Vec<RemoveError>,
}

impl RemoveReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Manages the classifiers on network interfaces through `tc`.
#[derive(Debug)]
pub struct ImpairmentController<E> {
    executor: E,
    pool: Range<u16>,
}

impl<E: Executor> ImpairmentController<E> {
    pub fn new(executor: E) -> Self {
        Self { executor, pool: DEFAULT_MINOR_POOL }
    }

    /// Set the range of class minors handed out by [`Self::find_or_allocate`].
    pub fn with_pool(mut self, pool: Range<u16>) -> Self {
        self.pool = pool;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Lists the u32 filters currently routing traffic into classes.
    pub fn list_filters(&self, interface: &str) -> Result<Vec<FilterEntry>, AllocError> {
        let output = self
            .executor
            .execute(&FilterShowRequest::new(interface).build())
            .map_err(|source| AllocError::Query { interface: interface.to_string(), source })?;

        parse_filter_listing(&output.stdout)
            .map_err(|source| AllocError::Listing { interface: interface.to_string(), source })
    }

    /// Returns the class id of the host's existing filter, or the first free class id of the
    /// pool.
    pub fn find_or_allocate(
        &self,
        interface: &str,
        host: &HostAddress,
    ) -> Result<Allocation, AllocError> {
        let entries = self.list_filters(interface)?;

        let in_use: BTreeSet<u16> = entries
            .iter()
            .filter(|entry| entry.class_id.major == ROOT_MAJOR)
            .map(|entry| entry.class_id.minor)
            .collect();

        // The last matching entry wins when a host has been routed more than once.
        if let Some(entry) = entries.iter().rev().find(|entry| entry.matches_host(host)) {
            tracing::debug!(
                %host,
                class_id = %entry.class_id,
                handle = ?entry.handle,
                "reusing classifier"
            );
            return Ok(Allocation {
                class_id: entry.class_id,
                handle: entry.handle.clone(),
                in_use,
            });
        }

        let class_id = generate_new_class_id(&in_use, self.pool.clone())
            .ok_or_else(|| AllocError::PoolExhausted { pool: self.pool.clone() })?;

        tracing::debug!(%host, %class_id, in_use = in_use.len(), "allocated classifier");

        Ok(Allocation { class_id, handle: None, in_use })
    }

    /// Creates the class, the filter and the netem qdisc impairing the host, stopping at the
    /// first failing step.
    pub fn apply(
        &self,
        interface: &str,
        class_id: ClassId,
        direction: Direction,
        host: &HostAddress,
        profile: &ImpairmentProfile,
    ) -> Result<(), ApplyError> {
        let steps = [
            (
                ApplyStep::Class,
                HtbClassRequest::new(interface, class_id, profile.rate_kbit).build(),
            ),
            (
                ApplyStep::Filter,
                U32FilterRequest::new(interface, class_id, direction, *host).build(),
            ),
            (ApplyStep::Netem, NetemQdiscRequest::new(interface, class_id, *profile).build()),
        ];

        for (step, cmd) in steps {
            tracing::info!(%cmd, "{step}");
            self.executor.execute(&cmd).map_err(|source| {
                tracing::error!(%cmd, ?source, "command failed");
                ApplyError { step, class_id, source }
            })?;
        }

        Ok(())
    }

    /// Removes the host's filter and class. The filter handle is only known to the kernel, so
    /// the filter table is queried again.
    ///
    /// `applied` is the class id used when applying. It is the class deleted when the host no
    /// longer shows up in the listing.
    pub fn remove(
        &self,
        interface: &str,
        host: &HostAddress,
        applied: Option<ClassId>,
    ) -> RemoveReport {
        let mut report = RemoveReport::default();

        let listed = match self.list_filters(interface) {
            Ok(entries) => entries.into_iter().rev().find(|entry| entry.matches_host(host)),
            Err(e) => {
                tracing::warn!(%host, ?e, "could not resolve filter, skipping filter deletion");
                report.errors.push(RemoveError::Resolve(e));
                None
            }
        };

        if let (Some(entry), Some(applied)) = (&listed, applied) {
            if entry.class_id != applied {
                tracing::warn!(
                    %host,
                    listed = %entry.class_id,
                    %applied,
                    "host is routed into a different class than applied"
                );
            }
        }

        if let Some(handle) = listed.as_ref().and_then(|entry| entry.handle.clone()) {
            let cmd = FilterDeleteRequest::new(interface, handle).build();
            tracing::info!(%cmd, "delete filter");
            match self.executor.execute(&cmd) {
                Ok(_) => report.filter_removed = true,
                Err(e) => {
                    tracing::warn!(%cmd, ?e, "failed to delete filter");
                    report.errors.push(e.into());
                }
            }
        }

        report.class_id = listed.map(|entry| entry.class_id).or(applied);

        if let Some(class_id) = report.class_id {
            let cmd = ClassDeleteRequest::new(interface, class_id).build();
            tracing::info!(%cmd, "delete class");
            match self.executor.execute(&cmd) {
                Ok(_) => report.class_removed = true,
                Err(e) => {
                    tracing::warn!(%cmd, ?e, "failed to delete class");
                    report.errors.push(e.into());
                }
            }
        }

        report
    }

    /// Installs the HTB root and parent class every classifier attaches to.
    pub fn bootstrap(&self, interface: &str, rate_kbit: u32) -> command::Result<()> {
        for cmd in HtbRootRequest::new(interface).with_rate(rate_kbit).build() {
            tracing::info!(%cmd, "bootstrap");
            self.executor.execute(&cmd)?;
        }

        Ok(())
    }
}
