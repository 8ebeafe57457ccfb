//! Runs a [`TestPlan`] against one host: for every profile, allocate a classifier, apply the
//! profile, hold it, tear it down and pause before the next one.
//!
//! Everything is blocking and sequential. A run cannot be interrupted other than by
//! terminating the process, and two runs must never target the same interface at once since
//! they would race on class allocation.

use std::{thread, time::Duration};

use chrono::{DateTime, Local};

use crate::{
    command::Executor,
    controller::{ImpairmentController, RemoveReport},
    ip::{Direction, HostAddress},
    plan::{Category, ModuleSelector, PlannedProfile, TestPlan},
    tc::handle::ClassId,
};

/// Format of the timestamps in start and end log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Blocks the current thread. Replaced in tests to keep runs instantaneous.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps with [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Source of the timestamps written in the start and end log lines.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// What happened to a single profile.
#[derive(Debug)]
pub enum Outcome {
    /// The profile was applied, held and torn down.
    Completed { class_id: ClassId, teardown: RemoveReport },
    /// No classifier could be allocated; nothing was changed.
    AllocationFailed(String),
    /// A step of the apply sequence failed. `teardown` holds the rollback of partial state,
    /// if any was attempted.
    ApplyFailed { class_id: ClassId, error: String, teardown: Option<RemoveReport> },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug)]
pub struct ProfileOutcome {
    pub category: Category,
    pub label: String,
    pub outcome: Outcome,
}

/// Every profile attempted during a run, in order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<ProfileOutcome>,
}

impl RunReport {
    /// Number of profiles attempted in `category`, whatever their outcome.
    pub fn iterations(&self, category: Category) -> usize {
        self.outcomes.iter().filter(|o| o.category == category).count()
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    /// Categories in the order they ran.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.outcomes.iter().map(|o| o.category).collect();
        categories.dedup();
        categories
    }
}

/// Target of a run.
#[derive(Debug, Clone)]
pub struct RunTarget {
    pub host: HostAddress,
    pub interface: String,
    pub direction: Direction,
}

#[derive(Debug)]
pub struct PlanRunner<E, S = ThreadSleeper, C = SystemClock> {
    controller: ImpairmentController<E>,
    plan: TestPlan,
    sleeper: S,
    clock: C,
}

impl<E: Executor> PlanRunner<E> {
    pub fn new(controller: ImpairmentController<E>, plan: TestPlan) -> Self {
        Self { controller, plan, sleeper: ThreadSleeper, clock: SystemClock }
    }
}

impl<E: Executor, S: Sleeper, C: Clock> PlanRunner<E, S, C> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> PlanRunner<E, S2, C> {
        PlanRunner { controller: self.controller, plan: self.plan, sleeper, clock: self.clock }
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> PlanRunner<E, S, C2> {
        PlanRunner { controller: self.controller, plan: self.plan, sleeper: self.sleeper, clock }
    }

    pub fn controller(&self) -> &ImpairmentController<E> {
        &self.controller
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Runs the selected categories in order, holding every profile for `hold`.
    pub fn run(&self, target: &RunTarget, selector: ModuleSelector, hold: Duration) -> RunReport {
        let mut report = RunReport::default();

        for category in Category::ALL {
            if !selector.includes(category) {
                continue;
            }

            if !category.supports(target.direction) {
                tracing::info!(
                    %category,
                    direction = %target.direction,
                    "skipping {category} test, only run on download"
                );
                continue;
            }

            for planned in self.plan.profiles(category) {
                let outcome = self.run_profile(target, category, planned, hold);
                report.outcomes.push(ProfileOutcome {
                    category,
                    label: planned.label.clone(),
                    outcome,
                });
            }

            tracing::info!("{category} test completed.");
        }

        tracing::info!(
            completed = report.completed(),
            failed = report.failed(),
            "{selector} test completed."
        );

        report
    }

    fn run_profile(
        &self,
        target: &RunTarget,
        category: Category,
        planned: &PlannedProfile,
        hold: Duration,
    ) -> Outcome {
        let RunTarget { host, interface, direction } = target;

        let class_id = match self.controller.find_or_allocate(interface, host) {
            Ok(allocation) => allocation.class_id,
            Err(e) => {
                tracing::error!(
                    %host,
                    %interface,
                    "skipping {category} test with {}: {e}",
                    planned.label
                );
                return Outcome::AllocationFailed(e.to_string());
            }
        };

        tracing::info!(%class_id, "Running {category} test with {}", planned.label);

        if let Err(e) =
            self.controller.apply(interface, class_id, *direction, host, &planned.profile)
        {
            tracing::error!(
                %host,
                %interface,
                "{category} test with {} not applied: {e}",
                planned.label
            );

            // A failed class leaves nothing behind. Anything after it may have.
            let teardown =
                e.left_state().then(|| self.controller.remove(interface, host, Some(class_id)));

            return Outcome::ApplyFailed { class_id, error: e.to_string(), teardown };
        }

        self.log_time("Started", category, planned);
        self.sleeper.sleep(hold);
        self.log_time("Ended", category, planned);

        let teardown = self.controller.remove(interface, host, Some(class_id));

        tracing::info!("Wait {}s for the next set of tests", self.plan.pause.as_secs());
        self.sleeper.sleep(self.plan.pause);

        Outcome::Completed { class_id, teardown }
    }

    fn log_time(&self, action: &str, category: Category, planned: &PlannedProfile) {
        let now = self.clock.now().format(TIMESTAMP_FORMAT);
        tracing::info!("{action} {category} test with {} at {now}", planned.label);
    }
}
