use std::{cell::RefCell, net::Ipv4Addr, time::Duration};

use weaknet_sim::{
    command::Executor,
    plan::{Category, ModuleSelector, PlanConfig, TestPlan},
    runner::{Outcome, PlanRunner, RunTarget, Sleeper},
    tc::{ClassId, ImpairmentProfile},
    Direction, HostAddress, ImpairmentController,
};

mod fake_tc;

use fake_tc::FakeTc;

const DEVICE: &str = "eth1";

#[derive(Debug, Default)]
struct CountingSleeper(RefCell<Vec<Duration>>);

impl Sleeper for CountingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.borrow_mut().push(duration);
    }
}

fn host() -> HostAddress {
    "192.168.10.20".parse().unwrap()
}

fn target(direction: Direction) -> RunTarget {
    RunTarget { host: host(), interface: DEVICE.to_string(), direction }
}

fn runner<E: Executor>(executor: E) -> PlanRunner<E, CountingSleeper> {
    let _ = tracing_subscriber::fmt::try_init();
    PlanRunner::new(ImpairmentController::new(executor), TestPlan::default())
        .with_sleeper(CountingSleeper::default())
}

#[test]
fn apply_then_remove_leaves_no_classifier() {
    let tc = FakeTc::default().with_device(DEVICE).preload(
        DEVICE,
        ClassId::new(1, 10),
        Ipv4Addr::new(10, 0, 0, 9),
    );
    let controller = ImpairmentController::new(&tc);

    let allocation = controller.find_or_allocate(DEVICE, &host()).unwrap();
    assert_eq!(allocation.class_id, ClassId::new(1, 11));

    let profile = ImpairmentProfile::default().with_rate(500_000).with_loss(30);
    controller.apply(DEVICE, allocation.class_id, Direction::Download, &host(), &profile).unwrap();

    assert!(tc.class_ids(DEVICE).contains(&allocation.class_id));
    assert!(tc.filter_class_ids(DEVICE).contains(&allocation.class_id));
    assert_eq!(tc.qdisc_count(DEVICE), 1);

    // Applying again for the same host reuses the classifier.
    let again = controller.find_or_allocate(DEVICE, &host()).unwrap();
    assert_eq!(again.class_id, allocation.class_id);
    assert!(again.reused());

    let report = controller.remove(DEVICE, &host(), Some(allocation.class_id));
    assert!(report.is_clean());

    assert!(!tc.class_ids(DEVICE).contains(&allocation.class_id));
    assert!(!tc.filter_class_ids(DEVICE).contains(&allocation.class_id));
    assert_eq!(tc.qdisc_count(DEVICE), 0);

    // The foreign classifier is untouched.
    assert_eq!(tc.filter_class_ids(DEVICE), [ClassId::new(1, 10)]);
}

#[test]
fn full_run_on_download() {
    let tc = FakeTc::default().with_device(DEVICE);
    let runner = runner(&tc);

    let report =
        runner.run(&target(Direction::Download), ModuleSelector::All, Duration::from_secs(60));

    assert_eq!(report.iterations(Category::Loss), 7);
    assert_eq!(report.iterations(Category::LossDelay), 8);
    assert_eq!(report.iterations(Category::Jitter), 4);
    assert_eq!(report.iterations(Category::Rate), 3);
    assert_eq!(report.categories(), Category::ALL);
    assert_eq!(report.completed(), 22);

    // Every profile is torn down before the next one, so the first minor is always reused.
    assert!(report.outcomes.iter().all(|o| matches!(
        &o.outcome,
        Outcome::Completed { class_id, teardown }
            if *class_id == ClassId::new(1, 10) && teardown.is_clean()
    )));
    assert!(tc.class_ids(DEVICE).is_empty());
    assert!(tc.filter_class_ids(DEVICE).is_empty());

    // One hold and one pause per profile.
    assert_eq!(runner.sleeper().0.borrow().len(), 44);
}

#[test]
fn full_run_on_upload_skips_rate() {
    let tc = FakeTc::default().with_device("ifb0");
    let runner = runner(&tc);

    let target =
        RunTarget { host: host(), interface: "ifb0".to_string(), direction: Direction::Upload };
    let report = runner.run(&target, ModuleSelector::All, Duration::from_secs(1));

    assert_eq!(report.categories(), [Category::Loss, Category::LossDelay, Category::Jitter]);
    assert_eq!(report.iterations(Category::Rate), 0);
    assert_eq!(report.outcomes.len(), 19);

    assert!(tc.commands().iter().any(|c| c.contains("match ip src 192.168.10.20")));
    assert!(!tc.commands().iter().any(|c| c.contains("match ip dst")));
}

#[test]
fn single_module_runs_alone() {
    let tc = FakeTc::default().with_device(DEVICE);
    let report = runner(&tc).run(
        &target(Direction::Download),
        ModuleSelector::Only(Category::LossDelay),
        Duration::from_secs(1),
    );

    assert_eq!(report.categories(), [Category::LossDelay]);
    assert_eq!(report.outcomes.len(), 8);
    assert!(tc.commands().iter().any(|c| c.ends_with("netem delay 100ms 0ms loss 30% limit 2000")));
}

#[test]
fn failed_class_creation_skips_only_that_profile() {
    let tc = FakeTc::default().with_device(DEVICE).failing(&["class", "replace"]);
    let runner = runner(&tc);

    let report = runner.run(
        &target(Direction::Download),
        ModuleSelector::Only(Category::Rate),
        Duration::from_secs(1),
    );

    assert_eq!(report.iterations(Category::Rate), 3);
    assert_eq!(report.completed(), 0);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.outcome, Outcome::ApplyFailed { teardown: None, .. })));

    // Neither the filter nor the netem qdisc were attempted, and nothing was held or removed.
    assert!(!tc.commands().iter().any(|c| c.contains("filter add") || c.contains("qdisc add")));
    assert!(!tc.commands().iter().any(|c| c.contains(" del ")));
    assert!(runner.sleeper().0.borrow().is_empty());
}

#[test]
fn failed_netem_rolls_back_partial_state() {
    let tc = FakeTc::default().with_device(DEVICE).failing(&["qdisc", "add"]);
    let runner = runner(&tc);

    let report = runner.run(
        &target(Direction::Download),
        ModuleSelector::Only(Category::Jitter),
        Duration::from_secs(1),
    );

    assert_eq!(report.completed(), 0);
    for outcome in &report.outcomes {
        let Outcome::ApplyFailed { teardown: Some(teardown), .. } = &outcome.outcome else {
            panic!("expected a rolled back apply failure, got {outcome:?}");
        };
        assert!(teardown.filter_removed && teardown.class_removed);
    }
    assert!(tc.class_ids(DEVICE).is_empty());
    assert!(tc.filter_class_ids(DEVICE).is_empty());
}

#[test]
fn query_failure_skips_profiles() {
    // The device does not exist, so listing filters fails.
    let tc = FakeTc::default();
    let report = runner(&tc).run(
        &target(Direction::Download),
        ModuleSelector::Only(Category::Loss),
        Duration::from_secs(1),
    );

    assert_eq!(report.iterations(Category::Loss), 7);
    assert!(report.outcomes.iter().all(|o| matches!(o.outcome, Outcome::AllocationFailed(_))));
    assert!(tc.commands().iter().all(|c| c == "tc filter show dev eth1"));
}

#[test]
fn custom_plan_from_toml() {
    let config = PlanConfig::from_toml(
        r#"
        pause_secs = 2
        loss = [1, 2]
        loss_delay = []
        jitter_ms = []
        rate_kbit = [128]
        "#,
    )
    .unwrap();
    let plan = TestPlan::from_config(&config).unwrap();

    let tc = FakeTc::default().with_device(DEVICE);
    let runner = PlanRunner::new(ImpairmentController::new(&tc), plan)
        .with_sleeper(CountingSleeper::default());
    let report =
        runner.run(&target(Direction::Download), ModuleSelector::All, Duration::from_secs(3));

    assert_eq!(report.categories(), [Category::Loss, Category::Rate]);
    assert_eq!(report.completed(), 3);
    assert_eq!(*runner.sleeper().0.borrow(), [3, 2, 3, 2, 3, 2].map(Duration::from_secs));
    assert!(tc.commands().iter().any(|c| c.ends_with("htb rate 128kbit")));
}
