#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Command line front end of `weaknet`. Parses arguments, picks the executor and runs the
//! plan with [`weaknet_sim::PlanRunner`].

mod cli;

pub use cli::Cli;

use anyhow::Context;
use weaknet_sim::{
    command::{DryRunExecutor, Executor, SystemExecutor},
    ImpairmentController, PlanRunner, RunReport,
};

/// Runs the plan described by `cli`.
///
/// Only configuration errors and a failed bootstrap are returned. Failures of single
/// profiles are logged and collected in the report.
pub fn run(cli: &Cli) -> anyhow::Result<RunReport> {
    let plan = cli.load_plan()?;

    let executor: Box<dyn Executor> = if cli.dry_run {
        Box::new(DryRunExecutor)
    } else {
        Box::new(SystemExecutor::new().with_sudo(!cli.no_sudo).with_tc_bin(&cli.tc_bin))
    };

    let controller = ImpairmentController::new(executor);
    let target = cli.target();

    if cli.bootstrap {
        controller
            .bootstrap(&target.interface, cli.root_rate_kbit)
            .with_context(|| format!("failed to bootstrap {}", target.interface))?;
    }

    tracing::info!(
        host = %target.host,
        interface = %target.interface,
        direction = %target.direction,
        module = %cli.module,
        hold_secs = cli.hold_secs,
        "weaknet starting"
    );

    Ok(PlanRunner::new(controller, plan).run(&target, cli.module, cli.hold()))
}
