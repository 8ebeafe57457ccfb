#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod command;
pub mod controller;
pub mod ip;
pub mod plan;
pub mod runner;
pub mod tc;

pub use controller::ImpairmentController;
pub use ip::{Direction, HostAddress};
pub use plan::{Category, ModuleSelector, PlanConfig, TestPlan};
pub use runner::{PlanRunner, RunReport, RunTarget};
