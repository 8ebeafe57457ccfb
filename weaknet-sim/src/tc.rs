//! # Traffic Control Utilities
//!
//! This module builds the `tc` invocations used to impair traffic of a single host, and parses
//! what `tc` reports back.
//!
//! ## Hierarchy
//!
//! Impairments hang off an HTB hierarchy that is expected to exist on the interface (or is
//! installed with [`requests::HtbRootRequest`]):
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    HTB root qdisc (1:0)                   │
//! │  u32 filters, prio 3: match ip src|dst <host>, proto 17   │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                ┌──────────────────────────┐
//!                │  HTB parent class 1:1    │
//!                └──────────────────────────┘
//!                              │
//!            ┌─────────────────┴─────────────────┐
//!            ▼                                   ▼
//! ┌──────────────────────┐            ┌──────────────────────┐
//! │  Class 1:a           │            │  Class 1:b           │
//! │  htb rate <R>kbit    │            │  htb rate <R>kbit    │
//! └──────────────────────┘            └──────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌──────────────────────┐            ┌──────────────────────┐
//! │  Netem (14:0)        │            │  Netem (15:0)        │
//! │  delay, jitter, loss │            │  delay, jitter, loss │
//! └──────────────────────┘            └──────────────────────┘
//! ```
//!
//! ## Handle Numbering Scheme
//!
//! Handles use tc's hexadecimal notation. For a class with minor `N` allocated from
//! [`handle::DEFAULT_MINOR_POOL`]:
//!
//! | Component        | Handle          | Example (N=10) |
//! |------------------|-----------------|----------------|
//! | HTB root         | `1:0`           | `1:`           |
//! | Parent class     | `1:1`           | `1:1`          |
//! | Impaired class   | `1:N`           | `1:a`          |
//! | Netem qdisc      | `(N+10):0`      | `14:`          |
//!
//! Deleting a class also deletes the netem qdisc attached to it, so teardown only has to
//! remove the filter and the class.

pub mod handle;
pub mod impairment;
pub mod listing;
pub mod requests;

pub use handle::{ClassId, FilterHandle};
pub use impairment::ImpairmentProfile;
pub use listing::{AddressMatch, FilterEntry, MatchField, parse_filter_listing};

/// Program name of the traffic control tool.
pub const TC: &str = "tc";
