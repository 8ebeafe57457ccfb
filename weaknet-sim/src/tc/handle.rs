//! TC handle computation.
//!
//! TC handles are 32-bit values split into major:minor (16:16 bits) and written by `tc` in
//! hexadecimal, e.g. `1:a` for major 1, minor 10.

use std::{collections::BTreeSet, fmt, ops::Range, str::FromStr};

/// Major number of the HTB root qdisc and of every class below it.
pub const ROOT_MAJOR: u16 = 1;

/// Minor of the HTB class all impaired classes attach to (`1:1`).
pub const PARENT_CLASS_MINOR: u16 = 1;

/// Offset added to a class minor to compute the major of its netem qdisc.
pub const NETEM_MAJOR_OFFSET: u16 = 10;

/// Class minors handed out by the allocator, end exclusive.
pub const DEFAULT_MINOR_POOL: Range<u16> = 10..100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tc handle: {0}")]
pub struct ParseHandleError(pub String);

/// A `major:minor` class identifier. Pairs a traffic class with the filter routing into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId {
    pub major: u16,
    pub minor: u16,
}

impl ClassId {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// The class every impaired class is created under.
    pub const fn parent() -> Self {
        Self::new(ROOT_MAJOR, PARENT_CLASS_MINOR)
    }

    /// The handle of the netem qdisc attached to this class, e.g. `14:` for `1:a`.
    pub const fn netem_handle(&self) -> QdiscHandle {
        QdiscHandle(self.minor + NETEM_MAJOR_OFFSET)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.major, self.minor)
    }
}

impl FromStr for ClassId {
    type Err = ParseHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseHandleError(s.to_string());

        let (major, minor) = s.split_once(':').ok_or_else(err)?;
        let parse = |part: &str| match part {
            "" => Ok(0),
            part => u16::from_str_radix(part, 16).map_err(|_| err()),
        };

        Ok(Self { major: parse(major)?, minor: parse(minor)? })
    }
}

/// A qdisc handle `major:`. Qdisc handles always have a zero minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QdiscHandle(pub u16);

impl fmt::Display for QdiscHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:", self.0)
    }
}

/// A kernel-assigned u32 filter handle as printed by `tc filter show`, e.g. `800::800`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterHandle(String);

impl FilterHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FilterHandle {
    type Err = ParseHandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty() && s.chars().all(|c| c == ':' || c.is_ascii_hexdigit());
        if !valid {
            return Err(ParseHandleError(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the first class under [`ROOT_MAJOR`] whose minor is in `pool` and not in `in_use`,
/// scanning in ascending order. `None` if the pool is exhausted.
///
/// Minors are plain numbers; `tc` prints them in hex, so minor 13 is written `1:d`.
pub fn generate_new_class_id(in_use: &BTreeSet<u16>, mut pool: Range<u16>) -> Option<ClassId> {
    pool.find(|minor| !in_use.contains(minor)).map(|minor| ClassId::new(ROOT_MAJOR, minor))
}
