//! Parser for the text printed by `tc filter show dev <device>`.
//!
//! A u32 filter routing a host into a class is printed as
//!
//! ```text
//! filter parent 1: protocol ip pref 3 u32 chain 0 fh 800::800 order 2048 key ht 800 bkt 0 *flowid 1:a not_in_hw
//!   match c0a80102/ffffffff at 16
//!   match 00110000/00ff0000 at 8
//! ```
//!
//! Every entry starts at a line beginning with `filter`, followed by indented `match` lines.
//! Entries without a `flowid` (hash tables, chain headers) do not route anywhere and are
//! skipped. Entries of other filter kinds are kept without a handle, so the classes they
//! route into still count as taken.

use std::net::Ipv4Addr;

use crate::{
    ip::HostAddress,
    tc::handle::{ClassId, FilterHandle},
};

/// Byte offset of the IPv4 source address in the IP header.
const IPV4_SRC_OFFSET: u32 = 12;
/// Byte offset of the IPv4 destination address in the IP header.
const IPV4_DST_OFFSET: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListingError {
    #[error("malformed filter entry ({reason}): {entry}")]
    Malformed { entry: String, reason: &'static str },
}

/// Which address of the IPv4 header a filter matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchField {
    Source,
    Destination,
}

/// An exact match of a filter on one IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressMatch {
    pub address: Ipv4Addr,
    pub field: MatchField,
}

/// A filter that routes traffic into a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEntry {
    pub class_id: ClassId,
    /// The u32 `fh` handle. Always set when `matches` is not empty.
    pub handle: Option<FilterHandle>,
    pub matches: Vec<AddressMatch>,
}

impl FilterEntry {
    /// Returns `true` if this filter matches the host's address, in either direction.
    pub fn matches_host(&self, host: &HostAddress) -> bool {
        self.matches.iter().any(|m| m.address == host.addr())
    }
}

/// Parses the output of `tc filter show`. Empty output is an empty listing.
pub fn parse_filter_listing(text: &str) -> Result<Vec<FilterEntry>, ListingError> {
    let mut entries = Vec::new();
    let mut block: Option<Vec<&str>> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with("filter") {
            if let Some(lines) = block.replace(vec![line]) {
                entries.extend(parse_entry(&lines)?);
            }
            continue;
        }

        match block.as_mut() {
            Some(lines) if line.starts_with(char::is_whitespace) => lines.push(line),
            _ => {
                return Err(ListingError::Malformed {
                    entry: line.to_string(),
                    reason: "unexpected line outside of a filter entry",
                })
            }
        }
    }

    if let Some(lines) = block {
        entries.extend(parse_entry(&lines)?);
    }

    Ok(entries)
}

fn parse_entry(lines: &[&str]) -> Result<Option<FilterEntry>, ListingError> {
    let malformed = |reason| ListingError::Malformed { entry: lines.join("\n"), reason };

    let tokens: Vec<&str> = lines.iter().flat_map(|line| line.split_whitespace()).collect();
    let value_after = |key: &str| {
        tokens.iter().position(|t| *t == key).map(|i| tokens.get(i + 1).copied())
    };

    let class_id = match value_after("*flowid").or_else(|| value_after("flowid")) {
        None => return Ok(None),
        Some(None) => return Err(malformed("missing flowid value")),
        Some(Some(value)) => value.parse::<ClassId>().map_err(|_| malformed("invalid flowid"))?,
    };

    let matches: Vec<AddressMatch> =
        lines[1..].iter().filter_map(|line| parse_address_match(line)).collect();

    // Filters other than u32 (matchall, basic, route) print `handle` instead of `fh`. They
    // still occupy their class.
    let handle = match value_after("fh") {
        Some(Some(value)) => {
            Some(value.parse::<FilterHandle>().map_err(|_| malformed("invalid fh"))?)
        }
        Some(None) => return Err(malformed("missing fh")),
        None if !matches.is_empty() => return Err(malformed("missing fh")),
        None => None,
    };

    Ok(Some(FilterEntry { class_id, handle, matches }))
}

/// Parses `match <value>/<mask> at <offset>`, keeping exact IPv4 address matches only.
fn parse_address_match(line: &str) -> Option<AddressMatch> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "match" {
        return None;
    }

    let (value, mask) = tokens.next()?.split_once('/')?;
    if tokens.next()? != "at" {
        return None;
    }
    let offset: u32 = tokens.next()?.parse().ok()?;

    let field = match offset {
        IPV4_SRC_OFFSET => MatchField::Source,
        IPV4_DST_OFFSET => MatchField::Destination,
        _ => return None,
    };

    if u32::from_str_radix(mask, 16).ok()? != u32::MAX {
        return None;
    }
    let address = Ipv4Addr::from(u32::from_str_radix(value, 16).ok()?);

    Some(AddressMatch { address, field })
}
