use std::{fmt, net::Ipv4Addr, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{0} is not a valid IP address")]
    InvalidHost(String),
    #[error("direction must be 'up' or 'down', got '{0}'")]
    InvalidDirection(String),
}

/// Returns `true` if `addr` is a dotted-quad IPv4 address the way operators write them:
/// four decimal octets in 0-255 without leading zeros, the first one non-zero.
pub fn check_ip(addr: &str) -> bool {
    let octets: Vec<&str> = addr.split('.').collect();
    if octets.len() != 4 {
        return false;
    }

    octets.iter().enumerate().all(|(i, octet)| {
        let well_formed = !octet.is_empty()
            && octet.len() <= 3
            && octet.bytes().all(|b| b.is_ascii_digit())
            && !(octet.len() > 1 && octet.starts_with('0'));

        match octet.parse::<u8>() {
            Ok(value) if well_formed => i > 0 || value != 0,
            _ => false,
        }
    })
}

/// The validated IPv4 address of the host whose traffic is impaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddress(Ipv4Addr);

impl HostAddress {
    pub fn addr(&self) -> Ipv4Addr {
        self.0
    }

    /// The address as eight lowercase hex digits, which is how `tc` prints u32 matches.
    pub fn to_hex(&self) -> String {
        format!("{:08x}", u32::from(self.0))
    }
}

impl FromStr for HostAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !check_ip(s) {
            return Err(Error::InvalidHost(s.to_string()));
        }
        s.parse().map(Self).map_err(|_| Error::InvalidHost(s.to_string()))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which way the impaired traffic flows relative to the test host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Traffic sent by the host. Matched on the IPv4 source address.
    Upload,
    /// Traffic sent to the host. Matched on the IPv4 destination address.
    Download,
}

impl Direction {
    /// The `tc u32` selector keyword for this direction.
    pub fn match_selector(self) -> &'static str {
        match self {
            Self::Upload => "src",
            Self::Download => "dst",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Upload),
            "down" => Ok(Self::Download),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("up"),
            Self::Download => f.write_str("down"),
        }
    }
}
