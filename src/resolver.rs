use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use socket2::SockAddr;

use crate::error::ResolutionError;

/// Which address families a target may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStyle {
    /// First address the resolver returns, whatever its family.
    #[default]
    Any,
    Ipv4Only,
    Ipv6Only,
}

impl AddressStyle {
    /// Maps a pair of "force IPv4" / "force IPv6" switches to a style.
    /// Setting both (or neither) means any family.
    pub fn from_flags(force_ipv4: bool, force_ipv6: bool) -> Self {
        match (force_ipv4, force_ipv6) {
            (true, false) => AddressStyle::Ipv4Only,
            (false, true) => AddressStyle::Ipv6Only,
            _ => AddressStyle::Any,
        }
    }

    pub fn accepts(self, family: AddressFamily) -> bool {
        match self {
            AddressStyle::Any => true,
            AddressStyle::Ipv4Only => family == AddressFamily::V4,
            AddressStyle::Ipv6Only => family == AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressStyle::Any => write!(f, "any family"),
            AddressStyle::Ipv4Only => write!(f, "IPv4 only"),
            AddressStyle::Ipv6Only => write!(f, "IPv6 only"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::V4,
            SocketAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// A host to ping and the families it may resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub hostname: String,
    pub address_style: AddressStyle,
}

impl HostTarget {
    pub fn new(hostname: impl Into<String>, address_style: AddressStyle) -> Self {
        Self {
            hostname: hostname.into(),
            address_style,
        }
    }
}

/// The address a session pings, tagged with its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    addr: SocketAddr,
}

impl ResolvedAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr)
    }

    /// Raw socket address for the ICMP socket calls.
    pub fn to_sock_addr(&self) -> SockAddr {
        SockAddr::from(self.addr)
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_address(&self.addr))
    }
}

/// Numeric host string for an address, without any reverse lookup.
/// IPv6 scope ids are rendered as `%<index>`.
pub fn display_address(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) if v6.scope_id() != 0 => format!("{}%{}", v6.ip(), v6.scope_id()),
        SocketAddr::V6(v6) => v6.ip().to_string(),
    }
}

/// Resolves the target through the system resolver and picks one address.
pub async fn resolve(target: &HostTarget) -> Result<ResolvedAddress, ResolutionError> {
    let host = normalize_hostname(&target.hostname).ok_or(ResolutionError::EmptyHostname)?;

    // IP literals need no lookup
    if let Ok(ip) = host.parse::<IpAddr>() {
        return select_address(host, [SocketAddr::new(ip, 0)], target.address_style);
    }
    // ICMP has no ports; one given with a literal is carried along unused
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return select_address(host, [addr], target.address_style);
    }

    let candidates = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| unresolvable(host, e))?;
    select_address(host, candidates, target.address_style)
}

/// Picks the first candidate, in resolver order, that the style accepts.
pub fn select_address(
    host: &str,
    candidates: impl IntoIterator<Item = SocketAddr>,
    style: AddressStyle,
) -> Result<ResolvedAddress, ResolutionError> {
    let mut seen_any = false;
    for candidate in candidates {
        seen_any = true;
        if style.accepts(AddressFamily::of(&candidate)) {
            log::debug!("{host} resolved to {}", display_address(&candidate));
            return Ok(ResolvedAddress::new(candidate));
        }
    }

    if !seen_any {
        return Err(unresolvable(
            host,
            io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
        ));
    }
    Err(ResolutionError::NoAddressOfRequestedFamily {
        host: host.to_string(),
        style,
    })
}

fn unresolvable(host: &str, source: io::Error) -> ResolutionError {
    ResolutionError::HostUnresolvable {
        host: host.to_string(),
        source: Arc::new(source),
    }
}

/// Trims whitespace and the brackets around an IPv6 literal.
/// Returns None if nothing is left.
fn normalize_hostname(hostname: &str) -> Option<&str> {
    let trimmed = hostname.trim();
    let trimmed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
