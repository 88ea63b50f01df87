//! Utility functions for Kandalf
//!
//! Local address discovery and configuration value parsing.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

use crate::error::ResolutionError;

/// Source of network interfaces and their bound addresses
///
/// Interfaces are reported in system enumeration order. Reading the
/// addresses of a single interface may fail independently of the others.
pub trait InterfaceSource {
    /// Names of the local interfaces, in enumeration order
    fn interfaces(&self) -> io::Result<Vec<String>>;

    /// Addresses bound to the named interface
    fn addresses(&self, interface: &str) -> io::Result<Vec<IpAddr>>;
}

/// Interfaces of the running host, captured through `if-addrs`
pub struct SystemInterfaces {
    entries: Vec<if_addrs::Interface>,
}

impl SystemInterfaces {
    pub fn load() -> io::Result<Self> {
        Ok(Self {
            entries: if_addrs::get_if_addrs()?,
        })
    }
}

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for iface in &self.entries {
            if !names.contains(&iface.name) {
                names.push(iface.name.clone());
            }
        }
        Ok(names)
    }

    fn addresses(&self, interface: &str) -> io::Result<Vec<IpAddr>> {
        Ok(self
            .entries
            .iter()
            .filter(|iface| iface.name == interface)
            .map(|iface| iface.ip())
            .collect())
    }
}

/// Find the first address bound to any local interface
///
/// Interfaces are visited in enumeration order and the first address of the
/// first interface that has one wins. An interface whose addresses cannot be
/// read is skipped.
pub fn resolve_local_address_from<S: InterfaceSource>(
    source: &S,
) -> Result<String, ResolutionError> {
    let interfaces = source.interfaces().map_err(ResolutionError::Enumerate)?;

    for name in interfaces {
        let addrs = match source.addresses(&name) {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(interface = %name, error = %e, "Skipping interface with unreadable addresses");
                continue;
            }
        };

        if let Some(addr) = addrs
            .iter()
            .map(|ip| ip.to_string())
            .find(|addr| !addr.is_empty())
        {
            debug!(interface = %name, addr = %addr, "Resolved local address");
            return Ok(addr);
        }
    }

    Err(ResolutionError::NoAddress)
}

/// Find the first address bound to any interface of this host
pub fn resolve_local_address() -> Result<String, ResolutionError> {
    let source = SystemInterfaces::load().map_err(ResolutionError::Enumerate)?;
    resolve_local_address_from(&source)
}

/// Parse a Go-style duration string such as `"10s"`, `"1m30s"` or `"1.5h"`
///
/// Supported units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"`
/// is accepted; any other number without a unit is rejected.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut rest = s;
    let mut total_nanos = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];

        total_nanos += value * unit_nanos;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }

    Some(Duration::from_nanos(total_nanos as u64))
}
