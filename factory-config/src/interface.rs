// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Resolving `--interface` (§6): either a literal `ADDR/PREFIX` or an
//! interface name looked up via `nix::ifaddrs` — this runtime only ever
//! needs an IPv4 address and netmask, which `getifaddrs` already reports
//! without an extra crate.

use std::net::Ipv4Addr;

use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockaddrLike;

use crate::ConfigError;

/// Turn a `/`-prefix length into a dotted-quad netmask.
#[must_use]
pub fn prefix_to_netmask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let bits = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    Some(Ipv4Addr::from(bits))
}

/// Resolve `spec` (an interface name or `ADDR/PREFIX` literal) to an
/// `(address, netmask)` pair.
pub fn resolve(spec: &str) -> Result<(Ipv4Addr, Ipv4Addr), ConfigError> {
    if let Some((addr, prefix)) = spec.split_once('/') {
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| ConfigError::UnresolvableInterface(spec.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| ConfigError::UnresolvableInterface(spec.to_string()))?;
        let netmask =
            prefix_to_netmask(prefix).ok_or(ConfigError::InvalidPrefixLength(prefix))?;
        return Ok((addr, netmask));
    }
    resolve_by_name(spec)
}

fn resolve_by_name(name: &str) -> Result<(Ipv4Addr, Ipv4Addr), ConfigError> {
    for iface in getifaddrs()? {
        if iface.interface_name != name {
            continue;
        }
        let Some(address) = iface.address.as_ref().and_then(|a| a.as_sockaddr_in()) else {
            continue;
        };
        let Some(netmask) = iface.netmask.as_ref().and_then(|n| n.as_sockaddr_in()) else {
            continue;
        };
        return Ok((address.ip(), netmask.ip()));
    }
    Err(ConfigError::NoIpv4Address(name.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_addr_prefix_resolves_without_touching_the_network_stack() {
        let (addr, mask) = resolve("10.0.0.5/24").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(mask, Ipv4Addr::new(255, 255, 255, 0));
    }

    #[test]
    fn prefix_zero_is_the_all_zero_mask() {
        assert_eq!(prefix_to_netmask(0), Some(Ipv4Addr::new(0, 0, 0, 0)));
    }

    #[test]
    fn prefix_32_is_the_host_mask() {
        assert_eq!(prefix_to_netmask(32), Some(Ipv4Addr::new(255, 255, 255, 255)));
    }

    #[test]
    fn prefix_over_32_is_invalid() {
        assert_eq!(prefix_to_netmask(33), None);
    }

    #[test]
    fn unresolvable_name_is_reported() {
        let err = resolve("definitely-not-a-real-interface-name-xyz").unwrap_err();
        assert!(matches!(err, ConfigError::NoIpv4Address(_)));
    }
}
