//! Local network address discovery for building share URLs.

use std::net::{IpAddr, Ipv4Addr};

use get_if_addrs::{get_if_addrs, IfAddr};
use tracing::{debug, warn};

/// Host used when no LAN address can be found.
pub const FALLBACK_HOST: &str = "localhost";

/// Source of the host part of share URLs.
///
/// Resolution happens every time a URL is built, since the machine may have
/// joined or left a network between two shares.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self) -> String;
}

/// Resolves the address from the machine's network interfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceResolver;

impl AddressResolver for InterfaceResolver {
    fn resolve(&self) -> String {
        resolve_local_address()
    }
}

/// Always resolves to the same host.
#[derive(Debug, Clone)]
pub struct StaticResolver(pub String);

impl AddressResolver for StaticResolver {
    fn resolve(&self) -> String {
        self.0.clone()
    }
}

/// Return the first non-loopback IPv4 address of this machine, or
/// [`FALLBACK_HOST`] when there is none.
pub fn resolve_local_address() -> String {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to list network interfaces");
            return FALLBACK_HOST.to_string();
        }
    };

    let addrs: Vec<IpAddr> = interfaces
        .iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| match &iface.addr {
            IfAddr::V4(v4) => IpAddr::V4(v4.ip),
            IfAddr::V6(v6) => IpAddr::V6(v6.ip),
        })
        .collect();

    match first_lan_ipv4(&addrs) {
        Some(ip) => {
            debug!(%ip, "Resolved local address");
            ip.to_string()
        }
        None => {
            debug!("No LAN IPv4 address found, using {}", FALLBACK_HOST);
            FALLBACK_HOST.to_string()
        }
    }
}

/// Pick the first IPv4 address that is neither loopback nor unspecified.
pub fn first_lan_ipv4(addrs: &[IpAddr]) -> Option<Ipv4Addr> {
    addrs.iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(*v4),
        _ => None,
    })
}
