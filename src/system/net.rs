//! Host and Address Discovery

use std::net::{IpAddr, Ipv4Addr};

use if_addrs::IfAddr;

use crate::error::{Error, Result};

/// Resolve this machine's hostname
pub fn this_hostname() -> Result<String> {
    hostname::get()
        .map_err(|e| Error::Network(format!("Cannot resolve self hostname: {}", e)))?
        .into_string()
        .map_err(|raw| Error::Network(format!("Hostname is not valid UTF-8: {:?}", raw)))
}

/// First non-loopback IPv4 address of this host
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let addrs = if_addrs::get_if_addrs()
        .map_err(|e| Error::Network(format!("Failed to list interfaces: {}", e)))?;

    addrs
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.addr {
            IfAddr::V4(addr) => Some(addr.ip),
            _ => None,
        })
        .ok_or_else(|| Error::Network("No non-loopback IPv4 address found".into()))
}

/// Resolve a DNS name; IPv4 addresses are ordered first
pub async fn lookup_host(name: &str) -> Result<Vec<IpAddr>> {
    let resolved = tokio::net::lookup_host((name, 0))
        .await
        .map_err(|e| Error::Network(format!("Lookup of {} failed: {}", name, e)))?;

    let mut addrs: Vec<IpAddr> = Vec::new();
    for addr in resolved {
        if !addrs.contains(&addr.ip()) {
            addrs.push(addr.ip());
        }
    }
    addrs.sort_by_key(|ip| !ip.is_ipv4());
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_this_hostname() {
        let name = this_hostname().unwrap();
        assert!(!name.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_literal_address() {
        let addrs = lookup_host("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn test_lookup_unknown_name() {
        assert!(lookup_host("no-such-host.invalid").await.is_err());
    }

    #[test]
    fn test_local_ipv4_is_not_loopback() {
        // Sandboxed hosts may only have a loopback interface
        if let Ok(ip) = local_ipv4() {
            assert!(!ip.is_loopback());
        }
    }
}
