//! Established TCP connections from watched networks.

use crate::check::Check;
use crate::config::{NetworkConfig, split_list};
use crate::error::Error;
use crate::platform::read_established;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An IPv4 network in CIDR notation, such as `192.168.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Option<Self> {
        (prefix <= 32).then_some(Self { addr, prefix })
    }

    fn mask(self) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0)
    }

    pub fn contains(self, addr: Ipv4Addr) -> bool {
        let mask = self.mask();
        u32::from(addr) & mask == u32::from(self.addr) & mask
    }
}

impl FromStr for Ipv4Net {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Parse {
            what: "network",
            detail: format!("`{}` is not an IPv4 network", s),
        };
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Ipv4Net::new(addr, prefix).ok_or_else(invalid)
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Alive while any established connection has its remote end in one of
/// the watched networks.
pub struct ConnectionsCheck {
    networks: Vec<Ipv4Net>,
    proc_dir: PathBuf,
}

impl ConnectionsCheck {
    /// Malformed networks are logged and skipped.
    pub fn from_config(config: Option<&NetworkConfig>, proc_dir: &Path) -> Self {
        let networks = config
            .map(|c| split_list(&c.connections))
            .into_iter()
            .flatten()
            .filter_map(|entry| match entry.parse::<Ipv4Net>() {
                Ok(net) => Some(net),
                Err(e) => {
                    log::warn!("connections: {}", e);
                    None
                }
            })
            .collect();
        Self {
            networks,
            proc_dir: proc_dir.to_path_buf(),
        }
    }

    pub fn networks(&self) -> &[Ipv4Net] {
        &self.networks
    }

    fn matches(&self, remotes: &[Ipv4Addr]) -> bool {
        remotes.iter().any(|remote| {
            let hit = self.networks.iter().find(|net| net.contains(*remote));
            if let Some(net) = hit {
                log::debug!("connections: {} is in {}", remote, net);
            }
            hit.is_some()
        })
    }
}

impl Check for ConnectionsCheck {
    fn name(&self) -> &str {
        "connections"
    }

    fn is_enabled(&self) -> bool {
        !self.networks.is_empty()
    }

    fn check_cycle(&mut self) -> bool {
        match read_established(&self.proc_dir) {
            Ok(remotes) => self.matches(&remotes),
            Err(e) => {
                log::warn!("connections: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(connections: &str) -> NetworkConfig {
        NetworkConfig {
            connections: connections.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_network() {
        let net: Ipv4Net = "192.168.1.0/24".parse().unwrap();
        assert_eq!(net.to_string(), "192.168.1.0/24");
        assert!("192.168.1.0".parse::<Ipv4Net>().is_err());
        assert!("192.168.1.0/33".parse::<Ipv4Net>().is_err());
        assert!("example.com/8".parse::<Ipv4Net>().is_err());
    }

    #[test]
    fn test_contains() {
        let net: Ipv4Net = "10.1.0.0/16".parse().unwrap();
        assert!(net.contains(Ipv4Addr::new(10, 1, 200, 3)));
        assert!(!net.contains(Ipv4Addr::new(10, 2, 0, 1)));

        let any: Ipv4Net = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(Ipv4Addr::new(8, 8, 8, 8)));

        let host: Ipv4Net = "10.0.0.1/32".parse().unwrap();
        assert!(host.contains(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!host.contains(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let check = ConnectionsCheck::from_config(
            Some(&config("192.168.1.0/24, bogus, 10.0.0.0/8")),
            Path::new("/proc"),
        );
        assert_eq!(check.networks().len(), 2);
        assert!(check.is_enabled());

        let empty = ConnectionsCheck::from_config(Some(&config(" , ")), Path::new("/proc"));
        assert!(!empty.is_enabled());
    }

    #[test]
    fn test_reads_proc_net_tcp() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("net")).unwrap();
        let remote = u32::from_ne_bytes(Ipv4Addr::new(192, 168, 1, 20).octets());
        fs::write(
            dir.path().join("net/tcp"),
            format!(
                "  sl  local_address rem_address   st\n   0: 0F02000A:0016 {:08X}:D2F0 01 0\n",
                remote
            ),
        )
        .unwrap();

        let mut inside = ConnectionsCheck::from_config(Some(&config("192.168.1.0/24")), dir.path());
        assert!(inside.check_cycle());

        let mut outside = ConnectionsCheck::from_config(Some(&config("10.0.0.0/8")), dir.path());
        assert!(!outside.check_cycle());
    }
}
