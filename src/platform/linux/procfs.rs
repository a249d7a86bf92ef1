//! Reader for the IPv4 TCP socket table in procfs.

use crate::error::{Error, Result};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// TCP state code of an established connection in `/proc/net/tcp`.
const TCP_ESTABLISHED: &str = "01";

/// Remote addresses of the established connections listed in `/proc/net/tcp`.
///
/// Addresses are printed by the kernel as a native-endian hex word.
pub fn parse_established(text: &str) -> Result<Vec<Ipv4Addr>> {
    let mut remotes = Vec::new();
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        if fields[3] != TCP_ESTABLISHED {
            continue;
        }

        let (addr, _port) = fields[2].split_once(':').ok_or_else(|| Error::Parse {
            what: "/proc/net/tcp",
            detail: format!("bad address `{}`", fields[2]),
        })?;
        let raw = u32::from_str_radix(addr, 16).map_err(|_| Error::Parse {
            what: "/proc/net/tcp",
            detail: format!("bad address `{}`", addr),
        })?;
        remotes.push(Ipv4Addr::from(raw.to_ne_bytes()));
    }
    Ok(remotes)
}

pub fn read_established(proc_dir: &Path) -> Result<Vec<Ipv4Addr>> {
    parse_established(&fs::read_to_string(proc_dir.join("net/tcp"))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:0277 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1 1
   1: 0F02000A:0016 0101A8C0:D2F0 01 00000000:00000000 02:00000000 00000000     0        0 2 1
   2: 0F02000A:0016 0202A8C0:D2F1 06 00000000:00000000 00:00000000 00000000     0        0 3 1
";

    #[test]
    fn test_parse_established() {
        let remotes = parse_established(NET_TCP).unwrap();
        // Only the ESTABLISHED row; little-endian word 0101A8C0 is 192.168.1.1.
        if cfg!(target_endian = "little") {
            assert_eq!(remotes, vec![Ipv4Addr::new(192, 168, 1, 1)]);
        } else {
            assert_eq!(remotes.len(), 1);
        }
    }

    #[test]
    fn test_parse_established_rejects_bad_address() {
        let text = "header\n   0: 0F02000A:0016 ZZZZ:D2F0 01 0\n";
        assert!(parse_established(text).is_err());
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_established(dir.path()).is_err());
    }
}
