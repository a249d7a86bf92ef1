//! Network throughput.

use crate::check::Check;
use crate::config::{NetworkConfig, Rate};
use std::time::Instant;
use sysinfo::Networks;

/// Byte counters summed over the non-loopback interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl NetCounters {
    /// Totals since boot over every interface of `networks` but `lo`.
    pub fn from_networks(networks: &Networks) -> Self {
        networks
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold(Self::default(), |acc, (_, data)| Self {
                rx_bytes: acc.rx_bytes.saturating_add(data.total_received()),
                tx_bytes: acc.tx_bytes.saturating_add(data.total_transmitted()),
            })
    }
}

/// Alive while the download or upload rate reaches its threshold.
///
/// Rates are averaged over the time between two cycles, summed over every
/// interface except loopback.
pub struct NetworkCheck {
    download: Option<Rate>,
    upload: Option<Rate>,
    networks: Networks,
    previous: Option<(NetCounters, Instant)>,
}

impl NetworkCheck {
    pub fn from_config(config: Option<&NetworkConfig>) -> Self {
        Self {
            download: config.and_then(|c| c.download_speed),
            upload: config.and_then(|c| c.upload_speed),
            networks: Networks::new(),
            previous: None,
        }
    }

    /// Feed the counters read at `now`. The first sample only calibrates.
    pub fn sample(&mut self, counters: NetCounters, now: Instant) -> bool {
        let Some((before, then)) = self.previous.replace((counters, now)) else {
            return false;
        };
        let elapsed = now.saturating_duration_since(then).as_secs_f64();
        if elapsed <= 0.0 {
            return false;
        }

        // Counters restart when an interface goes away.
        let rx = counters.rx_bytes.saturating_sub(before.rx_bytes) as f64 / elapsed;
        let tx = counters.tx_bytes.saturating_sub(before.tx_bytes) as f64 / elapsed;
        log::debug!("network: down {:.0} B/s, up {:.0} B/s", rx, tx);

        self.download.is_some_and(|limit| rx >= limit.bytes_per_sec())
            || self.upload.is_some_and(|limit| tx >= limit.bytes_per_sec())
    }
}

impl Check for NetworkCheck {
    fn name(&self) -> &str {
        "network"
    }

    fn is_enabled(&self) -> bool {
        self.download.is_some() || self.upload.is_some()
    }

    fn check_cycle(&mut self) -> bool {
        // Interfaces come and go, so the list is rebuilt every cycle.
        self.networks.refresh_list();
        let counters = NetCounters::from_networks(&self.networks);
        self.sample(counters, Instant::now())
    }
}
