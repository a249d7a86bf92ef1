//! CPU load.

use crate::check::Check;
use crate::config::ProcessorConfig;
use sysinfo::System;

/// Alive while the average load or the load of any single CPU reaches its
/// threshold.
pub struct ProcessorCheck {
    total_load: Option<f64>,
    per_cpu_load: Option<f64>,
    system: System,
    calibrated: bool,
}

impl ProcessorCheck {
    pub fn from_config(config: Option<&ProcessorConfig>) -> Self {
        let config = config.cloned().unwrap_or_default();
        Self {
            total_load: config.total_load,
            per_cpu_load: config.per_cpu_load,
            system: System::new(),
            calibrated: false,
        }
    }

    /// Feed the busy percentage of every CPU. The first sample only
    /// calibrates, since usage is measured against the previous refresh.
    pub fn sample(&mut self, loads: &[f64]) -> bool {
        if !std::mem::replace(&mut self.calibrated, true) || loads.is_empty() {
            return false;
        }

        let average = loads.iter().sum::<f64>() / loads.len() as f64;
        let busiest = loads.iter().copied().fold(0.0, f64::max);
        log::debug!("processor: average {:.1}%, busiest {:.1}%", average, busiest);

        self.total_load.is_some_and(|limit| average >= limit)
            || self.per_cpu_load.is_some_and(|limit| busiest >= limit)
    }
}

impl Check for ProcessorCheck {
    fn name(&self) -> &str {
        "processor"
    }

    fn is_enabled(&self) -> bool {
        self.total_load.is_some() || self.per_cpu_load.is_some()
    }

    fn check_cycle(&mut self) -> bool {
        self.system.refresh_cpu_usage();
        let loads: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()))
            .collect();
        if loads.is_empty() {
            log::warn!("processor: no CPUs reported");
        }
        self.sample(&loads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(total_load: Option<f64>, per_cpu_load: Option<f64>) -> ProcessorCheck {
        let config = ProcessorConfig {
            total_load,
            per_cpu_load,
        };
        ProcessorCheck::from_config(Some(&config))
    }

    #[test]
    fn test_first_sample_calibrates() {
        let mut check = check(Some(10.0), None);
        assert!(!check.sample(&[100.0]));
        assert!(check.sample(&[100.0]));
    }

    #[test]
    fn test_thresholds() {
        // One CPU fully busy, one idle: average 50%.
        let loads = [100.0, 0.0];

        let mut average = check(Some(60.0), None);
        average.sample(&loads);
        assert!(!average.sample(&loads));

        let mut single = check(Some(60.0), Some(90.0));
        single.sample(&loads);
        assert!(single.sample(&loads));

        let mut exact = check(Some(50.0), None);
        exact.sample(&loads);
        assert!(exact.sample(&loads));
    }

    #[test]
    fn test_no_cpus_is_not_activity() {
        let mut check = check(Some(0.0), Some(0.0));
        check.sample(&[]);
        assert!(!check.sample(&[]));
    }

    #[test]
    fn test_enabled_by_any_threshold() {
        assert!(!check(None, None).is_enabled());
        assert!(check(Some(1.0), None).is_enabled());
        assert!(check(None, Some(1.0)).is_enabled());
        assert!(!ProcessorCheck::from_config(None).is_enabled());
    }

    #[test]
    fn test_reads_host_cpus() {
        // Any load reaches a zero threshold once calibrated.
        let mut check = check(Some(0.0), None);
        assert!(!check.check_cycle());
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        assert!(check.check_cycle());
    }
}
