//! The built-in checks and their registry.

pub mod connections;
pub mod input;
pub mod kick;
pub mod network;
pub mod processes;
pub mod processor;

pub use connections::{ConnectionsCheck, Ipv4Net};
pub use input::InputCheck;
pub use kick::{DEFAULT_KICK_FILE, KickCheck};
pub use network::{NetCounters, NetworkCheck};
pub use processes::ProcessesCheck;
pub use processor::ProcessorCheck;

use crate::check::Check;
use crate::config::{Config, InputConfig, split_list};
use crate::device::{DeviceClass, DeviceEnumerator};
use crate::hotplug::HotplugWatcher;
use crate::platform::PROC_DIR;
use crate::poll::PollManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared resources the checks are built from.
pub struct CheckContext {
    pub poll: PollManager,
    /// Device change notifications for the input checks, if available.
    pub hotplug: Option<HotplugWatcher>,
    pub enumerator: Arc<dyn DeviceEnumerator>,
    /// Root of the proc filesystem.
    pub proc_dir: PathBuf,
}

impl CheckContext {
    pub fn new(poll: PollManager, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            poll,
            hotplug: None,
            enumerator,
            proc_dir: PathBuf::from(PROC_DIR),
        }
    }

    pub fn with_hotplug(mut self, watcher: HotplugWatcher) -> Self {
        self.hotplug = Some(watcher);
        self
    }

    pub fn with_proc_dir(mut self, proc_dir: impl Into<PathBuf>) -> Self {
        self.proc_dir = proc_dir.into();
        self
    }
}

/// Build every check, in a fixed order, from `config`.
///
/// Checks whose section is missing are still built and report themselves
/// disabled.
pub fn build_checks(config: &Config, ctx: &CheckContext) -> Vec<Box<dyn Check>> {
    let mut checks: Vec<Box<dyn Check>> = Vec::new();

    for (class, section) in [
        (DeviceClass::Keyboard, config.keyboard.as_ref()),
        (DeviceClass::Mouse, config.mouse.as_ref()),
    ] {
        let check = InputCheck::from_config(class, section, ctx.poll.clone(), ctx.enumerator.clone());
        if let Some(watcher) = &ctx.hotplug {
            check.subscribe(watcher);
        }
        checks.push(Box::new(check));
    }

    checks.push(Box::new(ProcessorCheck::from_config(config.processor.as_ref())));
    checks.push(Box::new(NetworkCheck::from_config(config.network.as_ref())));
    checks.push(Box::new(ConnectionsCheck::from_config(
        config.network.as_ref(),
        &ctx.proc_dir,
    )));
    checks.push(Box::new(ProcessesCheck::from_config(config.processes.as_ref())));
    checks.push(Box::new(KickCheck::from_config(config.kick.as_ref())));

    for check in &checks {
        log::info!(
            "check {}: {}",
            check.name(),
            if check.is_enabled() { "enabled" } else { "disabled" }
        );
    }
    checks
}

/// Names of the checks [`build_checks`] would create, in the same order,
/// with whether their configuration enables them.
///
/// Nothing is opened or sampled. An input check counts as enabled when
/// its section names at least one device; whether any of them can be
/// opened is only known once the monitor starts.
pub fn configured_checks(config: &Config) -> Vec<(&'static str, bool)> {
    let input = |section: Option<&InputConfig>| {
        section.is_some_and(|s| !s.devices.entries().is_empty())
    };
    let network = config.network.as_ref();
    vec![
        (DeviceClass::Keyboard.as_str(), input(config.keyboard.as_ref())),
        (DeviceClass::Mouse.as_str(), input(config.mouse.as_ref())),
        (
            "processor",
            config
                .processor
                .as_ref()
                .is_some_and(|p| p.total_load.is_some() || p.per_cpu_load.is_some()),
        ),
        (
            "network",
            network.is_some_and(|n| n.download_speed.is_some() || n.upload_speed.is_some()),
        ),
        (
            "connections",
            ConnectionsCheck::from_config(network, Path::new(PROC_DIR)).is_enabled(),
        ),
        (
            "processes",
            config
                .processes
                .as_ref()
                .is_some_and(|p| split_list(&p.processes).next().is_some()),
        ),
        ("kick", true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SysfsEnumerator;

    #[test]
    fn test_registry_order_and_defaults() {
        let proc_dir = tempfile::tempdir().unwrap();
        let config = Config::parse("[general]\nperiod = 1\nidle_time = 1\n").unwrap();
        let ctx = CheckContext::new(
            PollManager::new().unwrap(),
            Arc::new(SysfsEnumerator::with_dirs("/nonexistent/sys", "/nonexistent/dev")),
        )
        .with_proc_dir(proc_dir.path());

        let checks = build_checks(&config, &ctx);
        let names: Vec<_> = checks.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "keyboard",
                "mouse",
                "processor",
                "network",
                "connections",
                "processes",
                "kick"
            ]
        );

        // Only the kick check runs without configuration.
        let enabled: Vec<_> = checks
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(enabled, vec!["kick"]);
    }

    #[test]
    fn test_configured_checks_match_registry() {
        let config = Config::parse(
            "[general]\nperiod = 1\nidle_time = 1\n\
             [keyboard]\ndevices = \"auto\"\n\
             [network]\nupload_speed = \"1K\"\nconnections = \"bogus\"\n\
             [processes]\nprocesses = \"rsync\"\n",
        )
        .unwrap();
        let configured = configured_checks(&config);
        let names: Vec<_> = configured.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "keyboard",
                "mouse",
                "processor",
                "network",
                "connections",
                "processes",
                "kick"
            ]
        );
        let enabled: Vec<_> = configured
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(enabled, vec!["keyboard", "network", "processes", "kick"]);
    }
}
