//! Configuration file loading.
//!
//! The configuration is a TOML file, `/etc/kam/kam.toml` by default. Only
//! the `[general]` section is required; every check reads its own optional
//! section and stays disabled when it is absent.
//!
//! ```toml
//! [general]
//! period = 10
//! idle_time = 15
//! idle_command = "shutdown -h now"
//!
//! [keyboard]
//! devices = "auto"
//!
//! [network]
//! download_speed = "10K"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kam/kam.toml";

/// Split a comma separated list, trimming entries and skipping empty ones.
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keyboard: Option<InputConfig>,
    #[serde(default)]
    pub mouse: Option<InputConfig>,
    #[serde(default)]
    pub processor: Option<ProcessorConfig>,
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub processes: Option<ProcessesConfig>,
    #[serde(default)]
    pub kick: Option<KickConfig>,
}

/// `[general]`: scheduling and the idle action.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Polling period in seconds.
    pub period: u64,
    /// Minutes without activity before the idle command runs.
    pub idle_time: u64,
    #[serde(default)]
    pub idle_command: Option<String>,
    /// Stop monitoring once the idle command has run.
    #[serde(default)]
    pub exit_after_idle_command: bool,
    /// Long-running process whose output signals device hot-plug.
    #[serde(default = "default_hotplug_command")]
    pub hotplug_command: Vec<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// JSON-lines file receiving one record per polling cycle.
    #[serde(default)]
    pub trace_file: Option<PathBuf>,
}

fn default_hotplug_command() -> Vec<String> {
    vec!["udevadm".to_string(), "monitor".to_string()]
}

/// `[keyboard]` / `[mouse]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub devices: DeviceList,
}

/// One entry of a device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEntry {
    /// Every device of the class found in the input registry.
    Auto,
    /// A device identifier (`event3`) or a path (`/dev/input/event3`).
    Named(String),
}

/// A comma separated device list such as `"auto, event7"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct DeviceList(Vec<DeviceEntry>);

impl DeviceList {
    pub fn parse(list: &str) -> Self {
        DeviceList(
            split_list(list)
                .map(|item| {
                    if item == "auto" {
                        DeviceEntry::Auto
                    } else {
                        DeviceEntry::Named(item.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for DeviceList {
    fn from(list: String) -> Self {
        DeviceList::parse(&list)
    }
}

/// `[processor]`: load thresholds in percent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorConfig {
    /// Average load over all CPUs.
    #[serde(default)]
    pub total_load: Option<f64>,
    /// Load of any single CPU.
    #[serde(default)]
    pub per_cpu_load: Option<f64>,
}

/// `[network]`: throughput thresholds and watched networks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub download_speed: Option<Rate>,
    #[serde(default)]
    pub upload_speed: Option<Rate>,
    /// Comma separated IPv4 networks in CIDR notation.
    #[serde(default)]
    pub connections: String,
}

/// `[processes]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessesConfig {
    /// Comma separated process names.
    #[serde(default)]
    pub processes: String,
    /// Minimum instance count per process name (default 1).
    #[serde(default)]
    pub min_count: HashMap<String, u32>,
}

/// `[kick]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KickConfig {
    /// Comma separated marker files.
    #[serde(default)]
    pub files: String,
}

/// A byte rate in bytes per second.
///
/// Accepts plain numbers or strings with a `K` (1024) or `M` (1024 * 1024)
/// suffix.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RateValue")]
pub struct Rate(f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RateValue {
    Number(f64),
    Text(String),
}

impl TryFrom<RateValue> for Rate {
    type Error = String;

    fn try_from(value: RateValue) -> std::result::Result<Self, Self::Error> {
        match value {
            RateValue::Number(n) => Rate::new(n),
            RateValue::Text(s) => Rate::parse(&s),
        }
    }
}

impl Rate {
    fn new(bytes_per_sec: f64) -> std::result::Result<Self, String> {
        if bytes_per_sec.is_finite() && bytes_per_sec >= 0.0 {
            Ok(Rate(bytes_per_sec))
        } else {
            Err(format!("invalid rate {}", bytes_per_sec))
        }
    }

    /// Parse `"512"`, `"10K"` or `"1.5M"`.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        let (number, multiplier) = match text.chars().last() {
            Some('K') => (&text[..text.len() - 1], 1024.0),
            Some('M') => (&text[..text.len() - 1], 1024.0 * 1024.0),
            Some(_) => (text, 1.0),
            None => return Err("empty rate".to_string()),
        };
        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid rate `{}`", text))?;
        Rate::new(value * multiplier)
    }

    pub fn bytes_per_sec(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B/s", self.0)
    }
}

impl Config {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.general.period == 0 {
            return Err(Error::Config("general.period must be at least 1 second".into()));
        }
        if self.general.idle_time == 0 {
            return Err(Error::Config("general.idle_time must be at least 1 minute".into()));
        }
        if self.general.hotplug_command.is_empty() {
            return Err(Error::Config("general.hotplug_command must not be empty".into()));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.general.period)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.general.idle_time * 60)
    }

    /// The idle command, ignoring blank strings.
    pub fn idle_command(&self) -> Option<&str> {
        self.general
            .idle_command
            .as_deref()
            .map(str::trim)
            .filter(|cmd| !cmd.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[general]
period = 10
idle_time = 15
idle_command = "shutdown -h now"
exit_after_idle_command = true
trace_file = "/tmp/kam.trace"

[keyboard]
devices = "auto"

[mouse]
devices = "auto, event7, /dev/input/event9"

[processor]
total_load = 50
per_cpu_load = 40.5

[network]
download_speed = "10K"
upload_speed = 2048
connections = "192.168.1.0/24, 10.0.0.0/8"

[processes]
processes = "sshd, rsync"
min_count = { sshd = 2 }

[kick]
files = "/run/kam/kick"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.period(), Duration::from_secs(10));
        assert_eq!(config.idle_timeout(), Duration::from_secs(15 * 60));
        assert_eq!(config.idle_command(), Some("shutdown -h now"));
        assert!(config.general.exit_after_idle_command);
        assert_eq!(config.general.hotplug_command, vec!["udevadm", "monitor"]);

        let mouse = config.mouse.unwrap();
        assert_eq!(
            mouse.devices.entries(),
            &[
                DeviceEntry::Auto,
                DeviceEntry::Named("event7".into()),
                DeviceEntry::Named("/dev/input/event9".into()),
            ]
        );

        let processor = config.processor.unwrap();
        assert_eq!(processor.total_load, Some(50.0));
        assert_eq!(processor.per_cpu_load, Some(40.5));

        let network = config.network.unwrap();
        assert_eq!(network.download_speed, Some(Rate(10.0 * 1024.0)));
        assert_eq!(network.upload_speed, Some(Rate(2048.0)));

        let processes = config.processes.unwrap();
        assert_eq!(processes.min_count.get("sshd"), Some(&2));
    }

    #[test]
    fn test_minimal_config_disables_checks() {
        let config = Config::parse("[general]\nperiod = 5\nidle_time = 1\n").unwrap();
        assert!(config.keyboard.is_none());
        assert!(config.network.is_none());
        assert_eq!(config.idle_command(), None);
        assert!(!config.general.exit_after_idle_command);
    }

    #[test]
    fn test_missing_general_is_fatal() {
        let err = Config::parse("[keyboard]\ndevices = \"auto\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_non_integer_period_is_fatal() {
        assert!(Config::parse("[general]\nperiod = \"ten\"\nidle_time = 1\n").is_err());
        assert!(Config::parse("[general]\nperiod = 2.5\nidle_time = 1\n").is_err());
    }

    #[test]
    fn test_zero_values_are_fatal() {
        assert!(Config::parse("[general]\nperiod = 0\nidle_time = 1\n").is_err());
        assert!(Config::parse("[general]\nperiod = 1\nidle_time = 0\n").is_err());
    }

    #[test]
    fn test_blank_idle_command() {
        let config =
            Config::parse("[general]\nperiod = 1\nidle_time = 1\nidle_command = \"  \"\n").unwrap();
        assert_eq!(config.idle_command(), None);
    }

    #[test]
    fn test_rate_suffixes() {
        assert_eq!(Rate::parse("512").unwrap().bytes_per_sec(), 512.0);
        assert_eq!(Rate::parse("10K").unwrap().bytes_per_sec(), 10240.0);
        assert_eq!(Rate::parse("1.5M").unwrap().bytes_per_sec(), 1.5 * 1024.0 * 1024.0);
        assert!(Rate::parse("fast").is_err());
        assert!(Rate::parse("").is_err());
        assert!(Rate::parse("-1").is_err());
    }

    #[test]
    fn test_device_list_dedup_is_left_to_resolution() {
        let list = DeviceList::parse(" event3 ,, auto,event3 ");
        assert_eq!(list.entries().len(), 3);
        assert!(DeviceList::parse("").is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/kam.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
