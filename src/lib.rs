//! # kam
//!
//! A keep-alive monitor for Linux hosts: it watches for signs of life and
//! runs an idle command (typically `shutdown -h now`) once none have been
//! seen for a configured time.
//!
//! ## Signals
//!
//! - Keyboard and mouse input, read from the evdev device nodes and
//!   re-scanned whenever a device is plugged in or removed
//! - CPU load and network throughput above a threshold
//! - Established TCP connections from watched networks
//! - Running processes
//! - Kick files touched by other programs
//!
//! ## Quick Start
//!
//! ```no_run
//! use kam::{CheckContext, Config, HotplugWatcher, Monitor, PollManager, SysfsEnumerator, build_checks};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::sync::mpsc;
//!
//! let config = Config::load(Path::new("/etc/kam/kam.toml"))?;
//! let poll = PollManager::new()?;
//! let hotplug = HotplugWatcher::new(poll.clone(), config.general.hotplug_command.clone());
//! hotplug.start()?;
//!
//! let ctx = CheckContext::new(poll, Arc::new(SysfsEnumerator::default())).with_hotplug(hotplug);
//! let mut monitor = Monitor::from_config(build_checks(&config, &ctx), &config)?;
//!
//! let (_stop, shutdown) = mpsc::channel();
//! monitor.run(&shutdown)?;
//! # Ok::<(), kam::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Input devices and the hot-plug event stream are read on a single
//! background thread owned by the [`PollManager`]. Everything else runs on
//! the thread that calls [`Monitor::run`], once per period.

pub mod check;
pub mod checks;
pub mod config;
pub mod device;
pub mod error;
pub mod hotplug;
pub mod idle;
pub mod monitor;
pub mod poll;
#[cfg(feature = "trace")]
pub mod trace;

mod platform;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-exports
pub use check::Check;
pub use checks::{CheckContext, InputCheck, NetCounters, build_checks};
pub use config::{Config, DEFAULT_CONFIG_PATH};
pub use device::{DeviceClass, DeviceEnumerator, DeviceHandle, SysfsEnumerator};
pub use error::{Error, Result};
pub use hotplug::HotplugWatcher;
pub use idle::{IdleAction, IdleDecision, IdleTimer, ShellCommand};
pub use monitor::{CheckVerdict, CycleReport, Monitor, MonitorSettings};
pub use poll::{Interest, PollManager, Readiness};
#[cfg(feature = "trace")]
pub use trace::{TraceRecord, TraceWriter};
