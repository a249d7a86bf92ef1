//! Input device discovery and device handles.
//!
//! Devices are discovered through the kernel's input class registry
//! (`/sys/class/input`): every `eventN` entry carries the descriptive name
//! of its device in `device/name`, which is matched against the keywords of
//! a [`DeviceClass`].

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Input class registry.
pub const SYS_INPUT_DIR: &str = "/sys/class/input";
/// Directory holding the input device nodes.
pub const DEV_INPUT_DIR: &str = "/dev/input";

/// Kind of input device a tracker watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
}

impl DeviceClass {
    /// Lower-case keywords looked for in a device name.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            DeviceClass::Keyboard => &["keyboard"],
            DeviceClass::Mouse => &["mouse", "mice"],
        }
    }

    /// Check if a descriptive device name belongs to this class.
    pub fn matches(self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.keywords().iter().any(|keyword| name.contains(keyword))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Keyboard => "keyboard",
            DeviceClass::Mouse => "mouse",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of device identifiers for `auto` device lists.
pub trait DeviceEnumerator: Send + Sync {
    /// Identifiers of every device of `class` currently present.
    ///
    /// An unreadable registry yields no devices.
    fn find(&self, class: DeviceClass) -> Vec<String>;

    /// Path of the device node for an identifier or an explicit path.
    fn device_path(&self, id: &str) -> PathBuf;
}

/// Enumerator backed by sysfs.
#[derive(Debug, Clone)]
pub struct SysfsEnumerator {
    sys_dir: PathBuf,
    dev_dir: PathBuf,
}

impl Default for SysfsEnumerator {
    fn default() -> Self {
        Self::with_dirs(SYS_INPUT_DIR, DEV_INPUT_DIR)
    }
}

impl SysfsEnumerator {
    /// Use a different registry and device directory (for tests and chroots).
    pub fn with_dirs(sys_dir: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            sys_dir: sys_dir.into(),
            dev_dir: dev_dir.into(),
        }
    }
}

impl DeviceEnumerator for SysfsEnumerator {
    fn find(&self, class: DeviceClass) -> Vec<String> {
        let entries = match fs::read_dir(&self.sys_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "{}: cannot scan {}: {}",
                    class,
                    self.sys_dir.display(),
                    e
                );
                return Vec::new();
            }
        };

        let mut found: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let id = entry.file_name().to_str()?.to_string();
                if !id.starts_with("event") {
                    return None;
                }
                let name = fs::read_to_string(entry.path().join("device/name")).ok()?;
                class.matches(name.trim()).then_some(id)
            })
            .collect();

        // event2 before event10
        found.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        log::debug!("{}: found {:?}", class, found);
        found
    }

    fn device_path(&self, id: &str) -> PathBuf {
        if id.contains('/') {
            PathBuf::from(id)
        } else {
            self.dev_dir.join(id)
        }
    }
}

/// An open input device.
#[derive(Debug)]
pub struct DeviceHandle {
    path: PathBuf,
    file: File,
    opened_at: Instant,
}

impl DeviceHandle {
    /// Open a device node read-only and non-blocking.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            opened_at: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl AsRawFd for DeviceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
