//! Keyboard and mouse activity.
//!
//! An [`InputCheck`] keeps every device of its class open and registered
//! with the [`PollManager`]. Whenever a device becomes readable the poll
//! thread drains it and marks it touched; the polling cycle then reports
//! whether anything was touched since the previous cycle.
//!
//! The device list is re-resolved on every hot-plug notification. A reload
//! that actually changes the open set counts as activity for the following
//! cycle, since input produced while devices were being swapped is lost.

use crate::check::Check;
use crate::config::{DeviceEntry, DeviceList, InputConfig};
use crate::device::{DeviceClass, DeviceEnumerator, DeviceHandle};
use crate::hotplug::HotplugWatcher;
use crate::poll::{Callback, Interest, PollManager, Readiness, lock};
use std::collections::HashSet;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

/// Bytes read from a device per read call.
const CHUNK_SIZE: usize = 1024;
/// Upper bound on read calls per readiness notification.
const MAX_CHUNKS: usize = 64;

#[derive(Default)]
struct TrackerState {
    spec: DeviceList,
    /// Paths the last reload resolved to, opened or not.
    resolved: Vec<PathBuf>,
    /// A device was dropped after a failed read since the last reload.
    lost: bool,
    handles: Vec<DeviceHandle>,
    touched: HashSet<PathBuf>,
    just_reloaded: bool,
    reloads: u64,
}

struct Tracker {
    class: DeviceClass,
    poll: PollManager,
    enumerator: Arc<dyn DeviceEnumerator>,
    state: Mutex<TrackerState>,
    callback: Callback,
}

impl Tracker {
    /// Device paths named by `spec`, in order, without duplicates.
    fn resolve(&self, spec: &DeviceList) -> Vec<PathBuf> {
        let mut ids = Vec::new();
        for entry in spec.entries() {
            match entry {
                DeviceEntry::Auto => ids.extend(self.enumerator.find(self.class)),
                DeviceEntry::Named(id) => ids.push(id.clone()),
            }
        }

        let mut seen = HashSet::new();
        ids.iter()
            .map(|id| self.enumerator.device_path(id))
            .filter(|path| seen.insert(path.clone()))
            .collect()
    }

    fn load_devices(&self, spec: &DeviceList) {
        let paths = self.resolve(spec);

        let mut state = lock(&self.state);
        state.spec = spec.clone();

        // Devices that failed to open stay failed until the resolution
        // changes or an open device goes away.
        let unchanged = {
            let resolved: HashSet<&Path> = state.resolved.iter().map(PathBuf::as_path).collect();
            let wanted: HashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
            resolved == wanted && !state.lost
        };
        if unchanged {
            log::debug!("{}: device set unchanged", self.class);
            return;
        }

        for handle in state.handles.drain(..) {
            self.poll.remove(handle.as_raw_fd(), &self.callback);
        }

        for path in &paths {
            let handle = match DeviceHandle::open(path) {
                Ok(handle) => handle,
                Err(e) => {
                    log::warn!("{}: cannot open {}: {}", self.class, path.display(), e);
                    continue;
                }
            };
            if let Err(e) = self
                .poll
                .add(handle.as_raw_fd(), Interest::READABLE, self.callback.clone())
            {
                log::warn!("{}: cannot watch {}: {}", self.class, path.display(), e);
                continue;
            }
            state.handles.push(handle);
        }

        state.resolved = paths;
        state.lost = false;
        state.touched.clear();
        state.just_reloaded = !state.handles.is_empty();
        state.reloads += 1;

        if state.handles.is_empty() {
            log::info!("{}: no usable devices, check disabled", self.class);
        } else {
            let names: Vec<_> = state.handles.iter().map(|h| h.path().display()).collect();
            log::info!("{}: watching {:?}", self.class, names);
        }
    }

    fn reload(&self) {
        let spec = lock(&self.state).spec.clone();
        self.load_devices(&spec);
    }

    fn drain(&self, fd: RawFd, _readiness: Readiness) {
        let mut state = lock(&self.state);
        let Some(index) = state.handles.iter().position(|h| h.as_raw_fd() == fd) else {
            return;
        };

        let mut read_any = false;
        let mut failure = None;
        {
            let mut file = state.handles[index].file();
            let mut buf = [0u8; CHUNK_SIZE];
            for _ in 0..MAX_CHUNKS {
                if !self.poll.has_input(fd) {
                    break;
                }
                match file.read(&mut buf) {
                    Ok(0) => {
                        failure = Some(io::Error::from(io::ErrorKind::UnexpectedEof));
                        break;
                    }
                    Ok(_) => read_any = true,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        if read_any {
            let path = state.handles[index].path().to_path_buf();
            state.touched.insert(path);
        }

        if let Some(e) = failure {
            self.poll.remove(fd, &self.callback);
            let handle = state.handles.remove(index);
            state.lost = true;
            log::warn!(
                "{}: {} removed: {}",
                self.class,
                handle.path().display(),
                e
            );
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in state.handles.drain(..) {
            self.poll.remove(handle.as_raw_fd(), &self.callback);
        }
    }
}

/// Liveness of one class of input devices.
pub struct InputCheck {
    tracker: Arc<Tracker>,
}

impl InputCheck {
    /// Create a tracker with no devices. Call [`load_devices`](Self::load_devices)
    /// to open some.
    pub fn new(
        class: DeviceClass,
        poll: PollManager,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Self {
        let tracker = Arc::new_cyclic(|weak: &Weak<Tracker>| {
            let weak = weak.clone();
            let callback: Callback = Arc::new(move |fd, readiness| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.drain(fd, readiness);
                }
            });
            Tracker {
                class,
                poll,
                enumerator,
                state: Mutex::new(TrackerState::default()),
                callback,
            }
        });
        Self { tracker }
    }

    /// Create a tracker for a `[keyboard]` or `[mouse]` section.
    ///
    /// A missing section leaves the check disabled.
    pub fn from_config(
        class: DeviceClass,
        config: Option<&InputConfig>,
        poll: PollManager,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> Self {
        let check = Self::new(class, poll, enumerator);
        if let Some(config) = config {
            check.load_devices(&config.devices);
        }
        check
    }

    /// Resolve `spec` and reopen the devices if the resolved set changed.
    pub fn load_devices(&self, spec: &DeviceList) {
        self.tracker.load_devices(spec);
    }

    /// Re-resolve the last device list, picking up added or removed devices.
    pub fn reload(&self) {
        self.tracker.reload();
    }

    /// Reload whenever `watcher` reports a device change.
    pub fn subscribe(&self, watcher: &HotplugWatcher) {
        let weak = Arc::downgrade(&self.tracker);
        watcher.add_callback(move || {
            if let Some(tracker) = weak.upgrade() {
                tracker.reload();
            }
        });
    }

    pub fn class(&self) -> DeviceClass {
        self.tracker.class
    }

    /// Paths of the open devices.
    pub fn open_devices(&self) -> Vec<PathBuf> {
        lock(&self.tracker.state)
            .handles
            .iter()
            .map(|h| h.path().to_path_buf())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        lock(&self.tracker.state).handles.len()
    }

    /// Number of times the open set was replaced.
    pub fn reload_count(&self) -> u64 {
        lock(&self.tracker.state).reloads
    }

    /// Devices touched in the current interval.
    pub fn touched_devices(&self) -> Vec<PathBuf> {
        let mut touched: Vec<_> = lock(&self.tracker.state).touched.iter().cloned().collect();
        touched.sort();
        touched
    }
}

impl Check for InputCheck {
    fn name(&self) -> &str {
        self.tracker.class.as_str()
    }

    fn is_enabled(&self) -> bool {
        !lock(&self.tracker.state).handles.is_empty()
    }

    fn check_cycle(&mut self) -> bool {
        let mut state = lock(&self.tracker.state);
        let alive = !state.handles.is_empty() && (!state.touched.is_empty() || state.just_reloaded);
        state.touched.clear();
        state.just_reloaded = false;
        alive
    }
}
