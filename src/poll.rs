//! Readiness multiplexer over raw descriptors.
//!
//! A single background thread waits in `poll(2)` on every registered
//! descriptor and calls the matching callback, on its own thread, when a
//! descriptor becomes ready. Registrations can be added and removed from
//! any thread, including from inside a callback.
//!
//! ```no_run
//! use kam::poll::{Interest, PollManager};
//! use std::os::unix::io::AsRawFd;
//! use std::sync::Arc;
//!
//! let poll = PollManager::new().unwrap();
//! let file = std::fs::File::open("/dev/input/event0").unwrap();
//! poll.add(file.as_raw_fd(), Interest::READABLE, Arc::new(|fd, _readiness| {
//!     println!("input on {fd}");
//! })).unwrap();
//! ```

use crate::error::{Error, Result};
use std::io;
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the loop waits before re-checking its registrations and stop flag.
pub const DEFAULT_WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Events a registration is interested in, as `poll(2)` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest(libc::c_short);

impl Interest {
    /// Data available to read.
    pub const READABLE: Interest = Interest(libc::POLLIN);
    /// Urgent/priority data.
    pub const PRIORITY: Interest = Interest(libc::POLLPRI);

    /// Raw `poll(2)` event bits.
    pub fn bits(self) -> libc::c_short {
        self.0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Readiness reported for a descriptor (the `revents` of `poll(2)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readiness(libc::c_short);

impl Readiness {
    pub fn from_bits(bits: libc::c_short) -> Self {
        Readiness(bits)
    }

    pub fn bits(self) -> libc::c_short {
        self.0
    }

    /// Normal or priority data can be read.
    pub fn is_readable(self) -> bool {
        self.0 & (libc::POLLIN | libc::POLLPRI) != 0
    }

    /// The peer hung up (pipe writer gone, device unplugged).
    pub fn is_hangup(self) -> bool {
        self.0 & libc::POLLHUP != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & libc::POLLERR != 0
    }

    /// The descriptor is not open.
    pub fn is_invalid(self) -> bool {
        self.0 & libc::POLLNVAL != 0
    }

    /// A read would not block: data, end of stream or an error is pending.
    pub fn has_input(self) -> bool {
        !self.is_invalid() && (self.is_readable() || self.is_hangup() || self.is_error())
    }
}

/// Callback invoked on the loop thread when a descriptor is ready.
///
/// Callbacks must return quickly: every other descriptor waits while one runs.
pub type Callback = Arc<dyn Fn(RawFd, Readiness) + Send + Sync>;

/// Lock a mutex, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Clone)]
struct Registration {
    fd: RawFd,
    interest: Interest,
    callback: Callback,
    /// Left out of the main wait while a `has_input` query runs on it.
    suspended: bool,
}

#[derive(Default)]
struct Registry {
    active: Vec<Registration>,
    /// Added since the loop last built its descriptor set.
    pending: Vec<Registration>,
}

/// Coordinates the loop's wait with `has_input` queries.
#[derive(Default)]
struct Gate {
    /// The loop thread is inside `poll(2)`.
    waiting: bool,
    /// Queries in progress; the loop does not enter `poll(2)` while non-zero.
    queries: usize,
}

/// Self-pipe used to interrupt the loop's wait.
struct Waker {
    read: RawFd,
    write: RawFd,
}

impl Waker {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Waker {
            read: fds[0],
            write: fds[1],
        })
    }

    fn wake(&self) {
        let byte = 1u8;
        // A full pipe already guarantees a pending wake-up.
        let _ = unsafe { libc::write(self.write, (&byte as *const u8).cast(), 1) };
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.read, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

struct Shared {
    registry: Mutex<Registry>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
    waker: Waker,
    stop: AtomicBool,
    wake_timeout: Duration,
}

struct Inner {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = self.thread.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            shutdown_loop(&self.shared, handle);
        }
    }
}

/// Shared handle to the multiplexer. Clones refer to the same loop; the
/// loop stops when the last clone is dropped.
#[derive(Clone)]
pub struct PollManager {
    inner: Arc<Inner>,
}

impl PollManager {
    /// Create a multiplexer with the default one second wake timeout.
    pub fn new() -> Result<Self> {
        Self::with_wake_timeout(DEFAULT_WAKE_TIMEOUT)
    }

    /// Create a multiplexer whose loop wakes at least every `wake_timeout`.
    pub fn with_wake_timeout(wake_timeout: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            gate: Mutex::new(Gate::default()),
            gate_changed: Condvar::new(),
            waker: Waker::new()?,
            stop: AtomicBool::new(false),
            wake_timeout,
        });
        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                thread: Mutex::new(None),
            }),
        })
    }

    /// Register `callback` for readiness of `fd`.
    ///
    /// The loop thread is started on the first registration. The same
    /// descriptor and callback pair must not be registered twice.
    pub fn add(&self, fd: RawFd, interest: Interest, callback: Callback) -> Result<()> {
        lock(&self.inner.shared.registry).pending.push(Registration {
            fd,
            interest,
            callback,
            suspended: false,
        });
        log::trace!("poll: queued descriptor {}", fd);
        self.ensure_running()?;
        self.inner.shared.waker.wake();
        Ok(())
    }

    /// Remove the registration of `fd` bound to `callback`.
    ///
    /// Returns `false` when no such registration exists. Once this returns,
    /// the loop does not pick the registration for any new readiness event,
    /// but a dispatch that already took the callback may still run it once.
    /// Callbacks must therefore tolerate being called for a descriptor they
    /// no longer own.
    pub fn remove(&self, fd: RawFd, callback: &Callback) -> bool {
        let removed = {
            let mut registry = lock(&self.inner.shared.registry);
            let before = registry.active.len() + registry.pending.len();
            let matches = |r: &Registration| r.fd == fd && same_callback(&r.callback, callback);
            registry.active.retain(|r| !matches(r));
            registry.pending.retain(|r| !matches(r));
            before != registry.active.len() + registry.pending.len()
        };
        if removed {
            log::trace!("poll: removed descriptor {}", fd);
            self.inner.shared.waker.wake();
        }
        removed
    }

    /// Non-blocking check whether `fd` has input (or a pending error/hangup).
    ///
    /// Works for any descriptor, registered or not. The loop never waits on
    /// `fd` while the check runs, and a registration for `fd` keeps its
    /// interest and callback afterwards.
    pub fn has_input(&self, fd: RawFd) -> bool {
        let shared = &self.inner.shared;
        {
            let mut gate = lock(&shared.gate);
            gate.queries += 1;
            if gate.waiting {
                shared.waker.wake();
            }
            while gate.waiting {
                gate = shared
                    .gate_changed
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let suspended = set_suspended(shared, fd, true);
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
        if suspended {
            set_suspended(shared, fd, false);
        }

        {
            let mut gate = lock(&shared.gate);
            gate.queries -= 1;
            shared.gate_changed.notify_all();
        }

        ret > 0 && Readiness(pfd.revents).has_input()
    }

    /// Stop the loop thread and wait for it to exit.
    ///
    /// Registrations are kept; a later [`add`](Self::add) restarts the loop.
    pub fn stop(&self) -> Result<()> {
        let handle = lock(&self.inner.thread).take();
        match handle {
            Some(handle) => {
                shutdown_loop(&self.inner.shared, handle);
                Ok(())
            }
            None => Err(Error::NotRunning("poll loop")),
        }
    }

    /// Check if the loop thread is running.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.thread)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of registrations, including ones not yet picked up by the loop.
    pub fn registration_count(&self) -> usize {
        let registry = lock(&self.inner.shared.registry);
        registry.active.len() + registry.pending.len()
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.interest_of(fd).is_some()
    }

    /// Interest mask registered for `fd`, if any.
    pub fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        let registry = lock(&self.inner.shared.registry);
        registry
            .active
            .iter()
            .chain(registry.pending.iter())
            .find(|r| r.fd == fd)
            .map(|r| r.interest)
    }

    fn ensure_running(&self) -> Result<()> {
        let mut thread = lock(&self.inner.thread);
        if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(finished) = thread.take() {
            let _ = finished.join();
        }

        let shared = self.inner.shared.clone();
        shared.stop.store(false, Ordering::SeqCst);
        let handle = thread::Builder::new()
            .name("kam-poll".into())
            .spawn(move || run_loop(shared))
            .map_err(|e| Error::ThreadError(format!("failed to spawn poll loop: {}", e)))?;
        *thread = Some(handle);
        Ok(())
    }
}

fn set_suspended(shared: &Shared, fd: RawFd, suspended: bool) -> bool {
    let mut registry = lock(&shared.registry);
    match registry.active.iter_mut().find(|r| r.fd == fd) {
        Some(registration) => {
            registration.suspended = suspended;
            true
        }
        None => false,
    }
}

fn shutdown_loop(shared: &Shared, handle: JoinHandle<()>) {
    shared.stop.store(true, Ordering::SeqCst);
    shared.waker.wake();
    // The last handle may be dropped from inside a callback.
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::error!("poll loop panicked");
    }
}

fn run_loop(shared: Arc<Shared>) {
    let timeout_ms = shared.wake_timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut fds: Vec<libc::pollfd> = Vec::new();

    log::debug!("poll loop started");

    while !shared.stop.load(Ordering::SeqCst) {
        fds.clear();
        fds.push(libc::pollfd {
            fd: shared.waker.read,
            events: libc::POLLIN,
            revents: 0,
        });
        {
            let mut registry = lock(&shared.registry);
            let pending = std::mem::take(&mut registry.pending);
            registry.active.extend(pending);
            fds.extend(
                registry
                    .active
                    .iter()
                    .filter(|r| !r.suspended)
                    .map(|r| libc::pollfd {
                        fd: r.fd,
                        events: r.interest.bits(),
                        revents: 0,
                    }),
            );
        }

        {
            let mut gate = lock(&shared.gate);
            while gate.queries > 0 {
                gate = shared
                    .gate_changed
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            gate.waiting = true;
        }

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        let poll_error = (ret < 0).then(io::Error::last_os_error);

        {
            let mut gate = lock(&shared.gate);
            gate.waiting = false;
            shared.gate_changed.notify_all();
        }

        if let Some(err) = poll_error {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("poll error: {}", err);
            thread::sleep(shared.wake_timeout);
            continue;
        }

        if ret == 0 {
            continue;
        }

        if fds[0].revents != 0 {
            shared.waker.drain();
        }

        for pfd in &fds[1..] {
            if pfd.revents != 0 {
                dispatch(&shared, pfd.fd, Readiness(pfd.revents));
            }
        }
    }

    log::debug!("poll loop stopped");
}

/// Run the callback currently registered for `fd`, outside every lock.
fn dispatch(shared: &Shared, fd: RawFd, readiness: Readiness) {
    let callback = {
        let mut registry = lock(&shared.registry);
        if readiness.is_invalid() {
            registry.active.retain(|r| r.fd != fd);
            log::warn!("descriptor {} was closed while registered, dropping it", fd);
            return;
        }
        // Removed earlier in this batch, or suspended by a query.
        match registry.active.iter().find(|r| r.fd == fd && !r.suspended) {
            Some(registration) => registration.callback.clone(),
            None => return,
        }
    };

    if panic::catch_unwind(AssertUnwindSafe(|| callback(fd, readiness))).is_err() {
        log::error!("callback for descriptor {} panicked", fd);
    }
}
