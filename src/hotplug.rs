//! Device hot-plug notifications.
//!
//! Runs a long-lived event-stream process (`udevadm monitor` by default)
//! and treats any output as "devices changed". The output pipe is watched
//! by the [`PollManager`]; subscribers are called on the poll thread, so
//! they must not block for long.

use crate::error::{Error, Result};
use crate::platform;
use crate::poll::{Callback, Interest, PollManager, Readiness, lock};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, Weak};

type Subscriber = Arc<dyn Fn() + Send + Sync>;

struct EventStream {
    child: Child,
    stdout: ChildStdout,
}

impl EventStream {
    fn terminate(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

struct Shared {
    poll: PollManager,
    command: Vec<String>,
    subscribers: Mutex<Vec<Subscriber>>,
    stream: Mutex<Option<EventStream>>,
    pipe_callback: Callback,
}

impl Shared {
    fn on_pipe_ready(&self, fd: RawFd, _readiness: Readiness) {
        {
            let mut stream = lock(&self.stream);
            let Some(running) = stream.as_mut() else {
                return;
            };
            if running.stdout.as_raw_fd() != fd {
                return;
            }

            let mut ended = None;
            let mut buf = [0u8; 1024];
            while self.poll.has_input(fd) {
                match running.stdout.read(&mut buf) {
                    Ok(0) => {
                        ended = Some("end of stream".to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        ended = Some(e.to_string());
                        break;
                    }
                }
            }

            if let Some(reason) = ended {
                self.poll.remove(fd, &self.pipe_callback);
                if let Some(stream) = stream.take() {
                    stream.terminate();
                }
                log::error!(
                    "hotplug: `{}` stopped ({}); device changes are no longer tracked",
                    self.command.join(" "),
                    reason
                );
                return;
            }
        }

        log::debug!("hotplug: device change");
        self.notify();
    }

    fn notify(&self) {
        let subscribers: Vec<Subscriber> = lock(&self.subscribers).clone();
        for subscriber in subscribers {
            subscriber();
        }
    }

    fn stop_stream(&self) -> bool {
        let stream = lock(&self.stream).take();
        match stream {
            Some(stream) => {
                self.poll
                    .remove(stream.stdout.as_raw_fd(), &self.pipe_callback);
                stream.terminate();
                true
            }
            None => false,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

/// Watches for device hot-plug events and notifies subscribers.
#[derive(Clone)]
pub struct HotplugWatcher {
    shared: Arc<Shared>,
}

impl HotplugWatcher {
    /// Create a watcher that will run `command` (program and arguments).
    pub fn new(poll: PollManager, command: Vec<String>) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let pipe_callback: Callback = Arc::new(move |fd, readiness| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_pipe_ready(fd, readiness);
                }
            });
            Shared {
                poll,
                command,
                subscribers: Mutex::new(Vec::new()),
                stream: Mutex::new(None),
                pipe_callback,
            }
        });
        Self { shared }
    }

    /// Spawn the event-stream process and start watching its output.
    pub fn start(&self) -> Result<()> {
        let mut stream = lock(&self.shared.stream);
        if stream.is_some() {
            return Err(Error::AlreadyRunning("hotplug watcher"));
        }

        let command_line = self.shared.command.join(" ");
        let (program, args) = self
            .shared
            .command
            .split_first()
            .ok_or_else(|| Error::Config("empty hotplug command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Spawn {
                command: command_line,
                source: io::Error::other("no stdout pipe"),
            });
        };

        let fd = stdout.as_raw_fd();
        let registered = platform::set_nonblocking(fd)
            .map_err(Error::from)
            .and_then(|()| {
                self.shared
                    .poll
                    .add(fd, Interest::READABLE, self.shared.pipe_callback.clone())
            });
        let running = EventStream { child, stdout };
        if let Err(e) = registered {
            running.terminate();
            return Err(e);
        }

        log::info!("hotplug: watching `{}`", command_line);
        *stream = Some(running);
        Ok(())
    }

    /// Stop the event-stream process.
    pub fn stop(&self) -> Result<()> {
        if self.shared.stop_stream() {
            log::info!("hotplug: stopped");
            Ok(())
        } else {
            Err(Error::NotRunning("hotplug watcher"))
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.stream).is_some()
    }

    /// Subscribe to device changes. Subscribers run in registration order.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.shared.subscribers).push(Arc::new(callback));
    }

    /// Call every subscriber as if a device change had been reported.
    pub fn notify(&self) {
        self.shared.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn manager() -> PollManager {
        PollManager::with_wake_timeout(Duration::from_millis(50)).unwrap()
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let watcher = HotplugWatcher::new(manager(), sh("true"));
        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            watcher.add_callback(move || lock(&order).push(id));
        }

        watcher.notify();
        watcher.notify();
        assert_eq!(*lock(&order), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_event_output_triggers_callbacks() {
        let poll = manager();
        let watcher = HotplugWatcher::new(poll.clone(), sh("echo 'UDEV [1.0] add /devices/x (input)'; sleep 30"));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        watcher.add_callback(move || {
            let _ = lock(&tx).send(());
        });

        watcher.start().unwrap();
        assert!(watcher.is_running());
        assert_eq!(poll.registration_count(), 1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        watcher.stop().unwrap();
        assert!(!watcher.is_running());
        assert_eq!(poll.registration_count(), 0);
    }

    #[test]
    fn test_start_twice_fails() {
        let watcher = HotplugWatcher::new(manager(), sh("sleep 30"));
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(Error::AlreadyRunning(_))));
        watcher.stop().unwrap();
        assert!(matches!(watcher.stop(), Err(Error::NotRunning(_))));
    }

    #[test]
    fn test_missing_program_fails_to_start() {
        let watcher = HotplugWatcher::new(manager(), vec!["/nonexistent/udevadm".into()]);
        assert!(matches!(watcher.start(), Err(Error::Spawn { .. })));
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_exited_process_is_unregistered() {
        let poll = manager();
        let watcher = HotplugWatcher::new(poll.clone(), sh("exit 0"));
        watcher.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while watcher.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(!watcher.is_running());
        assert_eq!(poll.registration_count(), 0);
    }
}
