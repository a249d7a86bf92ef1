//! The idle deadline and the action taken when it passes.

use crate::error::{Error, Result};
use std::process::Command;
use std::time::{Duration, Instant};

/// Something to do once the host has been idle long enough.
pub trait IdleAction: Send {
    fn execute(&mut self) -> Result<()>;
}

impl<F> IdleAction for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn execute(&mut self) -> Result<()> {
        self()
    }
}

/// Runs a command line through `sh -c` and waits for it.
///
/// A non-zero exit status is logged, not treated as a failure.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl IdleAction for ShellCommand {
    fn execute(&mut self) -> Result<()> {
        log::info!("running idle command `{}`", self.command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .status()
            .map_err(|source| Error::Spawn {
                command: self.command.clone(),
                source,
            })?;
        if status.success() {
            log::info!("idle command finished");
        } else {
            log::warn!("idle command `{}` exited with {}", self.command, status);
        }
        Ok(())
    }
}

/// What the timer decided for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    /// Activity was seen; the deadline moved.
    Active,
    /// Idle, but the deadline has not passed yet.
    Waiting { remaining: Duration },
    /// The deadline passed; run the idle action.
    Fire,
    /// The deadline passed but nothing is being watched.
    NoChecksEnabled,
}

/// Tracks when the host becomes idle.
///
/// The deadline never moves backwards. After firing it is re-armed a full
/// timeout later so the action does not repeat every cycle.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Duration,
    deadline: Instant,
    last_alive: Option<Instant>,
    fired_count: u64,
}

impl IdleTimer {
    /// Start a timer whose first deadline is `timeout` after `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            deadline: now + timeout,
            last_alive: None,
            fired_count: 0,
        }
    }

    pub fn step(&mut self, any_alive: bool, any_enabled: bool, now: Instant) -> IdleDecision {
        if any_alive {
            self.deadline = self.deadline.max(now + self.timeout);
            self.last_alive = Some(now);
            return IdleDecision::Active;
        }

        if now < self.deadline {
            return IdleDecision::Waiting {
                remaining: self.deadline - now,
            };
        }

        if !any_enabled {
            return IdleDecision::NoChecksEnabled;
        }

        self.fired_count += 1;
        self.deadline = now + self.timeout;
        IdleDecision::Fire
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn last_alive(&self) -> Option<Instant> {
        self.last_alive
    }

    pub fn fired_count(&self) -> u64 {
        self.fired_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_deadline_never_moves_back() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(10 * MINUTE, start);
        let mut previous = timer.deadline();
        for (offset, alive) in [(0, true), (30, false), (60, true), (61, true), (300, false)] {
            timer.step(alive, true, start + Duration::from_secs(offset));
            assert!(timer.deadline() >= previous);
            previous = timer.deadline();
        }
        assert_eq!(timer.deadline(), start + Duration::from_secs(61) + 10 * MINUTE);
        assert_eq!(timer.last_alive(), Some(start + Duration::from_secs(61)));
    }

    #[test]
    fn test_waiting_reports_remaining() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(MINUTE, start);
        assert_eq!(
            timer.step(false, true, start + Duration::from_secs(45)),
            IdleDecision::Waiting {
                remaining: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn test_fires_once_per_timeout() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(MINUTE, start);

        assert_eq!(timer.step(false, true, start + MINUTE), IdleDecision::Fire);
        // The next cycles wait for a whole new timeout.
        for secs in [70, 90, 119] {
            let decision = timer.step(false, true, start + Duration::from_secs(secs));
            assert!(matches!(decision, IdleDecision::Waiting { .. }));
        }
        assert_eq!(timer.step(false, true, start + 2 * MINUTE), IdleDecision::Fire);
        assert_eq!(timer.fired_count(), 2);
    }

    #[test]
    fn test_activity_postpones_firing() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(MINUTE, start);
        assert_eq!(
            timer.step(true, true, start + Duration::from_secs(50)),
            IdleDecision::Active
        );
        assert!(matches!(
            timer.step(false, true, start + MINUTE),
            IdleDecision::Waiting { .. }
        ));
        assert_eq!(
            timer.step(false, true, start + Duration::from_secs(110)),
            IdleDecision::Fire
        );
    }

    #[test]
    fn test_never_fires_without_enabled_checks() {
        let start = Instant::now();
        let mut timer = IdleTimer::new(MINUTE, start);
        assert_eq!(
            timer.step(false, false, start + 5 * MINUTE),
            IdleDecision::NoChecksEnabled
        );
        assert_eq!(timer.fired_count(), 0);
        assert_eq!(timer.remaining(start + 5 * MINUTE), Duration::ZERO);
    }

    #[test]
    fn test_closure_action() {
        let mut runs = 0;
        {
            let mut action = || -> Result<()> {
                runs += 1;
                Ok(())
            };
            action.execute().unwrap();
            action.execute().unwrap();
        }
        assert_eq!(runs, 2);
    }

    #[test]
    fn test_shell_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("fired");
        let mut action = ShellCommand::new(format!("touch '{}'", marker.display()));
        action.execute().unwrap();
        assert!(marker.exists());

        // A failing command is not an error.
        ShellCommand::new("exit 3").execute().unwrap();
    }
}
