//! The polling loop.
//!
//! Every period the [`Monitor`] asks each enabled check for its verdict,
//! feeds the combined result to the [`IdleTimer`] and runs the idle action
//! when the timer says so.

use crate::check::Check;
use crate::config::Config;
use crate::error::Result;
use crate::idle::{IdleAction, IdleDecision, IdleTimer, ShellCommand};
#[cfg(feature = "trace")]
use crate::trace::{TraceRecord, TraceWriter};
use serde::Serialize;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Timing and policy of the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub period: Duration,
    pub idle_timeout: Duration,
    /// Return from [`Monitor::run`] once the idle action has run.
    pub exit_after_idle_command: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            period: config.period(),
            idle_timeout: config.idle_timeout(),
            exit_after_idle_command: config.general.exit_after_idle_command,
        }
    }
}

/// Outcome of one check in one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckVerdict {
    pub name: String,
    pub enabled: bool,
    pub alive: bool,
}

/// Outcome of one polling cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub verdicts: Vec<CheckVerdict>,
    pub any_alive: bool,
    pub any_enabled: bool,
    pub decision: IdleDecision,
}

impl CycleReport {
    /// Names of the checks that saw activity.
    pub fn alive_checks(&self) -> Vec<&str> {
        self.verdicts
            .iter()
            .filter(|v| v.alive)
            .map(|v| v.name.as_str())
            .collect()
    }
}

pub struct Monitor {
    checks: Vec<Box<dyn Check>>,
    settings: MonitorSettings,
    timer: IdleTimer,
    action: Option<Box<dyn IdleAction>>,
    #[cfg(feature = "trace")]
    trace: Option<TraceWriter>,
}

impl Monitor {
    /// Create a monitor whose first idle deadline is one timeout after `now`.
    pub fn new(checks: Vec<Box<dyn Check>>, settings: MonitorSettings, now: Instant) -> Self {
        Self {
            checks,
            settings,
            timer: IdleTimer::new(settings.idle_timeout, now),
            action: None,
            #[cfg(feature = "trace")]
            trace: None,
        }
    }

    /// Create a monitor with the settings, idle command and trace file of
    /// `config`.
    pub fn from_config(checks: Vec<Box<dyn Check>>, config: &Config) -> Result<Self> {
        let mut monitor = Self::new(checks, MonitorSettings::from_config(config), Instant::now());
        if let Some(command) = config.idle_command() {
            monitor = monitor.with_action(ShellCommand::new(command));
        }

        if let Some(path) = &config.general.trace_file {
            #[cfg(feature = "trace")]
            {
                monitor = monitor.with_trace(TraceWriter::open(path)?);
                log::info!("tracing cycles to {}", path.display());
            }
            #[cfg(not(feature = "trace"))]
            log::warn!(
                "trace_file {} ignored: built without the `trace` feature",
                path.display()
            );
        }
        Ok(monitor)
    }

    pub fn with_action<A: IdleAction + 'static>(mut self, action: A) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    #[cfg(feature = "trace")]
    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn timer(&self) -> &IdleTimer {
        &self.timer
    }

    pub fn checks(&self) -> &[Box<dyn Check>] {
        &self.checks
    }

    /// Run one polling cycle at `now`.
    ///
    /// Every enabled check is asked, even after one has reported activity,
    /// so that each starts a fresh interval.
    pub fn run_cycle(&mut self, now: Instant) -> CycleReport {
        let mut verdicts = Vec::with_capacity(self.checks.len());
        for check in &mut self.checks {
            let enabled = check.is_enabled();
            let alive = enabled && check.check_cycle();
            verdicts.push(CheckVerdict {
                name: check.name().to_string(),
                enabled,
                alive,
            });
        }

        let any_alive = verdicts.iter().any(|v| v.alive);
        let any_enabled = verdicts.iter().any(|v| v.enabled);
        let decision = self.timer.step(any_alive, any_enabled, now);

        let report = CycleReport {
            verdicts,
            any_alive,
            any_enabled,
            decision,
        };

        match decision {
            IdleDecision::Active => {
                log::debug!("active: {}", report.alive_checks().join(", "));
            }
            IdleDecision::Waiting { remaining } => {
                log::debug!("idle, {}s left", remaining.as_secs());
            }
            IdleDecision::NoChecksEnabled => {
                log::warn!("idle time reached but no check is enabled; not running the idle action");
            }
            IdleDecision::Fire => self.fire(),
        }

        #[cfg(feature = "trace")]
        self.record(&report, now);

        report
    }

    fn fire(&mut self) {
        log::info!(
            "no activity for {}s",
            self.settings.idle_timeout.as_secs()
        );
        match self.action.as_mut() {
            Some(action) => {
                if let Err(e) = action.execute() {
                    log::error!("idle action failed: {}", e);
                }
            }
            None => log::info!("no idle command configured"),
        }
    }

    #[cfg(feature = "trace")]
    fn record(&mut self, report: &CycleReport, now: Instant) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        let record = TraceRecord::new(report, self.timer.remaining(now), std::time::SystemTime::now());
        if let Err(e) = trace.write(&record) {
            log::warn!("cannot write trace to {}: {}", trace.path().display(), e);
        }
    }

    /// Poll until `shutdown` receives a message.
    ///
    /// Returns early after the idle action ran if
    /// [`exit_after_idle_command`](MonitorSettings::exit_after_idle_command)
    /// is set. A disconnected `shutdown` channel is never signalled.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<()> {
        log::info!(
            "monitoring every {}s, idle after {}s",
            self.settings.period.as_secs(),
            self.settings.idle_timeout.as_secs()
        );

        loop {
            let started = Instant::now();
            let report = self.run_cycle(started);
            if report.decision == IdleDecision::Fire && self.settings.exit_after_idle_command {
                log::info!("idle action done, exiting");
                return Ok(());
            }

            let next = started + self.settings.period;
            match shutdown.recv_timeout(next.saturating_duration_since(Instant::now())) {
                Ok(()) => {
                    log::info!("shutting down");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                }
            }
        }
    }
}
