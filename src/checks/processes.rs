//! Running processes.

use crate::check::Check;
use crate::config::{ProcessesConfig, split_list};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Longest process name the kernel keeps in `comm`.
const COMM_LEN: usize = 15;

/// Cut `name` the way the kernel cuts process names.
fn comm_name(name: &str) -> &str {
    if name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Watched {
    name: String,
    min_count: usize,
}

/// Alive while any watched process runs at least its minimum number of
/// instances.
pub struct ProcessesCheck {
    watched: Vec<Watched>,
    system: System,
}

impl ProcessesCheck {
    pub fn from_config(config: Option<&ProcessesConfig>) -> Self {
        let mut watched: Vec<Watched> = Vec::new();
        if let Some(config) = config {
            for name in split_list(&config.processes) {
                if watched.iter().any(|w| w.name == comm_name(name)) {
                    continue;
                }
                let min_count = config.min_count.get(name).copied().unwrap_or(1).max(1);
                watched.push(Watched {
                    name: comm_name(name).to_string(),
                    min_count: min_count as usize,
                });
            }
        }
        Self {
            watched,
            system: System::new(),
        }
    }

    fn matches<S: AsRef<str>>(&self, running: &[S]) -> bool {
        self.watched.iter().any(|w| {
            let count = running.iter().filter(|n| comm_name(n.as_ref()) == w.name).count();
            if count > 0 {
                log::debug!("processes: {} x{} (need {})", w.name, count, w.min_count);
            }
            count >= w.min_count
        })
    }
}

impl Check for ProcessesCheck {
    fn name(&self) -> &str {
        "processes"
    }

    fn is_enabled(&self) -> bool {
        !self.watched.is_empty()
    }

    fn check_cycle(&mut self) -> bool {
        // Names only; no CPU, memory or disk figures are needed.
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
        let running: Vec<String> = self
            .system
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().into_owned())
            .collect();
        if running.is_empty() {
            log::warn!("processes: no processes listed");
        }
        self.matches(&running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn check(processes: &str, min_count: &[(&str, u32)]) -> ProcessesCheck {
        let config = ProcessesConfig {
            processes: processes.to_string(),
            min_count: min_count
                .iter()
                .map(|(name, n)| (name.to_string(), *n))
                .collect::<HashMap<_, _>>(),
        };
        ProcessesCheck::from_config(Some(&config))
    }

    #[test]
    fn test_comm_truncation() {
        assert_eq!(comm_name("sshd"), "sshd");
        assert_eq!(comm_name("systemd-journald"), "systemd-journal");
        assert_eq!(comm_name("ääääääää"), "äääääää");
    }

    #[test]
    fn test_min_count() {
        let check = check("sshd, rsync", &[("sshd", 2)]);
        assert!(!check.matches(&["sshd", "bash"]));
        assert!(check.matches(&["sshd", "bash", "sshd"]));
        assert!(check.matches(&["rsync"]));
    }

    #[test]
    fn test_long_names_match_truncated_comm() {
        let check = check("systemd-journald", &[]);
        assert!(check.matches(&["systemd-journal"]));
        // Some listings report the untruncated name.
        assert!(check.matches(&["systemd-journald"]));
    }

    #[test]
    fn test_disabled_without_names() {
        assert!(!check(" ", &[]).is_enabled());
        assert!(!ProcessesCheck::from_config(None).is_enabled());
        assert!(check("cron", &[]).is_enabled());
    }

    #[test]
    fn test_finds_own_process() {
        let own = fs::read_to_string("/proc/self/comm").unwrap();
        let mut present = check(own.trim(), &[]);
        assert!(present.check_cycle());

        let mut absent = check("kam-no-such-process", &[]);
        assert!(!absent.check_cycle());
    }
}
