//! Kick files: touching one keeps the host awake for a cycle.

use crate::check::Check;
use crate::config::{KickConfig, split_list};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kick file that is always watched.
pub const DEFAULT_KICK_FILE: &str = "/tmp/kam_kick";

/// Alive when any kick file exists. Existing kick files are consumed.
pub struct KickCheck {
    files: Vec<PathBuf>,
}

impl KickCheck {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    pub fn from_config(config: Option<&KickConfig>) -> Self {
        let mut files = vec![PathBuf::from(DEFAULT_KICK_FILE)];
        if let Some(config) = config {
            for file in split_list(&config.files).map(PathBuf::from) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        Self::new(files)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn consume(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("kick: {}", path.display());
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            // Still counts; it will be seen again next cycle.
            log::warn!("kick: cannot remove {}: {}", path.display(), e);
            path.exists()
        }
    }
}

impl Check for KickCheck {
    fn name(&self) -> &str {
        "kick"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn check_cycle(&mut self) -> bool {
        // Consume every file, not just the first one found.
        self.files
            .iter()
            .map(|file| consume(file))
            .fold(false, |alive, kicked| alive || kicked)
    }
}
