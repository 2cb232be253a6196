//! Persistent set of already-alerted option keys, stored as a sorted JSON
//! array. Writes go through a temp file in the same directory and replace the
//! target atomically, so a crash mid-write never corrupts the set.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, warn};

pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: PathBuf) -> SeenStore {
        SeenStore { path }
    }

    /// A missing or unreadable file is an empty set. Alerting twice is better
    /// than crashing the watcher over a corrupt state file.
    pub fn load(&self) -> HashSet<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!(path = %self.path.display(), "no seen file yet");
                return HashSet::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(keys) => keys.into_iter().collect(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "seen file corrupt, starting fresh");
                HashSet::new()
            }
        }
    }

    pub fn save(&self, seen: &HashSet<String>) -> anyhow::Result<()> {
        let mut keys: Vec<&String> = seen.iter().collect();
        keys.sort();
        let body = serde_json::to_string_pretty(&keys)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => {
                fs::create_dir_all(p)
                    .with_context(|| format!("creating {}", p.display()))?;
                p.to_path_buf()
            }
            _ => PathBuf::from("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(body.as_bytes())?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
