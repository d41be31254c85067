//! Shared presence file. Unlike the per-agent state file this one is written
//! by every agent on the machine, so all writes take the same advisory lock.

use crate::lock::FileGuard;
use crate::{StateDir, StateError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Free text at this layer; the CLI validates against [`ac_core::PresenceStatus`]
    /// before any write, but foreign writers may use other values.
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PresenceFile {
    #[serde(default)]
    agents: BTreeMap<String, PresenceEntry>,
}

#[derive(Debug, Clone)]
pub struct PresenceStore {
    dir: StateDir,
    lock_timeout: Duration,
}

impl PresenceStore {
    pub fn new(dir: StateDir) -> Self {
        Self {
            dir,
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    /// Upsert one agent's presence with the current time and working directory.
    pub fn update(
        &self,
        nick: &str,
        status: &str,
        message: &str,
    ) -> Result<PresenceEntry, StateError> {
        self.dir.ensure_exists()?;
        let _guard = FileGuard::acquire(&self.dir.presence_lock(), self.lock_timeout)?;
        let mut data = self.read();
        let entry = PresenceEntry {
            status: status.to_string(),
            message: message.to_string(),
            last_seen: Utc::now(),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        data.agents.insert(nick.to_string(), entry.clone());
        self.write(&data)?;
        Ok(entry)
    }

    /// Read-only snapshot of every tracked agent.
    pub fn all(&self) -> BTreeMap<String, PresenceEntry> {
        self.read().agents
    }

    pub fn get(&self, nick: &str) -> Option<PresenceEntry> {
        self.read().agents.remove(nick)
    }

    /// Remove entries not seen within `max_age_minutes`; returns how many
    /// were swept.
    pub fn clear_stale(&self, max_age_minutes: i64) -> Result<usize, StateError> {
        self.dir.ensure_exists()?;
        let _guard = FileGuard::acquire(&self.dir.presence_lock(), self.lock_timeout)?;
        let mut data = self.read();
        let cutoff = Utc::now() - ChronoDuration::minutes(max_age_minutes);

        let before = data.agents.len();
        data.agents.retain(|_, entry| entry.last_seen >= cutoff);
        let removed = before - data.agents.len();

        if removed > 0 {
            self.write(&data)?;
        }
        Ok(removed)
    }

    // A missing or unreadable presence file is treated as empty: this file is
    // advisory status shared between agents, not a source of truth worth
    // aborting a command over.
    fn read(&self) -> PresenceFile {
        match std::fs::read_to_string(self.dir.presence_file()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => PresenceFile::default(),
        }
    }

    fn write(&self, data: &PresenceFile) -> Result<(), StateError> {
        let payload = serde_json::to_string_pretty(data).expect("presence serializes");
        std::fs::write(self.dir.presence_file(), payload)?;
        Ok(())
    }
}
