//! Durable per-agent read state.
//!
//! The process is transient: every mutating call re-reads the latest state
//! from disk under the advisory lock, applies its change, and writes back, so
//! two concurrent invocations touching different conversations do not clobber
//! each other and same-conversation writes resolve last-writer-wins.

use crate::lock::FileGuard;
use crate::{StateDir, StateError};
use ac_core::{direct_key, DEFAULT_CHANNELS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastSeenEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl LastSeenEntry {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            marker: None,
        }
    }

    fn touched(marker: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            marker: marker.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastSeen {
    #[serde(default)]
    pub channels: BTreeMap<String, LastSeenEntry>,
    // Older state files used "directs" for this map.
    #[serde(default, alias = "directs")]
    pub direct: BTreeMap<String, LastSeenEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentState {
    pub last_seen: LastSeen,
    #[serde(default)]
    pub subscribed_channels: Vec<String>,
}

impl AgentState {
    fn with_defaults() -> Self {
        let channels = DEFAULT_CHANNELS
            .iter()
            .map(|name| (name.to_string(), LastSeenEntry::now()))
            .collect();
        Self {
            last_seen: LastSeen {
                channels,
                direct: BTreeMap::new(),
            },
            subscribed_channels: DEFAULT_CHANNELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn channel_entry(&self, channel: &str) -> Option<&LastSeenEntry> {
        self.last_seen.channels.get(channel)
    }

    pub fn direct_entry(&self, peer: &str) -> Option<&LastSeenEntry> {
        self.last_seen.direct.get(&direct_key(peer))
    }
}

/// File-backed store for one agent's [`AgentState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: StateDir,
    lock_timeout: Duration,
}

impl StateStore {
    pub fn new(dir: StateDir) -> Self {
        Self {
            dir,
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_lock_timeout(dir: StateDir, lock_timeout: Duration) -> Self {
        Self { dir, lock_timeout }
    }

    /// Load the persisted state, initializing defaults on first run.
    pub fn load(&self) -> Result<AgentState, StateError> {
        self.dir.ensure_exists()?;
        let _guard = FileGuard::acquire(&self.dir.state_lock(), self.lock_timeout)?;
        self.read_latest()
    }

    /// Overwrite a channel's entry with the current time and the given marker.
    /// Passing no marker erases a previously stored one, so callers only omit
    /// it when the agent itself just wrote the newest message.
    pub fn touch_channel(
        &self,
        channel: &str,
        marker: Option<&str>,
    ) -> Result<AgentState, StateError> {
        self.update(|state| {
            state
                .last_seen
                .channels
                .insert(channel.to_string(), LastSeenEntry::touched(marker));
            true
        })
    }

    pub fn touch_direct(&self, peer: &str, marker: Option<&str>) -> Result<AgentState, StateError> {
        self.update(|state| {
            state
                .last_seen
                .direct
                .insert(direct_key(peer), LastSeenEntry::touched(marker));
            true
        })
    }

    /// Idempotently subscribe to a channel and guarantee it has an entry.
    pub fn ensure_subscription(&self, channel: &str) -> Result<AgentState, StateError> {
        self.update(|state| {
            let mut changed = false;
            if !state.subscribed_channels.iter().any(|c| c == channel) {
                state.subscribed_channels.push(channel.to_string());
                changed = true;
            }
            if !state.last_seen.channels.contains_key(channel) {
                state
                    .last_seen
                    .channels
                    .insert(channel.to_string(), LastSeenEntry::now());
                changed = true;
            }
            changed
        })
    }

    pub fn remove_subscription(&self, channel: &str) -> Result<AgentState, StateError> {
        self.update(|state| {
            let before = state.subscribed_channels.len();
            state.subscribed_channels.retain(|c| c != channel);
            state.subscribed_channels.len() != before
        })
    }

    /// Idempotently guarantee a directs entry, normalizing the peer key to
    /// carry the `@` prefix.
    pub fn ensure_direct(&self, peer: &str) -> Result<AgentState, StateError> {
        self.update(|state| {
            let key = direct_key(peer);
            if state.last_seen.direct.contains_key(&key) {
                false
            } else {
                state.last_seen.direct.insert(key, LastSeenEntry::now());
                true
            }
        })
    }

    /// Locked read-modify-write cycle. The mutation runs against the latest
    /// on-disk state; a write happens only when it reports a change.
    fn update<F>(&self, mutate: F) -> Result<AgentState, StateError>
    where
        F: FnOnce(&mut AgentState) -> bool,
    {
        self.dir.ensure_exists()?;
        let _guard = FileGuard::acquire(&self.dir.state_lock(), self.lock_timeout)?;
        let mut state = self.read_latest()?;
        if mutate(&mut state) {
            write_state(&self.dir.state_file(), &state)?;
        }
        Ok(state)
    }

    /// Read under an already-held lock; first run writes defaults.
    fn read_latest(&self) -> Result<AgentState, StateError> {
        let path = self.dir.state_file();
        if !path.exists() {
            let state = AgentState::with_defaults();
            write_state(&path, &state)?;
            return Ok(state);
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|source| StateError::Corrupt { path, source })
    }
}

fn write_state(path: &Path, state: &AgentState) -> Result<(), StateError> {
    let payload = serde_json::to_string_pretty(state).expect("state serializes");
    std::fs::write(path, payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs2::FileExt;
    use std::fs::OpenOptions;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(StateDir::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn first_load_creates_default_channels_and_persists() {
        let (dir, store) = store();
        let state = store.load().expect("load");

        assert_eq!(state.subscribed_channels, vec!["#general", "#status", "#alerts"]);
        for channel in DEFAULT_CHANNELS {
            let entry = state.channel_entry(channel).expect("default entry");
            assert!(entry.marker.is_none());
        }
        assert!(dir.path().join("state.json").exists());

        // Second load sees the same persisted state.
        assert_eq!(store.load().expect("reload"), state);
    }

    #[test]
    fn touch_and_reload_roundtrips_markers_and_timestamps() {
        let (_dir, store) = store();
        store.load().expect("init");
        store.touch_channel("#dev", Some("msg123")).expect("touch channel");
        store.touch_direct("@BlueLake", Some("dm1")).expect("touch direct");

        let state = store.load().expect("reload");
        assert_eq!(
            state.channel_entry("#dev").unwrap().marker.as_deref(),
            Some("msg123")
        );
        assert_eq!(
            state.direct_entry("@BlueLake").unwrap().marker.as_deref(),
            Some("dm1")
        );
    }

    #[test]
    fn touch_without_marker_erases_a_previous_one() {
        let (_dir, store) = store();
        store.touch_channel("#dev", Some("m5")).expect("touch");
        let state = store.touch_channel("#dev", None).expect("touch again");
        assert!(state.channel_entry("#dev").unwrap().marker.is_none());
    }

    #[test]
    fn touch_advances_timestamp_monotonically() {
        let (_dir, store) = store();
        let first = store.touch_channel("#dev", Some("m1")).expect("touch");
        let before = first.channel_entry("#dev").unwrap().timestamp;
        let second = store.touch_channel("#dev", Some("m2")).expect("touch");
        assert!(second.channel_entry("#dev").unwrap().timestamp >= before);
    }

    #[test]
    fn ensure_subscription_is_idempotent() {
        let (_dir, store) = store();
        store.ensure_subscription("#dev").expect("subscribe");
        let state = store.ensure_subscription("#dev").expect("subscribe again");

        let count = state
            .subscribed_channels
            .iter()
            .filter(|c| c.as_str() == "#dev")
            .count();
        assert_eq!(count, 1);
        assert!(state.channel_entry("#dev").is_some());
    }

    #[test]
    fn remove_subscription_drops_only_the_named_channel() {
        let (_dir, store) = store();
        store.ensure_subscription("#dev").expect("subscribe");
        let state = store.remove_subscription("#dev").expect("unsubscribe");
        assert!(!state.subscribed_channels.iter().any(|c| c == "#dev"));
        assert!(state.subscribed_channels.iter().any(|c| c == "#general"));
    }

    #[test]
    fn ensure_direct_normalizes_peer_prefix() {
        let (_dir, store) = store();
        let state = store.ensure_direct("BlueLake").expect("ensure");
        assert!(state.last_seen.direct.contains_key("@BlueLake"));

        // Same peer with the prefix does not create a second entry.
        let state = store.ensure_direct("@BlueLake").expect("ensure again");
        assert_eq!(state.last_seen.direct.len(), 1);
    }

    #[test]
    fn corrupt_state_file_propagates_instead_of_resetting() {
        let (dir, store) = store();
        store.load().expect("init");
        std::fs::write(dir.path().join("state.json"), "{not json").expect("corrupt");

        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
        // The corrupt file is left in place for the operator to inspect.
        assert!(matches!(
            store.touch_channel("#dev", None),
            Err(StateError::Corrupt { .. })
        ));
    }

    #[test]
    fn legacy_directs_key_still_loads() {
        let (dir, store) = store();
        let legacy = serde_json::json!({
            "last_seen": {
                "channels": {},
                "directs": {
                    "@Old": {"timestamp": "2026-01-01T00:00:00Z", "marker": "m9"}
                }
            },
            "subscribed_channels": ["#general"]
        });
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("state.json"), legacy.to_string()).unwrap();

        let state = store.load().expect("load legacy");
        assert_eq!(state.direct_entry("@Old").unwrap().marker.as_deref(), Some("m9"));
    }

    #[test]
    fn mutation_times_out_when_lock_is_held_elsewhere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::with_lock_timeout(
            StateDir::new(dir.path()),
            Duration::from_millis(150),
        );
        store.load().expect("init");

        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.path().join("state.lock"))
            .expect("open lock");
        holder.lock_exclusive().expect("hold lock");

        assert!(matches!(
            store.touch_channel("#dev", Some("m1")),
            Err(StateError::LockTimeout { .. })
        ));
    }
}
