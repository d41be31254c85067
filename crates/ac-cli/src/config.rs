//! TOML configuration and the credentials file, both living in the state
//! directory. Writes go through the shared config lock since setup commands
//! may run while other agents are mid-command.

use ac_client::Credentials;
use ac_state::{FileGuard, StateDir};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_url() -> String {
    "http://localhost:8008".to_string()
}

fn default_server_name() -> String {
    "agent-chat.local".to_string()
}

fn default_display_name() -> String {
    "Agent Chat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            server_name: default_server_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            display_name: default_display_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl AppConfig {
    /// Load the config file, writing defaults on first run.
    pub fn load(dir: &StateDir) -> Result<Self> {
        dir.ensure_exists()?;
        let path = dir.config_file();
        if !path.exists() {
            let config = AppConfig::default();
            config.save(dir)?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, dir: &StateDir) -> Result<()> {
        dir.ensure_exists()?;
        let _guard = FileGuard::acquire(&dir.config_lock(), LOCK_TIMEOUT)?;
        let doc = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(dir.config_file(), doc)
            .with_context(|| format!("failed to write {}", dir.config_file().display()))?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server.url" => self.server.url = value.to_string(),
            "server.server_name" => self.server.server_name = value.to_string(),
            "identity.username" => self.identity.username = value.to_string(),
            "identity.display_name" => self.identity.display_name = value.to_string(),
            other => bail!("unknown config key: {other}"),
        }
        Ok(())
    }
}

/// Stored credentials, if any; missing or unreadable files mean "not logged
/// in" rather than an error.
pub fn load_credentials(dir: &StateDir) -> Option<Credentials> {
    let raw = std::fs::read_to_string(dir.credentials_file()).ok()?;
    let creds: Credentials = serde_json::from_str(&raw).ok()?;
    if creds.access_token.is_empty() {
        return None;
    }
    Some(creds)
}

pub fn save_credentials(dir: &StateDir, creds: &Credentials) -> Result<()> {
    dir.ensure_exists()?;
    let _guard = FileGuard::acquire(&dir.config_lock(), LOCK_TIMEOUT)?;
    let payload = serde_json::to_string_pretty(creds).context("failed to serialize credentials")?;
    std::fs::write(dir.credentials_file(), payload)
        .with_context(|| format!("failed to write {}", dir.credentials_file().display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = StateDir::new(tmp.path());

        let config = AppConfig::load(&dir).expect("load");
        assert_eq!(config.server.url, "http://localhost:8008");
        assert_eq!(config.server.server_name, "agent-chat.local");
        assert!(tmp.path().join("config.toml").exists());
    }

    #[test]
    fn set_and_save_roundtrips() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = StateDir::new(tmp.path());

        let mut config = AppConfig::load(&dir).expect("load");
        config.set("server.url", "http://1.2.3.4:8008").expect("set url");
        config.set("identity.username", "bluelake").expect("set username");
        assert!(config.set("server.host", "nope").is_err());
        config.save(&dir).expect("save");

        let reloaded = AppConfig::load(&dir).expect("reload");
        assert_eq!(reloaded.server.url, "http://1.2.3.4:8008");
        assert_eq!(reloaded.identity.username, "bluelake");
    }

    #[test]
    fn credentials_roundtrip_and_absence() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = StateDir::new(tmp.path());

        assert!(load_credentials(&dir).is_none());
        save_credentials(
            &dir,
            &Credentials {
                user_id: "@bluelake:agent-chat.local".to_string(),
                access_token: "tok".to_string(),
                device_id: "DEV".to_string(),
            },
        )
        .expect("save");

        let creds = load_credentials(&dir).expect("present");
        assert_eq!(creds.user_id, "@bluelake:agent-chat.local");
        assert_eq!(creds.access_token, "tok");
    }
}
