use std::path::{Path, PathBuf};

/// Storage root for one agent installation.
///
/// Every component takes a `StateDir` at construction instead of reaching for
/// process-wide paths, so tests can point each store at a throwaway directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$AGENT_CHAT_HOME`, falling back to `~/.agent-chat`.
    pub fn from_env() -> Self {
        let root = std::env::var_os("AGENT_CHAT_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".agent-chat")
            });
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn state_lock(&self) -> PathBuf {
        self.root.join("state.lock")
    }

    pub fn presence_file(&self) -> PathBuf {
        self.root.join("presence.json")
    }

    pub fn presence_lock(&self) -> PathBuf {
        self.root.join("presence.json.lock")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn config_lock(&self) -> PathBuf {
        self.root.join("config.lock")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}
