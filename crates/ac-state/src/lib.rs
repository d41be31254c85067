use std::path::PathBuf;
use thiserror::Error;

mod dir;
mod lock;
pub mod presence;
pub mod state;

pub use dir::StateDir;
pub use lock::FileGuard;
pub use presence::{PresenceEntry, PresenceStore};
pub use state::{AgentState, LastSeenEntry, StateStore};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out waiting for lock on {path}")]
    LockTimeout { path: PathBuf },
}
