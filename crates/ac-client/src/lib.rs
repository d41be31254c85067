use ac_core::{ChatMessage, Target};
use async_trait::async_trait;
use thiserror::Error;

pub mod matrix;
pub mod notify;

pub use matrix::{Credentials, MatrixClient, RoomMember};
pub use notify::{check_unread, HISTORY_WINDOW};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

/// The capability the state and reconciliation layers require of any chat
/// backend. Protocol framing stays entirely inside the implementation.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Recent history for a conversation, oldest-first, at most `limit`
    /// messages.
    async fn fetch_history(
        &self,
        target: &Target,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError>;

    /// Deliver one message; an error means the send is known to have failed.
    async fn send_message(&self, target: &Target, text: &str) -> Result<(), BackendError>;
}
