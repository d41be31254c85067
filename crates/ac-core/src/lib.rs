use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod nick;
pub mod reconcile;

/// Channels every agent is subscribed to on first run.
pub const DEFAULT_CHANNELS: [&str; 3] = ["#general", "#status", "#alerts"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty target")]
    EmptyTarget,
    #[error("invalid target {0:?}: expected #channel or @peer")]
    InvalidTarget(String),
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

/// A conversation target: a channel (`#name`) or a direct peer (`@name`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    Channel(String),
    Direct(String),
}

impl Target {
    /// Parse a user-supplied target. Bare names are rejected so that a typo
    /// never silently becomes a channel or a peer.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        match trimmed.split_at(1) {
            ("#", rest) if !rest.is_empty() => Ok(Target::Channel(trimmed.to_string())),
            ("@", rest) if !rest.is_empty() => Ok(Target::Direct(trimmed.to_string())),
            _ => Err(ValidationError::InvalidTarget(trimmed.to_string())),
        }
    }

    /// Like [`Target::parse`], but a bare name is taken as a direct peer,
    /// matching how `send @peer` and `send peer` behave identically.
    pub fn parse_lenient(input: &str) -> Result<Self, ValidationError> {
        match Target::parse(input) {
            Ok(target) => Ok(target),
            Err(ValidationError::InvalidTarget(name)) if !name.starts_with('#') => {
                Ok(Target::Direct(direct_key(&name)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Target::Channel(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Channel(name) | Target::Direct(name) => name,
        }
    }

    /// Name without the `#`/`@` sigil.
    pub fn local_name(&self) -> &str {
        &self.as_str()[1..]
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Target::parse(input)
    }
}

/// Normalize a direct-message key so the state file always carries the `@`
/// prefix regardless of how the peer was typed.
pub fn direct_key(peer: &str) -> String {
    let trimmed = peer.trim();
    if trimmed.starts_with('@') {
        trimmed.to_string()
    } else {
        format!("@{trimmed}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Busy,
    Away,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Away => "away",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "online" => Ok(PresenceStatus::Online),
            "busy" => Ok(PresenceStatus::Busy),
            "away" => Ok(PresenceStatus::Away),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// A message fetched from backend history, oldest-first in every window the
/// adapters hand out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    /// Backend-assigned opaque id, used as the resume marker.
    pub event_id: Option<String>,
    /// Milliseconds since the epoch, when the backend reports one.
    pub timestamp_ms: Option<i64>,
}

impl ChatMessage {
    /// Short display nick: `@alice:server` becomes `alice`.
    pub fn sender_nick(&self) -> &str {
        let local = self.sender.split(':').next().unwrap_or(&self.sender);
        local.strip_prefix('@').unwrap_or(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channels_and_directs() {
        assert_eq!(
            Target::parse("#general").unwrap(),
            Target::Channel("#general".to_string())
        );
        assert_eq!(
            Target::parse("  @BlueLake ").unwrap(),
            Target::Direct("@BlueLake".to_string())
        );
        assert!(Target::parse("#general").unwrap().is_channel());
        assert!(!Target::parse("@BlueLake").unwrap().is_channel());
    }

    #[test]
    fn rejects_bare_and_empty_targets() {
        assert_eq!(Target::parse(""), Err(ValidationError::EmptyTarget));
        assert_eq!(
            Target::parse("general"),
            Err(ValidationError::InvalidTarget("general".to_string()))
        );
        assert_eq!(
            Target::parse("#"),
            Err(ValidationError::InvalidTarget("#".to_string()))
        );
    }

    #[test]
    fn lenient_parse_treats_bare_names_as_direct_peers() {
        assert_eq!(
            Target::parse_lenient("BlueLake").unwrap(),
            Target::Direct("@BlueLake".to_string())
        );
        assert_eq!(
            Target::parse_lenient("#general").unwrap(),
            Target::Channel("#general".to_string())
        );
        assert_eq!(Target::parse_lenient(""), Err(ValidationError::EmptyTarget));
        assert!(Target::parse_lenient("#").is_err());
    }

    #[test]
    fn direct_key_adds_missing_prefix() {
        assert_eq!(direct_key("BlueLake"), "@BlueLake");
        assert_eq!(direct_key("@BlueLake"), "@BlueLake");
    }

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            PresenceStatus::Online,
            PresenceStatus::Busy,
            PresenceStatus::Away,
            PresenceStatus::Offline,
        ] {
            assert_eq!(status.as_str().parse::<PresenceStatus>().unwrap(), status);
        }
        assert_eq!("BUSY".parse::<PresenceStatus>().unwrap(), PresenceStatus::Busy);
        assert!("deep-focus".parse::<PresenceStatus>().is_err());
    }

    #[test]
    fn sender_nick_strips_server_and_sigil() {
        let msg = ChatMessage {
            sender: "@alice:agent-chat.local".to_string(),
            text: "hi".to_string(),
            event_id: None,
            timestamp_ms: None,
        };
        assert_eq!(msg.sender_nick(), "alice");
    }
}
