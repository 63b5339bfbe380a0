//! Workspace and session configuration.

use smol_str::SmolStr;

use crate::error::ConfigError;

/// Tuning knobs for a [`Workspace`](crate::Workspace).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Largest string inserted into a text container in one operation.
    pub chunk_size: usize,
}

impl WorkspaceConfig {
    /// Default chunk size, in characters.
    pub const DEFAULT_CHUNK_SIZE: usize = 60_000;

    /// Load configuration from environment variables.
    ///
    /// Optional env vars:
    /// - `TANDEM_CHUNK_SIZE`: characters per inserted chunk (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let chunk_size = parse_env("TANDEM_CHUNK_SIZE")?.unwrap_or(Self::DEFAULT_CHUNK_SIZE);
        Self { chunk_size }.validated()
    }

    /// Same config with a different chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Reject values the workspace cannot run with.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(self)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }
}

fn parse_env(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}

/// Options handed to the connector when joining a room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Signaling endpoints used for peer discovery.
    pub signaling: Vec<String>,
    /// Upper bound on directly connected peers.
    pub max_peers: Option<usize>,
}

/// What a workspace joins: the room and how we present ourselves in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub room: SmolStr,
    pub hostname: SmolStr,
    pub nickname: SmolStr,
    pub transport: TransportOptions,
}

impl SessionOptions {
    pub fn new(room: impl Into<SmolStr>) -> Self {
        Self {
            room: room.into(),
            hostname: "localhost".into(),
            nickname: "anonymous".into(),
            transport: TransportOptions::default(),
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<SmolStr>) -> Self {
        self.nickname = nickname.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<SmolStr>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_size() {
        assert_eq!(WorkspaceConfig::default().chunk_size, 60_000);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = WorkspaceConfig::default().with_chunk_size(0);
        assert!(matches!(config.validated(), Err(ConfigError::ZeroChunkSize)));
    }

    #[test]
    fn test_session_options_builder() {
        let options = SessionOptions::new("room-1")
            .with_nickname("alice")
            .with_hostname("laptop");
        assert_eq!(options.room, "room-1");
        assert_eq!(options.nickname, "alice");
        assert_eq!(options.hostname, "laptop");
    }
}
