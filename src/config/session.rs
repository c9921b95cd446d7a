use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Remote protocol spoken behind the gateway. Encoded as an integer on the wire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(into = "u8", try_from = "u8")]
pub enum ProtocolKind {
    Rdp,
    Vnc,
    Ssh,
    Telnet,
}

impl ProtocolKind {
    /// Terminal protocols route keyboard input through a text-composition sink.
    pub fn uses_text_input(self) -> bool {
        matches!(self, ProtocolKind::Ssh | ProtocolKind::Telnet)
    }
}

impl From<ProtocolKind> for u8 {
    fn from(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Rdp => 0,
            ProtocolKind::Vnc => 1,
            ProtocolKind::Ssh => 2,
            ProtocolKind::Telnet => 3,
        }
    }
}

impl TryFrom<u8> for ProtocolKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolKind::Rdp),
            1 => Ok(ProtocolKind::Vnc),
            2 => Ok(ProtocolKind::Ssh),
            3 => Ok(ProtocolKind::Telnet),
            other => Err(format!("unknown protocol type {other}")),
        }
    }
}

/// Display dimensions travel as decimal strings, empty meaning "server default".
mod dimension {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    #[serde(rename = "user")]
    pub username: String,
    #[serde(rename = "pwd")]
    pub password: String,
    #[serde(rename = "type")]
    pub protocol: ProtocolKind,
    #[serde(with = "dimension", default)]
    pub width: Option<u32>,
    #[serde(with = "dimension", default)]
    pub height: Option<u32>,
}

/// File-transfer side channel (SFTP behind the gateway).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileTransferConfig {
    #[serde(rename = "enable")]
    pub enabled: bool,
    #[serde(rename = "up")]
    pub upload_allowed: bool,
    #[serde(rename = "down")]
    pub download_allowed: bool,
    #[serde(rename = "rootPath")]
    pub root_path: String,
    /// Keep-alive interval in seconds, 0 to disable.
    pub keepalive: u32,
    pub host: String,
    pub port: u16,
    #[serde(rename = "user")]
    pub username: String,
    #[serde(rename = "pwd")]
    pub password: String,
}

/// Everything needed to open (and later reopen) one session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub id: String,
    pub remote: RemoteTarget,
    #[serde(rename = "sftp", default, skip_serializing_if = "Option::is_none")]
    pub file_transfer: Option<FileTransferConfig>,
}

impl SessionConfig {
    pub fn new(id: impl Into<String>, remote: RemoteTarget) -> Self {
        Self {
            id: id.into(),
            remote,
            file_transfer: None,
        }
    }

    pub fn with_file_transfer(mut self, file_transfer: FileTransferConfig) -> Self {
        self.file_transfer = Some(file_transfer);
        self
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.remote.protocol
    }

    /// Fill in the display size a gateway would assume when none was given.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.remote.width.get_or_insert(DEFAULT_WIDTH);
        config.remote.height.get_or_insert(DEFAULT_HEIGHT);
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Host cannot be empty".to_string(),
            ));
        }

        if self.remote.port == 0 {
            return Err(AppError::ValidationError(
                "Port must be greater than 0".to_string(),
            ));
        }

        if let Some(ft) = &self.file_transfer
            && ft.enabled
            && ft.root_path.trim().is_empty()
        {
            return Err(AppError::ValidationError(
                "File transfer root path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Tunnel negotiation parameter: `info=<url-encoded JSON>`.
    pub fn handshake_param(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("info={}", urlencoding::encode(&json)))
    }
}
