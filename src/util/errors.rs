use std::io;

#[derive(Debug)]
pub enum RaftError {
    InvalidConfig(String),
    ConfigParse(String),
    IoError(io::Error),
    SerializationError(String),
    Framing(String),
}

impl std::fmt::Display for RaftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            RaftError::ConfigParse(msg) => write!(f, "Failed to parse config file: {}", msg),
            RaftError::IoError(err) => write!(f, "IO error: {}", err),
            RaftError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            RaftError::Framing(msg) => write!(f, "Framing error: {}", msg),
        }
    }
}

impl std::error::Error for RaftError {}

impl From<io::Error> for RaftError {
    fn from(err: io::Error) -> Self {
        RaftError::IoError(err)
    }
}

impl From<toml::de::Error> for RaftError {
    fn from(err: toml::de::Error) -> Self {
        RaftError::ConfigParse(err.to_string())
    }
}

impl From<serde_json::Error> for RaftError {
    fn from(err: serde_json::Error) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RaftError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for RaftError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RaftError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RaftError>;
