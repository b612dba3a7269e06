use serde::Serialize;
use std::fmt;

#[derive(Debug, Serialize, PartialEq)]
pub enum CommandError {
    IoError(String),
    PathError(String),
    ConfigError(String),
    TrashError(String),
    NotFound(String),
    Other(String),
}

impl std::error::Error for CommandError {}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::IoError(msg) => write!(f, "IO Error: {}", msg),
            CommandError::PathError(msg) => write!(f, "Path Error: {}", msg),
            CommandError::ConfigError(msg) => write!(f, "Config Error: {}", msg),
            CommandError::TrashError(msg) => write!(f, "Trash Error: {}", msg),
            CommandError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            CommandError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        CommandError::ConfigError(err.to_string())
    }
}

impl From<walkdir::Error> for CommandError {
    fn from(err: walkdir::Error) -> Self {
        CommandError::IoError(err.to_string())
    }
}

impl From<trash::Error> for CommandError {
    fn from(err: trash::Error) -> Self {
        CommandError::TrashError(err.to_string())
    }
}

impl From<String> for CommandError {
    fn from(err: String) -> Self {
        CommandError::Other(err)
    }
}

impl From<&str> for CommandError {
    fn from(err: &str) -> Self {
        CommandError::Other(err.to_string())
    }
}

impl CommandError {
    pub fn new(msg: impl Into<String>) -> Self {
        CommandError::Other(msg.into())
    }
}
