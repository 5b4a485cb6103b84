//! scrambledb error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrambleDbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Execution error in node {node_id}: {message}")]
    NodeExecution { node_id: u32, message: String },

    #[error("Execution aborted before node {node_id}")]
    Aborted { node_id: u32 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ScrambleDbError>;
