//! Bytecode errors

use thiserror::Error;

/// Errors reading or writing bytecode images.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// The file does not start with the bytecode magic
    #[error("not a Buzz bytecode file")]
    BadMagic,

    /// The file was produced by a different format version
    #[error("bytecode version {found} is not supported (expected {expected})")]
    VersionMismatch {
        /// Version found in the file
        found: u32,
        /// Version this build reads
        expected: u32,
    },

    /// I/O failure
    #[error("bytecode I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure
    #[error("bytecode serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for bytecode operations.
pub type Result<T> = std::result::Result<T, BytecodeError>;
