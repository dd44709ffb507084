// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline error taxonomy.
//!
//! Per-record errors (`MalformedRecord`, `MissingField`, `TypeMismatch`,
//! `InvalidPayload`) never stop a loop. `PublishFailure` and `WriteRejected`
//! are logged and counted; the connection-level variants end the loop that
//! owns the connection.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the streaming pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source line could not be decoded into a reading.
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    /// A required key is absent from a payload.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// A payload value cannot be coerced to the expected type.
    #[error("Type mismatch for field {field}: expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    /// The payload is not a JSON object.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The broker refused a message or the local send queue is full.
    #[error("Publish failure: {0}")]
    PublishFailure(String),

    /// The broker connection is gone.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The store rejected a row.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// The store connection is gone.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl PipelineError {
    /// True for errors that must terminate the owning loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelUnavailable(_)
                | Self::StoreUnavailable(_)
                | Self::Io(_)
                | Self::Config(_)
        )
    }

    /// True for per-message decode errors (logged and skipped).
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. }
                | Self::MissingField(_)
                | Self::TypeMismatch { .. }
                | Self::InvalidPayload(_)
        )
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::PermissionDenied
                | ErrorCode::OutOfMemory,
            ) => Self::StoreUnavailable(err.to_string()),
            _ => Self::WriteRejected(err.to_string()),
        }
    }
}
