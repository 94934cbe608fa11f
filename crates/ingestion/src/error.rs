//! Ingestion error types

use std::net::SocketAddr;

use conditioning::ConditionError;
use thiserror::Error;

use crate::wire::WireError;

#[derive(Debug, Error)]
pub enum IngestionError {
    /// Payload could not be decoded
    #[error("malformed payload from '{source_id}': {error}")]
    Malformed {
        source_id: String,
        #[source]
        error: WireError,
    },

    /// Payload decoded but the sample was rejected by its conditioner
    #[error("sample from '{source_id}' rejected: {error}")]
    Rejected {
        source_id: String,
        #[source]
        error: ConditionError,
    },

    /// Socket could not be bound
    #[error("source '{source_id}' failed to bind {addr}: {error}")]
    Bind {
        source_id: String,
        addr: String,
        #[source]
        error: std::io::Error,
    },

    /// A source with this id is already registered
    #[error("source '{source_id}' is already registered")]
    AlreadyRegistered { source_id: String },

    /// Channel closed
    #[error("channel closed for source {source_id}")]
    ChannelClosed { source_id: String },

    /// Invalid source address
    #[error("invalid bind address '{addr}' for source '{source_id}'")]
    InvalidAddress { source_id: String, addr: String },
}

impl IngestionError {
    pub fn malformed(source_id: impl Into<String>, error: WireError) -> Self {
        Self::Malformed {
            source_id: source_id.into(),
            error,
        }
    }

    pub fn rejected(source_id: impl Into<String>, error: ConditionError) -> Self {
        Self::Rejected {
            source_id: source_id.into(),
            error,
        }
    }

    pub fn bind(source_id: impl Into<String>, addr: SocketAddr, error: std::io::Error) -> Self {
        Self::Bind {
            source_id: source_id.into(),
            addr: addr.to_string(),
            error,
        }
    }

    /// Per-event error that drops one payload without affecting the stream
    pub fn is_per_event(&self) -> bool {
        matches!(self, Self::Malformed { .. } | Self::Rejected { .. })
    }
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
