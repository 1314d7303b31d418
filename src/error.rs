//! Error taxonomy shared across the bot

use thiserror::Error;

use crate::types::{CandidateId, UserId};

/// Failures of the external search/photo endpoints
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("media unavailable for candidate {candidate_id}: {reason}")]
    MediaUnavailable {
        candidate_id: CandidateId,
        reason: String,
    },
}

/// Failures of the durable shown-candidates store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Outcome of a failed outbound message
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Benign refusal (flood control, messaging not allowed). Never fails a handler.
    #[error("delivery suppressed: {0}")]
    Suppressed(String),

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Errors talking to the VK HTTP API
#[derive(Debug, Error)]
pub enum VkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("VK API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("unexpected VK response: {0}")]
    Decode(String),
}

impl VkError {
    /// Flood control (9) and messaging-not-allowed (901, 902)
    pub fn is_suppressed(&self) -> bool {
        matches!(self, VkError::Api { code: 9 | 901 | 902, .. })
    }
}

/// Failures that abort handling of one inbound event
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load session for user {user_id}: {source}")]
    Bootstrap {
        user_id: UserId,
        #[source]
        source: StoreError,
    },

    #[error("failed to record shown candidate {candidate_id} for user {user_id}: {source}")]
    Persistence {
        user_id: UserId,
        candidate_id: CandidateId,
        #[source]
        source: StoreError,
    },
}
