//! Error types for Partylink

use thiserror::Error;

/// Main error type for Partylink operations
#[derive(Error, Debug)]
pub enum PartyError {
    /// The party service rejected a request with a typed error code
    #[error("Service error {code} ({status}): {message}")]
    Service {
        /// Machine-readable error code from the response body
        code: String,
        /// Human-readable message
        message: String,
        /// HTTP status of the response
        status: u16,
    },

    /// The bearer credential was rejected; the session must be refreshed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Low-level stream or HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The persistent stream is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// A bounded wait for a notification expired
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Caller is not the party leader
    #[error("Not the party leader")]
    NotLeader,

    /// Caller already belongs to a party
    #[error("Already in a party")]
    AlreadyInParty,

    /// The party has reached its configured maximum size
    #[error("Party is full")]
    PartyFull,

    /// A mutation targeted a revision the server has already moved past
    #[error("Stale revision: sent {sent}, server at {current}")]
    StaleRevision {
        /// Revision the mutation targeted
        sent: u64,
        /// Revision the server reported
        current: u64,
    },

    /// The party refused the join attempt with a rejection code
    #[error("Party not joinable (rejection type {0})")]
    NotJoinable(u8),

    /// Operation attempted on another account's resources
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Inbound payload did not match the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Operation invalid for the current party phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PartyError {
    fn from(e: serde_json::Error) -> Self {
        PartyError::Serialization(e.to_string())
    }
}

/// Result type alias using PartyError
pub type PartyResult<T> = Result<T, PartyError>;
