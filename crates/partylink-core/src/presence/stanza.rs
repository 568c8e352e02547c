//! Frames exchanged on the presence stream
//!
//! Every frame is one JSON object tagged by `type`. The server pushes
//! `message` frames whose body is a notification document; everything
//! else is session plumbing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AccountId, ConnectionId};

/// One frame on the presence stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stanza {
    /// Client credential presentation, first frame of every session
    Auth {
        /// Bearer access token
        token: String,
        /// Connection id this session binds to
        connection_id: ConnectionId,
    },
    /// Server accepted the credential
    AuthSuccess {
        /// Server-assigned session id
        session_id: String,
    },
    /// Server rejected the credential
    AuthFailure {
        /// Human-readable reason
        reason: String,
    },
    /// Client request for the contact roster
    RosterGet,
    /// Contact roster snapshot
    Roster {
        /// Current contacts
        entries: Vec<RosterEntry>,
    },
    /// Presence document of a connection
    Presence {
        /// Connection the document describes
        from: Option<ConnectionId>,
        /// Addressee, absent for broadcast presence
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ConnectionId>,
        /// Whether the connection is reachable
        #[serde(default = "default_available")]
        available: bool,
        /// Rich status payload
        #[serde(default)]
        status: StatusDocument,
    },
    /// Targeted presence probe, answered with a directed Presence
    Probe {
        /// Connection to probe
        to: ConnectionId,
    },
    /// Directed message carrying a notification document
    Message {
        /// Sending connection
        from: Option<ConnectionId>,
        /// Addressee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ConnectionId>,
        /// Notification body
        body: Value,
    },
    /// Keepalive request
    Ping,
    /// Keepalive answer
    Pong,
    /// Server is ending this session; the client must open a fresh one
    SessionClosed {
        /// Human-readable reason
        #[serde(default)]
        reason: String,
    },
}

fn default_available() -> bool {
    true
}

/// One contact in the roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Contact account
    pub account_id: AccountId,
    /// Subscription direction (both, to, from)
    #[serde(default)]
    pub subscription: String,
}

/// Rich status carried inside presence frames
///
/// The field casing matches the wire document; absent fields fall back
/// to an offline-looking default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Free-form status line
    #[serde(rename = "Status", default)]
    pub status: String,
    /// Whether the account is in a match
    #[serde(rename = "bIsPlaying", default)]
    pub is_playing: bool,
    /// Whether the account's party accepts join attempts
    #[serde(rename = "bIsJoinable", default)]
    pub is_joinable: bool,
    /// Whether the client supports voice
    #[serde(rename = "bHasVoiceSupport", default)]
    pub has_voice_support: bool,
    /// Game session id, empty when not in a match
    #[serde(rename = "SessionId", default)]
    pub session_id: String,
    /// Free-form key/value payload, including party join info
    #[serde(rename = "Properties", default)]
    pub properties: BTreeMap<String, Value>,
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            status: String::new(),
            is_playing: false,
            is_joinable: false,
            has_voice_support: false,
            session_id: String::new(),
            properties: BTreeMap::new(),
        }
    }
}
