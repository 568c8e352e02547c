//! Persistent presence stream
//!
//! One websocket session per client carries authentication, roster,
//! presence documents, keepalives and server-pushed notification
//! messages. [`connection::PresenceConnection`] owns the session and
//! its reconnect policy; [`transport`] is the pluggable wire seam.

pub mod connection;
pub mod stanza;
pub mod transport;

pub use connection::{ConnectionState, PresenceConnection};
pub use stanza::{RosterEntry, Stanza, StatusDocument};
pub use transport::{StanzaSink, StanzaSource, StreamTransport, WebSocketTransport};
