//! Partylink: a real-time multiplayer party client
//!
//! Partylink keeps a client-side mirror of one party (its config,
//! attributes and members) replicated through server-pushed
//! notifications over a persistent presence stream, with mutations
//! going out as revisioned REST patches. The highest revision always
//! wins, so mirrors converge regardless of delivery order.
//!
//! # Architecture
//!
//! - [`client::PartyClient`]: facade wiring session, stream, REST and
//!   router together
//! - [`party`]: the replicated mirror, member handles and join flows
//! - [`presence`]: the persistent stream, covering handshake,
//!   keepalive and reconnect
//! - [`router`]: notification parsing and topic fan-out
//! - [`meta`]: the suffix-typed attribute store
//! - [`rest`]: typed wrappers over the control-plane endpoints
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use partylink_core::{
//!     AccountId, ClientConfig, PartyClient, PartyConfig, StaticSession,
//! };
//!
//! # async fn run() -> partylink_core::PartyResult<()> {
//! let session = Arc::new(StaticSession::new(
//!     AccountId::new("account"),
//!     "Player",
//!     "access-token",
//! ));
//! let client = PartyClient::new(ClientConfig::default(), session);
//! client.connect().await?;
//!
//! let party = client.create_party(PartyConfig::default()).await?;
//! party.me().set("Ready_b", true).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod meta;
pub mod party;
pub mod presence;
pub mod rest;
pub mod router;
pub mod types;

pub use auth::{AuthSession, StaticSession};
pub use client::PartyClient;
pub use error::{PartyError, PartyResult};
pub use meta::{Meta, MetaValue};
pub use party::{
    AutoConfirm, ConfirmationPolicy, Invitation, JoinStrategy, Member, MemberState, Party,
    PartyPhase, PartyState, PendingMember,
};
pub use presence::{ConnectionState, PresenceConnection, RosterEntry, Stanza, StatusDocument};
pub use rest::{PartyDocument, PartyService};
pub use router::{Notification, PartyEvent, Router};
pub use types::{
    AccountId, ClientConfig, ConnectionDescriptor, ConnectionId, Joinability, PartyConfig,
    PartyId, PartyPrivacy, PartyRole,
};
