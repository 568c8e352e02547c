//! Notification parsing and fan-out
//!
//! Message stanzas arriving on the presence stream carry JSON
//! notification documents tagged by `type`. [`Notification`] is the
//! closed set the client understands; unknown types are logged and
//! dropped. The [`Router`] is stateless: it fans parsed notifications
//! out to a global topic plus party- and member-scoped topics without
//! interpreting them.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::presence::stanza::StatusDocument;
use crate::types::{AccountId, ConnectionDescriptor, ConnectionId, PartyId};

/// Channel depth for every topic
const TOPIC_CAPACITY: usize = 256;

/// Type-string prefix of the stream-only join handshake
pub const LEGACY_PREFIX: &str = "party.legacy.";

/// Server-pushed notification document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// Invitation ping addressed to this account
    #[serde(rename = "party.ping")]
    Ping {
        /// Account that sent the ping
        sent_by: AccountId,
        /// Seconds until the ping expires
        #[serde(default)]
        expires_in: Option<u64>,
        /// Attributes attached to the ping
        #[serde(default)]
        meta: BTreeMap<String, String>,
    },

    /// A member joined the party
    #[serde(rename = "party.member.joined")]
    MemberJoined {
        party_id: PartyId,
        account_id: AccountId,
        /// Stream session the member attached through
        connection: ConnectionDescriptor,
        /// New authoritative party revision
        revision: u64,
        /// Initial member attributes, wire-encoded
        #[serde(default)]
        member_state_updated: BTreeMap<String, String>,
    },

    /// A member left voluntarily
    #[serde(rename = "party.member.left")]
    MemberLeft {
        party_id: PartyId,
        account_id: AccountId,
        revision: u64,
    },

    /// A member was removed by the captain
    #[serde(rename = "party.member.kicked")]
    MemberKicked {
        party_id: PartyId,
        account_id: AccountId,
        revision: u64,
    },

    /// A member's grace period after disconnecting ran out
    #[serde(rename = "party.member.expired")]
    MemberExpired {
        party_id: PartyId,
        account_id: AccountId,
        revision: u64,
    },

    /// A member's stream session dropped; membership persists for now
    #[serde(rename = "party.member.disconnected")]
    MemberDisconnected {
        party_id: PartyId,
        account_id: AccountId,
        #[serde(default)]
        connection: Option<ConnectionDescriptor>,
        revision: u64,
    },

    /// A member's attributes changed
    #[serde(rename = "party.member.state_updated")]
    MemberStateUpdated {
        party_id: PartyId,
        account_id: AccountId,
        /// New authoritative member revision
        revision: u64,
        /// Wire-encoded keys that changed
        #[serde(default)]
        member_state_updated: BTreeMap<String, String>,
        /// Keys that were deleted
        #[serde(default)]
        member_state_removed: Vec<String>,
    },

    /// Captaincy moved to another member
    #[serde(rename = "party.member.new_captain")]
    MemberNewCaptain {
        party_id: PartyId,
        account_id: AccountId,
        revision: u64,
    },

    /// An attaching peer awaits confirmation by an existing member
    #[serde(rename = "party.member.require_confirmation")]
    MemberRequireConfirmation {
        party_id: PartyId,
        account_id: AccountId,
        #[serde(default)]
        connection: Option<ConnectionDescriptor>,
        revision: u64,
    },

    /// Party-wide config or attributes changed
    #[serde(rename = "party.updated")]
    PartyUpdated {
        party_id: PartyId,
        /// New authoritative party revision
        revision: u64,
        /// Current captain
        #[serde(default)]
        captain_id: Option<AccountId>,
        /// Wire-encoded party attributes that changed
        #[serde(default)]
        party_state_updated: BTreeMap<String, String>,
        /// Party attribute keys that were deleted
        #[serde(default)]
        party_state_removed: Vec<String>,
        /// New seat count, when the config changed
        #[serde(default)]
        max_number_of_members: Option<u32>,
    },

    /// An invitee declined
    #[serde(rename = "party.invite.declined")]
    InviteDeclined {
        party_id: PartyId,
        /// Declining account
        account_id: AccountId,
    },

    /// An outstanding invitation was cancelled or expired
    #[serde(rename = "party.invite.cancelled")]
    InviteCancelled { party_id: PartyId },

    /// A friendship was established
    #[serde(rename = "friend.added")]
    FriendAdded { account_id: AccountId },

    /// A friendship ended
    #[serde(rename = "friend.removed")]
    FriendRemoved { account_id: AccountId },

    /// An account asked to become a friend
    #[serde(rename = "friend.requested")]
    FriendRequested { account_id: AccountId },

    /// A direct chat message
    #[serde(rename = "chat.message")]
    Chat {
        /// Sending account
        sent_by: AccountId,
        /// Message text
        #[serde(default)]
        message: String,
    },
}

impl Notification {
    /// Parse one message body; None for unknown or malformed types
    pub fn parse(body: &Value) -> Option<Notification> {
        let kind = body.get("type").and_then(Value::as_str).unwrap_or("");
        match serde_json::from_value(body.clone()) {
            Ok(notification) => Some(notification),
            Err(e) => {
                warn!(kind, error = %e, "dropping unrecognized notification");
                None
            }
        }
    }

    /// Party the notification is scoped to, if any
    pub fn party_id(&self) -> Option<&PartyId> {
        match self {
            Notification::MemberJoined { party_id, .. }
            | Notification::MemberLeft { party_id, .. }
            | Notification::MemberKicked { party_id, .. }
            | Notification::MemberExpired { party_id, .. }
            | Notification::MemberDisconnected { party_id, .. }
            | Notification::MemberStateUpdated { party_id, .. }
            | Notification::MemberNewCaptain { party_id, .. }
            | Notification::MemberRequireConfirmation { party_id, .. }
            | Notification::PartyUpdated { party_id, .. }
            | Notification::InviteDeclined { party_id, .. }
            | Notification::InviteCancelled { party_id } => Some(party_id),
            Notification::Ping { .. }
            | Notification::FriendAdded { .. }
            | Notification::FriendRemoved { .. }
            | Notification::FriendRequested { .. }
            | Notification::Chat { .. } => None,
        }
    }

    /// Member the notification is scoped to, if any
    pub fn member_id(&self) -> Option<&AccountId> {
        match self {
            Notification::MemberJoined { account_id, .. }
            | Notification::MemberLeft { account_id, .. }
            | Notification::MemberKicked { account_id, .. }
            | Notification::MemberExpired { account_id, .. }
            | Notification::MemberDisconnected { account_id, .. }
            | Notification::MemberStateUpdated { account_id, .. }
            | Notification::MemberNewCaptain { account_id, .. }
            | Notification::MemberRequireConfirmation { account_id, .. } => Some(account_id),
            _ => None,
        }
    }
}

/// Client-visible stream events, notifications included
#[derive(Debug, Clone)]
pub enum PartyEvent {
    /// The presence session finished its handshake
    Connected,
    /// The stream dropped; `will_retry` is false only on explicit
    /// disconnect
    Disconnected {
        will_retry: bool,
    },
    /// The server ended the session and a fresh one was established
    SessionRefreshed,
    /// A contact's presence document changed
    Presence {
        from: ConnectionId,
        available: bool,
        status: StatusDocument,
    },
    /// A parsed notification
    Notification(Notification),
}

/// Stateless fan-out of stream events to interested subscribers
pub struct Router {
    global_tx: broadcast::Sender<PartyEvent>,
    party_topics: Mutex<HashMap<PartyId, broadcast::Sender<Notification>>>,
    member_topics: Mutex<HashMap<(PartyId, AccountId), broadcast::Sender<Notification>>>,
    legacy_tx: broadcast::Sender<Value>,
}

impl Router {
    /// Create a router with empty topic tables
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(TOPIC_CAPACITY);
        let (legacy_tx, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            global_tx,
            party_topics: Mutex::new(HashMap::new()),
            member_topics: Mutex::new(HashMap::new()),
            legacy_tx,
        }
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.global_tx.subscribe()
    }

    /// Subscribe to notifications scoped to one party
    pub fn subscribe_party(&self, party_id: &PartyId) -> broadcast::Receiver<Notification> {
        self.party_topics
            .lock()
            .entry(party_id.clone())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to notifications scoped to one member of one party
    pub fn subscribe_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
    ) -> broadcast::Receiver<Notification> {
        self.member_topics
            .lock()
            .entry((party_id.clone(), account_id.clone()))
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to raw frames of the stream-only join handshake.
    ///
    /// These never surface as [`Notification`]s.
    pub fn subscribe_legacy(&self) -> broadcast::Receiver<Value> {
        self.legacy_tx.subscribe()
    }

    /// Drop the topics of a party the client no longer tracks
    pub fn forget_party(&self, party_id: &PartyId) {
        self.party_topics.lock().remove(party_id);
        self.member_topics
            .lock()
            .retain(|(pid, _), _| pid != party_id);
    }

    /// Publish a stream lifecycle or presence event
    pub fn publish(&self, event: PartyEvent) {
        // A send error only means nobody is listening right now
        let _ = self.global_tx.send(event);
    }

    /// Route one inbound message body
    pub fn dispatch(&self, body: &Value) {
        let kind = body.get("type").and_then(Value::as_str).unwrap_or("");
        if kind.starts_with(LEGACY_PREFIX) {
            debug!(kind, "routing legacy handshake frame");
            let _ = self.legacy_tx.send(body.clone());
            return;
        }

        let Some(notification) = Notification::parse(body) else {
            return;
        };

        if let Some(party_id) = notification.party_id() {
            if let Some(tx) = self.party_topics.lock().get(party_id) {
                let _ = tx.send(notification.clone());
            }
            if let Some(account_id) = notification.member_id() {
                let key = (party_id.clone(), account_id.clone());
                if let Some(tx) = self.member_topics.lock().get(&key) {
                    let _ = tx.send(notification.clone());
                }
            }
        }
        let _ = self.global_tx.send(PartyEvent::Notification(notification));
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_member_state_updated() {
        let body = json!({
            "type": "party.member.state_updated",
            "party_id": "p1",
            "account_id": "m1",
            "revision": 7,
            "member_state_updated": {"Ready_b": "true"},
            "member_state_removed": ["Old_s"],
        });
        let n = Notification::parse(&body).expect("known type");
        match &n {
            Notification::MemberStateUpdated {
                revision,
                member_state_updated,
                member_state_removed,
                ..
            } => {
                assert_eq!(*revision, 7);
                assert_eq!(member_state_updated.get("Ready_b").unwrap(), "true");
                assert_eq!(member_state_removed, &["Old_s".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(n.party_id(), Some(&PartyId::new("p1")));
        assert_eq!(n.member_id(), Some(&AccountId::new("m1")));
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        let body = json!({"type": "party.member.telepathy", "party_id": "p1"});
        assert!(Notification::parse(&body).is_none());
    }

    #[test]
    fn test_dispatch_routes_to_party_and_member_topics() {
        let router = Router::new();
        let mut global = router.subscribe();
        let mut party = router.subscribe_party(&PartyId::new("p1"));
        let mut member = router.subscribe_member(&PartyId::new("p1"), &AccountId::new("m1"));
        let mut other_party = router.subscribe_party(&PartyId::new("p2"));

        router.dispatch(&json!({
            "type": "party.member.left",
            "party_id": "p1",
            "account_id": "m1",
            "revision": 2,
        }));

        assert!(matches!(
            global.try_recv().expect("global"),
            PartyEvent::Notification(Notification::MemberLeft { .. })
        ));
        assert!(matches!(
            party.try_recv().expect("party"),
            Notification::MemberLeft { .. }
        ));
        assert!(matches!(
            member.try_recv().expect("member"),
            Notification::MemberLeft { .. }
        ));
        assert!(other_party.try_recv().is_err());
    }

    #[test]
    fn test_legacy_frames_bypass_notification_parsing() {
        let router = Router::new();
        let mut global = router.subscribe();
        let mut legacy = router.subscribe_legacy();

        router.dispatch(&json!({
            "type": "party.legacy.queryjoinability.response",
            "partyId": "p1",
            "isJoinable": true,
        }));

        let frame = legacy.try_recv().expect("legacy");
        assert_eq!(frame["isJoinable"], true);
        assert!(global.try_recv().is_err());
    }

    #[test]
    fn test_forget_party_drops_topics() {
        let router = Router::new();
        let _keep = router.subscribe_party(&PartyId::new("p1"));
        let _drop = router.subscribe_member(&PartyId::new("p1"), &AccountId::new("m1"));
        router.forget_party(&PartyId::new("p1"));
        assert!(router.party_topics.lock().is_empty());
        assert!(router.member_topics.lock().is_empty());
    }
}
