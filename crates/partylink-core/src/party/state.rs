//! Replicated party state
//!
//! [`PartyState`] is the client's mirror of one party document. It is
//! pure: the only inputs are the initial REST document and the stream
//! of server notifications, applied through [`PartyState::apply`].
//! Every mutating notification carries an authoritative revision and
//! wins exactly when that revision is greater than the mirrored one,
//! so replaying a shuffled notification sequence converges to the same
//! state as the ordered one.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::meta::Meta;
use crate::rest::{MemberDocument, PartyDocument};
use crate::router::Notification;
use crate::types::{AccountId, ConnectionDescriptor, PartyConfig, PartyId, PartyRole};

/// Lifecycle of the local client's membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyPhase {
    /// Join accepted, waiting for the first replicated snapshot
    Joining,
    /// Member of the party
    Active,
    /// Leave requested, waiting for the service
    Leaving,
    /// No longer a member
    Left,
}

/// Mirror of one member
#[derive(Debug, Clone)]
pub struct MemberState {
    /// Member account
    pub account_id: AccountId,
    /// Member attributes
    pub meta: Meta,
    /// Stream sessions the member is attached through
    pub connections: Vec<ConnectionDescriptor>,
    /// Authoritative member revision
    pub revision: u64,
    /// Role, present only for the captain
    pub role: Option<PartyRole>,
    /// When the member joined
    pub joined_at: Option<DateTime<Utc>>,
}

impl MemberState {
    fn from_document(doc: MemberDocument) -> Self {
        Self {
            account_id: doc.account_id,
            meta: Meta::from_wire(doc.meta),
            connections: doc.connections,
            revision: doc.revision,
            role: doc.role,
            joined_at: doc.joined_at,
        }
    }

    /// Whether this member holds the captaincy
    pub fn is_captain(&self) -> bool {
        self.role == Some(PartyRole::Captain)
    }

    /// Display name carried in member meta
    pub fn display_name(&self) -> String {
        self.meta.get_str("DisplayName_s")
    }
}

/// Mirror of one party
#[derive(Debug, Clone)]
pub struct PartyState {
    /// Party id
    pub id: PartyId,
    /// Account of the local client
    pub me: AccountId,
    /// Current configuration
    pub config: PartyConfig,
    /// Party-wide attributes
    pub meta: Meta,
    /// Current members
    pub members: Vec<MemberState>,
    /// Accounts awaiting membership confirmation
    pub pending_members: Vec<AccountId>,
    /// Authoritative party revision
    pub revision: u64,
    /// Local membership lifecycle
    pub phase: PartyPhase,
}

impl PartyState {
    /// Build the mirror from a full REST document
    pub fn from_document(doc: PartyDocument, me: AccountId) -> Self {
        Self {
            id: doc.id,
            me,
            config: doc.config,
            meta: Meta::from_wire(doc.meta),
            members: doc.members.into_iter().map(MemberState::from_document).collect(),
            pending_members: Vec::new(),
            revision: doc.revision,
            phase: PartyPhase::Joining,
        }
    }

    /// Current captain, if replicated yet
    pub fn captain(&self) -> Option<&MemberState> {
        self.members.iter().find(|m| m.is_captain())
    }

    /// Whether the local client holds the captaincy
    pub fn am_captain(&self) -> bool {
        self.captain().map(|c| c.account_id == self.me).unwrap_or(false)
    }

    /// Look up one member
    pub fn member(&self, account_id: &AccountId) -> Option<&MemberState> {
        self.members.iter().find(|m| &m.account_id == account_id)
    }

    fn member_mut(&mut self, account_id: &AccountId) -> Option<&mut MemberState> {
        self.members.iter_mut().find(|m| &m.account_id == account_id)
    }

    /// Whether every seat is taken
    pub fn is_full(&self) -> bool {
        self.members.len() as u32 >= self.config.max_size
    }

    /// Squad assignment document derived from the current member list
    pub fn squad_assignments(&self) -> Value {
        let assignments: Vec<Value> = self
            .members
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                json!({
                    "memberId": m.account_id,
                    "absoluteMemberIdx": idx,
                })
            })
            .collect();
        json!({ "RawSquadAssignments": assignments })
    }

    /// Apply one notification; returns whether the mirror changed.
    ///
    /// Stale revisions are dropped, so the highest revision always
    /// wins regardless of delivery order.
    pub fn apply(&mut self, notification: &Notification) -> bool {
        match notification {
            Notification::MemberJoined {
                account_id,
                connection,
                revision,
                member_state_updated,
                ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                self.pending_members.retain(|a| a != account_id);
                match self.member_mut(account_id) {
                    Some(member) => {
                        // A rejoin from a new session replaces stale
                        // connections
                        member.connections.retain(|c| c.id != connection.id);
                        member.connections.push(connection.clone());
                        member.meta.update_raw(member_state_updated);
                    }
                    None => self.members.push(MemberState {
                        account_id: account_id.clone(),
                        meta: Meta::from_wire(member_state_updated.clone()),
                        connections: vec![connection.clone()],
                        revision: 0,
                        role: None,
                        joined_at: Some(Utc::now()),
                    }),
                }
                if account_id == &self.me {
                    self.phase = PartyPhase::Active;
                }
                true
            }

            Notification::MemberLeft {
                account_id, revision, ..
            }
            | Notification::MemberKicked {
                account_id, revision, ..
            }
            | Notification::MemberExpired {
                account_id, revision, ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                self.members.retain(|m| &m.account_id != account_id);
                if account_id == &self.me {
                    self.phase = PartyPhase::Left;
                }
                true
            }

            Notification::MemberDisconnected {
                account_id,
                connection,
                revision,
                ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                if let Some(member) = self.member_mut(account_id) {
                    match connection {
                        Some(connection) => {
                            member.connections.retain(|c| c.id != connection.id)
                        }
                        None => member.connections.clear(),
                    }
                }
                true
            }

            Notification::MemberStateUpdated {
                account_id,
                revision,
                member_state_updated,
                member_state_removed,
                ..
            } => {
                let Some(member) = self.member_mut(account_id) else {
                    debug!(%account_id, "state update for unknown member");
                    return false;
                };
                // Member revisions advance independently of the party
                if *revision <= member.revision {
                    debug!(
                        %account_id,
                        revision,
                        current = member.revision,
                        "dropping stale member update"
                    );
                    return false;
                }
                member.revision = *revision;
                member.meta.update_raw(member_state_updated);
                member.meta.remove(member_state_removed);
                true
            }

            Notification::MemberNewCaptain {
                account_id, revision, ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                // At most one captain at any time
                for member in &mut self.members {
                    member.role = if &member.account_id == account_id {
                        Some(PartyRole::Captain)
                    } else {
                        None
                    };
                }
                true
            }

            Notification::MemberRequireConfirmation {
                account_id, revision, ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                if !self.pending_members.contains(account_id) {
                    self.pending_members.push(account_id.clone());
                }
                true
            }

            Notification::PartyUpdated {
                revision,
                captain_id,
                party_state_updated,
                party_state_removed,
                max_number_of_members,
                ..
            } => {
                if !self.advance(*revision) {
                    return false;
                }
                if self.phase == PartyPhase::Joining {
                    self.phase = PartyPhase::Active;
                }
                self.meta.update_raw(party_state_updated);
                self.meta.remove(party_state_removed);
                if let Some(max) = max_number_of_members {
                    self.config.max_size = *max;
                }
                if let Some(captain_id) = captain_id {
                    for member in &mut self.members {
                        member.role = if &member.account_id == captain_id {
                            Some(PartyRole::Captain)
                        } else {
                            None
                        };
                    }
                }
                true
            }

            // Invitation, friendship and chat bookkeeping live outside
            // the mirror
            Notification::InviteDeclined { .. }
            | Notification::InviteCancelled { .. }
            | Notification::Ping { .. }
            | Notification::FriendAdded { .. }
            | Notification::FriendRemoved { .. }
            | Notification::FriendRequested { .. }
            | Notification::Chat { .. } => false,
        }
    }

    fn advance(&mut self, revision: u64) -> bool {
        if revision <= self.revision {
            debug!(
                party_id = %self.id,
                revision,
                current = self.revision,
                "dropping stale party notification"
            );
            return false;
        }
        self.revision = revision;
        true
    }
}
