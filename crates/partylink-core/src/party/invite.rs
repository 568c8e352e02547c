//! Invitations and membership confirmation
//!
//! Invitations ride on pings: inviting posts a ping to the invitee,
//! whose client resolves it to the inviter's party and either sends a
//! join request or declines. On the receiving side a party with join
//! confirmation enabled surfaces attaching peers as [`PendingMember`]s
//! which a [`ConfirmationPolicy`] reviews.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{AccountId, PartyId};

/// An invitation addressed to the local client
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    /// Party the invitation leads to
    pub party_id: PartyId,
    /// Inviting account
    pub sent_by: AccountId,
    /// Attributes attached to the ping
    pub meta: BTreeMap<String, String>,
    /// When the ping was sent
    pub sent_at: Option<DateTime<Utc>>,
}

/// An attaching peer awaiting confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMember {
    /// Party being joined
    pub party_id: PartyId,
    /// Account awaiting confirmation
    pub account_id: AccountId,
}

/// Decides the fate of members awaiting confirmation
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    /// true confirms the pending member, false rejects them
    async fn review(&self, pending: &PendingMember) -> bool;
}

/// Policy that waves every pending member through
#[derive(Debug, Default)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationPolicy for AutoConfirm {
    async fn review(&self, _pending: &PendingMember) -> bool {
        true
    }
}
