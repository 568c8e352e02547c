//! Party handle
//!
//! [`Party`] is a cheap clonable handle over the shared mirror of one
//! party. Mutations go out as revisioned REST patches; membership and
//! captaincy effects are never applied optimistically, only when the
//! matching notification comes back on the stream. Captain-only
//! operations are rejected locally before touching the network.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{PartyError, PartyResult};
use crate::meta::MetaValue;
use crate::party::member::Member;
use crate::party::state::{MemberState, PartyPhase, PartyState};
use crate::rest::{MetaPatch, PartyDocument, PartyPatch, PartyService};
use crate::router::{Notification, Router};
use crate::types::{AccountId, Joinability, PartyId};

pub(crate) struct PartyShared {
    pub(crate) state: Mutex<PartyState>,
    pub(crate) service: Arc<PartyService>,
    pub(crate) router: Arc<Router>,
    pub(crate) me: AccountId,
    /// Revision after each applied notification, for bounded waits
    pub(crate) revision_tx: broadcast::Sender<u64>,
    /// Single-flight gate over party-wide patches
    pub(crate) party_gate: tokio::sync::Mutex<()>,
    /// Single-flight gate over own member patches; queued callers
    /// flush in order, each at a strictly higher revision
    pub(crate) member_gate: tokio::sync::Mutex<()>,
}

/// Handle to one joined party
#[derive(Clone)]
pub struct Party {
    pub(crate) shared: Arc<PartyShared>,
}

impl Party {
    /// Wrap a freshly fetched or created party document
    pub fn new(
        doc: PartyDocument,
        service: Arc<PartyService>,
        router: Arc<Router>,
        me: AccountId,
    ) -> Self {
        let (revision_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(PartyShared {
                state: Mutex::new(PartyState::from_document(doc, me.clone())),
                service,
                router,
                me,
                revision_tx,
                party_gate: tokio::sync::Mutex::new(()),
                member_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Party id
    pub fn id(&self) -> PartyId {
        self.shared.state.lock().id.clone()
    }

    /// Clone of the current mirror
    pub fn snapshot(&self) -> PartyState {
        self.shared.state.lock().clone()
    }

    /// Current members
    pub fn members(&self) -> Vec<MemberState> {
        self.shared.state.lock().members.clone()
    }

    /// Handle to one member, if present
    pub fn member(&self, account_id: &AccountId) -> Option<Member> {
        self.shared
            .state
            .lock()
            .member(account_id)
            .map(|m| Member::new(Arc::clone(&self.shared), m.account_id.clone()))
    }

    /// Handle to the local client's own membership
    pub fn me(&self) -> Member {
        Member::new(Arc::clone(&self.shared), self.shared.me.clone())
    }

    /// Whether the local client holds the captaincy
    pub fn am_captain(&self) -> bool {
        self.shared.state.lock().am_captain()
    }

    /// Apply one notification to the mirror
    pub fn apply(&self, notification: &Notification) -> bool {
        let (changed, revision) = {
            let mut state = self.shared.state.lock();
            (state.apply(notification), state.revision)
        };
        if changed {
            let _ = self.shared.revision_tx.send(revision);
        }
        changed
    }

    /// Wait until the mirrored party revision reaches `min`
    pub async fn wait_for_revision(&self, min: u64, within: Duration) -> PartyResult<u64> {
        let mut rx = self.shared.revision_tx.subscribe();
        {
            let current = self.shared.state.lock().revision;
            if current >= min {
                return Ok(current);
            }
        }
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(revision)) if revision >= min => return Ok(revision),
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                    let current = self.shared.state.lock().revision;
                    if current >= min {
                        return Ok(current);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
                    return Err(PartyError::Timeout(format!("party revision {min}")))
                }
            }
        }
    }

    fn require_captain(&self) -> PartyResult<()> {
        if self.shared.state.lock().am_captain() {
            Ok(())
        } else {
            Err(PartyError::NotLeader)
        }
    }

    /// Patch party-wide attributes; captain only
    pub async fn patch_meta(
        &self,
        updates: Vec<(String, MetaValue)>,
        deletes: Vec<String>,
    ) -> PartyResult<()> {
        self.require_captain()?;
        let _flight = self.shared.party_gate.lock().await;
        // Re-check under the gate; captaincy may have moved while
        // a previous patch was in flight
        self.require_captain()?;

        let revision = self.shared.state.lock().revision;
        let mut meta = MetaPatch {
            delete: deletes.clone(),
            ..Default::default()
        };
        for (key, value) in &updates {
            meta.update.insert(key.clone(), value.encode());
        }
        let patch = PartyPatch {
            config: None,
            meta,
            revision,
        };
        let party_id = self.id();
        self.shared.service.patch_party(&party_id, &patch).await?;

        let mut state = self.shared.state.lock();
        state.meta.update_raw(&patch.meta.update);
        state.meta.remove(&deletes);
        state.revision += 1;
        debug!(party_id = %party_id, revision = state.revision, "party meta patched");
        Ok(())
    }

    /// Change the party configuration; captain only
    pub async fn update_config(
        &self,
        joinability: Option<Joinability>,
        max_size: Option<u32>,
        join_confirmation: Option<bool>,
    ) -> PartyResult<()> {
        self.require_captain()?;
        let _flight = self.shared.party_gate.lock().await;
        self.require_captain()?;

        let revision = self.shared.state.lock().revision;
        let mut config = serde_json::Map::new();
        if let Some(joinability) = joinability {
            config.insert("joinability".to_string(), serde_json::to_value(joinability)?);
        }
        if let Some(max_size) = max_size {
            config.insert("max_size".to_string(), json!(max_size));
        }
        if let Some(join_confirmation) = join_confirmation {
            config.insert("join_confirmation".to_string(), json!(join_confirmation));
        }
        let patch = PartyPatch {
            config: Some(config.into()),
            meta: MetaPatch::default(),
            revision,
        };
        let party_id = self.id();
        self.shared.service.patch_party(&party_id, &patch).await?;

        let mut state = self.shared.state.lock();
        if let Some(joinability) = joinability {
            state.config.joinability = joinability;
        }
        if let Some(max_size) = max_size {
            state.config.max_size = max_size;
        }
        if let Some(join_confirmation) = join_confirmation {
            state.config.join_confirmation = join_confirmation;
        }
        state.revision += 1;
        Ok(())
    }

    /// Republish the squad assignment document; captain only
    pub async fn refresh_squad_assignments(&self) -> PartyResult<()> {
        let assignments = self.shared.state.lock().squad_assignments();
        self.patch_meta(
            vec![(
                "RawSquadAssignments_j".to_string(),
                MetaValue::Json(assignments),
            )],
            vec![],
        )
        .await
    }

    /// Remove another member; captain only.
    ///
    /// The mirror is untouched here: the member disappears when the
    /// kick notification arrives.
    pub async fn kick(&self, account_id: &AccountId) -> PartyResult<()> {
        self.require_captain()?;
        if account_id == &self.shared.me {
            return Err(PartyError::InvalidState(
                "cannot kick self, leave instead".to_string(),
            ));
        }
        if self.shared.state.lock().member(account_id).is_none() {
            return Err(PartyError::InvalidState(format!(
                "{account_id} is not a member"
            )));
        }
        let party_id = self.id();
        info!(party_id = %party_id, %account_id, "kicking member");
        self.shared.service.remove_member(&party_id, account_id).await
    }

    /// Hand the captaincy to another member; captain only.
    ///
    /// The role moves when the new-captain notification arrives.
    pub async fn promote(&self, account_id: &AccountId) -> PartyResult<()> {
        self.require_captain()?;
        if self.shared.state.lock().member(account_id).is_none() {
            return Err(PartyError::InvalidState(format!(
                "{account_id} is not a member"
            )));
        }
        let party_id = self.id();
        info!(party_id = %party_id, %account_id, "promoting member");
        self.shared.service.promote_member(&party_id, account_id).await
    }

    /// Invite an account; any member may invite
    pub async fn invite(&self, account_id: &AccountId) -> PartyResult<()> {
        self.shared.service.send_ping(account_id).await
    }

    /// Confirm a pending member; captain only
    pub async fn confirm(&self, account_id: &AccountId) -> PartyResult<()> {
        self.require_captain()?;
        let party_id = self.id();
        self.shared.service.confirm_member(&party_id, account_id).await
    }

    /// Reject a pending member; captain only
    pub async fn reject(&self, account_id: &AccountId) -> PartyResult<()> {
        self.require_captain()?;
        let party_id = self.id();
        self.shared.service.reject_member(&party_id, account_id).await
    }

    /// Leave the party and drop its stream topics
    pub async fn leave(&self) -> PartyResult<()> {
        let party_id = self.id();
        {
            let mut state = self.shared.state.lock();
            if state.phase == PartyPhase::Left {
                return Ok(());
            }
            state.phase = PartyPhase::Leaving;
        }
        let result = self
            .shared
            .service
            .remove_member(&party_id, &self.shared.me)
            .await;
        // The handle is dead either way
        self.shared.state.lock().phase = PartyPhase::Left;
        self.shared.router.forget_party(&party_id);
        info!(party_id = %party_id, "left party");
        result
    }
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Party")
            .field("id", &state.id)
            .field("revision", &state.revision)
            .field("members", &state.members.len())
            .field("phase", &state.phase)
            .finish()
    }
}
