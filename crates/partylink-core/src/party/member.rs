//! Member handle
//!
//! [`Member`] exposes one member's replicated attributes and, for the
//! local client's own row, revisioned patching. Patches are
//! single-flight: a queued caller waits for the previous flush and
//! then targets the next revision, so concurrent writers never race
//! the same revision. Patching another account's row is rejected
//! before any request goes out.

use std::sync::Arc;

use tracing::debug;

use crate::error::{PartyError, PartyResult};
use crate::meta::MetaValue;
use crate::party::party::PartyShared;
use crate::party::state::MemberState;
use crate::rest::MetaPatch;
use crate::types::AccountId;

/// Handle to one member of a joined party
#[derive(Clone)]
pub struct Member {
    shared: Arc<PartyShared>,
    account_id: AccountId,
}

impl Member {
    pub(crate) fn new(shared: Arc<PartyShared>, account_id: AccountId) -> Self {
        Self { shared, account_id }
    }

    /// Member account
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Whether this handle is the local client's own row
    pub fn is_self(&self) -> bool {
        self.account_id == self.shared.me
    }

    /// Clone of the member's mirrored row
    pub fn snapshot(&self) -> PartyResult<MemberState> {
        self.shared
            .state
            .lock()
            .member(&self.account_id)
            .cloned()
            .ok_or_else(|| {
                PartyError::InvalidState(format!("{} is no longer a member", self.account_id))
            })
    }

    /// Whether the member holds the captaincy
    pub fn is_captain(&self) -> bool {
        self.shared
            .state
            .lock()
            .member(&self.account_id)
            .map(|m| m.is_captain())
            .unwrap_or(false)
    }

    /// Typed read of one attribute
    pub fn get(&self, key: &str) -> PartyResult<MetaValue> {
        Ok(self.snapshot()?.meta.get(key))
    }

    /// Patch the member's attributes.
    ///
    /// Only the local client's own row may be patched; anything else
    /// fails without a request. Callers queue behind in-flight
    /// patches and flush in order.
    pub async fn patch_meta(
        &self,
        updates: Vec<(String, MetaValue)>,
        deletes: Vec<String>,
    ) -> PartyResult<()> {
        if !self.is_self() {
            return Err(PartyError::Forbidden(format!(
                "cannot patch member {}",
                self.account_id
            )));
        }

        let _flight = self.shared.member_gate.lock().await;

        let (party_id, revision) = {
            let state = self.shared.state.lock();
            let member = state.member(&self.account_id).ok_or_else(|| {
                PartyError::InvalidState(format!("{} is no longer a member", self.account_id))
            })?;
            (state.id.clone(), member.revision)
        };

        let mut patch = MetaPatch {
            delete: deletes.clone(),
            ..Default::default()
        };
        for (key, value) in &updates {
            patch.update.insert(key.clone(), value.encode());
        }

        self.shared
            .service
            .patch_member(&party_id, &self.account_id, revision, &patch)
            .await?;

        let mut state = self.shared.state.lock();
        if let Some(member) = state
            .members
            .iter_mut()
            .find(|m| m.account_id == self.account_id)
        {
            member.meta.update_raw(&patch.update);
            member.meta.remove(&deletes);
            member.revision += 1;
            debug!(
                party_id = %party_id,
                account_id = %self.account_id,
                revision = member.revision,
                "member meta patched"
            );
        }
        Ok(())
    }

    /// Set a single attribute
    pub async fn set(&self, key: impl Into<String>, value: impl Into<MetaValue>) -> PartyResult<()> {
        self.patch_meta(vec![(key.into(), value.into())], vec![]).await
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("account_id", &self.account_id)
            .finish()
    }
}
