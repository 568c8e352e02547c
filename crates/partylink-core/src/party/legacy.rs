//! Stream-only join handshake
//!
//! Older deployments have no REST join endpoint; joining negotiates
//! directly with the captain's client over directed message frames:
//!
//! 1. `queryjoinability` → `queryjoinability.response`
//! 2. `joinrequest` → `joinrequest.approved` (or `.rejected`)
//! 3. `joinacknowledged`
//! 4. `partydata` with the full party snapshot
//!
//! Each answer is awaited with a bounded timeout. A rejection of type
//! 4 redirects to the party the captain has since moved to and is
//! followed exactly one hop; type 7 means the joiner is already
//! tracked as a member elsewhere.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::error::{PartyError, PartyResult};
use crate::presence::connection::PresenceConnection;
use crate::router::Router;
use crate::types::{ConnectionId, PartyId};

/// Bounded wait on each handshake answer
const STEP_TIMEOUT: Duration = Duration::from_secs(4);

/// Rejection: the target party moved, the response names the new one
const REJECTION_REDIRECT: u8 = 4;
/// Rejection: the joiner is already tracked as a member of a party
const REJECTION_ALREADY_IN_PARTY: u8 = 7;

/// How join attempts negotiate membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    /// REST join endpoint plus pushed notifications
    #[default]
    RestPush,
    /// Stream-only handshake against the captain's client
    LegacyHandshake,
}

/// Outcome of one joinability query
#[derive(Debug, Clone, PartialEq)]
struct JoinabilityVerdict {
    joinable: bool,
    rejection_type: u8,
    result_param: String,
}

/// Driver for the stream-only handshake
pub struct LegacyJoin {
    connection: Arc<PresenceConnection>,
    router: Arc<Router>,
    session: Arc<dyn AuthSession>,
    platform: String,
}

impl LegacyJoin {
    /// Build a handshake driver over a live stream
    pub fn new(
        connection: Arc<PresenceConnection>,
        router: Arc<Router>,
        session: Arc<dyn AuthSession>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            router,
            session,
            platform: platform.into(),
        }
    }

    /// Run the handshake against a party via its captain's connection.
    ///
    /// Returns the party snapshot from the final `partydata` frame.
    pub async fn join(&self, party_id: &PartyId, via: &ConnectionId) -> PartyResult<Value> {
        self.attempt(party_id, via).await
    }

    async fn attempt(&self, party_id: &PartyId, via: &ConnectionId) -> PartyResult<Value> {
        let verdict = self.query_joinability(party_id, via).await?;
        if !verdict.joinable {
            if verdict.rejection_type == REJECTION_REDIRECT && !verdict.result_param.is_empty() {
                // The captain moved on; follow exactly one hop
                let redirect = PartyId::new(verdict.result_param.clone());
                info!(from = %party_id, to = %redirect, "join redirected");
                let second = self.query_joinability(&redirect, via).await?;
                if !second.joinable {
                    return Err(self.rejection_error(&second));
                }
                return self.negotiate(&redirect, via).await;
            }
            return Err(self.rejection_error(&verdict));
        }
        self.negotiate(party_id, via).await
    }

    fn rejection_error(&self, verdict: &JoinabilityVerdict) -> PartyError {
        if verdict.rejection_type == REJECTION_ALREADY_IN_PARTY {
            PartyError::AlreadyInParty
        } else {
            PartyError::NotJoinable(verdict.rejection_type)
        }
    }

    async fn query_joinability(
        &self,
        party_id: &PartyId,
        via: &ConnectionId,
    ) -> PartyResult<JoinabilityVerdict> {
        let mut frames = self.router.subscribe_legacy();
        self.connection.send_message(
            via.clone(),
            json!({
                "type": "party.legacy.queryjoinability",
                "partyId": party_id.as_str(),
                "accountId": self.session.account_id(),
            }),
        )?;
        let frame = self
            .await_frame(&mut frames, "party.legacy.queryjoinability.response", party_id)
            .await?;
        parse_verdict(&frame)
    }

    async fn negotiate(&self, party_id: &PartyId, via: &ConnectionId) -> PartyResult<Value> {
        let mut frames = self.router.subscribe_legacy();
        self.connection.send_message(
            via.clone(),
            json!({
                "type": "party.legacy.joinrequest",
                "partyId": party_id.as_str(),
                "accountId": self.session.account_id(),
                "displayName": self.session.display_name(),
                "platform": self.platform,
            }),
        )?;

        // Approval and rejection arrive on the same topic
        let answer = self
            .await_any(
                &mut frames,
                &[
                    "party.legacy.joinrequest.approved",
                    "party.legacy.joinrequest.rejected",
                ],
                party_id,
            )
            .await?;
        if answer["type"] == "party.legacy.joinrequest.rejected" {
            let verdict = parse_verdict(&answer)?;
            warn!(party_id = %party_id, rejection = verdict.rejection_type, "join rejected");
            return Err(self.rejection_error(&verdict));
        }

        self.connection.send_message(
            via.clone(),
            json!({
                "type": "party.legacy.joinacknowledged",
                "partyId": party_id.as_str(),
                "accountId": self.session.account_id(),
            }),
        )?;

        let data = self
            .await_frame(&mut frames, "party.legacy.partydata", party_id)
            .await?;
        info!(party_id = %party_id, "handshake complete");
        Ok(data)
    }

    async fn await_frame(
        &self,
        frames: &mut broadcast::Receiver<Value>,
        kind: &str,
        party_id: &PartyId,
    ) -> PartyResult<Value> {
        self.await_any(frames, &[kind], party_id).await
    }

    async fn await_any(
        &self,
        frames: &mut broadcast::Receiver<Value>,
        kinds: &[&str],
        party_id: &PartyId,
    ) -> PartyResult<Value> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = match tokio::time::timeout(remaining, frames.recv()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(PartyError::ConnectionClosed)
                }
                Err(_) => return Err(PartyError::Timeout(kinds.join("|"))),
            };
            let frame_kind = frame.get("type").and_then(Value::as_str).unwrap_or("");
            let frame_party = frame.get("partyId").and_then(Value::as_str).unwrap_or("");
            if kinds.contains(&frame_kind) && frame_party == party_id.as_str() {
                return Ok(frame);
            }
            debug!(frame_kind, "skipping unrelated handshake frame");
        }
    }
}

fn parse_verdict(frame: &Value) -> PartyResult<JoinabilityVerdict> {
    Ok(JoinabilityVerdict {
        joinable: frame
            .get("isJoinable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        rejection_type: frame
            .get("rejectionType")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u8,
        result_param: frame
            .get("resultParam")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}
