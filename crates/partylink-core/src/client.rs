//! Client facade
//!
//! [`PartyClient`] wires the pieces together: one authenticated
//! session, one presence stream, the REST control plane and the
//! notification router. It hands out explicit [`Party`] handles; there
//! is no ambient singleton, so tests and embedders can run several
//! clients side by side.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::error::{PartyError, PartyResult};
use crate::http::{HttpClient, ReqwestClient};
use crate::meta::{Meta, MetaValue};
use crate::party::invite::{AutoConfirm, ConfirmationPolicy, Invitation, PendingMember};
use crate::party::legacy::{JoinStrategy, LegacyJoin};
use crate::party::party::Party;
use crate::party::state::PartyPhase;
use crate::presence::connection::{ConnectionState, PresenceConnection};
use crate::presence::stanza::{RosterEntry, StatusDocument};
use crate::presence::transport::{StreamTransport, WebSocketTransport};
use crate::rest::{PartyDocument, PartyService};
use crate::router::{Notification, PartyEvent, Router};
use crate::types::{
    AccountId, ClientConfig, ConnectionId, Joinability, PartyConfig, PartyId, PartyPrivacy,
};

/// Bounded wait for the first replicated revision after creating
const FIRST_REVISION_TIMEOUT: Duration = Duration::from_secs(5);

/// One authenticated party client
pub struct PartyClient {
    config: ClientConfig,
    session: Arc<dyn AuthSession>,
    service: Arc<PartyService>,
    router: Arc<Router>,
    connection: Arc<PresenceConnection>,
    policy: Arc<dyn ConfirmationPolicy>,
    current: Arc<Mutex<Option<Party>>>,
}

impl PartyClient {
    /// Build a client over the production transports
    pub fn new(config: ClientConfig, session: Arc<dyn AuthSession>) -> Self {
        Self::with_parts(
            config,
            session,
            Arc::new(ReqwestClient::new()),
            Arc::new(WebSocketTransport),
            Arc::new(AutoConfirm),
        )
    }

    /// Build a client with injected transports and policy
    pub fn with_parts(
        config: ClientConfig,
        session: Arc<dyn AuthSession>,
        http: Arc<dyn HttpClient>,
        transport: Arc<dyn StreamTransport>,
        policy: Arc<dyn ConfirmationPolicy>,
    ) -> Self {
        let router = Arc::new(Router::new());
        let service = Arc::new(PartyService::new(
            http,
            Arc::clone(&session),
            config.party_service_url.clone(),
            config.namespace.clone(),
        ));
        let connection = PresenceConnection::new(
            config.clone(),
            Arc::clone(&session),
            transport,
            Arc::clone(&router),
        );
        Self {
            config,
            session,
            service,
            router,
            connection,
            policy,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Attach the presence stream
    pub async fn connect(&self) -> PartyResult<()> {
        self.connection.connect().await
    }

    /// Detach the presence stream without retrying
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Whether the stream session is live
    pub fn is_connected(&self) -> bool {
        self.connection.state() == ConnectionState::Connected
    }

    /// Subscribe to every client event
    pub fn events(&self) -> broadcast::Receiver<PartyEvent> {
        self.router.subscribe()
    }

    /// Handle to the party currently joined, if any
    pub fn current_party(&self) -> Option<Party> {
        self.current.lock().clone()
    }

    /// Account this client authenticates as
    pub fn account_id(&self) -> AccountId {
        self.session.account_id()
    }

    /// Contacts delivered with the current stream session
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.connection.roster()
    }

    /// Send a direct chat message to a connection
    pub fn send_chat(&self, to: &ConnectionId, message: &str) -> PartyResult<()> {
        self.connection.send_message(
            to.clone(),
            json!({
                "type": "chat.message",
                "sent_by": self.session.account_id(),
                "message": message,
            }),
        )
    }

    /// Create a party and wait for it to settle.
    ///
    /// Any previously joined party is left first. Creation only
    /// succeeds once the first replicated revision has arrived; privacy
    /// tighter than public is applied as a guarded second step after
    /// that, so the patch cannot target a revision the service has
    /// already moved past.
    pub async fn create_party(&self, config: PartyConfig) -> PartyResult<Party> {
        self.leave_current().await?;

        let descriptor = self.connection.descriptor()?;
        let mut party_meta = Meta::new();
        party_meta.set("Build_s", self.config.build_id.as_str());
        party_meta.set("MatchmakingState_s", "NotMatchmaking");
        let member_meta = self.member_meta("Creation");

        let doc = self
            .service
            .create_party(&config, &descriptor, &party_meta.to_wire(), &member_meta)
            .await?;
        let party = self.adopt(doc);

        let revision = match party.wait_for_revision(1, FIRST_REVISION_TIMEOUT).await {
            Ok(revision) => revision,
            Err(e) => {
                *self.current.lock() = None;
                self.router.forget_party(&party.id());
                return Err(e);
            }
        };
        debug!(revision, "party settled");

        if config.privacy != PartyPrivacy::Public {
            self.apply_privacy(&party, config.privacy).await?;
        }
        info!(party_id = %party.id(), "party created");
        Ok(party)
    }

    /// Join a party by id
    pub async fn join_party(
        &self,
        party_id: &PartyId,
        strategy: JoinStrategy,
    ) -> PartyResult<Party> {
        self.leave_current().await?;

        let doc = self.service.fetch_party(party_id).await?;
        if doc.members.len() as u32 >= doc.config.max_size {
            return Err(PartyError::PartyFull);
        }

        let doc = match strategy {
            JoinStrategy::RestPush => {
                let descriptor = self.connection.descriptor()?;
                self.service
                    .join_party(party_id, &descriptor, &self.member_meta("Invitation"))
                    .await?;
                // The join answer is thin; refetch the settled document
                self.service.fetch_party(party_id).await?
            }
            JoinStrategy::LegacyHandshake => self.legacy_join(doc).await?,
        };

        let party = self.adopt(doc);
        info!(party_id = %party.id(), "joined party");
        Ok(party)
    }

    async fn legacy_join(&self, doc: PartyDocument) -> PartyResult<PartyDocument> {
        let captain = doc
            .members
            .iter()
            .find(|m| m.role.is_some())
            .ok_or_else(|| PartyError::InvalidState("party has no captain".to_string()))?;
        let via = captain
            .connections
            .first()
            .map(|c| c.id.clone())
            .ok_or_else(|| PartyError::InvalidState("captain has no connection".to_string()))?;

        let join = LegacyJoin::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.router),
            Arc::clone(&self.session),
            self.config.platform.clone(),
        );
        let data = join.join(&doc.id, &via).await?;
        let party = data
            .get("party")
            .cloned()
            .ok_or_else(|| PartyError::Malformed("partydata without party".to_string()))?;
        Ok(serde_json::from_value(party)?)
    }

    /// Invitations currently addressed to this account
    pub async fn invitations(&self) -> PartyResult<Vec<Invitation>> {
        let inbox = self.service.fetch_user_inbox(&self.session.account_id()).await?;
        let mut invitations = Vec::new();
        for ping in inbox.pings {
            // A ping resolves to the sender's current party
            let parties = self.service.fetch_ping_parties(&ping.sent_by).await?;
            let Some(doc) = parties.into_iter().next() else {
                debug!(sent_by = %ping.sent_by, "ping without a party, ignoring");
                continue;
            };
            invitations.push(Invitation {
                party_id: doc.id,
                sent_by: ping.sent_by,
                meta: BTreeMap::new(),
                sent_at: ping.sent_at,
            });
        }
        Ok(invitations)
    }

    /// Accept an invitation, leaving any prior party first
    pub async fn accept_invitation(&self, invitation: &Invitation) -> PartyResult<Party> {
        let party = self
            .join_party(&invitation.party_id, JoinStrategy::RestPush)
            .await?;
        if let Err(e) = self.service.delete_ping(&invitation.sent_by).await {
            warn!(error = %e, "could not clear accepted ping");
        }
        Ok(party)
    }

    /// Decline an invitation
    pub async fn decline_invitation(&self, invitation: &Invitation) -> PartyResult<()> {
        self.service.decline_invite(&invitation.party_id).await?;
        if let Err(e) = self.service.delete_ping(&invitation.sent_by).await {
            warn!(error = %e, "could not clear declined ping");
        }
        Ok(())
    }

    /// Rejoin the party the service still tracks for this account
    pub async fn restore(&self) -> PartyResult<Option<Party>> {
        let inbox = self.service.fetch_user_inbox(&self.session.account_id()).await?;
        let Some(doc) = inbox.current.into_iter().next() else {
            return Ok(None);
        };
        info!(party_id = %doc.id, "restoring tracked party");
        Ok(Some(self.adopt(doc)))
    }

    /// Leave the current party, if any
    pub async fn leave_current(&self) -> PartyResult<()> {
        let party = self.current.lock().take();
        if let Some(party) = party {
            party.leave().await?;
        }
        Ok(())
    }

    /// Publish a presence status, advertising the current party
    pub fn set_status(&self, text: &str, playing: bool, session_id: &str) -> PartyResult<()> {
        let mut status = StatusDocument {
            status: text.to_string(),
            is_playing: playing,
            has_voice_support: false,
            session_id: session_id.to_string(),
            ..Default::default()
        };
        if let Some(party) = self.current_party() {
            let state = party.snapshot();
            status.is_joinable = state.config.joinability == Joinability::Open;
            status.properties.insert(
                format!("party.joininfodata.{}_j", state.config.type_id),
                json!({
                    "partyId": state.id.as_str(),
                    "sourceId": self.session.account_id(),
                    "sourceDisplayName": self.session.display_name(),
                    "memberCount": state.members.len(),
                }),
            );
        }
        self.connection.update_status(status)
    }

    fn member_meta(&self, join_method: &str) -> BTreeMap<String, String> {
        let mut meta = Meta::new();
        meta.set("DisplayName_s", self.session.display_name());
        meta.set("Platform_s", self.config.platform.as_str());
        meta.set("JoinMethod_s", join_method);
        meta.to_wire()
    }

    async fn apply_privacy(&self, party: &Party, privacy: PartyPrivacy) -> PartyResult<()> {
        let joinability = match privacy {
            PartyPrivacy::Public => Joinability::Open,
            PartyPrivacy::Friends | PartyPrivacy::Private => Joinability::InviteAndFormer,
        };
        party.update_config(Some(joinability), None, None).await?;

        let settings = json!({
            "partyType": match privacy {
                PartyPrivacy::Public => "Public",
                PartyPrivacy::Friends => "FriendsOnly",
                PartyPrivacy::Private => "Private",
            },
            "partyInviteRestriction": "AnyMember",
            "bOnlyLeaderFriendsCanJoin": privacy == PartyPrivacy::Private,
        });
        party
            .patch_meta(
                vec![("PrivacySettings_j".to_string(), MetaValue::Json(settings))],
                vec![],
            )
            .await
    }

    /// Wrap a document, start tracking it and make it current
    fn adopt(&self, doc: PartyDocument) -> Party {
        let party = Party::new(
            doc,
            Arc::clone(&self.service),
            Arc::clone(&self.router),
            self.session.account_id(),
        );
        self.track(&party);
        *self.current.lock() = Some(party.clone());
        party
    }

    /// Feed party-scoped notifications into the mirror
    fn track(&self, party: &Party) {
        let mut rx = self.router.subscribe_party(&party.id());
        let party = party.clone();
        let me = self.session.account_id();
        let service = Arc::clone(&self.service);
        let policy = Arc::clone(&self.policy);
        let current = Arc::clone(&self.current);

        tokio::spawn(async move {
            loop {
                let notification = match rx.recv().await {
                    Ok(n) => n,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "party topic lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                party.apply(&notification);

                if let Notification::MemberRequireConfirmation { account_id, .. } = &notification {
                    if party.am_captain() {
                        let pending = PendingMember {
                            party_id: party.id(),
                            account_id: account_id.clone(),
                        };
                        let verdict = policy.review(&pending).await;
                        let result = if verdict {
                            service.confirm_member(&pending.party_id, &pending.account_id).await
                        } else {
                            service.reject_member(&pending.party_id, &pending.account_id).await
                        };
                        if let Err(e) = result {
                            warn!(error = %e, account_id = %pending.account_id,
                                "confirmation decision failed");
                        }
                    }
                }

                // Our own removal ends tracking
                if party.snapshot().phase == PartyPhase::Left {
                    let mut guard = current.lock();
                    let ours = guard
                        .as_ref()
                        .map(|p| p.id() == party.id())
                        .unwrap_or(false);
                    if ours {
                        *guard = None;
                    }
                    drop(guard);
                    info!(party_id = %party.id(), account_id = %me, "membership ended");
                    return;
                }
            }
        });
    }
}

impl std::fmt::Debug for PartyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyClient")
            .field("account_id", &self.session.account_id())
            .field("namespace", &self.config.namespace)
            .finish()
    }
}
