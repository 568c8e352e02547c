//! Typed wrappers over the party service REST endpoints
//!
//! [`PartyService`] owns the base URL and application namespace and
//! turns each control-plane operation into a single method returning a
//! typed result. All bodies and paths live here so the state machine
//! never builds URLs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::auth::AuthSession;
use crate::error::PartyResult;
use crate::http::{check_response, HttpClient, Method};
use crate::types::{AccountId, ConnectionDescriptor, PartyConfig, PartyId, PartyRole};

/// Full party document as returned by the service
#[derive(Debug, Clone, Deserialize)]
pub struct PartyDocument {
    /// Party id
    pub id: PartyId,
    /// Current configuration
    #[serde(default)]
    pub config: PartyConfig,
    /// Current members
    #[serde(default)]
    pub members: Vec<MemberDocument>,
    /// Party-wide attributes, wire-encoded
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Authoritative party revision
    #[serde(default)]
    pub revision: u64,
    /// Outstanding invitations
    #[serde(default)]
    pub invites: Vec<InviteDocument>,
}

/// One member inside a party document
#[derive(Debug, Clone, Deserialize)]
pub struct MemberDocument {
    /// Member account
    pub account_id: AccountId,
    /// Member attributes, wire-encoded
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Stream sessions the member is attached through
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
    /// Authoritative member revision
    #[serde(default)]
    pub revision: u64,
    /// Role, present only for the captain
    #[serde(default)]
    pub role: Option<PartyRole>,
    /// When the member joined, RFC 3339
    #[serde(default)]
    pub joined_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One outstanding invitation inside a party document
#[derive(Debug, Clone, Deserialize)]
pub struct InviteDocument {
    /// Inviting member
    pub sent_by: AccountId,
    /// Invited account
    pub sent_to: AccountId,
    /// Invitation status (SENT, ...)
    #[serde(default)]
    pub status: String,
    /// When the invitation was sent, RFC 3339
    #[serde(default)]
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Body of a party-wide PATCH
#[derive(Debug, Clone, Serialize, Default)]
pub struct PartyPatch {
    /// Config fields to replace, absent fields untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Meta keys to delete and wire-encoded keys to update
    pub meta: MetaPatch,
    /// Revision this patch targets
    pub revision: u64,
}

/// delete/update halves of a meta patch
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetaPatch {
    /// Keys to delete
    pub delete: Vec<String>,
    /// Wire-encoded keys to set
    pub update: BTreeMap<String, String>,
}

/// Parties and pings addressed to an account
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserInbox {
    /// Parties the account currently belongs to
    #[serde(default)]
    pub current: Vec<PartyDocument>,
    /// Pending invitation pings
    #[serde(default)]
    pub pings: Vec<PingDocument>,
}

/// One invitation ping
#[derive(Debug, Clone, Deserialize)]
pub struct PingDocument {
    /// Account that sent the ping
    pub sent_by: AccountId,
    /// When the ping was sent, RFC 3339
    #[serde(default)]
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// REST facade over the party service
pub struct PartyService {
    http: Arc<dyn HttpClient>,
    session: Arc<dyn AuthSession>,
    base_url: String,
    namespace: String,
}

impl PartyService {
    /// Build a service facade for one namespace
    pub fn new(
        http: Arc<dyn HttpClient>,
        session: Arc<dyn AuthSession>,
        base_url: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            http,
            session,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.namespace, tail)
    }

    async fn call(&self, method: Method, url: &str, body: Option<Value>) -> PartyResult<Value> {
        let response = self
            .http
            .send(method, url, &self.session.bearer(), body)
            .await?;
        check_response(response)
    }

    /// Create a party with the given config, initial meta and the
    /// creator's first connection
    pub async fn create_party(
        &self,
        config: &PartyConfig,
        connection: &ConnectionDescriptor,
        meta: &BTreeMap<String, String>,
        member_meta: &BTreeMap<String, String>,
    ) -> PartyResult<PartyDocument> {
        let body = json!({
            "config": {
                "join_confirmation": config.join_confirmation,
                "joinability": config.joinability,
                "max_size": config.max_size,
            },
            "join_info": {
                "connection": connection,
                "meta": member_meta,
            },
            "meta": meta,
        });
        let value = self.call(Method::Post, &self.url("parties"), Some(body)).await?;
        let doc: PartyDocument = serde_json::from_value(value)?;
        info!(party_id = %doc.id, revision = doc.revision, "party created");
        Ok(doc)
    }

    /// Fetch one party by id
    pub async fn fetch_party(&self, party_id: &PartyId) -> PartyResult<PartyDocument> {
        let url = self.url(&format!("parties/{}", party_id.as_str()));
        let value = self.call(Method::Get, &url, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Fetch the parties and pings addressed to an account
    pub async fn fetch_user_inbox(&self, account_id: &AccountId) -> PartyResult<UserInbox> {
        let url = self.url(&format!("user/{}", account_id));
        let value = self.call(Method::Get, &url, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Join a party, attaching the caller's connection
    pub async fn join_party(
        &self,
        party_id: &PartyId,
        connection: &ConnectionDescriptor,
        member_meta: &BTreeMap<String, String>,
    ) -> PartyResult<Value> {
        let account_id = self.session.account_id();
        let url = self.url(&format!(
            "parties/{}/members/{}/join",
            party_id.as_str(),
            account_id
        ));
        let body = json!({
            "connection": connection,
            "meta": member_meta,
        });
        debug!(party_id = %party_id, "joining party");
        self.call(Method::Post, &url, Some(body)).await
    }

    /// Leave a party (or kick, when the target is another member)
    pub async fn remove_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
    ) -> PartyResult<()> {
        let url = self.url(&format!(
            "parties/{}/members/{}",
            party_id.as_str(),
            account_id
        ));
        self.call(Method::Delete, &url, None).await?;
        Ok(())
    }

    /// Apply a party-wide patch at a target revision
    pub async fn patch_party(&self, party_id: &PartyId, patch: &PartyPatch) -> PartyResult<()> {
        let url = self.url(&format!("parties/{}", party_id.as_str()));
        let body = serde_json::to_value(patch)?;
        debug!(party_id = %party_id, revision = patch.revision, "patching party");
        self.call(Method::Patch, &url, Some(body)).await?;
        Ok(())
    }

    /// Apply a member meta patch at a target revision
    pub async fn patch_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
        revision: u64,
        patch: &MetaPatch,
    ) -> PartyResult<()> {
        let url = self.url(&format!(
            "parties/{}/members/{}/meta",
            party_id.as_str(),
            account_id
        ));
        let body = json!({
            "delete": patch.delete,
            "revision": revision,
            "update": patch.update,
        });
        debug!(party_id = %party_id, %account_id, revision, "patching member");
        self.call(Method::Patch, &url, Some(body)).await?;
        Ok(())
    }

    /// Promote a member to captain
    pub async fn promote_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
    ) -> PartyResult<()> {
        let url = self.url(&format!(
            "parties/{}/members/{}/promote",
            party_id.as_str(),
            account_id
        ));
        self.call(Method::Post, &url, None).await?;
        Ok(())
    }

    /// Confirm an applicant awaiting membership confirmation
    pub async fn confirm_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
    ) -> PartyResult<()> {
        let url = self.url(&format!(
            "parties/{}/members/{}/confirm",
            party_id.as_str(),
            account_id
        ));
        self.call(Method::Post, &url, None).await?;
        Ok(())
    }

    /// Reject an applicant awaiting membership confirmation
    pub async fn reject_member(
        &self,
        party_id: &PartyId,
        account_id: &AccountId,
    ) -> PartyResult<()> {
        let url = self.url(&format!(
            "parties/{}/members/{}/reject",
            party_id.as_str(),
            account_id
        ));
        self.call(Method::Post, &url, None).await?;
        Ok(())
    }

    /// Invite an account by sending it a ping
    pub async fn send_ping(&self, to: &AccountId) -> PartyResult<()> {
        let from = self.session.account_id();
        let url = self.url(&format!("user/{}/pings/{}", to, from));
        self.call(Method::Post, &url, None).await?;
        Ok(())
    }

    /// Delete a ping previously sent to the caller
    pub async fn delete_ping(&self, from: &AccountId) -> PartyResult<()> {
        let me = self.session.account_id();
        let url = self.url(&format!("user/{}/pings/{}", me, from));
        self.call(Method::Delete, &url, None).await?;
        Ok(())
    }

    /// Fetch the parties a ping from the given account resolves to
    pub async fn fetch_ping_parties(&self, from: &AccountId) -> PartyResult<Vec<PartyDocument>> {
        let me = self.session.account_id();
        let url = self.url(&format!("user/{}/pings/{}/parties", me, from));
        let value = self.call(Method::Get, &url, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decline an invitation to a party
    pub async fn decline_invite(&self, party_id: &PartyId) -> PartyResult<()> {
        let me = self.session.account_id();
        let url = self.url(&format!(
            "parties/{}/invites/{}/decline",
            party_id.as_str(),
            me
        ));
        self.call(Method::Post, &url, None).await?;
        Ok(())
    }

    /// Account the service facade authenticates as
    pub fn account_id(&self) -> AccountId {
        self.session.account_id()
    }

    /// Display name of the authenticated account
    pub fn display_name(&self) -> String {
        self.session.display_name()
    }
}

impl std::fmt::Debug for PartyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyService")
            .field("base_url", &self.base_url)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::auth::StaticSession;
    use crate::http::HttpResponse;

    /// Records each request and replays scripted responses in order
    struct ScriptedHttp {
        requests: Mutex<Vec<(Method, String, Option<Value>)>>,
        responses: Mutex<Vec<HttpResponse>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        fn ok(body: Value) -> HttpResponse {
            HttpResponse { status: 200, body }
        }
    }

    #[async_trait::async_trait]
    impl HttpClient for ScriptedHttp {
        async fn send(
            &self,
            method: Method,
            url: &str,
            _bearer: &str,
            body: Option<Value>,
        ) -> PartyResult<HttpResponse> {
            self.requests.lock().push((method, url.to_string(), body));
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Ok(ScriptedHttp::ok(Value::Null));
            }
            Ok(responses.remove(0))
        }
    }

    fn service(http: Arc<ScriptedHttp>) -> PartyService {
        let session = Arc::new(StaticSession::new(AccountId::new("me"), "Me", "tok"));
        PartyService::new(http, session, "https://party.test/party/api/v1", "ns")
    }

    #[tokio::test]
    async fn test_member_patch_path_and_body() {
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let svc = service(http.clone());

        let mut patch = MetaPatch::default();
        patch
            .update
            .insert("Ready_b".to_string(), "true".to_string());
        svc.patch_member(&PartyId::new("p1"), &AccountId::new("me"), 4, &patch)
            .await
            .expect("patch");

        let requests = http.requests.lock();
        let (method, url, body) = &requests[0];
        assert_eq!(*method, Method::Patch);
        assert_eq!(url, "https://party.test/party/api/v1/ns/parties/p1/members/me/meta");
        let body = body.as_ref().expect("body");
        assert_eq!(body["revision"], 4);
        assert_eq!(body["update"]["Ready_b"], "true");
        assert!(body["delete"].as_array().expect("delete").is_empty());
    }

    #[tokio::test]
    async fn test_ping_paths() {
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let svc = service(http.clone());

        svc.send_ping(&AccountId::new("friend")).await.expect("send");
        svc.decline_invite(&PartyId::new("p1")).await.expect("decline");

        let requests = http.requests.lock();
        assert_eq!(
            requests[0].1,
            "https://party.test/party/api/v1/ns/user/friend/pings/me"
        );
        assert_eq!(
            requests[1].1,
            "https://party.test/party/api/v1/ns/parties/p1/invites/me/decline"
        );
    }

    #[tokio::test]
    async fn test_create_party_parses_document() {
        let doc = serde_json::json!({
            "id": "p9",
            "config": {"joinability": "OPEN", "max_size": 4, "join_confirmation": false},
            "members": [{
                "account_id": "me",
                "meta": {},
                "connections": [],
                "revision": 0,
                "role": "CAPTAIN",
            }],
            "meta": {"Build_s": "1:1:0"},
            "revision": 0,
            "invites": [],
        });
        let http = Arc::new(ScriptedHttp::new(vec![ScriptedHttp::ok(doc)]));
        let svc = service(http);

        let config = PartyConfig::default();
        let conn = ConnectionDescriptor::game(
            crate::types::ConnectionId::generate(&AccountId::new("me"), "h"),
            "WIN",
        );
        let created = svc
            .create_party(&config, &conn, &BTreeMap::new(), &BTreeMap::new())
            .await
            .expect("create");

        assert_eq!(created.id, PartyId::new("p9"));
        assert_eq!(created.config.max_size, 4);
        assert_eq!(created.members[0].role, Some(PartyRole::Captain));
    }
}
