//! Core types for Partylink

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Unique identifier for an account
///
/// Accounts are issued by the platform's identity service; the id is an
/// opaque string from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create an AccountId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a party, issued by the party service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyId(pub String);

impl PartyId {
    /// Create a PartyId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "party_{}", self.0)
    }
}

impl From<&str> for PartyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of one physical stream session of an account
///
/// Shaped like `{account_id}@{host}/{resource}` so that one account
/// attached from several devices is distinguishable per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Build a connection id for an account on a host with a fresh
    /// random resource suffix
    pub fn generate(account_id: &AccountId, host: &str) -> Self {
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        let resource: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("{}@{}/{}", account_id, host, resource))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The account part of the connection id, if well-formed
    pub fn account_id(&self) -> Option<AccountId> {
        self.0.split('@').next().map(AccountId::from)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who may join a party without an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Joinability {
    /// Anyone who can see the party may join
    Open,
    /// Only invitees and former members may join
    InviteAndFormer,
}

impl Default for Joinability {
    fn default() -> Self {
        Joinability::Open
    }
}

/// Privacy level of a party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyPrivacy {
    /// Visible and joinable by anyone
    Public,
    /// Visible to friends of members
    Friends,
    /// Invisible; invitation only
    Private,
}

impl Default for PartyPrivacy {
    fn default() -> Self {
        PartyPrivacy::Public
    }
}

/// Role of a member inside a party
///
/// At most one member of a party holds `Captain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyRole {
    /// The single leader authorized to mutate party-wide config and
    /// membership
    Captain,
}

/// Configuration of a party
///
/// Missing fields fall back to the same defaults the service applies:
/// join confirmation on, open joinability, sixteen seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyConfig {
    /// Who may join without an invitation
    #[serde(default)]
    pub joinability: Joinability,
    /// Privacy level, applied as a guarded second step after creation
    #[serde(default)]
    pub privacy: PartyPrivacy,
    /// Maximum number of members
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Party type namespace (e.g. "default")
    #[serde(rename = "type", default = "default_type_id")]
    pub type_id: String,
    /// Party sub type
    #[serde(default = "default_type_id")]
    pub sub_type: String,
    /// Seconds before an outstanding invitation expires
    #[serde(default = "default_invite_ttl")]
    pub invite_ttl: u32,
    /// Whether existing members confirm an attaching peer
    #[serde(default = "default_join_confirmation")]
    pub join_confirmation: bool,
}

fn default_max_size() -> u32 {
    16
}

fn default_type_id() -> String {
    "default".to_string()
}

fn default_invite_ttl() -> u32 {
    14400
}

fn default_join_confirmation() -> bool {
    true
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            joinability: Joinability::Open,
            privacy: PartyPrivacy::Public,
            max_size: default_max_size(),
            type_id: default_type_id(),
            sub_type: default_type_id(),
            invite_ttl: default_invite_ttl(),
            join_confirmation: default_join_confirmation(),
        }
    }
}

/// One physical stream session of a member, as carried in REST bodies
/// and membership notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Stream session id of the connection
    pub id: ConnectionId,
    /// Connection-scoped attributes (platform, connection type)
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    /// Build a descriptor for a game connection on the given platform
    pub fn game(id: ConnectionId, platform: &str) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert("conn:platform_s".to_string(), platform.to_string());
        meta.insert("conn:type_s".to_string(), "game".to_string());
        Self { id, meta }
    }
}

/// Static configuration of a client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application namespace used in party REST paths
    pub namespace: String,
    /// Base URL of the party REST service
    pub party_service_url: String,
    /// URL of the persistent presence stream
    pub stream_url: String,
    /// Host component used when deriving connection ids
    pub stream_host: String,
    /// Short platform tag carried in connection and member meta
    pub platform: String,
    /// Build identifier carried in party meta
    pub build_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            party_service_url: "https://party.example.com/party/api/v1".to_string(),
            stream_url: "wss://presence.example.com/stream".to_string(),
            stream_host: "presence.example.com".to_string(),
            platform: "WIN".to_string(),
            build_id: "1:1:0".to_string(),
        }
    }
}
