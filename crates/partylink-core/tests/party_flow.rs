//! End-to-end flows over scripted transports: creating a party,
//! replicating member updates, the invitation flow, and the captain's
//! exclusive controls.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{party_doc, push_revision, FakeHttp, FakeTransport};
use partylink_core::http::Method;
use partylink_core::{
    AccountId, AutoConfirm, ClientConfig, JoinStrategy, MetaValue, PartyClient, PartyConfig,
    PartyError, PartyId, StaticSession,
};

fn client(account: &str, http: Arc<FakeHttp>, transport: Arc<FakeTransport>) -> PartyClient {
    let session = Arc::new(StaticSession::new(AccountId::new(account), account, "tok"));
    PartyClient::with_parts(
        ClientConfig::default(),
        session,
        http,
        transport,
        Arc::new(AutoConfirm),
    )
}

async fn settle(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("replication did not settle");
}

#[tokio::test(start_paused = true)]
async fn test_create_party_and_replicate_readiness() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("me", Arc::clone(&http), Arc::clone(&transport));

    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    assert_eq!(party.id().as_str(), "p1");
    assert!(party.am_captain());
    let create = &http.matching("/parties")[0];
    assert_eq!(create.method, Method::Post);
    let body = create.body.as_ref().expect("body");
    assert_eq!(body["config"]["join_confirmation"], true);
    assert_eq!(body["join_info"]["meta"]["JoinMethod_s"], "Creation");

    // Flag ourselves ready; the patch targets our member revision
    party.me().set("Ready_b", true).await.expect("ready");
    let patch = &http.matching("/members/me/meta")[0];
    let body = patch.body.as_ref().expect("body");
    assert_eq!(body["revision"], 0);
    assert_eq!(body["update"]["Ready_b"], "true");

    // Another member's readiness arrives as a push and lands in the
    // mirror without any further request
    let requests_before = http.recorded().len();
    transport.push_notification(json!({
        "type": "party.member.state_updated",
        "party_id": "p1",
        "account_id": "m2",
        "revision": 1,
        "member_state_updated": {"Ready_b": "true"},
    }));
    settle(|| {
        party
            .snapshot()
            .member(&AccountId::new("m2"))
            .map(|m| m.meta.get_bool("Ready_b"))
            .unwrap_or(false)
    })
    .await;
    assert_eq!(http.recorded().len(), requests_before);
}

#[tokio::test(start_paused = true)]
async fn test_private_party_applies_guarded_privacy_patch() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("me", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");

    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let config = PartyConfig {
        privacy: partylink_core::PartyPrivacy::Private,
        ..Default::default()
    };
    let party = client.create_party(config).await.expect("create");

    // Privacy lands as a second step once revision 1 has replicated:
    // a config patch tightening joinability, then a meta patch
    // carrying the settings document
    let patches = http.matching("/parties/p1");
    assert_eq!(patches.len(), 2);
    let config_body = patches[0].body.as_ref().expect("body");
    assert_eq!(config_body["config"]["joinability"], "INVITE_AND_FORMER");
    assert_eq!(config_body["revision"], 1);
    let meta_body = patches[1].body.as_ref().expect("body");
    assert_eq!(meta_body["revision"], 2);
    let settings: serde_json::Value = serde_json::from_str(
        meta_body["meta"]["update"]["PrivacySettings_j"]
            .as_str()
            .expect("encoded settings"),
    )
    .expect("valid json");
    assert_eq!(settings["partyType"], "Private");
    assert_eq!(settings["bOnlyLeaderFriendsCanJoin"], true);

    let state = party.snapshot();
    assert_eq!(
        state.config.joinability,
        partylink_core::Joinability::InviteAndFormer
    );
    assert_eq!(state.meta.get_json("PrivacySettings_j")["partyType"], "Private");
}

#[tokio::test(start_paused = true)]
async fn test_create_without_revision_push_fails() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("me", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");

    // The service answers but never replicates a revision
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    let config = PartyConfig {
        privacy: partylink_core::PartyPrivacy::Private,
        ..Default::default()
    };
    let err = client.create_party(config).await.unwrap_err();
    assert!(matches!(err, PartyError::Timeout(_)));
    assert!(client.current_party().is_none());
    // Without a settled revision no privacy patch may go out
    assert!(http.matching("/parties/p1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invitation_accept_flow() {
    // Inviter side: inviting rides on a ping
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let inviter = client("me", Arc::clone(&http), Arc::clone(&transport));
    inviter.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = inviter
        .create_party(PartyConfig::default())
        .await
        .expect("create");
    party.invite(&AccountId::new("guest")).await.expect("invite");
    let ping = &http.matching("/user/guest/pings/me")[0];
    assert_eq!(ping.method, Method::Post);

    // Invitee side: resolve the ping, join, clear the ping
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let invitee = client("guest", Arc::clone(&http), Arc::clone(&transport));
    invitee.connect().await.expect("connect");

    http.respond_ok(json!({
        "current": [],
        "pings": [{"sent_by": "me"}],
    }));
    http.respond_ok(json!([party_doc("p1", "me", "m2", 3)]));
    let invitations = invitee.invitations().await.expect("invitations");
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].party_id.as_str(), "p1");

    http.respond_ok(party_doc("p1", "me", "m2", 3)); // pre-join fetch
    http.respond_ok(json!({"status": "JOINED"})); // join
    http.respond_ok(party_doc("p1", "me", "m2", 4)); // settled refetch
    let joined = invitee
        .accept_invitation(&invitations[0])
        .await
        .expect("accept");
    assert_eq!(joined.id().as_str(), "p1");
    assert!(!joined.am_captain());

    let join = &http.matching("/parties/p1/members/guest/join")[0];
    assert_eq!(join.method, Method::Post);
    assert_eq!(
        join.body.as_ref().expect("body")["meta"]["JoinMethod_s"],
        "Invitation"
    );
    // The accepted ping is cleared
    assert_eq!(
        http.matching("/user/guest/pings/me")
            .iter()
            .filter(|r| r.method == Method::Delete)
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_decline_invitation() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let invitee = client("guest", Arc::clone(&http), Arc::clone(&transport));
    invitee.connect().await.expect("connect");

    http.respond_ok(json!({"current": [], "pings": [{"sent_by": "me"}]}));
    http.respond_ok(json!([party_doc("p1", "me", "m2", 0)]));
    let invitations = invitee.invitations().await.expect("invitations");

    invitee
        .decline_invitation(&invitations[0])
        .await
        .expect("decline");
    let decline = &http.matching("/parties/p1/invites/guest/decline")[0];
    assert_eq!(decline.method, Method::Post);
}

#[tokio::test(start_paused = true)]
async fn test_join_rejects_full_party_locally() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("guest", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");

    let mut doc = party_doc("p1", "me", "m2", 0);
    doc["config"]["max_size"] = json!(2);
    http.respond_ok(doc);

    let err = client
        .join_party(&PartyId::new("p1"), JoinStrategy::RestPush)
        .await
        .unwrap_err();
    assert!(matches!(err, PartyError::PartyFull));
    // Only the fetch went out, never a join
    assert!(http.matching("/join").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_kick_and_promote_are_captain_only_and_push_applied() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("me", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    // Kick goes out but the roster only changes on the push
    party.kick(&AccountId::new("m2")).await.expect("kick");
    let kick = &http.matching("/parties/p1/members/m2")[0];
    assert_eq!(kick.method, Method::Delete);
    assert!(party.snapshot().member(&AccountId::new("m2")).is_some());

    transport.push_notification(json!({
        "type": "party.member.kicked",
        "party_id": "p1",
        "account_id": "m2",
        "revision": 2,
    }));
    settle(|| party.snapshot().member(&AccountId::new("m2")).is_none()).await;

    // Kicking self is nonsense
    let err = party.kick(&AccountId::new("me")).await.unwrap_err();
    assert!(matches!(err, PartyError::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn test_non_captain_mutations_fail_without_requests() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("m2", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");

    http.respond_ok(json!({
        "current": [party_doc("p1", "captain", "m2", 0)],
        "pings": [],
    }));
    let party = client.restore().await.expect("restore").expect("tracked");
    assert!(!party.am_captain());
    let requests_before = http.recorded().len();

    let err = party.kick(&AccountId::new("captain")).await.unwrap_err();
    assert!(matches!(err, PartyError::NotLeader));
    let err = party.promote(&AccountId::new("m2")).await.unwrap_err();
    assert!(matches!(err, PartyError::NotLeader));
    let err = party
        .patch_meta(
            vec![("Build_s".to_string(), MetaValue::Str("2:0:0".to_string()))],
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PartyError::NotLeader));

    // Every rejection happened before the network
    assert_eq!(http.recorded().len(), requests_before);
}

#[tokio::test(start_paused = true)]
async fn test_promotion_moves_captaincy_on_push() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client("me", Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    party.promote(&AccountId::new("m2")).await.expect("promote");
    let promote = &http.matching("/parties/p1/members/m2/promote")[0];
    assert_eq!(promote.method, Method::Post);
    // Still captain until the push lands
    assert!(party.am_captain());

    transport.push_notification(json!({
        "type": "party.member.new_captain",
        "party_id": "p1",
        "account_id": "m2",
        "revision": 2,
    }));
    settle(|| !party.am_captain()).await;

    // The role moved, so captain-only controls are now rejected
    let err = party.kick(&AccountId::new("m2")).await.unwrap_err();
    assert!(matches!(err, PartyError::NotLeader));
}
