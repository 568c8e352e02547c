//! Member patches are single-flight: queued writers flush in order,
//! each targeting a strictly higher revision, and only the local
//! client's own row accepts patches.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{party_doc, push_revision, FakeHttp, FakeTransport};
use partylink_core::{
    AccountId, AutoConfirm, ClientConfig, MetaValue, PartyClient, PartyConfig, PartyError,
    StaticSession,
};

fn client(http: Arc<FakeHttp>, transport: Arc<FakeTransport>) -> PartyClient {
    let session = Arc::new(StaticSession::new(AccountId::new("me"), "Me", "tok"));
    PartyClient::with_parts(
        ClientConfig::default(),
        session,
        http,
        transport,
        Arc::new(AutoConfirm),
    )
}

#[tokio::test(start_paused = true)]
async fn test_queued_patches_flush_with_increasing_revisions() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client(Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    let me = party.me();
    let (a, b, c) = tokio::join!(
        me.set("Ready_b", true),
        me.set("Emote_s", "wave"),
        me.set("ZoneTileIndex_U", 7u64),
    );
    a.expect("a");
    b.expect("b");
    c.expect("c");

    let patches = http.matching("/members/me/meta");
    assert_eq!(patches.len(), 3);
    let revisions: Vec<u64> = patches
        .iter()
        .map(|r| r.body.as_ref().expect("body")["revision"].as_u64().expect("revision"))
        .collect();
    assert_eq!(revisions, vec![0, 1, 2]);

    // The mirror carries the flushed revision
    let snapshot = party.me().snapshot().expect("me");
    assert_eq!(snapshot.revision, 3);
    assert!(snapshot.meta.get_bool("Ready_b"));
    assert_eq!(snapshot.meta.get_uint("ZoneTileIndex_U"), 7);
}

#[tokio::test(start_paused = true)]
async fn test_patching_another_member_is_rejected_locally() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client(Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    let requests_before = http.recorded().len();
    let other = party.member(&AccountId::new("m2")).expect("m2");
    let err = other
        .patch_meta(
            vec![("Ready_b".to_string(), MetaValue::Bool(true))],
            vec![],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PartyError::Forbidden(_)));
    assert_eq!(http.recorded().len(), requests_before);
}

#[tokio::test(start_paused = true)]
async fn test_patch_sends_only_the_touched_subset() {
    let http = FakeHttp::new();
    let transport = FakeTransport::new();
    let client = client(Arc::clone(&http), Arc::clone(&transport));
    client.connect().await.expect("connect");
    http.respond_ok(party_doc("p1", "me", "m2", 0));
    push_revision(&transport, "p1", 1);
    let party = client
        .create_party(PartyConfig::default())
        .await
        .expect("create");

    let me = party.me();
    me.set("Ready_b", true).await.expect("first");
    me.patch_meta(
        vec![("Emote_s".to_string(), MetaValue::Str("wave".to_string()))],
        vec!["Old_s".to_string()],
    )
    .await
    .expect("second");

    let patches = http.matching("/members/me/meta");
    let second = patches[1].body.as_ref().expect("body");
    // Ready_b was not touched by the second patch and must not travel
    assert!(second["update"].get("Ready_b").is_none());
    assert_eq!(second["update"]["Emote_s"], "wave");
    assert_eq!(second["delete"], json!(["Old_s"]));
}
