//! Shared fakes for integration tests: a recording HTTP client with
//! scripted responses and a stream transport whose server half answers
//! the handshake.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc as futures_mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;

use partylink_core::http::{HttpClient, HttpResponse, Method};
use partylink_core::presence::{StanzaSink, StanzaSource, Stanza, StreamTransport};
use partylink_core::presence::stanza::RosterEntry;
use partylink_core::types::AccountId;
use partylink_core::{PartyError, PartyResult};

/// One recorded REST request
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

/// Records every request; replays scripted responses in order and
/// answers 200/null once the script runs out
pub struct FakeHttp {
    pub requests: Mutex<Vec<Recorded>>,
    responses: Mutex<VecDeque<HttpResponse>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn respond(&self, status: u16, body: Value) {
        self.responses.lock().push_back(HttpResponse { status, body });
    }

    pub fn respond_ok(&self, body: Value) {
        self.respond(200, body);
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    /// Requests whose URL contains the given fragment
    pub fn matching(&self, fragment: &str) -> Vec<Recorded> {
        self.recorded()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn send(
        &self,
        method: Method,
        url: &str,
        _bearer: &str,
        body: Option<Value>,
    ) -> PartyResult<HttpResponse> {
        self.requests.lock().push(Recorded {
            method,
            url: url.to_string(),
            body,
        });
        Ok(self.responses.lock().pop_front().unwrap_or(HttpResponse {
            status: 200,
            body: Value::Null,
        }))
    }
}

/// Transport whose server half completes the handshake; the test side
/// can push frames, drop the stream or end the session
pub struct FakeTransport {
    inject: Mutex<Option<futures_mpsc::UnboundedSender<PartyResult<Stanza>>>>,
    sessions: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inject: Mutex::new(None),
            sessions: AtomicUsize::new(0),
        })
    }

    /// Number of sessions opened so far
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Push a server-sent stanza into the live session
    pub fn push(&self, stanza: Stanza) {
        let mut guard = self.inject.lock();
        let tx = guard.as_mut().expect("no open session");
        tx.unbounded_send(Ok(stanza)).expect("inject");
    }

    /// Push a notification message body
    pub fn push_notification(&self, body: Value) {
        self.push(Stanza::Message {
            from: None,
            to: None,
            body,
        });
    }

    /// Simulate a transport drop
    pub fn kill(&self) {
        let mut guard = self.inject.lock();
        if let Some(tx) = guard.as_mut() {
            let _ = tx.unbounded_send(Err(PartyError::Transport("dropped".to_string())));
        }
    }

    /// Simulate the server ending the session
    pub fn end_session(&self) {
        self.push(Stanza::SessionClosed {
            reason: "server shutdown".to_string(),
        });
    }
}

#[async_trait]
impl StreamTransport for FakeTransport {
    async fn open(&self, _url: &str) -> PartyResult<(StanzaSink, StanzaSource)> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let (client_tx, mut server_rx) = futures_mpsc::unbounded::<Stanza>();
        let (server_tx, client_rx) = futures_mpsc::unbounded::<PartyResult<Stanza>>();
        *self.inject.lock() = Some(server_tx.clone());

        tokio::spawn(async move {
            while let Some(stanza) = server_rx.next().await {
                let reply = match stanza {
                    Stanza::Auth { .. } => Some(Stanza::AuthSuccess {
                        session_id: "session".to_string(),
                    }),
                    Stanza::RosterGet => Some(Stanza::Roster {
                        entries: vec![RosterEntry {
                            account_id: AccountId::new("friend"),
                            subscription: "both".to_string(),
                        }],
                    }),
                    Stanza::Ping => Some(Stanza::Pong),
                    _ => None,
                };
                if let Some(reply) = reply {
                    if server_tx.unbounded_send(Ok(reply)).is_err() {
                        return;
                    }
                }
            }
        });

        let sink = client_tx.sink_map_err(|e| PartyError::Transport(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

/// Schedule an authoritative `party.updated` push so it lands once the
/// caller is waiting on the party topic
pub fn push_revision(transport: &Arc<FakeTransport>, party_id: &str, revision: u64) {
    let transport = Arc::clone(transport);
    let body = serde_json::json!({
        "type": "party.updated",
        "party_id": party_id,
        "revision": revision,
    });
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        transport.push_notification(body);
    });
}

/// A party document the service would return for a two-member party
/// captained by `captain`
pub fn party_doc(id: &str, captain: &str, other: &str, revision: u64) -> Value {
    serde_json::json!({
        "id": id,
        "config": {
            "joinability": "OPEN",
            "max_size": 16,
            "join_confirmation": true,
        },
        "members": [
            {"account_id": captain, "role": "CAPTAIN", "revision": 0,
             "connections": [{"id": format!("{captain}@h/r1"), "meta": {}}]},
            {"account_id": other, "revision": 0,
             "connections": [{"id": format!("{other}@h/r2"), "meta": {}}]},
        ],
        "meta": {"Build_s": "1:1:0"},
        "revision": revision,
        "invites": [],
    })
}
