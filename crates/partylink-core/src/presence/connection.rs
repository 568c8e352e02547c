//! Presence session lifecycle
//!
//! [`PresenceConnection`] owns exactly one live stream session at a
//! time. Connecting runs the handshake (credential, roster, initial
//! presence document) with a bounded wait on each leg, then hands the
//! stream halves to background reader/writer tasks. A dropped
//! transport triggers capped-backoff reconnection; a server-initiated
//! session end triggers a fresh session under a new connection id.
//! Every (re)connect bumps a generation counter so tasks belonging to
//! a dead session stop delivering instead of duplicating events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::error::{PartyError, PartyResult};
use crate::presence::stanza::{RosterEntry, Stanza, StatusDocument};
use crate::presence::transport::{StanzaSink, StanzaSource, StreamTransport};
use crate::router::{PartyEvent, Router};
use crate::types::{ClientConfig, ConnectionDescriptor, ConnectionId};

/// Bounded wait on each handshake leg
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between keepalive pings
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// First reconnect delay; doubles up to the cap
const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Lifecycle of the stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct SessionEnd {
    generation: u64,
    server_closed: bool,
}

/// Owner of the persistent presence stream
pub struct PresenceConnection {
    config: ClientConfig,
    session: Arc<dyn AuthSession>,
    transport: Arc<dyn StreamTransport>,
    router: Arc<Router>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Stanza>>>,
    descriptor: Mutex<Option<ConnectionDescriptor>>,
    roster: Mutex<Vec<RosterEntry>>,
    status: Mutex<StatusDocument>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    retry_tx: mpsc::UnboundedSender<SessionEnd>,
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEnd>>>,
}

impl PresenceConnection {
    /// Build a connection that is not yet attached
    pub fn new(
        config: ClientConfig,
        session: Arc<dyn AuthSession>,
        transport: Arc<dyn StreamTransport>,
        router: Arc<Router>,
    ) -> Arc<Self> {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            session,
            transport,
            router,
            outbound: Mutex::new(None),
            descriptor: Mutex::new(None),
            roster: Mutex::new(Vec::new()),
            status: Mutex::new(StatusDocument::default()),
            state: Mutex::new(ConnectionState::Disconnected),
            generation: AtomicU64::new(0),
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
        })
    }

    /// Current session lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Descriptor of the live stream session
    pub fn descriptor(&self) -> PartyResult<ConnectionDescriptor> {
        self.descriptor
            .lock()
            .clone()
            .ok_or(PartyError::ConnectionClosed)
    }

    /// Contacts delivered during the handshake
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.lock().clone()
    }

    /// Connect and run the handshake; retries are automatic afterwards
    pub async fn connect(self: &Arc<Self>) -> PartyResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.open_session(generation).await {
            *self.state.lock() = ConnectionState::Disconnected;
            return Err(e);
        }
        self.router.publish(PartyEvent::Connected);

        // One supervisor per connection handles every later retry
        if let Some(mut retry_rx) = self.retry_rx.lock().take() {
            let conn = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(end) = retry_rx.recv().await {
                    conn.supervise(end).await;
                }
            });
        }
        Ok(())
    }

    /// Tear down the session without retrying
    pub fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.outbound.lock() = None;
        *self.descriptor.lock() = None;
        *self.state.lock() = ConnectionState::Disconnected;
        self.router
            .publish(PartyEvent::Disconnected { will_retry: false });
        info!("stream disconnected");
    }

    /// Replace the broadcast presence document
    pub fn update_status(&self, status: StatusDocument) -> PartyResult<()> {
        let from = self.descriptor.lock().as_ref().map(|d| d.id.clone());
        *self.status.lock() = status.clone();
        // While offline the document is only stored and goes out with
        // the next handshake
        if let Some(from) = from {
            self.enqueue(Stanza::Presence {
                from: Some(from),
                to: None,
                available: true,
                status,
            })?;
        }
        Ok(())
    }

    /// Ask a connection for its current presence document
    pub fn send_probe(&self, to: ConnectionId) -> PartyResult<()> {
        self.enqueue(Stanza::Probe { to })
    }

    /// Send a directed message frame
    pub fn send_message(&self, to: ConnectionId, body: Value) -> PartyResult<()> {
        let from = self.descriptor()?.id;
        self.enqueue(Stanza::Message {
            from: Some(from),
            to: Some(to),
            body,
        })
    }

    fn enqueue(&self, stanza: Stanza) -> PartyResult<()> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(PartyError::ConnectionClosed)?;
        tx.send(stanza).map_err(|_| PartyError::ConnectionClosed)
    }

    fn current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn supervise(self: &Arc<Self>, end: SessionEnd) {
        if !self.current(end.generation) {
            return;
        }
        *self.outbound.lock() = None;
        *self.state.lock() = ConnectionState::Disconnected;
        self.router
            .publish(PartyEvent::Disconnected { will_retry: true });

        // An explicit disconnect bumps the generation; a retry lineage
        // that no longer owns the current generation must stop
        let mut owned = end.generation;
        let mut delay = RECONNECT_BASE;
        loop {
            warn!(?delay, "stream lost, retrying");
            tokio::time::sleep(delay).await;
            if !self.current(owned) {
                debug!("session retired during backoff, not retrying");
                return;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            match self.open_session(generation).await {
                Ok(()) => {
                    let event = if end.server_closed {
                        PartyEvent::SessionRefreshed
                    } else {
                        PartyEvent::Connected
                    };
                    self.router.publish(event);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    *self.state.lock() = ConnectionState::Disconnected;
                    owned = generation;
                    delay = (delay * 2).min(RECONNECT_CAP);
                }
            }
        }
    }

    async fn open_session(self: &Arc<Self>, generation: u64) -> PartyResult<()> {
        *self.state.lock() = ConnectionState::Connecting;
        let (mut sink, mut source) = self.transport.open(&self.config.stream_url).await?;

        // Fresh sessions never reuse a connection id
        let connection_id =
            ConnectionId::generate(&self.session.account_id(), &self.config.stream_host);
        let descriptor = ConnectionDescriptor::game(connection_id.clone(), &self.config.platform);

        sink.send(Stanza::Auth {
            token: self.session.access_token(),
            connection_id: connection_id.clone(),
        })
        .await?;
        let session_id = self.await_auth(&mut source).await?;
        debug!(%connection_id, session_id, "stream authenticated");

        sink.send(Stanza::RosterGet).await?;
        let entries = self.await_roster(&mut source).await?;
        *self.roster.lock() = entries;

        let status = self.status.lock().clone();
        sink.send(Stanza::Presence {
            from: Some(connection_id.clone()),
            to: None,
            available: true,
            status,
        })
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);
        *self.descriptor.lock() = Some(descriptor);
        *self.state.lock() = ConnectionState::Connected;
        info!(%connection_id, "stream session established");

        self.spawn_writer(generation, sink, rx);
        self.spawn_reader(generation, source);
        self.spawn_keepalive(generation);
        Ok(())
    }

    async fn await_auth(&self, source: &mut StanzaSource) -> PartyResult<String> {
        loop {
            match self.await_stanza(source, "credential acknowledgement").await? {
                Stanza::AuthSuccess { session_id } => return Ok(session_id),
                Stanza::AuthFailure { reason } => return Err(PartyError::Unauthorized(reason)),
                other => debug!(?other, "ignoring pre-auth stanza"),
            }
        }
    }

    async fn await_roster(&self, source: &mut StanzaSource) -> PartyResult<Vec<RosterEntry>> {
        loop {
            match self.await_stanza(source, "roster").await? {
                Stanza::Roster { entries } => return Ok(entries),
                other => debug!(?other, "ignoring pre-roster stanza"),
            }
        }
    }

    async fn await_stanza(&self, source: &mut StanzaSource, leg: &str) -> PartyResult<Stanza> {
        match timeout(HANDSHAKE_TIMEOUT, source.next()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(PartyError::ConnectionClosed),
            Err(_) => Err(PartyError::Timeout(leg.to_string())),
        }
    }

    fn spawn_writer(
        self: &Arc<Self>,
        generation: u64,
        mut sink: StanzaSink,
        mut rx: mpsc::UnboundedReceiver<Stanza>,
    ) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(stanza) = rx.recv().await {
                if !conn.current(generation) {
                    return;
                }
                if let Err(e) = sink.send(stanza).await {
                    debug!(error = %e, "write failed, leaving reconnect to reader");
                    return;
                }
            }
        });
    }

    fn spawn_reader(self: &Arc<Self>, generation: u64, mut source: StanzaSource) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let mut server_closed = false;
            loop {
                let stanza = match source.next().await {
                    Some(Ok(stanza)) => stanza,
                    Some(Err(e)) => {
                        debug!(error = %e, "stream read failed");
                        break;
                    }
                    None => break,
                };
                if !conn.current(generation) {
                    return;
                }
                match stanza {
                    Stanza::Ping => {
                        let _ = conn.enqueue(Stanza::Pong);
                    }
                    Stanza::Pong => {}
                    Stanza::Presence {
                        from: Some(from),
                        available,
                        status,
                        ..
                    } => {
                        conn.router.publish(PartyEvent::Presence {
                            from,
                            available,
                            status,
                        });
                    }
                    Stanza::Presence { from: None, .. } => {}
                    Stanza::Message { body, .. } => conn.router.dispatch(&body),
                    Stanza::Roster { entries } => *conn.roster.lock() = entries,
                    Stanza::SessionClosed { reason } => {
                        info!(reason, "server ended the stream session");
                        server_closed = true;
                        break;
                    }
                    other => debug!(?other, "ignoring stanza"),
                }
            }
            if conn.current(generation) {
                let _ = conn.retry_tx.send(SessionEnd {
                    generation,
                    server_closed,
                });
            }
        });
    }

    fn spawn_keepalive(self: &Arc<Self>, generation: u64) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !conn.current(generation) || conn.enqueue(Stanza::Ping).is_err() {
                    return;
                }
            }
        });
    }
}

impl std::fmt::Debug for PresenceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceConnection")
            .field("state", &self.state())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as futures_mpsc;
    use futures::SinkExt as _;

    use crate::auth::StaticSession;
    use crate::types::AccountId;

    /// Transport whose server half answers the handshake and exposes
    /// an injection handle for pushed frames
    struct EchoTransport {
        inject: Mutex<Option<futures_mpsc::UnboundedSender<PartyResult<Stanza>>>>,
        fail_auth: bool,
    }

    impl EchoTransport {
        fn new(fail_auth: bool) -> Arc<Self> {
            Arc::new(Self {
                inject: Mutex::new(None),
                fail_auth,
            })
        }

        fn push(&self, stanza: Stanza) {
            let mut guard = self.inject.lock();
            let tx = guard.as_mut().expect("open session");
            tx.unbounded_send(Ok(stanza)).expect("inject");
        }
    }

    #[async_trait::async_trait]
    impl StreamTransport for EchoTransport {
        async fn open(&self, _url: &str) -> PartyResult<(StanzaSink, StanzaSource)> {
            let (client_tx, mut server_rx) = futures_mpsc::unbounded::<Stanza>();
            let (server_tx, client_rx) = futures_mpsc::unbounded::<PartyResult<Stanza>>();
            *self.inject.lock() = Some(server_tx.clone());

            let fail_auth = self.fail_auth;
            tokio::spawn(async move {
                while let Some(stanza) = server_rx.next().await {
                    let reply = match stanza {
                        Stanza::Auth { .. } if fail_auth => Some(Stanza::AuthFailure {
                            reason: "bad token".to_string(),
                        }),
                        Stanza::Auth { .. } => Some(Stanza::AuthSuccess {
                            session_id: "s1".to_string(),
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
            let source = client_rx;
            Ok((Box::pin(sink), Box::pin(source)))
        }
    }

    fn connection(transport: Arc<EchoTransport>) -> (Arc<PresenceConnection>, Arc<Router>) {
        let router = Arc::new(Router::new());
        let session = Arc::new(StaticSession::new(AccountId::new("me"), "Me", "tok"));
        let conn = PresenceConnection::new(
            ClientConfig::default(),
            session,
            transport,
            Arc::clone(&router),
        );
        (conn, router)
    }

    #[tokio::test]
    async fn test_connect_runs_handshake() {
        let transport = EchoTransport::new(false);
        let (conn, router) = connection(Arc::clone(&transport));
        let mut events = router.subscribe();

        conn.connect().await.expect("connect");

        assert_eq!(conn.state(), ConnectionState::Connected);
        let descriptor = conn.descriptor().expect("descriptor");
        assert!(descriptor.id.as_str().starts_with("me@"));
        assert_eq!(conn.roster().len(), 1);
        assert!(matches!(
            events.recv().await.expect("event"),
            PartyEvent::Connected
        ));
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_unauthorized() {
        let transport = EchoTransport::new(true);
        let (conn, _router) = connection(transport);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, PartyError::Unauthorized(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_inbound_message_reaches_router() {
        let transport = EchoTransport::new(false);
        let (conn, router) = connection(Arc::clone(&transport));
        conn.connect().await.expect("connect");

        let mut events = router.subscribe();
        transport.push(Stanza::Message {
            from: None,
            to: None,
            body: serde_json::json!({
                "type": "party.updated",
                "party_id": "p1",
                "revision": 2,
            }),
        });

        match events.recv().await.expect("event") {
            PartyEvent::Notification(n) => {
                assert_eq!(n.party_id().map(|p| p.as_str()), Some("p1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let transport = EchoTransport::new(false);
        let (conn, router) = connection(Arc::clone(&transport));
        conn.connect().await.expect("connect");

        let mut events = router.subscribe();
        conn.disconnect();
        assert!(matches!(
            events.recv().await.expect("event"),
            PartyEvent::Disconnected { will_retry: false }
        ));
        assert!(conn.descriptor().is_err());
        assert!(conn.send_probe(ConnectionId("x@h/r".to_string())).is_err());
    }
}
