//! Wire seam under the presence connection
//!
//! [`StreamTransport`] opens one framed, bidirectional stanza stream.
//! Production uses [`WebSocketTransport`]; tests swap in scripted
//! channel-backed transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{PartyError, PartyResult};
use crate::presence::stanza::Stanza;

/// Outbound half of an open stream
pub type StanzaSink = Pin<Box<dyn Sink<Stanza, Error = PartyError> + Send>>;

/// Inbound half of an open stream
pub type StanzaSource = Pin<Box<dyn Stream<Item = PartyResult<Stanza>> + Send>>;

/// Factory for framed stanza streams
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open one stream session against the given URL
    async fn open(&self, url: &str) -> PartyResult<(StanzaSink, StanzaSource)>;
}

/// Production transport over a websocket, one JSON stanza per text
/// frame
#[derive(Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> PartyResult<(StanzaSink, StanzaSource)> {
        debug!(url, "opening stream");
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| PartyError::Transport(e.to_string()))?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| PartyError::Transport(e.to_string()))
            .with(|stanza: Stanza| async move {
                let text = serde_json::to_string(&stanza)?;
                Ok::<_, PartyError>(Message::Text(text))
            });

        let source = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => {
                    Some(serde_json::from_str(&text).map_err(PartyError::from))
                }
                // Transport-level keepalives are answered by tungstenite
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_))
                | Ok(Message::Frame(_)) => None,
                Ok(Message::Close(_)) => Some(Err(PartyError::ConnectionClosed)),
                Err(e) => Some(Err(PartyError::Transport(e.to_string()))),
            }
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}
