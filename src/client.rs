//! A client for the streaming surface.

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{error::Error, events::OutboundMessage};

/// Receives the messages a running server streams to its subscribers.
pub struct StreamClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StreamClient {
    /// Connect to a server at the given address and port.
    pub async fn connect(address: &str, port: u16) -> Result<Self, Error> {
        let url = format!("ws://{address}:{port}/ws");

        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::InternalIssue(format!("Could not connect to {url}: {e}")))?;

        info!(%url, "Connected");

        Ok(Self { stream })
    }

    /// The next message from the server.
    ///
    /// `None` means the server closed the connection.
    pub async fn next_message(&mut self) -> Option<Result<OutboundMessage, Error>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    warn!(?e, "Connection failed");
                    return Some(Err(Error::InternalIssue(e.to_string())));
                }
            };

            match message {
                tungstenite::Message::Text(text) => {
                    return Some(serde_json::from_str(&text).map_err(|e| {
                        Error::BadRequest(format!("Unexpected message `{text}`: {e}"))
                    }));
                }
                tungstenite::Message::Close(_) => {
                    debug!("Server closed the connection");
                    return None;
                }
                other => debug!(?other, "Skipping non-text message"),
            }
        }
    }
}
