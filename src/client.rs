use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::{error::Error, events::TelemetryEvent};

/// Listens to the telemetry stream of a running server.
pub struct TelemetryClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TelemetryClient {
    /// Connect to the server at the given address and port.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        let (stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{address}:{port}/ws")).await?;

        debug!(%address, %port, "Connected");

        Ok(Self { stream })
    }

    /// Await the next event.
    ///
    /// `Ok(None)` means the server closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<TelemetryEvent>, Error> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Ok(None),
            };

            match message {
                tungstenite::Message::Text(text) => {
                    trace!(%text, "Event");
                    return match serde_json::from_str(&text) {
                        Ok(event) => Ok(Some(event)),
                        Err(e) => Err(Error::BadJson {
                            request: text,
                            problem: e.to_string(),
                        }),
                    };
                }
                tungstenite::Message::Close(_) => {
                    debug!("Server closed the stream");
                    return Ok(None);
                }
                other => {
                    warn!(?other, "Unhandled");
                }
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
