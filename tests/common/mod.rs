#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use gripper_link::{
    actions::CommandOutcome,
    client::TelemetryClient,
    config::Config,
    error::Error,
    events::TelemetryEvent,
    mock::MockDevice,
    server::{self, Device},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::info;

const PATIENCE: Duration = Duration::from_secs(5);

/// Timings short enough for tests.
pub fn fast_config() -> Config {
    let mut config = Config::default();

    config.link.settle_ms = 0;
    config.link.reconnect_cooldown_ms = 100;
    config.link.stale_after_ms = 2000;
    config.serial.read_timeout_ms = 200;

    config
}

pub struct TestServer {
    pub port: u16,
    pub mock: MockDevice,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), Error>>,
}

pub async fn start(mock: MockDevice) -> Result<TestServer> {
    start_with(fast_config(), mock).await
}

pub async fn start_with(config: Config, mock: MockDevice) -> Result<TestServer> {
    let (port_tx, port_rx) = oneshot::channel();
    let shutdown = CancellationToken::new();

    let task = tokio::spawn(server::run_any_port(
        config,
        Device::mock(mock.clone()),
        port_tx,
        shutdown.clone(),
    ));

    let port = timeout(PATIENCE, port_rx).await??;
    info!("Server on port {port}");

    Ok(TestServer {
        port,
        mock,
        shutdown,
        task,
    })
}

/// A bare HTTP/1.1 request, answered with the status code and body.
async fn request(port: u16, method: &str, path: &str) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(PATIENCE, stream.read_to_string(&mut response)).await??;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| eyre!("Malformed response: {response}"))?;

    let status = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| eyre!("No status line: {head}"))?
        .parse::<u16>()?;

    Ok((status, body.to_owned()))
}

impl TestServer {
    pub async fn get(&self, path: &str) -> Result<String> {
        let (status, body) = request(self.port, "GET", path).await?;
        assert_eq!(status, 200, "GET {path}: {body}");
        Ok(body)
    }

    pub async fn post(&self, path: &str) -> Result<CommandOutcome> {
        let (status, body) = request(self.port, "POST", path).await?;
        assert_eq!(status, 200, "POST {path}: {body}");
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn status(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.get("/status").await?)?)
    }

    /// Poll the status until `check` passes.
    pub async fn wait_status<F>(&self, what: &str, check: F) -> Result<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let polling = async {
            loop {
                let status = self.status().await?;
                if check(&status) {
                    return Ok::<_, color_eyre::Report>(status);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };

        timeout(PATIENCE, polling)
            .await
            .map_err(|_| eyre!("Timed out waiting for {what}"))?
    }

    pub async fn wait_ready(&self) -> Result<()> {
        self.wait_status("ready", |status| status["state"] == "ready")
            .await?;
        Ok(())
    }

    pub async fn wait_subscribers(&self, count: u64) -> Result<()> {
        self.wait_status("subscribers", |status| status["subscribers"] == count)
            .await?;
        Ok(())
    }

    /// Poll what the device received until a line satisfies `check`.
    pub async fn wait_received<F>(&self, check: F) -> Result<Vec<String>>
    where
        F: Fn(&[String]) -> bool,
    {
        let polling = async {
            loop {
                let received = self.mock.received();
                if check(received.as_slice()) {
                    return received;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        timeout(PATIENCE, polling)
            .await
            .map_err(|_| eyre!("Device did not receive the expected lines"))
    }

    pub async fn connect(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let (stream, http_response) =
            tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", self.port)).await?;

        assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

        Ok(stream)
    }

    pub async fn client(&self) -> Result<TelemetryClient> {
        Ok(TelemetryClient::new("127.0.0.1", self.port).await?)
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        timeout(PATIENCE, self.task).await???;
        Ok(())
    }
}

pub async fn receive(client: &mut TelemetryClient) -> Result<TelemetryEvent> {
    timeout(PATIENCE, client.next_event())
        .await??
        .ok_or_else(|| eyre!("Stream closed"))
}

/// Skip events until one matches.
pub async fn receive_matching<F>(client: &mut TelemetryClient, check: F) -> Result<TelemetryEvent>
where
    F: Fn(&TelemetryEvent) -> bool,
{
    loop {
        let event = receive(client).await?;
        if check(&event) {
            return Ok(event);
        }
    }
}

pub async fn receive_raw(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<TelemetryEvent> {
    let message = timeout(PATIENCE, stream.next())
        .await?
        .ok_or_else(|| eyre!("Stream closed"))??;

    let event = serde_json::from_str(message.to_text()?)?;

    Ok(event)
}
