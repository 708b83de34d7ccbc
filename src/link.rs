//! The device link state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Verifying -> Ready -> Degraded
//!       ^                                               |
//!       +------------------ (reconnect) ----------------+
//! ```
//!
//! The link owns at most one [`DeviceHandle`].
//! Any replacement of the handle closes the old one first.

use std::{fmt::Display, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{FutureExt, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time::{timeout, Instant},
};
use tokio_util::{
    codec::{Decoder, Framed},
    sync::CancellationToken,
};
use tracing::{debug, info, trace, warn};

use crate::{
    config::{Config, LinkSettings, SerialSettings},
    discovery::{self, PortScanner},
    error::Error,
    frame,
    serial::{codecs::lines::LinesCodec, SerialMessage},
};

pub(crate) mod mock;
pub(crate) mod serial;

/// The probe sent to the device after connecting.
pub const PING: &str = "PING";

/// What the device answers a probe with.
pub const PONG: &str = "PONG";

/// A byte source/sink the link can talk to.
pub trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceIo for T {}

/// Opens the connection to a device.
pub trait Connector: Send + Sync {
    /// Open the given port.
    /// Framing is always 8N1.
    fn open(&self, port: &str, settings: &SerialSettings) -> Result<Box<dyn DeviceIo>, Error>;
}

/// How the link finds the port to (re)connect to.
#[derive(Clone)]
pub enum PortLocator {
    /// Always use this port.
    Fixed(String),

    /// Scan for a port matching any of the markers.
    Scan {
        /// Lists ports.
        scanner: Arc<dyn PortScanner>,

        /// See [`Config::port_markers`].
        markers: Vec<String>,
    },
}

impl PortLocator {
    /// An explicitly configured device wins over scanning.
    pub fn from_config(config: &Config, scanner: Arc<dyn PortScanner>) -> Self {
        match &config.device {
            Some(device) => Self::Fixed(device.clone()),
            None => Self::Scan {
                scanner,
                markers: config.port_markers.clone(),
            },
        }
    }

    /// Find the port to use, if any.
    pub fn locate(&self) -> Option<String> {
        match self {
            PortLocator::Fixed(port) => Some(port.clone()),
            PortLocator::Scan { scanner, markers } => {
                discovery::find_port(scanner.as_ref(), markers)
            }
        }
    }
}

/// The states of a [`DeviceLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No handle is open.
    Disconnected,

    /// Opening the port.
    Connecting,

    /// Port is open, waiting for the device to prove it is alive.
    Verifying,

    /// Reading and writing.
    Ready,

    /// The device is presumed unreachable pending reconnect.
    Degraded,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Verifying => "verifying",
            LinkState::Ready => "ready",
            LinkState::Degraded => "degraded",
        };
        write!(f, "{s}")
    }
}

/// A snapshot of the link, for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Current state.
    pub state: LinkState,

    /// The port of the open handle, if any.
    pub port: Option<String>,

    /// The device neither answered the probe nor sent telemetry
    /// when it was verified, but is used anyway.
    pub degraded_confidence: bool,

    /// When a non-empty line was last read.
    pub last_read: Option<DateTime<Utc>>,

    /// I/O failures on the current handle.
    pub consecutive_failures: u32,

    /// Reconnect attempts since the link was last ready.
    pub failed_connects: u32,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            port: None,
            degraded_confidence: false,
            last_read: None,
            consecutive_failures: 0,
            failed_connects: 0,
        }
    }
}

/// Exclusive owner of an open device connection.
/// Dropping it closes the connection.
pub struct DeviceHandle {
    port: String,
    baud_rate: u32,
    framed: Framed<Box<dyn DeviceIo>, LinesCodec>,
    last_read: Instant,
    last_read_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

impl DeviceHandle {
    fn new(port: &str, baud_rate: u32, io: Box<dyn DeviceIo>) -> Self {
        Self {
            port: port.to_owned(),
            baud_rate,
            framed: LinesCodec::default().framed(io),
            last_read: Instant::now(),
            last_read_at: None,
            consecutive_failures: 0,
        }
    }

    fn mark_read(&mut self) {
        self.last_read = Instant::now();
        self.last_read_at = Some(Utc::now());
        self.consecutive_failures = 0;
    }

    fn close(self) {
        info!(port = %self.port, baud = self.baud_rate, "Closing device handle");
        drop(self.framed);
    }
}

enum Probe {
    Pong,
    Telemetry,
    Other,
}

enum ReadOutcome {
    Nothing,
    Line(SerialMessage),
    Failed(String),
}

/// The managed connection to the device.
pub struct DeviceLink {
    serial: SerialSettings,
    settings: LinkSettings,
    connector: Arc<dyn Connector>,
    locator: PortLocator,

    state: LinkState,
    handle: Option<DeviceHandle>,
    degraded_confidence: bool,

    last_reconnect: Option<Instant>,
    failed_connects: u32,

    cancel: CancellationToken,
    status: watch::Sender<LinkStatus>,
}

impl DeviceLink {
    /// A new link in the [`LinkState::Disconnected`] state.
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        locator: PortLocator,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(LinkStatus::default());

        Self {
            serial: config.serial.clone(),
            settings: config.link.clone(),
            connector,
            locator,
            state: LinkState::Disconnected,
            handle: None,
            degraded_confidence: false,
            last_reconnect: None,
            failed_connects: 0,
            cancel,
            status,
        }
    }

    /// The current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// True if reads and writes are expected to work.
    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready && self.handle.is_some()
    }

    /// See [`LinkStatus::degraded_confidence`].
    pub fn degraded_confidence(&self) -> bool {
        self.degraded_confidence
    }

    /// Observe status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    /// The token which shuts this link down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// See [`LinkSettings::poll_interval_ms`].
    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval()
    }

    fn publish_status(&self) {
        let handle = self.handle.as_ref();

        self.status.send_replace(LinkStatus {
            state: self.state,
            port: handle.map(|handle| handle.port.clone()),
            degraded_confidence: self.degraded_confidence,
            last_read: handle.and_then(|handle| handle.last_read_at),
            consecutive_failures: handle.map_or(0, |handle| handle.consecutive_failures),
            failed_connects: self.failed_connects,
        });
    }

    fn transition(&mut self, to: LinkState) {
        if self.state != to {
            info!(from = %self.state, %to, "Link state change");
        }
        self.state = to;
        self.publish_status();
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }

    fn check_cancelled(&mut self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            self.close_handle();
            self.transition(LinkState::Disconnected);
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Soft failure: the handle stays open until the next reconnect.
    fn degrade(&mut self, reason: &str) {
        warn!(%reason, "Link degraded");
        if let Some(handle) = self.handle.as_mut() {
            handle.consecutive_failures += 1;
        }
        self.transition(LinkState::Degraded);
    }

    /// Hard failure: the handle is closed right away.
    fn fail(&mut self, reason: &str) {
        self.degrade(reason);
        self.close_handle();
        self.publish_status();
    }

    /// Open the given port and verify the device on it.
    ///
    /// Any open handle is closed first.
    /// A device which does not verify in time is still used,
    /// see [`LinkStatus::degraded_confidence`].
    pub async fn connect(&mut self, port: &str) -> Result<(), Error> {
        self.close_handle();
        self.check_cancelled()?;

        self.transition(LinkState::Connecting);
        debug!(%port, baud = self.serial.baud_rate, "Opening port");

        let io = match self.connector.open(port, &self.serial) {
            Ok(io) => io,
            Err(e) => {
                warn!(%e, "Could not open port");
                self.transition(LinkState::Disconnected);
                return Err(e);
            }
        };

        self.handle = Some(DeviceHandle::new(port, self.serial.baud_rate, io));
        self.degraded_confidence = false;

        self.check_cancelled()?;
        self.transition(LinkState::Verifying);

        // Many boards reset when the port is opened.
        tokio::select! {
            _ = tokio::time::sleep(self.settings.settle()) => {}
            _ = self.cancel.cancelled() => {}
        }
        self.check_cancelled()?;

        match self.verify(port).await {
            Ok(()) => {}
            Err(Error::VerificationTimeout(port)) => {
                warn!(%port, "Device did not verify, using it anyway");
                self.degraded_confidence = true;
            }
            Err(e) => {
                self.close_handle();
                self.transition(LinkState::Disconnected);
                return Err(e);
            }
        }

        self.check_cancelled()?;
        self.failed_connects = 0;
        self.transition(LinkState::Ready);

        Ok(())
    }

    async fn verify(&mut self, port: &str) -> Result<(), Error> {
        let write_timeout = self.serial.write_timeout();
        let read_timeout = self.serial.read_timeout();
        let attempts = self.settings.probe_attempts;
        let cancel = self.cancel.clone();

        let handle = self.handle.as_mut().ok_or(Error::NotConnected)?;

        let connection_failed = |problem: String| Error::ConnectionFailed {
            port: port.to_owned(),
            problem,
        };

        match timeout(write_timeout, handle.framed.send(PING.as_bytes().to_vec())).await {
            Ok(Ok(())) => trace!("Probe sent"),
            Ok(Err(e)) => return Err(connection_failed(format!("probe write failed: {e}"))),
            Err(_) => return Err(connection_failed("probe write timed out".into())),
        }

        for attempt in 1..=attempts {
            let read = tokio::select! {
                read = timeout(read_timeout, handle.framed.next()) => read,
                _ = cancel.cancelled() => return Err(Error::ShuttingDown),
            };

            let probe = match read {
                Ok(Some(Ok(bytes))) => {
                    let message = SerialMessage::decode(bytes);
                    if message.is_blank() {
                        continue;
                    }
                    handle.mark_read();

                    if message.as_str().trim() == PONG {
                        Probe::Pong
                    } else if message.as_str().contains(frame::FIELD_DELIMITER) {
                        Probe::Telemetry
                    } else {
                        Probe::Other
                    }
                }
                Ok(Some(Err(e))) => {
                    return Err(connection_failed(format!("read failed during probe: {e}")))
                }
                Ok(None) => return Err(connection_failed("device closed during probe".into())),
                Err(_) => {
                    debug!(%attempt, "No reply to probe yet");
                    continue;
                }
            };

            match probe {
                Probe::Pong => {
                    info!(%attempt, "Device answered probe");
                    return Ok(());
                }
                Probe::Telemetry => {
                    info!(%attempt, "Device is sending telemetry");
                    return Ok(());
                }
                Probe::Other => debug!(%attempt, "Unrelated line while probing"),
            }
        }

        Err(Error::VerificationTimeout(port.to_owned()))
    }

    /// Read a single line if one is available, without waiting.
    ///
    /// Failures are not returned, they degrade the link instead.
    pub fn read_line(&mut self) -> Option<String> {
        if self.state != LinkState::Ready {
            return None;
        }

        let handle = self.handle.as_mut()?;

        let outcome = match handle.framed.next().now_or_never() {
            None => ReadOutcome::Nothing,
            Some(Some(Ok(bytes))) => {
                let message = SerialMessage::decode(bytes);
                if message.is_blank() {
                    ReadOutcome::Nothing
                } else {
                    handle.mark_read();
                    ReadOutcome::Line(message)
                }
            }
            Some(Some(Err(e))) => ReadOutcome::Failed(format!("read failed: {e}")),
            Some(None) => ReadOutcome::Failed("device closed the connection".into()),
        };

        match outcome {
            ReadOutcome::Nothing => None,
            ReadOutcome::Line(message) => {
                trace!(%message, "Line from device");
                Some(message.into_string())
            }
            ReadOutcome::Failed(reason) => {
                self.fail(&reason);
                None
            }
        }
    }

    /// Put `text` and a newline on the wire.
    ///
    /// Returns `false` if the link is not ready or the write failed.
    /// A failed write degrades the link.
    pub async fn write_command(&mut self, text: &str) -> bool {
        if !self.is_ready() {
            debug!(%text, "Not ready, refusing write");
            return false;
        }

        let write_timeout = self.serial.write_timeout();
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };

        let line = text.trim_end_matches(['\r', '\n']).as_bytes().to_vec();

        match timeout(write_timeout, handle.framed.send(line)).await {
            Ok(Ok(())) => {
                debug!(%text, "Wrote command");
                true
            }
            Ok(Err(e)) => {
                self.fail(&format!("write failed: {e}"));
                false
            }
            Err(_) => {
                self.degrade("write timed out");
                false
            }
        }
    }

    /// A ready link without a successful read for too long is degraded.
    pub fn check_health(&mut self, now: Instant) -> LinkState {
        if self.state == LinkState::Ready {
            let stale_after = self.settings.stale_after();

            match &self.handle {
                Some(handle) if now.saturating_duration_since(handle.last_read) > stale_after => {
                    self.degrade(&format!("no data for more than {stale_after:?}"));
                }
                Some(_) => {}
                None => self.degrade("no open handle"),
            }
        }

        self.state
    }

    fn reconnect_due(&self, now: Instant) -> bool {
        match self.last_reconnect {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.reconnect_cooldown(),
        }
    }

    /// Discover the port again and connect to it.
    ///
    /// The old handle is closed before anything is opened.
    pub async fn reconnect(&mut self, now: Instant) -> Result<(), Error> {
        self.last_reconnect = Some(now);
        self.check_cancelled()?;

        self.close_handle();
        self.publish_status();

        let Some(port) = self.locator.locate() else {
            self.failed_connects += 1;
            self.transition(LinkState::Disconnected);
            return Err(Error::PortNotFound);
        };

        self.check_cancelled()?;

        info!(%port, attempt = self.failed_connects + 1, "Reconnecting");
        let result = self.connect(&port).await;
        if result.is_err() {
            self.failed_connects += 1;
            self.publish_status();
        }

        result
    }

    /// Health check, then reconnect if the link is down and the cooldown has passed.
    ///
    /// Returns `None` if no reconnect was attempted.
    pub async fn maintain(&mut self, now: Instant) -> Option<Result<(), Error>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        match self.check_health(now) {
            LinkState::Degraded | LinkState::Disconnected if self.reconnect_due(now) => {
                Some(self.reconnect(now).await)
            }
            _ => None,
        }
    }

    /// Stop the link.
    /// Closes the handle if open. Calling this again does nothing.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.close_handle();
        if self.state != LinkState::Disconnected {
            self.transition(LinkState::Disconnected);
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.close_handle();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;
    use crate::discovery::{FixedPorts, PortInfo};
    use pretty_assertions::assert_eq;

    /// Hands out prepared in-memory connections, in order.
    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pending: Mutex<VecDeque<DuplexStream>>,
        pub(crate) opened: Mutex<Vec<String>>,
    }

    impl FakeConnector {
        /// Prepare a connection, returning the device side of it.
        pub(crate) fn plug(&self) -> DuplexStream {
            let (ours, theirs) = duplex(4096);
            self.pending.lock().unwrap().push_back(ours);
            theirs
        }
    }

    impl Connector for FakeConnector {
        fn open(&self, port: &str, _settings: &SerialSettings) -> Result<Box<dyn DeviceIo>, Error> {
            self.opened.lock().unwrap().push(port.to_owned());
            match self.pending.lock().unwrap().pop_front() {
                Some(io) => Ok(Box::new(io)),
                None => Err(Error::ConnectionFailed {
                    port: port.to_owned(),
                    problem: "nothing plugged in".into(),
                }),
            }
        }
    }

    /// Counts scans.
    pub(crate) struct CountingScanner {
        inner: FixedPorts,
        pub(crate) scans: AtomicUsize,
    }

    impl CountingScanner {
        pub(crate) fn new(ports: &[&str]) -> Self {
            Self {
                inner: FixedPorts(
                    ports
                        .iter()
                        .map(|name| PortInfo {
                            name: name.to_string(),
                            description: "Arduino Uno".into(),
                            hardware_id: "USB VID:PID=2341:0043".into(),
                        })
                        .collect(),
                ),
                scans: AtomicUsize::new(0),
            }
        }
    }

    impl PortScanner for CountingScanner {
        fn scan(&self) -> Result<Vec<PortInfo>, Error> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.scan()
        }
    }

    pub(crate) fn fast_config() -> Config {
        let mut config = Config::default();
        config.link.settle_ms = 0;
        config.link.probe_attempts = 3;
        config.serial.read_timeout_ms = 50;
        config.serial.write_timeout_ms = 50;
        config
    }

    /// Plays a device which answers the probe.
    pub(crate) async fn answer_probe(device: DuplexStream, reply: &str) -> BufReader<DuplexStream> {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        device.read_line(&mut line).await.unwrap();
        assert_eq!(line, "PING\n");
        device
            .get_mut()
            .write_all(format!("{reply}\n").as_bytes())
            .await
            .unwrap();
        device
    }

    fn link_with(connector: Arc<FakeConnector>, scanner: Arc<CountingScanner>) -> DeviceLink {
        let config = fast_config();
        let locator = PortLocator::from_config(&config, scanner);
        DeviceLink::new(&config, connector, locator, CancellationToken::new())
    }

    async fn ready_link() -> (DeviceLink, BufReader<DuplexStream>, Arc<FakeConnector>, Arc<CountingScanner>) {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&["/dev/ttyACM0"]));
        let mut link = link_with(connector.clone(), scanner.clone());

        let device = connector.plug();
        let (result, device) = tokio::join!(link.connect("/dev/ttyACM0"), answer_probe(device, PONG));
        result.unwrap();

        (link, device, connector, scanner)
    }

    #[tokio::test]
    async fn pong_verifies() {
        let (link, _device, _, _) = ready_link().await;

        assert_eq!(link.state(), LinkState::Ready);
        assert!(link.is_ready());
        assert!(!link.degraded_confidence());
    }

    #[tokio::test]
    async fn telemetry_verifies() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector.clone(), scanner);

        let device = connector.plug();
        let (result, _device) = tokio::join!(link.connect("COM3"), answer_probe(device, "1,2,3,4"));
        result.unwrap();

        assert!(link.is_ready());
        assert!(!link.degraded_confidence());
    }

    #[tokio::test]
    async fn silent_device_is_ready_with_degraded_confidence() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector.clone(), scanner);

        let _device = connector.plug();
        link.connect("COM3").await.unwrap();

        assert_eq!(link.state(), LinkState::Ready);
        assert!(link.degraded_confidence());
        assert!(link.subscribe_status().borrow().degraded_confidence);
    }

    #[tokio::test]
    async fn open_failure_is_disconnected() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector, scanner);

        let err = link.connect("COM3").await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn device_closing_during_probe_fails_connect() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector.clone(), scanner);

        drop(connector.plug());
        let err = link.connect("COM3").await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn read_line_does_not_wait() {
        let (mut link, mut device, _, _) = ready_link().await;

        assert_eq!(link.read_line(), None);

        device.get_mut().write_all(b"1.0,2.0,3.0,4.0,5.0\r\n").await.unwrap();
        assert_eq!(link.read_line().as_deref(), Some("1.0,2.0,3.0,4.0,5.0"));
        assert_eq!(link.read_line(), None);
        assert!(link.subscribe_status().borrow().last_read.is_some());
    }

    #[tokio::test]
    async fn read_line_falls_back_to_latin1() {
        let (mut link, mut device, _, _) = ready_link().await;

        device.get_mut().write_all(&[b'O', b'K', 0xFF, b'\n']).await.unwrap();

        assert_eq!(link.read_line().as_deref(), Some("OKÿ"));
        assert!(link.is_ready());
    }

    #[tokio::test]
    async fn write_command_appends_newline() {
        let (mut link, mut device, _, _) = ready_link().await;

        assert!(link.write_command("position 3.0").await);

        let mut line = String::new();
        device.read_line(&mut line).await.unwrap();
        assert_eq!(line, "position 3.0\n");
    }

    #[tokio::test]
    async fn unplugged_device_degrades_on_read() {
        let (mut link, device, _, _) = ready_link().await;

        drop(device);

        assert_eq!(link.read_line(), None);
        assert_eq!(link.state(), LinkState::Degraded);
        assert!(!link.is_ready());
        assert!(!link.write_command("hold").await);
    }

    #[tokio::test]
    async fn write_failure_degrades() {
        let (mut link, device, _, _) = ready_link().await;

        drop(device);

        assert!(!link.write_command("hold").await);
        assert_eq!(link.state(), LinkState::Degraded);
    }

    #[tokio::test]
    async fn stale_link_degrades_and_reconnects_once() {
        let (mut link, _device, connector, scanner) = ready_link().await;

        let later = Instant::now() + Duration::from_secs(6);

        // The rediscovered device answers the probe too.
        let next_device = connector.plug();
        let (result, _next_device) = tokio::join!(link.maintain(later), answer_probe(next_device, PONG));

        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
        assert_eq!(link.state(), LinkState::Ready);
        assert_eq!(
            *connector.opened.lock().unwrap(),
            vec!["/dev/ttyACM0".to_owned(), "/dev/ttyACM0".to_owned()]
        );

        // Still stale from the point of view of `later`, but within the cooldown.
        assert!(link.maintain(later).await.is_none());
        assert_eq!(link.state(), LinkState::Degraded);
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_link_is_left_alone() {
        let (mut link, _device, _, scanner) = ready_link().await;

        assert!(link.maintain(Instant::now()).await.is_none());
        assert_eq!(link.state(), LinkState::Ready);
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reconnect_without_port_is_port_not_found() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector, scanner.clone());

        let result = link.maintain(Instant::now()).await;

        assert!(matches!(result, Some(Err(Error::PortNotFound))));
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.subscribe_status().borrow().failed_connects, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_reconnects() {
        let (mut link, device, _, scanner) = ready_link().await;

        link.shutdown();
        link.shutdown();

        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.is_ready());

        // The handle is closed, so the device sees end of stream.
        let mut device = device;
        let mut line = String::new();
        assert_eq!(device.read_line(&mut line).await.unwrap(), 0);

        let later = Instant::now() + Duration::from_secs(60);
        assert!(link.maintain(later).await.is_none());
        assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_link_does_not_connect() {
        let connector = Arc::new(FakeConnector::default());
        let scanner = Arc::new(CountingScanner::new(&[]));
        let mut link = link_with(connector.clone(), scanner);

        link.cancellation().cancel();
        let _device = connector.plug();

        assert_eq!(link.connect("COM3").await.unwrap_err(), Error::ShuttingDown);
        assert!(connector.opened.lock().unwrap().is_empty());
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
