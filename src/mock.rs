//! A simulated device, useful to run and test the bridge without the actual hardware.
//!
//! It behaves like the gripper firmware:
//! `PING` is answered with `PONG`, commands are acknowledged with `OK <command>`,
//! and telemetry lines are sent periodically.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use tokio::{io::DuplexStream, sync::broadcast, time::MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::{codec::Decoder, sync::CancellationToken};
use tracing::{debug, info, trace, warn};

use crate::{
    link::{PING, PONG},
    serial::{codecs::lines::LinesCodec, SerialMessage},
};

/// The port name a mock device is reached at.
pub const MOCK_PORT: &str = "mock";

/// Builder for a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockBuilder {
    telemetry_period: Option<Duration>,
    answer_probe: bool,
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self {
            telemetry_period: Some(Duration::from_millis(100)),
            answer_probe: true,
        }
    }
}

impl MockBuilder {
    /// Start a new builder.
    /// By default the device answers probes and sends telemetry every 100 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send telemetry this often.
    pub fn telemetry_every(mut self, period: Duration) -> Self {
        self.telemetry_period = Some(period);
        self
    }

    /// Never send telemetry on our own.
    pub fn no_telemetry(mut self) -> Self {
        self.telemetry_period = None;
        self
    }

    /// Ignore `PING`.
    pub fn ignore_probe(mut self) -> Self {
        self.answer_probe = false;
        self
    }

    /// Create the device. It is plugged in.
    pub fn build(self) -> MockDevice {
        let (injected, _) = broadcast::channel(64);

        MockDevice {
            shared: Arc::new(MockShared {
                settings: self,
                plugged_in: AtomicBool::new(true),
                opened: AtomicUsize::new(0),
                connections: Mutex::new(Vec::new()),
                received: Mutex::new(Vec::new()),
                injected,
            }),
        }
    }
}

pub(crate) struct MockShared {
    settings: MockBuilder,
    plugged_in: AtomicBool,
    opened: AtomicUsize,

    // One token per running firmware task
    connections: Mutex<Vec<CancellationToken>>,

    // Every line the firmware got, in order
    received: Mutex<Vec<String>>,

    // Lines the firmware should send as-is
    injected: broadcast::Sender<String>,
}

/// A simulated device.
/// Clones refer to the same device.
#[derive(Clone)]
pub struct MockDevice {
    pub(crate) shared: Arc<MockShared>,
}

impl MockDevice {
    /// A device with default behaviour.
    pub fn new() -> Self {
        MockBuilder::new().build()
    }

    /// Simulate pulling the cable.
    /// Running connections end, and opening fails until [`MockDevice::plug_in`].
    pub fn unplug(&self) {
        info!("Mock device unplugged");
        self.shared.plugged_in.store(false, Ordering::SeqCst);

        let connections = std::mem::take(&mut *lock(&self.shared.connections));
        for connection in connections {
            connection.cancel();
        }
    }

    /// Simulate plugging the cable back in.
    pub fn plug_in(&self) {
        info!("Mock device plugged in");
        self.shared.plugged_in.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_plugged_in(&self) -> bool {
        self.shared.plugged_in.load(Ordering::SeqCst)
    }

    /// How many times the device was opened.
    pub fn times_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Every line the device received, in order.
    pub fn received(&self) -> Vec<String> {
        lock(&self.shared.received).clone()
    }

    /// Have the device send this line on every open connection.
    pub fn send_line(&self, line: &str) {
        if self.shared.injected.send(line.to_owned()).is_err() {
            debug!(%line, "No open connection to send on");
        }
    }

    /// Start the firmware on the device side of a fresh connection.
    pub(crate) fn attach(&self, io: DuplexStream) {
        let stop = CancellationToken::new();
        lock(&self.shared.connections).push(stop.clone());
        self.shared.opened.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(run_firmware(
            io,
            self.shared.clone(),
            stop,
            BroadcastStream::new(self.shared.injected.subscribe()),
        ));
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the firmware remembers between lines.
#[derive(Debug, Default)]
struct Firmware {
    position_volts: f64,
    lower_limit: f64,
    upper_limit: f64,
    ticks: u64,
}

impl Firmware {
    fn handle(&mut self, command: &str, answer_probe: bool) -> Option<String> {
        let command = command.trim();

        if command.is_empty() {
            return None;
        }

        if command == PING {
            return answer_probe.then(|| PONG.to_owned());
        }

        let (verb, argument) = command.split_once(' ').unwrap_or((command, ""));

        let target = match verb {
            "position" => &mut self.position_volts,
            "upperlimit" => &mut self.upper_limit,
            "lowerlimit" => &mut self.lower_limit,
            _ => return Some(format!("OK {command}")),
        };

        match argument.trim().parse::<f64>() {
            Ok(value) => {
                *target = value;
                Some(format!("OK {command}"))
            }
            Err(_) => Some(format!("ERR bad value for {verb}")),
        }
    }

    fn telemetry_line(&mut self) -> String {
        self.ticks += 1;
        let t = self.ticks as f64 / 10.0;

        let x = 40.0 * t.sin();
        let y = 40.0 * t.cos();
        let z = 10.0 * (t / 2.0).sin();
        let distance = 50.0 - self.position_volts / 6.0 * 45.0;

        format!(
            "{x:.2},{y:.2},{z:.2},{:.2},{distance:.1}",
            self.position_volts
        )
    }
}

async fn run_firmware(
    io: DuplexStream,
    shared: Arc<MockShared>,
    stop: CancellationToken,
    mut injected: BroadcastStream<String>,
) {
    let (mut sink, mut stream) = LinesCodec::default().framed(io).split();

    let streaming = shared.settings.telemetry_period.is_some();
    let mut ticker = tokio::time::interval(
        shared
            .settings
            .telemetry_period
            .unwrap_or(Duration::from_secs(3600)),
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut firmware = Firmware::default();

    debug!("Mock firmware running");

    loop {
        let outgoing = tokio::select! {
            _ = stop.cancelled() => {
                debug!("Mock firmware stopped");
                break;
            }
            line = stream.next() => match line {
                Some(Ok(bytes)) => {
                    let command = SerialMessage::decode(bytes);
                    trace!(%command, "Mock firmware got line");
                    lock(&shared.received).push(command.as_str().to_owned());

                    match firmware.handle(command.as_str(), shared.settings.answer_probe) {
                        Some(reply) => reply,
                        None => continue,
                    }
                }
                Some(Err(e)) => {
                    warn!(?e, "Mock firmware read error");
                    break;
                }
                None => {
                    debug!("Host closed the connection");
                    break;
                }
            },
            Some(Ok(line)) = injected.next() => line,
            _ = ticker.tick(), if streaming => firmware.telemetry_line(),
        };

        if sink.send(outgoing.into_bytes()).await.is_err() {
            debug!("Host gone, mock firmware exiting");
            break;
        }
    }
}
