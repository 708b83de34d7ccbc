//! The telemetry loop.
//!
//! A single task owns the [`DeviceLink`].
//! It reads lines, decodes them, publishes them to the [`Hub`],
//! keeps the link healthy, and serializes writes coming from [`LinkHandle`]s.

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    frame,
    hub::Hub,
    link::{DeviceLink, LinkState, LinkStatus},
};

/// Upper bound on lines handled before the loop looks at write requests again.
const MAX_LINES_PER_ROUND: usize = 64;

#[derive(Debug)]
pub(crate) enum LinkRequest {
    Write {
        line: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Talks to the task owning the device link.
/// Cheap to clone.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    requests: mpsc::UnboundedSender<LinkRequest>,
    status: watch::Receiver<LinkStatus>,
    cancel: CancellationToken,
}

impl LinkHandle {
    /// True if the link is ready for commands.
    pub fn is_ready(&self) -> bool {
        self.status.borrow().state == LinkState::Ready
    }

    /// A snapshot of the link.
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Wait until the link state is `state`.
    pub async fn wait_for(&mut self, state: LinkState) {
        while self.status.borrow_and_update().state != state {
            if self.status.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queue a line for the device, and wait for the write to complete.
    ///
    /// Returns `false` if the link is gone, not ready, or the write failed.
    pub async fn write_command(&self, text: &str) -> bool {
        let (reply, response) = oneshot::channel();

        let request = LinkRequest::Write {
            line: text.to_owned(),
            reply,
        };

        if self.requests.send(request).is_err() {
            debug!("Link task is gone");
            return false;
        }

        response.await.unwrap_or(false)
    }

    /// Ask the link task to stop.
    /// The task closes the device handle on its way out.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn detached(
        state: LinkState,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<LinkRequest>,
        watch::Sender<LinkStatus>,
    ) {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LinkStatus {
            state,
            ..Default::default()
        });

        (
            Self {
                requests,
                status,
                cancel: CancellationToken::new(),
            },
            requests_rx,
            status_tx,
        )
    }
}

/// Runs the link.
pub struct LinkSupervisor {
    link: DeviceLink,
    hub: Hub,
    requests: mpsc::UnboundedReceiver<LinkRequest>,
    cancel: CancellationToken,
}

impl LinkSupervisor {
    /// Spawn the telemetry loop.
    ///
    /// If `initial_port` is given it is connected to first,
    /// otherwise the link discovers a port on its own.
    pub fn spawn(
        link: DeviceLink,
        hub: Hub,
        initial_port: Option<String>,
    ) -> (LinkHandle, JoinHandle<()>) {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let cancel = link.cancellation();

        let handle = LinkHandle {
            requests: requests_tx,
            status: link.subscribe_status(),
            cancel: cancel.clone(),
        };

        let supervisor = Self {
            link,
            hub,
            requests,
            cancel,
        };

        let span = info_span!("link", port = initial_port.as_deref().unwrap_or("<discover>"));
        let task = tokio::spawn(supervisor.run(initial_port).instrument(span));

        (handle, task)
    }

    fn pump_lines(&mut self) -> usize {
        let mut handled = 0;

        while handled < MAX_LINES_PER_ROUND {
            let Some(line) = self.link.read_line() else {
                break;
            };
            handled += 1;

            if let Some(event) = frame::decode(&line) {
                let delivered = self.hub.publish(event);
                trace!(%delivered, "Event published");
            }
        }

        handled
    }

    async fn handle_request(&mut self, request: LinkRequest) {
        match request {
            LinkRequest::Write { line, reply } => {
                let ok = self.link.write_command(&line).await;
                if reply.send(ok).is_err() {
                    debug!("Write requester went away");
                }
            }
        }
    }

    async fn run(mut self, initial_port: Option<String>) {
        info!("Link supervisor started");

        if let Some(port) = initial_port {
            if let Err(e) = self.link.connect(&port).await {
                warn!(%e, "Initial connect failed, will retry");
            }
        }

        let poll_interval = self.link.poll_interval();

        while !self.cancel.is_cancelled() {
            let handled = self.pump_lines();

            if let Some(Err(e)) = self.link.maintain(Instant::now()).await {
                debug!(%e, "Reconnect attempt failed");
            }

            // More might be pending, only yield to write requests.
            if handled == MAX_LINES_PER_ROUND {
                while let Ok(request) = self.requests.try_recv() {
                    self.handle_request(request).await;
                }
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(request) = self.requests.recv() => self.handle_request(request).await,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        self.link.shutdown();
        self.hub.close();

        info!("Link supervisor stopped");
    }
}
