//! Validates commands and writes them to the device.
//!
//! Nothing here fails outward: every call ends in a [`CommandOutcome`].

use tracing::{debug, info, warn};

use crate::{
    actions::{Command, CommandOutcome},
    error::Error,
    supervisor::LinkHandle,
};

/// The way commands reach the device.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    link: LinkHandle,
}

impl CommandGateway {
    /// Commands will be written via the given link.
    pub fn new(link: LinkHandle) -> Self {
        Self { link }
    }

    /// Send a command as-is.
    pub async fn send_raw(&self, command: &str) -> CommandOutcome {
        self.submit(Command::raw(command)).await
    }

    /// Move to `position` percent, sent to the device as 0-6 volts.
    pub async fn set_position(&self, position: i64) -> CommandOutcome {
        self.submit(Command::position(position)).await
    }

    /// Set the lower and upper voltage limits.
    pub async fn set_voltage_limits(&self, lower: f64, upper: f64) -> CommandOutcome {
        self.submit(Command::voltage_limits(lower, upper)).await
    }

    async fn submit(&self, command: Result<Command, Error>) -> CommandOutcome {
        let command = match command {
            Ok(command) => command,
            Err(e) => {
                debug!(%e, "Rejected command");
                return e.into();
            }
        };

        if !self.link.is_ready() {
            debug!(%command, "Not connected");
            return Error::NotConnected.into();
        }

        for line in command.wire_lines() {
            if !self.link.write_command(&line).await {
                warn!(%command, %line, "Write failed");
                return Error::WriteFailure(format!("could not write `{line}`")).into();
            }
        }

        info!(%command, "Command sent");
        CommandOutcome::success(command.success_message())
    }
}

#[cfg(test)]
mod tests {
    use tokio::{sync::mpsc, task::JoinHandle};

    use super::*;
    use crate::{actions::Status, link::LinkState, supervisor::LinkRequest};
    use pretty_assertions::assert_eq;

    /// Answers write requests with `ok`, collecting the lines.
    fn fake_link(
        mut requests: mpsc::UnboundedReceiver<LinkRequest>,
        ok: bool,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut lines = Vec::new();
            while let Some(LinkRequest::Write { line, reply }) = requests.recv().await {
                lines.push(line);
                let _ = reply.send(ok);
            }
            lines
        })
    }

    async fn run<F, Fut>(state: LinkState, ok: bool, f: F) -> (CommandOutcome, Vec<String>)
    where
        F: FnOnce(CommandGateway) -> Fut,
        Fut: std::future::Future<Output = CommandOutcome>,
    {
        let (handle, requests, _status) = LinkHandle::detached(state);
        let writer = fake_link(requests, ok);

        let outcome = f(CommandGateway::new(handle)).await;
        let lines = writer.await.unwrap();

        (outcome, lines)
    }

    #[tokio::test]
    async fn position_is_sent_as_volts() {
        let (outcome, lines) = run(LinkState::Ready, true, |gateway| async move {
            gateway.set_position(50).await
        })
        .await;

        assert_eq!(outcome, CommandOutcome::success("Position set to 50%"));
        assert_eq!(lines, vec!["position 3.0"]);
    }

    #[tokio::test]
    async fn out_of_range_position_is_never_written() {
        for position in [-1, 101, 1000] {
            let (outcome, lines) = run(LinkState::Ready, true, |gateway| async move {
                gateway.set_position(position).await
            })
            .await;

            assert_eq!(outcome.status, Status::Error);
            assert_eq!(outcome.message, "Position must be between 0 and 100");
            assert!(lines.is_empty());
        }
    }

    #[tokio::test]
    async fn inverted_voltage_limits_are_never_written() {
        let (outcome, lines) = run(LinkState::Ready, true, |gateway| async move {
            gateway.set_voltage_limits(8.0, 5.0).await
        })
        .await;

        assert_eq!(outcome.status, Status::Error);
        assert!(outcome.message.contains("must not be above"));
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn voltage_limits_are_two_lines() {
        let (outcome, lines) = run(LinkState::Ready, true, |gateway| async move {
            gateway.set_voltage_limits(1.0, 9.5).await
        })
        .await;

        assert!(outcome.is_success());
        assert_eq!(lines, vec!["upperlimit 9.5", "lowerlimit 1.0"]);
    }

    #[tokio::test]
    async fn raw_is_passed_through() {
        let (outcome, lines) = run(LinkState::Ready, true, |gateway| async move {
            gateway.send_raw("hold").await
        })
        .await;

        assert_eq!(outcome, CommandOutcome::success("Command hold sent"));
        assert_eq!(lines, vec!["hold"]);
    }

    #[tokio::test]
    async fn not_connected() {
        for state in [
            LinkState::Disconnected,
            LinkState::Verifying,
            LinkState::Degraded,
        ] {
            let (outcome, lines) = run(state, true, |gateway| async move {
                gateway.set_position(10).await
            })
            .await;

            assert_eq!(outcome, CommandOutcome::error("Device not connected"));
            assert!(lines.is_empty());
        }
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (outcome, lines) = run(LinkState::Ready, false, |gateway| async move {
            gateway.set_voltage_limits(1.0, 2.0).await
        })
        .await;

        assert_eq!(outcome.status, Status::Error);
        assert!(outcome.message.contains("upperlimit 2.0"));

        // The second line is not attempted.
        assert_eq!(lines, vec!["upperlimit 2.0"]);
    }
}
