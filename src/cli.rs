use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    actions::CommandOutcome,
    config::Config,
    discovery::{PortInfo, PortScanner, SystemPorts},
    error::Error,
    events::TelemetryEvent,
};

/// The command line interface for gripper link.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// The HTTP/websocket port to listen on.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// The serial port of the device, skipping port discovery.
    /// Overrides the configuration file.
    #[arg(short, long)]
    pub device: Option<String>,

    /// Use a simulated device instead of a serial port.
    #[arg(long)]
    pub mock: bool,

    /// Log level on stdout.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Let command line flags override the configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.listen_port = port;
        }

        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }

        if self.mock {
            config.mock_device = true;
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// List the serial ports on this machine.
    Ports,

    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON event of sensor data.
    SensorData,

    /// Show an example JSON event of a device response.
    CommandResponse,

    /// Show example JSON outcomes of a command.
    Outcome,
}

fn json<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Error::InternalIssue(format!("Could not serialize example: {e}")))
}

fn list_ports(ports: &[PortInfo], markers: &[String]) -> String {
    if ports.is_empty() {
        return "No serial ports available".into();
    }

    ports
        .iter()
        .map(|port| {
            let tag = if port.matches(markers) { " (matches)" } else { "" };
            format!("{port}{tag}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run a subcommand, printing its output.
pub fn handle_command(command: Commands) -> Result<(), Error> {
    let output = match command {
        Commands::Ports => {
            let ports = SystemPorts.scan()?;
            list_ports(&ports, &Config::default().port_markers)
        }
        Commands::Examples(example) => match example {
            Examples::Config => Config::example().serialize_pretty()?,
            Examples::SensorData => json(&TelemetryEvent::example_sensor_data())?,
            Examples::CommandResponse => json(&TelemetryEvent::example_command_response())?,
            Examples::Outcome => format!(
                "{}\n{}",
                json(&CommandOutcome::example_success())?,
                json(&CommandOutcome::example_error())?
            ),
        },
    };

    println!("{output}");

    Ok(())
}
