use std::io::IsTerminal;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use gripper_link::{
    cli,
    config::Config,
    discovery::{self, PortScanner, SystemPorts},
    logging,
    server::{self, Device},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(mut hangup) => {
            hangup.recv().await;
        }
        Err(e) => {
            warn!(%e, "Cannot listen for hangups");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn hangup() {
    std::future::pending::<()>().await
}

/// Nothing configured nor found: let an operator at a terminal pick a port.
fn ask_for_port(config: &Config) -> Result<Option<String>> {
    if config.mock_device || config.device.is_some() || !std::io::stdin().is_terminal() {
        return Ok(None);
    }

    let ports = SystemPorts.scan()?;
    if discovery::select_port(&ports, &config.port_markers).is_some() {
        return Ok(None);
    }

    let port = discovery::choose_port(&ports, std::io::stdin().lock(), std::io::stdout())?;
    Ok(port)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let mut cli = cli::Cli::parse();

    if let Some(command) = cli.command.take() {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(
        cli.log_level,
        cli.log_dir.clone().map(|dir| (Level::DEBUG, dir)),
    )
    .await;

    let mut config = if let Some(config_path) = &cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    cli.apply(&mut config);
    config.validate()?;

    if let Some(port) = ask_for_port(&config)? {
        info!(%port, "Port chosen");
        config.device = Some(port);
    }

    let device = Device::from_config(&config);
    let shutdown = CancellationToken::new();

    let mut server = tokio::spawn(server::run_on_port(
        config.clone(),
        device,
        config.listen_port,
        shutdown.clone(),
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = &mut server => {
            error!("Server returned");
            logging::shutdown();

            result??;
            return Err(eyre!("Server stopped unexpectedly"));
        }
    }

    shutdown.cancel();
    if let Err(e) = server.await? {
        warn!(%e, "Server stopped with an error");
    }

    logging::shutdown();

    Ok(())
}
