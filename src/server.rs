use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    actions::CommandOutcome,
    config::Config,
    discovery::SystemPorts,
    error::Error,
    gateway::CommandGateway,
    hub::Hub,
    link::{serial::SerialConnector, Connector, DeviceLink, LinkStatus, PortLocator},
    mock::{MockDevice, MOCK_PORT},
    supervisor::{LinkHandle, LinkSupervisor},
    websocket,
};

/// What the server talks to.
#[derive(Clone)]
pub struct Device {
    connector: Arc<dyn Connector>,
    locator: PortLocator,
    initial_port: Option<String>,
}

impl Device {
    /// A device opened with `connector`, found (and re-found) with `locator`.
    pub fn new(connector: Arc<dyn Connector>, locator: PortLocator) -> Self {
        Self {
            connector,
            locator,
            initial_port: None,
        }
    }

    /// Connect to this port first, instead of asking the locator.
    pub fn with_initial_port(mut self, port: &str) -> Self {
        self.initial_port = Some(port.to_owned());
        self
    }

    /// Use a simulated device.
    pub fn mock(device: MockDevice) -> Self {
        Self::new(Arc::new(device), PortLocator::Fixed(MOCK_PORT.into())).with_initial_port(MOCK_PORT)
    }

    /// A simulated device if the configuration asks for one,
    /// otherwise serial ports found on this machine.
    pub fn from_config(config: &Config) -> Self {
        if config.mock_device {
            return Self::mock(MockDevice::new());
        }

        let locator = PortLocator::from_config(config, Arc::new(SystemPorts));
        let initial_port = locator.locate();

        Self {
            connector: Arc::new(SerialConnector),
            locator,
            initial_port,
        }
    }
}

async fn run(
    config: Config,
    device: Device,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    config.validate()?;

    let hub = Hub::new(config.subscriber_capacity);

    let link = DeviceLink::new(
        &config,
        device.connector,
        device.locator,
        shutdown.child_token(),
    );
    let (link_handle, supervisor) = LinkSupervisor::spawn(link, hub.clone(), device.initial_port);
    let gateway = CommandGateway::new(link_handle.clone());

    let app = Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/command/:cmd", post(send_command))
        .route("/position/:position", post(set_position))
        .route("/voltage-limits/:lower/:upper", post(set_voltage_limits))
        .route("/status", get(show_status))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Browser dashboards are served from elsewhere
                .layer(CorsLayer::permissive())
                // Each websocket registers with the hub
                .layer(Extension(hub))
                .layer(Extension(gateway))
                .layer(Extension(link_handle.clone()))
                .layer(Extension(config.clone())),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = match axum::Server::try_bind(&addr) {
        Ok(builder) => builder.serve(app.into_make_service_with_connect_info::<SocketAddr>()),
        Err(e) => {
            link_handle.shutdown();
            return Err(Error::InternalIssue(format!("Could not listen on {addr}: {e}")));
        }
    };
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            debug!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    let result = server
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::InternalIssue(format!("Server failed: {e}")));

    // The link also stops if the server failed on its own.
    link_handle.shutdown();
    if let Err(e) = supervisor.await {
        warn!(?e, "Link supervisor did not stop cleanly");
    }

    info!("Server stopped");

    result
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
///
/// Runs until `shutdown` is cancelled.
pub async fn run_any_port(
    config: Config,
    device: Device,
    allocated_port: oneshot::Sender<u16>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    run(config, device, None, Some(allocated_port), shutdown).await
}

/// Start the server on the given port.
///
/// Runs until `shutdown` is cancelled.
pub async fn run_on_port(
    config: Config,
    device: Device,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    run(config, device, Some(port), None, shutdown).await
}

async fn send_command(
    Path(command): Path<String>,
    Extension(gateway): Extension<CommandGateway>,
) -> Json<CommandOutcome> {
    Json(gateway.send_raw(&command).await)
}

async fn set_position(
    Path(position): Path<String>,
    Extension(gateway): Extension<CommandGateway>,
) -> Json<CommandOutcome> {
    let outcome = match position.trim().parse::<i64>() {
        Ok(position) => gateway.set_position(position).await,
        Err(_) => Error::Validation("Position must be a whole number".into()).into(),
    };

    Json(outcome)
}

async fn set_voltage_limits(
    Path((lower, upper)): Path<(String, String)>,
    Extension(gateway): Extension<CommandGateway>,
) -> Json<CommandOutcome> {
    let outcome = match (lower.trim().parse::<f64>(), upper.trim().parse::<f64>()) {
        (Ok(lower), Ok(upper)) => gateway.set_voltage_limits(lower, upper).await,
        _ => Error::Validation("Voltage limits must be numbers".into()).into(),
    };

    Json(outcome)
}

/// What `GET /status` shows.
#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    link: LinkStatus,
    subscribers: usize,
}

async fn show_status(
    Extension(link): Extension<LinkHandle>,
    Extension(hub): Extension<Hub>,
) -> Json<StatusReport> {
    Json(StatusReport {
        link: link.status(),
        subscribers: hub.len(),
    })
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    match config.serialize_pretty() {
        Ok(config) => config,
        Err(e) => e.to_string(),
    }
}

async fn show_version() -> impl IntoResponse {
    format!("Gripper Link v{}\n", env!("CARGO_PKG_VERSION"))
}
