#![deny(missing_docs)]

//! This crate bridges a serial-attached gripper rig to networked clients.
//!
//! A single supervised [`link::DeviceLink`] owns the serial port.
//! Lines the device sends are decoded by [`frame`] into [`events::TelemetryEvent`]s,
//! and the [`hub::Hub`] fans them out to every subscriber.
//! Websocket clients each get their own subscriber.
//!
//! Commands go through the [`gateway::CommandGateway`], which validates them
//! before they are written to the device.
//!
//! When the device goes quiet or away, the link degrades, rediscovers the port
//! and reconnects on its own.
//!
//! A simulated device is available, see [`mock`].
//! This allows running the whole bridge without the actual hardware,
//! which is what the integration tests do.

/// Commands for the device, as well as the outcomes reported to users.
pub mod actions;

/// Code relating to setting up the server which spawns the link and handles clients.
pub mod server;

/// Clients.
pub mod client;

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Finding the serial port of the device.
pub mod discovery;

/// Possible errors in this library.
pub mod error;

/// Events the server emits.
pub mod events;

/// Turns lines from the device into events.
pub mod frame;

/// Validates and forwards commands to the device.
pub mod gateway;

/// Fan-out of events to subscribers.
pub mod hub;

/// The connection to the device.
pub mod link;

/// Logging/tracing setup.
pub mod logging;

/// Simulated device.
pub mod mock;

/// Serial line framing.
pub mod serial;

/// The task owning the device link.
pub mod supervisor;

/// Handles incoming websockets.
pub(crate) mod websocket;
