#![deny(missing_docs)]

//! This crate bridges a single serial device to any number of network clients.
//!
//! A control surface (HTTP) opens and closes the device and writes commands to it.
//! A streaming surface (websocket) delivers connection state changes and every line
//! the device produces to all connected subscribers.
//!
//! The [`manager::ConnectionManager`] owns the device and its state machine.
//! The [`hub::BroadcastHub`] fans messages out to subscribers, independently of device I/O,
//! so a slow subscriber can't hold up the device or other subscribers.
//!
//! In-memory devices are available in [`mock`], for trying things out without hardware.

/// The command line interface.
pub mod cli;

/// A client receiving what the server streams.
pub mod client;

/// Configuration of the server.
pub mod config;

/// How devices are acquired.
pub mod device;

/// Possible errors in this library.
pub mod error;

/// What subscribers are sent.
pub mod events;

/// Delivery of messages to subscribers.
pub mod hub;

/// Logging setup.
pub mod logging;

/// The device connection and its state machine.
pub mod manager;

/// In-memory devices.
pub mod mock;

/// Serial port specifics.
pub mod serial;

/// Code relating to setting up a server.
pub mod server;

/// The HTTP control surface.
pub mod control;

mod websocket;
