//! Relay/dispatch engine.
//!
//! Accepts remote clients on a TCP listener, forwards their requests to a
//! single worker process over a Unix domain socket, and relays the worker's
//! responses back to the active client.
//!
//! The [`RelayController`] owns both sides and runs a dispatch loop that
//! consumes [`RelayEvent`]s and hands received packets to the [`Dispatcher`].

pub mod config;
#[cfg(unix)]
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod listener;
pub mod registry;
pub mod stats;
#[cfg(test)]
mod test_support;
#[cfg(unix)]
pub mod worker;

pub use config::{ClientConfig, RelayConfig, WorkerConfig};
#[cfg(unix)]
pub use controller::RelayController;
pub use dispatch::{ClientDispatch, ClientLink, Dispatcher, WorkerLink};
pub use error::{RelayError, Result};
pub use events::{ClientEvent, ClientId, EventHub, RelayEvent, WorkerEvent};
pub use listener::{ClientConnection, ClientListener};
pub use registry::ConnectionRegistry;
pub use stats::{RelayStats, StatsSnapshot};
#[cfg(unix)]
pub use worker::{WorkerChannel, WorkerState};
