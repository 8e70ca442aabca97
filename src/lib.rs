//! Nova extension controller.
//!
//! Decides which extensions are enabled from layered settings, which of them
//! should run for the current document, and keeps a protocol client connected
//! to each running extension.
//!
//! # Architecture
//!
//! The library is organized into these main modules:
//!
//! - [`settings`] - Settings cascade resolution and settings edits
//! - [`extensions`] - Registry client, reconciliation and activation
//! - [`client`] - Extension clients, transports and the retry policy
//! - [`handshake`] - Client/page rendezvous over a two-party channel
//! - [`controller`] - The context object tying them together
//! - [`config`] - Configuration loading and management
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nova_controller::{Config, Controller};
//!
//! let config = Config::load();
//! let controller = Arc::new(Controller::new(&config, registry, editor, connector));
//! controller.update_cascade(raw_cascade);
//! controller.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

// Public modules
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod extensions;
pub mod handshake;
pub mod logging;
pub mod settings;

// Internal modules
mod error;

// Re-export commonly used types for convenience
pub use config::Config;
pub use controller::{ConfiguredView, Controller};
pub use error::{ControllerError, ControllerResult};
