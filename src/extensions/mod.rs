//! Extension metadata and selection.
//!
//! # Architecture
//!
//! ```text
//! Cascade ──┐
//!           ├── Reconciler ──> [ConfiguredExtension] ──> activated_extensions(document)
//! Registry ─┘
//! ```
//!
//! The reconciler joins the merged settings with registry records. Activation
//! then picks the extensions that should run for the current document; the
//! client manager takes it from there.

pub mod activation;
mod error;
mod manifest;
pub mod reconcile;
pub mod registry;

pub use activation::{activated_extensions, should_activate, ActivationEvent, DocumentContext};
pub use error::{AggregateError, ExtensionResult, RegistryError};
pub use manifest::{ExtensionManifest, Platform, BUNDLE_CONTENT_TYPE};
pub use reconcile::{
    reconcile, with_configuration, ConfiguredExtension, ConfiguredSearchResults, Reconciler,
    RegistryExtensionRef, SubjectExtensionSettings,
};
pub use registry::{
    GraphQlRegistry, RegistryClient, RegistryExtension, SearchResults, StaticRegistry,
};

/// Unique identifier for an extension (`publisher/name`).
pub type ExtensionId = String;
