//! Plugin Catalog & Registry
//!
//! - PluginManifest: static identity and contract of a plugin
//! - Plugin: the async behaviour trait
//! - PluginRegistry: name-keyed dispatch with strict/lenient registration
//! - catalog: load-order normalization, reconciliation and health

mod catalog;
mod manifest;
mod registry;

pub use catalog::{
    catalog_health, normalize_catalog, reconcile_catalog, CatalogEntry, CatalogHealth,
    LOAD_ORDER_STEP_MS,
};
pub use manifest::{ManifestError, PluginManifest, MAX_PRIORITY};
pub use registry::{
    FnPlugin, Plugin, PluginContext, PluginError, PluginInput, PluginRegistry, RegistryError,
};
