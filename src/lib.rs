//! Harvest Export Library
//!
//! This library reads Harvest credentials from `~/.harvest`, pulls every
//! supported collection from the Harvest API and writes each one to a JSON
//! file (optionally followed by a CSV copy).

pub mod helpers;
pub mod logging;
pub mod models;
pub mod service;

pub use service::{ExportConfig, ExportError, ExportOutcome, ExportReport, ExportService};

// Re-export key types for convenience
pub use helpers::credentials::{load_credentials, load_credentials_from, ConfigError};
pub use helpers::harvest::{HarvestClient, HarvestError};
pub use models::harvest::{Credentials, DateWindow, EntityType};
