//! Shared foundation for the Carte services
//!
//! Error taxonomy, configuration loading, SQLite bootstrap, and the
//! canonical data model used by both the ingest pipeline and the
//! quarantine review service.

pub mod config;
pub mod db;
pub mod error;
pub mod model;

pub use config::CarteConfig;
pub use error::{Error, Result};
