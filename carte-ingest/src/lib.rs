//! carte-ingest library interface
//!
//! Exposes the pipeline stages for integration testing.

pub mod matcher;
pub mod normalizer;
pub mod propagation;
pub mod quality;
pub mod run;
pub mod scheduler;
pub mod sources;
pub mod store;
