//! Core types shared by the rest of the crate.
//!
//! This module contains:
//! - Materialized values returned by the service
//! - Error types and handle identifiers
//! - Service and job configuration

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{ExportTarget, JobConfig, ServiceConfig};
pub use error::{ConfigError, HandleId, PipelineError, RemoteError, TerraError, TerraResult};
pub use types::{FeatureData, GeometryData, ImageData, KernelSpec, KernelUnits, Value, ValueType};
