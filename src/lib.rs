//! # Terrasample - sampling training data across satellite image stacks
//!
//! Terrasample builds deferred expression graphs for a remote geospatial
//! imagery service: aligning a stack of radar images, tagging images and
//! training points with derived properties, sampling every image at the
//! training locations, and submitting the results as export jobs.
//!
//! ## Features
//!
//! - **Deferred handles**: images, features and collections are references
//!   into a server-side graph; only [`Handle::evaluate`](graph::Handle::evaluate)
//!   and exports talk to the service
//! - **Correlated exports**: every submitted job carries the id of the
//!   handle it was built from
//! - **Local evaluation**: [`LocalService`](execution::LocalService) runs the
//!   same graphs in memory for tests and dry runs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use terrasample::prelude::*;
//!
//! let service = HttpService::new(&config);
//!
//! let images = register(&[Image::load("S1/a"), Image::load("S1/b")])?;
//! let images: Vec<_> = images.iter().map(insert_date).collect();
//! let training = FeatureCollection::load("users/me/points").map(|f| insert_xy(&f));
//!
//! let ts = generate_time_series(&training, &images);
//! export_time_series(&service, &ts, "ts", "exports")?;
//! export_image_list_to_cloud(&service, &images, "run1", "my-bucket")?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Values, errors and configuration
//! - [`graph`]: Expression graph, typed handles and wire serialization
//! - [`execution`]: The service boundary, the HTTP client and the local evaluator
//! - [`pipeline`]: Preprocessing, time-series generation and job orchestration
//! - [`export`]: Export job descriptions and batch submission

#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod export;
pub mod graph;
pub mod pipeline;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use terrasample::prelude::*;
/// ```
pub mod prelude {
    // Values and errors
    pub use crate::core::error::{
        ConfigError, HandleId, PipelineError, RemoteError, TerraError, TerraResult,
    };
    pub use crate::core::types::{
        FeatureData, GeometryData, ImageData, KernelSpec, KernelUnits, Value, ValueType,
    };

    // Configuration
    pub use crate::core::config::{ExportTarget, JobConfig, ServiceConfig};

    // Graph
    pub use crate::graph::expr::Expr;
    pub use crate::graph::handle::{
        Computed, Date, Element, Feature, FeatureCollection, Geometry, Handle, Image, Kernel,
        List, Number, Text,
    };
    pub use crate::graph::serialization::SerializedExpression;

    // Execution
    pub use crate::execution::{FunctionRegistry, HttpService, ImageryService, LocalService};

    // Pipeline
    pub use crate::pipeline::{
        boxcar, generate_time_series, insert_date, insert_xy, plan_job, register, run_job,
        JobPlan, TimeSeries,
    };

    // Export
    pub use crate::export::{
        export_image_list, export_image_list_to_cloud, export_time_series,
        export_time_series_to_cloud, Destination, ExportRequest, SubmittedTask, TaskId,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
