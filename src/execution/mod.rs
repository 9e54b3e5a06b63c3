//! Evaluating expression graphs and submitting exports.
//!
//! [`HttpService`] talks to the remote service; [`LocalService`] evaluates
//! the same graphs in memory against a table of assets.

pub mod builtins;
pub mod http;
pub mod local;
pub mod registry;
pub mod service;

pub use http::HttpService;
pub use local::{ExportRecord, LocalService};
pub use registry::FunctionRegistry;
pub use service::ImageryService;
