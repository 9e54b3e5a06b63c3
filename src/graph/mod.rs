//! Deferred expression graphs.
//!
//! Every operation on a handle appends a node to a shared, immutable
//! expression DAG. Nothing is computed until a handle is evaluated or
//! exported through an [`ImageryService`](crate::execution::ImageryService).

pub mod expr;
pub mod handle;
pub mod serialization;

// Re-export commonly used types
pub use expr::Expr;
pub use handle::{
    Computed, Date, Element, Feature, FeatureCollection, Geometry, Handle, Image, IntoArg, Kernel,
    List, Number, Text,
};
pub use serialization::{SerializedExpression, SerializedValue};
