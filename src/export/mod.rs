//! Export jobs.

pub mod batch;
pub mod task;

pub use batch::{
    export_image_list, export_image_list_to_cloud, export_time_series,
    export_time_series_to_cloud,
};
pub use task::{Destination, ExportRequest, ImageExportOptions, SubmittedTask, TaskId};
