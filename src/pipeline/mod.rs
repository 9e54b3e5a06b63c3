//! Preprocessing, sampling and job orchestration.

pub mod job;
pub mod preprocess;
pub mod timeseries;

pub use job::{plan_job, run_job, JobPlan};
pub use preprocess::{boxcar, insert_date, insert_xy, register};
pub use timeseries::{generate_time_series, TimeSeries, TimeSeriesEntry};
