//! End-to-end jobs: preprocessing, sampling and exports driven by a [`JobConfig`].

use crate::core::config::{ExportTarget, JobConfig};
use crate::core::error::{RemoteResult, TerraResult};
use crate::execution::service::ImageryService;
use crate::export::batch::{
    export_image_list, export_image_list_to_cloud, export_time_series,
    export_time_series_to_cloud,
};
use crate::export::task::SubmittedTask;
use crate::graph::handle::{FeatureCollection, Handle, Image};
use crate::graph::serialization::SerializedExpression;
use crate::pipeline::preprocess::{insert_date, insert_xy, register};
use crate::pipeline::timeseries::{generate_time_series, TimeSeries};
use log::{debug, info};

/// The deferred graph of a job, before anything is sent to a service.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// Preprocessed images, in the configured order
    pub images: Vec<Image>,
    /// Preprocessed training data
    pub training_data: FeatureCollection,
    pub time_series: TimeSeries,
}

impl JobPlan {
    /// Build the graph for `job`.
    pub fn build(job: &JobConfig) -> TerraResult<Self> {
        let mut images: Vec<Image> = job.images.iter().map(|id| Image::load(id)).collect();
        if job.register {
            images = register(&images)?;
        }
        if job.tag_filenames {
            images = images.iter().map(insert_date).collect();
        }

        let mut training_data = FeatureCollection::load(&job.training_data);
        if job.insert_xy {
            training_data = training_data.map(|f| insert_xy(&f));
        }

        let time_series = generate_time_series(&training_data, &images);
        debug!(
            "Planned job over {} image(s) with {} export step(s)",
            images.len(),
            job.exports.len()
        );
        Ok(Self {
            images,
            training_data,
            time_series,
        })
    }

    /// Submit every configured export in order.
    ///
    /// Stops at the first failing step; tasks submitted before it keep
    /// running on the service.
    pub fn export(
        &self,
        service: &dyn ImageryService,
        targets: &[ExportTarget],
    ) -> TerraResult<Vec<SubmittedTask>> {
        let mut tasks = Vec::new();
        for target in targets {
            let submitted = match target {
                ExportTarget::TimeSeriesDrive { name, folder } => {
                    export_time_series(service, &self.time_series, name, folder)?
                }
                ExportTarget::TimeSeriesCloud { name, bucket } => {
                    export_time_series_to_cloud(service, &self.time_series, name, bucket)?
                }
                ExportTarget::ImagesDrive { name, folder } => {
                    export_image_list(service, &self.images, name, folder)?
                }
                ExportTarget::ImagesCloud { root, bucket } => {
                    export_image_list_to_cloud(service, &self.images, root, bucket)?
                }
            };
            tasks.extend(submitted);
        }
        Ok(tasks)
    }
}

/// Build the job and submit all of its exports.
pub fn run_job(service: &dyn ImageryService, job: &JobConfig) -> TerraResult<Vec<SubmittedTask>> {
    let plan = JobPlan::build(job)?;
    let tasks = plan.export(service, &job.exports)?;
    info!("Submitted {} export task(s)", tasks.len());
    Ok(tasks)
}

/// Build the job without a service and return the wire form of each
/// time-series entry.
pub fn plan_job(job: &JobConfig) -> TerraResult<Vec<SerializedExpression>> {
    let plan = JobPlan::build(job)?;
    let plans = plan
        .time_series
        .collections()
        .map(|fc| SerializedExpression::from_expr(fc.expr()))
        .collect::<RemoteResult<Vec<_>>>()?;
    Ok(plans)
}
