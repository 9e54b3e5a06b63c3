//! Submitting a time series or an image stack as one export job per element.
//!
//! Every function submits sequentially and returns the accepted jobs in
//! input order. The first failure stops the loop; jobs already started are
//! not cancelled.

use crate::core::error::{PipelineError, RemoteError, TerraResult};
use crate::core::types::{Value, ValueType};
use crate::execution::service::ImageryService;
use crate::export::task::{
    Destination, ExportRequest, ImageExportOptions, SubmittedTask, TableFormat,
};
use crate::graph::handle::{Element, Handle, Image};
use crate::pipeline::preprocess::FILENAME_PROPERTY;
use crate::pipeline::timeseries::TimeSeries;
use log::info;

/// Resolution, in meters, images are exported at.
pub const EXPORT_SCALE: f64 = 10.0;

/// Edge length, in pixels, of the shards and files of a cloud image export.
pub const CLOUD_TILE_SIZE: u32 = 64;

/// Pixel ceiling for cloud image exports.
pub const CLOUD_MAX_PIXELS: u64 = 10_000_000_000_000;

/// Subpath of the bucket time-series tables are written under.
pub const TRAINING_DATA_DIR: &str = "training_data";

fn submit(service: &dyn ImageryService, request: ExportRequest) -> TerraResult<SubmittedTask> {
    let task = request.start(service)?;
    info!("Exporting {} to {}...", task.description, task.destination);
    Ok(task)
}

/// Export each time-series entry as `{name}_{i}.csv` into a drive folder.
pub fn export_time_series(
    service: &dyn ImageryService,
    time_series: &TimeSeries,
    name: &str,
    folder: &str,
) -> TerraResult<Vec<SubmittedTask>> {
    time_series
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let request = ExportRequest::table(
                &entry.samples,
                format!("{}_{}", name, i),
                Destination::Drive {
                    folder: folder.to_string(),
                },
                TableFormat::Csv,
            );
            submit(service, request)
        })
        .collect()
}

/// Export each time-series entry as `training_data/{name}_{i}.csv` into a bucket.
pub fn export_time_series_to_cloud(
    service: &dyn ImageryService,
    time_series: &TimeSeries,
    name: &str,
    bucket: &str,
) -> TerraResult<Vec<SubmittedTask>> {
    time_series
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let description = format!("{}_{}", name, i);
            let prefix = format!("{}/{}", TRAINING_DATA_DIR, description);
            let request = ExportRequest::table(
                &entry.samples,
                description,
                Destination::CloudStorage {
                    bucket: bucket.to_string(),
                },
                TableFormat::Csv,
            )
            .with_file_name_prefix(prefix);
            submit(service, request)
        })
        .collect()
}

/// Export each image as `{name}_{i}` into a drive folder, at 10 m over the
/// image's bounding box.
pub fn export_image_list(
    service: &dyn ImageryService,
    images: &[Image],
    name: &str,
    folder: &str,
) -> TerraResult<Vec<SubmittedTask>> {
    images
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let options = ImageExportOptions::new(EXPORT_SCALE).with_region(img.geometry().bounds());
            let request = ExportRequest::image(
                img,
                format!("{}_{}", name, i),
                Destination::Drive {
                    folder: folder.to_string(),
                },
                options,
            );
            submit(service, request)
        })
        .collect()
}

/// Export each image as 64×64 GeoTIFF tiles under `{root}/img/{f}/{f}-` in a
/// bucket, where `f` is the image's `filename` property.
///
/// The filename is fetched from the service before the image's job is
/// built, so an image that was never passed through `insert_date` fails
/// with [`PipelineError::MissingFilename`] and nothing is submitted for it.
/// A filename that is not a string is a [`RemoteError::TypeMismatch`].
pub fn export_image_list_to_cloud(
    service: &dyn ImageryService,
    images: &[Image],
    root: &str,
    bucket: &str,
) -> TerraResult<Vec<SubmittedTask>> {
    let mut tasks = Vec::with_capacity(images.len());
    for (index, img) in images.iter().enumerate() {
        let filename = match img.get(FILENAME_PROPERTY).evaluate(service)? {
            Value::String(s) => s,
            Value::Null => {
                return Err(PipelineError::MissingFilename {
                    index,
                    image: img.id(),
                }
                .into())
            }
            other => {
                return Err(RemoteError::TypeMismatch {
                    function: "Element.get".to_string(),
                    expected: ValueType::String,
                    got: other.value_type(),
                }
                .into())
            }
        };

        let options = ImageExportOptions::new(EXPORT_SCALE)
            .with_region(img.geometry().bounds())
            .with_tiles(CLOUD_TILE_SIZE)
            .with_skip_empty_tiles(true)
            .with_max_pixels(CLOUD_MAX_PIXELS);
        let prefix = format!("{}/img/{}/{}-", root, filename, filename);
        let request = ExportRequest::image(
            img,
            filename,
            Destination::CloudStorage {
                bucket: bucket.to_string(),
            },
            options,
        )
        .with_file_name_prefix(prefix);
        tasks.push(submit(service, request)?);
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TerraError;
    use crate::core::types::{FeatureData, GeometryData, ImageData};
    use crate::execution::local::LocalService;
    use crate::export::task::ExportKind;
    use crate::graph::handle::FeatureCollection;
    use crate::pipeline::preprocess::{insert_date, TIME_START_PROPERTY};
    use crate::pipeline::timeseries::generate_time_series;

    // 2023-07-04T00:00:00Z
    const JULY_4: i64 = 1_688_428_800_000;
    const DAY_MS: i64 = 86_400_000;

    fn service_with_images(n: usize) -> (LocalService, Vec<Image>) {
        seed(LocalService::new(), n)
    }

    fn seed(service: LocalService, n: usize) -> (LocalService, Vec<Image>) {
        service.insert_asset(
            "training",
            Value::FeatureCollection(vec![FeatureData::new(GeometryData::Point([0.5, 0.5]))]),
        );
        let images = (0..n)
            .map(|i| {
                let id = format!("S1/scene_{}", i);
                service.insert_asset(
                    id.clone(),
                    Value::Image(
                        ImageData::new(id.clone())
                            .with_band("VV", -11.0)
                            .with_footprint(GeometryData::Polygon(vec![
                                [0.0, 0.0],
                                [1.0, 0.0],
                                [1.0, 1.0],
                                [0.0, 1.0],
                            ]))
                            .with_property(TIME_START_PROPERTY, JULY_4 + i as i64 * DAY_MS),
                    ),
                );
                Image::load(&id)
            })
            .collect();
        (service, images)
    }

    #[test]
    fn test_export_image_list_names_by_index() {
        let (service, images) = service_with_images(3);
        let tasks = export_image_list(&service, &images, "scene", "exports").unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(service.export_count(), 3);
        for (i, (task, img)) in tasks.iter().zip(&images).enumerate() {
            assert_eq!(task.description, format!("scene_{}", i));
            assert_eq!(task.correlation_id, img.id());
            assert_eq!(
                task.destination,
                Destination::Drive {
                    folder: "exports".to_string()
                }
            );
        }
        match &service.exports()[0].request.kind {
            ExportKind::Image(options) => {
                assert_eq!(options.scale, 10.0);
                assert!(options.region.is_some());
            }
            other => panic!("expected image export, got {:?}", other),
        }
    }

    #[test]
    fn test_export_image_list_empty() {
        let (service, _) = service_with_images(0);
        let tasks = export_image_list(&service, &[], "scene", "exports").unwrap();
        assert!(tasks.is_empty());
        assert_eq!(service.export_count(), 0);
    }

    #[test]
    fn test_export_time_series_to_drive() {
        let (service, images) = service_with_images(2);
        let ts = generate_time_series(&FeatureCollection::load("training"), &images);
        let tasks = export_time_series(&service, &ts, "ts", "exports").unwrap();

        let names: Vec<_> = tasks.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, vec!["ts_0", "ts_1"]);
        for (task, entry) in tasks.iter().zip(&ts) {
            assert_eq!(task.correlation_id, entry.samples.id());
        }
        let records = service.exports();
        assert!(records[0].request.file_name_prefix.is_none());
        assert_eq!(records[0].materialized.as_features().unwrap().len(), 1);
    }

    #[test]
    fn test_export_time_series_to_cloud_prefix() {
        let (service, images) = service_with_images(2);
        let ts = generate_time_series(&FeatureCollection::load("training"), &images);
        let tasks = export_time_series_to_cloud(&service, &ts, "ts", "bucket").unwrap();

        assert_eq!(tasks.len(), 2);
        let prefixes: Vec<_> = service
            .exports()
            .into_iter()
            .map(|r| r.request.file_name_prefix.unwrap_or_default())
            .collect();
        assert_eq!(prefixes, vec!["training_data/ts_0", "training_data/ts_1"]);
    }

    #[test]
    fn test_cloud_export_uses_filename() {
        let (service, images) = service_with_images(2);
        let tagged: Vec<_> = images.iter().map(insert_date).collect();
        let tasks = export_image_list_to_cloud(&service, &tagged, "run1", "bucket").unwrap();

        assert_eq!(tasks[0].description, "S1_2023_07_04_IW");
        assert_eq!(tasks[1].description, "S1_2023_07_05_IW");
        let record = &service.exports()[0];
        assert_eq!(
            record.request.file_name_prefix.as_deref(),
            Some("run1/img/S1_2023_07_04_IW/S1_2023_07_04_IW-")
        );
        match &record.request.kind {
            ExportKind::Image(options) => {
                assert_eq!(options.shard_size, Some(64));
                assert_eq!(options.file_dimensions, Some((64, 64)));
                assert!(options.skip_empty_tiles);
                assert_eq!(options.max_pixels, Some(CLOUD_MAX_PIXELS));
            }
            other => panic!("expected image export, got {:?}", other),
        }
    }

    #[test]
    fn test_cloud_export_without_filename_submits_nothing() {
        let (service, images) = service_with_images(2);
        let err = export_image_list_to_cloud(&service, &images, "run1", "bucket").unwrap_err();

        assert!(matches!(
            err,
            TerraError::Pipeline(PipelineError::MissingFilename { index: 0, .. })
        ));
        assert_eq!(service.export_count(), 0);
    }

    #[test]
    fn test_cloud_export_rejects_non_string_filename() {
        let (service, images) = service_with_images(2);
        let tagged: Vec<Image> = images
            .iter()
            .map(|img| img.set(FILENAME_PROPERTY, 5i64))
            .collect();

        let err = export_image_list_to_cloud(&service, &tagged, "run1", "bucket").unwrap_err();
        assert!(matches!(
            err,
            TerraError::Remote(RemoteError::TypeMismatch {
                expected: ValueType::String,
                got: ValueType::Integer,
                ..
            })
        ));
        assert_eq!(service.export_count(), 0);
    }

    #[test]
    fn test_failure_stops_remaining_submissions() {
        let (service, images) = seed(LocalService::new().with_export_quota(2), 4);

        let err = export_image_list(&service, &images, "scene", "exports").unwrap_err();
        assert!(matches!(
            err,
            TerraError::Remote(RemoteError::QuotaExceeded(_))
        ));
        assert_eq!(service.export_count(), 2);
    }
}
