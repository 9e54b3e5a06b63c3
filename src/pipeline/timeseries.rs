//! Sampling training data across a stack of images.

use crate::core::error::{HandleId, RemoteResult};
use crate::core::types::Value;
use crate::execution::service::ImageryService;
use crate::graph::handle::{Element, FeatureCollection, Handle, Image};
use log::debug;

/// Resolution, in meters, at which images are sampled.
pub const SAMPLE_SCALE: f64 = 10.0;

/// Tile scale used for sampling; higher values trade speed for memory.
pub const SAMPLE_TILE_SCALE: f64 = 16.0;

/// Format of the `date` property attached to every sample.
pub const SAMPLE_DATE_FORMAT: &str = "YYYY-MM-dd";

/// Property the acquisition date is stored in on each sample.
pub const DATE_PROPERTY: &str = "date";

/// Samples taken from one image.
#[derive(Debug, Clone)]
pub struct TimeSeriesEntry {
    /// Handle of the image the samples came from
    pub source: HandleId,
    pub samples: FeatureCollection,
}

/// One sampled collection per image, in image order.
///
/// Entries are never merged; callers combine them if they need to.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    entries: Vec<TimeSeriesEntry>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TimeSeriesEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeSeriesEntry> {
        self.entries.iter()
    }

    /// The sampled collections, in order.
    pub fn collections(&self) -> impl Iterator<Item = &FeatureCollection> {
        self.entries.iter().map(|e| &e.samples)
    }

    /// Evaluate every entry in order.
    ///
    /// The first failing entry aborts the whole series; nothing after it is
    /// requested.
    pub fn materialize(&self, service: &dyn ImageryService) -> RemoteResult<Vec<Value>> {
        self.entries
            .iter()
            .map(|entry| entry.samples.evaluate(service))
            .collect()
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = &'a TimeSeriesEntry;
    type IntoIter = std::slice::Iter<'a, TimeSeriesEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Sample `training_data` against every image and tag each sample with the
/// image's acquisition date (`YYYY-MM-DD`).
pub fn generate_time_series(training_data: &FeatureCollection, images: &[Image]) -> TimeSeries {
    let entries = images
        .iter()
        .map(|img| {
            let date = img.date().format(SAMPLE_DATE_FORMAT);
            let samples = img
                .sample_regions(training_data, SAMPLE_SCALE, SAMPLE_TILE_SCALE)
                .map(|f| f.set(DATE_PROPERTY, &date));
            TimeSeriesEntry {
                source: img.id(),
                samples,
            }
        })
        .collect::<Vec<_>>();
    debug!("Built time series over {} image(s)", entries.len());
    TimeSeries { entries }
}
