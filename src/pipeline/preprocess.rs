//! Image and training-data preprocessing.

use crate::core::error::PipelineError;
use crate::core::types::KernelUnits;
use crate::graph::handle::{Date, Element, Feature, Handle, Image, Kernel, Number, Text};
use log::debug;

/// Largest displacement allowed when aligning an image to the reference.
pub const REGISTRATION_MAX_OFFSET: f64 = 10.0;

/// Image property holding the acquisition time in epoch milliseconds.
pub const TIME_START_PROPERTY: &str = "system:time_start";

/// Image property the derived output name is stored in.
pub const FILENAME_PROPERTY: &str = "filename";

const FILENAME_PREFIX: &str = "S1_";
const FILENAME_SUFFIX: &str = "_IW";
const FILENAME_DATE_FORMAT: &str = "YYYY_MM_dd";

/// Square, non-normalized kernel of `window_size` pixels.
///
/// The size is not checked here; the service rejects non-positive sizes
/// when the kernel is used.
pub fn boxcar(window_size: i64) -> Kernel {
    Kernel::square(window_size as f64, KernelUnits::Pixels, false)
}

/// Align every image to the first one.
///
/// The first image is the reference and is returned as-is (same handle);
/// the rest are registered against it with [`REGISTRATION_MAX_OFFSET`].
/// Order and length are preserved.
pub fn register(images: &[Image]) -> Result<Vec<Image>, PipelineError> {
    let (reference, rest) = images
        .split_first()
        .ok_or(PipelineError::EmptyImageSequence)?;
    debug!(
        "Registering {} image(s) to reference {}",
        rest.len(),
        reference.id()
    );

    let mut registered = Vec::with_capacity(images.len());
    registered.push(reference.clone());
    registered.extend(
        rest.iter()
            .map(|img| img.register(reference, REGISTRATION_MAX_OFFSET)),
    );
    Ok(registered)
}

/// Attach `filename = "S1_<YYYY_MM_DD>_IW"` derived from the acquisition time.
///
/// Evaluating the result fails if the image has no `system:time_start`.
pub fn insert_date(img: &Image) -> Image {
    let date = Date::new(&img.get(TIME_START_PROPERTY)).format(FILENAME_DATE_FORMAT);
    let filename = Text::new(FILENAME_PREFIX).cat(&date).cat(FILENAME_SUFFIX);
    img.set(FILENAME_PROPERTY, &filename)
}

/// Copy a point's coordinates into numeric `x` and `y` properties.
///
/// Evaluating the result fails if the feature has no point geometry.
pub fn insert_xy(point: &Feature) -> Feature {
    let coords = point.geometry().coordinates();
    let x = Number::new(&coords.get(0));
    let y = Number::new(&coords.get(1));
    point.set("x", &x).set("y", &y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RemoteError;
    use crate::core::types::{FeatureData, GeometryData, ImageData, Value};
    use crate::execution::local::LocalService;
    use crate::graph::handle::Geometry;
    use proptest::prelude::*;

    // 2023-07-04T00:00:00Z
    const JULY_4: i64 = 1_688_428_800_000;

    fn images(n: usize) -> Vec<Image> {
        (0..n).map(|i| Image::load(&format!("S1/scene_{}", i))).collect()
    }

    #[test]
    fn test_boxcar() {
        let kernel = boxcar(5);
        assert_eq!(kernel.spec().radius, 5.0);
        assert_eq!(kernel.spec().units, KernelUnits::Pixels);
        assert!(!kernel.spec().normalize);
    }

    #[test]
    fn test_boxcar_non_positive_fails_remotely() {
        let service = LocalService::new();
        assert!(boxcar(0).evaluate(&service).is_err());
    }

    #[test]
    fn test_register_empty() {
        assert_eq!(register(&[]), Err(PipelineError::EmptyImageSequence));
    }

    #[test]
    fn test_register_single() {
        let input = images(1);
        let output = register(&input).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].id(), input[0].id());
    }

    #[test]
    fn test_register_aligns_to_first() {
        let input = images(3);
        let output = register(&input).unwrap();
        for (i, img) in output.iter().enumerate().skip(1) {
            let expr = img.expr();
            assert_eq!(expr.function_name(), Some("Image.register"));
            assert!(std::sync::Arc::ptr_eq(
                expr.argument("image").unwrap(),
                input[i].expr()
            ));
            assert!(std::sync::Arc::ptr_eq(
                expr.argument("referenceImage").unwrap(),
                input[0].expr()
            ));
        }
    }

    proptest! {
        #[test]
        fn prop_register_preserves_length_and_reference(n in 1usize..12) {
            let input = images(n);
            let output = register(&input).unwrap();
            prop_assert_eq!(output.len(), input.len());
            prop_assert_eq!(output[0].id(), input[0].id());
        }
    }

    #[test]
    fn test_insert_date_filename() {
        let service = LocalService::new();
        service.insert_asset(
            "S1/a",
            Value::Image(ImageData::new("S1/a").with_property(TIME_START_PROPERTY, JULY_4)),
        );
        let original = Image::load("S1/a");
        let tagged = insert_date(&original);

        assert_ne!(tagged.id(), original.id());
        assert_eq!(
            tagged.get(FILENAME_PROPERTY).evaluate(&service).unwrap(),
            Value::String("S1_2023_07_04_IW".to_string())
        );
        assert!(original
            .get(FILENAME_PROPERTY)
            .evaluate(&service)
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_insert_date_without_timestamp() {
        let service = LocalService::new();
        service.insert_asset("S1/a", Value::Image(ImageData::new("S1/a")));
        let tagged = insert_date(&Image::load("S1/a"));
        assert!(tagged.evaluate(&service).is_err());
    }

    #[test]
    fn test_insert_xy() {
        let service = LocalService::new();
        let point = Feature::new(&Geometry::point(12.5, -3.2));
        let value = insert_xy(&point).evaluate(&service).unwrap();
        let feature = value.as_feature().unwrap();
        assert_eq!(feature.properties["x"], Value::Float(12.5));
        assert_eq!(feature.properties["y"], Value::Float(-3.2));
    }

    #[test]
    fn test_insert_xy_requires_point() {
        let service = LocalService::new();
        let line = Feature::constant(Value::Feature(FeatureData::new(
            GeometryData::LineString(vec![[0.0, 0.0], [1.0, 1.0]]),
        )));
        // Coordinates of a line are pairs, not numbers.
        let err = insert_xy(&line).evaluate(&service).unwrap_err();
        assert!(matches!(err, RemoteError::TypeMismatch { .. }));

        let bare = Feature::constant(Value::Feature(FeatureData::default()));
        let err = insert_xy(&bare).evaluate(&service).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidGeometry(_)));
    }
}
