//! Typed handles to server-side objects.
//!
//! A handle is an id plus a deferred [`Expr`]. Building on a handle never
//! talks to the service; [`Handle::evaluate`] is the only point where a
//! computation is sent off and a [`Value`] comes back.

use crate::core::error::{HandleId, RemoteResult};
use crate::core::types::{KernelShape, KernelSpec, KernelUnits, Value};
use crate::execution::service::ImageryService;
use crate::graph::expr::Expr;
use std::sync::Arc;

/// Common behavior of all handles.
pub trait Handle: Clone {
    /// Identity of this handle. Clones share it.
    fn id(&self) -> HandleId;

    /// The deferred computation this handle stands for.
    fn expr(&self) -> &Arc<Expr>;

    /// Wrap an expression in a fresh handle.
    fn from_expr(expr: Arc<Expr>) -> Self;

    /// Wrap a literal value.
    fn constant(value: Value) -> Self {
        Self::from_expr(Arc::new(Expr::Constant(value)))
    }

    /// Ask the service to compute this handle.
    fn evaluate(&self, service: &dyn ImageryService) -> RemoteResult<Value> {
        service.compute(self.expr())
    }
}

/// Anything that can be passed as a function argument.
pub trait IntoArg {
    fn into_arg(self) -> Arc<Expr>;
}

impl IntoArg for Arc<Expr> {
    fn into_arg(self) -> Arc<Expr> {
        self
    }
}

impl IntoArg for Value {
    fn into_arg(self) -> Arc<Expr> {
        Arc::new(Expr::Constant(self))
    }
}

impl IntoArg for i64 {
    fn into_arg(self) -> Arc<Expr> {
        Expr::constant(self)
    }
}

impl IntoArg for f64 {
    fn into_arg(self) -> Arc<Expr> {
        Expr::constant(self)
    }
}

impl IntoArg for bool {
    fn into_arg(self) -> Arc<Expr> {
        Expr::constant(self)
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Arc<Expr> {
        Expr::constant(self)
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Arc<Expr> {
        Expr::constant(self)
    }
}

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            id: HandleId,
            expr: Arc<Expr>,
        }

        impl Handle for $name {
            fn id(&self) -> HandleId {
                self.id
            }

            fn expr(&self) -> &Arc<Expr> {
                &self.expr
            }

            fn from_expr(expr: Arc<Expr>) -> Self {
                Self {
                    id: HandleId::new(),
                    expr,
                }
            }
        }

        /// Handles are equal when they are the same handle (or clones of it).
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl IntoArg for &$name {
            fn into_arg(self) -> Arc<Expr> {
                self.expr.clone()
            }
        }

        impl IntoArg for $name {
            fn into_arg(self) -> Arc<Expr> {
                self.expr
            }
        }
    };
}

handle_type!(
    /// Remote raster.
    Image
);
handle_type!(
    /// Remote vector feature.
    Feature
);
handle_type!(
    /// Remote collection of features.
    FeatureCollection
);
handle_type!(
    /// Remote geometry.
    Geometry
);
handle_type!(
    /// Remote calendar instant.
    Date
);
handle_type!(
    /// Remote string.
    Text
);
handle_type!(
    /// Remote number.
    Number
);
handle_type!(
    /// Remote list.
    List
);
handle_type!(
    /// Remote value of unknown type, e.g. the result of a property lookup.
    Computed
);

/// Handles that carry a property map.
pub trait Element: Handle {
    /// Look up a property. Evaluates to Null when the property is absent.
    fn get(&self, property: &str) -> Computed {
        Computed::from_expr(
            Expr::call("Element.get")
                .arg("object", self.expr().clone())
                .constant("property", property)
                .build(),
        )
    }

    /// Derive a new handle with `key` set to `value`.
    fn set<V: IntoArg>(&self, key: &str, value: V) -> Self {
        Self::from_expr(
            Expr::call("Element.set")
                .arg("object", self.expr().clone())
                .constant("key", key)
                .arg("value", value.into_arg())
                .build(),
        )
    }
}

impl Element for Image {}
impl Element for Feature {}

impl Image {
    /// Reference a stored image asset.
    pub fn load(asset_id: &str) -> Self {
        Self::from_expr(Expr::call("Image.load").constant("id", asset_id).build())
    }

    /// Acquisition date, taken from `system:time_start`.
    pub fn date(&self) -> Date {
        Date::from_expr(
            Expr::call("Image.date")
                .arg("image", self.expr.clone())
                .build(),
        )
    }

    /// Footprint of the image.
    pub fn geometry(&self) -> Geometry {
        Geometry::from_expr(
            Expr::call("Image.geometry")
                .arg("image", self.expr.clone())
                .build(),
        )
    }

    /// Align this image to `reference`, moving pixels by at most `max_offset`.
    pub fn register(&self, reference: &Image, max_offset: f64) -> Image {
        Image::from_expr(
            Expr::call("Image.register")
                .arg("image", self.expr.clone())
                .arg("referenceImage", reference.expr.clone())
                .constant("maxOffset", max_offset)
                .build(),
        )
    }

    /// Sample pixel values at every feature of `collection`.
    pub fn sample_regions(
        &self,
        collection: &FeatureCollection,
        scale: f64,
        tile_scale: f64,
    ) -> FeatureCollection {
        FeatureCollection::from_expr(
            Expr::call("Image.sampleRegions")
                .arg("image", self.expr.clone())
                .arg("collection", collection.expr.clone())
                .constant("scale", scale)
                .constant("tileScale", tile_scale)
                .build(),
        )
    }
}

impl Feature {
    /// Create a feature from a geometry.
    pub fn new(geometry: &Geometry) -> Self {
        Self::from_expr(
            Expr::call("Feature")
                .arg("geometry", geometry.expr.clone())
                .build(),
        )
    }

    /// Geometry of the feature.
    pub fn geometry(&self) -> Geometry {
        Geometry::from_expr(
            Expr::call("Feature.geometry")
                .arg("feature", self.expr.clone())
                .build(),
        )
    }
}

impl FeatureCollection {
    /// Reference a stored table asset.
    pub fn load(table_id: &str) -> Self {
        Self::from_expr(
            Expr::call("FeatureCollection.load")
                .constant("tableId", table_id)
                .build(),
        )
    }

    /// Build a collection from individual features.
    pub fn from_features(features: &[Feature]) -> Self {
        // `List` takes its items positionally, one argument per index.
        let list = features
            .iter()
            .enumerate()
            .fold(Expr::call("List"), |builder, (i, feature)| {
                builder.arg(i.to_string(), feature.expr.clone())
            })
            .build();
        Self::from_expr(Expr::call("Collection").arg("features", list).build())
    }

    /// Apply `algorithm` to every feature on the server.
    pub fn map<F>(&self, algorithm: F) -> FeatureCollection
    where
        F: FnOnce(Feature) -> Feature,
    {
        let variable = format!("_MAPPING_VAR_{}", HandleId::new().0.simple());
        let parameter = Feature::from_expr(Arc::new(Expr::Argument(variable.clone())));
        let body = algorithm(parameter).expr;
        let function = Arc::new(Expr::Function {
            parameters: vec![variable],
            body,
        });
        FeatureCollection::from_expr(
            Expr::call("Collection.map")
                .arg("collection", self.expr.clone())
                .arg("baseAlgorithm", function)
                .build(),
        )
    }
}

impl Geometry {
    /// A point geometry.
    pub fn point(x: f64, y: f64) -> Self {
        Self::from_expr(
            Expr::call("GeometryConstructors.Point")
                .arg(
                    "coordinates",
                    Value::List(vec![Value::Float(x), Value::Float(y)]).into_arg(),
                )
                .build(),
        )
    }

    /// Coordinates of the geometry.
    pub fn coordinates(&self) -> List {
        List::from_expr(
            Expr::call("Geometry.coordinates")
                .arg("geometry", self.expr.clone())
                .build(),
        )
    }

    /// Axis-aligned bounding rectangle.
    pub fn bounds(&self) -> Geometry {
        Geometry::from_expr(
            Expr::call("Geometry.bounds")
                .arg("geometry", self.expr.clone())
                .build(),
        )
    }
}

impl List {
    /// Element at `index` (negative counts from the end).
    pub fn get(&self, index: i64) -> Computed {
        Computed::from_expr(
            Expr::call("List.get")
                .arg("list", self.expr.clone())
                .constant("index", index)
                .build(),
        )
    }
}

impl Date {
    /// Interpret `value` (epoch milliseconds or ISO-8601 string) as a date.
    pub fn new<V: IntoArg>(value: V) -> Self {
        Self::from_expr(Expr::call("Date").arg("value", value.into_arg()).build())
    }

    /// Format with a Joda-style pattern such as `YYYY-MM-dd`, in UTC.
    pub fn format(&self, pattern: &str) -> Text {
        Text::from_expr(
            Expr::call("Date.format")
                .arg("date", self.expr.clone())
                .constant("format", pattern)
                .build(),
        )
    }
}

impl Text {
    /// Coerce `value` to a string.
    pub fn new<V: IntoArg>(value: V) -> Self {
        Self::from_expr(Expr::call("String").arg("input", value.into_arg()).build())
    }

    /// Concatenate `other` to the end of this string.
    pub fn cat<V: IntoArg>(&self, other: V) -> Text {
        Text::from_expr(
            Expr::call("String.cat")
                .arg("string1", self.expr.clone())
                .arg("string2", other.into_arg())
                .build(),
        )
    }
}

impl Number {
    /// Coerce `value` to a number.
    pub fn new<V: IntoArg>(value: V) -> Self {
        Self::from_expr(Expr::call("Number").arg("input", value.into_arg()).build())
    }
}

/// Neighborhood kernel: an immutable descriptor plus the expression that
/// builds it on the server.
#[derive(Debug, Clone)]
pub struct Kernel {
    id: HandleId,
    spec: KernelSpec,
    expr: Arc<Expr>,
}

impl Kernel {
    /// Square kernel of the given radius.
    pub fn square(radius: f64, units: KernelUnits, normalize: bool) -> Self {
        let spec = KernelSpec {
            shape: KernelShape::Square,
            radius,
            units,
            normalize,
            magnitude: 1.0,
        };
        let expr = Expr::call("Kernel.square")
            .constant("radius", spec.radius)
            .constant("units", spec.units.as_str())
            .constant("normalize", spec.normalize)
            .constant("magnitude", spec.magnitude)
            .build();
        Self {
            id: HandleId::new(),
            spec,
            expr,
        }
    }

    /// The kernel descriptor.
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }
}

impl Handle for Kernel {
    fn id(&self) -> HandleId {
        self.id
    }

    fn expr(&self) -> &Arc<Expr> {
        &self.expr
    }

    /// Only `Kernel.square` invocations carry a recoverable descriptor; any
    /// other expression gets a unit square placeholder.
    fn from_expr(expr: Arc<Expr>) -> Self {
        let spec = kernel_spec_of(&expr).unwrap_or(KernelSpec {
            shape: KernelShape::Square,
            radius: 1.0,
            units: KernelUnits::Pixels,
            normalize: true,
            magnitude: 1.0,
        });
        Self {
            id: HandleId::new(),
            spec,
            expr,
        }
    }
}

fn kernel_spec_of(expr: &Expr) -> Option<KernelSpec> {
    if expr.function_name()? != "Kernel.square" {
        return None;
    }
    let constant = |name: &str| expr.argument(name).and_then(|a| a.as_constant());
    Some(KernelSpec {
        shape: KernelShape::Square,
        radius: constant("radius")?.as_float()?,
        units: KernelUnits::parse(constant("units")?.as_str()?)?,
        normalize: constant("normalize")?.as_bool()?,
        magnitude: constant("magnitude")?.as_float()?,
    })
}
