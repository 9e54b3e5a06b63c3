//! Materialized values returned by the imagery service.
//!
//! Handles in [`crate::graph`] describe computations; a [`Value`] is what one
//! of those computations turns into once the service evaluates it. The set of
//! kinds is closed, so the value model is a single serde-tagged enum.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Property map of an element, in insertion order.
pub type Properties = IndexMap<String, Value>;

/// A materialized result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    /// Absent value (e.g. a property that was never set)
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Instant in milliseconds since the Unix epoch, UTC
    Date(i64),
    /// Ordered list of values
    List(Vec<Value>),
    /// Key-value map
    Dictionary(IndexMap<String, Value>),
    /// Vector geometry
    Geometry(GeometryData),
    /// Geometry with properties
    Feature(FeatureData),
    /// Ordered collection of features
    FeatureCollection(Vec<FeatureData>),
    /// Raster description (never pixel data)
    Image(ImageData),
    /// Neighborhood kernel descriptor
    Kernel(KernelSpec),
}

/// Kind of a [`Value`], used in type errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Boolean,
    Integer,
    Float,
    String,
    Date,
    List,
    Dictionary,
    Geometry,
    Feature,
    FeatureCollection,
    Image,
    Kernel,
}

/// Vector geometry in longitude/latitude (or projected x/y) coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "coordinates")]
pub enum GeometryData {
    /// Single coordinate pair
    Point([f64; 2]),
    /// Open polyline
    LineString(Vec<[f64; 2]>),
    /// Closed ring (first vertex is not repeated)
    Polygon(Vec<[f64; 2]>),
}

/// A geometry with a property map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureData {
    /// Feature geometry, if any
    pub geometry: Option<GeometryData>,
    /// Feature properties
    pub properties: Properties,
}

/// Description of a remote raster.
///
/// Pixel data stays with the service. Stand-in images served by
/// [`crate::execution::local::LocalService`] carry one constant value per band.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    /// Asset id the image was loaded from
    pub id: Option<String>,
    /// Band names with their (constant) stand-in values
    pub bands: IndexMap<String, f64>,
    /// Footprint of the raster
    pub footprint: Option<GeometryData>,
    /// Image properties (e.g. `system:time_start`)
    pub properties: Properties,
}

/// Shape of a neighborhood kernel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Square,
}

/// Units a kernel radius is expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KernelUnits {
    Pixels,
    Meters,
}

impl KernelUnits {
    /// Name used by the service API.
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelUnits::Pixels => "pixels",
            KernelUnits::Meters => "meters",
        }
    }

    /// Parse a service API unit name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pixels" => Some(KernelUnits::Pixels),
            "meters" => Some(KernelUnits::Meters),
            _ => None,
        }
    }
}

/// Immutable neighborhood kernel descriptor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KernelSpec {
    pub shape: KernelShape,
    pub radius: f64,
    pub units: KernelUnits,
    pub normalize: bool,
    pub magnitude: f64,
}

// ============================================================================
// Value Implementation
// ============================================================================

impl Value {
    /// Get the kind of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Date(_) => ValueType::Date,
            Value::List(_) => ValueType::List,
            Value::Dictionary(_) => ValueType::Dictionary,
            Value::Geometry(_) => ValueType::Geometry,
            Value::Feature(_) => ValueType::Feature,
            Value::FeatureCollection(_) => ValueType::FeatureCollection,
            Value::Image(_) => ValueType::Image,
            Value::Kernel(_) => ValueType::Kernel,
        }
    }

    /// Check if this value is Null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a raw JSON result returned by the service.
    ///
    /// Objects become dictionaries; GeoJSON and image descriptions are not
    /// decoded further.
    pub fn from_wire(json: serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Float),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from_wire).collect()),
            Json::Object(map) => Value::Dictionary(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_wire(v)))
                    .collect(),
            ),
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Try to get this value as an integer.
    /// Floats with no fractional part are accepted.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get this value as a float.
    /// Integers are automatically converted to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Try to get this value as epoch milliseconds.
    pub fn as_date(&self) -> Option<i64> {
        if let Value::Date(ms) = self {
            Some(*ms)
        } else {
            None
        }
    }

    /// Try to get this value as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        if let Value::List(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Try to get this value as a geometry.
    pub fn as_geometry(&self) -> Option<&GeometryData> {
        if let Value::Geometry(g) = self {
            Some(g)
        } else {
            None
        }
    }

    /// Try to get this value as a feature.
    pub fn as_feature(&self) -> Option<&FeatureData> {
        if let Value::Feature(f) = self {
            Some(f)
        } else {
            None
        }
    }

    /// Try to get this value as a feature collection.
    pub fn as_features(&self) -> Option<&[FeatureData]> {
        if let Value::FeatureCollection(features) = self {
            Some(features)
        } else {
            None
        }
    }

    /// Try to get this value as an image description.
    pub fn as_image(&self) -> Option<&ImageData> {
        if let Value::Image(img) = self {
            Some(img)
        } else {
            None
        }
    }

    /// Property map of an element value (image or feature).
    pub fn properties(&self) -> Option<&Properties> {
        match self {
            Value::Image(img) => Some(&img.properties),
            Value::Feature(f) => Some(&f.properties),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Date(ms) => write!(f, "Date({})", ms),
            Value::List(items) => write!(f, "List[{}]", items.len()),
            Value::Dictionary(map) => write!(f, "Dictionary{{{} entries}}", map.len()),
            Value::Geometry(g) => write!(f, "Geometry({})", g.kind()),
            Value::Feature(_) => write!(f, "Feature"),
            Value::FeatureCollection(features) => {
                write!(f, "FeatureCollection[{}]", features.len())
            }
            Value::Image(img) => match &img.id {
                Some(id) => write!(f, "Image({})", id),
                None => write!(f, "Image({} bands)", img.bands.len()),
            },
            Value::Kernel(k) => write!(f, "Kernel(square, {} {})", k.radius, k.units.as_str()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

// ============================================================================
// Geometry Implementation
// ============================================================================

impl GeometryData {
    /// Geometry type name as used by the service.
    pub fn kind(&self) -> &'static str {
        match self {
            GeometryData::Point(_) => "Point",
            GeometryData::LineString(_) => "LineString",
            GeometryData::Polygon(_) => "Polygon",
        }
    }

    /// Coordinates as a (possibly nested) list of floats.
    pub fn coordinates(&self) -> Value {
        fn pair(c: &[f64; 2]) -> Value {
            Value::List(vec![Value::Float(c[0]), Value::Float(c[1])])
        }
        match self {
            GeometryData::Point(c) => pair(c),
            GeometryData::LineString(cs) => Value::List(cs.iter().map(pair).collect()),
            GeometryData::Polygon(ring) => {
                Value::List(vec![Value::List(ring.iter().map(pair).collect())])
            }
        }
    }

    fn vertices(&self) -> &[[f64; 2]] {
        match self {
            GeometryData::Point(c) => std::slice::from_ref(c),
            GeometryData::LineString(cs) | GeometryData::Polygon(cs) => cs,
        }
    }

    /// Bounding box as `(min_x, min_y, max_x, max_y)`; None when there are no vertices.
    pub fn bbox(&self) -> Option<(f64, f64, f64, f64)> {
        let mut vertices = self.vertices().iter();
        let first = vertices.next()?;
        Some(vertices.fold(
            (first[0], first[1], first[0], first[1]),
            |(x0, y0, x1, y1), c| (x0.min(c[0]), y0.min(c[1]), x1.max(c[0]), y1.max(c[1])),
        ))
    }

    /// Axis-aligned bounding rectangle as a polygon.
    pub fn bounds(&self) -> Option<GeometryData> {
        let (x0, y0, x1, y1) = self.bbox()?;
        Some(GeometryData::Polygon(vec![
            [x0, y0],
            [x1, y0],
            [x1, y1],
            [x0, y1],
        ]))
    }

    /// Whether the bounding boxes of two geometries overlap (edges included).
    pub fn bbox_intersects(&self, other: &GeometryData) -> bool {
        match (self.bbox(), other.bbox()) {
            (Some((ax0, ay0, ax1, ay1)), Some((bx0, by0, bx1, by1))) => {
                ax0 <= bx1 && bx0 <= ax1 && ay0 <= by1 && by0 <= ay1
            }
            _ => false,
        }
    }
}

impl FeatureData {
    /// Create a feature with a geometry and no properties.
    pub fn new(geometry: GeometryData) -> Self {
        Self {
            geometry: Some(geometry),
            properties: Properties::new(),
        }
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl ImageData {
    /// Create an image description for an asset id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Add a band with a constant stand-in value.
    pub fn with_band(mut self, name: impl Into<String>, value: f64) -> Self {
        self.bands.insert(name.into(), value);
        self
    }

    /// Set the footprint.
    pub fn with_footprint(mut self, footprint: GeometryData) -> Self {
        self.footprint = Some(footprint);
        self
    }

    /// Add a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
