//! Built-in function implementations for [`LocalService`](crate::execution::local::LocalService).
//!
//! Function and argument names follow the remote service API so that the
//! same expression graph can be evaluated locally or remotely.

use crate::core::error::{RemoteError, RemoteResult};
use crate::core::types::{
    FeatureData, GeometryData, KernelShape, KernelSpec, KernelUnits, Properties, Value, ValueType,
};
use crate::execution::local::CallContext;
use crate::execution::registry::FunctionRegistry;
use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};
use log::debug;

/// Largest tile scale the service accepts for sampling.
const MAX_TILE_SCALE: f64 = 16.0;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Register every built-in function.
pub fn register_all(registry: &mut FunctionRegistry) {
    // Constructors and asset access
    registry.register("Image.load", image_load);
    registry.register("FeatureCollection.load", table_load);
    registry.register("Collection", collection);
    registry.register("List", list);
    registry.register("Feature", feature);
    registry.register("GeometryConstructors.Point", point);

    // Element properties
    registry.register("Element.get", element_get);
    registry.register("Element.set", element_set);

    // Dates, strings and numbers
    registry.register("Image.date", image_date);
    registry.register("Date", date);
    registry.register("Date.format", date_format);
    registry.register("String", string);
    registry.register("String.cat", string_cat);
    registry.register("Number", number);

    // Geometry
    registry.register("Feature.geometry", feature_geometry);
    registry.register("Image.geometry", image_geometry);
    registry.register("Geometry.coordinates", geometry_coordinates);
    registry.register("Geometry.bounds", geometry_bounds);
    registry.register("List.get", list_get);

    // Collections and rasters
    registry.register("Collection.map", collection_map);
    registry.register("Image.register", image_register);
    registry.register("Image.sampleRegions", sample_regions);
    registry.register("Kernel.square", kernel_square);
}

fn image_load(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let id = ctx.string("id")?;
    let asset = ctx.asset(id)?;
    match asset {
        Value::Image(_) => Ok(asset),
        other => Err(ctx.mismatch(ValueType::Image, &other)),
    }
}

fn table_load(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let id = ctx.string("tableId")?;
    let asset = ctx.asset(id)?;
    match asset {
        Value::FeatureCollection(_) => Ok(asset),
        other => Err(ctx.mismatch(ValueType::FeatureCollection, &other)),
    }
}

fn collection(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let features = ctx
        .list("features")?
        .iter()
        .map(|item| {
            item.as_feature()
                .cloned()
                .ok_or_else(|| ctx.mismatch(ValueType::Feature, item))
        })
        .collect::<RemoteResult<Vec<_>>>()?;
    Ok(Value::FeatureCollection(features))
}

fn list(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    Ok(Value::List(ctx.values().map(|(_, v)| v.clone()).collect()))
}

fn feature(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let geometry = ctx.geometry("geometry")?.clone();
    let properties = match ctx.optional("metadata") {
        Some(Value::Dictionary(map)) => map.clone(),
        Some(other) => return Err(ctx.mismatch(ValueType::Dictionary, other)),
        None => Properties::new(),
    };
    Ok(Value::Feature(FeatureData {
        geometry: Some(geometry),
        properties,
    }))
}

fn point(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    match ctx.list("coordinates")? {
        [x, y] => match (x.as_float(), y.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Geometry(GeometryData::Point([x, y]))),
            _ => Err(RemoteError::InvalidGeometry(
                "point coordinates must be numbers".to_string(),
            )),
        },
        other => Err(RemoteError::InvalidGeometry(format!(
            "a point needs 2 coordinates, got {}",
            other.len()
        ))),
    }
}

fn element_get(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let object = ctx.value("object")?;
    let property = ctx.string("property")?;
    let properties = object
        .properties()
        .ok_or_else(|| ctx.invalid("object", format!("{} has no properties", object)))?;
    Ok(properties.get(property).cloned().unwrap_or(Value::Null))
}

fn element_set(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let key = ctx.string("key")?.to_string();
    let value = ctx.value("value")?.clone();
    let mut object = ctx.value("object")?.clone();
    match &mut object {
        Value::Image(img) => {
            img.properties.insert(key, value);
        }
        Value::Feature(f) => {
            f.properties.insert(key, value);
        }
        other => {
            return Err(ctx.invalid("object", format!("{} has no properties", other)));
        }
    }
    Ok(object)
}

fn image_date(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let image = ctx.image("image")?;
    let start = image
        .properties
        .get("system:time_start")
        .filter(|v| !v.is_null())
        .ok_or_else(|| RemoteError::MissingProperty {
            object: Value::Image(image.clone()).to_string(),
            property: "system:time_start".to_string(),
        })?;
    start
        .as_integer()
        .map(Value::Date)
        .ok_or_else(|| ctx.mismatch(ValueType::Integer, start))
}

fn date(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let value = ctx.value("value")?;
    match value {
        Value::Date(ms) => Ok(Value::Date(*ms)),
        Value::Integer(ms) => Ok(Value::Date(*ms)),
        Value::Float(ms) => Ok(Value::Date(*ms as i64)),
        Value::String(s) => parse_date(s)
            .map(Value::Date)
            .ok_or_else(|| ctx.invalid("value", format!("cannot parse '{}' as a date", s))),
        Value::Null => Err(ctx.invalid("value", "date value is null")),
        other => Err(ctx.mismatch(ValueType::Date, other)),
    }
}

fn date_format(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let ms = ctx.date("date")?;
    let pattern = ctx.string("format")?;
    if let Some(zone) = ctx.optional("timeZone") {
        if zone.as_str() != Some("UTC") {
            return Err(ctx.invalid("timeZone", format!("unsupported time zone {}", zone)));
        }
    }
    format_joda(ms, pattern)
        .map(Value::String)
        .map_err(|reason| ctx.invalid("format", reason))
}

fn string(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let input = ctx.value("input")?;
    match input {
        Value::String(_) => Ok(input.clone()),
        Value::Integer(i) => Ok(Value::String(i.to_string())),
        Value::Float(f) => Ok(Value::String(f.to_string())),
        other => Err(ctx.mismatch(ValueType::String, other)),
    }
}

fn string_cat(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let mut joined = ctx.string("string1")?.to_string();
    joined.push_str(ctx.string("string2")?);
    Ok(Value::String(joined))
}

fn number(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let input = ctx.value("input")?;
    match input {
        Value::Integer(_) | Value::Float(_) => Ok(input.clone()),
        other => Err(ctx.mismatch(ValueType::Float, other)),
    }
}

fn feature_geometry(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    ctx.feature("feature")?
        .geometry
        .clone()
        .map(Value::Geometry)
        .ok_or_else(|| RemoteError::InvalidGeometry("feature has no geometry".to_string()))
}

fn image_geometry(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    ctx.image("image")?
        .footprint
        .clone()
        .map(Value::Geometry)
        .ok_or_else(|| RemoteError::InvalidGeometry("image has no footprint".to_string()))
}

fn geometry_coordinates(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    Ok(ctx.geometry("geometry")?.coordinates())
}

fn geometry_bounds(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    ctx.geometry("geometry")?
        .bounds()
        .map(Value::Geometry)
        .ok_or_else(|| RemoteError::InvalidGeometry("geometry has no vertices".to_string()))
}

fn list_get(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let items = ctx.list("list")?;
    let index = ctx.integer("index")?;
    let len = items.len() as i64;
    let resolved = if index < 0 { len + index } else { index };
    if resolved < 0 || resolved >= len {
        return Err(ctx.invalid(
            "index",
            format!("index {} out of range for list of length {}", index, len),
        ));
    }
    Ok(items[resolved as usize].clone())
}

fn collection_map(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let features = ctx.features("collection")?;
    let algorithm = ctx.closure("baseAlgorithm")?;
    let mapped = features
        .iter()
        .map(|f| match ctx.apply(algorithm, vec![Value::Feature(f.clone())])? {
            Value::Feature(out) => Ok(out),
            other => Err(ctx.mismatch(ValueType::Feature, &other)),
        })
        .collect::<RemoteResult<Vec<_>>>()?;
    Ok(Value::FeatureCollection(mapped))
}

/// Registration is a server-side resampling; locally the stand-in pixels
/// are constant, so the moving image comes back unchanged.
fn image_register(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let image = ctx.image("image")?;
    let reference = ctx.image("referenceImage")?;
    let max_offset = ctx.float("maxOffset")?;
    if max_offset <= 0.0 {
        return Err(ctx.invalid("maxOffset", "must be positive"));
    }
    debug!(
        "Registering {:?} to {:?} (max offset {})",
        image.id, reference.id, max_offset
    );
    Ok(Value::Image(image.clone()))
}

fn sample_regions(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let image = ctx.image("image")?;
    let features = ctx.features("collection")?;
    let scale = ctx.float("scale")?;
    let tile_scale = ctx.float_or("tileScale", 1.0)?;
    let keep_geometry = ctx.bool_or("geometries", false)?;

    if scale <= 0.0 {
        return Err(ctx.invalid("scale", "must be positive"));
    }
    if tile_scale <= 0.0 || tile_scale > MAX_TILE_SCALE {
        return Err(ctx.invalid(
            "tileScale",
            format!("must be in (0, {}]", MAX_TILE_SCALE),
        ));
    }

    let mut samples = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let geometry = feature.geometry.as_ref().ok_or_else(|| {
            RemoteError::InvalidGeometry(format!("feature {} has no geometry", i))
        })?;
        if let Some(footprint) = &image.footprint {
            if !footprint.bbox_intersects(geometry) {
                continue;
            }
        }
        let mut properties = feature.properties.clone();
        for (band, value) in &image.bands {
            properties.insert(band.clone(), Value::Float(*value));
        }
        samples.push(FeatureData {
            geometry: keep_geometry.then(|| geometry.clone()),
            properties,
        });
    }
    Ok(Value::FeatureCollection(samples))
}

fn kernel_square(ctx: &CallContext<'_>) -> RemoteResult<Value> {
    let radius = ctx.float("radius")?;
    if radius <= 0.0 {
        return Err(ctx.invalid("radius", "kernel radius must be positive"));
    }
    let units = match ctx.optional("units") {
        Some(v) => {
            let name = v.as_str().ok_or_else(|| ctx.mismatch(ValueType::String, v))?;
            KernelUnits::parse(name)
                .ok_or_else(|| ctx.invalid("units", format!("unknown units '{}'", name)))?
        }
        None => KernelUnits::Pixels,
    };
    Ok(Value::Kernel(KernelSpec {
        shape: KernelShape::Square,
        radius,
        units,
        normalize: ctx.bool_or("normalize", true)?,
        magnitude: ctx.float_or("magnitude", 1.0)?,
    }))
}

/// Parse an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (UTC midnight).
fn parse_date(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0)?).timestamp_millis())
}

/// Format epoch milliseconds with a Joda-style pattern, in UTC.
///
/// Supported fields: `yyyy`/`YYYY`, `yy`/`YY`, `M`, `MM`, `MMM`, `MMMM`,
/// `d`, `dd`, `DDD`, `H`, `HH`, `mm`, `ss`, `SSS`. Text in single quotes is
/// copied verbatim (`''` is a literal quote); other non-letters pass through.
pub fn format_joda(ms: i64, pattern: &str) -> Result<String, String> {
    let dt = Utc
        .timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| format!("timestamp {} out of range", ms))?;

    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated quote in pattern".to_string()),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        out.push('\'');
                        i += 2;
                    }
                    Some('\'') => {
                        i += 1;
                        break;
                    }
                    Some(&q) => {
                        out.push(q);
                        i += 1;
                    }
                }
            }
            continue;
        }

        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        let field = match (c, run) {
            ('y' | 'Y', 2) => format!("{:02}", dt.year().rem_euclid(100)),
            ('y' | 'Y', _) => format!("{:04}", dt.year()),
            ('M', 1) => dt.month().to_string(),
            ('M', 2) => format!("{:02}", dt.month()),
            ('M', 3) => MONTHS[dt.month0() as usize][..3].to_string(),
            ('M', _) => MONTHS[dt.month0() as usize].to_string(),
            ('d', 1) => dt.day().to_string(),
            ('d', _) => format!("{:02}", dt.day()),
            ('D', _) => format!("{:03}", dt.ordinal()),
            ('H', 1) => dt.hour().to_string(),
            ('H', _) => format!("{:02}", dt.hour()),
            ('m', _) => format!("{:02}", dt.minute()),
            ('s', _) => format!("{:02}", dt.second()),
            ('S', _) => format!("{:03}", dt.timestamp_subsec_millis()),
            _ => return Err(format!("unsupported pattern letter '{}'", c)),
        };
        out.push_str(&field);
        i += run;
    }
    Ok(out)
}
