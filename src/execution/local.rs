//! In-process stand-in for the imagery service.
//!
//! [`LocalService`] evaluates expression graphs against an in-memory asset
//! table using the functions in a [`FunctionRegistry`]. Export submissions
//! are evaluated eagerly and recorded instead of being run, which makes the
//! service suitable for tests and dry runs. Raster operations only see the
//! constant stand-in band values of [`ImageData`].

use crate::core::error::{RemoteError, RemoteResult};
use crate::core::types::{FeatureData, GeometryData, ImageData, Value, ValueType};
use crate::execution::registry::FunctionRegistry;
use crate::execution::service::ImageryService;
use crate::export::task::{ExportKind, ExportRequest, TaskId};
use crate::graph::expr::Expr;
use crate::graph::handle::Handle;
use indexmap::IndexMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Parameter bindings visible while evaluating a function body.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: Vec<(String, Value)>,
}

impl Scope {
    /// A scope extended with one more binding. Later bindings shadow earlier ones.
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Scope {
        let mut bindings = self.bindings.clone();
        bindings.push((name.into(), value));
        Scope { bindings }
    }

    /// Resolve a parameter name.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// A function argument together with the scope it was defined in.
#[derive(Debug, Clone)]
pub struct Closure {
    pub parameters: Vec<String>,
    pub body: Arc<Expr>,
    pub scope: Scope,
}

/// Arguments and services available to a builtin while it runs.
pub struct CallContext<'a> {
    function: &'a str,
    values: IndexMap<String, Value>,
    closures: IndexMap<String, Closure>,
    service: &'a LocalService,
}

impl<'a> CallContext<'a> {
    /// Name of the function being evaluated.
    pub fn function(&self) -> &str {
        self.function
    }

    /// Evaluated arguments in call order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get a required argument.
    pub fn value(&self, name: &str) -> RemoteResult<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| RemoteError::MissingArgument {
                function: self.function.to_string(),
                argument: name.to_string(),
            })
    }

    /// Get an optional argument. Null counts as absent.
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Error for an argument of the wrong kind.
    pub fn mismatch(&self, expected: ValueType, got: &Value) -> RemoteError {
        RemoteError::TypeMismatch {
            function: self.function.to_string(),
            expected,
            got: got.value_type(),
        }
    }

    /// Error for an argument with an unacceptable value.
    pub fn invalid(&self, argument: &str, reason: impl Into<String>) -> RemoteError {
        RemoteError::InvalidArgument {
            function: self.function.to_string(),
            argument: argument.to_string(),
            reason: reason.into(),
        }
    }

    /// Get an argument as a float.
    pub fn float(&self, name: &str) -> RemoteResult<f64> {
        let value = self.value(name)?;
        value
            .as_float()
            .ok_or_else(|| self.mismatch(ValueType::Float, value))
    }

    /// Get an optional float argument with a default.
    pub fn float_or(&self, name: &str, default: f64) -> RemoteResult<f64> {
        match self.optional(name) {
            Some(_) => self.float(name),
            None => Ok(default),
        }
    }

    /// Get an argument as an integer.
    pub fn integer(&self, name: &str) -> RemoteResult<i64> {
        let value = self.value(name)?;
        value
            .as_integer()
            .ok_or_else(|| self.mismatch(ValueType::Integer, value))
    }

    /// Get an optional boolean argument with a default.
    pub fn bool_or(&self, name: &str, default: bool) -> RemoteResult<bool> {
        match self.optional(name) {
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.mismatch(ValueType::Boolean, value)),
            None => Ok(default),
        }
    }

    /// Get an argument as a string.
    pub fn string(&self, name: &str) -> RemoteResult<&str> {
        let value = self.value(name)?;
        value
            .as_str()
            .ok_or_else(|| self.mismatch(ValueType::String, value))
    }

    /// Get an argument as a date (epoch milliseconds).
    pub fn date(&self, name: &str) -> RemoteResult<i64> {
        let value = self.value(name)?;
        value
            .as_date()
            .ok_or_else(|| self.mismatch(ValueType::Date, value))
    }

    /// Get an argument as a list.
    pub fn list(&self, name: &str) -> RemoteResult<&[Value]> {
        let value = self.value(name)?;
        value
            .as_list()
            .ok_or_else(|| self.mismatch(ValueType::List, value))
    }

    /// Get an argument as a geometry.
    pub fn geometry(&self, name: &str) -> RemoteResult<&GeometryData> {
        let value = self.value(name)?;
        value
            .as_geometry()
            .ok_or_else(|| self.mismatch(ValueType::Geometry, value))
    }

    /// Get an argument as a feature.
    pub fn feature(&self, name: &str) -> RemoteResult<&FeatureData> {
        let value = self.value(name)?;
        value
            .as_feature()
            .ok_or_else(|| self.mismatch(ValueType::Feature, value))
    }

    /// Get an argument as a feature collection.
    pub fn features(&self, name: &str) -> RemoteResult<&[FeatureData]> {
        let value = self.value(name)?;
        value
            .as_features()
            .ok_or_else(|| self.mismatch(ValueType::FeatureCollection, value))
    }

    /// Get an argument as an image.
    pub fn image(&self, name: &str) -> RemoteResult<&ImageData> {
        let value = self.value(name)?;
        value
            .as_image()
            .ok_or_else(|| self.mismatch(ValueType::Image, value))
    }

    /// Get a function argument.
    pub fn closure(&self, name: &str) -> RemoteResult<&Closure> {
        self.closures
            .get(name)
            .ok_or_else(|| RemoteError::MissingArgument {
                function: self.function.to_string(),
                argument: name.to_string(),
            })
    }

    /// Call a function argument.
    pub fn apply(&self, closure: &Closure, arguments: Vec<Value>) -> RemoteResult<Value> {
        self.service.apply(closure, arguments)
    }

    /// Fetch a stored asset.
    pub fn asset(&self, id: &str) -> RemoteResult<Value> {
        self.service.asset(id)
    }
}

/// A recorded export submission.
#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub task_id: TaskId,
    pub request: ExportRequest,
    /// The exported data, evaluated at submission time
    pub materialized: Value,
}

/// In-memory imagery service.
#[derive(Debug)]
pub struct LocalService {
    assets: RwLock<IndexMap<String, Value>>,
    registry: FunctionRegistry,
    exports: Mutex<Vec<ExportRecord>>,
    export_quota: Option<usize>,
}

impl LocalService {
    /// Create a service with the built-in functions and no assets.
    pub fn new() -> Self {
        Self::with_registry(FunctionRegistry::with_builtins())
    }

    /// Create a service with a custom function registry.
    pub fn with_registry(registry: FunctionRegistry) -> Self {
        Self {
            assets: RwLock::new(IndexMap::new()),
            registry,
            exports: Mutex::new(Vec::new()),
            export_quota: None,
        }
    }

    /// Reject exports beyond the first `quota` with `QuotaExceeded`.
    pub fn with_export_quota(mut self, quota: usize) -> Self {
        self.export_quota = Some(quota);
        self
    }

    /// Store an asset under `id`.
    pub fn insert_asset(&self, id: impl Into<String>, value: Value) {
        self.assets.write().insert(id.into(), value);
    }

    /// Fetch a stored asset.
    pub fn asset(&self, id: &str) -> RemoteResult<Value> {
        self.assets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::AssetNotFound(id.to_string()))
    }

    /// All accepted exports, in submission order.
    pub fn exports(&self) -> Vec<ExportRecord> {
        self.exports.lock().clone()
    }

    /// Number of accepted exports.
    pub fn export_count(&self) -> usize {
        self.exports.lock().len()
    }

    /// Call a closure with positional arguments.
    pub fn apply(&self, closure: &Closure, arguments: Vec<Value>) -> RemoteResult<Value> {
        if arguments.len() != closure.parameters.len() {
            return Err(RemoteError::Other(format!(
                "function expects {} argument(s), got {}",
                closure.parameters.len(),
                arguments.len()
            )));
        }
        let scope = closure
            .parameters
            .iter()
            .zip(arguments)
            .fold(closure.scope.clone(), |scope, (name, value)| {
                scope.bind(name.clone(), value)
            });
        self.evaluate(&closure.body, &scope)
    }

    /// Evaluate an expression in a scope.
    pub fn evaluate(&self, expr: &Expr, scope: &Scope) -> RemoteResult<Value> {
        match expr {
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Argument(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| RemoteError::UnboundArgument(name.clone())),
            Expr::Function { .. } => Err(RemoteError::Other(
                "a function can only be used as an argument".to_string(),
            )),
            Expr::Invocation {
                function,
                arguments,
            } => {
                let builtin = self
                    .registry
                    .get(function)
                    .ok_or_else(|| RemoteError::UnknownFunction(function.clone()))?;

                let mut ctx = CallContext {
                    function,
                    values: IndexMap::new(),
                    closures: IndexMap::new(),
                    service: self,
                };
                for (name, argument) in arguments {
                    match &**argument {
                        Expr::Function { parameters, body } => {
                            ctx.closures.insert(
                                name.clone(),
                                Closure {
                                    parameters: parameters.clone(),
                                    body: body.clone(),
                                    scope: scope.clone(),
                                },
                            );
                        }
                        other => {
                            let value = self.evaluate(other, scope)?;
                            ctx.values.insert(name.clone(), value);
                        }
                    }
                }

                builtin(&ctx)
            }
        }
    }
}

impl Default for LocalService {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageryService for LocalService {
    fn compute(&self, expr: &Arc<Expr>) -> RemoteResult<Value> {
        self.evaluate(expr, &Scope::default())
    }

    fn start_export(&self, request: &ExportRequest) -> RemoteResult<TaskId> {
        let mut exports = self.exports.lock();
        if let Some(quota) = self.export_quota {
            if exports.len() >= quota {
                return Err(RemoteError::QuotaExceeded(format!(
                    "at most {} concurrent export tasks",
                    quota
                )));
            }
        }

        let materialized = self.compute(&request.expression)?;
        let expected = match &request.kind {
            ExportKind::Table { .. } => ValueType::FeatureCollection,
            ExportKind::Image(options) => {
                if let Some(region) = &options.region {
                    let region = self.compute(region.expr())?;
                    if region.as_geometry().is_none() {
                        return Err(RemoteError::InvalidGeometry(format!(
                            "export region evaluated to {}",
                            region
                        )));
                    }
                }
                ValueType::Image
            }
        };
        if materialized.value_type() != expected {
            return Err(RemoteError::TypeMismatch {
                function: "Export".to_string(),
                expected,
                got: materialized.value_type(),
            });
        }

        let task_id = TaskId(format!("LOCAL_{:04}", exports.len()));
        debug!(
            "Accepted export {} ({}) as {}",
            request.description, request.destination, task_id
        );
        exports.push(ExportRecord {
            task_id: task_id.clone(),
            request: request.clone(),
            materialized,
        });
        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::task::{Destination, TableFormat};
    use crate::graph::handle::{Date, Element, FeatureCollection, Image, Text};

    fn scene() -> ImageData {
        ImageData::new("S1/scene_a")
            .with_band("VV", -12.5)
            .with_property("system:time_start", 1_688_428_800_000i64)
    }

    #[test]
    fn test_load_and_get_property() {
        let service = LocalService::new();
        service.insert_asset("S1/scene_a", Value::Image(scene()));

        let image = Image::load("S1/scene_a");
        let start = image.get("system:time_start").evaluate(&service).unwrap();
        assert_eq!(start, Value::Integer(1_688_428_800_000));

        let missing = image.get("filename").evaluate(&service).unwrap();
        assert!(missing.is_null());
    }

    #[test]
    fn test_missing_asset() {
        let service = LocalService::new();
        let err = Image::load("nope").evaluate(&service).unwrap_err();
        assert_eq!(err, RemoteError::AssetNotFound("nope".to_string()));
    }

    #[test]
    fn test_unknown_function() {
        let service = LocalService::new();
        let expr = Expr::call("Image.teleport").build();
        let err = service.compute(&expr).unwrap_err();
        assert_eq!(err, RemoteError::UnknownFunction("Image.teleport".to_string()));
    }

    #[test]
    fn test_date_format_chain() {
        let service = LocalService::new();
        let text = Text::new("S1_")
            .cat(&Date::new(1_688_428_800_000i64).format("YYYY_MM_dd"))
            .cat("_IW");
        assert_eq!(
            text.evaluate(&service).unwrap(),
            Value::String("S1_2023_07_04_IW".to_string())
        );
    }

    #[test]
    fn test_map_sees_captured_values() {
        let service = LocalService::new();
        service.insert_asset("S1/scene_a", Value::Image(scene()));
        service.insert_asset(
            "training",
            Value::FeatureCollection(vec![
                FeatureData::new(GeometryData::Point([0.0, 0.0])),
                FeatureData::new(GeometryData::Point([1.0, 1.0])),
            ]),
        );

        let image = Image::load("S1/scene_a");
        let tagged = FeatureCollection::load("training")
            .map(|f| f.set("date", &image.date().format("YYYY-MM-dd")));
        let value = tagged.evaluate(&service).unwrap();
        let features = value.as_features().unwrap();
        assert_eq!(features.len(), 2);
        for feature in features {
            assert_eq!(
                feature.properties.get("date"),
                Some(&Value::String("2023-07-04".to_string()))
            );
        }
    }

    #[test]
    fn test_unbound_argument() {
        let service = LocalService::new();
        let expr = Arc::new(Expr::Argument("x".to_string()));
        assert_eq!(
            service.compute(&expr).unwrap_err(),
            RemoteError::UnboundArgument("x".to_string())
        );
    }

    #[test]
    fn test_export_records_and_quota() {
        let service = LocalService::new().with_export_quota(1);
        service.insert_asset("training", Value::FeatureCollection(Vec::new()));
        let collection = FeatureCollection::load("training");
        let destination = Destination::Drive {
            folder: "out".to_string(),
        };

        let first = ExportRequest::table(&collection, "a", destination.clone(), TableFormat::Csv);
        assert_eq!(
            service.start_export(&first).unwrap(),
            TaskId("LOCAL_0000".to_string())
        );

        let second = ExportRequest::table(&collection, "b", destination, TableFormat::Csv);
        let err = service.start_export(&second).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(service.export_count(), 1);
        assert_eq!(service.exports()[0].request.description, "a");
    }

    #[test]
    fn test_export_rejects_wrong_kind() {
        let service = LocalService::new();
        service.insert_asset("S1/scene_a", Value::Image(scene()));
        let image = Image::load("S1/scene_a");
        let request = ExportRequest {
            correlation_id: image.id(),
            description: "wrong".to_string(),
            destination: Destination::Drive {
                folder: "out".to_string(),
            },
            file_name_prefix: None,
            expression: image.expr().clone(),
            kind: ExportKind::Table {
                format: TableFormat::Csv,
            },
        };
        assert!(matches!(
            service.start_export(&request),
            Err(RemoteError::TypeMismatch { .. })
        ));
        assert_eq!(service.export_count(), 0);
    }
}
