//! Wire encoding of expression graphs.
//!
//! The graph is flattened into the service's `Expression` form: a table of
//! values keyed by string ids, with every argument a `valueReference` to
//! another entry. Sub-expressions shared through the same `Arc` get a single
//! entry. Constants are plain JSON; dates, geometries, features and kernels
//! are sent as the constructor calls that rebuild them on the server.

use crate::core::error::{RemoteError, RemoteResult};
use crate::core::types::{GeometryData, Value};
use crate::graph::expr::Expr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Pointer from an argument to another table entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueNode {
    pub value_reference: String,
}

impl ValueNode {
    fn reference(key: String) -> Self {
        Self {
            value_reference: key,
        }
    }
}

/// One entry of the value table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SerializedValue {
    /// Plain JSON literal
    ConstantValue(serde_json::Value),
    /// Function call
    #[serde(rename_all = "camelCase")]
    FunctionInvocationValue {
        function_name: String,
        arguments: IndexMap<String, ValueNode>,
    },
    /// Parameter of the enclosing function definition
    ArgumentReference(String),
    /// Anonymous function; `body` is a table key
    #[serde(rename_all = "camelCase")]
    FunctionDefinitionValue {
        argument_names: Vec<String>,
        body: String,
    },
    /// List whose items are not all plain literals
    ArrayValue { values: Vec<ValueNode> },
    /// Dictionary whose values are not all plain literals
    DictionaryValue { values: IndexMap<String, ValueNode> },
}

/// Serializable representation of an expression graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedExpression {
    /// Key of the root value
    pub result: String,
    /// All values, dependencies before dependents
    pub values: IndexMap<String, SerializedValue>,
}

impl SerializedExpression {
    /// Flatten an expression graph.
    ///
    /// Fails only for constants the service cannot rebuild, such as an
    /// image value that was not loaded from an asset.
    pub fn from_expr(expr: &Arc<Expr>) -> RemoteResult<Self> {
        let mut encoder = Encoder::default();
        let result = encoder.encode(expr)?;
        Ok(Self {
            result,
            values: encoder.values,
        })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to compact JSON (no whitespace).
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[cfg(test)]
    pub fn root(&self) -> Option<&SerializedValue> {
        self.values.get(&self.result)
    }

    /// Number of distinct entries invoking `function`.
    #[cfg(test)]
    pub fn count_invocations(&self, function: &str) -> usize {
        self.values
            .values()
            .filter(|v| {
                matches!(v, SerializedValue::FunctionInvocationValue { function_name, .. }
                    if function_name == function)
            })
            .count()
    }
}

#[derive(Default)]
struct Encoder {
    values: IndexMap<String, SerializedValue>,
    seen: HashMap<*const Expr, String>,
}

impl Encoder {
    fn encode(&mut self, expr: &Arc<Expr>) -> RemoteResult<String> {
        let ptr = Arc::as_ptr(expr);
        if let Some(key) = self.seen.get(&ptr) {
            return Ok(key.clone());
        }

        let key = match &**expr {
            Expr::Constant(v) => self.constant(v)?,
            Expr::Argument(name) => self.push(SerializedValue::ArgumentReference(name.clone())),
            // Positional `List` calls are how handles build lists of handles.
            Expr::Invocation {
                function,
                arguments,
            } if function == "List" => {
                let values = arguments
                    .values()
                    .map(|arg| self.encode(arg).map(ValueNode::reference))
                    .collect::<RemoteResult<Vec<_>>>()?;
                self.push(SerializedValue::ArrayValue { values })
            }
            Expr::Invocation {
                function,
                arguments,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|(name, arg)| Ok((name.clone(), ValueNode::reference(self.encode(arg)?))))
                    .collect::<RemoteResult<IndexMap<_, _>>>()?;
                self.push(SerializedValue::FunctionInvocationValue {
                    function_name: function.clone(),
                    arguments,
                })
            }
            Expr::Function { parameters, body } => {
                let body = self.encode(body)?;
                self.push(SerializedValue::FunctionDefinitionValue {
                    argument_names: parameters.clone(),
                    body,
                })
            }
        };

        self.seen.insert(ptr, key.clone());
        Ok(key)
    }

    fn constant(&mut self, value: &Value) -> RemoteResult<String> {
        if let Some(json) = plain_json(value) {
            return Ok(self.push(SerializedValue::ConstantValue(json)));
        }
        match value {
            Value::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.constant(item).map(ValueNode::reference))
                    .collect::<RemoteResult<Vec<_>>>()?;
                Ok(self.push(SerializedValue::ArrayValue { values }))
            }
            Value::Dictionary(map) => {
                let values = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), ValueNode::reference(self.constant(v)?))))
                    .collect::<RemoteResult<IndexMap<_, _>>>()?;
                Ok(self.push(SerializedValue::DictionaryValue { values }))
            }
            other => {
                let constructor = constructor_of(other)?;
                self.encode(&constructor)
            }
        }
    }

    fn push(&mut self, value: SerializedValue) -> String {
        let key = self.values.len().to_string();
        self.values.insert(key.clone(), value);
        key
    }
}

/// JSON form of a value made only of literals.
fn plain_json(value: &Value) -> Option<serde_json::Value> {
    use serde_json::Value as Json;
    match value {
        Value::Null => Some(Json::Null),
        Value::Boolean(b) => Some(Json::Bool(*b)),
        Value::Integer(i) => Some(Json::from(*i)),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(Json::Number),
        Value::String(s) => Some(Json::String(s.clone())),
        Value::List(items) => items
            .iter()
            .map(plain_json)
            .collect::<Option<Vec<_>>>()
            .map(Json::Array),
        Value::Dictionary(map) => map
            .iter()
            .map(|(k, v)| plain_json(v).map(|j| (k.clone(), j)))
            .collect::<Option<serde_json::Map<_, _>>>()
            .map(Json::Object),
        _ => None,
    }
}

fn coordinate_list(coords: &[[f64; 2]]) -> Value {
    Value::List(
        coords
            .iter()
            .map(|[x, y]| Value::List(vec![Value::Float(*x), Value::Float(*y)]))
            .collect(),
    )
}

/// The server call that rebuilds a structured constant.
fn constructor_of(value: &Value) -> RemoteResult<Arc<Expr>> {
    let expr = match value {
        Value::Date(ms) => Expr::call("Date").constant("value", *ms).build(),
        Value::Geometry(GeometryData::Point([x, y])) => Expr::call("GeometryConstructors.Point")
            .constant("coordinates", Value::List(vec![Value::Float(*x), Value::Float(*y)]))
            .build(),
        Value::Geometry(GeometryData::LineString(coords)) => {
            Expr::call("GeometryConstructors.LineString")
                .constant("coordinates", coordinate_list(coords))
                .build()
        }
        Value::Geometry(GeometryData::Polygon(ring)) => Expr::call("GeometryConstructors.Polygon")
            .constant("coordinates", Value::List(vec![coordinate_list(ring)]))
            .build(),
        Value::Feature(feature) => {
            let geometry = feature.geometry.clone().map_or(Value::Null, Value::Geometry);
            Expr::call("Feature")
                .constant("geometry", geometry)
                .constant("metadata", Value::Dictionary(feature.properties.clone()))
                .build()
        }
        Value::FeatureCollection(features) => Expr::call("Collection")
            .constant(
                "features",
                Value::List(features.iter().cloned().map(Value::Feature).collect()),
            )
            .build(),
        Value::Kernel(spec) => Expr::call("Kernel.square")
            .constant("radius", spec.radius)
            .constant("units", spec.units.as_str())
            .constant("normalize", spec.normalize)
            .constant("magnitude", spec.magnitude)
            .build(),
        Value::Image(_) => {
            return Err(RemoteError::Encoding(
                "image values cannot be sent as constants; load them by asset id".to_string(),
            ))
        }
        other => {
            return Err(RemoteError::Encoding(format!(
                "{} has no JSON representation",
                other
            )))
        }
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FeatureData, ImageData};
    use crate::graph::handle::{Computed, Element, FeatureCollection, Handle, Image};
    use serde_json::json;

    #[test]
    fn test_serialize_invocation() {
        let image = Image::load("S1/scene_a");
        let serialized = SerializedExpression::from_expr(image.expr()).unwrap();

        assert_eq!(
            serde_json::to_value(&serialized).unwrap(),
            json!({
                "result": "1",
                "values": {
                    "0": { "constantValue": "S1/scene_a" },
                    "1": {
                        "functionInvocationValue": {
                            "functionName": "Image.load",
                            "arguments": { "id": { "valueReference": "0" } }
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_shared_nodes_emitted_once() {
        let reference = Image::load("S1/ref");
        let a = Image::load("S1/a").register(&reference, 10.0);
        let b = Image::load("S1/b").register(&reference, 10.0);
        let combined = a.set("pair", &b);

        let serialized = SerializedExpression::from_expr(combined.expr()).unwrap();
        assert_eq!(serialized.count_invocations("Image.register"), 2);
        // ref, a and b are loaded once each
        assert_eq!(serialized.count_invocations("Image.load"), 3);
    }

    #[test]
    fn test_function_definition_round_trip() {
        let mapped = FeatureCollection::load("training").map(|f| f.set("date", "2023-07-04"));
        let serialized = SerializedExpression::from_expr(mapped.expr()).unwrap();

        let json = serialized.to_json().unwrap();
        assert!(json.contains("functionDefinitionValue"));
        assert!(json.contains("argumentReference"));

        let back = SerializedExpression::from_json(&json).unwrap();
        assert_eq!(back.result, serialized.result);
        assert_eq!(back.values, serialized.values);
    }

    #[test]
    fn test_structured_constants_become_constructors() {
        let date = Computed::constant(Value::Date(1_688_428_800_000));
        let serialized = SerializedExpression::from_expr(date.expr()).unwrap();
        match serialized.root().unwrap() {
            SerializedValue::FunctionInvocationValue { function_name, .. } => {
                assert_eq!(function_name, "Date")
            }
            other => panic!("unexpected root {:?}", other),
        }

        let feature = Computed::constant(Value::Feature(
            FeatureData::new(GeometryData::Point([1.0, 2.0])).with_property("class", 3i64),
        ));
        let serialized = SerializedExpression::from_expr(feature.expr()).unwrap();
        assert_eq!(serialized.count_invocations("Feature"), 1);
        assert_eq!(serialized.count_invocations("GeometryConstructors.Point"), 1);
        assert!(serialized
            .values
            .values()
            .any(|v| *v == SerializedValue::ConstantValue(json!({ "class": 3 }))));
    }

    #[test]
    fn test_list_of_handles_is_array_value() {
        let list = crate::graph::expr::Expr::call("List")
            .arg("0", Image::load("a").expr().clone())
            .arg("1", Image::load("b").expr().clone())
            .build();
        let serialized = SerializedExpression::from_expr(&list).unwrap();
        match serialized.root().unwrap() {
            SerializedValue::ArrayValue { values } => assert_eq!(values.len(), 2),
            other => panic!("unexpected root {:?}", other),
        }
    }

    #[test]
    fn test_image_constant_is_rejected() {
        let image = Image::constant(Value::Image(ImageData::new("S1/a")));
        assert!(matches!(
            SerializedExpression::from_expr(image.expr()),
            Err(RemoteError::Encoding(_))
        ));
    }
}
