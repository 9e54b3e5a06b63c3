//! Deferred expression nodes.
//!
//! An [`Expr`] describes a computation without running it. Nodes are
//! immutable and shared through `Arc`, so an expression is a DAG: the
//! reference image of a registration run appears once no matter how many
//! images are aligned to it.

use crate::core::types::Value;
use indexmap::IndexMap;
use std::sync::Arc;

/// A node of the deferred computation graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Constant(Value),
    /// Call of a service function with named arguments (order preserved)
    Invocation {
        function: String,
        arguments: IndexMap<String, Arc<Expr>>,
    },
    /// Reference to a parameter of the enclosing [`Expr::Function`]
    Argument(String),
    /// Anonymous function, e.g. the body passed to `Collection.map`
    Function {
        parameters: Vec<String>,
        body: Arc<Expr>,
    },
}

impl Expr {
    /// Start building an invocation of `function`.
    pub fn call(function: impl Into<String>) -> InvocationBuilder {
        InvocationBuilder {
            function: function.into(),
            arguments: IndexMap::new(),
        }
    }

    /// Wrap a literal.
    pub fn constant(value: impl Into<Value>) -> Arc<Expr> {
        Arc::new(Expr::Constant(value.into()))
    }

    /// Name of the invoked function, if this is an invocation.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Expr::Invocation { function, .. } => Some(function),
            _ => None,
        }
    }

    /// Named argument of an invocation.
    pub fn argument(&self, name: &str) -> Option<&Arc<Expr>> {
        match self {
            Expr::Invocation { arguments, .. } => arguments.get(name),
            _ => None,
        }
    }

    /// Literal value, if this is a constant.
    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Count invocations of `function` anywhere in the tree.
    ///
    /// Shared sub-expressions are counted once per path that reaches them.
    #[cfg(test)]
    pub fn count_calls(&self, function: &str) -> usize {
        match self {
            Expr::Constant(_) | Expr::Argument(_) => 0,
            Expr::Invocation {
                function: name,
                arguments,
            } => {
                let own = usize::from(name == function);
                own + arguments
                    .values()
                    .map(|a| a.count_calls(function))
                    .sum::<usize>()
            }
            Expr::Function { body, .. } => body.count_calls(function),
        }
    }
}

/// Builder for [`Expr::Invocation`].
pub struct InvocationBuilder {
    function: String,
    arguments: IndexMap<String, Arc<Expr>>,
}

impl InvocationBuilder {
    /// Add an argument.
    pub fn arg(mut self, name: impl Into<String>, expr: Arc<Expr>) -> Self {
        self.arguments.insert(name.into(), expr);
        self
    }

    /// Add a literal argument.
    pub fn constant(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arg(name, Expr::constant(value))
    }

    /// Finish the invocation.
    pub fn build(self) -> Arc<Expr> {
        Arc::new(Expr::Invocation {
            function: self.function,
            arguments: self.arguments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let expr = Expr::call("Image.load").constant("id", "S1/scene_a").build();
        assert_eq!(expr.function_name(), Some("Image.load"));
        assert_eq!(
            expr.argument("id").and_then(|a| a.as_constant()),
            Some(&Value::String("S1/scene_a".to_string()))
        );
    }

    #[test]
    fn test_count_calls_through_shared_nodes() {
        let reference = Expr::call("Image.load").constant("id", "a").build();
        let moving = Expr::call("Image.load").constant("id", "b").build();
        let registered = Expr::call("Image.register")
            .arg("image", moving)
            .arg("referenceImage", reference.clone())
            .constant("maxOffset", 10.0)
            .build();
        assert_eq!(registered.count_calls("Image.load"), 2);
        assert_eq!(registered.count_calls("Image.register"), 1);
        assert_eq!(reference.count_calls("Image.register"), 0);
    }
}
