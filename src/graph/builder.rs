//! Tools to simplify building graphs in tests.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;
use std::sync::Arc;

use crate::graph::{AttrValue, Graph, Node, ValueInfo};
use crate::infer_shapes::Dim;
use crate::tensor::{DataType, Element, Tensor};

enum ExprKind {
    /// Expression representing a graph input.
    Value(ValueExpr),
    /// Expression representing an initializer.
    Constant(Tensor),
    /// Expression representing an operator node.
    Operator(OperatorExpr),
    /// Expression representing a specific output of an operator node.
    OperatorOutput(OperatorOutputExpr),
}

/// An expression describing a [`Graph`].
///
/// Expressions are constructed using constructor methods and math operators.
/// They are then converted into a graph using [`Expr::build_graph`].
///
/// The following builds a graph computing `(x + 1) * x`:
///
/// ```
/// use onnxsim::Expr;
///
/// let x = Expr::value("x");
/// let expr = (x.clone() + 1.0) * x;
/// let graph = expr.build_graph(["x"]);
/// assert_eq!(graph.nodes.len(), 2);
/// ```
#[derive(Clone)]
pub struct Expr {
    kind: Rc<ExprKind>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Expr {
        Expr { kind: kind.into() }
    }
}

impl Expr {
    /// Create an expression representing a graph input with unknown type.
    pub fn value(name: &str) -> Expr {
        Expr::from(ExprKind::Value(ValueExpr {
            name: name.to_string(),
            dtype: None,
            shape: None,
        }))
    }

    /// Create an expression representing a graph input with type and shape
    /// information.
    pub fn value_with_info(name: &str, dtype: DataType, shape: &[Dim]) -> Expr {
        Expr::from(ExprKind::Value(ValueExpr {
            name: name.to_string(),
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
        }))
    }

    /// Create an expression representing a constant tensor.
    pub fn constant(value: Tensor) -> Expr {
        Expr::from(ExprKind::Constant(value))
    }

    /// Create an expression representing a scalar constant.
    pub fn scalar<T: Element>(value: T) -> Expr {
        Expr::constant(Tensor::from_scalar(value))
    }

    /// Create an expression representing a constant vector.
    pub fn vector<T: Element>(values: Vec<T>) -> Expr {
        Expr::constant(Tensor::from_vec(values))
    }

    /// Create an expression which applies a unary operator to this expression.
    pub fn unary(&self, op_type: &str) -> Expr {
        self.apply(op_type, &[], &[])
    }

    /// Create an expression which applies a binary operator to this expression.
    pub fn binary(&self, op_type: &str, rhs: Expr) -> Expr {
        self.apply(op_type, &[rhs], &[])
    }

    /// Create an expression which applies a single-output operator to this
    /// expression and `operands`.
    pub fn apply(&self, op_type: &str, operands: &[Expr], attrs: &[(&str, AttrValue)]) -> Expr {
        let mut inputs: Vec<_> = [Some(self.clone())].into();
        inputs.extend(operands.iter().cloned().map(Some));
        Expr::op(op_type, inputs, attrs, 1)
    }

    /// Create an expression for an operator with the given inputs and number
    /// of outputs.
    ///
    /// `None` inputs are omitted optional inputs.
    pub fn op(
        op_type: &str,
        inputs: Vec<Option<Expr>>,
        attrs: &[(&str, AttrValue)],
        n_outputs: usize,
    ) -> Expr {
        Expr::from(ExprKind::Operator(OperatorExpr {
            op_type: op_type.to_string(),
            attrs: attrs
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            inputs,
            n_outputs,
        }))
    }

    /// Create an expression which refers to the index'th output of the `self`
    /// operator expression.
    pub fn output(&self, index: usize) -> Expr {
        let ExprKind::Operator(op_info) = self.kind.as_ref() else {
            panic!("can only call `output` on an operator expression");
        };
        assert!(
            index < op_info.n_outputs,
            "can't get output {} for operator with {} outputs",
            index,
            op_info.n_outputs
        );
        Expr::from(ExprKind::OperatorOutput(OperatorOutputExpr {
            op: self.clone(),
            output_index: index,
        }))
    }

    /// Convert this expression into a graph.
    ///
    /// The inputs of the graph are values with names listed in `inputs`. The
    /// output is the value that corresponds to the result of the `self`
    /// expression.
    ///
    /// To create graphs with multiple outputs, use
    /// [`make_graph`](Self::make_graph).
    pub fn build_graph<'a, I: AsRef<[&'a str]>>(self, inputs: I) -> Graph {
        let mut builder = GraphBuilder::default();
        let outputs = self.add_to_graph(&mut builder);

        for name in inputs.as_ref() {
            let info = builder
                .values
                .get(*name)
                .cloned()
                .unwrap_or_else(|| panic!("input \"{}\" passed to `build_graph` not found", name));
            builder.graph.inputs.push(info);
        }
        for name in outputs {
            builder.graph.outputs.push(ValueInfo::new(&name, None, None));
        }
        builder.graph
    }

    /// Create a graph with the given inputs and outputs.
    pub fn make_graph<I: AsRef<[Expr]>, O: AsRef<[Expr]>>(inputs: I, outputs: O) -> Graph {
        let mut builder = GraphBuilder::default();

        let mut output_names: Vec<String> = Vec::new();
        for output in outputs.as_ref() {
            for name in output.add_to_graph(&mut builder) {
                if !output_names.contains(&name) {
                    output_names.push(name);
                }
            }
        }

        let mut input_names: Vec<String> = Vec::new();
        for input in inputs.as_ref() {
            for name in input.add_to_graph(&mut builder) {
                if !input_names.contains(&name) {
                    input_names.push(name);
                }
            }
        }

        for name in input_names {
            if let Some(info) = builder.values.get(&name).cloned() {
                builder.graph.inputs.push(info);
            }
        }
        for name in output_names {
            builder.graph.outputs.push(ValueInfo::new(&name, None, None));
        }
        builder.graph
    }

    fn add_to_graph(&self, builder: &mut GraphBuilder) -> Vec<String> {
        if let Some(names) = builder.expr_outputs.get(&ExprRef(self.clone())) {
            return names.clone();
        }

        let output_names: Vec<String> = match self.kind.as_ref() {
            ExprKind::Value(value) => {
                builder.values.insert(
                    value.name.clone(),
                    ValueInfo::new(&value.name, value.dtype, value.shape.clone()),
                );
                [value.name.clone()].into()
            }
            ExprKind::Constant(value) => {
                let name = builder.name_gen.generate("const");
                builder.graph.set_initializer(&name, Arc::new(value.clone()));
                [name].into()
            }
            ExprKind::Operator(op_info) => {
                let inputs: Vec<String> = op_info
                    .inputs
                    .iter()
                    .map(|input| match input {
                        Some(expr) => expr.add_to_graph(builder).remove(0),
                        None => String::new(),
                    })
                    .collect();
                let outputs: Vec<String> = (0..op_info.n_outputs)
                    .map(|_| {
                        builder
                            .name_gen
                            .generate(&format!("{}_out", op_info.op_type))
                    })
                    .collect();

                let mut node = Node {
                    name: Some(builder.name_gen.generate(&op_info.op_type)),
                    op_type: op_info.op_type.clone(),
                    inputs,
                    outputs: outputs.clone(),
                    ..Default::default()
                };
                for (name, value) in &op_info.attrs {
                    node.set_attr(name, value.clone());
                }
                builder.graph.add_node(node);
                outputs
            }
            ExprKind::OperatorOutput(output_info) => {
                let names = output_info.op.add_to_graph(builder);
                [names[output_info.output_index].clone()].into()
            }
        };
        builder
            .expr_outputs
            .insert(ExprRef(self.clone()), output_names.clone());

        output_names
    }
}

#[derive(Default)]
struct GraphBuilder {
    graph: Graph,
    values: HashMap<String, ValueInfo>,
    expr_outputs: HashMap<ExprRef, Vec<String>>,
    name_gen: NameGenerator,
}

/// Wrapper around an `Expr` which uses reference-equality.
struct ExprRef(Expr);

impl PartialEq for ExprRef {
    fn eq(&self, other: &ExprRef) -> bool {
        Rc::ptr_eq(&self.0.kind, &other.0.kind)
    }
}

impl Eq for ExprRef {}

impl Hash for ExprRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0.kind).hash(state)
    }
}

struct OperatorExpr {
    op_type: String,
    attrs: Vec<(String, AttrValue)>,
    inputs: Vec<Option<Expr>>,
    n_outputs: usize,
}

struct ValueExpr {
    name: String,
    dtype: Option<DataType>,
    shape: Option<Vec<Dim>>,
}

struct OperatorOutputExpr {
    op: Expr,
    output_index: usize,
}

#[derive(Default)]
struct NameGenerator {
    used_names: HashSet<String>,
}

impl NameGenerator {
    fn generate(&mut self, prefix: &str) -> String {
        let mut name = prefix.to_string();
        let mut suffix = 0;
        while self.used_names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", prefix, suffix);
        }
        self.used_names.insert(name.clone());
        name
    }
}

macro_rules! impl_binary_op {
    ($op_trait:ident, $op_method:ident, $op_type: literal) => {
        impl $op_trait for Expr {
            type Output = Expr;

            fn $op_method(self, rhs: Expr) -> Expr {
                self.binary($op_type, rhs)
            }
        }

        impl $op_trait<f32> for Expr {
            type Output = Expr;

            fn $op_method(self, rhs: f32) -> Expr {
                self.binary($op_type, Expr::scalar(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, "Add");
impl_binary_op!(Mul, mul, "Mul");
impl_binary_op!(Div, div, "Div");
impl_binary_op!(Sub, sub, "Sub");

/// Create a [`Dim`] array from a list of symbolic names and fixed sizes.
#[macro_export]
macro_rules! dims {
    ($($x:expr),* $(,)?) => {
        [$($crate::infer_shapes::Dim::from($x)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::Expr;
    use crate::graph::AttrValue;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_build_graph() {
        // Build an expression with a reused subexpression (`x_sqr`).
        let x = Expr::value("x");
        let x_sqr = x.clone() * x.clone();
        let expr = x_sqr.clone() * x_sqr + 2.0;
        let graph = expr.build_graph(["x"]);

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.initializers.len(), 1);
        assert_eq!(graph.inputs[0].name, "x");
        assert_eq!(graph.outputs.len(), 1);

        let ops: Vec<_> = graph.nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, ["Mul", "Mul", "Add"]);
        graph.validate(&FxHashSet::default()).unwrap();
    }

    #[test]
    fn test_make_graph_with_multiple_outputs() {
        let x = Expr::value("x");
        let split = Expr::op(
            "Split",
            vec![Some(x.clone())],
            &[("axis", AttrValue::Int(0))],
            2,
        );
        let graph = Expr::make_graph([x], [split.output(0), split.output(1)]);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.outputs.len(), 2);
        assert_eq!(graph.nodes[0].attr("axis").map(|a| matches!(a, AttrValue::Int(0))), Some(true));
    }
}
