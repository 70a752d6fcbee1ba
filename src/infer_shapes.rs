//! Shape and type inference.
//!
//! Inference propagates the element type, shape and, for small integer
//! tensors such as shapes, the values of tensors forward through a graph.
//! Dimensions can be fixed sizes or symbolic expressions (see [`SymExpr`]).
//! Each operator provides a rule via the [`InferShapes`] trait. When a rule
//! cannot determine a dimension, it reports [`Dim::Unknown`] rather than
//! failing.
//!
//! This module also provides implementations of shape inference that are
//! reused by many operators, such as unary and binary ops.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

use crate::graph::{AttrValue, Graph, Node, ValueInfo};
use crate::op_registry::OpRegistry;
use crate::tensor::{DataType, Tensor};

mod sym_expr;

pub use sym_expr::{fixed_shape, is_static, Dim, SymExpr};

/// Maximum number of elements for which tensor values are tracked.
pub const MAX_TRACKED_VALUES: usize = 64;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this operator.
    #[error("incorrect input count")]
    IncorrectInputCount,

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    #[error("incompatible input shapes")]
    IncompatibleShapes,

    /// An input's rank does not match that expected by the operator.
    #[error("incorrect input rank")]
    IncorrectRank,

    /// An operator input or attribute has an invalid value.
    #[error("invalid input or attribute value")]
    InvalidValue,
}

/// Inferred type, shape and optionally values of a tensor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeInfo {
    pub dtype: Option<DataType>,

    /// Dimension sizes, or `None` if the rank is unknown.
    pub shape: Option<Vec<Dim>>,

    /// Elements of a scalar or vector with integer values, if known.
    pub values: Option<Vec<SymExpr>>,
}

impl ShapeInfo {
    /// Return a `ShapeInfo` with nothing known.
    pub fn unknown() -> ShapeInfo {
        ShapeInfo::default()
    }

    pub fn new(dtype: Option<DataType>, shape: Option<Vec<Dim>>) -> ShapeInfo {
        ShapeInfo {
            dtype,
            shape,
            values: None,
        }
    }

    /// Create info for a vector with known (possibly symbolic) elements.
    pub fn from_values(dtype: DataType, values: Vec<SymExpr>) -> ShapeInfo {
        ShapeInfo {
            dtype: Some(dtype),
            shape: Some(vec![Dim::Fixed(values.len() as u64)]),
            values: Some(values),
        }
    }

    /// Create info for a scalar with a known (possibly symbolic) value.
    pub fn from_scalar(dtype: DataType, value: SymExpr) -> ShapeInfo {
        ShapeInfo {
            dtype: Some(dtype),
            shape: Some(Vec::new()),
            values: Some(vec![value]),
        }
    }

    /// Create info describing a concrete tensor.
    pub fn from_tensor(tensor: &Tensor) -> ShapeInfo {
        let values = if tensor.ndim() <= 1 && tensor.len() <= MAX_TRACKED_VALUES {
            tensor
                .to_i64_vec()
                .filter(|_| !tensor.dtype().is_float())
                .map(|v| v.into_iter().map(SymExpr::Value).collect())
        } else {
            None
        };
        ShapeInfo {
            dtype: Some(tensor.dtype()),
            shape: Some(tensor.shape().iter().map(|d| Dim::Fixed(*d as u64)).collect()),
            values,
        }
    }

    /// Create info from a declared type and shape.
    pub fn from_value_info(info: &ValueInfo) -> ShapeInfo {
        ShapeInfo::new(info.dtype, info.shape.clone())
    }

    pub fn ndim(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }

    /// Return the shape if all dimensions are fixed.
    pub fn fixed_shape(&self) -> Option<Vec<usize>> {
        self.shape.as_deref().and_then(fixed_shape)
    }

    /// Return the values if they are all known integers.
    pub fn constant_values(&self) -> Option<Vec<i64>> {
        self.values
            .as_ref()?
            .iter()
            .map(|v| v.as_value())
            .collect()
    }

    /// Return the values as dimension sizes, if they are known.
    ///
    /// Negative values produce [`Dim::Unknown`].
    pub fn values_as_dims(&self) -> Option<Vec<Dim>> {
        self.values
            .as_ref()
            .map(|v| v.iter().cloned().map(Dim::from_expr).collect())
    }

    /// Return a copy of this info with values cleared.
    pub fn without_values(&self) -> ShapeInfo {
        ShapeInfo::new(self.dtype, self.shape.clone())
    }

    /// Combine info about a value that may come from one of two sources, such
    /// as the branches of an `If` node.
    ///
    /// Only facts that hold for both sources are kept.
    pub fn merge(&self, other: &ShapeInfo) -> ShapeInfo {
        let dtype = if self.dtype == other.dtype {
            self.dtype
        } else {
            None
        };
        let shape = match (&self.shape, &other.shape) {
            (Some(a), Some(b)) if a.len() == b.len() => Some(
                a.iter()
                    .zip(b)
                    .map(|(a, b)| if a == b { a.clone() } else { Dim::Unknown })
                    .collect(),
            ),
            _ => None,
        };
        let values = if self.values == other.values {
            self.values.clone()
        } else {
            None
        };
        ShapeInfo {
            dtype,
            shape,
            values,
        }
    }

    /// Fill in gaps in inferred info using a declared type and shape.
    fn refine_with(mut self, declared: &ValueInfo) -> ShapeInfo {
        if self.dtype.is_none() {
            self.dtype = declared.dtype;
        }
        self.shape = match (self.shape.take(), &declared.shape) {
            (Some(inferred), Some(decl)) if inferred.len() == decl.len() => Some(
                inferred
                    .into_iter()
                    .zip(decl)
                    .map(|(inf, decl)| match inf {
                        Dim::Unknown => decl.clone(),
                        inf => inf,
                    })
                    .collect(),
            ),
            (Some(inferred), _) => Some(inferred),
            (None, decl) => decl.clone(),
        };
        self
    }
}

/// Infer the types and shapes of an operator's outputs given its inputs.
pub trait InferShapes {
    /// Infer the type, shape and optionally values of each output.
    ///
    /// `inputs` has one entry per operator input. Omitted optional inputs are
    /// `None`.
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError>;
}

/// Return the `index`th input, or an error if it is missing.
pub fn require_input(
    inputs: &[Option<ShapeInfo>],
    index: usize,
) -> Result<&ShapeInfo, InferShapesError> {
    inputs
        .get(index)
        .and_then(|i| i.as_ref())
        .ok_or(InferShapesError::IncorrectInputCount)
}

/// Resolve a possibly negative axis against a rank.
pub fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, InferShapesError> {
    let resolved = if axis < 0 { axis + ndim as i64 } else { axis };
    if resolved < 0 || resolved >= ndim as i64 {
        return Err(InferShapesError::InvalidValue);
    }
    Ok(resolved as usize)
}

/// Shape inference for unary operators.
///
/// These operators take at least one input and return a single output with
/// the same type and shape as the first input. Unary operators may take
/// additional inputs (eg. min/max parameters for `Clip`) that don't affect
/// the output shape.
pub struct UnaryOp;

impl InferShapes for UnaryOp {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let data = require_input(inputs, 0)?;
        Ok([data.without_values()].into())
    }
}

/// Broadcast two shapes together following ONNX's
/// [broadcasting rules](https://onnx.ai/onnx/repo-docs/Broadcasting.html).
pub fn broadcast_dims(a: &[Dim], b: &[Dim]) -> Result<Vec<Dim>, InferShapesError> {
    let ndim = a.len().max(b.len());
    let a_pad = ndim - a.len();
    let b_pad = ndim - b.len();
    let one = Dim::Fixed(1);

    let mut out = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let a = if i < a_pad { &one } else { &a[i - a_pad] };
        let b = if i < b_pad { &one } else { &b[i - b_pad] };
        let dim = match (a, b) {
            (a, b) if a == b => a.clone(),

            // If either size is 1, it will be broadcast against the other
            // size.
            (Dim::Fixed(1), b) => b.clone(),
            (a, Dim::Fixed(1)) => a.clone(),

            // Two different fixed sizes can never be broadcast.
            (Dim::Fixed(_), Dim::Fixed(_)) => return Err(InferShapesError::IncompatibleShapes),

            // If one size is fixed and not 1, execution can only succeed if
            // the other has the same size.
            (Dim::Fixed(size), _) | (_, Dim::Fixed(size)) => Dim::Fixed(*size),

            // When both are symbolic, the result is the larger of the two if
            // execution succeeds.
            (Dim::Symbolic(a), Dim::Symbolic(b)) => Dim::from_expr(a.max(b)),
            _ => Dim::Unknown,
        };
        out.push(dim);
    }
    Ok(out)
}

/// Shape inference for elementwise binary operators.
///
/// Output shapes are the result of broadcasting the two input shapes. If
/// `values` is set, it is used to compute the output values of scalar and
/// vector inputs with known values.
pub struct BinaryOp {
    /// Output type, if different from the input type.
    pub output_dtype: Option<DataType>,
    pub values: Option<fn(SymExpr, SymExpr) -> Option<SymExpr>>,
}

impl InferShapes for BinaryOp {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let a = require_input(inputs, 0)?;
        let b = require_input(inputs, 1)?;

        let shape = match (&a.shape, &b.shape) {
            (Some(a), Some(b)) => Some(broadcast_dims(a, b)?),
            _ => None,
        };
        let dtype = self.output_dtype.or(a.dtype).or(b.dtype);

        let values = match (self.values, &a.values, &b.values, &shape) {
            (Some(op), Some(av), Some(bv), Some(shape)) if shape.len() <= 1 => {
                let len = av.len().max(bv.len());
                if (av.len() == len || av.len() == 1) && (bv.len() == len || bv.len() == 1) {
                    (0..len)
                        .map(|i| {
                            let x = av[if av.len() == 1 { 0 } else { i }].clone();
                            let y = bv[if bv.len() == 1 { 0 } else { i }].clone();
                            op(x, y)
                        })
                        .collect()
                } else {
                    None
                }
            }
            _ => None,
        };

        Ok([ShapeInfo {
            dtype,
            shape,
            values,
        }]
        .into())
    }
}

/// Inferred information about each value in a graph, by name.
pub type ShapeMap = FxHashMap<String, ShapeInfo>;

/// Infer shapes for all values defined in `graph`.
///
/// `outer` contains information about values in enclosing scopes, which
/// subgraphs can read. The returned map contains entries for the graph's
/// inputs, initializers and node outputs, but not for outer values.
///
/// Running inference twice on the same graph produces the same result.
pub fn infer_shapes(graph: &Graph, outer: &ShapeMap, registry: &OpRegistry) -> ShapeMap {
    let mut shapes = ShapeMap::default();

    for input in &graph.inputs {
        let mut info = ShapeInfo::from_value_info(input);

        // Give unnamed dynamic dimensions a name, so that dimensions derived
        // from them can be compared.
        if let Some(shape) = info.shape.as_mut() {
            for (i, dim) in shape.iter_mut().enumerate() {
                if *dim == Dim::Unknown {
                    *dim = Dim::symbol(&format!("{}_dim{}", input.name, i));
                }
            }
        }
        shapes.insert(input.name.clone(), info);
    }
    for init in &graph.initializers {
        shapes.insert(init.name.clone(), ShapeInfo::from_tensor(&init.value));
    }

    // A value may be declared both in `value_info` and as an output. Each
    // declaration fills in what the earlier ones left unknown.
    let mut declared: FxHashMap<&str, Vec<&ValueInfo>> = FxHashMap::default();
    for info in graph.value_info.iter().chain(graph.outputs.iter()) {
        declared.entry(info.name.as_str()).or_default().push(info);
    }

    let order = graph
        .topological_order()
        .unwrap_or_else(|_| (0..graph.nodes.len()).collect());

    for node_idx in order {
        let node = &graph.nodes[node_idx];
        let inputs: Vec<Option<ShapeInfo>> = node
            .inputs
            .iter()
            .map(|name| {
                if name.is_empty() {
                    None
                } else {
                    Some(
                        shapes
                            .get(name)
                            .or_else(|| outer.get(name))
                            .cloned()
                            .unwrap_or_default(),
                    )
                }
            })
            .collect();

        let outputs = match infer_node(node, &inputs, &shapes, outer, registry) {
            Ok(outputs) => outputs,
            Err(err) => {
                trace!(
                    "Shape inference failed for {} node \"{}\": {}",
                    node.op_type,
                    node.display_name(),
                    err
                );
                Vec::new()
            }
        };

        for (i, name) in node.outputs.iter().enumerate() {
            if name.is_empty() {
                continue;
            }
            let mut info = outputs.get(i).cloned().unwrap_or_default();
            for decl in declared.get(name.as_str()).into_iter().flatten() {
                info = info.refine_with(decl);
            }
            shapes.insert(name.clone(), info);
        }
    }

    shapes
}

/// Error for operators which have no shape rule.
#[derive(Debug, Error)]
enum InferNodeError {
    #[error("no shape rule")]
    NoRule,
    #[error("{0}")]
    Rule(#[from] InferShapesError),
}

fn infer_node(
    node: &Node,
    inputs: &[Option<ShapeInfo>],
    local: &ShapeMap,
    outer: &ShapeMap,
    registry: &OpRegistry,
) -> Result<Vec<ShapeInfo>, InferNodeError> {
    if node.is_default_domain() {
        match node.op_type.as_str() {
            "If" => return infer_if(node, inputs, local, outer, registry),
            "Loop" => return infer_loop(node, inputs, local, outer, registry),
            _ => {}
        }
    }

    let op = registry.read_op(node).map_err(|_| InferNodeError::NoRule)?;
    let rule = op.as_infer_shapes().ok_or(InferNodeError::NoRule)?;
    Ok(rule.infer_shapes(inputs)?)
}

/// Return the scope visible to subgraphs of a node.
fn subgraph_scope(local: &ShapeMap, outer: &ShapeMap) -> ShapeMap {
    let mut scope = outer.clone();
    scope.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
    scope
}

/// Infer the output info of a subgraph.
fn infer_subgraph_outputs(graph: &Graph, scope: &ShapeMap, registry: &OpRegistry) -> Vec<ShapeInfo> {
    let shapes = infer_shapes(graph, scope, registry);
    graph
        .outputs
        .iter()
        .map(|output| {
            shapes
                .get(&output.name)
                .or_else(|| scope.get(&output.name))
                .cloned()
                .unwrap_or_default()
                .refine_with(output)
        })
        .collect()
}

fn graph_attr<'a>(node: &'a Node, name: &str) -> Result<&'a Graph, InferNodeError> {
    match node.attr(name) {
        Some(AttrValue::Graph(g)) => Ok(g),
        _ => Err(InferShapesError::InvalidValue.into()),
    }
}

fn infer_if(
    node: &Node,
    inputs: &[Option<ShapeInfo>],
    local: &ShapeMap,
    outer: &ShapeMap,
    registry: &OpRegistry,
) -> Result<Vec<ShapeInfo>, InferNodeError> {
    let then_branch = graph_attr(node, "then_branch")?;
    let else_branch = graph_attr(node, "else_branch")?;
    let scope = subgraph_scope(local, outer);

    let cond = require_input(inputs, 0)?.constant_values();
    let outputs = match cond.as_deref() {
        Some([c]) if *c != 0 => infer_subgraph_outputs(then_branch, &scope, registry),
        Some([_]) => infer_subgraph_outputs(else_branch, &scope, registry),
        _ => {
            let then_out = infer_subgraph_outputs(then_branch, &scope, registry);
            let else_out = infer_subgraph_outputs(else_branch, &scope, registry);
            then_out
                .iter()
                .zip(&else_out)
                .map(|(t, e)| t.merge(e))
                .collect()
        }
    };
    Ok(outputs)
}

fn infer_loop(
    node: &Node,
    inputs: &[Option<ShapeInfo>],
    local: &ShapeMap,
    outer: &ShapeMap,
    registry: &OpRegistry,
) -> Result<Vec<ShapeInfo>, InferNodeError> {
    let body = graph_attr(node, "body")?;
    let scope = subgraph_scope(local, outer);
    let body_outputs = infer_subgraph_outputs(body, &scope, registry);

    // Body outputs are (cond, carried values..., scan outputs...).
    let n_carried = inputs.len().saturating_sub(2);
    let mut outputs = Vec::with_capacity(node.outputs.len());
    for (i, body_out) in body_outputs.iter().enumerate().skip(1) {
        let info = if i <= n_carried {
            // Carried values may change across iterations. Keep only facts
            // which hold for both the initial and updated values.
            let initial = inputs
                .get(i + 1)
                .and_then(|info| info.clone())
                .unwrap_or_default();
            initial.merge(&body_out.without_values())
        } else {
            let shape = body_out.shape.as_ref().map(|s| {
                let mut shape = vec![Dim::Unknown];
                shape.extend(s.iter().cloned());
                shape
            });
            ShapeInfo::new(body_out.dtype, shape)
        };
        outputs.push(info);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests;
