//! Local rewrite rules.
//!
//! Each rule inspects a node and its neighborhood and may produce a
//! [`Rewrite`] that removes the node or replaces it with a cheaper
//! equivalent. Rules are tried in a fixed priority order and the first one
//! that applies to a node wins.

use std::cell::RefCell;
use std::sync::Arc;

use onnxsim_onnx::onnx;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::diagnostics::Diagnostics;
use super::pattern_matcher::{MatchGraph, Pattern};
use super::Scope;
use crate::error::SimplifyError;
use crate::graph::{AttrValue, Graph, Node};
use crate::infer_shapes::{Dim, ShapeInfo, ShapeMap};
use crate::op_registry::OpRegistry;
use crate::options::SimplifyOptions;
use crate::tensor::{DataType, Tensor};

/// Names of all rewrite rules, in priority order.
pub const REWRITE_NAMES: [&str; 14] = [
    "eliminate_identity",
    "eliminate_nop_dropout",
    "eliminate_nop_cast",
    "eliminate_nop_reshape",
    "eliminate_nop_transpose",
    "eliminate_nop_expand",
    "eliminate_nop_arithmetic",
    "fuse_consecutive_reshapes",
    "fuse_consecutive_transposes",
    "fuse_consecutive_squeeze_unsqueeze",
    "fuse_bn_into_conv",
    "fuse_matmul_add_into_gemm",
    "eliminate_deduplicated_initializers",
    "eliminate_common_subexpressions",
];

/// Change to a graph produced by a rule.
#[derive(Debug)]
pub enum Rewrite {
    /// Remove the node and make readers of each `(from, to)` pair's `from`
    /// value read `to` instead.
    Forward(Vec<(String, String)>),

    /// Replace the node with new nodes which produce the outputs that are
    /// still used, adding new initializers.
    Replace {
        nodes: Vec<Node>,
        initializers: Vec<(String, Tensor)>,
    },
}

/// Generates value names which are not used anywhere in a graph, its
/// subgraphs or enclosing scopes.
pub struct NameGen {
    used: FxHashSet<String>,
}

impl NameGen {
    pub fn new(graph: &Graph, scope: &Scope) -> NameGen {
        let mut used = scope.names.clone();
        collect_names(graph, &mut used);
        NameGen { used }
    }

    pub fn generate(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut suffix = 0;
        while self.used.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", base, suffix);
        }
        self.used.insert(name.clone());
        name
    }
}

fn collect_names(graph: &Graph, names: &mut FxHashSet<String>) {
    names.extend(graph.inputs.iter().map(|i| i.name.clone()));
    names.extend(graph.initializers.iter().map(|i| i.name.clone()));
    for node in &graph.nodes {
        names.extend(node.present_outputs().map(|o| o.to_string()));
        for (_, subgraph) in node.subgraphs() {
            collect_names(subgraph, names);
        }
    }
}

/// Read-only view of a graph used by rules.
pub struct RewriteContext<'a> {
    graph: &'a Graph,
    shapes: &'a ShapeMap,
    scope: &'a Scope,
    registry: &'a OpRegistry,
    producers: FxHashMap<&'a str, usize>,
    use_counts: FxHashMap<&'a str, usize>,
    names: &'a RefCell<NameGen>,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        graph: &'a Graph,
        shapes: &'a ShapeMap,
        scope: &'a Scope,
        registry: &'a OpRegistry,
        names: &'a RefCell<NameGen>,
    ) -> Self {
        RewriteContext {
            graph,
            shapes,
            scope,
            registry,
            producers: graph.producers(),
            use_counts: graph.use_counts(),
            names,
        }
    }

    fn node(&self, idx: usize) -> &'a Node {
        &self.graph.nodes[idx]
    }

    fn shape_info(&self, name: &str) -> Option<&ShapeInfo> {
        self.shapes.get(name).or_else(|| self.scope.shapes.get(name))
    }

    fn dtype(&self, name: &str) -> Option<DataType> {
        self.shape_info(name)?.dtype
    }

    fn rank(&self, name: &str) -> Option<usize> {
        self.shape_info(name)?.ndim()
    }

    /// Return the shape of a value if every dimension is fixed or symbolic.
    fn known_shape(&self, name: &str) -> Option<&[Dim]> {
        self.shape_info(name)?
            .shape
            .as_deref()
            .filter(|dims| dims.iter().all(|d| *d != Dim::Unknown))
    }

    /// Return true if a value is read by a node or is a graph output.
    fn is_used(&self, name: &str) -> bool {
        self.use_counts.get(name).copied().unwrap_or(0) > 0
    }

    /// Return true if a value has exactly one reader, which is a node.
    fn used_once(&self, name: &str) -> bool {
        self.use_counts.get(name).copied() == Some(1) && !self.graph.is_output(name)
    }

    /// Read an integer list given either as attribute `attr` or as constant
    /// input `input`, as operators do in different opset versions.
    fn ints_arg(&self, node: &Node, attr: &str, input: usize) -> Option<Vec<i64>> {
        match node.attr(attr) {
            Some(AttrValue::Ints(values)) => Some(values.clone()),
            Some(_) => None,
            None => self.constant(node.input(input)?)?.to_i64_vec(),
        }
    }

    /// Return true if `rewrite` of the node at `node_idx` keeps every graph
    /// output defined under its current name.
    fn is_applicable(&self, node_idx: usize, rewrite: &Rewrite) -> bool {
        match rewrite {
            Rewrite::Forward(pairs) => {
                let mut renamed: SmallVec<[&str; 2]> = SmallVec::new();
                for (from, to) in pairs {
                    if !self.graph.is_output(from) {
                        continue;
                    }
                    // The producer of `to` is renamed to `from`, which is only
                    // possible if it is a local node output with no other
                    // external name.
                    let local = self.producers.get(to.as_str()).is_some_and(|p| *p != node_idx);
                    if !local || self.graph.is_output(to) || renamed.contains(&to.as_str()) {
                        return false;
                    }
                    renamed.push(to);
                }
                true
            }
            Rewrite::Replace { nodes, .. } => {
                let new_outputs: FxHashSet<&str> =
                    nodes.iter().flat_map(|n| n.present_outputs()).collect();
                self.node(node_idx)
                    .present_outputs()
                    .all(|out| new_outputs.contains(out) || !self.is_used(out))
            }
        }
    }
}

impl MatchGraph for RewriteContext<'_> {
    fn producer(&self, value: &str) -> Option<(usize, &Node)> {
        let idx = *self.producers.get(value)?;
        Some((idx, &self.graph.nodes[idx]))
    }

    fn constant(&self, value: &str) -> Option<&Tensor> {
        self.graph
            .initializer(value)
            .or_else(|| self.scope.constants.get(value))
            .map(|t| t.as_ref())
            .filter(|t| t.is_evaluable())
    }
}

/// A local graph rewrite.
pub trait RewriteRule {
    fn name(&self) -> &'static str;

    /// Try to rewrite the node at `node_idx`.
    fn rewrite(&self, _ctx: &RewriteContext, _node_idx: usize) -> Option<Rewrite> {
        None
    }

    /// Rewrite the graph as a whole, returning the number of changes.
    ///
    /// This is used by rules which operate on initializers rather than
    /// nodes.
    fn rewrite_graph(&self, _graph: &mut Graph) -> usize {
        0
    }
}

fn is_op(node: &Node, op_type: &str) -> bool {
    node.op_type == op_type && node.is_default_domain()
}

/// Remove a node with one used output, which is equal to `input`.
fn forward(node: &Node, input: &str) -> Option<Rewrite> {
    let output = node.outputs.first().filter(|o| !o.is_empty())?;
    Some(Rewrite::Forward(vec![(output.clone(), input.to_string())]))
}

/// Resolve axes against `ndim` and sort them.
fn normalize_axes(axes: &[i64], ndim: usize) -> Option<Vec<usize>> {
    let mut resolved = axes
        .iter()
        .map(|&axis| {
            let axis = if axis < 0 { axis + ndim as i64 } else { axis };
            usize::try_from(axis).ok().filter(|a| *a < ndim)
        })
        .collect::<Option<Vec<_>>>()?;
    resolved.sort();
    Some(resolved)
}

/// Return the permutation of a `Transpose` node.
fn transpose_perm(ctx: &RewriteContext, node: &Node) -> Option<Vec<usize>> {
    match node.attr("perm") {
        Some(AttrValue::Ints(perm)) => perm.iter().map(|p| usize::try_from(*p).ok()).collect(),
        Some(_) => None,
        // The default reverses the dimensions.
        None => Some((0..ctx.rank(node.input(0)?)?).rev().collect()),
    }
}

struct EliminateIdentity;

impl RewriteRule for EliminateIdentity {
    fn name(&self) -> &'static str {
        "eliminate_identity"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Identity") {
            return None;
        }
        forward(node, node.input(0)?)
    }
}

/// Remove `Dropout` in inference mode when its mask output is unused.
struct EliminateNopDropout;

impl RewriteRule for EliminateNopDropout {
    fn name(&self) -> &'static str {
        "eliminate_nop_dropout"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Dropout") || !ctx.registry.read_op(node).ok()?.is_deterministic() {
            return None;
        }
        if node.outputs.iter().skip(1).any(|mask| !mask.is_empty() && ctx.is_used(mask)) {
            return None;
        }
        if let Some(mode) = node.input(2) {
            if ctx.constant(mode)?.item::<bool>()? {
                return None;
            }
        }
        forward(node, node.input(0)?)
    }
}

/// Remove casts to the type the input already has.
struct EliminateNopCast;

impl RewriteRule for EliminateNopCast {
    fn name(&self) -> &'static str {
        "eliminate_nop_cast"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        let input = node.input(0)?;
        let input_dtype = ctx.dtype(input)?;
        let target = if is_op(node, "Cast") {
            match node.attr("to") {
                Some(AttrValue::Int(to)) => DataType::from_onnx(onnx::DataType(*to as i32))?,
                _ => return None,
            }
        } else if is_op(node, "CastLike") {
            ctx.dtype(node.input(1)?)?
        } else {
            return None;
        };
        if target != input_dtype {
            return None;
        }
        forward(node, input)
    }
}

/// Remove `Reshape` nodes whose output shape equals the input shape.
struct EliminateNopReshape;

impl RewriteRule for EliminateNopReshape {
    fn name(&self) -> &'static str {
        "eliminate_nop_reshape"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Reshape") {
            return None;
        }
        let input = node.input(0)?;
        let in_shape = ctx.known_shape(input)?;
        let out_shape = ctx.known_shape(node.outputs.first()?)?;
        if in_shape != out_shape {
            return None;
        }
        forward(node, input)
    }
}

struct EliminateNopTranspose;

impl RewriteRule for EliminateNopTranspose {
    fn name(&self) -> &'static str {
        "eliminate_nop_transpose"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Transpose") {
            return None;
        }
        let perm = transpose_perm(ctx, node)?;
        if !perm.iter().enumerate().all(|(i, p)| i == *p) {
            return None;
        }
        forward(node, node.input(0)?)
    }
}

/// Remove `Expand` nodes whose output shape equals the input shape.
struct EliminateNopExpand;

impl RewriteRule for EliminateNopExpand {
    fn name(&self) -> &'static str {
        "eliminate_nop_expand"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Expand") {
            return None;
        }
        let input = node.input(0)?;
        if ctx.known_shape(input)? != ctx.known_shape(node.outputs.first()?)? {
            return None;
        }
        forward(node, input)
    }
}

/// Remove `x + 0`, `x - 0`, `x * 1` and `x / 1` where broadcasting with the
/// constant does not change the shape of `x`.
struct EliminateNopArithmetic {
    patterns: Vec<Pattern>,
}

impl EliminateNopArithmetic {
    fn new() -> Self {
        let x = || Pattern::symbol("x");
        EliminateNopArithmetic {
            patterns: vec![x() + 0.0, x() - 0.0, x() * 1.0, x() / 1.0],
        }
    }
}

impl RewriteRule for EliminateNopArithmetic {
    fn name(&self) -> &'static str {
        "eliminate_nop_arithmetic"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !node.is_default_domain()
            || !matches!(node.op_type.as_str(), "Add" | "Sub" | "Mul" | "Div")
        {
            return None;
        }
        let output = node.outputs.first()?;
        let pat_match = self.patterns.iter().find_map(|pat| pat.test(output, ctx))?;
        let x = pat_match.value("x")?;

        if ctx.known_shape(x)? != ctx.known_shape(output)? {
            return None;
        }
        if ctx.dtype(x).is_none() || ctx.dtype(x) != ctx.dtype(output) {
            return None;
        }
        forward(node, x)
    }
}

/// Replace `Reshape(Reshape(x, s1), s2)` with `Reshape(x, s2)`.
struct FuseConsecutiveReshapes {
    pattern: Pattern,
}

impl FuseConsecutiveReshapes {
    fn new() -> Self {
        let inner = Pattern::binary_op("Reshape", Pattern::symbol("x"), Pattern::symbol("s1"));
        FuseConsecutiveReshapes {
            pattern: Pattern::binary_op("Reshape", inner, Pattern::const_symbol("shape")),
        }
    }
}

impl RewriteRule for FuseConsecutiveReshapes {
    fn name(&self) -> &'static str {
        "fuse_consecutive_reshapes"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Reshape") {
            return None;
        }
        let pat_match = self.pattern.test(node.outputs.first()?, ctx)?;
        let x = pat_match.value("x")?;
        let shape = ctx.constant(pat_match.value("shape")?)?.to_i64_vec()?;

        // A zero copies a dimension from the input, which differs once the
        // inner reshape is removed.
        let allow_zero = matches!(node.attr("allowzero"), Some(AttrValue::Int(1)));
        if shape.contains(&0) && !allow_zero {
            return None;
        }

        let mut fused = node.clone();
        fused.inputs[0] = x.to_string();
        Some(Rewrite::Replace {
            nodes: vec![fused],
            initializers: Vec::new(),
        })
    }
}

/// Replace `Transpose(Transpose(x, p1), p2)` with a single transpose.
struct FuseConsecutiveTransposes;

impl RewriteRule for FuseConsecutiveTransposes {
    fn name(&self) -> &'static str {
        "fuse_consecutive_transposes"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Transpose") {
            return None;
        }
        let (_, inner) = ctx.producer(node.input(0)?)?;
        if !is_op(inner, "Transpose") {
            return None;
        }
        let outer_perm = transpose_perm(ctx, node)?;
        let inner_perm = transpose_perm(ctx, inner)?;
        if outer_perm.len() != inner_perm.len() {
            return None;
        }
        let perm = outer_perm
            .iter()
            .map(|&p| inner_perm.get(p).map(|ip| *ip as i64))
            .collect::<Option<Vec<_>>>()?;

        let mut fused = node.clone();
        fused.inputs[0] = inner.input(0)?.to_string();
        fused.set_attr("perm", AttrValue::Ints(perm));
        Some(Rewrite::Replace {
            nodes: vec![fused],
            initializers: Vec::new(),
        })
    }
}

/// Remove `Squeeze(Unsqueeze(x, axes), axes)` and
/// `Unsqueeze(Squeeze(x, axes), axes)` pairs.
struct FuseConsecutiveSqueezeUnsqueeze;

impl RewriteRule for FuseConsecutiveSqueezeUnsqueeze {
    fn name(&self) -> &'static str {
        "fuse_consecutive_squeeze_unsqueeze"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        let (_, inner) = ctx.producer(node.input(0)?)?;
        let x = inner.input(0)?;

        let squeeze_outer = if is_op(node, "Squeeze") && is_op(inner, "Unsqueeze") {
            true
        } else if is_op(node, "Unsqueeze") && is_op(inner, "Squeeze") {
            false
        } else {
            return None;
        };

        let outer_axes = ctx.ints_arg(node, "axes", 1)?;
        let inner_axes = ctx.ints_arg(inner, "axes", 1)?;

        // Both axis lists refer to dimensions of the unsqueezed tensor.
        let x_rank = ctx.rank(x)?;
        let ndim = if squeeze_outer {
            x_rank + inner_axes.len()
        } else {
            x_rank
        };
        if normalize_axes(&outer_axes, ndim)? != normalize_axes(&inner_axes, ndim)? {
            return None;
        }
        forward(node, x)
    }
}

fn const_f32<'a>(ctx: &'a RewriteContext, name: Option<&str>) -> Option<&'a [f32]> {
    ctx.constant(name?)?.as_slice::<f32>()
}

/// Fold `BatchNormalization(Conv(x, W, B))` into the convolution's weights
/// and bias.
struct FuseBnIntoConv;

impl RewriteRule for FuseBnIntoConv {
    fn name(&self) -> &'static str {
        "fuse_bn_into_conv"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "BatchNormalization") || node.inputs.len() != 5 {
            return None;
        }
        if node.outputs.iter().skip(1).any(|o| !o.is_empty() && ctx.is_used(o)) {
            return None;
        }
        if matches!(node.attr("training_mode"), Some(AttrValue::Int(1))) {
            return None;
        }

        let conv_out = node.input(0)?;
        let (_, conv) = ctx.producer(conv_out)?;
        if !is_op(conv, "Conv") || !ctx.used_once(conv_out) {
            return None;
        }

        let weight_name = conv.input(1)?;
        let weight = ctx.constant(weight_name)?;
        let weight_data = weight.as_slice::<f32>()?;
        let scale = const_f32(ctx, node.input(1))?;
        let bias = const_f32(ctx, node.input(2))?;
        let mean = const_f32(ctx, node.input(3))?;
        let var = const_f32(ctx, node.input(4))?;

        let out_channels = *weight.shape().first()?;
        if out_channels == 0
            || [scale.len(), bias.len(), mean.len(), var.len()]
                .iter()
                .any(|len| *len != out_channels)
        {
            return None;
        }
        let conv_bias = match conv.input(2) {
            Some(name) => {
                let b = const_f32(ctx, Some(name))?;
                if b.len() != out_channels {
                    return None;
                }
                b.to_vec()
            }
            None => vec![0.; out_channels],
        };

        let epsilon = match node.attr("epsilon") {
            Some(AttrValue::Float(eps)) => *eps,
            Some(_) => return None,
            None => 1e-5,
        };
        let factors: Vec<f32> = (0..out_channels)
            .map(|c| scale[c] / (var[c] + epsilon).sqrt())
            .collect();

        let per_channel = weight_data.len() / out_channels;
        let new_weight: Vec<f32> = weight_data
            .iter()
            .enumerate()
            .map(|(i, w)| w * factors[i / per_channel])
            .collect();
        let new_bias: Vec<f32> = (0..out_channels)
            .map(|c| (conv_bias[c] - mean[c]) * factors[c] + bias[c])
            .collect();

        let mut names = ctx.names.borrow_mut();
        let weight_out = names.generate(&format!("{}_bn_fused", weight_name));
        let bias_out = names.generate(&format!("{}_bn_fused_bias", weight_name));

        let mut fused = conv.clone();
        fused.inputs = vec![conv.input(0)?.to_string(), weight_out.clone(), bias_out.clone()];
        fused.outputs = vec![node.outputs.first()?.clone()];
        Some(Rewrite::Replace {
            nodes: vec![fused],
            initializers: vec![
                (
                    weight_out,
                    Tensor::try_from_data(weight.shape().to_vec(), new_weight)?,
                ),
                (bias_out, Tensor::from_vec(new_bias)),
            ],
        })
    }
}

/// Replace `Add(MatMul(a, B), C)` with `Gemm(a, B, C)` where `a` is a matrix
/// and `B` and `C` are constants.
struct FuseMatMulAddIntoGemm {
    pattern: Pattern,
}

impl FuseMatMulAddIntoGemm {
    fn new() -> Self {
        let matmul = Pattern::binary_op("MatMul", Pattern::symbol("a"), Pattern::const_symbol("b"))
            .with_name("matmul");
        FuseMatMulAddIntoGemm {
            pattern: Pattern::binary_op("Add", matmul, Pattern::const_symbol("c")),
        }
    }
}

impl RewriteRule for FuseMatMulAddIntoGemm {
    fn name(&self) -> &'static str {
        "fuse_matmul_add_into_gemm"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if !is_op(node, "Add") {
            return None;
        }
        let output = node.outputs.first()?;
        let pat_match = self.pattern.test(output, ctx)?;
        let matmul = ctx.node(pat_match.node("matmul")?);
        if !ctx.used_once(matmul.outputs.first()?) {
            return None;
        }

        let a = pat_match.value("a")?;
        let b_name = pat_match.value("b")?;
        let c_name = pat_match.value("c")?;
        let b = ctx.constant(b_name)?;
        let c = ctx.constant(c_name)?;

        if ctx.dtype(a) != Some(DataType::Float)
            || b.dtype() != DataType::Float
            || c.dtype() != DataType::Float
        {
            return None;
        }
        let [rows, _] = ctx.known_shape(a)? else {
            return None;
        };
        let &[_, cols] = b.shape() else {
            return None;
        };

        // Gemm requires `C` to be unidirectionally broadcastable to the
        // output shape.
        let c_broadcasts = match c.shape() {
            [] => true,
            [n] => *n == 1 || *n == cols,
            [m, n] => (*n == 1 || *n == cols) && (*m == 1 || rows.fixed() == Some(*m as u64)),
            _ => false,
        };
        if !c_broadcasts {
            return None;
        }

        let mut gemm = Node::new("Gemm", &[a, b_name, c_name], &[output.as_str()]);
        gemm.name = matmul.name.clone();
        Some(Rewrite::Replace {
            nodes: vec![gemm],
            initializers: Vec::new(),
        })
    }
}

/// Merge initializers with identical type, shape and contents.
struct EliminateDeduplicatedInitializers;

impl RewriteRule for EliminateDeduplicatedInitializers {
    fn name(&self) -> &'static str {
        "eliminate_deduplicated_initializers"
    }

    fn rewrite_graph(&self, graph: &mut Graph) -> usize {
        // Initializers which are also graph inputs may be overridden, so are
        // neither merged nor used as the merge target.
        let mut buckets: FxHashMap<(DataType, &[usize]), Vec<usize>> = FxHashMap::default();
        let mut duplicates: Vec<(String, String)> = Vec::new();

        for (i, init) in graph.initializers.iter().enumerate() {
            if graph.is_input(&init.name) {
                continue;
            }
            let bucket = buckets
                .entry((init.value.dtype(), init.value.shape()))
                .or_default();
            let original = bucket
                .iter()
                .find(|&&j| graph.initializers[j].value.same_contents(&init.value));
            match original {
                Some(&j) if !graph.is_output(&init.name) => {
                    duplicates.push((init.name.clone(), graph.initializers[j].name.clone()));
                }
                Some(_) => {}
                None => bucket.push(i),
            }
        }

        for (duplicate, original) in &duplicates {
            graph.replace_uses(duplicate, original);
        }
        let removed: FxHashSet<&str> = duplicates.iter().map(|(d, _)| d.as_str()).collect();
        graph
            .initializers
            .retain(|init| !removed.contains(init.name.as_str()));
        duplicates.len()
    }
}

/// Merge nodes which apply the same deterministic operator to the same
/// inputs.
struct EliminateCommonSubexpressions;

impl RewriteRule for EliminateCommonSubexpressions {
    fn name(&self) -> &'static str {
        "eliminate_common_subexpressions"
    }

    fn rewrite(&self, ctx: &RewriteContext, node_idx: usize) -> Option<Rewrite> {
        let node = ctx.node(node_idx);
        if node.has_subgraphs() || node.present_outputs().next().is_none() {
            return None;
        }
        let op = ctx.registry.read_op(node).ok()?;
        if !op.is_deterministic() {
            return None;
        }

        let earlier = ctx.graph.nodes[..node_idx]
            .iter()
            .find(|other| other.same_computation(node))?;

        let mut pairs = Vec::new();
        for (output, earlier_output) in node.outputs.iter().zip(&earlier.outputs) {
            if output.is_empty() {
                continue;
            }
            if earlier_output.is_empty() {
                return None;
            }
            pairs.push((output.clone(), earlier_output.clone()));
        }
        Some(Rewrite::Forward(pairs))
    }
}

fn all_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![
        Box::new(EliminateIdentity),
        Box::new(EliminateNopDropout),
        Box::new(EliminateNopCast),
        Box::new(EliminateNopReshape),
        Box::new(EliminateNopTranspose),
        Box::new(EliminateNopExpand),
        Box::new(EliminateNopArithmetic::new()),
        Box::new(FuseConsecutiveReshapes::new()),
        Box::new(FuseConsecutiveTransposes),
        Box::new(FuseConsecutiveSqueezeUnsqueeze),
        Box::new(FuseBnIntoConv),
        Box::new(FuseMatMulAddIntoGemm::new()),
        Box::new(EliminateDeduplicatedInitializers),
        Box::new(EliminateCommonSubexpressions),
    ]
}

/// Apply a rewrite to the node at `node_idx`.
///
/// Returns the number of nodes which replaced it, or an error if the graph
/// was left unchanged.
fn apply_rewrite(
    graph: &mut Graph,
    node_idx: usize,
    rewrite: Rewrite,
) -> Result<usize, SimplifyError> {
    let n_nodes = match rewrite {
        Rewrite::Forward(pairs) => {
            graph.nodes.remove(node_idx);
            for (from, to) in pairs {
                if graph.is_output(&from) {
                    graph.rename_value(&to, &from);
                } else {
                    graph.replace_uses(&from, &to);
                }
            }
            0
        }
        Rewrite::Replace {
            nodes,
            initializers,
        } => {
            let n_nodes = nodes.len();
            graph.replace_node(node_idx, nodes)?;
            for (name, value) in initializers {
                graph.set_initializer(&name, Arc::new(value));
            }
            n_nodes
        }
    };
    Ok(n_nodes)
}

/// Applies the enabled rewrite rules to a graph.
pub struct Rewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Rewriter {
    pub fn new(options: &SimplifyOptions) -> Rewriter {
        Rewriter {
            rules: all_rules()
                .into_iter()
                .filter(|rule| options.rewrite_enabled(rule.name()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Make one pass of every rule over a topologically sorted graph.
    ///
    /// Each node present at the start of the pass is offered to the rules in
    /// priority order, and the first applicable rewrite is applied. Nodes
    /// created by rewrites are not revisited until the next pass. Returns the
    /// number of rewrites applied.
    pub fn run(
        &self,
        graph: &mut Graph,
        shapes: &ShapeMap,
        scope: &Scope,
        registry: &OpRegistry,
        diagnostics: &Diagnostics,
        path: &str,
    ) -> usize {
        let names = RefCell::new(NameGen::new(graph, scope));
        let mut n_applied = 0;
        let mut next_idx = 0;

        loop {
            let found = {
                let ctx = RewriteContext::new(graph, shapes, scope, registry, &names);
                (next_idx..graph.nodes.len()).find_map(|idx| {
                    self.rules.iter().find_map(|rule| {
                        let rewrite = rule.rewrite(&ctx, idx)?;
                        ctx.is_applicable(idx, &rewrite).then(|| {
                            (idx, rule.name(), ctx.node(idx).display_name().to_string(), rewrite)
                        })
                    })
                })
            };
            let Some((idx, rule_name, node_name, rewrite)) = found else {
                break;
            };
            match apply_rewrite(graph, idx, rewrite) {
                Ok(n_nodes) => {
                    diagnostics.info(path, &node_name, format_args!("applied {}", rule_name));
                    next_idx = idx + n_nodes;
                    n_applied += 1;
                }
                Err(err) => {
                    diagnostics.info(
                        path,
                        &node_name,
                        format_args!("skipped {}: {}", rule_name, err),
                    );
                    next_idx = idx + 1;
                }
            }
        }

        for rule in &self.rules {
            let n = rule.rewrite_graph(graph);
            if n > 0 {
                diagnostics.info(
                    path,
                    graph.name.as_deref().unwrap_or_default(),
                    format_args!("applied {} {} times", rule.name(), n),
                );
            }
            n_applied += n;
        }
        n_applied
    }
}
