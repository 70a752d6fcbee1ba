use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::trace;

use super::diagnostics::Diagnostics;
use crate::error::SimplifyError;
use crate::graph::{AttrValue, CaptureEnv, Graph, Initializer, Node};
use crate::infer_shapes::{fixed_shape, ShapeMap};
use crate::interpreter::RunError;
use crate::op_registry::{OpRegistry, ReadOpError};
use crate::operator::{InputList, OpError, OpRunContext, OutputList};
use crate::ops::Constant;
use crate::tensor::Tensor;

/// Reasons why a node with constant inputs was not folded.
#[derive(Debug, Error)]
enum FoldError {
    #[error("operator is not supported: {0}")]
    UnsupportedFold(ReadOpError),
    #[error("evaluation failed: {0}")]
    Op(OpError),
    #[error("evaluation failed: {0}")]
    Run(RunError),
    #[error("output has {size} bytes which exceeds the limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("operator produced {actual} outputs but {expected} were expected")]
    OutputCount { expected: usize, actual: usize },
}

/// Convert `Constant` nodes into initializers.
///
/// Returns the number of nodes converted. Nodes whose value cannot be read,
/// such as sparse constants, are kept.
pub fn lower_constant_nodes(graph: &mut Graph, registry: &OpRegistry) -> usize {
    let mut lowered = Vec::new();
    for (idx, node) in graph.nodes.iter().enumerate() {
        if node.op_type != "Constant" || !node.is_default_domain() {
            continue;
        }
        let Some(output) = node.outputs.first().filter(|o| !o.is_empty()) else {
            continue;
        };
        let Ok(op) = registry.read_op(node) else {
            continue;
        };
        if let Some(constant) = op.downcast_ref::<Constant>() {
            lowered.push((idx, output.clone(), constant.value.clone()));
        }
    }

    for (idx, name, value) in lowered.iter().rev() {
        graph.nodes.remove(*idx);
        graph.set_initializer(name, Arc::new(value.clone()));
    }
    lowered.len()
}

/// Values and settings used when folding nodes in a graph.
pub struct FoldContext<'a> {
    pub registry: &'a OpRegistry,

    /// Shapes of values in the graph and enclosing scopes.
    pub shapes: &'a ShapeMap,

    /// Constant values from enclosing scopes.
    pub outer_constants: &'a FxHashMap<String, Arc<Tensor>>,

    pub size_threshold: Option<usize>,
    pub diagnostics: &'a Diagnostics,

    /// Location of the graph, used in diagnostics.
    pub path: &'a str,
}

enum Fold {
    /// Replace the node's outputs with constants.
    Values(Vec<(String, Tensor)>),

    /// Replace an `If` node with the nodes of the branch that is taken.
    Inline(Vec<Node>, Vec<Initializer>),
}

/// Replace nodes whose outputs can be computed ahead of time with
/// initializers, and `If` nodes with constant conditions by the branch that
/// is taken.
///
/// A node is folded if it is deterministic and either all of its inputs
/// (including values captured by subgraphs) are constants, or shape
/// inference determined the exact value of all its outputs. Returns the
/// number of nodes folded. The graph is left in topological order.
pub fn fold_constants(graph: &mut Graph, ctx: &FoldContext) -> Result<usize, SimplifyError> {
    let order = graph.topological_order()?;

    let mut constants: FxHashMap<String, Arc<Tensor>> = graph
        .initializers
        .iter()
        .map(|init| (init.name.clone(), init.value.clone()))
        .collect();
    let mut folds: FxHashMap<usize, Fold> = FxHashMap::default();

    for idx in order {
        let node = &graph.nodes[idx];
        let fold = match try_fold(node, &constants, ctx) {
            Ok(Some(fold)) => fold,
            Ok(None) => continue,
            Err(err) => {
                trace!("not folding node \"{}\": {}", node.display_name(), err);
                ctx.diagnostics.warn(
                    ctx.path,
                    node.display_name(),
                    format_args!("cannot fold {}: {}", node.op_type, err),
                );
                continue;
            }
        };
        if let Fold::Values(values) = &fold {
            for (name, value) in values {
                constants.insert(name.clone(), Arc::new(value.clone()));
            }
        }
        ctx.diagnostics.info(
            ctx.path,
            node.display_name(),
            format_args!("folded {}", node.op_type),
        );
        folds.insert(idx, fold);
    }

    if folds.is_empty() {
        return Ok(0);
    }
    let n_folded = folds.len();

    let old_nodes = std::mem::take(&mut graph.nodes);
    for (idx, node) in old_nodes.into_iter().enumerate() {
        match folds.remove(&idx) {
            None => graph.nodes.push(node),
            Some(Fold::Values(values)) => {
                for (name, value) in values {
                    graph.set_initializer(&name, Arc::new(value));
                }
            }
            Some(Fold::Inline(nodes, initializers)) => {
                graph.nodes.extend(nodes);
                for init in initializers {
                    graph.set_initializer(&init.name, init.value);
                }
            }
        }
    }
    graph.sort_topologically()?;

    Ok(n_folded)
}

fn lookup<'a>(
    name: &str,
    constants: &'a FxHashMap<String, Arc<Tensor>>,
    ctx: &'a FoldContext,
) -> Option<&'a Arc<Tensor>> {
    constants
        .get(name)
        .or_else(|| ctx.outer_constants.get(name))
        .filter(|t| t.is_evaluable())
}

/// Return true if a graph or its subgraphs contain nodes which are not
/// deterministic or cannot be evaluated.
fn has_nondeterministic_ops(graph: &Graph, registry: &OpRegistry) -> bool {
    graph.nodes.iter().any(|node| {
        let deterministic = registry
            .read_op(node)
            .map(|op| op.is_deterministic())
            .unwrap_or(false);
        !deterministic
            || node
                .subgraphs()
                .any(|(_, subgraph)| has_nondeterministic_ops(subgraph, registry))
    })
}

/// Decide whether a node can be folded and compute the replacement.
///
/// Returns `Ok(None)` if the node does not qualify for folding, and an error
/// if it qualifies but evaluation failed.
fn try_fold(
    node: &Node,
    constants: &FxHashMap<String, Arc<Tensor>>,
    ctx: &FoldContext,
) -> Result<Option<Fold>, FoldError> {
    if !node.is_default_domain() || node.present_outputs().next().is_none() {
        return Ok(None);
    }

    if node.op_type == "If" {
        if let Some(inline) = try_inline_if(node, constants, ctx) {
            return Ok(Some(inline));
        }
    }

    let all_inputs_constant = node
        .all_inputs()
        .iter()
        .all(|name| lookup(name, constants, ctx).is_some());

    if !all_inputs_constant {
        return Ok(fold_inferred_values(node, ctx).map(Fold::Values));
    }

    let op = ctx
        .registry
        .read_op(node)
        .map_err(FoldError::UnsupportedFold)?;
    if !op.is_deterministic()
        || node
            .subgraphs()
            .any(|(_, subgraph)| has_nondeterministic_ops(subgraph, ctx.registry))
    {
        return Ok(None);
    }

    let input_values: Vec<Option<&Tensor>> = node
        .inputs
        .iter()
        .map(|name| {
            if name.is_empty() {
                None
            } else {
                lookup(name, constants, ctx).map(|t| t.as_ref())
            }
        })
        .collect();
    let inputs = InputList::new(input_values);
    let mut run_ctx = OpRunContext::new(&inputs);
    run_ctx.set_num_outputs(node.outputs.len());
    run_ctx.set_name(node.name.as_deref());

    let outputs: OutputList = if let Some(subgraph_op) = op.as_subgraph_op() {
        let captures: FxHashMap<String, Arc<Tensor>> = node
            .all_inputs()
            .into_iter()
            .filter_map(|name| Some((name.to_string(), lookup(name, constants, ctx)?.clone())))
            .collect();
        subgraph_op
            .run_subgraph(&run_ctx, CaptureEnv::new(None, &captures), ctx.registry)
            .map_err(FoldError::Run)?
    } else {
        op.run(&run_ctx).map_err(FoldError::Op)?
    };

    let expected = node
        .outputs
        .iter()
        .rposition(|o| !o.is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    if outputs.len() < expected {
        return Err(FoldError::OutputCount {
            expected,
            actual: outputs.len(),
        });
    }

    if let Some(limit) = ctx.size_threshold {
        if let Some(size) = outputs.iter().map(|t| t.byte_size()).find(|size| *size > limit) {
            return Err(FoldError::TooLarge { size, limit });
        }
    }

    let values = node
        .outputs
        .iter()
        .zip(outputs)
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.clone(), value))
        .collect();
    Ok(Some(Fold::Values(values)))
}

/// Fold a node whose outputs all have exact values determined by shape
/// inference, such as `Shape` of a tensor with a fixed shape.
fn fold_inferred_values(node: &Node, ctx: &FoldContext) -> Option<Vec<(String, Tensor)>> {
    let op = ctx.registry.read_op(node).ok()?;
    if !op.is_deterministic() || node.has_subgraphs() {
        return None;
    }

    node.outputs
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| {
            let info = ctx.shapes.get(name)?;
            let values = info.constant_values()?;
            let shape = fixed_shape(info.shape.as_deref()?)?;
            let value = Tensor::from_i64s(info.dtype?, shape, values)?;
            Some((name.clone(), value))
        })
        .collect()
}

/// Replace an `If` node whose condition is a constant with the nodes of the
/// selected branch.
fn try_inline_if(
    node: &Node,
    constants: &FxHashMap<String, Arc<Tensor>>,
    ctx: &FoldContext,
) -> Option<Fold> {
    let cond = lookup(node.input(0)?, constants, ctx)?;
    let cond = match cond.to_i64_vec()?.as_slice() {
        [value] => *value != 0,
        _ => return None,
    };
    let branch_attr = if cond { "then_branch" } else { "else_branch" };
    let Some(AttrValue::Graph(branch)) = node.attr(branch_attr) else {
        return None;
    };
    if !branch.inputs.is_empty() || branch.outputs.len() < node.outputs.len() {
        return None;
    }

    let mut branch = branch.as_ref().clone();
    let mut extra_nodes = Vec::new();
    let mut assigned: FxHashSet<String> = FxHashSet::default();

    for (i, output) in node.outputs.iter().enumerate() {
        if output.is_empty() {
            continue;
        }
        let current = branch.outputs[i].name.clone();
        let is_local = branch.producer(&current).is_some() || branch.initializer(&current).is_some();

        if is_local && !assigned.contains(&current) {
            branch.rename_value(&current, output);
        } else {
            // The branch output is a value from an enclosing scope, or is
            // returned more than once.
            extra_nodes.push(Node::new("Identity", &[current.as_str()], &[output.as_str()]));
        }
        assigned.insert(output.clone());
    }

    let mut nodes = branch.nodes;
    nodes.extend(extra_nodes);
    Some(Fold::Inline(nodes, branch.initializers))
}
