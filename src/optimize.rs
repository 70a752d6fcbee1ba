//! Graph simplification passes.
//!
//! [`GraphOptimizer`] repeatedly applies constant folding, rewrite rules and
//! dead code elimination to a graph until it stops changing, then optionally
//! does the same for nested graphs of control flow operators.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use tracing::{debug, warn};

use crate::error::SimplifyError;
use crate::graph::{AttrValue, Graph, ValueInfo};
use crate::infer_shapes::{infer_shapes, ShapeInfo, ShapeMap};
use crate::op_registry::OpRegistry;
use crate::options::SimplifyOptions;
use crate::tensor::Tensor;

mod constant_fold;
mod diagnostics;
mod pattern_matcher;
mod prune;
pub mod rewrites;
mod subgraph;

pub use constant_fold::lower_constant_nodes;
pub use diagnostics::{Diagnostic, DiagnosticLevel, Diagnostics};
pub use prune::{eliminate_dead_code, remove_outputs, sync_initializer_inputs};
pub use subgraph::UnsimplifiedSubgraph;

use constant_fold::{fold_constants, FoldContext};
use prune::remove_unused_initializers;
use rewrites::Rewriter;

/// Information about the values visible to a graph from enclosing graphs.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub shapes: ShapeMap,

    /// Values from enclosing graphs which are known constants.
    pub constants: FxHashMap<String, Arc<Tensor>>,

    /// Names of all values defined in enclosing graphs.
    pub names: FxHashSet<String>,
}

impl Scope {
    /// Return the scope seen by subgraphs of nodes in `graph`.
    pub fn enter(&self, graph: &Graph, shapes: &ShapeMap) -> Scope {
        let mut scope = self.clone();
        scope
            .shapes
            .extend(shapes.iter().map(|(name, info)| (name.clone(), info.clone())));
        for init in &graph.initializers {
            scope.constants.insert(init.name.clone(), init.value.clone());
        }
        scope.names.extend(graph.inputs.iter().map(|i| i.name.clone()));
        scope
            .names
            .extend(graph.initializers.iter().map(|i| i.name.clone()));
        for node in &graph.nodes {
            scope
                .names
                .extend(node.present_outputs().map(|o| o.to_string()));
        }
        scope
    }
}

/// Outcome of optimizing a graph and its subgraphs.
#[derive(Debug, Default)]
pub struct OptimizeReport {
    /// True if any graph was still changing when the iteration limit was
    /// reached.
    pub iteration_cap_hit: bool,

    pub unsimplified_subgraphs: Vec<UnsimplifiedSubgraph>,

    /// Total number of passes over all graphs.
    pub passes: usize,
}

/// Simplifies graphs using the passes enabled by a [`SimplifyOptions`].
pub struct GraphOptimizer<'a> {
    registry: &'a OpRegistry,
    options: &'a SimplifyOptions,
    rewriter: Rewriter,
    diagnostics: Diagnostics,
}

impl<'a> GraphOptimizer<'a> {
    pub fn new(registry: &'a OpRegistry, options: &'a SimplifyOptions) -> Self {
        GraphOptimizer {
            registry,
            options,
            rewriter: Rewriter::new(options),
            diagnostics: Diagnostics::new(options.diagnostic_level),
        }
    }

    /// Simplify a top-level graph.
    ///
    /// The graph's inputs and outputs are preserved. On return the graph is
    /// in topological order, and its value info lists the inferred types and
    /// shapes of intermediate values.
    pub fn optimize(&self, graph: &mut Graph) -> Result<OptimizeReport, SimplifyError> {
        let mut report = OptimizeReport::default();
        let path = graph
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "main".to_string());
        self.optimize_graph(graph, &Scope::default(), &path, &mut report)?;
        Ok(report)
    }

    /// Consume the optimizer and return the diagnostics it collected.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics.into_messages()
    }

    /// Run passes over `graph` until it reaches a fixed point, then simplify
    /// its subgraphs if enabled.
    ///
    /// Returns the shapes of values in the final graph.
    fn optimize_graph(
        &self,
        graph: &mut Graph,
        scope: &Scope,
        path: &str,
        report: &mut OptimizeReport,
    ) -> Result<ShapeMap, SimplifyError> {
        lower_constant_nodes(graph, self.registry);
        graph.sort_topologically()?;

        let mut converged = false;
        for pass in 0..self.options.max_iterations {
            let initial_hash = structural_hash(graph);
            report.passes += 1;

            let shapes = self.shapes(graph, scope);
            let n_folded = if self.options.skip_constant_folding {
                0
            } else {
                let ctx = FoldContext {
                    registry: self.registry,
                    shapes: &shapes,
                    outer_constants: &scope.constants,
                    size_threshold: self.options.tensor_size_threshold,
                    diagnostics: &self.diagnostics,
                    path,
                };
                fold_constants(graph, &ctx)?
            };

            let n_rewritten = if self.rewriter.is_empty() {
                0
            } else {
                let n = self
                    .rewriter
                    .run(graph, &shapes, scope, self.registry, &self.diagnostics, path);
                graph.sort_topologically()?;
                n
            };

            let n_removed = eliminate_dead_code(graph, self.registry);
            remove_unused_initializers(graph);

            debug!(
                "{}: pass {} folded {} nodes, applied {} rewrites, removed {} nodes",
                path, pass, n_folded, n_rewritten, n_removed
            );

            if structural_hash(graph) == initial_hash {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "{}: graph still changing after {} passes",
                path, self.options.max_iterations
            );
            self.diagnostics.warn(
                path,
                graph.name.as_deref().unwrap_or_default(),
                format_args!(
                    "iteration limit of {} passes reached",
                    self.options.max_iterations
                ),
            );
            report.iteration_cap_hit = true;
        }

        let mut shapes = self.shapes(graph, scope);

        if self.options.include_subgraph && graph.nodes.iter().any(|n| n.has_subgraphs()) {
            self.optimize_subgraphs(graph, scope, &shapes, path, report)?;
            eliminate_dead_code(graph, self.registry);
            remove_unused_initializers(graph);
            shapes = self.shapes(graph, scope);
        }

        if !self.options.skip_shape_inference {
            update_value_info(graph, &shapes)?;
        }

        Ok(shapes)
    }

    fn shapes(&self, graph: &Graph, scope: &Scope) -> ShapeMap {
        if self.options.skip_shape_inference {
            declared_shapes(graph)
        } else {
            infer_shapes(graph, &scope.shapes, self.registry)
        }
    }
}

/// Return the types and shapes declared in a graph, without inference.
fn declared_shapes(graph: &Graph) -> ShapeMap {
    let mut shapes = ShapeMap::default();
    for info in graph
        .inputs
        .iter()
        .chain(&graph.value_info)
        .chain(&graph.outputs)
    {
        shapes.insert(info.name.clone(), ShapeInfo::from_value_info(info));
    }
    for init in &graph.initializers {
        shapes.insert(init.name.clone(), ShapeInfo::from_tensor(&init.value));
    }
    shapes
}

/// Replace a graph's value info with the inferred type and shape of each
/// node output, and fill in missing types and shapes of graph outputs.
///
/// Entries are listed in topological order. Declared info is kept for
/// values where inference found nothing.
fn update_value_info(graph: &mut Graph, shapes: &ShapeMap) -> Result<(), SimplifyError> {
    let declared: FxHashMap<String, ValueInfo> = std::mem::take(&mut graph.value_info)
        .into_iter()
        .map(|info| (info.name.clone(), info))
        .collect();

    let mut value_info = Vec::new();
    for node_idx in graph.topological_order()? {
        for output in graph.nodes[node_idx].present_outputs() {
            if graph.is_output(output) || graph.initializer(output).is_some() {
                continue;
            }
            let inferred = shapes
                .get(output)
                .filter(|info| info.dtype.is_some() || info.shape.is_some());
            match (inferred, declared.get(output)) {
                (Some(info), _) => {
                    value_info.push(ValueInfo::new(output, info.dtype, info.shape.clone()))
                }
                (None, Some(info)) => value_info.push(info.clone()),
                (None, None) => {}
            }
        }
    }
    graph.value_info = value_info;

    for output in &mut graph.outputs {
        let Some(info) = shapes.get(&output.name) else {
            continue;
        };
        if output.dtype.is_none() {
            output.dtype = info.dtype;
        }
        if output.shape.is_none() {
            output.shape = info.shape.clone();
        }
    }
    Ok(())
}

/// Compute a hash of the parts of a graph which simplification passes
/// change, used to detect when a fixed point has been reached.
fn structural_hash(graph: &Graph) -> u64 {
    let mut hasher = FxHasher::default();
    hash_graph(graph, &mut hasher);
    hasher.finish()
}

fn hash_graph(graph: &Graph, state: &mut FxHasher) {
    graph.nodes.len().hash(state);
    for node in &graph.nodes {
        node.op_type.hash(state);
        node.domain.hash(state);
        node.inputs.hash(state);
        node.outputs.hash(state);
        for attr in &node.attributes {
            attr.name.hash(state);
            hash_attr(&attr.value, state);
        }
    }
    for init in &graph.initializers {
        init.name.hash(state);
        init.value.dtype().hash(state);
        init.value.shape().hash(state);
    }
    for info in graph.inputs.iter().chain(&graph.outputs) {
        info.name.hash(state);
    }
}

fn hash_attr(value: &AttrValue, state: &mut FxHasher) {
    std::mem::discriminant(value).hash(state);
    match value {
        AttrValue::Float(x) => x.to_bits().hash(state),
        AttrValue::Int(x) => x.hash(state),
        AttrValue::String(x) => x.hash(state),
        AttrValue::Tensor(t) => {
            t.dtype().hash(state);
            t.shape().hash(state);
        }
        AttrValue::Graph(g) => hash_graph(g, state),
        AttrValue::Floats(xs) => {
            for x in xs {
                x.to_bits().hash(state);
            }
        }
        AttrValue::Ints(xs) => xs.hash(state),
        AttrValue::Strings(xs) => xs.hash(state),
        AttrValue::Tensors(ts) => {
            for t in ts {
                t.dtype().hash(state);
                t.shape().hash(state);
            }
        }
        AttrValue::Graphs(gs) => {
            for g in gs {
                hash_graph(g, state);
            }
        }
        AttrValue::Undefined => {}
    }
}

#[cfg(test)]
mod tests;
