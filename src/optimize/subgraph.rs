use tracing::warn;

use super::{GraphOptimizer, OptimizeReport, Scope};
use crate::error::SimplifyError;
use crate::graph::{Graph, Node, ValueInfo};
use crate::infer_shapes::ShapeMap;

/// A nested graph which could not be fully simplified.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsimplifiedSubgraph {
    /// Path to the subgraph, as `graph/node.attribute`. Nested subgraphs
    /// have one `/node.attribute` segment per level.
    pub location: String,
    pub reason: String,
}

/// Return true if `node` is an `If` whose condition is not a known constant.
fn has_dynamic_condition(node: &Node, scope: &Scope) -> bool {
    node.op_type == "If"
        && node.is_default_domain()
        && node
            .input(0)
            .is_some_and(|cond| !scope.constants.contains_key(cond))
}

/// Check that simplification kept a subgraph's interface, which the
/// operator that owns it depends on.
fn check_interface(original: &Graph, simplified: &Graph) -> Result<(), SimplifyError> {
    let names = |infos: &[ValueInfo]| -> Vec<String> {
        infos.iter().map(|i| i.name.clone()).collect()
    };
    if names(&original.inputs) != names(&simplified.inputs)
        || original.outputs.len() != simplified.outputs.len()
    {
        return Err(SimplifyError::MalformedGraph(
            "subgraph inputs or outputs changed".to_string(),
        ));
    }
    Ok(())
}

impl GraphOptimizer<'_> {
    /// Simplify the subgraphs of nodes in `graph`.
    ///
    /// Each subgraph is simplified on a copy. The copy replaces the original
    /// only if simplification succeeded and the result is a valid graph in
    /// its enclosing scope. Failures, and branches of `If` nodes whose
    /// condition is not constant, are added to the report.
    pub(super) fn optimize_subgraphs(
        &self,
        graph: &mut Graph,
        scope: &Scope,
        shapes: &ShapeMap,
        path: &str,
        report: &mut OptimizeReport,
    ) -> Result<(), SimplifyError> {
        let inner_scope = scope.enter(graph, shapes);

        for node in &mut graph.nodes {
            let dynamic_condition = has_dynamic_condition(node, &inner_scope);
            let node_name = node.display_name().to_string();

            for (attr_name, subgraph) in node.subgraphs_mut() {
                let location = format!("{}/{}.{}", path, node_name, attr_name);
                let mut simplified = subgraph.clone();

                let result = self
                    .optimize_graph(&mut simplified, &inner_scope, &location, report)
                    .and_then(|_| simplified.validate(&inner_scope.names))
                    .and_then(|_| check_interface(subgraph, &simplified));

                match result {
                    Ok(()) => {
                        *subgraph = simplified;
                        if dynamic_condition {
                            report.unsimplified_subgraphs.push(UnsimplifiedSubgraph {
                                location,
                                reason: "branch condition is not a constant".to_string(),
                            });
                        }
                    }
                    Err(err) => {
                        warn!("{}: keeping subgraph unchanged: {}", location, err);
                        report.unsimplified_subgraphs.push(UnsimplifiedSubgraph {
                            location,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
