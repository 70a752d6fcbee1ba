//! Reference interpreter for graphs.
//!
//! The interpreter runs a graph node by node using the operators' reference
//! kernels. It is used to evaluate constant subgraphs and branches while
//! folding, and to compare a model against its simplified form.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

use crate::graph::{CaptureEnv, Graph};
use crate::op_registry::{OpRegistry, ReadOpError};
use crate::operator::{InputList, OpError, OpRunContext, Operator};
use crate::tensor::Tensor;

/// Errors that occur when running a graph.
#[derive(Debug, Error)]
pub enum RunError {
    /// A graph input was not supplied.
    #[error("missing value for graph input \"{0}\"")]
    MissingInput(String),

    /// A node reads a value which is not defined in the graph or an
    /// enclosing scope.
    #[error("value \"{0}\" is not defined")]
    UnknownValue(String),

    /// A node's operator could not be constructed.
    #[error("cannot run {op_type} node \"{node}\": {error}")]
    UnsupportedOperator {
        node: String,
        op_type: String,
        error: ReadOpError,
    },

    /// An operator failed.
    #[error("{op_type} node \"{node}\" failed: {error}")]
    OperatorError {
        node: String,
        op_type: String,
        error: OpError,
    },

    /// An operator produced fewer outputs than its node declares.
    #[error("{op_type} node \"{node}\" produced {actual} outputs but {expected} were expected")]
    OutputCount {
        node: String,
        op_type: String,
        expected: usize,
        actual: usize,
    },

    /// An error occurred while running a subgraph of a control flow node.
    #[error("error in subgraph of node \"{node}\": {error}")]
    SubgraphError { node: String, error: Box<RunError> },

    /// The nodes could not be ordered for execution.
    #[error("planning failed: {0}")]
    PlanError(String),
}

impl RunError {
    /// Create an error for a failed operator in a node named `node`.
    pub fn op_error(node: Option<&str>, op_type: &str, error: OpError) -> RunError {
        RunError::OperatorError {
            node: node.unwrap_or_default().to_string(),
            op_type: op_type.to_string(),
            error,
        }
    }

    /// Wrap an error from a subgraph of the node named `node`.
    pub fn subgraph_error(node: Option<&str>, error: RunError) -> RunError {
        RunError::SubgraphError {
            node: node.unwrap_or_default().to_string(),
            error: Box::new(error),
        }
    }
}

struct Step {
    node_idx: usize,
    op: Box<dyn Operator>,
}

/// An execution plan for a graph: its nodes in topological order, with the
/// operator for each node.
///
/// A plan is created once and can be run many times, for example once per
/// loop iteration.
pub struct Plan<'g> {
    graph: &'g Graph,
    steps: Vec<Step>,
}

impl<'g> Plan<'g> {
    pub fn new(graph: &'g Graph, registry: &OpRegistry) -> Result<Plan<'g>, RunError> {
        let order = graph
            .topological_order()
            .map_err(|err| RunError::PlanError(err.to_string()))?;
        let steps = order
            .into_iter()
            .map(|node_idx| {
                let node = &graph.nodes[node_idx];
                let op = registry
                    .read_op(node)
                    .map_err(|error| RunError::UnsupportedOperator {
                        node: node.display_name().to_string(),
                        op_type: node.op_type.clone(),
                        error,
                    })?;
                Ok(Step { node_idx, op })
            })
            .collect::<Result<Vec<_>, RunError>>()?;
        Ok(Plan { graph, steps })
    }

    /// Run the graph and return its outputs, in the order of the graph's
    /// output list.
    ///
    /// `inputs` must supply every graph input which is not also an
    /// initializer. Values which are not defined in the graph are looked up
    /// in `captures`.
    pub fn run(
        &self,
        inputs: &FxHashMap<String, Arc<Tensor>>,
        captures: CaptureEnv,
        registry: &OpRegistry,
    ) -> Result<Vec<Arc<Tensor>>, RunError> {
        let graph = self.graph;
        let mut values: FxHashMap<String, Arc<Tensor>> = graph
            .initializers
            .iter()
            .map(|init| (init.name.clone(), init.value.clone()))
            .collect();
        for input in &graph.inputs {
            match inputs.get(&input.name) {
                Some(value) => {
                    values.insert(input.name.clone(), value.clone());
                }
                None if values.contains_key(&input.name) => {}
                None => return Err(RunError::MissingInput(input.name.clone())),
            }
        }

        for step in &self.steps {
            let node = &graph.nodes[step.node_idx];
            trace!("Running {} node \"{}\"", node.op_type, node.display_name());

            let outputs = {
                let input_values = node
                    .inputs
                    .iter()
                    .map(|name| {
                        if name.is_empty() {
                            return Ok(None);
                        }
                        values
                            .get(name)
                            .or_else(|| captures.get(name))
                            .map(|t| Some(t.as_ref()))
                            .ok_or_else(|| RunError::UnknownValue(name.clone()))
                    })
                    .collect::<Result<Vec<_>, RunError>>()?;
                let input_list = InputList::new(input_values);
                let mut ctx = OpRunContext::new(&input_list);
                ctx.set_num_outputs(node.outputs.len());
                ctx.set_name(node.name.as_deref());

                if let Some(subgraph_op) = step.op.as_subgraph_op() {
                    let env = CaptureEnv::new(Some(&captures), &values);
                    subgraph_op
                        .run_subgraph(&ctx, env, registry)
                        .map_err(|err| RunError::subgraph_error(Some(node.display_name()), err))?
                } else {
                    step.op.run(&ctx).map_err(|error| {
                        RunError::op_error(Some(node.display_name()), &node.op_type, error)
                    })?
                }
            };

            let mut outputs = outputs.into_iter();
            for (i, name) in node.outputs.iter().enumerate() {
                let Some(output) = outputs.next() else {
                    if node.outputs[i..].iter().all(|n| n.is_empty()) {
                        break;
                    }
                    return Err(RunError::OutputCount {
                        node: node.display_name().to_string(),
                        op_type: node.op_type.clone(),
                        expected: node.outputs.len(),
                        actual: i,
                    });
                };
                if !name.is_empty() {
                    values.insert(name.clone(), Arc::new(output));
                }
            }
        }

        graph
            .outputs
            .iter()
            .map(|output| {
                values
                    .get(&output.name)
                    .or_else(|| captures.get(&output.name))
                    .cloned()
                    .ok_or_else(|| RunError::UnknownValue(output.name.clone()))
            })
            .collect()
    }
}

/// Run a graph with no enclosing scope.
pub fn run_graph(
    graph: &Graph,
    inputs: &FxHashMap<String, Arc<Tensor>>,
    registry: &OpRegistry,
) -> Result<Vec<Arc<Tensor>>, RunError> {
    Plan::new(graph, registry)?.run(inputs, CaptureEnv::empty(), registry)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustc_hash::FxHashMap;

    use super::{run_graph, Plan, RunError};
    use crate::graph::{CaptureEnv, Expr, Graph, Node, ValueInfo};
    use crate::op_registry::OpRegistry;
    use crate::tensor::{DataType, Tensor};

    fn inputs(values: &[(&str, Tensor)]) -> FxHashMap<String, Arc<Tensor>> {
        values
            .iter()
            .map(|(name, t)| (name.to_string(), Arc::new(t.clone())))
            .collect()
    }

    #[test]
    fn test_run_graph() {
        let x = Expr::value("x");
        let graph = ((x.clone() + Expr::scalar(1.0f32)) * x).build_graph(["x"]);
        let registry = OpRegistry::with_all_ops();

        let outputs = run_graph(
            &graph,
            &inputs(&[("x", Tensor::from_vec(vec![1.0f32, 2.]))]),
            &registry,
        )
        .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].as_slice::<f32>(), Some([2., 6.].as_slice()));
    }

    #[test]
    fn test_missing_input() {
        let graph = Expr::value("x").unary("Relu").build_graph(["x"]);
        let registry = OpRegistry::with_all_ops();
        let err = run_graph(&graph, &FxHashMap::default(), &registry).unwrap_err();
        assert!(matches!(err, RunError::MissingInput(name) if name == "x"));
    }

    #[test]
    fn test_unsupported_operator() {
        let mut graph = Graph::new();
        graph.inputs.push(ValueInfo::new("x", Some(DataType::Float), None));
        graph.nodes.push(Node::new("NotARealOp", &["x"], &["y"]));
        graph.outputs.push(ValueInfo::new("y", None, None));

        let registry = OpRegistry::with_all_ops();
        assert!(matches!(
            Plan::new(&graph, &registry),
            Err(RunError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_run_reads_captures() {
        let mut graph = Graph::new();
        graph.nodes.push(Node::new("Neg", &["outer"], &["y"]));
        graph.outputs.push(ValueInfo::new("y", None, None));

        let mut outer = FxHashMap::default();
        outer.insert("outer".to_string(), Arc::new(Tensor::from_scalar(2.0f32)));
        let env = CaptureEnv::new(None, &outer);

        let registry = OpRegistry::with_all_ops();
        let plan = Plan::new(&graph, &registry).unwrap();
        let outputs = plan.run(&FxHashMap::default(), env, &registry).unwrap();
        assert_eq!(outputs[0].item::<f32>(), Some(-2.0));

        let err = plan
            .run(&FxHashMap::default(), CaptureEnv::empty(), &registry)
            .unwrap_err();
        assert!(matches!(err, RunError::UnknownValue(name) if name == "outer"));
    }
}
