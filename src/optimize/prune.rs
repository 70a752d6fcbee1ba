use rustc_hash::FxHashSet;

use crate::error::SimplifyError;
use crate::graph::{Graph, ValueInfo};
use crate::infer_shapes::Dim;
use crate::op_registry::OpRegistry;

/// Remove the graph outputs named in `names`.
///
/// Returns an error if any name is not a graph output.
pub fn remove_outputs(graph: &mut Graph, names: &[String]) -> Result<(), SimplifyError> {
    if let Some(unknown) = names.iter().find(|name| !graph.is_output(name)) {
        return Err(SimplifyError::UnknownOutputName(unknown.clone()));
    }
    graph
        .outputs
        .retain(|output| !names.contains(&output.name));
    Ok(())
}

/// Remove nodes which do not contribute to the graph's outputs, and trailing
/// optional outputs of the remaining nodes which are unused.
///
/// The graph must be in topological order. Returns the number of nodes
/// removed.
pub fn eliminate_dead_code(graph: &mut Graph, registry: &OpRegistry) -> usize {
    let mut live: FxHashSet<String> = graph.outputs.iter().map(|o| o.name.clone()).collect();
    let mut keep = vec![false; graph.nodes.len()];

    for (idx, node) in graph.nodes.iter().enumerate().rev() {
        if !node.present_outputs().any(|o| live.contains(o)) {
            continue;
        }
        keep[idx] = true;
        live.extend(node.all_inputs().into_iter().map(|i| i.to_string()));
    }

    let n_removed = keep.iter().filter(|k| !**k).count();
    let mut keep = keep.into_iter();
    graph.nodes.retain(|_| keep.next().unwrap_or(true));

    for node in &mut graph.nodes {
        let Some(n_required) = registry
            .read_op(node)
            .ok()
            .and_then(|op| op.required_outputs())
        else {
            continue;
        };
        for output in node.outputs.iter_mut().skip(n_required) {
            if !live.contains(output.as_str()) {
                output.clear();
            }
        }
        while node.outputs.len() > n_required && node.outputs.last().is_some_and(|o| o.is_empty()) {
            node.outputs.pop();
        }
    }

    n_removed
}

/// Remove initializers which are not read by any node, subgraph or graph
/// output.
///
/// Initializers which are also graph inputs are kept, since callers may
/// supply their values.
pub fn remove_unused_initializers(graph: &mut Graph) -> usize {
    let mut used: FxHashSet<&str> = graph.outputs.iter().map(|o| o.name.as_str()).collect();
    for node in &graph.nodes {
        used.extend(node.all_inputs());
    }
    let unused: FxHashSet<String> = graph
        .initializers
        .iter()
        .filter(|init| !used.contains(init.name.as_str()) && !graph.is_input(&init.name))
        .map(|init| init.name.clone())
        .collect();

    graph
        .initializers
        .retain(|init| !unused.contains(&init.name));
    unused.len()
}

/// Make the main graph's input list consistent with its initializers.
///
/// With `separate_initializers` (IR version 4 and later), initializers are
/// removed from the input list, since the simplified model treats them as
/// constants. Otherwise every initializer must also be listed as an input,
/// so entries are added for new initializers and removed for unused ones.
/// Inputs which are not initializers are never removed.
pub fn sync_initializer_inputs(graph: &mut Graph, separate_initializers: bool) {
    let used: FxHashSet<&str> = {
        let mut used: FxHashSet<&str> = graph.outputs.iter().map(|o| o.name.as_str()).collect();
        for node in &graph.nodes {
            used.extend(node.all_inputs());
        }
        used
    };

    if separate_initializers {
        let unused: FxHashSet<String> = graph
            .initializers
            .iter()
            .filter(|init| !used.contains(init.name.as_str()))
            .map(|init| init.name.clone())
            .collect();
        let init_names: FxHashSet<String> =
            graph.initializers.iter().map(|i| i.name.clone()).collect();
        graph.inputs.retain(|input| !init_names.contains(&input.name));
        graph.initializers.retain(|init| !unused.contains(&init.name));
        return;
    }

    let unused: FxHashSet<String> = graph
        .initializers
        .iter()
        .filter(|init| !used.contains(init.name.as_str()))
        .map(|init| init.name.clone())
        .collect();
    graph.initializers.retain(|init| !unused.contains(&init.name));
    graph.inputs.retain(|input| !unused.contains(&input.name));

    let missing: Vec<ValueInfo> = graph
        .initializers
        .iter()
        .filter(|init| !graph.is_input(&init.name))
        .map(|init| {
            let shape = init.value.shape().iter().map(|&d| Dim::Fixed(d as u64)).collect();
            ValueInfo::new(&init.name, Some(init.value.dtype()), Some(shape))
        })
        .collect();
    graph.inputs.extend(missing);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        eliminate_dead_code, remove_outputs, remove_unused_initializers, sync_initializer_inputs,
    };
    use crate::error::SimplifyError;
    use crate::graph::{Graph, Node, ValueInfo};
    use crate::op_registry::OpRegistry;
    use crate::tensor::{DataType, Tensor};

    fn graph_with_two_outputs() -> Graph {
        let mut graph = Graph::new();
        graph.inputs.push(ValueInfo::new("x", Some(DataType::Float), None));
        graph.add_node(Node::new("Relu", &["x"], &["a"]));
        graph.add_node(Node::new("Neg", &["x"], &["b"]));
        graph.outputs.push(ValueInfo::new("a", None, None));
        graph.outputs.push(ValueInfo::new("b", None, None));
        graph
    }

    #[test]
    fn test_remove_outputs() {
        let mut graph = graph_with_two_outputs();
        remove_outputs(&mut graph, &["b".to_string()]).unwrap();
        assert_eq!(graph.outputs.len(), 1);

        let registry = OpRegistry::with_all_ops();
        assert_eq!(eliminate_dead_code(&mut graph, &registry), 1);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].op_type, "Relu");

        // Runtime inputs are kept even if unused.
        remove_outputs(&mut graph, &["a".to_string()]).unwrap();
        eliminate_dead_code(&mut graph, &registry);
        assert!(graph.nodes.is_empty());
        assert_eq!(graph.inputs.len(), 1);
    }

    #[test]
    fn test_remove_unknown_output() {
        let mut graph = graph_with_two_outputs();
        let result = remove_outputs(&mut graph, &["c".to_string()]);
        assert!(matches!(result, Err(SimplifyError::UnknownOutputName(name)) if name == "c"));
        assert_eq!(graph.outputs.len(), 2);
    }

    #[test]
    fn test_trim_unused_optional_outputs() {
        let mut graph = Graph::new();
        graph.inputs.push(ValueInfo::new("x", Some(DataType::Float), None));
        graph.add_node(Node::new("Dropout", &["x"], &["y", "mask"]));
        graph.outputs.push(ValueInfo::new("y", None, None));

        let registry = OpRegistry::with_all_ops();
        eliminate_dead_code(&mut graph, &registry);
        assert_eq!(graph.nodes[0].outputs, ["y"]);
    }

    #[test]
    fn test_sync_initializer_inputs() {
        let make_graph = || {
            let mut graph = Graph::new();
            graph.inputs.push(ValueInfo::new("x", Some(DataType::Float), None));
            graph.inputs.push(ValueInfo::new("w", Some(DataType::Float), None));
            graph.set_initializer("w", Arc::new(Tensor::from_vec(vec![1.0f32])));
            graph.set_initializer("folded", Arc::new(Tensor::from_vec(vec![2.0f32])));
            graph.set_initializer("unused", Arc::new(Tensor::from_vec(vec![3.0f32])));
            graph.add_node(Node::new("Add", &["x", "w"], &["a"]));
            graph.add_node(Node::new("Mul", &["a", "folded"], &["y"]));
            graph.outputs.push(ValueInfo::new("y", None, None));
            graph
        };

        let mut graph = make_graph();
        assert_eq!(remove_unused_initializers(&mut graph), 1);
        assert_eq!(graph.initializers.len(), 2);

        let input_names = |g: &Graph| g.inputs.iter().map(|i| i.name.clone()).collect::<Vec<_>>();

        let mut graph = make_graph();
        sync_initializer_inputs(&mut graph, true);
        assert_eq!(input_names(&graph), ["x"]);
        assert_eq!(graph.initializers.len(), 2);

        let mut graph = make_graph();
        sync_initializer_inputs(&mut graph, false);
        assert_eq!(input_names(&graph), ["x", "w", "folded"]);
        assert_eq!(graph.inputs[2].shape.as_deref().map(|s| s.len()), Some(1));
    }
}
