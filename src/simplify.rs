use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::check::check_equivalence;
use crate::error::SimplifyError;
use crate::graph::{Graph, Initializer};
use crate::infer_shapes::is_static;
use crate::model::Model;
use crate::op_registry::default_registry;
use crate::optimize::{
    eliminate_dead_code, remove_outputs, sync_initializer_inputs, Diagnostic, GraphOptimizer,
    UnsimplifiedSubgraph,
};
use crate::options::SimplifyOptions;

/// Output of [`simplify`] and [`simplify_model`].
#[derive(Debug)]
pub struct SimplificationResult {
    pub model: Model,

    /// Whether the simplified model produced the same outputs as the
    /// original for every check sample. True if checking was disabled.
    pub check_passed: bool,

    /// Nested graphs which were left wholly or partly unsimplified.
    pub unsimplified_subgraphs: Vec<UnsimplifiedSubgraph>,

    /// True if a graph was still changing when the iteration limit was
    /// reached.
    pub iteration_cap_hit: bool,

    pub diagnostics: Vec<Diagnostic>,
}

impl SimplificationResult {
    /// Serialize the simplified model.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.model.serialize()
    }
}

/// Simplify a serialized ONNX model.
///
/// See [`simplify_model`].
pub fn simplify(
    model: &[u8],
    options: &SimplifyOptions,
) -> Result<SimplificationResult, SimplifyError> {
    let model = Model::load(model)?;
    simplify_model(&model, options)
}

/// Simplify a model.
///
/// This removes the outputs listed in `options.unused_output`, then folds
/// constants, applies rewrite rules and removes dead code until the graph
/// stops changing. If `options.check_n` is non-zero, the original and
/// simplified models are run on generated inputs and their outputs compared.
///
/// A failed check does not make this return an error. The simplified model is
/// returned with [`SimplificationResult::check_passed`] set to false.
pub fn simplify_model(
    model: &Model,
    options: &SimplifyOptions,
) -> Result<SimplificationResult, SimplifyError> {
    options.validate()?;

    let registry = default_registry().with_opset_version(model.opset_version());
    let mut model = model.clone();
    let n_nodes_before = model.graph.total_node_count();

    overwrite_input_shapes(&mut model.graph, options)?;
    if !options.dynamic_input_shape {
        check_static_inputs(&model.graph)?;
    }

    if !options.unused_output.is_empty() {
        remove_outputs(&mut model.graph, &options.unused_output)?;
        model.graph.sort_topologically()?;
        let n_removed = eliminate_dead_code(&mut model.graph, &registry);
        debug!("removed {} nodes after pruning outputs", n_removed);
    }

    // Graph that the simplified graph is checked against.
    let reference = (options.check_n > 0).then(|| model.graph.clone());

    // Overridable initializers are runtime inputs while simplifying, so no
    // pass treats their values as constants.
    let overridable = if model.initializers_overridable() {
        take_input_initializers(&mut model.graph)
    } else {
        Vec::new()
    };

    let optimizer = GraphOptimizer::new(&registry, options);
    let report = optimizer.optimize(&mut model.graph)?;

    model.graph.initializers.extend(overridable);
    let separate_initializers = !model.initializers_overridable();
    sync_initializer_inputs(&mut model.graph, separate_initializers);
    model.graph.sort_topologically()?;
    model.graph.validate(&FxHashSet::default())?;

    let check_passed = match &reference {
        Some(reference) => check_equivalence(reference, &model.graph, options, &registry)?,
        None => true,
    };

    info!(
        "simplified model from {} to {} nodes in {} passes",
        n_nodes_before,
        model.graph.total_node_count(),
        report.passes
    );

    Ok(SimplificationResult {
        model,
        check_passed,
        unsimplified_subgraphs: report.unsimplified_subgraphs,
        iteration_cap_hit: report.iteration_cap_hit,
        diagnostics: optimizer.into_diagnostics(),
    })
}

fn overwrite_input_shapes(graph: &mut Graph, options: &SimplifyOptions) -> Result<(), SimplifyError> {
    for (name, shape) in &options.overwrite_input_shapes {
        let Some(input) = graph.inputs.iter_mut().find(|i| &i.name == name) else {
            return Err(SimplifyError::InvalidOption(format!(
                "cannot overwrite shape of \"{}\" because it is not a graph input",
                name
            )));
        };
        input.shape = Some(shape.clone());
    }
    Ok(())
}

/// Remove the initializers which are also listed as graph inputs, and return
/// them.
fn take_input_initializers(graph: &mut Graph) -> Vec<Initializer> {
    let (inputs, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut graph.initializers)
        .into_iter()
        .partition(|init| graph.is_input(&init.name));
    graph.initializers = rest;
    inputs
}

/// Return an error if a runtime input is declared with a symbolic or unknown
/// dimension.
///
/// Inputs whose rank is unknown are allowed, since they have no dimensions to
/// check.
fn check_static_inputs(graph: &Graph) -> Result<(), SimplifyError> {
    let dynamic = graph.runtime_inputs().find(|input| {
        input
            .shape
            .as_ref()
            .is_some_and(|shape| !is_static(shape))
    });
    match dynamic {
        Some(input) => Err(SimplifyError::DynamicInputShape {
            input: input.name.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{check_static_inputs, overwrite_input_shapes, simplify_model};
    use crate::error::SimplifyError;
    use crate::graph::{Expr, Graph, ValueInfo};
    use crate::infer_shapes::Dim;
    use crate::model::Model;
    use crate::options::SimplifyOptions;
    use crate::tensor::{DataType, Tensor};

    fn dynamic_graph() -> Graph {
        let x = Expr::value_with_info("x", DataType::Float, &[Dim::symbol("batch"), Dim::Fixed(4)]);
        x.unary("Relu").build_graph(["x"])
    }

    #[test]
    fn test_dynamic_input_requires_option() {
        let graph = dynamic_graph();
        let err = check_static_inputs(&graph).err().unwrap();
        assert!(matches!(err, SimplifyError::DynamicInputShape { input } if input == "x"));

        let mut graph = Graph::new();
        graph
            .inputs
            .push(ValueInfo::new("x", Some(DataType::Float), None));
        assert!(check_static_inputs(&graph).is_ok());
    }

    #[test]
    fn test_overwrite_input_shapes() {
        let mut graph = dynamic_graph();
        let options = SimplifyOptions {
            overwrite_input_shapes: vec![("x".to_string(), vec![Dim::Fixed(2), Dim::Fixed(4)])],
            ..Default::default()
        };
        overwrite_input_shapes(&mut graph, &options).unwrap();
        assert_eq!(
            graph.inputs[0].shape,
            Some(vec![Dim::Fixed(2), Dim::Fixed(4)])
        );
        assert!(check_static_inputs(&graph).is_ok());

        let options = SimplifyOptions {
            overwrite_input_shapes: vec![("y".to_string(), vec![Dim::Fixed(2)])],
            ..Default::default()
        };
        let result = overwrite_input_shapes(&mut graph, &options);
        assert!(matches!(result, Err(SimplifyError::InvalidOption(_))));
    }

    #[test]
    fn test_overridable_initializers_are_not_folded() {
        let make_model = |ir_version: i64| {
            let x = Expr::value_with_info("x", DataType::Float, &[Dim::Fixed(2)]);
            let w = Expr::value_with_info("w", DataType::Float, &[Dim::Fixed(2)]);
            let mut graph = (x.unary("Relu") * w).build_graph(["x", "w"]);
            graph.set_initializer("w", Arc::new(Tensor::from_vec(vec![1.0f32, 1.0])));

            let mut model = Model::from_graph(graph, 13);
            model.set_ir_version(Some(ir_version));
            model
        };
        let options = SimplifyOptions {
            check_n: 2,
            ..Default::default()
        };
        let input_names = |graph: &Graph| -> Vec<String> {
            graph.inputs.iter().map(|i| i.name.clone()).collect()
        };

        // `w` is a default value which callers may replace.
        let result = simplify_model(&make_model(3), &options).unwrap();
        assert!(result.check_passed);
        let graph = &result.model.graph;
        let op_types: Vec<&str> = graph.nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(op_types, ["Relu", "Mul"]);
        assert_eq!(input_names(graph), ["x", "w"]);
        assert!(graph.initializer("w").is_some());

        // `w` is a constant, so `x * 1` is removed.
        let result = simplify_model(&make_model(8), &options).unwrap();
        assert!(result.check_passed);
        let graph = &result.model.graph;
        let op_types: Vec<&str> = graph.nodes.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(op_types, ["Relu"]);
        assert_eq!(input_names(graph), ["x"]);
    }

    #[test]
    fn test_simplify_model_keeps_metadata() {
        let model = Model::from_graph(dynamic_graph(), 17);
        let options = SimplifyOptions {
            dynamic_input_shape: true,
            ..Default::default()
        };
        let result = simplify_model(&model, &options).unwrap();
        assert!(result.check_passed);
        assert_eq!(result.model.opset_version(), Some(17));
        assert_eq!(result.model.ir_version(), Some(8));
        assert_eq!(result.model.graph.nodes.len(), 1);
    }
}
