use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{GraphOptimizer, OptimizeReport};
use crate::dims;
use crate::graph::{AttrValue, Expr, Graph, Node, ValueInfo};
use crate::infer_shapes::Dim;
use crate::interpreter::run_graph;
use crate::op_registry::OpRegistry;
use crate::options::SimplifyOptions;
use crate::tensor::{DataType, Tensor};

fn optimize_with(graph: &mut Graph, options: &SimplifyOptions) -> OptimizeReport {
    let registry = OpRegistry::with_all_ops();
    GraphOptimizer::new(&registry, options)
        .optimize(graph)
        .unwrap()
}

fn optimize(mut graph: Graph) -> Graph {
    optimize_with(&mut graph, &SimplifyOptions::default());
    graph
}

fn op_types(graph: &Graph) -> Vec<&str> {
    graph.nodes.iter().map(|n| n.op_type.as_str()).collect()
}

fn run(graph: &Graph, inputs: &[(&str, Tensor)]) -> Vec<Arc<Tensor>> {
    let inputs: FxHashMap<String, Arc<Tensor>> = inputs
        .iter()
        .map(|(name, value)| (name.to_string(), Arc::new(value.clone())))
        .collect();
    let registry = OpRegistry::with_all_ops();
    run_graph(graph, &inputs, &registry).unwrap()
}

fn assert_close(a: &Tensor, b: &Tensor) {
    assert_eq!(a.shape(), b.shape());
    let (a, b) = (a.to_f64_vec().unwrap(), b.to_f64_vec().unwrap());
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-4, "{:?} != {:?}", a, b);
    }
}

/// Extends [`Expr`] with methods to create expressions for specific
/// operators.
trait OpExprs {
    fn cast(&self, to: DataType) -> Expr;
    fn dropout(&self) -> Expr;
    fn identity(&self) -> Expr;
    fn matmul(&self, rhs: Expr) -> Expr;
    fn relu(&self) -> Expr;
    fn reshape(&self, shape: &[i64]) -> Expr;
    fn squeeze(&self, axes: &[i64]) -> Expr;
    fn transpose(&self, perm: &[i64]) -> Expr;
    fn unsqueeze(&self, axes: &[i64]) -> Expr;
}

impl OpExprs for Expr {
    fn cast(&self, to: DataType) -> Expr {
        self.apply(
            "Cast",
            &[],
            &[("to", AttrValue::Int(to.to_onnx().0 as i64))],
        )
    }

    fn dropout(&self) -> Expr {
        self.unary("Dropout")
    }

    fn identity(&self) -> Expr {
        self.unary("Identity")
    }

    fn matmul(&self, rhs: Expr) -> Expr {
        self.binary("MatMul", rhs)
    }

    fn relu(&self) -> Expr {
        self.unary("Relu")
    }

    fn reshape(&self, shape: &[i64]) -> Expr {
        self.binary("Reshape", Expr::vector(shape.to_vec()))
    }

    fn squeeze(&self, axes: &[i64]) -> Expr {
        self.binary("Squeeze", Expr::vector(axes.to_vec()))
    }

    fn transpose(&self, perm: &[i64]) -> Expr {
        self.apply("Transpose", &[], &[("perm", AttrValue::Ints(perm.to_vec()))])
    }

    fn unsqueeze(&self, axes: &[i64]) -> Expr {
        self.binary("Unsqueeze", Expr::vector(axes.to_vec()))
    }
}

fn input(shape: &[u64]) -> Expr {
    let dims: Vec<Dim> = shape.iter().map(|&d| Dim::Fixed(d)).collect();
    Expr::value_with_info("x", DataType::Float, &dims)
}

#[test]
fn test_eliminate_nop_ops() {
    struct Case {
        expr: Expr,
        expected: Vec<&'static str>,
    }

    let x = || input(&[2, 3]);

    let cases = [
        Case {
            expr: x().identity().relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: x().dropout().relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: x().cast(DataType::Float).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: x().cast(DataType::Int64).relu(),
            expected: vec!["Cast", "Relu"],
        },
        Case {
            expr: x().reshape(&[2, 3]).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: x().reshape(&[3, 2]).relu(),
            expected: vec!["Reshape", "Relu"],
        },
        Case {
            expr: x().transpose(&[0, 1]).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: x().binary("Expand", Expr::vector(vec![1i64, 3])).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: (x() + 0.0).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: (x() * 1.0).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: (x() - 0.0).relu(),
            expected: vec!["Relu"],
        },
        Case {
            expr: (x() / 1.0).relu(),
            expected: vec!["Relu"],
        },
        // Broadcasting with the constant changes the shape.
        Case {
            expr: (x() + Expr::constant(Tensor::zeros(DataType::Float, vec![4, 2, 3]).unwrap()))
                .relu(),
            expected: vec!["Add", "Relu"],
        },
        // `0 - x` is not `x`.
        Case {
            expr: (Expr::scalar(0.0f32) - x()).relu(),
            expected: vec!["Sub", "Relu"],
        },
        // Arithmetic is not re-associated.
        Case {
            expr: (x() + 2.0) - 2.0,
            expected: vec!["Add", "Sub"],
        },
    ];

    for (i, case) in cases.into_iter().enumerate() {
        let graph = optimize(case.expr.build_graph(["x"]));
        assert_eq!(op_types(&graph), case.expected, "case {}", i);
    }
}

#[test]
fn test_forward_to_graph_output() {
    // The producer of the identity's input is renamed to keep the graph
    // output name.
    let x = input(&[2]);
    let graph = optimize(x.relu().identity().build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Relu"]);
    assert_eq!(graph.nodes[0].outputs[0], graph.outputs[0].name);
    assert_eq!(graph.outputs[0].name, "Identity_out");

    // An identity between a graph input and output must stay.
    let x = input(&[2]);
    let graph = optimize(x.identity().build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Identity"]);
}

#[test]
fn test_custom_domain_arithmetic_is_kept() {
    let make_graph = || (input(&[2]).relu() + 0.0).relu().build_graph(["x"]);

    let graph = optimize(make_graph());
    assert_eq!(op_types(&graph), ["Relu", "Relu"]);

    let mut graph = make_graph();
    for node in graph.nodes.iter_mut().filter(|n| n.op_type == "Add") {
        node.domain = Some("com.example".to_string());
    }
    let graph = optimize(graph);
    assert_eq!(op_types(&graph), ["Relu", "Add", "Relu"]);
}

#[test]
fn test_dropout_in_training_mode_is_kept() {
    let make_graph = || input(&[2]).relu().dropout().relu().build_graph(["x"]);
    let all_ops = OpRegistry::with_all_ops();
    let options = SimplifyOptions::default();

    // Opset 6 dropout without `is_test` runs in training mode.
    let registry = all_ops.with_opset_version(Some(6));
    let mut graph = make_graph();
    GraphOptimizer::new(&registry, &options)
        .optimize(&mut graph)
        .unwrap();
    assert_eq!(op_types(&graph), ["Relu", "Dropout", "Relu"]);

    let registry = all_ops.with_opset_version(Some(7));
    let mut graph = make_graph();
    GraphOptimizer::new(&registry, &options)
        .optimize(&mut graph)
        .unwrap();
    assert_eq!(op_types(&graph), ["Relu", "Relu"]);
}

#[test]
fn test_fuse_consecutive_transposes() {
    let x = input(&[2, 3, 4]);
    let graph = optimize(x.transpose(&[1, 0, 2]).transpose(&[0, 2, 1]).build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Transpose"]);
    assert_eq!(graph.nodes[0].inputs, ["x"]);
    assert!(matches!(
        graph.nodes[0].attr("perm"),
        Some(AttrValue::Ints(perm)) if perm == &[1, 2, 0]
    ));

    // Transposes which cancel out are removed entirely.
    let x = input(&[2, 3]);
    let graph = optimize(x.transpose(&[1, 0]).transpose(&[1, 0]).relu().build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Relu"]);
}

#[test]
fn test_fuse_consecutive_reshapes() {
    let x = input(&[2, 3]);
    let graph = optimize(x.reshape(&[6]).reshape(&[3, 2]).build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Reshape"]);
    assert_eq!(graph.nodes[0].inputs[0], "x");

    let shape = graph.initializer(&graph.nodes[0].inputs[1]).unwrap();
    assert_eq!(shape.to_i64_vec(), Some(vec![3, 2]));
}

#[test]
fn test_fuse_squeeze_unsqueeze() {
    let x = input(&[2, 3]);
    let graph = optimize(x.unsqueeze(&[0]).squeeze(&[0]).relu().build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Relu"]);

    let x = input(&[2, 1]);
    let graph = optimize(x.unsqueeze(&[0]).squeeze(&[-1]).relu().build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Unsqueeze", "Squeeze", "Relu"]);
}

#[test]
fn test_fuse_bn_into_conv() {
    let x = Expr::value_with_info("x", DataType::Float, &dims!(1, 1, 3, 3));
    let weight = Tensor::from_data(vec![2, 1, 1, 1], vec![0.5f32, -1.]);
    let conv = x.apply(
        "Conv",
        &[Expr::constant(weight), Expr::vector(vec![0.1f32, 0.2])],
        &[],
    );
    let bn = conv.apply(
        "BatchNormalization",
        &[
            Expr::vector(vec![1.0f32, 2.]),
            Expr::vector(vec![0.0f32, 1.]),
            Expr::vector(vec![0.5f32, -0.5]),
            Expr::vector(vec![1.0f32, 4.]),
        ],
        &[],
    );
    let original = bn.build_graph(["x"]);
    let graph = optimize(original.clone());
    assert_eq!(op_types(&graph), ["Conv"]);

    let x_value = Tensor::from_data(vec![1, 1, 3, 3], (0..9).map(|i| i as f32).collect());
    let expected = run(&original, &[("x", x_value.clone())]);
    let actual = run(&graph, &[("x", x_value)]);
    assert_close(&actual[0], &expected[0]);
}

#[test]
fn test_fuse_matmul_add_into_gemm() {
    let a = input(&[2, 3]);
    let b = Tensor::from_data(vec![3, 4], (0..12).map(|i| i as f32).collect());
    let c = Tensor::from_vec(vec![1.0f32, 2., 3., 4.]);
    let original = (a.matmul(Expr::constant(b)) + Expr::constant(c)).build_graph(["x"]);
    let graph = optimize(original.clone());
    assert_eq!(op_types(&graph), ["Gemm"]);

    let x_value = Tensor::from_data(vec![2, 3], vec![1.0f32, 0., -1., 2., 0.5, 0.25]);
    let expected = run(&original, &[("x", x_value.clone())]);
    let actual = run(&graph, &[("x", x_value)]);
    assert_close(&actual[0], &expected[0]);

    // A 3D input is not fused.
    let a = input(&[1, 2, 3]);
    let b = Tensor::from_data(vec![3, 4], (0..12).map(|i| i as f32).collect());
    let graph = optimize(
        (a.matmul(Expr::constant(b)) + Expr::vector(vec![1.0f32; 4])).build_graph(["x"]),
    );
    assert_eq!(op_types(&graph), ["MatMul", "Add"]);
}

#[test]
fn test_eliminate_deduplicated_initializers() {
    let x = input(&[2]);
    let expr = (x + Expr::vector(vec![1.0f32, 2.])) * Expr::vector(vec![1.0f32, 2.]);
    let graph = optimize(expr.build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Add", "Mul"]);
    assert_eq!(graph.initializers.len(), 1);
    assert_eq!(graph.nodes[0].inputs[1], graph.nodes[1].inputs[1]);
}

#[test]
fn test_eliminate_common_subexpressions() {
    let x = input(&[2]);
    let expr = x.relu() + x.relu();
    let graph = optimize(expr.build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Relu", "Add"]);
    assert_eq!(graph.nodes[1].inputs[0], graph.nodes[1].inputs[1]);

    // Nondeterministic operators are not merged.
    let x = input(&[2]);
    let random = |x: &Expr| x.unary("RandomUniformLike");
    let graph = optimize((random(&x) + random(&x)).build_graph(["x"]));
    assert_eq!(op_types(&graph), ["RandomUniformLike", "RandomUniformLike", "Add"]);
}

#[test]
fn test_constant_folding() {
    let x = input(&[2]);
    let graph = optimize((x.clone() + Expr::scalar(2.0f32) * Expr::scalar(3.0f32)).build_graph(["x"]));
    assert_eq!(op_types(&graph), ["Add"]);

    // A graph which depends only on constants becomes a list of
    // initializers.
    let no_inputs: [&str; 0] = [];
    let graph = optimize((Expr::scalar(2.0f32) * Expr::scalar(3.0f32)).build_graph(no_inputs));
    assert!(graph.nodes.is_empty());
    let output = graph.initializer(&graph.outputs[0].name).unwrap();
    assert_eq!(output.item::<f32>(), Some(6.));
}

#[test]
fn test_skip_options() {
    let make_graph = || input(&[2]).identity().relu().build_graph(["x"]);

    let mut graph = make_graph();
    let options = SimplifyOptions {
        skipped_rewrites: vec!["eliminate_identity".to_string()],
        ..Default::default()
    };
    optimize_with(&mut graph, &options);
    assert_eq!(op_types(&graph), ["Identity", "Relu"]);

    let mut graph = make_graph();
    let options = SimplifyOptions {
        skip_optimization: true,
        ..Default::default()
    };
    optimize_with(&mut graph, &options);
    assert_eq!(op_types(&graph), ["Identity", "Relu"]);

    let mut graph = (input(&[2]) + Expr::scalar(2.0f32) * Expr::scalar(3.0f32)).build_graph(["x"]);
    let options = SimplifyOptions {
        skip_constant_folding: true,
        ..Default::default()
    };
    optimize_with(&mut graph, &options);
    assert_eq!(op_types(&graph), ["Mul", "Add"]);
}

#[test]
fn test_iteration_cap() {
    let make_graph = || (input(&[2]) + Expr::scalar(2.0f32) * Expr::scalar(3.0f32)).build_graph(["x"]);

    let mut graph = make_graph();
    let report = optimize_with(&mut graph, &SimplifyOptions::default());
    assert!(!report.iteration_cap_hit);

    // The first pass changes the graph, so one pass cannot reach a fixed
    // point.
    let mut graph = make_graph();
    let options = SimplifyOptions {
        max_iterations: 1,
        ..Default::default()
    };
    let report = optimize_with(&mut graph, &options);
    assert!(report.iteration_cap_hit);
    assert_eq!(report.passes, 1);
}

#[test]
fn test_value_info_is_updated() {
    let x = input(&[2, 3]);
    let graph = optimize(x.relu().unary("Neg").build_graph(["x"]));

    assert_eq!(graph.value_info.len(), 1);
    assert_eq!(graph.value_info[0].name, "Relu_out");
    assert_eq!(graph.value_info[0].dtype, Some(DataType::Float));
    assert_eq!(graph.value_info[0].shape, Some(dims!(2, 3).to_vec()));

    assert_eq!(graph.outputs[0].dtype, Some(DataType::Float));
    assert_eq!(graph.outputs[0].shape, Some(dims!(2, 3).to_vec()));
}

fn if_graph(cond_input: bool) -> Graph {
    let mut then_branch = Graph::new();
    then_branch.add_node(Node::new("Identity", &["x"], &["then_id"]));
    then_branch.add_node(Node::new("Relu", &["then_id"], &["then_out"]));
    then_branch.outputs.push(ValueInfo::new("then_out", None, None));

    let mut else_branch = Graph::new();
    else_branch.add_node(Node::new("Add", &["c", "c"], &["else_sum"]));
    else_branch.add_node(Node::new("Mul", &["x", "else_sum"], &["else_out"]));
    else_branch.outputs.push(ValueInfo::new("else_out", None, None));

    let mut graph = Graph::new();
    graph
        .inputs
        .push(ValueInfo::new("x", Some(DataType::Float), Some(dims!(2).to_vec())));
    if cond_input {
        graph
            .inputs
            .push(ValueInfo::new("cond", Some(DataType::Bool), Some(Vec::new())));
    } else {
        graph.set_initializer("cond", Arc::new(Tensor::from_scalar(false)));
    }
    graph.set_initializer("c", Arc::new(Tensor::from_scalar(1.0f32)));
    graph.add_node(
        Node::new("If", &["cond"], &["y"])
            .with_name("if")
            .with_attr("then_branch", AttrValue::Graph(Box::new(then_branch)))
            .with_attr("else_branch", AttrValue::Graph(Box::new(else_branch))),
    );
    graph.outputs.push(ValueInfo::new("y", None, None));
    graph
}

fn branch<'a>(graph: &'a Graph, name: &str) -> &'a Graph {
    match graph.nodes[0].attr(name) {
        Some(AttrValue::Graph(g)) => g,
        _ => panic!("missing branch {}", name),
    }
}

#[test]
fn test_simplify_subgraphs() {
    let mut graph = if_graph(true);
    let options = SimplifyOptions {
        include_subgraph: true,
        ..Default::default()
    };
    let report = optimize_with(&mut graph, &options);

    assert_eq!(op_types(&graph), ["If"]);
    assert_eq!(op_types(branch(&graph, "then_branch")), ["Relu"]);

    // `c + c` is folded using the parent's initializer.
    assert_eq!(op_types(branch(&graph, "else_branch")), ["Mul"]);

    let locations: Vec<_> = report
        .unsimplified_subgraphs
        .iter()
        .map(|s| s.location.as_str())
        .collect();
    assert_eq!(locations, ["main/if.then_branch", "main/if.else_branch"]);

    // Without `include_subgraph`, nested graphs are left alone.
    let mut graph = if_graph(true);
    optimize_with(&mut graph, &SimplifyOptions::default());
    assert_eq!(op_types(branch(&graph, "then_branch")), ["Identity", "Relu"]);
}

#[test]
fn test_inline_constant_if() {
    let graph = optimize(if_graph(false));
    assert_eq!(op_types(&graph), ["Mul"]);
    assert_eq!(graph.nodes[0].outputs, ["y"]);

    let outputs = run(&graph, &[("x", Tensor::from_vec(vec![1.0f32, 2.]))]);
    assert_eq!(outputs[0].as_slice::<f32>(), Some([2., 4.].as_slice()));
}
