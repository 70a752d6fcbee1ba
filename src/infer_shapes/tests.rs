use rustc_hash::FxHashMap;

use super::{infer_shapes, Dim, ShapeInfo, ShapeMap, SymExpr};
use crate::graph::{AttrValue, Expr, Graph, Node, ValueInfo};
use crate::op_registry::OpRegistry;
use crate::tensor::{DataType, Tensor};

fn infer(graph: &Graph) -> ShapeMap {
    let registry = OpRegistry::with_all_ops();
    infer_shapes(graph, &ShapeMap::default(), &registry)
}

fn output_info(graph: &Graph, shapes: &ShapeMap) -> ShapeInfo {
    shapes[&graph.outputs[0].name].clone()
}

/// Build `x.reshape([x.shape[0], x.shape[1], x.shape[3] * x.shape[2]])`.
fn merge_last_dims(x: Expr) -> Expr {
    let shape = x.unary("Shape");
    let dim = |i: i64| {
        shape
            .apply("Gather", &[Expr::scalar(i)], &[("axis", AttrValue::Int(0))])
            .apply("Unsqueeze", &[Expr::vector(vec![0i64])], &[])
    };
    let new_shape = Expr::op(
        "Concat",
        vec![Some(dim(0)), Some(dim(1)), Some(dim(3) * dim(2))],
        &[("axis", AttrValue::Int(0))],
        1,
    );
    x.apply("Reshape", &[new_shape], &[])
}

#[test]
fn test_infer_reshape_with_static_shape() {
    let dims: Vec<Dim> = [2, 3, 4, 5].map(Dim::Fixed).into();
    let x = Expr::value_with_info("x", DataType::Float, &dims);
    let graph = merge_last_dims(x).build_graph(["x"]);
    let shapes = infer(&graph);

    let out = output_info(&graph, &shapes);
    assert_eq!(out.dtype, Some(DataType::Float));
    assert_eq!(out.fixed_shape(), Some(vec![2, 3, 20]));

    // The shape argument of the reshape is known exactly.
    let reshape = graph.nodes.iter().find(|n| n.op_type == "Reshape").unwrap();
    let shape_arg = &shapes[&reshape.inputs[1]];
    assert_eq!(shape_arg.constant_values(), Some(vec![2, 3, 20]));
}

#[test]
fn test_infer_reshape_with_symbolic_shape() {
    let dims = [Dim::symbol("batch"), Dim::Fixed(3), Dim::symbol("h"), Dim::symbol("w")];
    let x = Expr::value_with_info("x", DataType::Float, &dims);
    let graph = merge_last_dims(x).build_graph(["x"]);
    let shapes = infer(&graph);

    let out = output_info(&graph, &shapes);
    let expected_last = Dim::from_expr(SymExpr::var("w") * SymExpr::var("h"));
    assert_eq!(
        out.shape,
        Some(vec![Dim::symbol("batch"), Dim::Fixed(3), expected_last])
    );
}

#[test]
fn test_symbolic_dims_propagate_through_elementwise_ops() {
    let dims = [Dim::symbol("batch"), Dim::Fixed(4)];
    let x = Expr::value_with_info("x", DataType::Float, &dims);
    let bias = Expr::constant(Tensor::from_vec(vec![1.0f32, 2., 3., 4.]));
    let graph = (x.unary("Relu") + bias).unary("Sigmoid").build_graph(["x"]);
    let shapes = infer(&graph);

    let out = output_info(&graph, &shapes);
    assert_eq!(out.shape, Some(vec![Dim::symbol("batch"), Dim::Fixed(4)]));
    assert_eq!(out.dtype, Some(DataType::Float));
}

#[test]
fn test_unnamed_input_dims_become_symbols() {
    let x = Expr::value_with_info("x", DataType::Float, &[Dim::Unknown, Dim::Fixed(2)]);
    let graph = x.unary("Neg").build_graph(["x"]);
    let shapes = infer(&graph);

    assert_eq!(
        output_info(&graph, &shapes).shape,
        Some(vec![Dim::symbol("x_dim0"), Dim::Fixed(2)])
    );
}

#[test]
fn test_unknown_operator_gives_unknown_output() {
    let mut graph = Graph::new();
    graph.inputs.push(ValueInfo::new("x", Some(DataType::Float), Some(vec![Dim::Fixed(2)])));
    let mut custom = Node::new("Frobnicate", &["x"], &["y"]);
    custom.domain = Some("com.example".to_string());
    graph.nodes.push(custom);
    graph.nodes.push(Node::new("Relu", &["y"], &["z"]));
    graph.outputs.push(ValueInfo::new("z", None, None));

    let shapes = infer(&graph);
    assert_eq!(shapes["y"], ShapeInfo::unknown());
    assert_eq!(shapes["z"].shape, None);
}

#[test]
fn test_declared_value_info_fills_gaps() {
    let mut graph = Graph::new();
    graph.inputs.push(ValueInfo::new("x", None, None));
    graph.nodes.push(Node::new("Relu", &["x"], &["y"]));
    graph.value_info.push(ValueInfo::new(
        "y",
        Some(DataType::Float),
        Some(vec![Dim::Fixed(5)]),
    ));
    graph.outputs.push(ValueInfo::new("y", None, None));

    let shapes = infer(&graph);
    assert_eq!(shapes["y"].dtype, Some(DataType::Float));
    assert_eq!(shapes["y"].fixed_shape(), Some(vec![5]));
}

#[test]
fn test_inference_is_idempotent() {
    let dims = [Dim::symbol("n"), Dim::Fixed(3), Dim::Fixed(4), Dim::symbol("w")];
    let x = Expr::value_with_info("x", DataType::Float, &dims);
    let graph = merge_last_dims(x.unary("Relu")).build_graph(["x"]);

    let first = infer(&graph);
    let second = infer(&graph);
    assert_eq!(first, second);
}

fn branch(value: f32, len: usize) -> Graph {
    let no_inputs: [&str; 0] = [];
    Expr::constant(Tensor::from_vec(vec![value; len]))
        .unary("Identity")
        .build_graph(no_inputs)
}

fn if_graph(cond: Option<bool>, then_len: usize, else_len: usize) -> Graph {
    let mut graph = Graph::new();
    match cond {
        Some(cond) => graph.set_initializer("cond", Tensor::from_scalar(cond).into()),
        None => graph.inputs.push(ValueInfo::new("cond", Some(DataType::Bool), Some(Vec::new()))),
    }
    graph.nodes.push(
        Node::new("If", &["cond"], &["y"])
            .with_attr("then_branch", AttrValue::Graph(Box::new(branch(1., then_len))))
            .with_attr("else_branch", AttrValue::Graph(Box::new(branch(2., else_len)))),
    );
    graph.outputs.push(ValueInfo::new("y", None, None));
    graph
}

#[test]
fn test_infer_if() {
    struct Case {
        cond: Option<bool>,
        expected: Option<Vec<Dim>>,
    }

    let cases = [
        Case {
            cond: Some(true),
            expected: Some(vec![Dim::Fixed(2)]),
        },
        Case {
            cond: Some(false),
            expected: Some(vec![Dim::Fixed(3)]),
        },
        // With an unknown condition, only facts common to both branches are
        // kept.
        Case {
            cond: None,
            expected: Some(vec![Dim::Unknown]),
        },
    ];

    for Case { cond, expected } in cases {
        let graph = if_graph(cond, 2, 3);
        let shapes = infer(&graph);
        assert_eq!(shapes["y"].shape, expected, "cond {:?}", cond);
        assert_eq!(shapes["y"].dtype, Some(DataType::Float));
    }
}

#[test]
fn test_subgraph_reads_outer_scope_shapes() {
    let mut then_branch = Graph::new();
    then_branch.nodes.push(Node::new("Neg", &["x"], &["then_out"]));
    then_branch.outputs.push(ValueInfo::new("then_out", None, None));
    let mut else_branch = Graph::new();
    else_branch.nodes.push(Node::new("Abs", &["x"], &["else_out"]));
    else_branch.outputs.push(ValueInfo::new("else_out", None, None));

    let mut graph = Graph::new();
    graph.inputs.push(ValueInfo::new(
        "x",
        Some(DataType::Float),
        Some(vec![Dim::symbol("n")]),
    ));
    graph.inputs.push(ValueInfo::new("cond", Some(DataType::Bool), Some(Vec::new())));
    graph.nodes.push(
        Node::new("If", &["cond"], &["y"])
            .with_attr("then_branch", AttrValue::Graph(Box::new(then_branch)))
            .with_attr("else_branch", AttrValue::Graph(Box::new(else_branch))),
    );
    graph.outputs.push(ValueInfo::new("y", None, None));

    let shapes = infer(&graph);
    assert_eq!(shapes["y"].shape, Some(vec![Dim::symbol("n")]));
}

#[test]
fn test_outer_scope_values() {
    let mut graph = Graph::new();
    graph.nodes.push(Node::new("Shape", &["outer"], &["s"]));
    graph.outputs.push(ValueInfo::new("s", None, None));

    let mut outer = FxHashMap::default();
    outer.insert(
        "outer".to_string(),
        ShapeInfo::new(Some(DataType::Float), Some(vec![Dim::Fixed(7), Dim::Fixed(2)])),
    );
    let registry = OpRegistry::with_all_ops();
    let shapes = infer_shapes(&graph, &outer, &registry);
    assert_eq!(shapes["s"].constant_values(), Some(vec![7, 2]));
}
