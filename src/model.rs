//! Loading and saving ONNX models.

use onnxsim_onnx::onnx;
use onnxsim_onnx::protobuf::{DecodeMessage, EncodeMessage};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::SimplifyError;
use crate::graph::Graph;

/// Newest version of the default ONNX operator set that is supported.
pub const MAX_SUPPORTED_OPSET: i64 = 21;

/// Minimum IR version at which graph inputs and initializers are separate
/// lists. In older models every initializer must also be listed as an input.
pub const IR_VERSION_SEPARATE_INITIALIZERS: i64 = 4;

fn is_default_domain(domain: Option<&str>) -> bool {
    matches!(domain, None | Some("") | Some("ai.onnx"))
}

/// An ONNX model: a main graph plus model-level metadata.
///
/// Fields of the `ModelProto` other than the graph, such as the IR version,
/// opset imports, producer and metadata properties, are kept as decoded and
/// written back unchanged by [`serialize`](Model::serialize).
#[derive(Clone, Debug)]
pub struct Model {
    pub graph: Graph,

    /// Model message with the `graph` field removed.
    proto: onnx::ModelProto,
}

impl Model {
    /// Decode and check a serialized model.
    ///
    /// Fails if the model cannot be decoded, imports an unsupported opset,
    /// violates a structural invariant of the graph or contains a cycle.
    pub fn load(buf: &[u8]) -> Result<Model, SimplifyError> {
        let mut proto = onnx::ModelProto::decode(buf)?;
        check_opsets(&proto.opset_import)?;

        let graph_proto = proto
            .graph
            .take()
            .ok_or_else(|| SimplifyError::MalformedGraph("model has no graph".to_string()))?;
        let graph = Graph::from_proto(&graph_proto)?;
        graph.validate(&FxHashSet::default())?;
        graph.topological_order()?;

        debug!(
            "Loaded model with {} nodes, {} initializers, opset {:?}",
            graph.total_node_count(),
            graph.initializers.len(),
            opset_version(&proto.opset_import)
        );
        Ok(Model { graph, proto })
    }

    /// Create a model from a graph, importing version `opset` of the default
    /// operator set.
    pub fn from_graph(graph: Graph, opset: i64) -> Model {
        let proto = onnx::ModelProto {
            ir_version: Some(8),
            producer_name: Some("onnxsim".to_string()),
            opset_import: vec![onnx::OperatorSetIdProto {
                domain: Some(String::new()),
                version: Some(opset),
                ..Default::default()
            }],
            ..Default::default()
        };
        Model { graph, proto }
    }

    pub fn ir_version(&self) -> Option<i64> {
        self.proto.ir_version
    }

    /// Return the imported version of the default operator set.
    pub fn opset_version(&self) -> Option<i64> {
        opset_version(&self.proto.opset_import)
    }

    pub fn set_ir_version(&mut self, version: Option<i64>) {
        self.proto.ir_version = version;
    }

    /// Return true if initializers of the main graph which are also listed
    /// as graph inputs are defaults that callers can replace.
    ///
    /// This is the case before IR version 4. From version 4 such initializers
    /// are treated as constants. A model without an IR version is treated as
    /// a current one.
    pub fn initializers_overridable(&self) -> bool {
        self.ir_version()
            .is_some_and(|v| v < IR_VERSION_SEPARATE_INITIALIZERS)
    }

    pub fn to_proto(&self) -> onnx::ModelProto {
        let mut proto = self.proto.clone();
        proto.graph = Some(self.graph.to_proto());
        proto
    }

    /// Encode the model in the ONNX protobuf format.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_proto().encode()
    }
}

fn opset_version(opsets: &[onnx::OperatorSetIdProto]) -> Option<i64> {
    opsets
        .iter()
        .find(|op| is_default_domain(op.domain.as_deref()))
        .and_then(|op| op.version)
}

fn check_opsets(opsets: &[onnx::OperatorSetIdProto]) -> Result<(), SimplifyError> {
    for opset in opsets {
        let version = opset.version.unwrap_or_default();
        if is_default_domain(opset.domain.as_deref()) && version > MAX_SUPPORTED_OPSET {
            return Err(SimplifyError::UnsupportedOpset {
                domain: opset.domain.clone().unwrap_or_default(),
                version,
                max: MAX_SUPPORTED_OPSET,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use onnxsim_onnx::protobuf::EncodeMessage;

    use super::{Model, MAX_SUPPORTED_OPSET};
    use crate::error::SimplifyError;
    use crate::graph::{Expr, Graph, Node, ValueInfo};
    use crate::tensor::DataType;

    fn add_one_model(opset: i64) -> Model {
        let x = Expr::value("x");
        Model::from_graph((x + 1.0).build_graph(["x"]), opset)
    }

    #[test]
    fn test_load_round_trip() {
        let bytes = add_one_model(13).serialize();
        let model = Model::load(&bytes).unwrap();
        assert_eq!(model.opset_version(), Some(13));
        assert_eq!(model.graph.nodes.len(), 1);
        assert_eq!(model.serialize(), bytes);
    }

    #[test]
    fn test_load_errors() {
        struct Case {
            bytes: Vec<u8>,
            check: fn(&SimplifyError) -> bool,
        }

        let mut no_graph = add_one_model(13).to_proto();
        no_graph.graph = None;

        let mut undefined_input = Graph::new();
        undefined_input.nodes.push(Node::new("Relu", &["nowhere"], &["y"]));
        undefined_input.outputs.push(ValueInfo::new("y", None, None));

        let mut cyclic = Graph::new();
        cyclic.inputs.push(ValueInfo::new("x", Some(DataType::Float), None));
        cyclic.nodes.push(Node::new("Add", &["x", "b"], &["a"]));
        cyclic.nodes.push(Node::new("Relu", &["a"], &["b"]));
        cyclic.outputs.push(ValueInfo::new("b", None, None));

        let cases = [
            Case {
                bytes: add_one_model(MAX_SUPPORTED_OPSET + 1).serialize(),
                check: |err| matches!(err, SimplifyError::UnsupportedOpset { .. }),
            },
            Case {
                bytes: no_graph.encode(),
                check: |err| matches!(err, SimplifyError::MalformedGraph(_)),
            },
            Case {
                bytes: Model::from_graph(undefined_input, 13).serialize(),
                check: |err| matches!(err, SimplifyError::MalformedGraph(_)),
            },
            Case {
                bytes: Model::from_graph(cyclic, 13).serialize(),
                check: |err| matches!(err, SimplifyError::CyclicGraph(_)),
            },
            Case {
                bytes: vec![0x0a, 0xff],
                check: |err| matches!(err, SimplifyError::Decode(_)),
            },
        ];

        for (i, case) in cases.iter().enumerate() {
            let err = Model::load(&case.bytes).unwrap_err();
            assert!((case.check)(&err), "case {}: unexpected error {}", i, err);
        }
    }

    #[test]
    fn test_initializers_overridable() {
        let mut model = add_one_model(13);
        assert!(!model.initializers_overridable());
        model.set_ir_version(Some(3));
        assert!(model.initializers_overridable());
        model.set_ir_version(None);
        assert!(!model.initializers_overridable());
    }
}
