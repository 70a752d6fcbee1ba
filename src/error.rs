use onnxsim_onnx::protobuf::ProtobufError;
use thiserror::Error;

use crate::interpreter::RunError;

/// Errors which abort a simplification run.
///
/// Conditions which only affect a single node, such as an operator without a
/// reference implementation, are handled inside the pass that encounters them
/// and never surface as a `SimplifyError`.
#[derive(Debug, Error)]
pub enum SimplifyError {
    /// The serialized model could not be decoded.
    #[error("failed to decode model: {0}")]
    Decode(#[from] ProtobufError),

    /// A structural invariant of the graph is violated.
    #[error("malformed graph: {0}")]
    MalformedGraph(String),

    /// The graph's nodes cannot be put in topological order.
    #[error("graph contains a cycle through node \"{0}\"")]
    CyclicGraph(String),

    /// The model imports an operator set newer than the supported range.
    #[error("unsupported opset version {version} for domain \"{domain}\" (maximum supported is {max})")]
    UnsupportedOpset {
        domain: String,
        version: i64,
        max: i64,
    },

    /// A caller-specified output name does not exist in the graph.
    #[error("output \"{0}\" does not exist in the graph")]
    UnknownOutputName(String),

    /// An input has a symbolic or unknown dimension, and dynamic input shapes
    /// were not enabled.
    #[error("input \"{input}\" has a dynamic shape; enable dynamic input shapes or overwrite the input shape")]
    DynamicInputShape { input: String },

    /// A configuration option is invalid.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// A graph could not be executed while checking equivalence.
    #[error("graph execution failed: {0}")]
    Run(#[from] RunError),
}
