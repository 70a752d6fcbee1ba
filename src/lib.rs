//! onnxsim simplifies [ONNX](https://onnx.ai) models.
//!
//! Simplification replaces parts of a model's graph that can be computed
//! ahead of time with constants, and rewrites the rest into an equivalent but
//! smaller form. Typical sources of redundancy are shape computations
//! produced by framework exporters (eg. `Shape -> Gather -> Concat ->
//! Reshape` chains), no-op `Identity`, `Cast` or `Dropout` nodes and
//! duplicated subexpressions.
//!
//! # Usage
//!
//! The basic workflow is:
//!
//! 1. Read the serialized model into a byte buffer.
//! 2. Call [`simplify`] with a [`SimplifyOptions`] describing which passes
//!    to run, whether to simplify control flow subgraphs and how many
//!    samples to use when checking the result.
//! 3. Write out the result using [`SimplificationResult::to_bytes`].
//!
//! The [onnxsim-cli](../onnxsim_cli/index.html) crate wraps this in a
//! command-line tool.
//!
//! # Passes
//!
//! Each graph is simplified by repeating the following passes until the graph
//! stops changing, or the iteration limit is reached:
//!
//! - Shape inference, which propagates types and (possibly symbolic) shapes
//!   through the graph.
//! - Constant folding, which evaluates nodes whose inputs are all constants
//!   using reference implementations of the operators, and replaces them with
//!   initializers. Values which shape inference determined, such as the
//!   output of a `Shape` op applied to a statically shaped input, are folded
//!   too.
//! - Rewrite rules, which remove or fuse operators. See
//!   [`REWRITE_NAMES`] for the list.
//! - Dead code elimination.
//!
//! If [`SimplifyOptions::include_subgraph`] is set, the same passes are then
//! applied to the subgraphs of `If` and `Loop` nodes.
//!
//! # Checking
//!
//! When [`SimplifyOptions::check_n`] is non-zero, the original and simplified
//! models are run on generated inputs using the built-in interpreter, and
//! the outputs are compared. The interpreter favors exactness over speed and
//! is not intended for running models in production.

mod check;
mod env;
mod error;
mod graph;
mod infer_shapes;
mod interpreter;
mod model;
mod number;
mod op_registry;
mod operator;
mod optimize;
mod options;
mod simplify;
mod tensor;

pub mod ops;

pub use check::check_equivalence;
pub use error::SimplifyError;
pub use graph::{AttrValue, Attribute, Expr, Graph, Node, ValueInfo};
pub use infer_shapes::{infer_shapes, Dim, ShapeInfo, ShapeMap, SymExpr};
pub use interpreter::{run_graph, RunError};
pub use model::{Model, MAX_SUPPORTED_OPSET};
pub use op_registry::{default_registry, OpRegistry, ReadOp, ReadOpContext, ReadOpError};
pub use operator::{InputList, OpError, OpRunContext, Operator};
pub use optimize::rewrites::REWRITE_NAMES;
pub use optimize::{Diagnostic, DiagnosticLevel, UnsimplifiedSubgraph};
pub use options::{SimplifyOptions, Tolerance, DEFAULT_MAX_ITERATIONS};
pub use simplify::{simplify, simplify_model, SimplificationResult};
pub use tensor::{DataType, Element, Tensor};
