//! The [`Operator`] trait for defining operators.

use std::any::Any;
use std::fmt::Debug;

use smallvec::SmallVec;
use thiserror::Error;

use crate::graph::{CaptureEnv, Graph};
use crate::infer_shapes::InferShapes;
use crate::interpreter::RunError;
use crate::op_registry::OpRegistry;
use crate::tensor::{Element, Tensor};

/// Possible reasons why an operator may fail on a given input.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum OpError {
    /// A tensor has an unsupported type.
    #[error("unsupported input type")]
    UnsupportedType,

    /// Input tensor shapes are not compatible with each other or operator
    /// attributes.
    #[error("incompatible input shapes: {0}")]
    IncompatibleInputShapes(&'static str),

    /// The number of inputs was less than the required number.
    #[error("required inputs were missing")]
    MissingInputs,

    /// An input has a value that is incorrect.
    #[error("input or attribute has invalid value: {0}")]
    InvalidValue(&'static str),

    /// An input or attribute has a value that is valid, but not currently
    /// supported.
    #[error("unsupported input or attribute value: {0}")]
    UnsupportedValue(&'static str),
}

/// List of inputs for an operator evaluation.
///
/// Omitted optional inputs are `None`.
#[derive(Clone, Default)]
pub struct InputList<'a> {
    inputs: Vec<Option<&'a Tensor>>,
}

impl<'a> InputList<'a> {
    pub fn new(inputs: Vec<Option<&'a Tensor>>) -> InputList<'a> {
        InputList { inputs }
    }

    /// Construct an input list where all inputs are present.
    pub fn from_tensors(inputs: &[&'a Tensor]) -> InputList<'a> {
        InputList {
            inputs: inputs.iter().map(|t| Some(*t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Get an optional input.
    pub fn get(&self, index: usize) -> Option<&'a Tensor> {
        self.inputs.get(index).copied().flatten()
    }

    /// Get a required input.
    pub fn require(&self, index: usize) -> Result<&'a Tensor, OpError> {
        self.get(index).ok_or(OpError::MissingInputs)
    }

    /// Get a required input as a slice of elements of type `T`.
    pub fn require_as<T: Element>(&self, index: usize) -> Result<&'a [T], OpError> {
        self.require(index)?
            .as_slice()
            .ok_or(OpError::UnsupportedType)
    }

    /// Get an optional integer input, such as a list of axes, as `i64`s.
    pub fn get_ints(&self, index: usize) -> Result<Option<Vec<i64>>, OpError> {
        self.get(index)
            .map(|t| t.to_i64_vec().ok_or(OpError::UnsupportedType))
            .transpose()
    }

    /// Get a required integer input as `i64`s.
    pub fn require_ints(&self, index: usize) -> Result<Vec<i64>, OpError> {
        self.get_ints(index)?.ok_or(OpError::MissingInputs)
    }

    /// Iterate over all inputs.
    pub fn iter(&self) -> impl Iterator<Item = Option<&'a Tensor>> + '_ {
        self.inputs.iter().copied()
    }
}

/// Context passed to [`Operator::run`] containing the information needed for
/// the operator to execute.
pub struct OpRunContext<'a, 'i> {
    inputs: &'a InputList<'i>,
    n_outputs: Option<usize>,
    name: Option<&'a str>,
}

impl<'a, 'i> OpRunContext<'a, 'i> {
    pub fn new(inputs: &'a InputList<'i>) -> Self {
        OpRunContext {
            inputs,
            n_outputs: None,
            name: None,
        }
    }

    /// Inputs to the operator execution.
    pub fn inputs(&self) -> &InputList<'i> {
        self.inputs
    }

    /// Set the requested number of outputs.
    ///
    /// This is used by operators such as `Split` where the output count
    /// cannot be determined from the operator's inputs and attributes alone.
    pub fn set_num_outputs(&mut self, n: usize) {
        self.n_outputs = Some(n);
    }

    /// Return the number of requested outputs or `None` if this has not been
    /// specified.
    pub fn num_outputs(&self) -> Option<usize> {
        self.n_outputs
    }

    /// Set the name of the current node in the graph.
    pub fn set_name(&mut self, name: Option<&'a str>) {
        self.name = name;
    }

    /// Return the name of the current node in the graph.
    pub fn name(&self) -> Option<&str> {
        self.name
    }
}

/// Outputs from an operator.
///
/// This avoids allocations in the common case where an operator produces
/// exactly one output.
pub type OutputList = SmallVec<[Tensor; 1]>;

/// Convert the result of an operator function into an [`OutputList`].
pub trait IntoOpResult {
    fn into_op_result(self) -> Result<OutputList, OpError>;
}

impl IntoOpResult for Result<Tensor, OpError> {
    fn into_op_result(self) -> Result<OutputList, OpError> {
        self.map(|tensor| [tensor].into())
    }
}

impl IntoOpResult for Result<Vec<Tensor>, OpError> {
    fn into_op_result(self) -> Result<OutputList, OpError> {
        self.map(|tensors| tensors.into())
    }
}

/// An Operator performs a computation step when executing a data flow graph.
///
/// Operators take zero or more input tensors, plus a set of static
/// attributes, and produce one or more output tensors. Besides executing, an
/// operator describes how it may be simplified: whether it is deterministic,
/// which of its outputs may be dropped and how to infer its output shapes.
///
/// Operators are named after the ONNX operator that they implement.
/// See <https://onnx.ai/onnx/operators/>.
pub trait Operator: Any + Debug + Send + Sync {
    /// Return a display name for the operator.
    fn name(&self) -> &str;

    /// Execute the operator.
    ///
    /// For operators which have subgraphs (see
    /// [`as_subgraph_op`](Operator::as_subgraph_op)), the
    /// [`SubgraphOperator::run_subgraph`] method should be used instead.
    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError>;

    /// Return true if this operator's outputs depend only on its inputs.
    ///
    /// The default implementation returns true, since most operators are
    /// deterministic. Operators such as random number generators however are
    /// not, and are never constant-folded.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// Return the number of leading outputs which are always produced.
    ///
    /// Outputs after these are optional and may be removed from a node when
    /// unused. Returns `None` if all declared outputs must be kept.
    fn required_outputs(&self) -> Option<usize> {
        None
    }

    /// Return the shape inference rule for this operator, if it has one.
    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        None
    }

    /// Return the [`SubgraphOperator`] implementation for this operator, if
    /// this operator has subgraphs.
    fn as_subgraph_op(&self) -> Option<&dyn SubgraphOperator> {
        None
    }
}

impl dyn Operator {
    /// Downcast this operator to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}

/// Trait for operators which contain subgraphs, such as `If` and `Loop`.
pub trait SubgraphOperator: Operator {
    /// Return a list of subgraphs used by this operator.
    fn subgraphs(&self) -> SmallVec<[&Graph; 2]>;

    /// Execute the operator with the given inputs and captured values.
    ///
    /// This should be used instead of [`Operator::run`] for operators that
    /// implement this trait.
    fn run_subgraph(
        &self,
        ctx: &OpRunContext,
        captures: CaptureEnv,
        registry: &OpRegistry,
    ) -> Result<OutputList, RunError>;
}

/// Convenience methods that make it easier to run operators in tests.
#[cfg(test)]
pub trait OperatorExt: Operator {
    /// Run an operator and return the first output.
    fn run_simple(&self, inputs: &[&Tensor]) -> Result<Tensor, OpError> {
        let inputs = InputList::from_tensors(inputs);
        let ctx = OpRunContext::new(&inputs);
        let mut outputs = self.run(&ctx)?;
        Ok(outputs.remove(0))
    }
}

#[cfg(test)]
impl<O: ?Sized + Operator> OperatorExt for O {}
