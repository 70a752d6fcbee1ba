use std::sync::LazyLock;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::graph::Node;
use crate::operator::Operator;

mod onnx_registry;

pub use onnx_registry::{ReadOp, ReadOpContext};

/// Error type for errors that occur when constructing an operator from a
/// node.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReadOpError {
    /// An attribute is missing or has an unsupported or invalid value.
    #[error("error in attribute \"{attr}\": {error}")]
    AttrError {
        /// Name of the attribute.
        attr: String,
        /// Description of the attribute error.
        error: String,
    },

    /// The operator is not recognized.
    #[error("operator {op_type} is not supported")]
    OperatorUnavailable { op_type: String },
}

impl ReadOpError {
    pub(crate) fn attr_error(attr: impl AsRef<str>, error: impl AsRef<str>) -> Self {
        Self::AttrError {
            attr: attr.as_ref().to_string(),
            error: error.as_ref().to_string(),
        }
    }
}

type ReadOpFunction = fn(&Node, &ReadOpContext) -> Result<Box<dyn Operator>, ReadOpError>;

/// Table of operator semantics, keyed by ONNX operator type.
///
/// The registry maps a graph [`Node`] to an [`Operator`], which provides the
/// operator's shape inference rule, its reference implementation and the
/// properties the optimizer needs, such as whether it is deterministic.
///
/// New registries have no operators registered. Use
/// [`OpRegistry::with_all_ops`] or [`default_registry`] to get a registry
/// with all built-in operators.
///
/// Operators whose semantics changed between opset versions are read
/// according to the registry's opset version. A registry without a version
/// uses the latest semantics.
#[derive(Clone, Default)]
pub struct OpRegistry {
    /// Map from operator type (the `NodeProto.op_type` field) to
    /// construction function.
    ops: FxHashMap<&'static str, ReadOpFunction>,

    /// Version of the default ONNX domain that nodes are read with.
    opset_version: Option<i64>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry {
            ops: FxHashMap::default(),
            opset_version: None,
        }
    }

    /// Register the built-in implementation of an operator.
    pub fn register_op<Op: ReadOp + 'static>(&mut self) {
        self.ops.insert(Op::op_type(), Op::read_boxed);
    }

    /// Return a copy of this registry which reads nodes using the semantics
    /// of the given version of the default ONNX domain.
    pub fn with_opset_version(&self, version: Option<i64>) -> OpRegistry {
        OpRegistry {
            ops: self.ops.clone(),
            opset_version: version,
        }
    }

    pub fn opset_version(&self) -> Option<i64> {
        self.opset_version
    }

    /// Return true if an operator with the given type is registered.
    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    /// Construct the operator for a node.
    ///
    /// Only nodes in the default ONNX domain are supported.
    pub fn read_op(&self, node: &Node) -> Result<Box<dyn Operator>, ReadOpError> {
        let unavailable = || ReadOpError::OperatorUnavailable {
            op_type: node.op_type.clone(),
        };
        if !node.is_default_domain() {
            return Err(unavailable());
        }
        let read_fn = self.ops.get(node.op_type.as_str()).ok_or_else(unavailable)?;
        let ctx = ReadOpContext {
            opset_version: self.opset_version,
        };
        read_fn(node, &ctx)
    }

    /// Create a new registry with all built-in operators registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();
        onnx_registry::register_all_ops(&mut reg);
        reg
    }
}

static DEFAULT_REGISTRY: LazyLock<OpRegistry> = LazyLock::new(OpRegistry::with_all_ops);

/// Return the process-wide registry of built-in operators.
///
/// The registry is built on first use and is read-only afterwards, so it can
/// be shared by concurrent simplification runs.
pub fn default_registry() -> &'static OpRegistry {
    &DEFAULT_REGISTRY
}
