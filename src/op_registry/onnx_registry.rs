use onnxsim_onnx::onnx;

use super::{OpRegistry, ReadOpError};
use crate::graph::{AttrValue, Graph, Node};
use crate::operator::Operator;
use crate::ops;
use crate::ops::{Padding, Window};
use crate::tensor::{DataType, Tensor};

pub(super) fn register_all_ops(reg: &mut OpRegistry) {
    macro_rules! register_op {
        ($op:ident) => {
            reg.register_op::<ops::$op>()
        };
    }

    register_op!(Abs);
    register_op!(Add);
    register_op!(And);
    register_op!(ArgMax);
    register_op!(ArgMin);
    register_op!(AveragePool);
    register_op!(BatchNormalization);
    register_op!(Bernoulli);
    register_op!(Cast);
    register_op!(CastLike);
    register_op!(Ceil);
    register_op!(Clip);
    register_op!(Concat);
    register_op!(Constant);
    register_op!(ConstantOfShape);
    register_op!(Conv);
    register_op!(Cos);
    register_op!(Div);
    register_op!(Dropout);
    register_op!(Elu);
    register_op!(Equal);
    register_op!(Erf);
    register_op!(Exp);
    register_op!(Expand);
    register_op!(Flatten);
    register_op!(Floor);
    register_op!(Gather);
    register_op!(Gemm);
    register_op!(GlobalAveragePool);
    register_op!(Greater);
    register_op!(GreaterOrEqual);
    register_op!(HardSigmoid);
    register_op!(Identity);
    register_op!(If);
    register_op!(LeakyRelu);
    register_op!(Less);
    register_op!(LessOrEqual);
    register_op!(Log);
    register_op!(Loop);
    register_op!(MatMul);
    register_op!(Max);
    register_op!(MaxPool);
    register_op!(Mean);
    register_op!(Min);
    register_op!(Mod);
    register_op!(Mul);
    register_op!(Multinomial);
    register_op!(Neg);
    register_op!(NonZero);
    register_op!(Not);
    register_op!(Or);
    register_op!(Pow);
    register_op!(RandomNormal);
    register_op!(RandomNormalLike);
    register_op!(RandomUniform);
    register_op!(RandomUniformLike);
    register_op!(Range);
    register_op!(Reciprocal);
    register_op!(ReduceMax);
    register_op!(ReduceMean);
    register_op!(ReduceMin);
    register_op!(ReduceProd);
    register_op!(ReduceSum);
    register_op!(Relu);
    register_op!(Reshape);
    register_op!(Round);
    register_op!(Shape);
    register_op!(Sigmoid);
    register_op!(Sign);
    register_op!(Sin);
    register_op!(Size);
    register_op!(Slice);
    register_op!(Softmax);
    register_op!(Softplus);
    register_op!(Split);
    register_op!(Sqrt);
    register_op!(Squeeze);
    register_op!(Sub);
    register_op!(Sum);
    register_op!(Tanh);
    register_op!(Tile);
    register_op!(Transpose);
    register_op!(Unsqueeze);
    register_op!(Where);
    register_op!(Xor);
}

/// Information about the model that a node is read from.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOpContext {
    /// Version of the default ONNX domain, or `None` to use the latest
    /// semantics.
    pub opset_version: Option<i64>,
}

impl ReadOpContext {
    /// Return true if the operator semantics of `version` apply.
    pub fn opset_at_least(&self, version: i64) -> bool {
        self.opset_version.is_none_or(|v| v >= version)
    }
}

/// Construct an operator from the attributes of a graph node.
pub trait ReadOp: Operator + Sized {
    /// Return the operator name from the `NodeProto.op_type` field.
    fn op_type() -> &'static str;

    /// Construct the operator from a node.
    fn read(node: &Node, ctx: &ReadOpContext) -> Result<Self, ReadOpError>;

    /// Construct the operator as a boxed `dyn Operator`.
    ///
    /// The node's type must correspond to the result of `op_type`.
    fn read_boxed(node: &Node, ctx: &ReadOpContext) -> Result<Box<dyn Operator>, ReadOpError> {
        let op = Self::read(node, ctx)?;
        Ok(Box::new(op))
    }
}

/// Wrapper around the attributes of a node.
///
/// This provides methods to find attributes by name and convert them to a
/// target type, reporting an error if the attribute has the wrong type.
struct Attrs<'a> {
    node: &'a Node,
    ctx: &'a ReadOpContext,
}

impl<'a> Attrs<'a> {
    fn new(node: &'a Node, ctx: &'a ReadOpContext) -> Self {
        Self { node, ctx }
    }

    fn opset_at_least(&self, version: i64) -> bool {
        self.ctx.opset_at_least(version)
    }

    /// Get an optional attribute.
    fn get(&self, name: &'static str) -> Option<Attr<'a>> {
        self.node.attr(name).map(|value| Attr { name, value })
    }

    /// Get a required attribute.
    fn require(&self, name: &'static str) -> Result<Attr<'a>, ReadOpError> {
        self.get(name)
            .ok_or_else(|| ReadOpError::attr_error(name, "required attribute missing"))
    }

    fn f32_or(&self, name: &'static str, default: f32) -> Result<f32, ReadOpError> {
        self.get(name).map_or(Ok(default), |v| v.as_f32())
    }

    fn i64_or(&self, name: &'static str, default: i64) -> Result<i64, ReadOpError> {
        self.get(name).map_or(Ok(default), |v| v.as_i64())
    }

    fn bool_or(&self, name: &'static str, default: bool) -> Result<bool, ReadOpError> {
        self.get(name).map_or(Ok(default), |v| v.as_bool())
    }

    fn opt_f32(&self, name: &'static str) -> Result<Option<f32>, ReadOpError> {
        self.get(name).map(|v| v.as_f32()).transpose()
    }

    fn opt_ints(&self, name: &'static str) -> Result<Option<Vec<i64>>, ReadOpError> {
        self.get(name).map(|v| v.as_ints().map(|v| v.to_vec())).transpose()
    }

    fn usize_ints(&self, name: &'static str) -> Result<Vec<usize>, ReadOpError> {
        self.get(name)
            .map_or(Ok(Vec::new()), |v| v.as_usize_ints())
    }

    fn opt_dtype(&self, name: &'static str) -> Result<Option<DataType>, ReadOpError> {
        self.get(name).map(|v| v.as_dtype()).transpose()
    }

    /// Random seed, which is a float attribute in ONNX.
    fn seed(&self) -> Result<Option<f32>, ReadOpError> {
        self.opt_f32("seed")
    }

    /// Number of outputs declared by the node.
    fn num_outputs(&self) -> usize {
        self.node.outputs.len()
    }
}

/// Wrapper around an attribute value.
#[derive(Copy, Clone)]
struct Attr<'a> {
    name: &'static str,
    value: &'a AttrValue,
}

impl<'a> Attr<'a> {
    fn type_error(&self, expected: &str) -> ReadOpError {
        ReadOpError::attr_error(self.name, format!("expected {} attribute", expected))
    }

    fn as_bool(&self) -> Result<bool, ReadOpError> {
        self.as_i64().map(|v| v != 0)
    }

    fn as_f32(&self) -> Result<f32, ReadOpError> {
        match self.value {
            AttrValue::Float(v) => Ok(*v),
            _ => Err(self.type_error("float")),
        }
    }

    fn as_i64(&self) -> Result<i64, ReadOpError> {
        match self.value {
            AttrValue::Int(v) => Ok(*v),
            _ => Err(self.type_error("int")),
        }
    }

    fn as_ints(&self) -> Result<&'a [i64], ReadOpError> {
        match self.value {
            AttrValue::Ints(v) => Ok(v),
            _ => Err(self.type_error("ints")),
        }
    }

    fn as_usize_ints(&self) -> Result<Vec<usize>, ReadOpError> {
        self.as_ints()?
            .iter()
            .map(|&v| {
                usize::try_from(v)
                    .map_err(|_| ReadOpError::attr_error(self.name, "value must be non-negative"))
            })
            .collect()
    }

    fn as_str(&self) -> Result<&'a str, ReadOpError> {
        match self.value {
            AttrValue::String(v) => std::str::from_utf8(v)
                .map_err(|_| ReadOpError::attr_error(self.name, "string is not valid UTF-8")),
            _ => Err(self.type_error("string")),
        }
    }

    fn as_tensor(&self) -> Result<&'a Tensor, ReadOpError> {
        match self.value {
            AttrValue::Tensor(t) if t.is_evaluable() => Ok(t),
            AttrValue::Tensor(_) => Err(ReadOpError::attr_error(self.name, "unsupported tensor type")),
            _ => Err(self.type_error("tensor")),
        }
    }

    fn as_graph(&self) -> Result<&'a Graph, ReadOpError> {
        match self.value {
            AttrValue::Graph(g) => Ok(g),
            _ => Err(self.type_error("graph")),
        }
    }

    /// Get the data type which corresponds to an ONNX `DataType` value.
    fn as_dtype(&self) -> Result<DataType, ReadOpError> {
        let onnx_dtype = onnx::DataType(self.as_i64()? as i32);
        DataType::from_onnx(onnx_dtype)
            .ok_or_else(|| ReadOpError::attr_error(self.name, "unsupported data type"))
    }

    /// Get the value of a string enum and convert it to enum type `T`.
    fn as_string_enum<T>(&self, map: impl Fn(&str) -> Option<T>) -> Result<T, ReadOpError> {
        map(self.as_str()?).ok_or_else(|| ReadOpError::attr_error(self.name, "unsupported value"))
    }
}

macro_rules! impl_read_op {
    ($op:ident) => {
        impl ReadOp for ops::$op {
            fn op_type() -> &'static str {
                stringify!($op)
            }

            fn read(_node: &Node, _ctx: &ReadOpContext) -> Result<Self, ReadOpError> {
                Ok(ops::$op {})
            }
        }
    };

    ($op:ident, $read:expr) => {
        impl ReadOp for ops::$op {
            fn op_type() -> &'static str {
                stringify!($op)
            }

            fn read(node: &Node, ctx: &ReadOpContext) -> Result<Self, ReadOpError> {
                let attrs = Attrs::new(node, ctx);
                $read(&attrs)
            }
        }
    };
}

impl_read_op!(Abs);
impl_read_op!(Add);
impl_read_op!(And);

macro_rules! impl_read_arg_op {
    ($op:ident) => {
        impl_read_op!($op, |attrs: &Attrs| {
            Ok(ops::$op {
                axis: attrs.i64_or("axis", 0)?,
                keep_dims: attrs.bool_or("keepdims", true)?,
                select_last_index: attrs.bool_or("select_last_index", false)?,
            })
        });
    };
}

impl_read_arg_op!(ArgMax);
impl_read_arg_op!(ArgMin);

/// Read the `auto_pad` and `pads` attributes of a convolution or pooling
/// operator.
fn read_padding(attrs: &Attrs) -> Result<Padding, ReadOpError> {
    let auto_pad = match attrs.get("auto_pad") {
        Some(attr) => attr.as_string_enum(|s| match s {
            "NOTSET" => Some(None),
            "SAME_UPPER" => Some(Some(Padding::SameUpper)),
            "SAME_LOWER" => Some(Some(Padding::SameLower)),
            "VALID" => Some(Some(Padding::Valid)),
            _ => None,
        })?,
        None => None,
    };
    match auto_pad {
        Some(padding) => Ok(padding),
        None => Ok(Padding::Fixed(attrs.usize_ints("pads")?)),
    }
}

fn read_window(attrs: &Attrs) -> Result<Window, ReadOpError> {
    Ok(Window {
        kernel: attrs.require("kernel_shape")?.as_usize_ints()?,
        strides: attrs.usize_ints("strides")?,
        dilations: attrs.usize_ints("dilations")?,
        padding: read_padding(attrs)?,
        ceil_mode: attrs.bool_or("ceil_mode", false)?,
    })
}

impl_read_op!(AveragePool, |attrs: &Attrs| {
    Ok(ops::AveragePool {
        window: read_window(attrs)?,
        count_include_pad: attrs.bool_or("count_include_pad", false)?,
    })
});

impl_read_op!(BatchNormalization, |attrs: &Attrs| {
    Ok(ops::BatchNormalization {
        epsilon: attrs.f32_or("epsilon", 1e-5)?,
    })
});

impl_read_op!(Bernoulli, |attrs: &Attrs| {
    Ok(ops::Bernoulli {
        dtype: attrs.opt_dtype("dtype")?,
        seed: attrs.seed()?,
    })
});

impl_read_op!(Cast, |attrs: &Attrs| {
    let to = attrs.require("to")?.as_dtype()?;
    Ok(ops::Cast { to })
});

impl_read_op!(CastLike);
impl_read_op!(Ceil);

impl_read_op!(Clip, |attrs: &Attrs| {
    Ok(ops::Clip {
        min: attrs.opt_f32("min")?,
        max: attrs.opt_f32("max")?,
    })
});

impl_read_op!(Concat, |attrs: &Attrs| {
    let axis = attrs.require("axis")?.as_i64()?;
    Ok(ops::Concat { axis })
});

impl_read_op!(Constant, |attrs: &Attrs| {
    let value = if let Some(attr) = attrs.get("value") {
        attr.as_tensor()?.clone()
    } else if let Some(attr) = attrs.get("value_float") {
        Tensor::from_scalar(attr.as_f32()?)
    } else if let Some(attr) = attrs.get("value_floats") {
        match attr.value {
            AttrValue::Floats(v) => Tensor::from_vec(v.clone()),
            _ => return Err(attr.type_error("floats")),
        }
    } else if let Some(attr) = attrs.get("value_int") {
        Tensor::from_scalar(attr.as_i64()?)
    } else if let Some(attr) = attrs.get("value_ints") {
        Tensor::from_vec(attr.as_ints()?.to_vec())
    } else {
        return Err(ReadOpError::attr_error("value", "unsupported or missing value attribute"));
    };
    Ok(ops::Constant { value })
});

impl_read_op!(ConstantOfShape, |attrs: &Attrs| {
    match attrs.get("value") {
        Some(attr) => {
            let value = attr.as_tensor()?;
            if value.len() != 1 {
                return Err(ReadOpError::attr_error("value", "must have one element"));
            }
            Ok(ops::ConstantOfShape {
                value: value.clone(),
            })
        }
        None => Ok(ops::ConstantOfShape::default()),
    }
});

impl_read_op!(Conv, |attrs: &Attrs| {
    let groups = attrs.i64_or("group", 1)?;
    let groups = usize::try_from(groups)
        .ok()
        .filter(|g| *g > 0)
        .ok_or_else(|| ReadOpError::attr_error("group", "must be positive"))?;
    let kernel_shape = match attrs.get("kernel_shape") {
        Some(attr) => Some(attr.as_usize_ints()?),
        None => None,
    };
    Ok(ops::Conv {
        padding: read_padding(attrs)?,
        groups,
        strides: attrs.usize_ints("strides")?,
        dilations: attrs.usize_ints("dilations")?,
        kernel_shape,
    })
});

impl_read_op!(Cos);
impl_read_op!(Div);

impl_read_op!(Dropout, |attrs: &Attrs| {
    // Before opset 7, dropout runs in training mode unless `is_test` is set.
    // Later versions default to inference mode.
    let training_mode = !attrs.opset_at_least(7) && !attrs.bool_or("is_test", false)?;
    Ok(ops::Dropout { training_mode })
});

impl_read_op!(Elu, |attrs: &Attrs| {
    Ok(ops::Elu {
        alpha: attrs.f32_or("alpha", 1.0)?,
    })
});

impl_read_op!(Equal);
impl_read_op!(Erf);
impl_read_op!(Exp);
impl_read_op!(Expand);

impl_read_op!(Flatten, |attrs: &Attrs| {
    Ok(ops::Flatten {
        axis: attrs.i64_or("axis", 1)?,
    })
});

impl_read_op!(Floor);

impl_read_op!(Gather, |attrs: &Attrs| {
    Ok(ops::Gather {
        axis: attrs.i64_or("axis", 0)?,
    })
});

impl_read_op!(Gemm, |attrs: &Attrs| {
    Ok(ops::Gemm {
        alpha: attrs.f32_or("alpha", 1.0)?,
        beta: attrs.f32_or("beta", 1.0)?,
        transpose_a: attrs.bool_or("transA", false)?,
        transpose_b: attrs.bool_or("transB", false)?,
    })
});

impl_read_op!(GlobalAveragePool);
impl_read_op!(Greater);
impl_read_op!(GreaterOrEqual);

impl_read_op!(HardSigmoid, |attrs: &Attrs| {
    Ok(ops::HardSigmoid {
        alpha: attrs.f32_or("alpha", 0.2)?,
        beta: attrs.f32_or("beta", 0.5)?,
    })
});

impl_read_op!(Identity);

impl_read_op!(If, |attrs: &Attrs| {
    Ok(ops::If {
        then_branch: attrs.require("then_branch")?.as_graph()?.clone(),
        else_branch: attrs.require("else_branch")?.as_graph()?.clone(),
    })
});

impl_read_op!(LeakyRelu, |attrs: &Attrs| {
    Ok(ops::LeakyRelu {
        alpha: attrs.f32_or("alpha", 0.01)?,
    })
});

impl_read_op!(Less);
impl_read_op!(LessOrEqual);
impl_read_op!(Log);

impl_read_op!(Loop, |attrs: &Attrs| {
    Ok(ops::Loop {
        body: attrs.require("body")?.as_graph()?.clone(),
    })
});

impl_read_op!(MatMul);
impl_read_op!(Max);

impl_read_op!(MaxPool, |attrs: &Attrs| {
    if attrs.i64_or("storage_order", 0)? != 0 {
        return Err(ReadOpError::attr_error("storage_order", "column-major indices are not supported"));
    }
    Ok(ops::MaxPool {
        window: read_window(attrs)?,
    })
});

impl_read_op!(Mean);
impl_read_op!(Min);

impl_read_op!(Mod, |attrs: &Attrs| {
    Ok(ops::Mod {
        fmod: attrs.bool_or("fmod", false)?,
    })
});

impl_read_op!(Mul);

impl_read_op!(Multinomial, |attrs: &Attrs| {
    let sample_size = attrs.i64_or("sample_size", 1)?;
    let sample_size = usize::try_from(sample_size)
        .map_err(|_| ReadOpError::attr_error("sample_size", "must be non-negative"))?;
    Ok(ops::Multinomial {
        sample_size,
        dtype: attrs.opt_dtype("dtype")?.unwrap_or(DataType::Int32),
        seed: attrs.seed()?,
    })
});

impl_read_op!(Neg);
impl_read_op!(NonZero);
impl_read_op!(Not);
impl_read_op!(Or);
impl_read_op!(Pow);

impl_read_op!(RandomNormal, |attrs: &Attrs| {
    Ok(ops::RandomNormal {
        mean: attrs.f32_or("mean", 0.)?,
        scale: attrs.f32_or("scale", 1.)?,
        shape: attrs.require("shape")?.as_usize_ints()?,
        dtype: attrs.opt_dtype("dtype")?.unwrap_or(DataType::Float),
        seed: attrs.seed()?,
    })
});

impl_read_op!(RandomNormalLike, |attrs: &Attrs| {
    Ok(ops::RandomNormalLike {
        mean: attrs.f32_or("mean", 0.)?,
        scale: attrs.f32_or("scale", 1.)?,
        dtype: attrs.opt_dtype("dtype")?,
        seed: attrs.seed()?,
    })
});

impl_read_op!(RandomUniform, |attrs: &Attrs| {
    Ok(ops::RandomUniform {
        low: attrs.f32_or("low", 0.)?,
        high: attrs.f32_or("high", 1.)?,
        shape: attrs.require("shape")?.as_usize_ints()?,
        dtype: attrs.opt_dtype("dtype")?.unwrap_or(DataType::Float),
        seed: attrs.seed()?,
    })
});

impl_read_op!(RandomUniformLike, |attrs: &Attrs| {
    Ok(ops::RandomUniformLike {
        low: attrs.f32_or("low", 0.)?,
        high: attrs.f32_or("high", 1.)?,
        dtype: attrs.opt_dtype("dtype")?,
        seed: attrs.seed()?,
    })
});

impl_read_op!(Range);
impl_read_op!(Reciprocal);

macro_rules! impl_read_reduce_op {
    ($op:ident) => {
        impl_read_op!($op, |attrs: &Attrs| {
            Ok(ops::$op {
                axes: attrs.opt_ints("axes")?,
                keep_dims: attrs.bool_or("keepdims", true)?,
                noop_with_empty_axes: attrs.bool_or("noop_with_empty_axes", false)?,
            })
        });
    };
}

impl_read_reduce_op!(ReduceMax);
impl_read_reduce_op!(ReduceMean);
impl_read_reduce_op!(ReduceMin);
impl_read_reduce_op!(ReduceProd);
impl_read_reduce_op!(ReduceSum);

impl_read_op!(Relu);

impl_read_op!(Reshape, |attrs: &Attrs| {
    Ok(ops::Reshape {
        allow_zero: attrs.bool_or("allowzero", false)?,
    })
});

impl_read_op!(Round);

impl_read_op!(Shape, |attrs: &Attrs| {
    Ok(ops::Shape {
        start: attrs.get("start").map(|v| v.as_i64()).transpose()?,
        end: attrs.get("end").map(|v| v.as_i64()).transpose()?,
    })
});

impl_read_op!(Sigmoid);
impl_read_op!(Sign);
impl_read_op!(Sin);
impl_read_op!(Size);

impl_read_op!(Slice, |attrs: &Attrs| {
    Ok(ops::Slice {
        starts: attrs.opt_ints("starts")?,
        ends: attrs.opt_ints("ends")?,
        axes: attrs.opt_ints("axes")?,
    })
});

impl_read_op!(Softmax, |attrs: &Attrs| {
    // Opset 13 changed the default axis and stopped coercing the input to 2D.
    let legacy = !attrs.opset_at_least(13);
    Ok(ops::Softmax {
        axis: attrs.i64_or("axis", if legacy { 1 } else { -1 })?,
        flatten: legacy,
    })
});

impl_read_op!(Softplus);

impl_read_op!(Split, |attrs: &Attrs| {
    let num_outputs = match attrs.get("num_outputs") {
        Some(attr) => usize::try_from(attr.as_i64()?)
            .map_err(|_| ReadOpError::attr_error("num_outputs", "must be non-negative"))?,
        None => attrs.num_outputs(),
    };
    Ok(ops::Split {
        axis: attrs.i64_or("axis", 0)?,
        split: attrs.opt_ints("split")?,
        num_outputs: Some(num_outputs),
    })
});

impl_read_op!(Sqrt);

impl_read_op!(Squeeze, |attrs: &Attrs| {
    Ok(ops::Squeeze {
        axes: attrs.opt_ints("axes")?,
    })
});

impl_read_op!(Sub);
impl_read_op!(Sum);
impl_read_op!(Tanh);
impl_read_op!(Tile);

impl_read_op!(Transpose, |attrs: &Attrs| {
    Ok(ops::Transpose {
        perm: attrs.opt_ints("perm")?,
    })
});

impl_read_op!(Unsqueeze, |attrs: &Attrs| {
    Ok(ops::Unsqueeze {
        axes: attrs.opt_ints("axes")?,
    })
});

impl_read_op!(Where);
impl_read_op!(Xor);

#[cfg(test)]
mod tests {
    use super::super::{OpRegistry, ReadOpError};
    use crate::graph::{AttrValue, Node};
    use crate::ops;

    #[test]
    fn test_read_op_with_attrs() {
        let registry = OpRegistry::with_all_ops();
        let node = Node::new("Gemm", &["a", "b"], &["c"])
            .with_attr("alpha", AttrValue::Float(0.5))
            .with_attr("transB", AttrValue::Int(1));
        let op = registry.read_op(&node).unwrap();
        let gemm = op.downcast_ref::<ops::Gemm>().unwrap();
        assert_eq!(gemm.alpha, 0.5);
        assert_eq!(gemm.beta, 1.0);
        assert!(!gemm.transpose_a);
        assert!(gemm.transpose_b);
    }

    #[test]
    fn test_read_op_errors() {
        struct Case {
            node: Node,
            expected: ReadOpError,
        }

        let cases = [
            Case {
                node: Node::new("FancyOp", &["x"], &["y"]),
                expected: ReadOpError::OperatorUnavailable {
                    op_type: "FancyOp".to_string(),
                },
            },
            Case {
                node: Node::new("Concat", &["x"], &["y"]),
                expected: ReadOpError::attr_error("axis", "required attribute missing"),
            },
            Case {
                node: Node::new("Gather", &["x", "i"], &["y"])
                    .with_attr("axis", AttrValue::Float(1.0)),
                expected: ReadOpError::attr_error("axis", "expected int attribute"),
            },
            Case {
                node: Node::new("Conv", &["x", "w"], &["y"])
                    .with_attr("auto_pad", AttrValue::String(b"BOGUS".to_vec())),
                expected: ReadOpError::attr_error("auto_pad", "unsupported value"),
            },
        ];

        let registry = OpRegistry::with_all_ops();
        for Case { node, expected } in cases {
            let err = registry.read_op(&node).err();
            assert_eq!(err, Some(expected), "{}", node.op_type);
        }
    }

    #[test]
    fn test_custom_domain_is_unavailable() {
        let registry = OpRegistry::with_all_ops();
        let mut node = Node::new("Relu", &["x"], &["y"]);
        node.domain = Some("com.example".to_string());
        assert!(registry.read_op(&node).is_err());
    }

    #[test]
    fn test_split_output_count_defaults_to_node_outputs() {
        let registry = OpRegistry::with_all_ops();
        let node = Node::new("Split", &["x"], &["a", "b", "c"]);
        let op = registry.read_op(&node).unwrap();
        let split = op.downcast_ref::<ops::Split>().unwrap();
        assert_eq!(split.num_outputs, Some(3));
    }

    #[test]
    fn test_softmax_depends_on_opset() {
        struct Case {
            opset: Option<i64>,
            axis: Option<i64>,
            expected_axis: i64,
            expected_flatten: bool,
        }

        let cases = [
            Case {
                opset: None,
                axis: None,
                expected_axis: -1,
                expected_flatten: false,
            },
            Case {
                opset: Some(13),
                axis: Some(1),
                expected_axis: 1,
                expected_flatten: false,
            },
            Case {
                opset: Some(11),
                axis: None,
                expected_axis: 1,
                expected_flatten: true,
            },
            Case {
                opset: Some(12),
                axis: Some(-1),
                expected_axis: -1,
                expected_flatten: true,
            },
        ];

        let all_ops = OpRegistry::with_all_ops();
        for case in cases {
            let registry = all_ops.with_opset_version(case.opset);
            assert_eq!(registry.opset_version(), case.opset);

            let mut node = Node::new("Softmax", &["x"], &["y"]);
            if let Some(axis) = case.axis {
                node = node.with_attr("axis", AttrValue::Int(axis));
            }
            let op = registry.read_op(&node).unwrap();
            let softmax = op.downcast_ref::<ops::Softmax>().unwrap();
            assert_eq!(softmax.axis, case.expected_axis, "opset {:?}", case.opset);
            assert_eq!(softmax.flatten, case.expected_flatten, "opset {:?}", case.opset);
        }
    }

    #[test]
    fn test_dropout_training_mode() {
        let all_ops = OpRegistry::with_all_ops();
        let read_dropout = |opset: Option<i64>, is_test: Option<i64>| {
            let mut node = Node::new("Dropout", &["x"], &["y"]);
            if let Some(is_test) = is_test {
                node = node.with_attr("is_test", AttrValue::Int(is_test));
            }
            all_ops
                .with_opset_version(opset)
                .read_op(&node)
                .unwrap()
                .is_deterministic()
        };

        assert!(read_dropout(None, None));
        assert!(read_dropout(Some(7), None));
        assert!(!read_dropout(Some(6), None));
        assert!(read_dropout(Some(6), Some(1)));
    }

    #[test]
    fn test_random_ops_are_not_deterministic() {
        let registry = OpRegistry::with_all_ops();
        let node = Node::new("RandomUniformLike", &["x"], &["y"]);
        assert!(!registry.read_op(&node).unwrap().is_deterministic());
        let node = Node::new("Relu", &["x"], &["y"]);
        assert!(registry.read_op(&node).unwrap().is_deterministic());
    }
}
