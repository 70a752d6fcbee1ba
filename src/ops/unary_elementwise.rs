use crate::infer_shapes::{InferShapes, UnaryOp};
use crate::number::{Arith, Float};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::unary_map;
use crate::tensor::{Element, Tensor};

/// Define an operator which applies a function to each element of a float
/// tensor.
macro_rules! float_unary_op {
    ($name:ident, $func:ident) => {
        #[derive(Debug)]
        pub struct $name {}

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let input = ctx.inputs().require(0)?;
                let output = map_float_dtype!(input.dtype(), T, unary_map(input, $func::<T>));
                output.into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(&UnaryOp)
            }
        }
    };
}

/// Define an operator which applies a function to each element of a tensor
/// with any numeric type.
macro_rules! numeric_unary_op {
    ($name:ident, $func:ident) => {
        #[derive(Debug)]
        pub struct $name {}

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let input = ctx.inputs().require(0)?;
                let output = map_numeric_dtype!(input.dtype(), T, unary_map(input, $func::<T>));
                output.into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(&UnaryOp)
            }
        }
    };
}

fn abs<T: Arith>(x: T) -> T {
    x.abs()
}

fn neg<T: Arith>(x: T) -> T {
    Arith::neg(x)
}

fn sign<T: Arith>(x: T) -> T {
    x.signum()
}

fn relu<T: Arith>(x: T) -> T {
    if x < T::zero() {
        T::zero()
    } else {
        x
    }
}

numeric_unary_op!(Abs, abs);
numeric_unary_op!(Neg, neg);
numeric_unary_op!(Relu, relu);
numeric_unary_op!(Sign, sign);

fn ceil<T: Float>(x: T) -> T {
    x.ceil()
}

fn cos<T: Float>(x: T) -> T {
    x.cos()
}

fn erf<T: Float>(x: T) -> T {
    x.erf()
}

fn exp<T: Float>(x: T) -> T {
    x.exp()
}

fn floor<T: Float>(x: T) -> T {
    x.floor()
}

fn log<T: Float>(x: T) -> T {
    x.ln()
}

fn reciprocal<T: Float>(x: T) -> T {
    T::one() / x
}

fn round<T: Float>(x: T) -> T {
    x.round_even()
}

fn sigmoid<T: Float>(x: T) -> T {
    T::one() / (T::one() + (-x).exp())
}

fn sin<T: Float>(x: T) -> T {
    x.sin()
}

fn softplus<T: Float>(x: T) -> T {
    (x.exp() + T::one()).ln()
}

fn sqrt<T: Float>(x: T) -> T {
    x.sqrt()
}

fn tanh<T: Float>(x: T) -> T {
    x.tanh()
}

float_unary_op!(Ceil, ceil);
float_unary_op!(Cos, cos);
float_unary_op!(Erf, erf);
float_unary_op!(Exp, exp);
float_unary_op!(Floor, floor);
float_unary_op!(Log, log);
float_unary_op!(Reciprocal, reciprocal);
float_unary_op!(Round, round);
float_unary_op!(Sigmoid, sigmoid);
float_unary_op!(Sin, sin);
float_unary_op!(Softplus, softplus);
float_unary_op!(Sqrt, sqrt);
float_unary_op!(Tanh, tanh);

#[derive(Debug)]
pub struct Not {}

impl Operator for Not {
    fn name(&self) -> &str {
        "Not"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        unary_map(input, |x: bool| !x).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(&UnaryOp)
    }
}

/// Define an activation with float parameters.
macro_rules! parametric_activation {
    ($name:ident, [$($param:ident),+], $func:ident) => {
        #[derive(Debug)]
        pub struct $name {
            $(pub $param: f32),+
        }

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let input = ctx.inputs().require(0)?;
                let output = map_float_dtype!(
                    input.dtype(),
                    T,
                    unary_map(input, |x: T| $func(x, $(T::from_f32(self.$param)),+))
                );
                output.into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(&UnaryOp)
            }
        }
    };
}

fn elu<T: Float>(x: T, alpha: T) -> T {
    if x < T::zero() {
        alpha * (x.exp() - T::one())
    } else {
        x
    }
}

fn hard_sigmoid<T: Float>(x: T, alpha: T, beta: T) -> T {
    (alpha * x + beta).maximum(T::zero()).minimum(T::one())
}

fn leaky_relu<T: Float>(x: T, alpha: T) -> T {
    if x < T::zero() {
        alpha * x
    } else {
        x
    }
}

parametric_activation!(Elu, [alpha], elu);
parametric_activation!(HardSigmoid, [alpha, beta], hard_sigmoid);
parametric_activation!(LeakyRelu, [alpha], leaky_relu);

/// Clamp values to a range.
///
/// Bounds are read from the optional `min` and `max` inputs. Models using
/// opset < 11 specify them as attributes instead.
#[derive(Debug, Default)]
pub struct Clip {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

fn clip<T: Arith>(input: &Tensor, min: Option<T>, max: Option<T>) -> Result<Tensor, OpError> {
    unary_map(input, |x: T| {
        let x = match min {
            Some(min) if x < min => min,
            _ => x,
        };
        match max {
            Some(max) if x > max => max,
            _ => x,
        }
    })
}

impl Operator for Clip {
    fn name(&self) -> &str {
        "Clip"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let input = inputs.require(0)?;
        let output = map_numeric_dtype!(input.dtype(), T, {
            let bound = |index: usize, attr: Option<f32>| -> Result<Option<T>, OpError> {
                match inputs.get(index) {
                    Some(t) => t.item::<T>().map(Some).ok_or(OpError::InvalidValue(
                        "clip bounds must be scalars of the input type",
                    )),
                    None => Ok(attr.map(|v| T::from_f64(v as f64))),
                }
            };
            clip::<T>(input, bound(1, self.min)?, bound(2, self.max)?)
        });
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(&UnaryOp)
    }
}
