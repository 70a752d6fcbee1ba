use crate::infer_shapes::{
    broadcast_dims, require_input, BinaryOp, InferShapes, InferShapesError, ShapeInfo, SymExpr,
};
use crate::number::Arith;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{binary_map, broadcast_offsets, broadcast_shapes};
use crate::tensor::{DataType, Tensor};

fn add_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Some(a + b)
}

fn sub_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Some(a - b)
}

fn mul_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Some(a * b)
}

fn div_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    match (a.as_value(), b.as_value()) {
        (Some(x), Some(y)) => Arith::div(x, y).map(SymExpr::Value),
        // Sizes are non-negative, so flooring and truncating division agree.
        (_, Some(y)) if y > 0 => Some(a / b),
        _ => None,
    }
}

fn mod_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Arith::rem(a.as_value()?, b.as_value()?, false).map(SymExpr::Value)
}

fn fmod_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Arith::rem(a.as_value()?, b.as_value()?, true).map(SymExpr::Value)
}

static ADD_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(add_values),
};
static SUB_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(sub_values),
};
static MUL_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(mul_values),
};
static DIV_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(div_values),
};
static MOD_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(mod_values),
};
static FMOD_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: Some(fmod_values),
};
static POW_SHAPES: BinaryOp = BinaryOp {
    output_dtype: None,
    values: None,
};

/// Define a binary operator with numeric inputs and outputs of the same type.
macro_rules! arith_op {
    ($name:ident, $func:expr, $shapes:ident) => {
        #[derive(Debug)]
        pub struct $name {}

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let a = ctx.inputs().require(0)?;
                let b = ctx.inputs().require(1)?;
                let output = map_numeric_dtype!(a.dtype(), T, binary_map::<T, T>(a, b, $func));
                output.into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(&$shapes)
            }
        }
    };
}

arith_op!(Add, |x, y| Some(Arith::add(x, y)), ADD_SHAPES);
arith_op!(Sub, |x, y| Some(Arith::sub(x, y)), SUB_SHAPES);
arith_op!(Mul, |x, y| Some(Arith::mul(x, y)), MUL_SHAPES);
arith_op!(Div, Arith::div, DIV_SHAPES);

/// Raise the first input to the power of the second.
///
/// The exponent may have a different type than the base. It is converted to
/// the type of the base.
#[derive(Debug)]
pub struct Pow {}

impl Operator for Pow {
    fn name(&self) -> &str {
        "Pow"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let a = ctx.inputs().require(0)?;
        let b = ctx.inputs().require(1)?;
        let b = b.cast(a.dtype()).ok_or(OpError::UnsupportedType)?;
        let output = map_numeric_dtype!(
            a.dtype(),
            T,
            binary_map::<T, T>(a, &b, |x, y| Some(Arith::pow(x, y)))
        );
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(&POW_SHAPES)
    }
}

#[derive(Debug)]
pub struct Mod {
    /// If true, the result has the sign of the dividend (like C's `fmod`).
    /// Otherwise it has the sign of the divisor (like Python's `%`).
    pub fmod: bool,
}

impl Operator for Mod {
    fn name(&self) -> &str {
        "Mod"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let a = ctx.inputs().require(0)?;
        let b = ctx.inputs().require(1)?;
        let output = map_numeric_dtype!(
            a.dtype(),
            T,
            binary_map::<T, T>(a, b, |x, y| Arith::rem(x, y, self.fmod))
        );
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        if self.fmod {
            Some(&FMOD_SHAPES)
        } else {
            Some(&MOD_SHAPES)
        }
    }
}

/// Evaluate a comparison of two values if they are known.
fn compare_values(
    a: &SymExpr,
    b: &SymExpr,
    cmp: fn(i64, i64) -> bool,
    same: Option<bool>,
) -> Option<SymExpr> {
    match (a.as_value(), b.as_value()) {
        (Some(x), Some(y)) => Some(SymExpr::Value(cmp(x, y) as i64)),
        _ if a == b => same.map(|s| SymExpr::Value(s as i64)),
        _ => None,
    }
}

fn equal_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x == y, Some(true))
}

fn less_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x < y, Some(false))
}

fn less_or_equal_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x <= y, Some(true))
}

fn greater_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x > y, Some(false))
}

fn greater_or_equal_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x >= y, Some(true))
}

fn and_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x != 0 && y != 0, None)
}

fn or_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| x != 0 || y != 0, None)
}

fn xor_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    compare_values(&a, &b, |x, y| (x != 0) != (y != 0), Some(false))
}

/// Define a comparison operator which produces a boolean tensor.
macro_rules! boolean_op {
    ($name:ident, [$($dtype:ident),+], $func:expr, $values:ident) => {
        #[derive(Debug)]
        pub struct $name {}

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let a = ctx.inputs().require(0)?;
                let b = ctx.inputs().require(1)?;
                let output = map_dtype!(
                    a.dtype(),
                    T,
                    [$($dtype),+],
                    binary_map::<T, bool>(a, b, $func)
                );
                output.into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                static SHAPES: BinaryOp = BinaryOp {
                    output_dtype: Some(DataType::Bool),
                    values: Some($values),
                };
                Some(&SHAPES)
            }
        }
    };
}

boolean_op!(
    Equal,
    [Float, Double, Int64, Int32, Int8, Uint8, Bool],
    |x, y| Some(x == y),
    equal_values
);
boolean_op!(
    Less,
    [Float, Double, Int64, Int32, Int8, Uint8],
    |x, y| Some(x < y),
    less_values
);
boolean_op!(
    LessOrEqual,
    [Float, Double, Int64, Int32, Int8, Uint8],
    |x, y| Some(x <= y),
    less_or_equal_values
);
boolean_op!(
    Greater,
    [Float, Double, Int64, Int32, Int8, Uint8],
    |x, y| Some(x > y),
    greater_values
);
boolean_op!(
    GreaterOrEqual,
    [Float, Double, Int64, Int32, Int8, Uint8],
    |x, y| Some(x >= y),
    greater_or_equal_values
);
boolean_op!(And, [Bool], |x, y| Some(x && y), and_values);
boolean_op!(Or, [Bool], |x, y| Some(x || y), or_values);
boolean_op!(Xor, [Bool], |x, y| Some(x != y), xor_values);

/// Select elements from `x` or `y` depending on a boolean condition.
#[derive(Debug)]
pub struct Where {}

impl Operator for Where {
    fn name(&self) -> &str {
        "Where"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let cond = inputs.require(0)?;
        let x = inputs.require(1)?;
        let y = inputs.require(2)?;

        let out_shape = broadcast_shapes(cond.shape(), x.shape())
            .and_then(|shape| broadcast_shapes(&shape, y.shape()))
            .ok_or(OpError::IncompatibleInputShapes("cannot broadcast inputs"))?;
        let cond_data = inputs.require_as::<bool>(0)?;
        let cond_offsets = broadcast_offsets(cond.shape(), &out_shape);
        let x_offsets = broadcast_offsets(x.shape(), &out_shape);
        let y_offsets = broadcast_offsets(y.shape(), &out_shape);

        let output = map_dtype!(x.dtype(), T, {
            let x_data = x.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
            let y_data = y.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
            let data: Vec<T> = (0..cond_offsets.len())
                .map(|i| {
                    if cond_data[cond_offsets[i]] {
                        x_data[x_offsets[i]]
                    } else {
                        y_data[y_offsets[i]]
                    }
                })
                .collect();
            Ok(Tensor::from_data(out_shape, data))
        });
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Where {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let cond = require_input(inputs, 0)?;
        let x = require_input(inputs, 1)?;
        let y = require_input(inputs, 2)?;

        let shape = match (&cond.shape, &x.shape, &y.shape) {
            (Some(c), Some(x), Some(y)) => Some(broadcast_dims(&broadcast_dims(c, x)?, y)?),
            _ => None,
        };
        let dtype = x.dtype.or(y.dtype);

        // Select known values element-wise if the output is a vector whose
        // length matches the operands.
        let values = match (&cond.values, &x.values, &y.values, &shape) {
            (Some(c), Some(xv), Some(yv), Some(shape)) if shape.len() <= 1 => {
                let len = c.len().max(xv.len()).max(yv.len());
                let pick = |v: &Vec<SymExpr>, i: usize| {
                    if v.len() == 1 {
                        v.first().cloned()
                    } else {
                        v.get(i).cloned()
                    }
                };
                (0..len)
                    .map(|i| match pick(c, i)?.as_value()? {
                        0 => pick(yv, i),
                        _ => pick(xv, i),
                    })
                    .collect::<Option<Vec<_>>>()
            }
            _ => None,
        };

        Ok([ShapeInfo {
            dtype,
            shape,
            values,
        }]
        .into())
    }
}

/// Reduce a list of tensors pairwise with broadcasting.
fn fold_variadic(
    ctx: &OpRunContext,
    f: impl Fn(&Tensor, &Tensor) -> Result<Tensor, OpError>,
) -> Result<Tensor, OpError> {
    let mut inputs = ctx.inputs().iter().flatten();
    let first = inputs.next().ok_or(OpError::MissingInputs)?;
    let mut acc = first.clone();
    for input in inputs {
        acc = f(&acc, input)?;
    }
    Ok(acc)
}

/// Shape inference for variadic elementwise operators.
struct VariadicOp {
    values: Option<fn(SymExpr, SymExpr) -> Option<SymExpr>>,
}

impl InferShapes for VariadicOp {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let mut present = inputs.iter().flatten();
        let mut acc = present
            .next()
            .cloned()
            .ok_or(InferShapesError::IncorrectInputCount)?;
        let step = BinaryOp {
            output_dtype: None,
            values: self.values,
        };
        for info in present {
            let pair = [Some(acc), Some(info.clone())];
            acc = step
                .infer_shapes(&pair)?
                .pop()
                .ok_or(InferShapesError::IncorrectInputCount)?;
        }
        Ok([acc].into())
    }
}

fn max_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Some(a.max(&b))
}

fn min_values(a: SymExpr, b: SymExpr) -> Option<SymExpr> {
    Some(a.min(&b))
}

static SUM_SHAPES: VariadicOp = VariadicOp {
    values: Some(add_values),
};
static MAX_SHAPES: VariadicOp = VariadicOp {
    values: Some(max_values),
};
static MIN_SHAPES: VariadicOp = VariadicOp {
    values: Some(min_values),
};
static MEAN_SHAPES: VariadicOp = VariadicOp { values: None };

/// Define a variadic operator which combines its inputs pairwise.
macro_rules! variadic_op {
    ($name:ident, $func:expr, $shapes:ident) => {
        #[derive(Debug)]
        pub struct $name {}

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                fold_variadic(ctx, |a, b| {
                    map_numeric_dtype!(a.dtype(), T, binary_map::<T, T>(a, b, $func))
                })
                .into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(&$shapes)
            }
        }
    };
}

variadic_op!(Sum, |x, y| Some(Arith::add(x, y)), SUM_SHAPES);
variadic_op!(Max, |x, y| Some(Arith::maximum(x, y)), MAX_SHAPES);
variadic_op!(Min, |x, y| Some(Arith::minimum(x, y)), MIN_SHAPES);

/// Compute the elementwise mean of the inputs.
#[derive(Debug)]
pub struct Mean {}

impl Operator for Mean {
    fn name(&self) -> &str {
        "Mean"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let count = ctx.inputs().iter().flatten().count();
        let sum = fold_variadic(ctx, |a, b| {
            map_float_dtype!(a.dtype(), T, binary_map::<T, T>(a, b, |x, y| Some(x + y)))
        })?;
        let count = Tensor::from_scalar(count as f64)
            .cast(sum.dtype())
            .ok_or(OpError::UnsupportedType)?;
        let output = map_float_dtype!(sum.dtype(), T, binary_map::<T, T>(&sum, &count, |x, y| Some(x / y)));
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(&MEAN_SHAPES)
    }
}

#[cfg(test)]
mod tests {
    use super::{Add, Div, Equal, Max, Mean, Mod, Pow, Sub, Where};
    use crate::infer_shapes::{InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{OpError, Operator, OperatorExt};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_broadcast_arithmetic() {
        let a = Tensor::from_data(vec![2, 2], vec![1.0f32, 2., 3., 4.]);
        let b = Tensor::from_vec(vec![10.0f32, 20.]);
        let sum = Add {}.run_simple(&[&a, &b]).unwrap();
        assert_eq!(sum.shape(), &[2, 2]);
        assert_eq!(sum.as_slice::<f32>(), Some([11., 22., 13., 24.].as_slice()));

        let diff = Sub {}.run_simple(&[&b, &a]).unwrap();
        assert_eq!(diff.as_slice::<f32>(), Some([9., 18., 7., 16.].as_slice()));
    }

    #[test]
    fn test_integer_division() {
        let a = Tensor::from_vec(vec![7i64, -7]);
        let b = Tensor::from_scalar(2i64);
        let quot = Div {}.run_simple(&[&a, &b]).unwrap();
        assert_eq!(quot.as_slice::<i64>(), Some([3, -3].as_slice()));

        let zero = Tensor::from_scalar(0i64);
        assert!(matches!(
            Div {}.run_simple(&[&a, &zero]),
            Err(OpError::InvalidValue(_))
        ));

        let rem = Mod { fmod: false }.run_simple(&[&a, &b]).unwrap();
        assert_eq!(rem.as_slice::<i64>(), Some([1, 1].as_slice()));
    }

    #[test]
    fn test_mod_sign() {
        struct Case {
            fmod: bool,
            expected: [i64; 4],
        }

        let cases = [
            Case {
                fmod: false,
                expected: [1, 2, -2, -1],
            },
            Case {
                fmod: true,
                expected: [1, -1, 1, -1],
            },
        ];

        // Dividends and divisors for `7 % 3`, `-7 % 3`, `7 % -3` and `-7 % -3`.
        let a = Tensor::from_vec(vec![7i64, -7, 7, -7]);
        let b = Tensor::from_vec(vec![3i64, 3, -3, -3]);
        let values = |t: &Tensor| {
            let vals = t.to_i64_vec().unwrap().into_iter().map(SymExpr::Value).collect();
            ShapeInfo::from_values(DataType::Int64, vals)
        };
        let (a_info, b_info) = (values(&a), values(&b));

        for case in cases {
            let op = Mod { fmod: case.fmod };
            let out = op.run_simple(&[&a, &b]).unwrap();
            assert_eq!(
                out.as_slice::<i64>(),
                Some(case.expected.as_slice()),
                "fmod {}",
                case.fmod
            );

            let (af, bf) = (
                a.cast(DataType::Float).unwrap(),
                b.cast(DataType::Float).unwrap(),
            );
            let float_out = op.run_simple(&[&af, &bf]).unwrap();
            let expected_float: Vec<f32> = case.expected.iter().map(|&x| x as f32).collect();
            assert_eq!(float_out.as_slice::<f32>(), Some(expected_float.as_slice()));

            let inferred = op
                .as_infer_shapes()
                .unwrap()
                .infer_shapes(&[Some(a_info.clone()), Some(b_info.clone())])
                .unwrap();
            assert_eq!(inferred[0].constant_values(), Some(case.expected.to_vec()));
        }
    }

    #[test]
    fn test_pow_with_int_exponent() {
        let a = Tensor::from_vec(vec![2.0f32, 3.]);
        let b = Tensor::from_scalar(2i64);
        let out = Pow {}.run_simple(&[&a, &b]).unwrap();
        assert_eq!(out.as_slice::<f32>(), Some([4., 9.].as_slice()));
    }

    #[test]
    fn test_comparison_and_where() {
        let a = Tensor::from_vec(vec![1i64, 5, 3]);
        let b = Tensor::from_scalar(3i64);
        let eq = Equal {}.run_simple(&[&a, &b]).unwrap();
        assert_eq!(eq.as_slice::<bool>(), Some([false, false, true].as_slice()));

        let minus_one = Tensor::from_scalar(-1i64);
        let out = Where {}.run_simple(&[&eq, &minus_one, &a]).unwrap();
        assert_eq!(out.as_slice::<i64>(), Some([1, 5, -1].as_slice()));
    }

    #[test]
    fn test_variadic_ops() {
        let a = Tensor::from_vec(vec![1.0f32, f32::NAN]);
        let b = Tensor::from_vec(vec![3.0f32, 0.]);
        let c = Tensor::from_scalar(2.0f32);

        let max = Max {}.run_simple(&[&a, &b, &c]).unwrap();
        let max = max.as_slice::<f32>().unwrap();
        assert_eq!(max[0], 3.);
        assert!(max[1].is_nan());

        let mean = Mean {}.run_simple(&[&b, &c]).unwrap();
        assert_eq!(mean.as_slice::<f32>(), Some([2.5, 1.].as_slice()));
    }

    #[test]
    fn test_infer_values() {
        let shape = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::var("batch"), SymExpr::Value(4)],
        );
        let scale = ShapeInfo::from_scalar(DataType::Int64, SymExpr::Value(2));

        let rules: [&dyn Operator; 2] = [&Add {}, &Equal {}];
        let sum = rules[0]
            .as_infer_shapes()
            .unwrap()
            .infer_shapes(&[Some(shape.clone()), Some(scale.clone())])
            .unwrap();
        assert_eq!(
            sum[0].values,
            Some(vec![SymExpr::var("batch") + SymExpr::Value(2), SymExpr::Value(6)])
        );

        let eq = rules[1]
            .as_infer_shapes()
            .unwrap()
            .infer_shapes(&[Some(shape.clone()), Some(shape)])
            .unwrap();
        assert_eq!(eq[0].dtype, Some(DataType::Bool));
        assert_eq!(eq[0].constant_values(), Some(vec![1, 1]));

        let _ = Where {}.infer_shapes(&[]).unwrap_err();
    }
}
