//! Reference implementations of ONNX operators.
//!
//! These kernels are used to fold constant subgraphs and to run graphs when
//! checking equivalence. They favor simple and exact implementations over
//! speed. Each operator also provides a shape inference rule.
//!
//! See <https://onnx.ai/onnx/operators/> for the semantics of each operator.

use crate::infer_shapes::InferShapesError;
use crate::operator::OpError;
use crate::tensor::{Element, Tensor};

/// Map a type name from [`DataType`](crate::tensor::DataType) to the Rust
/// element type.
macro_rules! elem_type {
    (Float) => { f32 };
    (Double) => { f64 };
    (Int64) => { i64 };
    (Int32) => { i32 };
    (Int8) => { i8 };
    (Uint8) => { u8 };
    (Bool) => { bool };
}

/// Evaluate `$body` with `$T` bound to the element type corresponding to
/// `$dtype`.
///
/// The body must evaluate to a `Result<_, OpError>`. Types not listed produce
/// [`OpError::UnsupportedType`].
macro_rules! map_dtype {
    ($dtype:expr, $T:ident, [$($variant:ident),+], $body:expr) => {{
        match $dtype {
            $($crate::tensor::DataType::$variant => {
                #[allow(dead_code)]
                type $T = elem_type!($variant);
                $body
            })+
            #[allow(unreachable_patterns)]
            _ => Err($crate::operator::OpError::UnsupportedType),
        }
    }};
    ($dtype:expr, $T:ident, $body:expr) => {
        map_dtype!($dtype, $T, [Float, Double, Int64, Int32, Int8, Uint8, Bool], $body)
    };
}

/// Element types supporting arithmetic.
macro_rules! map_numeric_dtype {
    ($dtype:expr, $T:ident, $body:expr) => {
        map_dtype!($dtype, $T, [Float, Double, Int64, Int32, Int8, Uint8], $body)
    };
}

/// Float element types.
macro_rules! map_float_dtype {
    ($dtype:expr, $T:ident, $body:expr) => {
        map_dtype!($dtype, $T, [Float, Double], $body)
    };
}

mod binary_elementwise;
mod concat;
mod control_flow;
mod conv;
mod convert;
mod gather;
mod generate;
mod identity;
mod layout;
mod matmul;
mod norm;
mod pooling;
mod random;
mod reduce;
mod slice;
mod split;
mod unary_elementwise;

pub use binary_elementwise::{
    Add, And, Div, Equal, Greater, GreaterOrEqual, Less, LessOrEqual, Max, Mean, Min, Mod, Mul,
    Or, Pow, Sub, Sum, Where, Xor,
};
pub use concat::{Concat, Tile};
pub use control_flow::{If, Loop};
pub use conv::{Conv, Padding, Window};
pub use convert::{Cast, CastLike};
pub use gather::Gather;
pub use generate::{Constant, ConstantOfShape, Range};
pub use identity::{Dropout, Identity};
pub use layout::{Expand, Flatten, NonZero, Reshape, Shape, Size, Squeeze, Transpose, Unsqueeze};
pub use matmul::{Gemm, MatMul};
pub use norm::BatchNormalization;
pub use pooling::{AveragePool, GlobalAveragePool, MaxPool};
pub use random::{Bernoulli, Multinomial, RandomNormal, RandomNormalLike, RandomUniform, RandomUniformLike};
pub use reduce::{
    ArgMax, ArgMin, ReduceMax, ReduceMean, ReduceMin, ReduceProd, ReduceSum, Softmax,
};
pub use slice::Slice;
pub use split::Split;
pub use unary_elementwise::{
    Abs, Ceil, Clip, Cos, Elu, Erf, Exp, Floor, HardSigmoid, LeakyRelu, Log, Neg, Not,
    Reciprocal, Relu, Round, Sigmoid, Sign, Sin, Softplus, Sqrt, Tanh,
};

/// Resolve an axis given as a value in `[-ndim, ndim - 1]` to a value in
/// `[0, ndim - 1]`.
pub fn resolve_axis(ndim: usize, axis: i64) -> Result<usize, OpError> {
    let resolved = if axis < 0 { axis + ndim as i64 } else { axis };
    if resolved < 0 || resolved >= ndim as i64 {
        return Err(OpError::InvalidValue("axis is invalid"));
    }
    Ok(resolved as usize)
}

/// Resolve a list of axes, as [`resolve_axis`] does.
///
/// Fails if an axis is repeated.
pub fn resolve_axes(ndim: usize, axes: &[i64]) -> Result<Vec<usize>, OpError> {
    let mut resolved = Vec::with_capacity(axes.len());
    for axis in axes {
        let axis = resolve_axis(ndim, *axis)?;
        if resolved.contains(&axis) {
            return Err(OpError::InvalidValue("axes contain duplicates"));
        }
        resolved.push(axis);
    }
    Ok(resolved)
}

impl From<OpError> for InferShapesError {
    fn from(err: OpError) -> InferShapesError {
        match err {
            OpError::IncompatibleInputShapes(_) => InferShapesError::IncompatibleShapes,
            OpError::MissingInputs => InferShapesError::IncorrectInputCount,
            _ => InferShapesError::InvalidValue,
        }
    }
}

/// Return the row-major strides of a tensor with the given shape.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Call `f` with each index of a tensor of the given shape, in row-major
/// order.
pub fn for_each_index(shape: &[usize], mut f: impl FnMut(&[usize])) {
    if shape.iter().any(|&size| size == 0) {
        return;
    }
    let mut index = vec![0; shape.len()];
    loop {
        f(&index);
        let mut dim = shape.len();
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            index[dim] += 1;
            if index[dim] < shape[dim] {
                break;
            }
            index[dim] = 0;
        }
    }
}

/// Return the offset of each element of a tensor with the given shape, when
/// its elements are laid out with `strides` starting at `base`.
///
/// Strides may be negative, for slices with negative steps.
pub fn strided_offsets(shape: &[usize], strides: &[isize], base: isize) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(shape.iter().product());
    for_each_index(shape, |index| {
        let offset: isize = index
            .iter()
            .zip(strides)
            .map(|(&i, &stride)| i as isize * stride)
            .sum();
        offsets.push((base + offset) as usize);
    });
    offsets
}

/// Compute the result of broadcasting two shapes together, following
/// [ONNX's rules](https://onnx.ai/onnx/repo-docs/Broadcasting.html).
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let a_size = (i + a.len()).checked_sub(ndim).map(|i| a[i]).unwrap_or(1);
        let b_size = (i + b.len()).checked_sub(ndim).map(|i| b[i]).unwrap_or(1);
        let size = match (a_size, b_size) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
        out.push(size);
    }
    Some(out)
}

/// Return the offsets of the elements of a tensor with shape `shape`, when
/// broadcast to `out_shape`, in the order of the output's elements.
///
/// `shape` must be broadcastable to `out_shape`.
pub fn broadcast_offsets(shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let pad = out_shape.len() - shape.len();
    let src_strides = strides(shape);
    let bcast_strides: Vec<isize> = (0..out_shape.len())
        .map(|i| {
            if i < pad || shape[i - pad] == 1 {
                0
            } else {
                src_strides[i - pad] as isize
            }
        })
        .collect();
    strided_offsets(out_shape, &bcast_strides, 0)
}

/// Return the elements at the given offsets.
pub fn take<T: Copy>(data: &[T], offsets: &[usize]) -> Vec<T> {
    offsets.iter().map(|&i| data[i]).collect()
}

/// Create a tensor with the same type as `input` from the elements of
/// `input` at `offsets`.
pub fn take_tensor(input: &Tensor, shape: Vec<usize>, offsets: &[usize]) -> Result<Tensor, OpError> {
    map_dtype!(input.dtype(), T, {
        let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
        Ok(Tensor::from_data(shape, take(data, offsets)))
    })
}

/// Apply a unary function to each element of `input`.
pub fn unary_map<T: Element, U: Element>(input: &Tensor, f: impl Fn(T) -> U) -> Result<Tensor, OpError> {
    let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    Ok(Tensor::from_data(
        input.shape().to_vec(),
        data.iter().map(|x| f(*x)).collect(),
    ))
}

/// Apply a binary function to each pair of elements of `a` and `b`, after
/// broadcasting them to a common shape.
///
/// `f` returns `None` for arguments that are invalid, such as integer
/// division by zero.
pub fn binary_map<T: Element, U: Element>(
    a: &Tensor,
    b: &Tensor,
    f: impl Fn(T, T) -> Option<U>,
) -> Result<Tensor, OpError> {
    let out_shape = broadcast_shapes(a.shape(), b.shape())
        .ok_or(OpError::IncompatibleInputShapes("cannot broadcast inputs"))?;
    let a_data = a.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let b_data = b.as_slice::<T>().ok_or(OpError::UnsupportedType)?;

    let output: Option<Vec<U>> = if a.shape() == b.shape() {
        a_data.iter().zip(b_data).map(|(x, y)| f(*x, *y)).collect()
    } else {
        let a_offsets = broadcast_offsets(a.shape(), &out_shape);
        let b_offsets = broadcast_offsets(b.shape(), &out_shape);
        a_offsets
            .iter()
            .zip(&b_offsets)
            .map(|(&i, &j)| f(a_data[i], b_data[j]))
            .collect()
    };
    let output = output.ok_or(OpError::InvalidValue("integer division by zero"))?;
    Ok(Tensor::from_data(out_shape, output))
}

/// Convert a tensor of sizes or indices to `usize`s, failing if any value is
/// negative.
pub fn to_sizes(values: &[i64]) -> Result<Vec<usize>, OpError> {
    values
        .iter()
        .map(|&v| usize::try_from(v).map_err(|_| OpError::InvalidValue("size is negative")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{broadcast_offsets, broadcast_shapes, for_each_index, resolve_axes, strides};

    #[test]
    fn test_broadcast_shapes() {
        struct Case {
            a: Vec<usize>,
            b: Vec<usize>,
            expected: Option<Vec<usize>>,
        }

        let cases = [
            Case {
                a: vec![2, 3],
                b: vec![3],
                expected: Some(vec![2, 3]),
            },
            Case {
                a: vec![2, 1, 4],
                b: vec![5, 1],
                expected: Some(vec![2, 5, 4]),
            },
            Case {
                a: vec![],
                b: vec![4],
                expected: Some(vec![4]),
            },
            Case {
                a: vec![2, 3],
                b: vec![4],
                expected: None,
            },
        ];

        for case in cases {
            assert_eq!(broadcast_shapes(&case.a, &case.b), case.expected);
        }
    }

    #[test]
    fn test_broadcast_offsets() {
        assert_eq!(broadcast_offsets(&[3], &[2, 3]), [0, 1, 2, 0, 1, 2]);
        assert_eq!(broadcast_offsets(&[2, 1], &[2, 3]), [0, 0, 0, 1, 1, 1]);
        assert_eq!(broadcast_offsets(&[], &[2]), [0, 0]);
    }

    #[test]
    fn test_for_each_index() {
        let mut indices = Vec::new();
        for_each_index(&[2, 2], |index| indices.push(index.to_vec()));
        assert_eq!(indices, [[0, 0], [0, 1], [1, 0], [1, 1]]);

        let mut count = 0;
        for_each_index(&[], |_| count += 1);
        assert_eq!(count, 1);

        for_each_index(&[3, 0], |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_resolve_axes() {
        assert_eq!(resolve_axes(3, &[-1, 0]), Ok(vec![2, 0]));
        assert!(resolve_axes(3, &[3]).is_err());
        assert!(resolve_axes(3, &[1, -2]).is_err());
        assert_eq!(strides(&[2, 3, 4]), [12, 4, 1]);
    }
}
