use crate::infer_shapes::{
    broadcast_dims, require_input, Dim, InferShapes, InferShapesError, ShapeInfo,
};
use crate::number::Arith;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{broadcast_offsets, broadcast_shapes};
use crate::tensor::Tensor;

/// Multiply `[m, k]` matrix `a` by `[k, n]` matrix `b`, accumulating into
/// `out`.
fn gemm_into<T: Arith>(out: &mut [T], a: impl Fn(usize, usize) -> T, b: impl Fn(usize, usize) -> T, m: usize, k: usize, n: usize) {
    for row in 0..m {
        for col in 0..n {
            let mut sum = T::zero();
            for i in 0..k {
                sum = sum.add(a(row, i).mul(b(i, col)));
            }
            out[row * n + col] = sum;
        }
    }
}

fn matmul<T: Arith>(a: &Tensor, b: &Tensor) -> Result<Tensor, OpError> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return Err(OpError::InvalidValue("matmul inputs must have at least one dim"));
    }
    let a_data = a.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let b_data = b.as_slice::<T>().ok_or(OpError::UnsupportedType)?;

    // Vectors are promoted to matrices and the added dim is removed from the
    // output.
    let mut a_shape = a.shape().to_vec();
    let mut b_shape = b.shape().to_vec();
    if a.ndim() == 1 {
        a_shape.insert(0, 1);
    }
    if b.ndim() == 1 {
        b_shape.push(1);
    }

    let (m, k) = (a_shape[a_shape.len() - 2], a_shape[a_shape.len() - 1]);
    let (bk, n) = (b_shape[b_shape.len() - 2], b_shape[b_shape.len() - 1]);
    if k != bk {
        return Err(OpError::IncompatibleInputShapes("matmul inner dims do not match"));
    }

    let a_batch = &a_shape[..a_shape.len() - 2];
    let b_batch = &b_shape[..b_shape.len() - 2];
    let out_batch = broadcast_shapes(a_batch, b_batch)
        .ok_or(OpError::IncompatibleInputShapes("cannot broadcast batch dims"))?;
    let a_mats = broadcast_offsets(a_batch, &out_batch);
    let b_mats = broadcast_offsets(b_batch, &out_batch);

    let mut output = vec![T::zero(); a_mats.len() * m * n];
    for (i, (a_mat, b_mat)) in a_mats.iter().zip(&b_mats).enumerate() {
        let (a_base, b_base) = (a_mat * m * k, b_mat * k * n);
        gemm_into(
            &mut output[i * m * n..(i + 1) * m * n],
            |r, c| a_data[a_base + r * k + c],
            |r, c| b_data[b_base + r * n + c],
            m,
            k,
            n,
        );
    }

    let mut out_shape = out_batch;
    if a.ndim() > 1 {
        out_shape.push(m);
    }
    if b.ndim() > 1 {
        out_shape.push(n);
    }
    Ok(Tensor::from_data(out_shape, output))
}

/// Matrix product with NumPy-style batching and broadcasting.
#[derive(Debug)]
pub struct MatMul {}

impl Operator for MatMul {
    fn name(&self) -> &str {
        "MatMul"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let a = ctx.inputs().require(0)?;
        let b = ctx.inputs().require(1)?;
        if a.dtype() != b.dtype() {
            return Err(OpError::UnsupportedType);
        }
        map_numeric_dtype!(a.dtype(), T, matmul::<T>(a, b)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

/// Return true if two dims are known to differ.
fn dims_conflict(a: &Dim, b: &Dim) -> bool {
    matches!((a, b), (Dim::Fixed(a), Dim::Fixed(b)) if a != b)
}

impl InferShapes for MatMul {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let a = require_input(inputs, 0)?;
        let b = require_input(inputs, 1)?;
        let dtype = a.dtype.or(b.dtype);
        let (Some(a_shape), Some(b_shape)) = (&a.shape, &b.shape) else {
            return Ok([ShapeInfo::new(dtype, None)].into());
        };
        if a_shape.is_empty() || b_shape.is_empty() {
            return Err(InferShapesError::IncorrectRank);
        }

        let mut a_dims = a_shape.clone();
        let mut b_dims = b_shape.clone();
        if a_dims.len() == 1 {
            a_dims.insert(0, Dim::Fixed(1));
        }
        if b_dims.len() == 1 {
            b_dims.push(Dim::Fixed(1));
        }
        let (m, k) = (&a_dims[a_dims.len() - 2], &a_dims[a_dims.len() - 1]);
        let (bk, n) = (&b_dims[b_dims.len() - 2], &b_dims[b_dims.len() - 1]);
        if dims_conflict(k, bk) {
            return Err(InferShapesError::IncompatibleShapes);
        }

        let mut out_shape = broadcast_dims(&a_dims[..a_dims.len() - 2], &b_dims[..b_dims.len() - 2])?;
        if a_shape.len() > 1 {
            out_shape.push(m.clone());
        }
        if b_shape.len() > 1 {
            out_shape.push(n.clone());
        }
        Ok([ShapeInfo::new(dtype, Some(out_shape))].into())
    }
}

/// General matrix multiply: `alpha * A' * B' + beta * C`, where `A'` and
/// `B'` are optionally transposed and `C` broadcasts to the output.
#[derive(Debug)]
pub struct Gemm {
    pub alpha: f32,
    pub beta: f32,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl Default for Gemm {
    fn default() -> Self {
        Gemm {
            alpha: 1.,
            beta: 1.,
            transpose_a: false,
            transpose_b: false,
        }
    }
}

impl Gemm {
    fn gemm<T: Arith>(&self, a: &Tensor, b: &Tensor, c: Option<&Tensor>) -> Result<Tensor, OpError> {
        let (&[a_rows, a_cols], &[b_rows, b_cols]) = (a.shape(), b.shape()) else {
            return Err(OpError::InvalidValue("gemm inputs must be matrices"));
        };
        let a_data = a.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
        let b_data = b.as_slice::<T>().ok_or(OpError::UnsupportedType)?;

        let (m, k) = if self.transpose_a { (a_cols, a_rows) } else { (a_rows, a_cols) };
        let (bk, n) = if self.transpose_b { (b_cols, b_rows) } else { (b_rows, b_cols) };
        if k != bk {
            return Err(OpError::IncompatibleInputShapes("gemm inner dims do not match"));
        }

        let mut output = vec![T::zero(); m * n];
        gemm_into(
            &mut output,
            |r, c| {
                if self.transpose_a {
                    a_data[c * a_cols + r]
                } else {
                    a_data[r * a_cols + c]
                }
            },
            |r, c| {
                if self.transpose_b {
                    b_data[c * b_cols + r]
                } else {
                    b_data[r * b_cols + c]
                }
            },
            m,
            k,
            n,
        );

        let alpha = T::from_f64(self.alpha as f64);
        let beta = T::from_f64(self.beta as f64);
        let bias = match c {
            Some(c) => {
                let c_data = c.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
                if broadcast_shapes(c.shape(), &[m, n]).as_deref() != Some([m, n].as_slice()) {
                    return Err(OpError::IncompatibleInputShapes("cannot broadcast C to output"));
                }
                let offsets = broadcast_offsets(c.shape(), &[m, n]);
                Some(offsets.into_iter().map(|i| c_data[i]).collect::<Vec<T>>())
            }
            None => None,
        };

        for (i, y) in output.iter_mut().enumerate() {
            let mut value = if self.alpha == 1. { *y } else { alpha.mul(*y) };
            if let Some(bias) = &bias {
                let term = if self.beta == 1. { bias[i] } else { beta.mul(bias[i]) };
                value = value.add(term);
            }
            *y = value;
        }
        Ok(Tensor::from_data(vec![m, n], output))
    }
}

impl Operator for Gemm {
    fn name(&self) -> &str {
        "Gemm"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let a = inputs.require(0)?;
        let b = inputs.require(1)?;
        let c = inputs.get(2);
        map_numeric_dtype!(a.dtype(), T, self.gemm::<T>(a, b, c)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Gemm {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let a = require_input(inputs, 0)?;
        let b = require_input(inputs, 1)?;
        let shape = match (a.shape.as_deref(), b.shape.as_deref()) {
            (Some([a0, a1]), Some([b0, b1])) => {
                let (m, k) = if self.transpose_a { (a1, a0) } else { (a0, a1) };
                let (bk, n) = if self.transpose_b { (b1, b0) } else { (b0, b1) };
                if dims_conflict(k, bk) {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                Some(vec![m.clone(), n.clone()])
            }
            (Some(_), Some(_)) => return Err(InferShapesError::IncorrectRank),
            _ => Some(vec![Dim::Unknown, Dim::Unknown]),
        };
        Ok([ShapeInfo::new(a.dtype.or(b.dtype), shape)].into())
    }
}
