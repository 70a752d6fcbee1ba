use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr, UnaryOp};
use crate::number::{Arith, Float};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{for_each_index, resolve_axes, resolve_axis, strides};
use crate::tensor::{DataType, Tensor};

#[derive(Clone, Copy, Debug, PartialEq)]
enum ReduceKind {
    Sum,
    Mean,
    Max,
    Min,
    Prod,
}

impl ReduceKind {
    fn combine<T: Arith>(self, acc: T, x: T) -> T {
        match self {
            ReduceKind::Sum | ReduceKind::Mean => acc.add(x),
            ReduceKind::Prod => acc.mul(x),
            ReduceKind::Max => acc.maximum(x),
            ReduceKind::Min => acc.minimum(x),
        }
    }

    /// Value of a reduction over no elements, if defined.
    fn empty_value<T: Arith>(self) -> Option<T> {
        match self {
            ReduceKind::Sum => Some(T::zero()),
            ReduceKind::Prod => Some(T::one()),
            ReduceKind::Mean | ReduceKind::Max | ReduceKind::Min => None,
        }
    }
}

/// Return the shape of a reduction's output with reduced dims kept as size 1.
fn reduced_shape<D: Clone>(shape: &[D], axes: &[usize], one: D) -> Vec<D> {
    shape
        .iter()
        .enumerate()
        .map(|(i, d)| if axes.contains(&i) { one.clone() } else { d.clone() })
        .collect()
}

fn reduce<T: Arith>(input: &Tensor, axes: &[usize], kind: ReduceKind) -> Result<Tensor, OpError> {
    let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let out_shape = reduced_shape(input.shape(), axes, 1);
    let out_strides = strides(&out_shape);
    let out_len: usize = out_shape.iter().product();

    let mut acc: Vec<Option<T>> = vec![None; out_len];
    let mut offset = 0;
    for_each_index(input.shape(), |index| {
        let out_offset: usize = index
            .iter()
            .zip(&out_strides)
            .enumerate()
            .filter(|(dim, _)| !axes.contains(dim))
            .map(|(_, (i, stride))| i * stride)
            .sum();
        let x = data[offset];
        acc[out_offset] = Some(match acc[out_offset] {
            Some(a) => kind.combine(a, x),
            None => x,
        });
        offset += 1;
    });

    let count: usize = axes.iter().map(|&axis| input.shape()[axis]).product();
    let output = acc
        .into_iter()
        .map(|value| match (value, kind) {
            (Some(sum), ReduceKind::Mean) => sum.div(T::from_i64(count as i64)),
            (Some(value), _) => Some(value),
            (None, kind) => kind.empty_value(),
        })
        .collect::<Option<Vec<T>>>()
        .ok_or(OpError::InvalidValue("cannot reduce over an empty axis"))?;
    Ok(Tensor::from_data(out_shape, output))
}

/// Return the axes for a reduce operator, from the attribute or input 1.
///
/// Returns `None` if the input should be returned unchanged.
fn reduce_axes(
    ndim: usize,
    axes: Option<Vec<i64>>,
    noop_with_empty_axes: bool,
) -> Result<Option<Vec<usize>>, OpError> {
    match axes {
        Some(axes) if !axes.is_empty() => resolve_axes(ndim, &axes).map(Some),
        _ if noop_with_empty_axes => Ok(None),
        _ => Ok(Some((0..ndim).collect())),
    }
}

fn run_reduce(
    ctx: &OpRunContext,
    attr_axes: &Option<Vec<i64>>,
    keep_dims: bool,
    noop_with_empty_axes: bool,
    kind: ReduceKind,
) -> Result<Tensor, OpError> {
    let input = ctx.inputs().require(0)?;
    let axes = match attr_axes {
        Some(axes) => Some(axes.clone()),
        None => ctx.inputs().get_ints(1)?,
    };
    let Some(axes) = reduce_axes(input.ndim(), axes, noop_with_empty_axes)? else {
        return Ok(input.clone());
    };

    let output = map_numeric_dtype!(input.dtype(), T, reduce::<T>(input, &axes, kind))?;
    if keep_dims {
        return Ok(output);
    }
    let shape: Vec<usize> = (0..input.ndim())
        .filter(|i| !axes.contains(i))
        .map(|i| input.shape()[i])
        .collect();
    output.reshaped(shape).ok_or(OpError::UnsupportedType)
}

fn infer_reduce(
    inputs: &[Option<ShapeInfo>],
    attr_axes: &Option<Vec<i64>>,
    keep_dims: bool,
    noop_with_empty_axes: bool,
    kind: ReduceKind,
) -> Result<Vec<ShapeInfo>, InferShapesError> {
    let input = require_input(inputs, 0)?;
    let axes = match (attr_axes, inputs.get(1).and_then(|i| i.as_ref())) {
        (Some(axes), _) => Some(Some(axes.clone())),
        (None, Some(axes)) => axes.constant_values().map(Some),
        (None, None) => Some(None),
    };
    let (Some(shape), Some(axes)) = (&input.shape, axes) else {
        return Ok([ShapeInfo::new(input.dtype, None)].into());
    };
    let Some(axes) = reduce_axes(shape.len(), axes, noop_with_empty_axes)? else {
        return Ok([input.clone()].into());
    };

    let out_shape: Vec<Dim> = if keep_dims {
        reduced_shape(shape, &axes, Dim::Fixed(1))
    } else {
        (0..shape.len())
            .filter(|i| !axes.contains(i))
            .map(|i| shape[i].clone())
            .collect()
    };

    // Track the product or sum of a shape vector, as produced when computing
    // the size of a flattened dimension.
    let values = match (&input.values, kind) {
        (Some(values), ReduceKind::Prod | ReduceKind::Sum) if shape.len() == 1 => {
            let (init, op): (i64, fn(SymExpr, SymExpr) -> SymExpr) = if kind == ReduceKind::Prod {
                (1, |a, b| a * b)
            } else {
                (0, |a, b| a + b)
            };
            Some(vec![values.iter().cloned().fold(SymExpr::Value(init), op)])
        }
        _ => None,
    };

    Ok([ShapeInfo {
        dtype: input.dtype,
        shape: Some(out_shape),
        values,
    }]
    .into())
}

macro_rules! reduce_op {
    ($name:ident, $kind:ident) => {
        /// Reduction over a set of axes.
        ///
        /// Axes come from the `axes` attribute in older opsets and from the
        /// second input in newer ones. If no axes are given, all axes are
        /// reduced unless `noop_with_empty_axes` is set.
        #[derive(Debug)]
        pub struct $name {
            pub axes: Option<Vec<i64>>,
            pub keep_dims: bool,
            pub noop_with_empty_axes: bool,
        }

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                run_reduce(
                    ctx,
                    &self.axes,
                    self.keep_dims,
                    self.noop_with_empty_axes,
                    ReduceKind::$kind,
                )
                .into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(self)
            }
        }

        impl InferShapes for $name {
            fn infer_shapes(
                &self,
                inputs: &[Option<ShapeInfo>],
            ) -> Result<Vec<ShapeInfo>, InferShapesError> {
                infer_reduce(
                    inputs,
                    &self.axes,
                    self.keep_dims,
                    self.noop_with_empty_axes,
                    ReduceKind::$kind,
                )
            }
        }
    };
}

reduce_op!(ReduceMax, Max);
reduce_op!(ReduceMean, Mean);
reduce_op!(ReduceMin, Min);
reduce_op!(ReduceProd, Prod);
reduce_op!(ReduceSum, Sum);

/// Split a shape into the sizes before, at and after `axis`.
fn split_at_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

fn arg_select<T: Arith>(
    input: &Tensor,
    axis: usize,
    select_last_index: bool,
    better: fn(T, T) -> bool,
) -> Result<Tensor, OpError> {
    let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let (outer, axis_size, inner) = split_at_axis(input.shape(), axis);
    if axis_size == 0 {
        return Err(OpError::InvalidValue("cannot select from an empty axis"));
    }

    let mut output = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| data[(o * axis_size + k) * inner + i];
            let mut best = 0;
            for k in 1..axis_size {
                let (x, current) = (at(k), at(best));
                if better(x, current) || (select_last_index && x == current) {
                    best = k;
                }
            }
            output.push(best as i64);
        }
    }

    let shape = reduced_shape(input.shape(), &[axis], 1);
    Ok(Tensor::from_data(shape, output))
}

macro_rules! arg_op {
    ($name:ident, $better:expr) => {
        /// Return the indices of the selected elements along an axis.
        #[derive(Debug)]
        pub struct $name {
            pub axis: i64,
            pub keep_dims: bool,
            pub select_last_index: bool,
        }

        impl Operator for $name {
            fn name(&self) -> &str {
                stringify!($name)
            }

            fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
                let input = ctx.inputs().require(0)?;
                let axis = resolve_axis(input.ndim(), self.axis)?;
                let output = map_numeric_dtype!(
                    input.dtype(),
                    T,
                    arg_select::<T>(input, axis, self.select_last_index, $better)
                )?;
                if self.keep_dims {
                    return Ok([output].into());
                }
                let mut shape = input.shape().to_vec();
                shape.remove(axis);
                output
                    .reshaped(shape)
                    .ok_or(OpError::UnsupportedType)
                    .into_op_result()
            }

            fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
                Some(self)
            }
        }

        impl InferShapes for $name {
            fn infer_shapes(
                &self,
                inputs: &[Option<ShapeInfo>],
            ) -> Result<Vec<ShapeInfo>, InferShapesError> {
                let input = require_input(inputs, 0)?;
                let shape = match &input.shape {
                    Some(shape) => {
                        let axis = crate::infer_shapes::resolve_axis(shape.len(), self.axis)?;
                        let mut shape = shape.clone();
                        if self.keep_dims {
                            shape[axis] = Dim::Fixed(1);
                        } else {
                            shape.remove(axis);
                        }
                        Some(shape)
                    }
                    None => None,
                };
                Ok([ShapeInfo::new(Some(DataType::Int64), shape)].into())
            }
        }
    };
}

arg_op!(ArgMax, |x, best| x > best);
arg_op!(ArgMin, |x, best| x < best);

fn softmax<T: Float>(input: &Tensor, axis: usize, flatten: bool) -> Result<Tensor, OpError> {
    let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let (outer, axis_size, inner) = if flatten {
        let shape = input.shape();
        (
            shape[..axis].iter().product(),
            shape[axis..].iter().product(),
            1,
        )
    } else {
        split_at_axis(input.shape(), axis)
    };
    let mut output = data.to_vec();

    for o in 0..outer {
        for i in 0..inner {
            let offset = |k: usize| (o * axis_size + k) * inner + i;
            let max = (0..axis_size)
                .map(|k| data[offset(k)])
                .fold(None, |acc: Option<T>, x| Some(acc.map_or(x, |a| a.maximum(x))));
            let Some(max) = max else {
                continue;
            };
            let mut sum = T::zero();
            for k in 0..axis_size {
                let e = (data[offset(k)] - max).exp();
                output[offset(k)] = e;
                sum = sum + e;
            }
            for k in 0..axis_size {
                output[offset(k)] = output[offset(k)] / sum;
            }
        }
    }
    Ok(Tensor::from_data(input.shape().to_vec(), output))
}

/// Normalize values along an axis so they are positive and sum to 1.
///
/// Before opset 13, `Softmax` treats the input as a matrix with the dims
/// before `axis` as rows and normalizes each row. This is selected by
/// `flatten`.
#[derive(Debug)]
pub struct Softmax {
    pub axis: i64,
    pub flatten: bool,
}

impl Operator for Softmax {
    fn name(&self) -> &str {
        "Softmax"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let axis = resolve_axis(input.ndim(), self.axis)?;
        map_float_dtype!(input.dtype(), T, softmax::<T>(input, axis, self.flatten)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(&UnaryOp)
    }
}

#[cfg(test)]
mod tests {
    use super::{ArgMax, ArgMin, ReduceMean, ReduceProd, ReduceSum, Softmax};
    use crate::infer_shapes::{Dim, InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{InputList, OpRunContext, Operator, OperatorExt};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_reduce() {
        let input = Tensor::from_data(vec![2, 3], vec![1.0f32, 2., 3., 4., 5., 6.]);

        let sum = ReduceSum {
            axes: Some(vec![1]),
            keep_dims: false,
            noop_with_empty_axes: false,
        };
        let out = sum.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[2]);
        assert_eq!(out.as_slice::<f32>(), Some([6., 15.].as_slice()));

        let mean = ReduceMean {
            axes: None,
            keep_dims: true,
            noop_with_empty_axes: false,
        };
        let out = mean.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[1, 1]);
        assert_eq!(out.as_slice::<f32>(), Some([3.5].as_slice()));

        // Axes from the second input.
        let axes = Tensor::from_vec(vec![0i64]);
        let inputs = InputList::from_tensors(&[&input, &axes]);
        let ctx = OpRunContext::new(&inputs);
        let op = ReduceSum {
            axes: None,
            keep_dims: true,
            noop_with_empty_axes: false,
        };
        let out = op.run(&ctx).unwrap().remove(0);
        assert_eq!(out.as_slice::<f32>(), Some([5., 7., 9.].as_slice()));

        let noop = ReduceSum {
            axes: None,
            keep_dims: true,
            noop_with_empty_axes: true,
        };
        let out = noop.run_simple(&[&input]).unwrap();
        assert!(out.same_contents(&input));
    }

    #[test]
    fn test_reduce_prod_values() {
        let shape = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::var("n"), SymExpr::Value(3), SymExpr::Value(4)],
        );
        let op = ReduceProd {
            axes: None,
            keep_dims: true,
            noop_with_empty_axes: false,
        };
        let out = op.infer_shapes(&[Some(shape)]).unwrap();
        assert_eq!(out[0].shape, Some(vec![Dim::Fixed(1)]));
        assert_eq!(
            out[0].values,
            Some(vec![SymExpr::Value(12) * SymExpr::var("n")])
        );
    }

    #[test]
    fn test_arg_max_min() {
        let input = Tensor::from_data(vec![2, 3], vec![1, 5, 5, 7, 0, 2i32]);
        let op = ArgMax {
            axis: 1,
            keep_dims: false,
            select_last_index: false,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.as_slice::<i64>(), Some([1, 0].as_slice()));

        let op = ArgMax {
            axis: 1,
            keep_dims: true,
            select_last_index: true,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert_eq!(out.as_slice::<i64>(), Some([2, 0].as_slice()));

        let op = ArgMin {
            axis: 0,
            keep_dims: false,
            select_last_index: false,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.as_slice::<i64>(), Some([0, 1, 1].as_slice()));
    }

    #[test]
    fn test_softmax() {
        let input = Tensor::from_data(vec![2, 2], vec![0.0f32, 0., 1., 1.]);
        let op = Softmax {
            axis: -1,
            flatten: false,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.as_slice::<f32>(), Some([0.5, 0.5, 0.5, 0.5].as_slice()));

        // exp(x) / sum(exp(x)) for x = [0, ln 3] is [0.25, 0.75].
        let input = Tensor::from_data(vec![2], vec![0.0f32, 3.0f32.ln()]);
        let out = Softmax {
            axis: 0,
            flatten: false,
        }
        .run_simple(&[&input])
        .unwrap();
        let out = out.as_slice::<f32>().unwrap();
        assert!((out[0] - 0.25).abs() < 1e-6 && (out[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_flattened() {
        struct Case {
            axis: i64,
            flatten: bool,
            expected: f32,
        }

        // Each element of a [1, 2, 2] tensor of zeros is normalized against
        // the number of elements in its group.
        let cases = [
            Case {
                axis: 1,
                flatten: false,
                expected: 0.5,
            },
            Case {
                axis: 1,
                flatten: true,
                expected: 0.25,
            },
            Case {
                axis: 2,
                flatten: true,
                expected: 0.5,
            },
            Case {
                axis: 0,
                flatten: false,
                expected: 1.0,
            },
            Case {
                axis: 0,
                flatten: true,
                expected: 0.25,
            },
        ];

        let input = Tensor::from_data(vec![1, 2, 2], vec![0.0f32; 4]);
        for case in cases {
            let op = Softmax {
                axis: case.axis,
                flatten: case.flatten,
            };
            let out = op.run_simple(&[&input]).unwrap();
            assert_eq!(out.shape(), &[1, 2, 2]);
            assert_eq!(
                out.as_slice::<f32>(),
                Some([case.expected; 4].as_slice()),
                "axis {} flatten {}",
                case.axis,
                case.flatten
            );
        }
    }
}
