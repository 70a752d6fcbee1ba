use crate::infer_shapes::{
    require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr,
};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{for_each_index, resolve_axis, strides, take_tensor, to_sizes};
use crate::tensor::{Element, Tensor};

pub(super) fn concat<T: Element>(inputs: &[&Tensor], axis: usize) -> Result<Tensor, OpError> {
    let first = inputs[0];
    let mut out_shape = first.shape().to_vec();
    out_shape[axis] = 0;
    for input in inputs {
        let compatible = input.ndim() == first.ndim()
            && input
                .shape()
                .iter()
                .zip(first.shape())
                .enumerate()
                .all(|(dim, (a, b))| dim == axis || a == b);
        if !compatible {
            return Err(OpError::IncompatibleInputShapes(
                "inputs must have the same shape except along the concat axis",
            ));
        }
        out_shape[axis] += input.shape()[axis];
    }

    let outer: usize = first.shape()[..axis].iter().product();
    let slices = inputs
        .iter()
        .map(|input| {
            let data = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
            let chunk: usize = input.shape()[axis..].iter().product();
            Ok((data, chunk))
        })
        .collect::<Result<Vec<_>, OpError>>()?;

    let mut output = Vec::with_capacity(out_shape.iter().product());
    for i in 0..outer {
        for (data, chunk) in &slices {
            output.extend_from_slice(&data[i * chunk..(i + 1) * chunk]);
        }
    }
    Ok(Tensor::from_data(out_shape, output))
}

#[derive(Debug)]
pub struct Concat {
    pub axis: i64,
}

impl Operator for Concat {
    fn name(&self) -> &str {
        "Concat"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs: Vec<&Tensor> = ctx.inputs().iter().flatten().collect();
        let first = inputs.first().ok_or(OpError::MissingInputs)?;
        if inputs.iter().any(|i| i.dtype() != first.dtype()) {
            return Err(OpError::IncompatibleInputShapes("inputs must have the same type"));
        }
        let axis = resolve_axis(first.ndim(), self.axis)?;
        map_dtype!(first.dtype(), T, concat::<T>(&inputs, axis)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Concat {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let first = require_input(inputs, 0)?;
        let dtype = inputs.iter().flatten().find_map(|i| i.dtype);

        let shapes: Option<Vec<&Vec<Dim>>> = inputs.iter().flatten().map(|i| i.shape.as_ref()).collect();
        let shape = match shapes {
            Some(shapes) => {
                let ndim = shapes[0].len();
                if shapes.iter().any(|s| s.len() != ndim) {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                let axis = crate::infer_shapes::resolve_axis(ndim, self.axis)?;
                let mut out = Vec::with_capacity(ndim);
                for dim in 0..ndim {
                    if dim == axis {
                        let sizes: Option<Vec<SymExpr>> = shapes.iter().map(|s| s[dim].to_expr()).collect();
                        out.push(match sizes {
                            Some(sizes) => Dim::from_expr(
                                sizes.into_iter().fold(SymExpr::Value(0), |acc, s| acc + s),
                            ),
                            None => Dim::Unknown,
                        });
                    } else {
                        // Prefer a fixed size if any input has one.
                        let size = shapes
                            .iter()
                            .map(|s| &s[dim])
                            .find(|d| d.is_fixed())
                            .or_else(|| shapes.iter().map(|s| &s[dim]).find(|d| **d != Dim::Unknown))
                            .cloned()
                            .unwrap_or(Dim::Unknown);
                        out.push(size);
                    }
                }
                Some(out)
            }
            None => first.ndim().map(|n| vec![Dim::Unknown; n]),
        };

        let values = match &shape {
            Some(s) if s.len() == 1 => inputs
                .iter()
                .flatten()
                .map(|i| i.values.clone())
                .collect::<Option<Vec<_>>>()
                .map(|v| v.concat()),
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

/// Repeat the input along each dimension.
#[derive(Debug)]
pub struct Tile {}

impl Operator for Tile {
    fn name(&self) -> &str {
        "Tile"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let repeats = to_sizes(&ctx.inputs().require_ints(1)?)?;
        if repeats.len() != input.ndim() {
            return Err(OpError::InvalidValue("repeats length must match input rank"));
        }

        let shape = input.shape();
        let out_shape: Vec<usize> = shape.iter().zip(&repeats).map(|(s, r)| s * r).collect();
        let in_strides = strides(shape);
        let mut offsets = Vec::with_capacity(out_shape.iter().product());
        for_each_index(&out_shape, |index| {
            let offset: usize = index
                .iter()
                .zip(shape)
                .zip(&in_strides)
                .map(|((i, size), stride)| (i % size) * stride)
                .sum();
            offsets.push(offset);
        });
        take_tensor(input, out_shape, &offsets).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Tile {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let repeats = require_input(inputs, 1)?;
        let shape = match (&input.shape, &repeats.values) {
            (Some(shape), Some(repeats)) => {
                if shape.len() != repeats.len() {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                Some(
                    shape
                        .iter()
                        .zip(repeats)
                        .map(|(dim, r)| match dim.to_expr() {
                            Some(size) => Dim::from_expr(size * r.clone()),
                            None => Dim::Unknown,
                        })
                        .collect(),
                )
            }
            (Some(shape), None) => Some(vec![Dim::Unknown; shape.len()]),
            _ => None,
        };
        Ok([ShapeInfo::new(input.dtype, shape)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::{Concat, Tile};
    use crate::infer_shapes::{Dim, InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{OpError, OperatorExt};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_concat() {
        let a = Tensor::from_data(vec![2, 1], vec![1.0f32, 2.]);
        let b = Tensor::from_data(vec![2, 2], vec![3.0f32, 4., 5., 6.]);

        let out = Concat { axis: 1 }.run_simple(&[&a, &b]).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.as_slice::<f32>(), Some([1., 3., 4., 2., 5., 6.].as_slice()));

        let err = Concat { axis: 0 }.run_simple(&[&a, &b]).err();
        assert!(matches!(err, Some(OpError::IncompatibleInputShapes(_))));

        // Empty inputs contribute nothing.
        let empty = Tensor::from_data(vec![2, 0], Vec::<f32>::new());
        let out = Concat { axis: -1 }.run_simple(&[&a, &empty]).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
    }

    #[test]
    fn test_concat_axes() {
        struct Case {
            axis: i64,
            expected_shape: Vec<usize>,
            expected: Vec<i32>,
        }

        let cases = [
            Case {
                axis: 0,
                expected_shape: vec![4, 2, 2],
                expected: (1..=16).collect(),
            },
            Case {
                axis: -3,
                expected_shape: vec![4, 2, 2],
                expected: (1..=16).collect(),
            },
            Case {
                axis: 1,
                expected_shape: vec![2, 4, 2],
                expected: vec![1, 2, 3, 4, 9, 10, 11, 12, 5, 6, 7, 8, 13, 14, 15, 16],
            },
            Case {
                axis: 2,
                expected_shape: vec![2, 2, 4],
                expected: vec![1, 2, 9, 10, 3, 4, 11, 12, 5, 6, 13, 14, 7, 8, 15, 16],
            },
            Case {
                axis: -1,
                expected_shape: vec![2, 2, 4],
                expected: vec![1, 2, 9, 10, 3, 4, 11, 12, 5, 6, 13, 14, 7, 8, 15, 16],
            },
        ];

        let a = Tensor::from_data(vec![2, 2, 2], (1..=8).collect::<Vec<i32>>());
        let b = Tensor::from_data(vec![2, 2, 2], (9..=16).collect::<Vec<i32>>());

        for case in cases {
            let out = Concat { axis: case.axis }.run_simple(&[&a, &b]).unwrap();
            assert_eq!(out.shape(), case.expected_shape.as_slice(), "axis {}", case.axis);
            assert_eq!(out.as_slice::<i32>(), Some(case.expected.as_slice()), "axis {}", case.axis);
        }

        assert!(Concat { axis: 3 }.run_simple(&[&a, &b]).is_err());

        let parts = [
            Tensor::from_vec(vec![1i64]),
            Tensor::from_vec(vec![2i64, 3]),
            Tensor::from_vec(Vec::<i64>::new()),
        ];
        let refs: Vec<&Tensor> = parts.iter().collect();
        let out = Concat { axis: 0 }.run_simple(&refs).unwrap();
        assert_eq!(out.as_slice::<i64>(), Some([1, 2, 3].as_slice()));
    }

    #[test]
    fn test_concat_infer_values() {
        let a = ShapeInfo::from_values(DataType::Int64, vec![SymExpr::var("batch")]);
        let b = ShapeInfo::from_values(DataType::Int64, vec![SymExpr::Value(-1)]);
        let out = Concat { axis: 0 }.infer_shapes(&[Some(a), Some(b)]).unwrap();
        assert_eq!(out[0].shape, Some(vec![Dim::Fixed(2)]));
        assert_eq!(
            out[0].values,
            Some(vec![SymExpr::var("batch"), SymExpr::Value(-1)])
        );
    }

    #[test]
    fn test_tile() {
        let input = Tensor::from_data(vec![1, 2], vec![1i32, 2]);
        let repeats = Tensor::from_vec(vec![2i64, 2]);
        let out = Tile {}.run_simple(&[&input, &repeats]).unwrap();
        assert_eq!(out.shape(), &[2, 4]);
        assert_eq!(out.as_slice::<i32>(), Some([1, 2, 1, 2, 1, 2, 1, 2].as_slice()));
    }
}
