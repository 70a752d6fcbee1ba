use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{resolve_axes, strided_offsets, strides, take_tensor};

/// Range of indices selected along one axis, as `(start, len, step)`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SliceRange {
    start: usize,
    len: usize,
    step: isize,
}

/// Clamp `start` and `end` for an axis of size `size` and compute the number
/// of selected elements.
fn resolve_range(size: usize, start: i64, end: i64, step: i64) -> Result<SliceRange, OpError> {
    if step == 0 {
        return Err(OpError::InvalidValue("slice step cannot be zero"));
    }
    let size = size as i64;
    let adjust = |index: i64| if index < 0 { index.saturating_add(size) } else { index };
    let (start, end) = (adjust(start), adjust(end));

    let (start, len) = if step > 0 {
        let start = start.clamp(0, size);
        let end = end.clamp(0, size);
        (start, ((end - start).max(0) as u64).div_ceil(step as u64))
    } else {
        let start = start.clamp(0, (size - 1).max(0));
        let end = end.clamp(-1, size - 1);
        (start, ((start - end).max(0) as u64).div_ceil(step.unsigned_abs()))
    };
    // An empty axis has no valid start index.
    let len = if size == 0 { 0 } else { len };

    Ok(SliceRange {
        start: start as usize,
        len: len as usize,
        step: step as isize,
    })
}

/// Parameters of a slice, with `axes` and `steps` filled in.
struct SliceParams {
    starts: Vec<i64>,
    ends: Vec<i64>,
    axes: Vec<i64>,
    steps: Vec<i64>,
}

impl SliceParams {
    fn new(
        starts: Vec<i64>,
        ends: Vec<i64>,
        axes: Option<Vec<i64>>,
        steps: Option<Vec<i64>>,
    ) -> Result<SliceParams, OpError> {
        let n = starts.len();
        let axes = axes.unwrap_or_else(|| (0..n as i64).collect());
        let steps = steps.unwrap_or_else(|| vec![1; n]);
        if ends.len() != n || axes.len() != n || steps.len() != n {
            return Err(OpError::InvalidValue(
                "starts, ends, axes and steps must have the same length",
            ));
        }
        Ok(SliceParams {
            starts,
            ends,
            axes,
            steps,
        })
    }

    /// Resolve ranges for each axis of a tensor with the given shape.
    fn ranges(&self, shape: &[usize]) -> Result<Vec<SliceRange>, OpError> {
        let axes = resolve_axes(shape.len(), &self.axes)?;
        let mut ranges: Vec<SliceRange> = shape
            .iter()
            .map(|&size| SliceRange {
                start: 0,
                len: size,
                step: 1,
            })
            .collect();
        for (i, &axis) in axes.iter().enumerate() {
            ranges[axis] = resolve_range(shape[axis], self.starts[i], self.ends[i], self.steps[i])?;
        }
        Ok(ranges)
    }
}

/// Extract a strided region of the input.
///
/// `starts`, `ends` and `axes` are attributes in opset < 10 and inputs in
/// later versions.
#[derive(Debug, Default)]
pub struct Slice {
    pub starts: Option<Vec<i64>>,
    pub ends: Option<Vec<i64>>,
    pub axes: Option<Vec<i64>>,
}

impl Slice {
    fn params(&self, ctx: &OpRunContext) -> Result<SliceParams, OpError> {
        let inputs = ctx.inputs();
        if let (Some(starts), Some(ends)) = (&self.starts, &self.ends) {
            return SliceParams::new(starts.clone(), ends.clone(), self.axes.clone(), None);
        }
        SliceParams::new(
            inputs.require_ints(1)?,
            inputs.require_ints(2)?,
            inputs.get_ints(3)?,
            inputs.get_ints(4)?,
        )
    }

    /// Return the parameters for shape inference, if they are all known.
    fn params_info(&self, inputs: &[Option<ShapeInfo>]) -> Option<SliceParams> {
        if let (Some(starts), Some(ends)) = (&self.starts, &self.ends) {
            return SliceParams::new(starts.clone(), ends.clone(), self.axes.clone(), None).ok();
        }
        let constant = |index: usize| -> Option<Option<Vec<i64>>> {
            match inputs.get(index).and_then(|i| i.as_ref()) {
                Some(info) => info.constant_values().map(Some),
                None => Some(None),
            }
        };
        SliceParams::new(
            constant(1)??,
            constant(2)??,
            constant(3)?,
            constant(4)?,
        )
        .ok()
    }
}

/// Infer the size of a unit-step slice of a symbolic dimension.
fn symbolic_slice_dim(size: &SymExpr, start: i64, end: i64, step: i64) -> Dim {
    // Ends at or beyond `i64::MAX / 2` are used to mean "to the end".
    let to_end = end >= i64::MAX / 2;
    match (step, start, end) {
        (1, 0, _) if to_end => Dim::from_expr(size.clone()),
        (1, start, _) if start >= 0 && to_end => {
            Dim::from_expr((size.clone() - SymExpr::Value(start)).max(&SymExpr::Value(0)))
        }
        (1, start, end) if start >= 0 && end >= start => {
            let end = size.min(&SymExpr::Value(end));
            let start = size.min(&SymExpr::Value(start));
            Dim::from_expr(end - start)
        }
        _ => Dim::Unknown,
    }
}

impl Operator for Slice {
    fn name(&self) -> &str {
        "Slice"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let ranges = self.params(ctx)?.ranges(input.shape())?;

        let in_strides = strides(input.shape());
        let shape: Vec<usize> = ranges.iter().map(|r| r.len).collect();
        let out_strides: Vec<isize> = ranges
            .iter()
            .zip(&in_strides)
            .map(|(r, &s)| r.step * s as isize)
            .collect();
        let base: isize = ranges
            .iter()
            .zip(&in_strides)
            .map(|(r, &s)| (r.start * s) as isize)
            .sum();
        let offsets = strided_offsets(&shape, &out_strides, base);
        take_tensor(input, shape, &offsets).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Slice {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let (Some(shape), Some(params)) = (&input.shape, self.params_info(inputs)) else {
            let shape = input.ndim().map(|n| vec![Dim::Unknown; n]);
            return Ok([ShapeInfo::new(input.dtype, shape)].into());
        };

        let axes = resolve_axes(shape.len(), &params.axes)?;
        let mut out_shape = shape.clone();
        for (i, &axis) in axes.iter().enumerate() {
            let (start, end, step) = (params.starts[i], params.ends[i], params.steps[i]);
            out_shape[axis] = match &shape[axis] {
                Dim::Fixed(size) => {
                    Dim::Fixed(resolve_range(*size as usize, start, end, step)?.len as u64)
                }
                Dim::Symbolic(size) => symbolic_slice_dim(size, start, end, step),
                Dim::Unknown => Dim::Unknown,
            };
        }

        let values = match (&input.values, shape.as_slice()) {
            (Some(values), [Dim::Fixed(_)]) => {
                let range = params.ranges(&[values.len()])?[0];
                Some(
                    (0..range.len)
                        .map(|i| {
                            let index = range.start as isize + i as isize * range.step;
                            values[index as usize].clone()
                        })
                        .collect(),
                )
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
}

#[cfg(test)]
mod tests {
    use super::{resolve_range, Slice, SliceRange};
    use crate::infer_shapes::{Dim, InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{InputList, OpRunContext, Operator};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_resolve_range() {
        struct Case {
            size: usize,
            start: i64,
            end: i64,
            step: i64,
            expected: (usize, usize),
        }

        let cases = [
            Case {
                size: 5,
                start: 1,
                end: 3,
                step: 1,
                expected: (1, 2),
            },
            Case {
                size: 5,
                start: -2,
                end: i64::MAX,
                step: 1,
                expected: (3, 2),
            },
            Case {
                size: 5,
                start: -1,
                end: i64::MIN,
                step: -1,
                expected: (4, 5),
            },
            Case {
                size: 5,
                start: 0,
                end: 5,
                step: 2,
                expected: (0, 3),
            },
            Case {
                size: 5,
                start: 4,
                end: 2,
                step: 1,
                expected: (4, 0),
            },
        ];

        for case in cases {
            let SliceRange { start, len, .. } =
                resolve_range(case.size, case.start, case.end, case.step).unwrap();
            assert_eq!((start, len), case.expected);
        }
        assert!(resolve_range(5, 0, 1, 0).is_err());
    }

    #[test]
    fn test_slice() {
        let input = Tensor::from_data(vec![2, 3], vec![1, 2, 3, 4, 5, 6i32]);
        let starts = Tensor::from_vec(vec![-1i64]);
        let ends = Tensor::from_vec(vec![i64::MIN]);
        let axes = Tensor::from_vec(vec![1i64]);
        let steps = Tensor::from_vec(vec![-1i64]);
        let inputs = InputList::from_tensors(&[&input, &starts, &ends, &axes, &steps]);
        let ctx = OpRunContext::new(&inputs);
        let output = Slice::default().run(&ctx).unwrap().remove(0);
        assert_eq!(output.shape(), &[2, 3]);
        assert_eq!(output.as_slice::<i32>(), Some([3, 2, 1, 6, 5, 4].as_slice()));
    }

    #[test]
    fn test_slice_ranges() {
        struct Case {
            starts: Vec<i64>,
            ends: Vec<i64>,
            axes: Option<Vec<i64>>,
            steps: Option<Vec<i64>>,
            expected_shape: Vec<usize>,
            expected: Vec<i32>,
        }

        let cases = [
            Case {
                starts: vec![1, 0],
                ends: vec![2, 3],
                axes: None,
                steps: None,
                expected_shape: vec![1, 3],
                expected: vec![4, 5, 6],
            },
            Case {
                starts: vec![1, 0],
                ends: vec![2, 3],
                axes: Some(vec![0, 1]),
                steps: Some(vec![1, 2]),
                expected_shape: vec![1, 2],
                expected: vec![4, 6],
            },
            Case {
                starts: vec![0, 1],
                ends: vec![-1, 1000],
                axes: None,
                steps: None,
                expected_shape: vec![2, 3],
                expected: vec![1, 2, 3, 5, 6, 7],
            },
            Case {
                starts: vec![1],
                ends: vec![3],
                axes: Some(vec![-1]),
                steps: None,
                expected_shape: vec![3, 2],
                expected: vec![1, 2, 5, 6, 9, 10],
            },
            Case {
                starts: vec![-1],
                ends: vec![i64::MIN],
                axes: Some(vec![0]),
                steps: Some(vec![-1]),
                expected_shape: vec![3, 4],
                expected: vec![8, 9, 10, 11, 4, 5, 6, 7, 0, 1, 2, 3],
            },
            Case {
                starts: vec![i64::MAX],
                ends: vec![i64::MIN],
                axes: Some(vec![1]),
                steps: Some(vec![-2]),
                expected_shape: vec![3, 2],
                expected: vec![3, 1, 7, 5, 11, 9],
            },
            Case {
                starts: vec![10],
                ends: vec![20],
                axes: Some(vec![1]),
                steps: None,
                expected_shape: vec![3, 0],
                expected: vec![],
            },
        ];

        let input = Tensor::from_data(vec![3, 4], (0..12).collect::<Vec<i32>>());

        for case in cases {
            let mut params = vec![
                Tensor::from_vec(case.starts.clone()),
                Tensor::from_vec(case.ends.clone()),
            ];
            params.extend(case.axes.clone().map(Tensor::from_vec));
            params.extend(case.steps.clone().map(Tensor::from_vec));

            let mut tensors = vec![&input];
            tensors.extend(params.iter());
            let inputs = InputList::from_tensors(&tensors);
            let ctx = OpRunContext::new(&inputs);
            let output = Slice::default().run(&ctx).unwrap().remove(0);
            assert_eq!(
                output.shape(),
                case.expected_shape.as_slice(),
                "starts {:?} ends {:?}",
                case.starts,
                case.ends
            );
            assert_eq!(output.as_slice::<i32>(), Some(case.expected.as_slice()));
        }
    }

    #[test]
    fn test_slice_infer() {
        let input = ShapeInfo::new(
            Some(DataType::Float),
            Some(vec![Dim::symbol("n"), Dim::Fixed(4)]),
        );
        let starts = ShapeInfo::from_values(DataType::Int64, vec![SymExpr::Value(0), SymExpr::Value(1)]);
        let ends = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::Value(i64::MAX), SymExpr::Value(3)],
        );
        let out = Slice::default()
            .infer_shapes(&[Some(input), Some(starts), Some(ends)])
            .unwrap();
        assert_eq!(out[0].shape, Some(vec![Dim::symbol("n"), Dim::Fixed(2)]));

        // Slicing a shape vector keeps its values.
        let shape = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::var("n"), SymExpr::Value(3), SymExpr::Value(4)],
        );
        let op = Slice {
            starts: Some(vec![1]),
            ends: Some(vec![3]),
            axes: None,
        };
        let out = op.infer_shapes(&[Some(shape)]).unwrap();
        assert_eq!(out[0].constant_values(), Some(vec![3, 4]));
    }
}
