use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{resolve_axis, strided_offsets, strides, take_tensor, to_sizes};
use crate::tensor::Tensor;

/// Return the part of `input` in the range `[start, end)` along `axis`.
pub fn slice_axis(input: &Tensor, axis: usize, start: usize, end: usize) -> Result<Tensor, OpError> {
    let in_strides: Vec<isize> = strides(input.shape()).into_iter().map(|s| s as isize).collect();
    let mut shape = input.shape().to_vec();
    shape[axis] = end - start;
    let offsets = strided_offsets(&shape, &in_strides, start as isize * in_strides[axis]);
    take_tensor(input, shape, &offsets)
}

/// Split the input into chunks along an axis.
///
/// Chunk sizes come from the `split` input, or from the attribute in opset
/// < 13. Otherwise the axis is divided into `num_outputs` chunks of equal
/// size, with the last chunk being smaller if the size is not divisible.
#[derive(Debug)]
pub struct Split {
    pub axis: i64,
    pub split: Option<Vec<i64>>,
    pub num_outputs: Option<usize>,
}

/// Return the chunk sizes for an even split of `size` into `n` parts.
fn even_split(size: usize, n: usize) -> Result<Vec<usize>, OpError> {
    if n == 0 {
        return Err(OpError::InvalidValue("num_outputs must be positive"));
    }
    let chunk = size.div_ceil(n);
    Ok((0..n)
        .map(|i| chunk.min(size.saturating_sub(i * chunk)))
        .collect())
}

impl Split {
    fn split_sizes(&self, ctx: &OpRunContext) -> Result<Option<Vec<i64>>, OpError> {
        match ctx.inputs().get_ints(1)? {
            Some(sizes) => Ok(Some(sizes)),
            None => Ok(self.split.clone()),
        }
    }
}

impl Operator for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let axis = resolve_axis(input.ndim(), self.axis)?;
        let size = input.shape()[axis];

        let sizes = match self.split_sizes(ctx)? {
            Some(sizes) => {
                let sizes = to_sizes(&sizes)?;
                if sizes.iter().sum::<usize>() != size {
                    return Err(OpError::InvalidValue("split sizes do not sum to axis size"));
                }
                sizes
            }
            None => {
                let n = self
                    .num_outputs
                    .or(ctx.num_outputs())
                    .ok_or(OpError::InvalidValue("number of outputs is unknown"))?;
                even_split(size, n)?
            }
        };

        let mut start = 0;
        let outputs: Result<Vec<Tensor>, OpError> = sizes
            .iter()
            .map(|&len| {
                let chunk = slice_axis(input, axis, start, start + len);
                start += len;
                chunk
            })
            .collect();
        outputs.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Split {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let Some(shape) = &input.shape else {
            return Ok(Vec::new());
        };
        let axis = crate::infer_shapes::resolve_axis(shape.len(), self.axis)?;

        let sizes: Option<Vec<Dim>> = match inputs.get(1).and_then(|i| i.as_ref()) {
            Some(split) => split.values_as_dims(),
            None => match (&self.split, self.num_outputs, shape[axis].fixed()) {
                (Some(split), ..) => Some(split.iter().map(|&s| Dim::from_expr(s.into())).collect()),
                (None, Some(n), Some(size)) => Some(
                    even_split(size as usize, n)?
                        .into_iter()
                        .map(|s| Dim::Fixed(s as u64))
                        .collect(),
                ),
                (None, Some(n), None) => match shape[axis].to_expr() {
                    // Symbolic sizes are only split when the division is
                    // assumed to be exact.
                    Some(size) => Some(vec![Dim::from_expr(size / SymExpr::Value(n as i64)); n]),
                    None => Some(vec![Dim::Unknown; n]),
                },
                (None, None, _) => None,
            },
        };
        let Some(sizes) = sizes else {
            return Ok(Vec::new());
        };

        let fixed_sizes: Option<Vec<usize>> = sizes.iter().map(|s| s.fixed().map(|s| s as usize)).collect();
        let mut start = 0;
        let outputs = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let mut out_shape = shape.clone();
                out_shape[axis] = size.clone();
                let values = match (&input.values, &fixed_sizes) {
                    (Some(values), Some(fixed)) if shape.len() == 1 => {
                        let chunk = values.get(start..start + fixed[i]).map(|v| v.to_vec());
                        start += fixed[i];
                        chunk
                    }
                    _ => None,
                };
                ShapeInfo {
                    dtype: input.dtype,
                    shape: Some(out_shape),
                    values,
                }
            })
            .collect();
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::{even_split, Split};
    use crate::infer_shapes::{InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{InputList, OpRunContext, Operator};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_even_split() {
        assert_eq!(even_split(6, 3), Ok(vec![2, 2, 2]));
        assert_eq!(even_split(7, 3), Ok(vec![3, 3, 1]));
        assert!(even_split(3, 0).is_err());
    }

    #[test]
    fn test_split() {
        let input = Tensor::from_data(vec![2, 3], vec![1, 2, 3, 4, 5, 6i64]);
        let sizes = Tensor::from_vec(vec![1i64, 2]);
        let inputs = InputList::from_tensors(&[&input, &sizes]);
        let ctx = OpRunContext::new(&inputs);
        let op = Split {
            axis: 1,
            split: None,
            num_outputs: None,
        };
        let outputs = op.run(&ctx).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].as_slice::<i64>(), Some([1, 4].as_slice()));
        assert_eq!(outputs[1].shape(), &[2, 2]);
        assert_eq!(outputs[1].as_slice::<i64>(), Some([2, 3, 5, 6].as_slice()));

        // Even split using the requested output count.
        let inputs = InputList::from_tensors(&[&input]);
        let mut ctx = OpRunContext::new(&inputs);
        ctx.set_num_outputs(2);
        let op = Split {
            axis: 0,
            split: None,
            num_outputs: None,
        };
        let outputs = op.run(&ctx).unwrap();
        assert_eq!(outputs[1].as_slice::<i64>(), Some([4, 5, 6].as_slice()));
    }

    #[test]
    fn test_split_infer_values() {
        let input = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::var("n"), SymExpr::Value(3), SymExpr::Value(4)],
        );
        let op = Split {
            axis: 0,
            split: Some(vec![1, 2]),
            num_outputs: None,
        };
        let outputs = op.infer_shapes(&[Some(input)]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].values, Some(vec![SymExpr::var("n")]));
        assert_eq!(outputs[1].constant_values(), Some(vec![3, 4]));
    }
}
