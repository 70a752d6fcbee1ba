use crate::infer_shapes::{require_input, InferShapes, InferShapesError, ShapeInfo};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{resolve_axis, take_tensor};

/// Resolve a possibly negative index into an axis of size `size`.
fn resolve_index(index: i64, size: usize) -> Option<usize> {
    let resolved = if index < 0 { index + size as i64 } else { index };
    (resolved >= 0 && resolved < size as i64).then_some(resolved as usize)
}

/// Select slices of the input along an axis.
#[derive(Debug)]
pub struct Gather {
    pub axis: i64,
}

impl Operator for Gather {
    fn name(&self) -> &str {
        "Gather"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let indices_tensor = ctx.inputs().require(1)?;
        let indices = ctx.inputs().require_ints(1)?;

        let shape = input.shape();
        let axis = resolve_axis(input.ndim(), self.axis)?;
        let axis_size = shape[axis];
        let outer: usize = shape[..axis].iter().product();
        let inner: usize = shape[axis + 1..].iter().product();

        let indices = indices
            .iter()
            .map(|&i| resolve_index(i, axis_size))
            .collect::<Option<Vec<_>>>()
            .ok_or(OpError::InvalidValue("gather index is out of bounds"))?;

        let mut offsets = Vec::with_capacity(outer * indices.len() * inner);
        for o in 0..outer {
            for &index in &indices {
                let base = (o * axis_size + index) * inner;
                offsets.extend(base..base + inner);
            }
        }

        let out_shape: Vec<usize> = shape[..axis]
            .iter()
            .chain(indices_tensor.shape())
            .chain(&shape[axis + 1..])
            .copied()
            .collect();
        take_tensor(input, out_shape, &offsets).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Gather {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let data = require_input(inputs, 0)?;
        let indices = require_input(inputs, 1)?;

        let (Some(shape), Some(indices_shape)) = (&data.shape, &indices.shape) else {
            return Ok([ShapeInfo::new(data.dtype, None)].into());
        };
        let axis = crate::infer_shapes::resolve_axis(shape.len(), self.axis)?;
        let out_shape: Vec<_> = shape[..axis]
            .iter()
            .chain(indices_shape)
            .chain(&shape[axis + 1..])
            .cloned()
            .collect();

        // Track values when gathering from a vector, eg. selecting a
        // dimension from the output of `Shape`.
        let values = match (&data.values, indices.constant_values()) {
            (Some(values), Some(indices)) if shape.len() == 1 && out_shape.len() <= 1 => indices
                .iter()
                .map(|&i| resolve_index(i, values.len()).map(|i| values[i].clone()))
                .collect::<Option<Vec<_>>>(),
            _ => None,
        };

        Ok([ShapeInfo {
            dtype: data.dtype,
            shape: Some(out_shape),
            values,
        }]
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::Gather;
    use crate::infer_shapes::{Dim, InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{OpError, OperatorExt};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_gather() {
        let input = Tensor::from_data(vec![3, 2], vec![1, 2, 3, 4, 5, 6i64]);
        let indices = Tensor::from_vec(vec![2i64, -3]);
        let out = Gather { axis: 0 }.run_simple(&[&input, &indices]).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.as_slice::<i64>(), Some([5, 6, 1, 2].as_slice()));

        let index = Tensor::from_scalar(1i32);
        let out = Gather { axis: 1 }.run_simple(&[&input, &index]).unwrap();
        assert_eq!(out.shape(), &[3]);
        assert_eq!(out.as_slice::<i64>(), Some([2, 4, 6].as_slice()));

        let bad = Tensor::from_scalar(3i64);
        assert!(matches!(
            Gather { axis: 0 }.run_simple(&[&input, &bad]),
            Err(OpError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_gather_infer_values() {
        let shape = ShapeInfo::from_values(
            DataType::Int64,
            vec![SymExpr::var("batch"), SymExpr::Value(3)],
        );
        let index = ShapeInfo::from_scalar(DataType::Int64, SymExpr::Value(0));
        let out = Gather { axis: 0 }.infer_shapes(&[Some(shape), Some(index)]).unwrap();
        assert_eq!(out[0].shape, Some(Vec::<Dim>::new()));
        assert_eq!(out[0].values, Some(vec![SymExpr::var("batch")]));
    }
}
