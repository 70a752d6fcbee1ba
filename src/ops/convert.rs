use crate::infer_shapes::{require_input, InferShapes, InferShapesError, ShapeInfo, SymExpr};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::tensor::{DataType, Tensor};

fn cast(input: &Tensor, dtype: DataType) -> Result<Tensor, OpError> {
    input.cast(dtype).ok_or(OpError::UnsupportedType)
}

/// Infer the output of a cast of `input` to `dtype`.
fn cast_shape(input: &ShapeInfo, dtype: Option<DataType>) -> ShapeInfo {
    let values = match dtype {
        Some(DataType::Bool) => input.values.as_ref().and_then(|values| {
            values
                .iter()
                .map(|v| v.as_value().map(|v| SymExpr::Value((v != 0) as i64)))
                .collect()
        }),
        Some(dtype) if !dtype.is_float() && input.dtype.is_some_and(|d| !d.is_float()) => {
            input.values.clone()
        }
        _ => None,
    };
    ShapeInfo {
        dtype,
        shape: input.shape.clone(),
        values,
    }
}

#[derive(Debug)]
pub struct Cast {
    pub to: DataType,
}

impl Operator for Cast {
    fn name(&self) -> &str {
        "Cast"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        cast(input, self.to).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Cast {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        Ok([cast_shape(input, Some(self.to))].into())
    }
}

/// Cast the first input to the type of the second.
#[derive(Debug)]
pub struct CastLike {}

impl Operator for CastLike {
    fn name(&self) -> &str {
        "CastLike"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let like = ctx.inputs().require(1)?;
        cast(input, like.dtype()).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for CastLike {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let like = require_input(inputs, 1)?;
        Ok([cast_shape(input, like.dtype)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::Cast;
    use crate::infer_shapes::{InferShapes, ShapeInfo, SymExpr};
    use crate::operator::{OpError, OperatorExt};
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_cast() {
        let input = Tensor::from_vec(vec![1.5f32, -0.5]);
        let op = Cast { to: DataType::Int32 };
        let output = op.run_simple(&[&input]).unwrap();
        assert_eq!(output.as_slice::<i32>(), Some([1, 0].as_slice()));

        let op = Cast {
            to: DataType::Float16,
        };
        assert_eq!(op.run_simple(&[&input]).err(), Some(OpError::UnsupportedType));
    }

    #[test]
    fn test_cast_keeps_integer_values() {
        let shape = ShapeInfo::from_values(DataType::Int64, vec![SymExpr::var("n"), SymExpr::Value(0)]);

        let to_int32 = Cast { to: DataType::Int32 }.infer_shapes(&[Some(shape.clone())]).unwrap();
        assert_eq!(to_int32[0].values, shape.values);
        assert_eq!(to_int32[0].dtype, Some(DataType::Int32));

        let to_bool = Cast { to: DataType::Bool }.infer_shapes(&[Some(shape.clone())]).unwrap();
        assert_eq!(to_bool[0].values, None);

        let to_float = Cast { to: DataType::Float }.infer_shapes(&[Some(shape)]).unwrap();
        assert_eq!(to_float[0].values, None);
    }
}
