use crate::infer_shapes::{
    require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr, MAX_TRACKED_VALUES,
};
use crate::number::Arith;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::to_sizes;
use crate::tensor::Tensor;

/// Operator which produces a fixed tensor.
#[derive(Debug)]
pub struct Constant {
    pub value: Tensor,
}

impl Operator for Constant {
    fn name(&self) -> &str {
        "Constant"
    }

    fn run(&self, _ctx: &OpRunContext) -> Result<OutputList, OpError> {
        Ok([self.value.clone()].into())
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Constant {
    fn infer_shapes(&self, _inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        Ok([ShapeInfo::from_tensor(&self.value)].into())
    }
}

/// Create a tensor with a given shape, filled with a single value.
#[derive(Debug)]
pub struct ConstantOfShape {
    /// One-element tensor holding the fill value and type.
    pub value: Tensor,
}

impl Default for ConstantOfShape {
    fn default() -> Self {
        ConstantOfShape {
            value: Tensor::from_vec(vec![0f32]),
        }
    }
}

impl Operator for ConstantOfShape {
    fn name(&self) -> &str {
        "ConstantOfShape"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let shape = to_sizes(&ctx.inputs().require_ints(0)?)?;
        let len = shape.iter().product();
        let output = map_dtype!(self.value.dtype(), T, {
            let value = self
                .value
                .as_slice::<T>()
                .and_then(|v| v.first())
                .ok_or(OpError::InvalidValue("value must have one element"))?;
            Ok(Tensor::from_data(shape, vec![*value; len]))
        });
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for ConstantOfShape {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let shape_info = require_input(inputs, 0)?;
        let dtype = self.value.dtype();
        let shape = match shape_info.values_as_dims() {
            Some(dims) => Some(dims),
            None => shape_info
                .shape
                .as_ref()
                .and_then(|s| s.first())
                .and_then(|len| len.fixed())
                .map(|len| vec![Dim::Unknown; len as usize]),
        };

        // Small integer vectors of a fixed size have known values.
        let fill = self.value.to_i64_vec().and_then(|v| v.first().copied());
        let values = match (shape.as_deref(), fill) {
            (Some([Dim::Fixed(len)]), Some(value))
                if !dtype.is_float() && (*len as usize) <= MAX_TRACKED_VALUES =>
            {
                Some(vec![SymExpr::Value(value); *len as usize])
            }
            (Some([]), Some(value)) if !dtype.is_float() => Some(vec![SymExpr::Value(value)]),
            _ => None,
        };

        Ok([ShapeInfo {
            dtype: Some(dtype),
            shape,
            values,
        }]
        .into())
    }
}

/// Return the number of elements in a range.
fn range_len(start: f64, limit: f64, delta: f64) -> Result<usize, OpError> {
    if delta == 0. {
        return Err(OpError::InvalidValue("delta must be non-zero"));
    }
    Ok(((limit - start) / delta).ceil().max(0.) as usize)
}

fn range<T: Arith>(start: T, limit: T, delta: T) -> Result<Tensor, OpError> {
    let len = range_len(start.to_f64(), limit.to_f64(), delta.to_f64())?;
    let output = (0..len)
        .map(|i| start.add(T::from_i64(i as i64).mul(delta)))
        .collect();
    Ok(Tensor::from_vec(output))
}

/// Generate a sequence of evenly spaced numbers.
#[derive(Debug)]
pub struct Range {}

impl Operator for Range {
    fn name(&self) -> &str {
        "Range"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let start = inputs.require(0)?;
        let output = map_numeric_dtype!(start.dtype(), T, {
            let scalar = |index: usize| -> Result<T, OpError> {
                inputs
                    .require(index)?
                    .item::<T>()
                    .ok_or(OpError::InvalidValue("range inputs must be scalars of the same type"))
            };
            range::<T>(scalar(0)?, scalar(1)?, scalar(2)?)
        });
        output.into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Range {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let start = require_input(inputs, 0)?;
        let limit = require_input(inputs, 1)?;
        let delta = require_input(inputs, 2)?;
        let dtype = start.dtype.or(limit.dtype).or(delta.dtype);

        let scalar = |info: &ShapeInfo| match info.values.as_deref() {
            Some([value]) => Some(value.clone()),
            _ => None,
        };
        let (len, values) = match (scalar(start), scalar(limit), scalar(delta)) {
            (Some(SymExpr::Value(s)), Some(SymExpr::Value(l)), Some(SymExpr::Value(d))) => {
                let len = range_len(s as f64, l as f64, d as f64)?;
                let values = (len <= MAX_TRACKED_VALUES)
                    .then(|| (0..len as i64).map(|i| SymExpr::Value(s + i * d)).collect());
                (Dim::Fixed(len as u64), values)
            }
            (Some(SymExpr::Value(0)), Some(limit), Some(SymExpr::Value(1))) => (Dim::from_expr(limit), None),
            _ => (Dim::Unknown, None),
        };

        Ok([ShapeInfo {
            dtype,
            shape: Some(vec![len]),
            values,
        }]
        .into())
    }
}
