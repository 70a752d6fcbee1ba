use crate::infer_shapes::{require_input, InferShapes, InferShapesError, ShapeInfo};
use crate::number::Float;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::tensor::Tensor;

fn channel_params<T: Float>(t: &Tensor, chans: usize) -> Result<&[T], OpError> {
    let data = t.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    if data.len() != chans {
        return Err(OpError::IncompatibleInputShapes(
            "normalization parameters must have one value per channel",
        ));
    }
    Ok(data)
}

/// Perform batch normalization on the `[N, C, ...]` tensor `input`, using
/// per-channel statistics.
///
/// See <https://onnx.ai/onnx/operators/onnx__BatchNormalization.html>.
fn batch_norm<T: Float>(
    input: &Tensor,
    scale: &Tensor,
    bias: &Tensor,
    mean: &Tensor,
    var: &Tensor,
    epsilon: f32,
) -> Result<Tensor, OpError> {
    let x = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let [batch, chans, ..] = *input.shape() else {
        return Err(OpError::InvalidValue("input must have at least 2 dims"));
    };
    let (scale, bias) = (
        channel_params::<T>(scale, chans)?,
        channel_params::<T>(bias, chans)?,
    );
    let (mean, var) = (
        channel_params::<T>(mean, chans)?,
        channel_params::<T>(var, chans)?,
    );

    let plane_len: usize = input.shape()[2..].iter().product();
    let epsilon = T::from_f32(epsilon);
    let mut output = Vec::with_capacity(x.len());
    for n in 0..batch {
        for c in 0..chans {
            // Y = (X - mean) / sqrt(var + epsilon) * scale + bias
            let factor = scale[c] / (var[c] + epsilon).sqrt();
            let start = (n * chans + c) * plane_len;
            output.extend(
                x[start..start + plane_len]
                    .iter()
                    .map(|&v| (v - mean[c]) * factor + bias[c]),
            );
        }
    }
    Ok(Tensor::from_data(input.shape().to_vec(), output))
}

/// Batch normalization in inference mode.
///
/// The optional running mean and variance outputs, which are only produced
/// in training mode, are not supported.
#[derive(Debug)]
pub struct BatchNormalization {
    pub epsilon: f32,
}

impl Operator for BatchNormalization {
    fn name(&self) -> &str {
        "BatchNormalization"
    }

    fn required_outputs(&self) -> Option<usize> {
        Some(1)
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let input = inputs.require(0)?;
        let scale = inputs.require(1)?;
        let bias = inputs.require(2)?;
        let mean = inputs.require(3)?;
        let var = inputs.require(4)?;
        if ctx.num_outputs().unwrap_or(1) > 1 {
            return Err(OpError::UnsupportedValue("training mode is not supported"));
        }

        map_float_dtype!(
            input.dtype(),
            T,
            batch_norm::<T>(input, scale, bias, mean, var, self.epsilon)
        )
        .into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for BatchNormalization {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        Ok([input.without_values()].into())
    }
}

#[cfg(test)]
mod tests {
    use super::BatchNormalization;
    use crate::operator::{OpError, OperatorExt};
    use crate::tensor::Tensor;

    #[test]
    fn test_batch_norm() {
        let input = Tensor::from_data(vec![1, 2, 2], vec![1.0f32, 3., 10., 20.]);
        let scale = Tensor::from_vec(vec![2.0f32, 1.]);
        let bias = Tensor::from_vec(vec![0.5f32, 0.]);
        let mean = Tensor::from_vec(vec![2.0f32, 10.]);
        let var = Tensor::from_vec(vec![1.0f32, 4.]);

        let op = BatchNormalization { epsilon: 0. };
        let out = op
            .run_simple(&[&input, &scale, &bias, &mean, &var])
            .unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(out.as_slice::<f32>(), Some([-1.5, 2.5, 0., 5.].as_slice()));

        let short = Tensor::from_vec(vec![1.0f32]);
        assert!(matches!(
            op.run_simple(&[&input, &short, &bias, &mean, &var]),
            Err(OpError::IncompatibleInputShapes(_))
        ));
    }
}
