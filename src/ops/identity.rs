use smallvec::smallvec;

use crate::infer_shapes::{require_input, InferShapes, InferShapesError, ShapeInfo};
use crate::operator::{OpError, OpRunContext, Operator, OutputList};
use crate::tensor::{DataType, Tensor};

#[derive(Debug)]
pub struct Identity {}

impl Operator for Identity {
    fn name(&self) -> &str {
        "Identity"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        Ok(smallvec![input.clone()])
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Identity {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        Ok([require_input(inputs, 0)?.clone()].into())
    }
}

/// Dropout in inference mode.
///
/// The data output is a copy of the input and the optional mask output is all
/// true. Training mode, which randomly zeroes elements, is not supported.
#[derive(Debug)]
pub struct Dropout {
    /// Default for the `training_mode` input when it is omitted.
    pub training_mode: bool,
}

impl Operator for Dropout {
    fn name(&self) -> &str {
        "Dropout"
    }

    fn is_deterministic(&self) -> bool {
        !self.training_mode
    }

    fn required_outputs(&self) -> Option<usize> {
        Some(1)
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let input = inputs.require(0)?;
        let training = match inputs.get(2) {
            Some(mode) => mode.item::<bool>().ok_or(OpError::InvalidValue("training_mode must be a bool scalar"))?,
            None => self.training_mode,
        };
        if training {
            return Err(OpError::UnsupportedValue("training mode is not supported"));
        }

        let mut outputs: OutputList = smallvec![input.clone()];
        if ctx.num_outputs().unwrap_or(1) > 1 {
            let mask = vec![true; input.len()];
            outputs.push(Tensor::from_data(input.shape().to_vec(), mask));
        }
        Ok(outputs)
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Dropout {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let mask = ShapeInfo::new(Some(DataType::Bool), input.shape.clone());
        Ok([input.clone(), mask].into())
    }
}

#[cfg(test)]
mod tests {
    use super::Dropout;
    use crate::operator::{InputList, OpError, OpRunContext, Operator};
    use crate::tensor::Tensor;

    #[test]
    fn test_dropout() {
        let input = Tensor::from_vec(vec![1.0f32, 2.0]);
        let inputs = InputList::from_tensors(&[&input]);
        let mut ctx = OpRunContext::new(&inputs);
        ctx.set_num_outputs(2);

        let outputs = Dropout { training_mode: false }.run(&ctx).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].same_contents(&input));
        assert_eq!(outputs[1].as_slice::<bool>(), Some([true, true].as_slice()));

        let training = Tensor::from_scalar(true);
        let inputs = InputList::new(vec![Some(&input), None, Some(&training)]);
        let ctx = OpRunContext::new(&inputs);
        assert!(matches!(
            Dropout { training_mode: false }.run(&ctx),
            Err(OpError::UnsupportedValue(_))
        ));
    }
}
