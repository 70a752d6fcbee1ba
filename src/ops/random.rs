use fastrand::Rng;
use fastrand_contrib::RngExt;

use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::tensor::{DataType, Tensor};

/// Create a generator from an optional seed.
///
/// ONNX specifies seeds as floats, so the seed's bits are used.
fn new_rng(seed: Option<f32>) -> Rng {
    match seed {
        Some(seed) => Rng::with_seed(seed.to_bits() as u64),
        None => Rng::new(),
    }
}

fn random_tensor(
    dtype: DataType,
    shape: Vec<usize>,
    mut sample: impl FnMut() -> f64,
) -> Result<Tensor, OpError> {
    let len = shape.iter().product();
    let values: Vec<f64> = (0..len).map(|_| sample()).collect();
    Tensor::from_f64s(dtype, shape, values).ok_or(OpError::UnsupportedType)
}

/// Return the output type of a `*Like` operator.
fn like_dtype(dtype: Option<DataType>, input: &Tensor) -> DataType {
    dtype.unwrap_or(input.dtype())
}

fn fixed_shape_info(dtype: DataType, shape: &[usize]) -> Vec<ShapeInfo> {
    let dims = shape.iter().map(|&d| Dim::Fixed(d as u64)).collect();
    [ShapeInfo::new(Some(dtype), Some(dims))].into()
}

fn like_shape_info(
    dtype: Option<DataType>,
    inputs: &[Option<ShapeInfo>],
) -> Result<Vec<ShapeInfo>, InferShapesError> {
    let input = require_input(inputs, 0)?;
    Ok([ShapeInfo::new(dtype.or(input.dtype), input.shape.clone())].into())
}

#[derive(Debug)]
pub struct RandomUniform {
    pub low: f32,
    pub high: f32,
    pub shape: Vec<usize>,
    pub dtype: DataType,

    /// Random seed.
    ///
    /// This unusually uses an `f32` value for consistency with the ONNX
    /// specification.
    pub seed: Option<f32>,
}

impl Operator for RandomUniform {
    fn name(&self) -> &str {
        "RandomUniform"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, _ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let mut rng = new_rng(self.seed);
        let (low, high) = (self.low as f64, self.high as f64);
        random_tensor(self.dtype, self.shape.clone(), || low + rng.f64() * (high - low))
            .into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for RandomUniform {
    fn infer_shapes(&self, _inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        Ok(fixed_shape_info(self.dtype, &self.shape))
    }
}

#[derive(Debug)]
pub struct RandomUniformLike {
    pub low: f32,
    pub high: f32,

    /// Output type. Defaults to the input's type.
    pub dtype: Option<DataType>,

    /// Random seed. See [RandomUniform::seed].
    pub seed: Option<f32>,
}

impl Operator for RandomUniformLike {
    fn name(&self) -> &str {
        "RandomUniformLike"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let op = RandomUniform {
            low: self.low,
            high: self.high,
            seed: self.seed,
            dtype: like_dtype(self.dtype, input),
            shape: input.shape().to_vec(),
        };
        op.run(ctx)
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for RandomUniformLike {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        like_shape_info(self.dtype, inputs)
    }
}

#[derive(Debug)]
pub struct RandomNormal {
    pub mean: f32,
    pub scale: f32,
    pub shape: Vec<usize>,
    pub dtype: DataType,

    /// Random seed. See [RandomUniform::seed].
    pub seed: Option<f32>,
}

impl Operator for RandomNormal {
    fn name(&self) -> &str {
        "RandomNormal"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, _ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let mut rng = new_rng(self.seed);
        random_tensor(self.dtype, self.shape.clone(), || {
            rng.f32_normal(self.mean, self.scale) as f64
        })
        .into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for RandomNormal {
    fn infer_shapes(&self, _inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        Ok(fixed_shape_info(self.dtype, &self.shape))
    }
}

#[derive(Debug)]
pub struct RandomNormalLike {
    pub mean: f32,
    pub scale: f32,

    /// Output type. Defaults to the input's type.
    pub dtype: Option<DataType>,

    /// Random seed. See [RandomUniform::seed].
    pub seed: Option<f32>,
}

impl Operator for RandomNormalLike {
    fn name(&self) -> &str {
        "RandomNormalLike"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let op = RandomNormal {
            mean: self.mean,
            scale: self.scale,
            seed: self.seed,
            dtype: like_dtype(self.dtype, input),
            shape: input.shape().to_vec(),
        };
        op.run(ctx)
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for RandomNormalLike {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        like_shape_info(self.dtype, inputs)
    }
}

/// Draw binary samples, where each input element is the probability of a 1.
#[derive(Debug)]
pub struct Bernoulli {
    pub dtype: Option<DataType>,
    pub seed: Option<f32>,
}

impl Operator for Bernoulli {
    fn name(&self) -> &str {
        "Bernoulli"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let probs = input.to_f64_vec().ok_or(OpError::UnsupportedType)?;
        let mut rng = new_rng(self.seed);
        let mut probs = probs.into_iter();
        random_tensor(like_dtype(self.dtype, input), input.shape().to_vec(), || {
            let p = probs.next().unwrap_or(0.);
            if rng.f64() < p {
                1.
            } else {
                0.
            }
        })
        .into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Bernoulli {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        like_shape_info(self.dtype, inputs)
    }
}

/// Draw samples from categorical distributions given by a `[batch, classes]`
/// tensor of unnormalized log probabilities.
#[derive(Debug)]
pub struct Multinomial {
    pub sample_size: usize,
    pub dtype: DataType,
    pub seed: Option<f32>,
}

impl Operator for Multinomial {
    fn name(&self) -> &str {
        "Multinomial"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let &[batch, classes] = input.shape() else {
            return Err(OpError::InvalidValue("input must have shape [batch, classes]"));
        };
        let logits = input.to_f64_vec().ok_or(OpError::UnsupportedType)?;
        let mut rng = new_rng(self.seed);

        let mut samples = Vec::with_capacity(batch * self.sample_size);
        for row in logits.chunks(classes.max(1)).take(batch) {
            let weights: Vec<f64> = row.iter().map(|x| x.exp()).collect();
            let total: f64 = weights.iter().sum();
            for _ in 0..self.sample_size {
                let mut target = rng.f64() * total;
                let mut class = classes.saturating_sub(1);
                for (i, w) in weights.iter().enumerate() {
                    if target < *w {
                        class = i;
                        break;
                    }
                    target -= w;
                }
                samples.push(class as f64);
            }
        }

        let mut samples = samples.into_iter();
        random_tensor(self.dtype, vec![batch, self.sample_size], || {
            samples.next().unwrap_or(0.)
        })
        .into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Multinomial {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let batch = match input.shape.as_deref() {
            Some([batch, _]) => batch.clone(),
            _ => Dim::Unknown,
        };
        let shape = vec![batch, Dim::Fixed(self.sample_size as u64)];
        Ok([ShapeInfo::new(Some(self.dtype), Some(shape))].into())
    }
}
