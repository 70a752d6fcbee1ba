use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo};
use crate::number::Float;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::conv::{kernel_indices, split_nchw, Window};
use crate::ops::for_each_index;
use crate::tensor::{DataType, Tensor};

/// Apply `reduce` to each window of each channel of an `[N, C, spatial...]`
/// input.
///
/// `reduce` receives the channel's elements, the input offsets of the taps
/// within the window (`None` for padding) and returns the output value and
/// the offset of the selected element, if any.
fn pool<T: Float>(
    input: &Tensor,
    window: &Window,
    mut reduce: impl FnMut(&[T], &[Option<usize>]) -> (T, Option<usize>),
) -> Result<(Tensor, Vec<i64>), OpError> {
    let x = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let (batch, chans, in_sizes) = split_nchw(input.shape())?;
    let layout = window.layout(in_sizes)?;
    let taps = kernel_indices(&window.kernel);
    let in_len: usize = in_sizes.iter().product();

    let mut output = Vec::new();
    let mut indices = Vec::new();
    let mut positions = Vec::with_capacity(taps.len());
    for plane in 0..batch * chans {
        let data = &x[plane * in_len..(plane + 1) * in_len];
        for_each_index(&layout.out_sizes, |out_index| {
            positions.clear();
            window.for_each_tap(&layout, in_sizes, out_index, &taps, |_, pos| positions.push(pos));
            let (value, selected) = reduce(data, &positions);
            output.push(value);
            indices.push(selected.map(|i| (plane * in_len + i) as i64).unwrap_or(-1));
        });
    }

    let mut out_shape = vec![batch, chans];
    out_shape.extend(&layout.out_sizes);
    Ok((Tensor::from_data(out_shape, output), indices))
}

fn infer_pool(window: &Window, inputs: &[Option<ShapeInfo>], n_outputs: usize) -> Result<Vec<ShapeInfo>, InferShapesError> {
    let input = require_input(inputs, 0)?;
    let shape = match input.shape.as_deref() {
        Some([n, c, spatial @ ..]) if !spatial.is_empty() => {
            let mut shape = vec![n.clone(), c.clone()];
            shape.extend(window.infer_sizes(spatial)?);
            Some(shape)
        }
        Some(_) => return Err(InferShapesError::IncorrectRank),
        None => None,
    };
    let mut outputs = vec![ShapeInfo::new(input.dtype, shape.clone())];
    if n_outputs > 1 {
        outputs.push(ShapeInfo::new(Some(DataType::Int64), shape));
    }
    Ok(outputs)
}

/// Max pooling, with an optional second output containing the flattened
/// input index of each selected element.
#[derive(Debug)]
pub struct MaxPool {
    pub window: Window,
}

impl MaxPool {
    fn max_pool<T: Float>(&self, input: &Tensor) -> Result<(Tensor, Vec<i64>), OpError> {
        pool::<T>(input, &self.window, |data, positions| {
            let mut best: Option<(T, usize)> = None;
            for &pos in positions.iter().flatten() {
                let x = data[pos];
                match best {
                    Some((max, _)) if x <= max => {}
                    _ => best = Some((x, pos)),
                }
            }
            match best {
                Some((max, pos)) => (max, Some(pos)),
                None => (T::from_f32(f32::NEG_INFINITY), None),
            }
        })
    }
}

impl Operator for MaxPool {
    fn name(&self) -> &str {
        "MaxPool"
    }

    fn required_outputs(&self) -> Option<usize> {
        Some(1)
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let (output, indices) = map_float_dtype!(input.dtype(), T, self.max_pool::<T>(input))?;
        if ctx.num_outputs().unwrap_or(1) > 1 {
            let indices = Tensor::from_data(output.shape().to_vec(), indices);
            return Ok([output, indices].into_iter().collect());
        }
        Ok([output].into())
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for MaxPool {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        infer_pool(&self.window, inputs, 2)
    }
}

/// Average pooling.
///
/// If `count_include_pad` is false, padding elements are excluded from the
/// divisor.
#[derive(Debug)]
pub struct AveragePool {
    pub window: Window,
    pub count_include_pad: bool,
}

impl AveragePool {
    fn average_pool<T: Float>(&self, input: &Tensor) -> Result<Tensor, OpError> {
        let (output, _) = pool::<T>(input, &self.window, |data, positions| {
            let mut sum = T::zero();
            let mut count = 0;
            for &pos in positions.iter().flatten() {
                sum = sum + data[pos];
                count += 1;
            }
            if self.count_include_pad {
                count = positions.len();
            }
            let avg = if count == 0 {
                T::zero()
            } else {
                sum / T::from_f32(count as f32)
            };
            (avg, None)
        })?;
        Ok(output)
    }
}

impl Operator for AveragePool {
    fn name(&self) -> &str {
        "AveragePool"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        map_float_dtype!(input.dtype(), T, self.average_pool::<T>(input)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for AveragePool {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        infer_pool(&self.window, inputs, 1)
    }
}

fn global_average_pool<T: Float>(input: &Tensor) -> Result<Tensor, OpError> {
    let x = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
    let (batch, chans, spatial) = split_nchw(input.shape())?;
    let len: usize = spatial.iter().product();
    let output = (0..batch * chans)
        .map(|plane| {
            let sum = x[plane * len..(plane + 1) * len]
                .iter()
                .fold(T::zero(), |acc, &v| acc + v);
            sum / T::from_f32(len as f32)
        })
        .collect();

    let mut out_shape = vec![batch, chans];
    out_shape.extend(spatial.iter().map(|_| 1));
    Ok(Tensor::from_data(out_shape, output))
}

#[derive(Debug)]
pub struct GlobalAveragePool {}

impl Operator for GlobalAveragePool {
    fn name(&self) -> &str {
        "GlobalAveragePool"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        map_float_dtype!(input.dtype(), T, global_average_pool::<T>(input)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for GlobalAveragePool {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = match input.shape.as_deref() {
            Some([n, c, spatial @ ..]) => {
                let mut shape = vec![n.clone(), c.clone()];
                shape.extend(spatial.iter().map(|_| Dim::Fixed(1)));
                Some(shape)
            }
            Some(_) => return Err(InferShapesError::IncorrectRank),
            None => None,
        };
        Ok([ShapeInfo::new(input.dtype, shape)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::{AveragePool, GlobalAveragePool, MaxPool};
    use crate::operator::{InputList, OpRunContext, Operator, OperatorExt};
    use crate::ops::conv::{Padding, Window};
    use crate::tensor::Tensor;

    fn window(kernel: Vec<usize>, padding: Padding) -> Window {
        Window {
            kernel,
            strides: Vec::new(),
            dilations: Vec::new(),
            padding,
            ceil_mode: false,
        }
    }

    #[test]
    fn test_max_pool() {
        let input = Tensor::from_data(vec![1, 1, 2, 2], vec![1.0f32, 4., 3., 2.]);
        let op = MaxPool {
            window: window(vec![2, 2], Padding::Valid),
        };
        let inputs = InputList::from_tensors(&[&input]);
        let mut ctx = OpRunContext::new(&inputs);
        ctx.set_num_outputs(2);
        let outputs = op.run(&ctx).unwrap();
        assert_eq!(outputs[0].as_slice::<f32>(), Some([4.].as_slice()));
        assert_eq!(outputs[1].as_slice::<i64>(), Some([1].as_slice()));
    }

    #[test]
    fn test_average_pool() {
        let input = Tensor::from_data(vec![1, 1, 1, 2], vec![2.0f32, 4.]);
        let padded = window(vec![1, 2], Padding::Fixed(vec![0, 1, 0, 0]));

        let op = AveragePool {
            window: padded.clone(),
            count_include_pad: false,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[1, 1, 1, 2]);
        assert_eq!(out.as_slice::<f32>(), Some([2., 3.].as_slice()));

        let op = AveragePool {
            window: padded,
            count_include_pad: true,
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.as_slice::<f32>(), Some([1., 3.].as_slice()));
    }

    #[test]
    fn test_global_average_pool() {
        let input = Tensor::from_data(vec![1, 2, 2], vec![1.0f32, 3., 5., 7.]);
        let out = GlobalAveragePool {}.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[1, 2, 1]);
        assert_eq!(out.as_slice::<f32>(), Some([2., 6.].as_slice()));
    }
}
