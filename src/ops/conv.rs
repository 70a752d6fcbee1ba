use crate::infer_shapes::{require_input, Dim, InferShapes, InferShapesError, ShapeInfo};
use crate::number::Float;
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::for_each_index;
use crate::tensor::Tensor;

/// Padding applied to the spatial dims of a convolution or pooling input.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Padding {
    /// Pad so that the output size is `ceil(input_size / stride)`, with any
    /// odd amount of padding added at the end.
    SameUpper,

    /// As `SameUpper`, but with any odd amount added at the start.
    SameLower,

    /// Explicit padding, as `[x1_begin, x2_begin, ... x1_end, x2_end, ...]`.
    ///
    /// An empty list means no padding.
    Fixed(Vec<usize>),

    #[default]
    Valid,
}

/// Parameters describing the sliding window of a convolution or pooling
/// operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    pub kernel: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub padding: Padding,
    pub ceil_mode: bool,
}

/// Resolved layout of a window over an input.
#[derive(Debug, PartialEq)]
pub struct WindowLayout {
    pub pad_begin: Vec<usize>,
    pub pad_end: Vec<usize>,
    pub out_sizes: Vec<usize>,
}

/// Fill in default strides and dilations for a window with `n` spatial dims.
pub fn window_param(values: &[usize], n: usize) -> Result<Vec<usize>, OpError> {
    match values.len() {
        0 => Ok(vec![1; n]),
        len if len == n && values.iter().all(|&v| v > 0) => Ok(values.to_vec()),
        _ => Err(OpError::InvalidValue("invalid strides or dilations")),
    }
}

impl Window {
    /// Compute padding and output sizes for an input with spatial sizes
    /// `in_sizes`.
    pub fn layout(&self, in_sizes: &[usize]) -> Result<WindowLayout, OpError> {
        let n = in_sizes.len();
        if self.kernel.len() != n {
            return Err(OpError::IncompatibleInputShapes(
                "kernel rank does not match input spatial dims",
            ));
        }
        let strides = window_param(&self.strides, n)?;
        let dilations = window_param(&self.dilations, n)?;

        let mut layout = WindowLayout {
            pad_begin: vec![0; n],
            pad_end: vec![0; n],
            out_sizes: Vec::with_capacity(n),
        };
        for i in 0..n {
            let extent = (self.kernel[i].max(1) - 1) * dilations[i] + 1;
            match &self.padding {
                Padding::SameUpper | Padding::SameLower => {
                    let out = in_sizes[i].div_ceil(strides[i]);
                    let total = ((out.max(1) - 1) * strides[i] + extent).saturating_sub(in_sizes[i]);
                    let small = total / 2;
                    let (begin, end) = if self.padding == Padding::SameUpper {
                        (small, total - small)
                    } else {
                        (total - small, small)
                    };
                    layout.pad_begin[i] = begin;
                    layout.pad_end[i] = end;
                    layout.out_sizes.push(out);
                    continue;
                }
                Padding::Fixed(pads) if !pads.is_empty() => {
                    if pads.len() != 2 * n {
                        return Err(OpError::InvalidValue("pads length must be twice the spatial rank"));
                    }
                    layout.pad_begin[i] = pads[i];
                    layout.pad_end[i] = pads[i + n];
                }
                Padding::Fixed(_) | Padding::Valid => {}
            }

            let padded = in_sizes[i] + layout.pad_begin[i] + layout.pad_end[i];
            if padded < extent {
                return Err(OpError::IncompatibleInputShapes("input is smaller than kernel"));
            }
            let out = if self.ceil_mode {
                let out = (padded - extent).div_ceil(strides[i]) + 1;
                // The last window must start inside the input or left
                // padding.
                if (out - 1) * strides[i] >= in_sizes[i] + layout.pad_begin[i] {
                    out - 1
                } else {
                    out
                }
            } else {
                (padded - extent) / strides[i] + 1
            };
            layout.out_sizes.push(out);
        }
        Ok(layout)
    }

    /// Infer output spatial dims for input dims which may not be fixed.
    pub fn infer_sizes(&self, in_dims: &[Dim]) -> Result<Vec<Dim>, InferShapesError> {
        let Some(sizes) = in_dims.iter().map(|d| d.fixed().map(|s| s as usize)).collect::<Option<Vec<_>>>()
        else {
            return Ok(vec![Dim::Unknown; in_dims.len()]);
        };
        let layout = self.layout(&sizes)?;
        Ok(layout.out_sizes.iter().map(|&s| Dim::Fixed(s as u64)).collect())
    }

    /// Call `f` for each position of the window starting at output position
    /// `out_index`, with the input position or `None` if it falls in the
    /// padding.
    pub fn for_each_tap(
        &self,
        layout: &WindowLayout,
        in_sizes: &[usize],
        out_index: &[usize],
        kernel_indices: &[Vec<usize>],
        mut f: impl FnMut(usize, Option<usize>),
    ) {
        let n = in_sizes.len();
        let strides = window_param(&self.strides, n).unwrap_or_else(|_| vec![1; n]);
        let dilations = window_param(&self.dilations, n).unwrap_or_else(|_| vec![1; n]);

        'taps: for (k, kernel_index) in kernel_indices.iter().enumerate() {
            let mut offset = 0;
            for d in 0..n {
                let pos = (out_index[d] * strides[d] + kernel_index[d] * dilations[d]) as isize
                    - layout.pad_begin[d] as isize;
                if pos < 0 || pos >= in_sizes[d] as isize {
                    f(k, None);
                    continue 'taps;
                }
                offset = offset * in_sizes[d] + pos as usize;
            }
            f(k, Some(offset));
        }
    }
}

/// Return all indices into a kernel of the given shape.
pub fn kernel_indices(kernel: &[usize]) -> Vec<Vec<usize>> {
    let mut indices = Vec::new();
    for_each_index(kernel, |index| indices.push(index.to_vec()));
    indices
}

/// Split an `[N, C, spatial...]` shape into its parts.
pub fn split_nchw(shape: &[usize]) -> Result<(usize, usize, &[usize]), OpError> {
    match shape {
        [n, c, spatial @ ..] if !spatial.is_empty() => Ok((*n, *c, spatial)),
        _ => Err(OpError::InvalidValue("input must have at least 3 dims")),
    }
}

/// N-dimensional convolution.
#[derive(Debug)]
pub struct Conv {
    pub padding: Padding,
    pub groups: usize,
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    /// Kernel spatial shape. If unset, this is taken from the weights.
    pub kernel_shape: Option<Vec<usize>>,
}

impl Default for Conv {
    fn default() -> Self {
        Conv {
            padding: Padding::Valid,
            groups: 1,
            strides: Vec::new(),
            dilations: Vec::new(),
            kernel_shape: None,
        }
    }
}

impl Conv {
    fn window(&self, kernel: &[usize]) -> Window {
        Window {
            kernel: self.kernel_shape.clone().unwrap_or_else(|| kernel.to_vec()),
            strides: self.strides.clone(),
            dilations: self.dilations.clone(),
            padding: self.padding.clone(),
            ceil_mode: false,
        }
    }

    fn conv<T: Float>(&self, input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor, OpError> {
        let x = input.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
        let w = weight.as_slice::<T>().ok_or(OpError::UnsupportedType)?;
        let b = match bias {
            Some(bias) => Some(bias.as_slice::<T>().ok_or(OpError::UnsupportedType)?),
            None => None,
        };

        let (batch, in_chans, in_sizes) = split_nchw(input.shape())?;
        let (out_chans, group_chans, kernel) = split_nchw(weight.shape())?;
        let groups = self.groups.max(1);
        if in_chans != group_chans * groups || out_chans % groups != 0 {
            return Err(OpError::IncompatibleInputShapes(
                "input channels do not match weights and groups",
            ));
        }
        if b.is_some_and(|b| b.len() != out_chans) {
            return Err(OpError::IncompatibleInputShapes("bias size must match output channels"));
        }

        let window = self.window(kernel);
        let layout = window.layout(in_sizes)?;
        let taps = kernel_indices(kernel);
        let in_len: usize = in_sizes.iter().product();
        let kernel_len = taps.len();
        let out_per_group = out_chans / groups;

        let out_len: usize = layout.out_sizes.iter().product();
        let mut output = Vec::with_capacity(batch * out_chans * out_len);
        for n in 0..batch {
            for oc in 0..out_chans {
                let group = oc / out_per_group;
                let bias = b.map(|b| b[oc]).unwrap_or(T::zero());
                for_each_index(&layout.out_sizes, |out_index| {
                    let mut sum = bias;
                    for c in 0..group_chans {
                        let ic = group * group_chans + c;
                        let x_base = (n * in_chans + ic) * in_len;
                        let w_base = (oc * group_chans + c) * kernel_len;
                        window.for_each_tap(&layout, in_sizes, out_index, &taps, |k, pos| {
                            if let Some(pos) = pos {
                                sum = sum + x[x_base + pos] * w[w_base + k];
                            }
                        });
                    }
                    output.push(sum);
                });
            }
        }

        let mut out_shape = vec![batch, out_chans];
        out_shape.extend(&layout.out_sizes);
        Ok(Tensor::from_data(out_shape, output))
    }
}

impl Operator for Conv {
    fn name(&self) -> &str {
        "Conv"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let inputs = ctx.inputs();
        let input = inputs.require(0)?;
        let weight = inputs.require(1)?;
        let bias = inputs.get(2);
        map_float_dtype!(input.dtype(), T, self.conv::<T>(input, weight, bias)).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Conv {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let weight = require_input(inputs, 1)?;
        let shape = match (input.shape.as_deref(), weight.shape.as_deref()) {
            (Some([n, _, in_spatial @ ..]), Some([m, _, kernel @ ..])) if !in_spatial.is_empty() => {
                let kernel: Option<Vec<usize>> = match &self.kernel_shape {
                    Some(k) => Some(k.clone()),
                    None => kernel.iter().map(|d| d.fixed().map(|s| s as usize)).collect(),
                };
                let spatial = match kernel {
                    Some(kernel) => self.window(&kernel).infer_sizes(in_spatial)?,
                    None => vec![Dim::Unknown; in_spatial.len()],
                };
                let mut shape = vec![n.clone(), m.clone()];
                shape.extend(spatial);
                Some(shape)
            }
            _ => None,
        };
        Ok([ShapeInfo::new(input.dtype, shape)].into())
    }
}
