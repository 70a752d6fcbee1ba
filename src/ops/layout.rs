use crate::infer_shapes::{
    broadcast_dims, require_input, Dim, InferShapes, InferShapesError, ShapeInfo, SymExpr,
};
use crate::operator::{IntoOpResult, OpError, OpRunContext, Operator, OutputList};
use crate::ops::{
    broadcast_offsets, broadcast_shapes, for_each_index, resolve_axes, resolve_axis, strided_offsets,
    strides, take_tensor, to_sizes,
};
use crate::tensor::{DataType, Tensor, TensorData};

/// Return a copy of `input` with a new shape.
fn reshaped(input: &Tensor, shape: Vec<usize>) -> Result<Tensor, OpError> {
    if shape.iter().product::<usize>() != input.len() {
        return Err(OpError::IncompatibleInputShapes(
            "output size does not match input size",
        ));
    }
    input.reshaped(shape).ok_or(OpError::UnsupportedType)
}

/// Multiply dimension sizes, returning `Unknown` if any is unknown.
fn dims_product(dims: &[Dim]) -> Dim {
    let mut product = SymExpr::Value(1);
    for dim in dims {
        match dim.to_expr() {
            Some(expr) => product = product * expr,
            None => return Dim::Unknown,
        }
    }
    Dim::from_expr(product)
}

/// Resolve the `start` and `end` attributes of a `Shape` operator.
fn shape_range(ndim: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let clamp = |index: i64| {
        let index = if index < 0 { index + ndim as i64 } else { index };
        index.clamp(0, ndim as i64) as usize
    };
    let start = clamp(start.unwrap_or(0));
    let end = clamp(end.unwrap_or(ndim as i64));
    (start, end.max(start))
}

/// Return the shape of the input as an int64 vector.
#[derive(Debug, Default)]
pub struct Shape {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl Operator for Shape {
    fn name(&self) -> &str {
        "Shape"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let (start, end) = shape_range(input.ndim(), self.start, self.end);
        let dims: Vec<i64> = input.shape()[start..end].iter().map(|&d| d as i64).collect();
        Ok([Tensor::from_vec(dims)].into())
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Shape {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let Some(shape) = &input.shape else {
            return Ok([ShapeInfo::new(Some(DataType::Int64), Some(vec![Dim::Unknown]))].into());
        };
        let (start, end) = shape_range(shape.len(), self.start, self.end);
        let dims = &shape[start..end];
        let values: Option<Vec<SymExpr>> = dims.iter().map(|d| d.to_expr()).collect();

        let info = match values {
            Some(values) => ShapeInfo::from_values(DataType::Int64, values),
            None => ShapeInfo::new(
                Some(DataType::Int64),
                Some(vec![Dim::Fixed(dims.len() as u64)]),
            ),
        };
        Ok([info].into())
    }
}

/// Return the number of elements in the input as an int64 scalar.
#[derive(Debug)]
pub struct Size {}

impl Operator for Size {
    fn name(&self) -> &str {
        "Size"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        Ok([Tensor::from_scalar(input.len() as i64)].into())
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Size {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let size = input.shape.as_deref().map(dims_product).and_then(|d| d.to_expr());
        let info = match size {
            Some(size) => ShapeInfo::from_scalar(DataType::Int64, size),
            None => ShapeInfo::new(Some(DataType::Int64), Some(Vec::new())),
        };
        Ok([info].into())
    }
}

/// Compute the output shape of a `Reshape` with concrete sizes.
fn resolve_reshape(input_shape: &[usize], shape: &[i64], allow_zero: bool) -> Result<Vec<usize>, OpError> {
    let mut out = Vec::with_capacity(shape.len());
    let mut infer_index = None;
    for (i, &size) in shape.iter().enumerate() {
        match size {
            -1 => {
                if infer_index.is_some() {
                    return Err(OpError::InvalidValue("multiple -1 dims in shape"));
                }
                infer_index = Some(i);
                out.push(1);
            }
            0 if !allow_zero => {
                let size = input_shape
                    .get(i)
                    .ok_or(OpError::InvalidValue("zero dim has no corresponding input dim"))?;
                out.push(*size);
            }
            size if size < 0 => return Err(OpError::InvalidValue("invalid dim size")),
            size => out.push(size as usize),
        }
    }

    if let Some(index) = infer_index {
        let input_len: usize = input_shape.iter().product();
        let known: usize = out.iter().product();
        if known == 0 || input_len % known != 0 {
            return Err(OpError::IncompatibleInputShapes(
                "input size is not divisible by output dims",
            ));
        }
        out[index] = input_len / known;
    }
    Ok(out)
}

/// Infer the size of a `-1` dimension in a reshape.
///
/// Symbolic factors of the output are cancelled against matching factors of
/// the input, so that eg. reshaping `[batch, 3, 4]` to `[batch, -1]` gives
/// `[batch, 12]`.
fn infer_reshape_dim(input_shape: &[Dim], known: &[Dim]) -> Dim {
    let Some(mut numerator) = input_shape.iter().map(|d| d.to_expr()).collect::<Option<Vec<_>>>()
    else {
        return Dim::Unknown;
    };
    let mut denominator = 1i64;
    for dim in known {
        match dim.to_expr() {
            Some(SymExpr::Value(v)) => denominator *= v,
            Some(expr) => match numerator.iter().position(|n| *n == expr) {
                Some(pos) => {
                    numerator.remove(pos);
                }
                None => return Dim::Unknown,
            },
            None => return Dim::Unknown,
        }
    }

    let mut constant = 1i64;
    let mut symbols = SymExpr::Value(1);
    for term in numerator {
        match term {
            SymExpr::Value(v) => constant *= v,
            expr => symbols = symbols * expr,
        }
    }
    if denominator == 0 || constant % denominator != 0 {
        return Dim::Unknown;
    }
    Dim::from_expr(SymExpr::Value(constant / denominator) * symbols)
}

#[derive(Debug, Default)]
pub struct Reshape {
    pub allow_zero: bool,
}

impl Operator for Reshape {
    fn name(&self) -> &str {
        "Reshape"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let shape = ctx.inputs().require_ints(1)?;
        let out_shape = resolve_reshape(input.shape(), &shape, self.allow_zero)?;
        reshaped(input, out_shape).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Reshape {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = require_input(inputs, 1)?;

        let out_shape = match (&shape.values, shape.ndim()) {
            (Some(values), _) => {
                let mut dims = Vec::with_capacity(values.len());
                let mut infer_index = None;
                for (i, value) in values.iter().enumerate() {
                    let dim = match value.as_value() {
                        Some(-1) => {
                            infer_index = Some(i);
                            Dim::Unknown
                        }
                        Some(0) if !self.allow_zero => input
                            .shape
                            .as_ref()
                            .and_then(|s| s.get(i).cloned())
                            .unwrap_or(Dim::Unknown),
                        _ => Dim::from_expr(value.clone()),
                    };
                    dims.push(dim);
                }
                if let (Some(index), Some(in_shape)) = (infer_index, &input.shape) {
                    let known: Vec<Dim> = dims
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, d)| d.clone())
                        .collect();
                    dims[index] = infer_reshape_dim(in_shape, &known);
                }
                Some(dims)
            }
            // The output rank is known from the length of the shape input.
            (None, Some(1)) => shape
                .shape
                .as_ref()
                .and_then(|s| s[0].fixed())
                .map(|len| vec![Dim::Unknown; len as usize]),
            _ => None,
        };

        let values = match &out_shape {
            Some(s) if s.len() <= 1 => input.values.clone(),
            _ => None,
        };
        Ok([ShapeInfo {
            dtype: input.dtype,
            shape: out_shape,
            values,
        }]
        .into())
    }
}

/// Resolve the split point for `Flatten`. `axis` may be in `[-ndim, ndim]`,
/// where `ndim` puts every dim in the outer group.
fn flatten_axis(ndim: usize, axis: i64) -> Result<usize, OpError> {
    if axis == ndim as i64 {
        Ok(ndim)
    } else {
        resolve_axis(ndim, axis)
    }
}

/// Reshape the input into a matrix, splitting the dims at `axis`.
#[derive(Debug)]
pub struct Flatten {
    pub axis: i64,
}

impl Operator for Flatten {
    fn name(&self) -> &str {
        "Flatten"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let axis = flatten_axis(input.ndim(), self.axis)?;
        let outer: usize = input.shape()[..axis].iter().product();
        let inner: usize = input.shape()[axis..].iter().product();
        reshaped(input, vec![outer, inner]).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Flatten {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = match &input.shape {
            Some(shape) => {
                let axis = flatten_axis(shape.len(), self.axis)?;
                Some(vec![dims_product(&shape[..axis]), dims_product(&shape[axis..])])
            }
            None => Some(vec![Dim::Unknown, Dim::Unknown]),
        };
        Ok([ShapeInfo::new(input.dtype, shape)].into())
    }
}

/// Return the axes for a `Squeeze` or `Unsqueeze`, from the attribute or the
/// second input.
fn axes_input(attr: &Option<Vec<i64>>, ctx: &OpRunContext) -> Result<Option<Vec<i64>>, OpError> {
    match attr {
        Some(axes) => Ok(Some(axes.clone())),
        None => ctx.inputs().get_ints(1),
    }
}

/// Return the constant axes for shape inference of `Squeeze` or `Unsqueeze`.
///
/// Returns `Err(())` if axes are provided but not known.
fn axes_info(attr: &Option<Vec<i64>>, inputs: &[Option<ShapeInfo>]) -> Result<Option<Vec<i64>>, ()> {
    if let Some(axes) = attr {
        return Ok(Some(axes.clone()));
    }
    match inputs.get(1).and_then(|i| i.as_ref()) {
        Some(info) => info.constant_values().map(Some).ok_or(()),
        None => Ok(None),
    }
}

/// Remove dimensions of size 1.
///
/// Axes to remove are given by the `axes` attribute in opset < 13 and by
/// the second input in later versions. If neither is present, all size-1
/// dims are removed.
#[derive(Debug, Default)]
pub struct Squeeze {
    pub axes: Option<Vec<i64>>,
}

impl Operator for Squeeze {
    fn name(&self) -> &str {
        "Squeeze"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let shape = input.shape();
        let out_shape: Vec<usize> = match axes_input(&self.axes, ctx)? {
            Some(axes) => {
                let axes = resolve_axes(input.ndim(), &axes)?;
                if axes.iter().any(|&axis| shape[axis] != 1) {
                    return Err(OpError::InvalidValue("can only remove dims of size 1"));
                }
                (0..shape.len())
                    .filter(|i| !axes.contains(i))
                    .map(|i| shape[i])
                    .collect()
            }
            None => shape.iter().copied().filter(|&size| size != 1).collect(),
        };
        reshaped(input, out_shape).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Squeeze {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = match (&input.shape, axes_info(&self.axes, inputs)) {
            (Some(shape), Ok(Some(axes))) => {
                let axes = resolve_axes(shape.len(), &axes)?;
                if axes
                    .iter()
                    .any(|&axis| matches!(shape[axis], Dim::Fixed(size) if size != 1))
                {
                    return Err(InferShapesError::IncompatibleShapes);
                }
                Some(
                    (0..shape.len())
                        .filter(|i| !axes.contains(i))
                        .map(|i| shape[i].clone())
                        .collect::<Vec<_>>(),
                )
            }
            // Without axes, the result depends on which dims are 1, which is
            // only known if all dims are fixed.
            (Some(shape), Ok(None)) if shape.iter().all(|d| d.is_fixed()) => Some(
                shape
                    .iter()
                    .filter(|d| **d != Dim::Fixed(1))
                    .cloned()
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        };
        let values = match &shape {
            Some(s) if s.len() <= 1 => input.values.clone(),
            _ => None,
        };
        Ok([ShapeInfo {
            dtype: input.dtype,
            shape,
            values,
        }]
        .into())
    }
}

/// Insert dimensions of size 1.
#[derive(Debug, Default)]
pub struct Unsqueeze {
    pub axes: Option<Vec<i64>>,
}

/// Insert size-1 dims at `axes`, which refer to positions in the output.
fn unsqueeze_shape<D: Clone>(shape: &[D], axes: &[i64], one: D) -> Result<Vec<D>, OpError> {
    let out_ndim = shape.len() + axes.len();
    let axes = resolve_axes(out_ndim, axes)?;
    let mut dims = shape.iter();
    Ok((0..out_ndim)
        .map(|i| {
            if axes.contains(&i) {
                one.clone()
            } else {
                // The number of remaining dims always equals the number of
                // remaining non-axis positions.
                dims.next().cloned().unwrap_or_else(|| one.clone())
            }
        })
        .collect())
}

impl Operator for Unsqueeze {
    fn name(&self) -> &str {
        "Unsqueeze"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let axes = axes_input(&self.axes, ctx)?.ok_or(OpError::MissingInputs)?;
        let out_shape = unsqueeze_shape(input.shape(), &axes, 1)?;
        reshaped(input, out_shape).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Unsqueeze {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = match (&input.shape, axes_info(&self.axes, inputs)) {
            (Some(shape), Ok(Some(axes))) => Some(unsqueeze_shape(shape, &axes, Dim::Fixed(1))?),
            _ => None,
        };
        let values = match &shape {
            Some(s) if s.len() <= 1 => input.values.clone(),
            _ => None,
        };
        Ok([ShapeInfo {
            dtype: input.dtype,
            shape,
            values,
        }]
        .into())
    }
}

/// Permute the dimensions of the input.
///
/// If `perm` is not set, the order of dims is reversed.
#[derive(Debug, Default)]
pub struct Transpose {
    pub perm: Option<Vec<i64>>,
}

impl Transpose {
    fn resolve_perm(&self, ndim: usize) -> Result<Vec<usize>, OpError> {
        match &self.perm {
            Some(perm) => {
                if perm.len() != ndim {
                    return Err(OpError::InvalidValue("perm length does not match input rank"));
                }
                resolve_axes(ndim, perm)
            }
            None => Ok((0..ndim).rev().collect()),
        }
    }
}

impl Operator for Transpose {
    fn name(&self) -> &str {
        "Transpose"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let perm = self.resolve_perm(input.ndim())?;
        let in_strides = strides(input.shape());
        let out_shape: Vec<usize> = perm.iter().map(|&p| input.shape()[p]).collect();
        let out_strides: Vec<isize> = perm.iter().map(|&p| in_strides[p] as isize).collect();
        let offsets = strided_offsets(&out_shape, &out_strides, 0);
        take_tensor(input, out_shape, &offsets).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Transpose {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = match &input.shape {
            Some(shape) => {
                let perm = self.resolve_perm(shape.len())?;
                Some(perm.iter().map(|&p| shape[p].clone()).collect())
            }
            None => self.perm.as_ref().map(|p| vec![Dim::Unknown; p.len()]),
        };
        Ok([ShapeInfo::new(input.dtype, shape)].into())
    }
}

/// Broadcast the input to a shape.
///
/// Unlike most broadcasting operators, the target shape may have size-1
/// dims where the input does not, in which case the input's size is kept.
#[derive(Debug)]
pub struct Expand {}

impl Operator for Expand {
    fn name(&self) -> &str {
        "Expand"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let shape = to_sizes(&ctx.inputs().require_ints(1)?)?;
        let out_shape = broadcast_shapes(input.shape(), &shape)
            .ok_or(OpError::IncompatibleInputShapes("cannot broadcast input to shape"))?;
        let offsets = broadcast_offsets(input.shape(), &out_shape);
        take_tensor(input, out_shape, &offsets).into_op_result()
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for Expand {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let shape = require_input(inputs, 1)?;
        let out_shape = match (&input.shape, shape.values_as_dims()) {
            (Some(in_shape), Some(target)) => Some(broadcast_dims(in_shape, &target)?),
            _ => None,
        };
        Ok([ShapeInfo::new(input.dtype, out_shape)].into())
    }
}

/// Return the indices of non-zero elements, as a `[ndim, count]` int64
/// tensor.
#[derive(Debug)]
pub struct NonZero {}

impl Operator for NonZero {
    fn name(&self) -> &str {
        "NonZero"
    }

    fn run(&self, ctx: &OpRunContext) -> Result<OutputList, OpError> {
        let input = ctx.inputs().require(0)?;
        let values = match input.data() {
            TensorData::Bool(v) => v.clone(),
            _ => input
                .to_f64_vec()
                .ok_or(OpError::UnsupportedType)?
                .into_iter()
                .map(|x| x != 0.)
                .collect(),
        };

        let ndim = input.ndim();
        let mut indices: Vec<Vec<i64>> = vec![Vec::new(); ndim];
        let mut count = 0;
        let mut offset = 0;
        for_each_index(input.shape(), |index| {
            if values[offset] {
                for (dim, &i) in index.iter().enumerate() {
                    indices[dim].push(i as i64);
                }
                count += 1;
            }
            offset += 1;
        });

        let data: Vec<i64> = indices.into_iter().flatten().collect();
        Ok([Tensor::from_data(vec![ndim, count], data)].into())
    }

    fn as_infer_shapes(&self) -> Option<&dyn InferShapes> {
        Some(self)
    }
}

impl InferShapes for NonZero {
    fn infer_shapes(&self, inputs: &[Option<ShapeInfo>]) -> Result<Vec<ShapeInfo>, InferShapesError> {
        let input = require_input(inputs, 0)?;
        let ndim = input.ndim().map(|n| Dim::Fixed(n as u64)).unwrap_or(Dim::Unknown);
        Ok([ShapeInfo::new(Some(DataType::Int64), Some(vec![ndim, Dim::Unknown]))].into())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        infer_reshape_dim, resolve_reshape, Expand, Flatten, NonZero, Reshape, Shape, Squeeze,
        Transpose, Unsqueeze,
    };
    use crate::infer_shapes::{Dim, InferShapes, ShapeInfo, SymExpr};
    use crate::operator::OperatorExt;
    use crate::tensor::{DataType, Tensor};

    #[test]
    fn test_resolve_reshape() {
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1], false), Ok(vec![2, 12]));
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1], true).ok(), None);
        assert!(resolve_reshape(&[2, 3], &[4, -1], false).is_err());
        assert!(resolve_reshape(&[2, 3], &[-1, -1], false).is_err());
    }

    #[test]
    fn test_reshape() {
        struct Case {
            shape: Vec<i64>,
            expected: Vec<usize>,
        }

        let cases = [
            Case {
                shape: vec![4, 2, 3],
                expected: vec![4, 2, 3],
            },
            Case {
                shape: vec![2, 12],
                expected: vec![2, 12],
            },
            Case {
                shape: vec![24],
                expected: vec![24],
            },
            Case {
                shape: vec![2, -1, 2],
                expected: vec![2, 6, 2],
            },
            Case {
                shape: vec![-1, 2, 3, 4],
                expected: vec![1, 2, 3, 4],
            },
            Case {
                shape: vec![2, 0, 4, 1],
                expected: vec![2, 3, 4, 1],
            },
            Case {
                shape: vec![2, 0, 1, -1],
                expected: vec![2, 3, 1, 4],
            },
        ];

        let data: Vec<f32> = (0..24).map(|x| x as f32).collect();
        let input = Tensor::from_data(vec![2, 3, 4], data.clone());

        for case in cases {
            let shape = Tensor::from_vec(case.shape.clone());
            let out = Reshape::default().run_simple(&[&input, &shape]).unwrap();
            assert_eq!(out.shape(), case.expected.as_slice(), "{:?}", case.shape);
            assert_eq!(out.as_slice::<f32>(), Some(data.as_slice()));
        }

        // With `allowzero`, zeros in the shape are literal sizes.
        let empty = Tensor::from_data(vec![0, 3, 4], Vec::<f32>::new());
        let shape = Tensor::from_vec(vec![3i64, 4, 0]);
        let out = Reshape { allow_zero: true }
            .run_simple(&[&empty, &shape])
            .unwrap();
        assert_eq!(out.shape(), &[3, 4, 0]);
        assert!(Reshape { allow_zero: false }
            .run_simple(&[&empty, &shape])
            .is_err());
    }

    #[test]
    fn test_reshape_infer_symbolic() {
        let dims = [Dim::symbol("batch"), Dim::Fixed(3), Dim::Fixed(4)];
        assert_eq!(infer_reshape_dim(&dims, &[Dim::symbol("batch")]), Dim::Fixed(12));
        assert_eq!(
            infer_reshape_dim(&dims, &[Dim::Fixed(6)]),
            Dim::from_expr(SymExpr::Value(2) * SymExpr::var("batch"))
        );
        assert_eq!(infer_reshape_dim(&dims, &[Dim::Fixed(5)]), Dim::Unknown);

        let input = ShapeInfo::new(Some(DataType::Float), Some(dims.to_vec()));
        let shape = ShapeInfo::from_values(DataType::Int64, vec![SymExpr::Value(0), SymExpr::Value(-1)]);
        let out = Reshape::default()
            .infer_shapes(&[Some(input), Some(shape)])
            .unwrap();
        assert_eq!(out[0].shape, Some(vec![Dim::symbol("batch"), Dim::Fixed(12)]));
    }

    #[test]
    fn test_shape_values() {
        let input = ShapeInfo::new(
            Some(DataType::Float),
            Some(vec![Dim::symbol("n"), Dim::Fixed(3), Dim::Fixed(4)]),
        );
        let op = Shape {
            start: Some(1),
            end: None,
        };
        let out = op.infer_shapes(&[Some(input)]).unwrap();
        assert_eq!(out[0].constant_values(), Some(vec![3, 4]));

        let tensor = Tensor::from_data(vec![2, 3], vec![0i32; 6]);
        let shape = Shape::default().run_simple(&[&tensor]).unwrap();
        assert_eq!(shape.as_slice::<i64>(), Some([2, 3].as_slice()));
    }

    #[test]
    fn test_squeeze_unsqueeze() {
        let input = Tensor::from_data(vec![1, 3, 1], vec![1.0f32, 2., 3.]);
        let squeezed = Squeeze::default().run_simple(&[&input]).unwrap();
        assert_eq!(squeezed.shape(), &[3]);

        let op = Squeeze { axes: Some(vec![1]) };
        assert!(op.run_simple(&[&input]).is_err());

        let op = Unsqueeze {
            axes: Some(vec![0, -1]),
        };
        let unsqueezed = op.run_simple(&[&squeezed]).unwrap();
        assert_eq!(unsqueezed.shape(), &[1, 3, 1]);

        // Axes provided as an input.
        let axes = Tensor::from_vec(vec![1i64]);
        let out = Unsqueeze::default().run_simple(&[&squeezed, &axes]).unwrap();
        assert_eq!(out.shape(), &[3, 1]);
    }

    #[test]
    fn test_flatten() {
        struct Case {
            axis: i64,
            expected: Vec<usize>,
        }

        let cases = [
            Case {
                axis: 0,
                expected: vec![1, 120],
            },
            Case {
                axis: 2,
                expected: vec![6, 20],
            },
            Case {
                axis: 4,
                expected: vec![120, 1],
            },
            Case {
                axis: -1,
                expected: vec![24, 5],
            },
            Case {
                axis: -4,
                expected: vec![1, 120],
            },
        ];

        let input = Tensor::from_data(vec![2, 3, 4, 5], (0..120).map(|x| x as f32).collect());
        let input_info = ShapeInfo::new(
            Some(DataType::Float),
            Some(vec![Dim::Fixed(2), Dim::Fixed(3), Dim::Fixed(4), Dim::Fixed(5)]),
        );

        for case in cases {
            let op = Flatten { axis: case.axis };
            let out = op.run_simple(&[&input]).unwrap();
            assert_eq!(out.shape(), case.expected.as_slice(), "axis {}", case.axis);
            assert_eq!(out.as_slice::<f32>(), input.as_slice::<f32>());

            let inferred = op.infer_shapes(&[Some(input_info.clone())]).unwrap();
            let expected_dims: Vec<Dim> =
                case.expected.iter().map(|&d| Dim::Fixed(d as u64)).collect();
            assert_eq!(inferred[0].shape, Some(expected_dims), "axis {}", case.axis);
        }

        for axis in [5, -5] {
            assert!(Flatten { axis }.run_simple(&[&input]).is_err());
            assert!(Flatten { axis }
                .infer_shapes(&[Some(input_info.clone())])
                .is_err());
        }
    }

    #[test]
    fn test_squeeze_negative_axes() {
        let input = Tensor::from_data(vec![2, 1, 3, 1], vec![1.0f32, 2., 3., 4., 5., 6.]);
        let op = Squeeze {
            axes: Some(vec![-1, -3]),
        };
        let out = op.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[2, 3]);

        let info = ShapeInfo::new(
            Some(DataType::Float),
            Some(vec![Dim::symbol("n"), Dim::Fixed(1), Dim::Fixed(3), Dim::Fixed(1)]),
        );
        let inferred = op.infer_shapes(&[Some(info)]).unwrap();
        assert_eq!(
            inferred[0].shape,
            Some(vec![Dim::symbol("n"), Dim::Fixed(3)])
        );
    }

    #[test]
    fn test_transpose() {
        let input = Tensor::from_data(vec![2, 3], vec![1, 2, 3, 4, 5, 6i32]);
        let out = Transpose::default().run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.as_slice::<i32>(), Some([1, 4, 2, 5, 3, 6].as_slice()));
    }

    #[test]
    fn test_expand() {
        let input = Tensor::from_data(vec![2, 1], vec![1.0f32, 2.]);
        let shape = Tensor::from_vec(vec![1i64, 3]);
        let out = Expand {}.run_simple(&[&input, &shape]).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.as_slice::<f32>(), Some([1., 1., 1., 2., 2., 2.].as_slice()));
    }

    #[test]
    fn test_nonzero() {
        let input = Tensor::from_data(vec![2, 2], vec![0.0f32, 1., 2., 0.]);
        let out = NonZero {}.run_simple(&[&input]).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.as_slice::<i64>(), Some([0, 1, 1, 0].as_slice()));
    }
}
