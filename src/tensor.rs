//! Dense tensors used for constants, folded values and interpreter values.

use std::fmt;
use std::sync::Arc;

use onnxsim_onnx::onnx;

use crate::error::SimplifyError;

/// Element type of a tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    Uint8,
    Int8,
    Uint16,
    Int16,
    Int32,
    Int64,
    String,
    Bool,
    Float16,
    Double,
    Uint32,
    Uint64,
    BFloat16,
}

impl DataType {
    /// Convert an ONNX `TensorProto.DataType` value.
    pub fn from_onnx(dtype: onnx::DataType) -> Option<DataType> {
        let dtype = match dtype {
            onnx::DataType::FLOAT => DataType::Float,
            onnx::DataType::UINT8 => DataType::Uint8,
            onnx::DataType::INT8 => DataType::Int8,
            onnx::DataType::UINT16 => DataType::Uint16,
            onnx::DataType::INT16 => DataType::Int16,
            onnx::DataType::INT32 => DataType::Int32,
            onnx::DataType::INT64 => DataType::Int64,
            onnx::DataType::STRING => DataType::String,
            onnx::DataType::BOOL => DataType::Bool,
            onnx::DataType::FLOAT16 => DataType::Float16,
            onnx::DataType::DOUBLE => DataType::Double,
            onnx::DataType::UINT32 => DataType::Uint32,
            onnx::DataType::UINT64 => DataType::Uint64,
            onnx::DataType::BFLOAT16 => DataType::BFloat16,
            _ => return None,
        };
        Some(dtype)
    }

    pub fn to_onnx(self) -> onnx::DataType {
        match self {
            DataType::Float => onnx::DataType::FLOAT,
            DataType::Uint8 => onnx::DataType::UINT8,
            DataType::Int8 => onnx::DataType::INT8,
            DataType::Uint16 => onnx::DataType::UINT16,
            DataType::Int16 => onnx::DataType::INT16,
            DataType::Int32 => onnx::DataType::INT32,
            DataType::Int64 => onnx::DataType::INT64,
            DataType::String => onnx::DataType::STRING,
            DataType::Bool => onnx::DataType::BOOL,
            DataType::Float16 => onnx::DataType::FLOAT16,
            DataType::Double => onnx::DataType::DOUBLE,
            DataType::Uint32 => onnx::DataType::UINT32,
            DataType::Uint64 => onnx::DataType::UINT64,
            DataType::BFloat16 => onnx::DataType::BFLOAT16,
        }
    }

    /// Size of an element in bytes. Strings are counted as pointer-sized.
    pub fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 | DataType::Float16 | DataType::BFloat16 => 2,
            DataType::Float | DataType::Int32 | DataType::Uint32 => 4,
            DataType::Int64 | DataType::Uint64 | DataType::Double | DataType::String => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float | DataType::Double | DataType::Float16 | DataType::BFloat16
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Float => "float32",
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Float16 => "float16",
            DataType::Double => "float64",
            DataType::Uint32 => "uint32",
            DataType::Uint64 => "uint64",
            DataType::BFloat16 => "bfloat16",
        };
        write!(f, "{}", name)
    }
}

/// Element storage of a tensor.
///
/// Element types which the reference kernels do not compute with are stored
/// as [`TensorData::Opaque`]. Such tensors still have a known type and shape,
/// and keep their original encoding so they can be written back unchanged.
#[derive(Clone, Debug)]
pub enum TensorData {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Bool(Vec<bool>),
    Opaque,
}

/// Element type which the reference kernels can compute with.
pub trait Element:
    Copy + Default + PartialEq + PartialOrd + fmt::Debug + Send + Sync + 'static
{
    const DTYPE: DataType;

    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn into_data(vec: Vec<Self>) -> TensorData;
    fn to_f64(self) -> f64;
    fn from_f64(val: f64) -> Self;
    fn to_i64(self) -> i64;
    fn from_i64(val: i64) -> Self;
}

macro_rules! impl_element {
    ($type:ty, $dtype:ident, $variant:ident) => {
        impl Element for $type {
            const DTYPE: DataType = DataType::$dtype;

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_data(vec: Vec<Self>) -> TensorData {
                TensorData::$variant(vec)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(val: f64) -> Self {
                val as $type
            }

            fn to_i64(self) -> i64 {
                self as i64
            }

            fn from_i64(val: i64) -> Self {
                val as $type
            }
        }
    };
}

impl_element!(f32, Float, Float);
impl_element!(f64, Double, Double);
impl_element!(i64, Int64, Int64);
impl_element!(i32, Int32, Int32);
impl_element!(i8, Int8, Int8);
impl_element!(u8, Uint8, Uint8);

impl Element for bool {
    const DTYPE: DataType = DataType::Bool;

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn into_data(vec: Vec<Self>) -> TensorData {
        TensorData::Bool(vec)
    }

    fn to_f64(self) -> f64 {
        self as i32 as f64
    }

    fn from_f64(val: f64) -> Self {
        val != 0.
    }

    fn to_i64(self) -> i64 {
        self as i64
    }

    fn from_i64(val: i64) -> Self {
        val != 0
    }
}

/// Tensor with a fixed shape and element type.
///
/// Tensors decoded from a model remember the message they were decoded from,
/// so that writing an unmodified tensor reproduces the original encoding.
#[derive(Clone)]
pub struct Tensor {
    dtype: DataType,
    shape: Vec<usize>,
    data: TensorData,
    origin: Option<Arc<onnx::TensorProto>>,
}

impl Tensor {
    /// Create a tensor from a shape and elements.
    ///
    /// Returns `None` if the element count does not match the shape.
    pub fn try_from_data<T: Element>(shape: Vec<usize>, data: Vec<T>) -> Option<Tensor> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Tensor {
            dtype: T::DTYPE,
            shape,
            data: T::into_data(data),
            origin: None,
        })
    }

    /// Create a tensor from a shape and elements.
    ///
    /// Panics if the element count does not match the shape.
    pub fn from_data<T: Element>(shape: Vec<usize>, data: Vec<T>) -> Tensor {
        let len = data.len();
        Self::try_from_data(shape, data)
            .unwrap_or_else(|| panic!("data length {} does not match shape", len))
    }

    pub fn from_scalar<T: Element>(value: T) -> Tensor {
        Self::from_data(Vec::new(), vec![value])
    }

    pub fn from_vec<T: Element>(data: Vec<T>) -> Tensor {
        Self::from_data(vec![data.len()], data)
    }

    /// Create a tensor of type `dtype` from `f64` values, converting each
    /// value with an `as` cast.
    ///
    /// Returns `None` if `dtype` is not evaluable or the element count does
    /// not match the shape.
    pub fn from_f64s(
        dtype: DataType,
        shape: Vec<usize>,
        values: impl IntoIterator<Item = f64>,
    ) -> Option<Tensor> {
        fn conv<T: Element>(values: impl IntoIterator<Item = f64>) -> Vec<T> {
            values.into_iter().map(T::from_f64).collect()
        }
        match dtype {
            DataType::Float => Tensor::try_from_data(shape, conv::<f32>(values)),
            DataType::Double => Tensor::try_from_data(shape, conv::<f64>(values)),
            DataType::Int64 => Tensor::try_from_data(shape, conv::<i64>(values)),
            DataType::Int32 => Tensor::try_from_data(shape, conv::<i32>(values)),
            DataType::Int8 => Tensor::try_from_data(shape, conv::<i8>(values)),
            DataType::Uint8 => Tensor::try_from_data(shape, conv::<u8>(values)),
            DataType::Bool => Tensor::try_from_data(shape, conv::<bool>(values)),
            _ => None,
        }
    }

    /// Create a tensor of type `dtype` from `i64` values.
    ///
    /// See [`from_f64s`](Tensor::from_f64s).
    pub fn from_i64s(
        dtype: DataType,
        shape: Vec<usize>,
        values: impl IntoIterator<Item = i64>,
    ) -> Option<Tensor> {
        fn conv<T: Element>(values: impl IntoIterator<Item = i64>) -> Vec<T> {
            values.into_iter().map(T::from_i64).collect()
        }
        match dtype {
            DataType::Float => Tensor::try_from_data(shape, conv::<f32>(values)),
            DataType::Double => Tensor::try_from_data(shape, conv::<f64>(values)),
            DataType::Int64 => Tensor::try_from_data(shape, conv::<i64>(values)),
            DataType::Int32 => Tensor::try_from_data(shape, conv::<i32>(values)),
            DataType::Int8 => Tensor::try_from_data(shape, conv::<i8>(values)),
            DataType::Uint8 => Tensor::try_from_data(shape, conv::<u8>(values)),
            DataType::Bool => Tensor::try_from_data(shape, conv::<bool>(values)),
            _ => None,
        }
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Option<Tensor> {
        let len = shape.iter().product();
        Tensor::from_f64s(dtype, shape, std::iter::repeat_n(0., len))
    }

    /// Convert this tensor to another element type.
    ///
    /// Floats are converted to integers by truncation, and values are
    /// converted to bool by comparing with zero.
    pub fn cast(&self, dtype: DataType) -> Option<Tensor> {
        if self.dtype == dtype {
            return Some(self.clone());
        }
        if self.dtype.is_float() {
            Tensor::from_f64s(dtype, self.shape.clone(), self.to_f64_vec()?)
        } else {
            Tensor::from_i64s(dtype, self.shape.clone(), self.to_i64_vec()?)
        }
    }

    /// Return the name of the message this tensor was decoded from.
    pub fn origin_name(&self) -> Option<&str> {
        self.origin.as_ref().and_then(|o| o.name.as_deref())
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Return the number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the size of the element data in bytes.
    pub fn byte_size(&self) -> usize {
        self.len() * self.dtype.size()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Return true if the element data is available for computation.
    pub fn is_evaluable(&self) -> bool {
        !matches!(self.data, TensorData::Opaque)
    }

    /// Return the elements as a slice of `T`, if the tensor has that type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    /// Return the single element of a tensor with one element.
    pub fn item<T: Element>(&self) -> Option<T> {
        match self.as_slice::<T>()? {
            [x] => Some(*x),
            _ => None,
        }
    }

    /// Return the elements of an integer or bool tensor as `i64`s.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::Int64(v) => Some(v.clone()),
            TensorData::Int32(v) => Some(v.iter().map(|x| *x as i64).collect()),
            TensorData::Int8(v) => Some(v.iter().map(|x| *x as i64).collect()),
            TensorData::Uint8(v) => Some(v.iter().map(|x| *x as i64).collect()),
            TensorData::Bool(v) => Some(v.iter().map(|x| *x as i64).collect()),
            _ => None,
        }
    }

    /// Return the elements of any evaluable tensor converted to `f64`.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        fn conv<T: Element>(v: &[T]) -> Vec<f64> {
            v.iter().map(|x| x.to_f64()).collect()
        }
        match &self.data {
            TensorData::Float(v) => Some(conv(v)),
            TensorData::Double(v) => Some(conv(v)),
            TensorData::Int64(v) => Some(conv(v)),
            TensorData::Int32(v) => Some(conv(v)),
            TensorData::Int8(v) => Some(conv(v)),
            TensorData::Uint8(v) => Some(conv(v)),
            TensorData::Bool(v) => Some(conv(v)),
            TensorData::Opaque => None,
        }
    }

    /// Return a copy of this tensor with a different shape and the same
    /// elements.
    ///
    /// Returns `None` if the element count differs.
    pub fn reshaped(&self, shape: Vec<usize>) -> Option<Tensor> {
        if shape.iter().product::<usize>() != self.len() || !self.is_evaluable() {
            return None;
        }
        Some(Tensor {
            dtype: self.dtype,
            shape,
            data: self.data.clone(),
            origin: None,
        })
    }

    /// Return true if `self` and `other` have the same type, shape and
    /// bit-identical elements.
    pub fn same_contents(&self, other: &Tensor) -> bool {
        if self.dtype != other.dtype || self.shape != other.shape {
            return false;
        }
        match (&self.data, &other.data) {
            (TensorData::Float(a), TensorData::Float(b)) => {
                a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (TensorData::Double(a), TensorData::Double(b)) => {
                a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (TensorData::Int64(a), TensorData::Int64(b)) => a == b,
            (TensorData::Int32(a), TensorData::Int32(b)) => a == b,
            (TensorData::Int8(a), TensorData::Int8(b)) => a == b,
            (TensorData::Uint8(a), TensorData::Uint8(b)) => a == b,
            (TensorData::Bool(a), TensorData::Bool(b)) => a == b,
            (TensorData::Opaque, TensorData::Opaque) => match (&self.origin, &other.origin) {
                (Some(a), Some(b)) => {
                    a.raw_data == b.raw_data
                        && a.string_data == b.string_data
                        && a.int32_data == b.int32_data
                        && a.uint64_data == b.uint64_data
                        && a.external_data.is_empty()
                        && b.external_data.is_empty()
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Decode a tensor from a `TensorProto`.
    pub fn from_proto(proto: &onnx::TensorProto) -> Result<Tensor, SimplifyError> {
        let name = proto.name.as_deref().unwrap_or_default();
        let malformed = |msg: &str| {
            SimplifyError::MalformedGraph(format!("tensor \"{}\": {}", name, msg))
        };

        let shape = proto
            .dims
            .iter()
            .map(|d| usize::try_from(*d).map_err(|_| malformed("negative dimension")))
            .collect::<Result<Vec<_>, _>>()?;
        let len: usize = shape.iter().product();

        let onnx_dtype = proto.data_type.unwrap_or(onnx::DataType::UNDEFINED);
        let dtype = DataType::from_onnx(onnx_dtype).ok_or_else(|| malformed("unknown data type"))?;
        let origin = Some(Arc::new(proto.clone()));

        let external = proto.data_location == Some(onnx::DataLocation::EXTERNAL);
        if external {
            return Ok(Tensor {
                dtype,
                shape,
                data: TensorData::Opaque,
                origin,
            });
        }

        let raw = proto.raw_data.as_deref();
        let data = match dtype {
            DataType::Float => TensorData::Float(match raw {
                Some(raw) => decode_le(raw, f32::from_le_bytes).ok_or_else(|| malformed("invalid raw data"))?,
                None => proto.float_data.clone(),
            }),
            DataType::Double => TensorData::Double(match raw {
                Some(raw) => decode_le(raw, f64::from_le_bytes).ok_or_else(|| malformed("invalid raw data"))?,
                None => proto.double_data.clone(),
            }),
            DataType::Int64 => TensorData::Int64(match raw {
                Some(raw) => decode_le(raw, i64::from_le_bytes).ok_or_else(|| malformed("invalid raw data"))?,
                None => proto.int64_data.clone(),
            }),
            DataType::Int32 => TensorData::Int32(match raw {
                Some(raw) => decode_le(raw, i32::from_le_bytes).ok_or_else(|| malformed("invalid raw data"))?,
                None => proto.int32_data.clone(),
            }),
            DataType::Int8 => TensorData::Int8(match raw {
                Some(raw) => raw.iter().map(|x| *x as i8).collect(),
                None => proto.int32_data.iter().map(|x| *x as i8).collect(),
            }),
            DataType::Uint8 => TensorData::Uint8(match raw {
                Some(raw) => raw.to_vec(),
                None => proto.int32_data.iter().map(|x| *x as u8).collect(),
            }),
            DataType::Bool => TensorData::Bool(match raw {
                Some(raw) => raw.iter().map(|x| *x != 0).collect(),
                None => proto.int32_data.iter().map(|x| *x != 0).collect(),
            }),
            _ => TensorData::Opaque,
        };

        let tensor = Tensor {
            dtype,
            shape,
            data,
            origin,
        };
        if tensor.is_evaluable() && data_len(&tensor.data) != len {
            return Err(malformed("element count does not match shape"));
        }
        Ok(tensor)
    }

    /// Encode this tensor as a `TensorProto` with the given name.
    ///
    /// Tensors that were decoded from a message are re-encoded from that
    /// message. New tensors store their data in `raw_data`.
    pub fn to_proto(&self, name: Option<&str>) -> onnx::TensorProto {
        if let Some(origin) = &self.origin {
            let mut proto = onnx::TensorProto::clone(origin);
            if proto.name.as_deref() != name {
                proto.name = name.map(|n| n.to_string());
            }
            return proto;
        }

        let raw_data = match &self.data {
            TensorData::Float(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Double(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            TensorData::Int8(v) => v.iter().map(|x| *x as u8).collect(),
            TensorData::Uint8(v) => v.clone(),
            TensorData::Bool(v) => v.iter().map(|x| *x as u8).collect(),
            // Opaque tensors always have an origin.
            TensorData::Opaque => Vec::new(),
        };

        onnx::TensorProto {
            dims: self.shape.iter().map(|d| *d as i64).collect(),
            data_type: Some(self.dtype.to_onnx()),
            name: name.map(|n| n.to_string()),
            raw_data: Some(raw_data),
            ..Default::default()
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tensor");
        s.field("dtype", &self.dtype).field("shape", &self.shape);
        if self.len() <= 16 {
            match &self.data {
                TensorData::Float(v) => s.field("data", v),
                TensorData::Double(v) => s.field("data", v),
                TensorData::Int64(v) => s.field("data", v),
                TensorData::Int32(v) => s.field("data", v),
                TensorData::Int8(v) => s.field("data", v),
                TensorData::Uint8(v) => s.field("data", v),
                TensorData::Bool(v) => s.field("data", v),
                TensorData::Opaque => s.field("data", &"<opaque>"),
            };
        }
        s.finish()
    }
}

fn data_len(data: &TensorData) -> usize {
    match data {
        TensorData::Float(v) => v.len(),
        TensorData::Double(v) => v.len(),
        TensorData::Int64(v) => v.len(),
        TensorData::Int32(v) => v.len(),
        TensorData::Int8(v) => v.len(),
        TensorData::Uint8(v) => v.len(),
        TensorData::Bool(v) => v.len(),
        TensorData::Opaque => 0,
    }
}

/// Decode little-endian elements of `N` bytes each.
fn decode_le<T, const N: usize>(raw: &[u8], from_le_bytes: impl Fn([u8; N]) -> T) -> Option<Vec<T>> {
    if raw.len() % N != 0 {
        return None;
    }
    Some(
        raw.chunks_exact(N)
            .map(|chunk| {
                let mut bytes = [0u8; N];
                bytes.copy_from_slice(chunk);
                from_le_bytes(bytes)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use onnxsim_onnx::onnx;

    use super::{DataType, Tensor};

    #[test]
    fn test_decode_raw_and_typed_data() {
        let raw = onnx::TensorProto {
            dims: vec![2],
            data_type: Some(onnx::DataType::FLOAT),
            raw_data: Some([1.5f32, -2.0].iter().flat_map(|x| x.to_le_bytes()).collect()),
            ..Default::default()
        };
        let tensor = Tensor::from_proto(&raw).unwrap();
        assert_eq!(tensor.as_slice::<f32>(), Some([1.5, -2.0].as_slice()));

        let typed = onnx::TensorProto {
            dims: vec![],
            data_type: Some(onnx::DataType::INT64),
            int64_data: vec![7],
            ..Default::default()
        };
        let tensor = Tensor::from_proto(&typed).unwrap();
        assert_eq!(tensor.item::<i64>(), Some(7));
        assert_eq!(tensor.shape(), &[] as &[usize]);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let proto = onnx::TensorProto {
            dims: vec![3],
            data_type: Some(onnx::DataType::FLOAT),
            float_data: vec![1.0],
            ..Default::default()
        };
        assert!(Tensor::from_proto(&proto).is_err());
    }

    #[test]
    fn test_unmodified_tensor_keeps_encoding() {
        let proto = onnx::TensorProto {
            name: Some("w".into()),
            dims: vec![2],
            data_type: Some(onnx::DataType::FLOAT),
            float_data: vec![1.0, 2.0],
            doc_string: Some("weights".into()),
            ..Default::default()
        };
        let tensor = Tensor::from_proto(&proto).unwrap();
        assert_eq!(tensor.to_proto(Some("w")), proto);

        let renamed = tensor.to_proto(Some("w2"));
        assert_eq!(renamed.name.as_deref(), Some("w2"));
        assert_eq!(renamed.float_data, proto.float_data);
    }

    #[test]
    fn test_new_tensor_uses_raw_data() {
        let tensor = Tensor::from_vec(vec![1i64, 2, 3]);
        let proto = tensor.to_proto(Some("c"));
        assert_eq!(proto.data_type, Some(onnx::DataType::INT64));
        assert_eq!(proto.raw_data.as_ref().map(|r| r.len()), Some(24));

        let decoded = Tensor::from_proto(&proto).unwrap();
        assert!(decoded.same_contents(&tensor));
    }

    #[test]
    fn test_float16_is_opaque() {
        let proto = onnx::TensorProto {
            dims: vec![1],
            data_type: Some(onnx::DataType::FLOAT16),
            raw_data: Some(vec![0, 0x3c]),
            ..Default::default()
        };
        let tensor = Tensor::from_proto(&proto).unwrap();
        assert_eq!(tensor.dtype(), DataType::Float16);
        assert!(!tensor.is_evaluable());
        assert_eq!(tensor.to_proto(None), proto);
    }

    #[test]
    fn test_cast() {
        let floats = Tensor::from_vec(vec![1.7f32, -2.5, 0.0]);
        let ints = floats.cast(DataType::Int64).unwrap();
        assert_eq!(ints.as_slice::<i64>(), Some([1, -2, 0].as_slice()));

        let bools = floats.cast(DataType::Bool).unwrap();
        assert_eq!(bools.as_slice::<bool>(), Some([true, true, false].as_slice()));

        let back = ints.cast(DataType::Float).unwrap();
        assert_eq!(back.as_slice::<f32>(), Some([1.0, -2.0, 0.0].as_slice()));

        assert!(floats.cast(DataType::Float16).is_none());
    }
}
