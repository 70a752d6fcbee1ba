//! ONNX model Protocol Buffers types.
//!
//! The types in this module correspond to Protocol Buffers messages defined
//! in [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto).
//! See the `.proto` file for detailed information on each type and field.
//!
//! Messages contain the fields which are needed to simplify a model. All
//! other fields are kept in the `unknown` field of each message as raw
//! encoded bytes, and are written back when the message is encoded.

use crate::protobuf::{DecodeMessage, EncodeMessage, Fields, ProtobufError, Writer};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct AttributeType(pub i32);

impl AttributeType {
    pub const UNDEFINED: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const INT: Self = Self(2);
    pub const STRING: Self = Self(3);
    pub const TENSOR: Self = Self(4);
    pub const GRAPH: Self = Self(5);
    pub const FLOATS: Self = Self(6);
    pub const INTS: Self = Self(7);
    pub const STRINGS: Self = Self(8);
    pub const TENSORS: Self = Self(9);
    pub const GRAPHS: Self = Self(10);
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct AttributeProto {
    pub name: Option<String>,
    pub f: Option<f32>,
    pub i: Option<i64>,
    pub s: Option<Vec<u8>>,
    pub t: Option<TensorProto>,
    pub g: Option<GraphProto>,
    pub floats: Vec<f32>,
    pub ints: Vec<i64>,
    pub strings: Vec<Vec<u8>>,
    pub tensors: Vec<TensorProto>,
    pub graphs: Vec<GraphProto>,
    pub doc_string: Option<String>,
    pub r#type: Option<AttributeType>,
    pub ref_attr_name: Option<String>,
    pub unknown: Vec<u8>,
}

impl AttributeProto {
    const NAME: u64 = 1;
    const F: u64 = 2;
    const I: u64 = 3;
    const S: u64 = 4;
    const T: u64 = 5;
    const G: u64 = 6;
    const FLOATS: u64 = 7;
    const INTS: u64 = 8;
    const STRINGS: u64 = 9;
    const TENSORS: u64 = 10;
    const GRAPHS: u64 = 11;
    const DOC_STRING: u64 = 13;
    const TYPE: u64 = 20;
    const REF_ATTR_NAME: u64 = 21;
}

impl DecodeMessage for AttributeProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::F => {
                    msg.f = Some(field.get_float()?);
                }
                Self::I => {
                    msg.i = Some(field.get_int64()?);
                }
                Self::S => {
                    msg.s = Some(field.read_bytes()?.to_vec());
                }
                Self::T => {
                    msg.t = Some(TensorProto::decode_field(&field)?);
                }
                Self::G => {
                    msg.g = Some(GraphProto::decode_field(&field)?);
                }
                Self::FLOATS => {
                    for val in field.read_repeated_float()? {
                        msg.floats.push(val?);
                    }
                }
                Self::INTS => {
                    for val in field.read_repeated_int64()? {
                        msg.ints.push(val?);
                    }
                }
                Self::STRINGS => {
                    msg.strings.push(field.read_bytes()?.to_vec());
                }
                Self::TENSORS => {
                    msg.tensors.push(TensorProto::decode_field(&field)?);
                }
                Self::GRAPHS => {
                    msg.graphs.push(GraphProto::decode_field(&field)?);
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                Self::TYPE => {
                    msg.r#type = Some(AttributeType(field.get_enum()?));
                }
                Self::REF_ATTR_NAME => {
                    msg.ref_attr_name = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for AttributeProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(name) = &self.name {
            w.write_string(Self::NAME, name);
        }
        if let Some(f) = self.f {
            w.write_float(Self::F, f);
        }
        if let Some(i) = self.i {
            w.write_int64(Self::I, i);
        }
        if let Some(s) = &self.s {
            w.write_bytes(Self::S, s);
        }
        if let Some(t) = &self.t {
            w.write_message(Self::T, t);
        }
        if let Some(g) = &self.g {
            w.write_message(Self::G, g);
        }
        for f in &self.floats {
            w.write_float(Self::FLOATS, *f);
        }
        for i in &self.ints {
            w.write_int64(Self::INTS, *i);
        }
        for s in &self.strings {
            w.write_bytes(Self::STRINGS, s);
        }
        for t in &self.tensors {
            w.write_message(Self::TENSORS, t);
        }
        for g in &self.graphs {
            w.write_message(Self::GRAPHS, g);
        }
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        if let Some(ty) = self.r#type {
            w.write_int32(Self::TYPE, ty.0);
        }
        if let Some(ref_name) = &self.ref_attr_name {
            w.write_string(Self::REF_ATTR_NAME, ref_name);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct NodeProto {
    pub input: Vec<String>,
    pub output: Vec<String>,
    pub name: Option<String>,
    pub op_type: Option<String>,
    pub attribute: Vec<AttributeProto>,
    pub doc_string: Option<String>,
    pub domain: Option<String>,
    pub unknown: Vec<u8>,
}

impl NodeProto {
    const INPUT: u64 = 1;
    const OUTPUT: u64 = 2;
    const NAME: u64 = 3;
    const OP_TYPE: u64 = 4;
    const ATTRIBUTE: u64 = 5;
    const DOC_STRING: u64 = 6;
    const DOMAIN: u64 = 7;
}

impl DecodeMessage for NodeProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::INPUT => {
                    msg.input.push(field.read_string()?);
                }
                Self::OUTPUT => {
                    msg.output.push(field.read_string()?);
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::OP_TYPE => {
                    msg.op_type = Some(field.read_string()?);
                }
                Self::ATTRIBUTE => {
                    msg.attribute.push(AttributeProto::decode_field(&field)?);
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                Self::DOMAIN => {
                    msg.domain = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for NodeProto {
    fn encode_fields(&self, w: &mut Writer) {
        for input in &self.input {
            w.write_string(Self::INPUT, input);
        }
        for output in &self.output {
            w.write_string(Self::OUTPUT, output);
        }
        if let Some(name) = &self.name {
            w.write_string(Self::NAME, name);
        }
        if let Some(op_type) = &self.op_type {
            w.write_string(Self::OP_TYPE, op_type);
        }
        for attr in &self.attribute {
            w.write_message(Self::ATTRIBUTE, attr);
        }
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        if let Some(domain) = &self.domain {
            w.write_string(Self::DOMAIN, domain);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct DataType(pub i32);

impl DataType {
    pub const UNDEFINED: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const UINT8: Self = Self(2);
    pub const INT8: Self = Self(3);
    pub const UINT16: Self = Self(4);
    pub const INT16: Self = Self(5);
    pub const INT32: Self = Self(6);
    pub const INT64: Self = Self(7);
    pub const STRING: Self = Self(8);
    pub const BOOL: Self = Self(9);
    pub const FLOAT16: Self = Self(10);
    pub const DOUBLE: Self = Self(11);
    pub const UINT32: Self = Self(12);
    pub const UINT64: Self = Self(13);
    pub const BFLOAT16: Self = Self(16);
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DataLocation(pub i32);

impl DataLocation {
    pub const DEFAULT: Self = Self(0);
    pub const EXTERNAL: Self = Self(1);
}

#[derive(Clone, Default, PartialEq)]
pub struct TensorProto {
    pub dims: Vec<i64>,
    pub data_type: Option<DataType>,
    pub float_data: Vec<f32>,
    pub int32_data: Vec<i32>,
    pub string_data: Vec<Vec<u8>>,
    pub int64_data: Vec<i64>,
    pub name: Option<String>,

    /// Field containing tensor data as bytes in packed little-endian order.
    ///
    /// This is the field most often used to store data for large tensors.
    pub raw_data: Option<Vec<u8>>,

    pub double_data: Vec<f64>,
    pub uint64_data: Vec<u64>,
    pub doc_string: Option<String>,
    pub external_data: Vec<StringStringEntryProto>,
    pub data_location: Option<DataLocation>,
    pub unknown: Vec<u8>,
}

impl TensorProto {
    const DIMS: u64 = 1;
    const DATA_TYPE: u64 = 2;
    const FLOAT_DATA: u64 = 4;
    const INT32_DATA: u64 = 5;
    const STRING_DATA: u64 = 6;
    const INT64_DATA: u64 = 7;
    const NAME: u64 = 8;
    const RAW_DATA: u64 = 9;
    const DOUBLE_DATA: u64 = 10;
    const UINT64_DATA: u64 = 11;
    const DOC_STRING: u64 = 12;
    const EXTERNAL_DATA: u64 = 13;
    const DATA_LOCATION: u64 = 14;
}

impl std::fmt::Debug for TensorProto {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TensorProto")
            .field("dims", &self.dims)
            .field("data_type", &self.data_type)
            .field("name", &self.name)
            .field("data_location", &self.data_location)
            .finish()
    }
}

impl DecodeMessage for TensorProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::DIMS => {
                    for dim in field.read_repeated_int64()? {
                        msg.dims.push(dim?);
                    }
                }
                Self::DATA_TYPE => {
                    msg.data_type = Some(DataType(field.get_enum()?));
                }
                Self::FLOAT_DATA => {
                    for val in field.read_repeated_float()? {
                        msg.float_data.push(val?);
                    }
                }
                Self::INT32_DATA => {
                    for val in field.read_repeated_int32()? {
                        msg.int32_data.push(val?);
                    }
                }
                Self::STRING_DATA => {
                    msg.string_data.push(field.read_bytes()?.to_vec());
                }
                Self::INT64_DATA => {
                    for val in field.read_repeated_int64()? {
                        msg.int64_data.push(val?);
                    }
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::RAW_DATA => {
                    msg.raw_data = Some(field.read_bytes()?.to_vec());
                }
                Self::DOUBLE_DATA => {
                    for val in field.read_repeated_double()? {
                        msg.double_data.push(val?);
                    }
                }
                Self::UINT64_DATA => {
                    for val in field.read_repeated_uint64()? {
                        msg.uint64_data.push(val?);
                    }
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                Self::EXTERNAL_DATA => {
                    msg.external_data
                        .push(StringStringEntryProto::decode_field(&field)?);
                }
                Self::DATA_LOCATION => {
                    msg.data_location = Some(DataLocation(field.get_enum()?));
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TensorProto {
    fn encode_fields(&self, w: &mut Writer) {
        for dim in &self.dims {
            w.write_int64(Self::DIMS, *dim);
        }
        if let Some(dtype) = self.data_type {
            w.write_int32(Self::DATA_TYPE, dtype.0);
        }
        w.write_packed_floats(Self::FLOAT_DATA, &self.float_data);
        w.write_packed_varints(
            Self::INT32_DATA,
            self.int32_data.iter().map(|v| *v as i64 as u64),
        );
        for s in &self.string_data {
            w.write_bytes(Self::STRING_DATA, s);
        }
        w.write_packed_varints(Self::INT64_DATA, self.int64_data.iter().map(|v| *v as u64));
        if let Some(name) = &self.name {
            w.write_string(Self::NAME, name);
        }
        if let Some(raw) = &self.raw_data {
            w.write_bytes(Self::RAW_DATA, raw);
        }
        w.write_packed_doubles(Self::DOUBLE_DATA, &self.double_data);
        w.write_packed_varints(Self::UINT64_DATA, self.uint64_data.iter().copied());
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        for entry in &self.external_data {
            w.write_message(Self::EXTERNAL_DATA, entry);
        }
        if let Some(loc) = self.data_location {
            w.write_int32(Self::DATA_LOCATION, loc.0);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct StringStringEntryProto {
    pub key: Option<String>,
    pub value: Option<String>,
    pub unknown: Vec<u8>,
}

impl StringStringEntryProto {
    const KEY: u64 = 1;
    const VALUE: u64 = 2;
}

impl DecodeMessage for StringStringEntryProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::KEY => {
                    msg.key = Some(field.read_string()?);
                }
                Self::VALUE => {
                    msg.value = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for StringStringEntryProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(key) = &self.key {
            w.write_string(Self::KEY, key);
        }
        if let Some(value) = &self.value {
            w.write_string(Self::VALUE, value);
        }
        w.write_raw(&self.unknown);
    }
}

/// A single dimension of a [`TensorShapeProto`].
///
/// A dimension may have a fixed size (`dim_value`), a symbolic name
/// (`dim_param`) or neither, if the size is unknown.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Dimension {
    pub dim_value: Option<i64>,
    pub dim_param: Option<String>,
    pub denotation: Option<String>,
    pub unknown: Vec<u8>,
}

impl Dimension {
    const DIM_VALUE: u64 = 1;
    const DIM_PARAM: u64 = 2;
    const DENOTATION: u64 = 3;
}

impl DecodeMessage for Dimension {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::DIM_VALUE => {
                    msg.dim_value = Some(field.get_int64()?);
                }
                Self::DIM_PARAM => {
                    msg.dim_param = Some(field.read_string()?);
                }
                Self::DENOTATION => {
                    msg.denotation = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for Dimension {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(value) = self.dim_value {
            w.write_int64(Self::DIM_VALUE, value);
        }
        if let Some(param) = &self.dim_param {
            w.write_string(Self::DIM_PARAM, param);
        }
        if let Some(denotation) = &self.denotation {
            w.write_string(Self::DENOTATION, denotation);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct TensorShapeProto {
    pub dim: Vec<Dimension>,
    pub unknown: Vec<u8>,
}

impl TensorShapeProto {
    const DIM: u64 = 1;
}

impl DecodeMessage for TensorShapeProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::DIM => {
                    msg.dim.push(Dimension::decode_field(&field)?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TensorShapeProto {
    fn encode_fields(&self, w: &mut Writer) {
        for dim in &self.dim {
            w.write_message(Self::DIM, dim);
        }
        w.write_raw(&self.unknown);
    }
}

/// The `TypeProto.Tensor` message.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct TypeProtoTensor {
    pub elem_type: Option<DataType>,
    pub shape: Option<TensorShapeProto>,
    pub unknown: Vec<u8>,
}

impl TypeProtoTensor {
    const ELEM_TYPE: u64 = 1;
    const SHAPE: u64 = 2;
}

impl DecodeMessage for TypeProtoTensor {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::ELEM_TYPE => {
                    msg.elem_type = Some(DataType(field.get_enum()?));
                }
                Self::SHAPE => {
                    msg.shape = Some(TensorShapeProto::decode_field(&field)?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TypeProtoTensor {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(elem_type) = self.elem_type {
            w.write_int32(Self::ELEM_TYPE, elem_type.0);
        }
        if let Some(shape) = &self.shape {
            w.write_message(Self::SHAPE, shape);
        }
        w.write_raw(&self.unknown);
    }
}

/// Type of a value.
///
/// Only tensor types are decoded. Sequence, map and optional types are kept
/// as unknown fields.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct TypeProto {
    pub tensor_type: Option<TypeProtoTensor>,
    pub denotation: Option<String>,
    pub unknown: Vec<u8>,
}

impl TypeProto {
    const TENSOR_TYPE: u64 = 1;
    const DENOTATION: u64 = 6;
}

impl DecodeMessage for TypeProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::TENSOR_TYPE => {
                    msg.tensor_type = Some(TypeProtoTensor::decode_field(&field)?);
                }
                Self::DENOTATION => {
                    msg.denotation = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for TypeProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(tensor_type) = &self.tensor_type {
            w.write_message(Self::TENSOR_TYPE, tensor_type);
        }
        if let Some(denotation) = &self.denotation {
            w.write_string(Self::DENOTATION, denotation);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct ValueInfoProto {
    pub name: Option<String>,
    pub r#type: Option<TypeProto>,
    pub doc_string: Option<String>,
    pub unknown: Vec<u8>,
}

impl ValueInfoProto {
    const NAME: u64 = 1;
    const TYPE: u64 = 2;
    const DOC_STRING: u64 = 3;
}

impl DecodeMessage for ValueInfoProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::TYPE => {
                    msg.r#type = Some(TypeProto::decode_field(&field)?);
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for ValueInfoProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(name) = &self.name {
            w.write_string(Self::NAME, name);
        }
        if let Some(ty) = &self.r#type {
            w.write_message(Self::TYPE, ty);
        }
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct GraphProto {
    pub node: Vec<NodeProto>,
    pub name: Option<String>,
    pub initializer: Vec<TensorProto>,
    pub doc_string: Option<String>,
    pub input: Vec<ValueInfoProto>,
    pub output: Vec<ValueInfoProto>,
    pub value_info: Vec<ValueInfoProto>,
    pub unknown: Vec<u8>,
}

impl GraphProto {
    const NODE: u64 = 1;
    const NAME: u64 = 2;
    const INITIALIZER: u64 = 5;
    const DOC_STRING: u64 = 10;
    const INPUT: u64 = 11;
    const OUTPUT: u64 = 12;
    const VALUE_INFO: u64 = 13;
}

impl DecodeMessage for GraphProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::NODE => {
                    msg.node.push(NodeProto::decode_field(&field)?);
                }
                Self::NAME => {
                    msg.name = Some(field.read_string()?);
                }
                Self::INITIALIZER => {
                    msg.initializer.push(TensorProto::decode_field(&field)?);
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                Self::INPUT => {
                    msg.input.push(ValueInfoProto::decode_field(&field)?);
                }
                Self::OUTPUT => {
                    msg.output.push(ValueInfoProto::decode_field(&field)?);
                }
                Self::VALUE_INFO => {
                    msg.value_info.push(ValueInfoProto::decode_field(&field)?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for GraphProto {
    fn encode_fields(&self, w: &mut Writer) {
        for node in &self.node {
            w.write_message(Self::NODE, node);
        }
        if let Some(name) = &self.name {
            w.write_string(Self::NAME, name);
        }
        for init in &self.initializer {
            w.write_message(Self::INITIALIZER, init);
        }
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        for input in &self.input {
            w.write_message(Self::INPUT, input);
        }
        for output in &self.output {
            w.write_message(Self::OUTPUT, output);
        }
        for info in &self.value_info {
            w.write_message(Self::VALUE_INFO, info);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct OperatorSetIdProto {
    pub domain: Option<String>,
    pub version: Option<i64>,
    pub unknown: Vec<u8>,
}

impl OperatorSetIdProto {
    const DOMAIN: u64 = 1;
    const VERSION: u64 = 2;
}

impl DecodeMessage for OperatorSetIdProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::DOMAIN => {
                    msg.domain = Some(field.read_string()?);
                }
                Self::VERSION => {
                    msg.version = Some(field.get_int64()?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for OperatorSetIdProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(domain) = &self.domain {
            w.write_string(Self::DOMAIN, domain);
        }
        if let Some(version) = self.version {
            w.write_int64(Self::VERSION, version);
        }
        w.write_raw(&self.unknown);
    }
}

#[derive(Clone, Default, Debug, PartialEq)]
pub struct ModelProto {
    pub ir_version: Option<i64>,
    pub producer_name: Option<String>,
    pub producer_version: Option<String>,
    pub domain: Option<String>,
    pub model_version: Option<i64>,
    pub doc_string: Option<String>,
    pub graph: Option<GraphProto>,
    pub opset_import: Vec<OperatorSetIdProto>,
    pub metadata_props: Vec<StringStringEntryProto>,
    pub unknown: Vec<u8>,
}

impl ModelProto {
    const IR_VERSION: u64 = 1;
    const PRODUCER_NAME: u64 = 2;
    const PRODUCER_VERSION: u64 = 3;
    const DOMAIN: u64 = 4;
    const MODEL_VERSION: u64 = 5;
    const DOC_STRING: u64 = 6;
    const GRAPH: u64 = 7;
    const OPSET_IMPORT: u64 = 8;
    const METADATA_PROPS: u64 = 14;
}

impl DecodeMessage for ModelProto {
    fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
        let mut msg = Self::default();
        while let Some(field) = fields.next()? {
            match field.number() {
                Self::IR_VERSION => {
                    msg.ir_version = Some(field.get_int64()?);
                }
                Self::PRODUCER_NAME => {
                    msg.producer_name = Some(field.read_string()?);
                }
                Self::PRODUCER_VERSION => {
                    msg.producer_version = Some(field.read_string()?);
                }
                Self::DOMAIN => {
                    msg.domain = Some(field.read_string()?);
                }
                Self::MODEL_VERSION => {
                    msg.model_version = Some(field.get_int64()?);
                }
                Self::DOC_STRING => {
                    msg.doc_string = Some(field.read_string()?);
                }
                Self::GRAPH => {
                    msg.graph = Some(GraphProto::decode_field(&field)?);
                }
                Self::OPSET_IMPORT => {
                    msg.opset_import
                        .push(OperatorSetIdProto::decode_field(&field)?);
                }
                Self::METADATA_PROPS => {
                    msg.metadata_props
                        .push(StringStringEntryProto::decode_field(&field)?);
                }
                _ => msg.unknown.extend_from_slice(field.raw()),
            }
        }
        Ok(msg)
    }
}

impl EncodeMessage for ModelProto {
    fn encode_fields(&self, w: &mut Writer) {
        if let Some(ir_version) = self.ir_version {
            w.write_int64(Self::IR_VERSION, ir_version);
        }
        if let Some(name) = &self.producer_name {
            w.write_string(Self::PRODUCER_NAME, name);
        }
        if let Some(version) = &self.producer_version {
            w.write_string(Self::PRODUCER_VERSION, version);
        }
        if let Some(domain) = &self.domain {
            w.write_string(Self::DOMAIN, domain);
        }
        if let Some(version) = self.model_version {
            w.write_int64(Self::MODEL_VERSION, version);
        }
        if let Some(doc) = &self.doc_string {
            w.write_string(Self::DOC_STRING, doc);
        }
        if let Some(graph) = &self.graph {
            w.write_message(Self::GRAPH, graph);
        }
        for opset in &self.opset_import {
            w.write_message(Self::OPSET_IMPORT, opset);
        }
        for prop in &self.metadata_props {
            w.write_message(Self::METADATA_PROPS, prop);
        }
        w.write_raw(&self.unknown);
    }
}

/// Return true if `buf` looks like the start of a serialized ONNX model.
///
/// This checks that the first field is a valid `ModelProto` field with the
/// expected wire type, which is a cheap way to reject files in other formats.
pub fn is_onnx_model(buf: &[u8]) -> bool {
    let mut fields = Fields::new(buf, None);
    match fields.next() {
        Ok(Some(field)) => match field.number() {
            ModelProto::IR_VERSION | ModelProto::MODEL_VERSION => {
                field.get_int64().is_ok()
            }
            ModelProto::PRODUCER_NAME
            | ModelProto::PRODUCER_VERSION
            | ModelProto::DOMAIN
            | ModelProto::DOC_STRING
            | ModelProto::GRAPH
            | ModelProto::OPSET_IMPORT
            | ModelProto::METADATA_PROPS => field.read_bytes().is_ok(),
            _ => false,
        },
        _ => false,
    }
}
