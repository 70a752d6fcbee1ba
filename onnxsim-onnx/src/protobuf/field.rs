use crate::protobuf::errors::{ErrorKind, ProtobufError};
use crate::protobuf::varint::read_varint;

/// Wire-type and associated value of a field.
///
/// See <https://protobuf.dev/programming-guides/encoding/#structure>.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FieldValue<'a> {
    /// Integer value encoded as a varint.
    Varint(u64),

    /// 64-bit fixed-width value.
    I64(i64),

    /// A variable-length value.
    Len(&'a [u8]),

    /// 32-bit fixed-width value.
    I32(i32),
}

/// A single field of a message.
///
/// `Field`s are produced by iterating over fields of a message using
/// [`Fields::next`]. Fields have a number and a value. Variable length values
/// (bytes, strings, embedded messages, packed repeated fields) borrow from the
/// buffer being decoded.
///
/// # Repeated fields
///
/// Repeated fields with a primitive type may have either a packed or un-packed
/// representation. The `read_repeated_*` methods return iterators which handle
/// both cases. The returned iterators will yield a single value if the field
/// is unpacked, or all values in a packed block if the field is packed.
#[derive(Copy, Clone, Debug)]
pub struct Field<'a> {
    number: u64,
    value: FieldValue<'a>,

    /// The complete encoding of this field, including the tag.
    raw: &'a [u8],

    /// Debug name of the message type this field belongs to.
    context: Option<&'static str>,
}

impl<'a> Field<'a> {
    /// Return the field number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Return the field value.
    pub fn value(&self) -> FieldValue<'a> {
        self.value
    }

    /// Return the encoded bytes of this field, including the tag.
    ///
    /// This is used to preserve fields which a decoder does not recognize.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Read the bytes in this field.
    pub fn read_bytes(&self) -> Result<&'a [u8], ProtobufError> {
        match self.value {
            FieldValue::Len(data) => Ok(data),
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Read the UTF-8 encoded string in this field.
    pub fn read_string(&self) -> Result<String, ProtobufError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|_| self.error(ErrorKind::InvalidUtf8))
    }

    /// Begin reading the embedded message in this field.
    ///
    /// `context` is the name of the embedded message type being read. It is
    /// used to add context to any errors encountered.
    pub fn read_message(&self, context: Option<&'static str>) -> Result<Fields<'a>, ProtobufError> {
        let buf = self.read_bytes()?;
        Ok(Fields::new(buf, context))
    }

    fn get_varint(&self) -> Result<u64, ProtobufError> {
        match self.value {
            FieldValue::Varint(val) => Ok(val),
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Get the value of a field with schema type `int32`.
    pub fn get_int32(&self) -> Result<i32, ProtobufError> {
        self.get_varint().map(|v| v as i32)
    }

    /// Get the value of a field where the schema type is an enum.
    pub fn get_enum(&self) -> Result<i32, ProtobufError> {
        self.get_int32()
    }

    /// Get the value of a field with schema type `int64`.
    pub fn get_int64(&self) -> Result<i64, ProtobufError> {
        self.get_varint().map(|v| v as i64)
    }

    /// Get the value of a field with schema type `float`.
    pub fn get_float(&self) -> Result<f32, ProtobufError> {
        match self.value {
            FieldValue::I32(val) => Ok(f32::from_le_bytes(val.to_le_bytes())),
            _ => Err(self.error(ErrorKind::FieldTypeMismatch)),
        }
    }

    /// Get one or multiple values from a `repeated int32` field.
    pub fn read_repeated_int32(
        &self,
    ) -> Result<impl Iterator<Item = Result<i32, ProtobufError>> + 'a, ProtobufError> {
        self.read_repeated_varint(|x| x as i32)
    }

    /// Get one or multiple values from a `repeated int64` field.
    pub fn read_repeated_int64(
        &self,
    ) -> Result<impl Iterator<Item = Result<i64, ProtobufError>> + 'a, ProtobufError> {
        self.read_repeated_varint(|x| x as i64)
    }

    /// Get one or multiple values from a `repeated uint64` field.
    pub fn read_repeated_uint64(
        &self,
    ) -> Result<impl Iterator<Item = Result<u64, ProtobufError>> + 'a, ProtobufError> {
        self.read_repeated_varint(|x| x)
    }

    /// Get one or multiple values from a `repeated float` field.
    pub fn read_repeated_float(
        &self,
    ) -> Result<impl Iterator<Item = Result<f32, ProtobufError>> + 'a, ProtobufError> {
        self.read_repeated_fixed32(f32::from_le_bytes)
    }

    /// Get one or multiple values from a `repeated double` field.
    pub fn read_repeated_double(
        &self,
    ) -> Result<impl Iterator<Item = Result<f64, ProtobufError>> + 'a, ProtobufError> {
        self.read_repeated_fixed64(f64::from_le_bytes)
    }

    /// Get the value of a repeated varint field.
    fn read_repeated_varint<T: Copy + 'a>(
        &self,
        from_u64: impl Fn(u64) -> T + 'a,
    ) -> Result<Repeated<T, impl Iterator<Item = Result<T, ProtobufError>> + 'a>, ProtobufError>
    {
        let repeated = match self.value {
            FieldValue::Varint(val) => Repeated::Unpacked(Some(from_u64(val))),
            FieldValue::Len(mut data) => {
                let context = self.context;
                let number = self.number;
                let iter = std::iter::from_fn(move || {
                    if data.is_empty() {
                        return None;
                    }
                    Some(
                        read_varint(&mut data)
                            .map(&from_u64)
                            .map_err(|err| ProtobufError::from(err).with_context(context, Some(number))),
                    )
                });
                Repeated::Packed(iter)
            }
            _ => {
                return Err(self.error(ErrorKind::FieldTypeMismatch));
            }
        };
        Ok(repeated)
    }

    /// Get the value of a repeated 32-bit scalar field.
    fn read_repeated_fixed32<T: Copy + 'a>(
        &self,
        from_le_bytes: impl Fn([u8; 4]) -> T + 'a,
    ) -> Result<Repeated<T, impl Iterator<Item = Result<T, ProtobufError>> + 'a>, ProtobufError>
    {
        let repeated = match self.value {
            FieldValue::I32(val) => Repeated::Unpacked(Some(from_le_bytes(val.to_le_bytes()))),
            FieldValue::Len(data) => {
                if data.len() % 4 != 0 {
                    return Err(self.error(ErrorKind::FieldLengthMismatch));
                }
                let iter = data.chunks_exact(4).map(move |chunk| {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(chunk);
                    Ok(from_le_bytes(bytes))
                });
                Repeated::Packed(iter)
            }
            _ => {
                return Err(self.error(ErrorKind::FieldTypeMismatch));
            }
        };
        Ok(repeated)
    }

    /// Get the value of a repeated 64-bit scalar field.
    fn read_repeated_fixed64<T: Copy + 'a>(
        &self,
        from_le_bytes: impl Fn([u8; 8]) -> T + 'a,
    ) -> Result<Repeated<T, impl Iterator<Item = Result<T, ProtobufError>> + 'a>, ProtobufError>
    {
        let repeated = match self.value {
            FieldValue::I64(val) => Repeated::Unpacked(Some(from_le_bytes(val.to_le_bytes()))),
            FieldValue::Len(data) => {
                if data.len() % 8 != 0 {
                    return Err(self.error(ErrorKind::FieldLengthMismatch));
                }
                let iter = data.chunks_exact(8).map(move |chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    Ok(from_le_bytes(bytes))
                });
                Repeated::Packed(iter)
            }
            _ => {
                return Err(self.error(ErrorKind::FieldTypeMismatch));
            }
        };
        Ok(repeated)
    }

    fn error(&self, kind: ErrorKind) -> ProtobufError {
        ProtobufError::new(kind).with_context(self.context, Some(self.number))
    }
}

/// Iterator over a repeated scalar field.
///
/// Repeated scalar fields may use either a packed or un-packed representation.
/// See https://protobuf.dev/programming-guides/encoding/#repeated.
enum Repeated<T: Copy, I: Iterator<Item = Result<T, ProtobufError>>> {
    Unpacked(Option<T>),
    Packed(I),
}

impl<T: Copy, I: Iterator<Item = Result<T, ProtobufError>>> Iterator for Repeated<T, I> {
    type Item = Result<T, ProtobufError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Unpacked(val) => val.take().map(Ok),
            Self::Packed(packed) => packed.next(),
        }
    }
}

/// Iterator over fields of a message.
///
/// This type has an [`Iterator`]-like interface but returns a `Result` wrapping
/// an `Option`, which makes it convenient to use with a `while let` loop:
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use onnxsim_onnx::protobuf::Fields;
///
/// // A minimal but valid message.
/// let message = [0x08, 0x96, 0x01];
///
/// let mut fields = Fields::new(&message, None);
/// while let Some(field) = fields.next()? {
///     assert_eq!(field.number(), 1);
/// }
/// # Ok(()) }
/// ```
pub struct Fields<'a> {
    buf: &'a [u8],

    /// Debug name of the message type.
    context: Option<&'static str>,
}

impl<'a> Fields<'a> {
    /// Read fields of a message from `buf`.
    ///
    /// `context` is the name of the message type being read, for debugging
    /// purposes.
    pub fn new(buf: &'a [u8], context: Option<&'static str>) -> Self {
        Self { buf, context }
    }

    /// Read the next field of the message.
    ///
    /// This returns `Ok(Some(field))` if a field was read, `Ok(None)` if the
    /// end of the input was reached or `Err(err)` if an error was encountered.
    #[allow(clippy::should_implement_trait)] // Returns a `Result` wrapping the `Option`.
    pub fn next(&mut self) -> Result<Option<Field<'a>>, ProtobufError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let start = self.buf;
        let tag = read_varint(&mut self.buf)
            .map_err(|err| ProtobufError::from(err).with_context(self.context, None))?;
        let number = tag >> 3;
        let wire_type = tag & 0x7;

        let value = match wire_type {
            0 => read_varint(&mut self.buf)
                .map(FieldValue::Varint)
                .map_err(ProtobufError::from),
            1 => self.take::<8>().map(|b| FieldValue::I64(i64::from_le_bytes(b))),
            2 => read_varint(&mut self.buf)
                .map_err(ProtobufError::from)
                .and_then(|len| {
                    let len = usize::try_from(len)
                        .map_err(|_| ProtobufError::new(ErrorKind::Eof))?;
                    if len > self.buf.len() {
                        return Err(ProtobufError::new(ErrorKind::Eof));
                    }
                    let (data, rest) = self.buf.split_at(len);
                    self.buf = rest;
                    Ok(FieldValue::Len(data))
                }),
            5 => self.take::<4>().map(|b| FieldValue::I32(i32::from_le_bytes(b))),
            _ => Err(ProtobufError::new(ErrorKind::InvalidWireType)),
        }
        .map_err(|err| err.with_context(self.context, Some(number)))?;

        let consumed = start.len() - self.buf.len();
        Ok(Some(Field {
            number,
            value,
            raw: &start[..consumed],
            context: self.context,
        }))
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtobufError> {
        if self.buf.len() < N {
            return Err(ProtobufError::new(ErrorKind::Eof));
        }
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldValue, Fields};
    use crate::protobuf::{ErrorKind, ProtobufError, Writer};

    fn read_fields(buf: &[u8]) -> Result<Vec<(u64, FieldValue<'_>)>, ProtobufError> {
        let mut fields = Fields::new(buf, Some("TestMessage"));
        let mut field_vals = Vec::new();
        while let Some(field) = fields.next()? {
            field_vals.push((field.number(), field.value()));
        }
        Ok(field_vals)
    }

    #[test]
    fn test_iter_fields_simple() {
        let buf = [0x08, 0x96, 0x01];
        let fields = read_fields(&buf).unwrap();
        assert_eq!(fields, [(1, FieldValue::Varint(150))]);
    }

    #[test]
    fn test_iter_fields() {
        let mut w = Writer::new();
        w.write_varint(1, 1234);
        w.write_fixed32(2, 456);
        w.write_bytes(3, &[1, 2, 3, 4]);
        w.write_fixed64(4, 678);
        let buf = w.into_inner();

        let fields = read_fields(&buf).unwrap();

        assert_eq!(
            fields,
            [
                (1, FieldValue::Varint(1234)),
                (2, FieldValue::I32(456)),
                (3, FieldValue::Len(&[1, 2, 3, 4])),
                (4, FieldValue::I64(678)),
            ]
        );
    }

    #[test]
    fn test_raw_field_bytes() {
        let mut w = Writer::new();
        w.write_varint(1, 5);
        w.write_string(2, "hi");
        let buf = w.into_inner();

        let mut fields = Fields::new(&buf, None);
        let first = fields.next().unwrap().unwrap();
        assert_eq!(first.raw(), &[0x08, 0x05]);
        let second = fields.next().unwrap().unwrap();
        assert_eq!(second.raw(), &[0x12, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_truncated_field() {
        let buf = [0x1a, 0x05, 1, 2];
        let err = read_fields(&buf).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Eof);
        assert_eq!(err.context(), Some("TestMessage"));
        assert_eq!(err.field(), Some(3));
    }

    #[test]
    fn test_group_wire_type_rejected() {
        let buf = [0x0b];
        let err = read_fields(&buf).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::InvalidWireType);
    }

    #[test]
    fn test_read_string() {
        let mut w = Writer::new();
        w.write_string(1, "hello");
        let buf = w.into_inner();
        let mut fields = Fields::new(&buf, None);
        let field = fields.next().unwrap().unwrap();
        assert_eq!(field.read_string().unwrap(), "hello");

        let buf = [0x0a, 0x01, 0xff];
        let mut fields = Fields::new(&buf, None);
        let field = fields.next().unwrap().unwrap();
        assert_eq!(
            field.read_string().err().unwrap().kind(),
            &ErrorKind::InvalidUtf8
        );
    }

    #[test]
    fn test_read_message() {
        let mut sub = Writer::new();
        sub.write_fixed32(3, 1);
        sub.write_fixed32(4, 2);

        let mut w = Writer::new();
        w.write_bytes(1, &sub.into_inner());
        w.write_varint(2, 3);
        let buf = w.into_inner();

        let mut fields = Fields::new(&buf, Some("TestMessage"));
        let sub_field = fields.next().unwrap().unwrap();
        let mut sub_fields = sub_field.read_message(Some("SubMessage")).unwrap();
        assert_eq!(sub_fields.next().unwrap().unwrap().number(), 3);
        assert_eq!(sub_fields.next().unwrap().unwrap().number(), 4);
        assert!(sub_fields.next().unwrap().is_none());

        let final_field = fields.next().unwrap().unwrap();
        assert_eq!(final_field.number(), 2);
        assert!(fields.next().unwrap().is_none());
    }

    #[test]
    fn test_read_repeated_varint() {
        let mut w = Writer::new();
        w.write_varint(1, 1); // Non-packed repeated
        w.write_packed_varints(1, [2, 3]); // Packed repeated
        let buf = w.into_inner();

        let mut fields = Fields::new(&buf, None);
        let mut vals = Vec::new();
        while let Some(field) = fields.next().unwrap() {
            for val in field.read_repeated_int32().unwrap() {
                vals.push(val.unwrap());
            }
        }
        assert_eq!(vals, [1, 2, 3]);
    }

    #[test]
    fn test_read_repeated_fixed() {
        let mut w = Writer::new();
        w.write_float(1, 0.);
        w.write_packed_floats(1, &[1., 2.]);
        w.write_double(2, 0.);
        w.write_packed_doubles(2, &[1., 2.]);
        let buf = w.into_inner();

        let mut fields = Fields::new(&buf, None);
        let mut floats = Vec::new();
        let mut doubles = Vec::new();
        while let Some(field) = fields.next().unwrap() {
            match field.number() {
                1 => {
                    for val in field.read_repeated_float().unwrap() {
                        floats.push(val.unwrap());
                    }
                }
                _ => {
                    for val in field.read_repeated_double().unwrap() {
                        doubles.push(val.unwrap());
                    }
                }
            }
        }
        assert_eq!(floats, [0., 1., 2.]);
        assert_eq!(doubles, [0., 1., 2.]);
    }

    #[test]
    fn test_packed_length_mismatch() {
        let buf = [0x0a, 0x03, 0, 0, 0];
        let mut fields = Fields::new(&buf, None);
        let field = fields.next().unwrap().unwrap();
        let err = field.read_repeated_float().err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::FieldLengthMismatch);
    }
}
