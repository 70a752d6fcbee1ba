use crate::protobuf::{Field, Fields, ProtobufError, Writer};

/// Defines how to deserialize a type from an encoded message.
///
/// # Usage
///
/// Given the Protocol Buffers schema:
///
/// ```proto
/// message Message {
///     int32 int_field = 1;
///     string string_field = 2;
/// }
/// ```
///
/// A decoder could be written as follows:
///
/// ```
/// use onnxsim_onnx::protobuf::{DecodeMessage, Fields, ProtobufError};
///
/// #[derive(Default)]
/// struct Message {
///     int_field: i32,
///     string_field: Option<String>,
/// }
///
/// impl Message {
///     const INT_FIELD: u64 = 1;
///     const STRING_FIELD: u64 = 2;
/// }
///
/// impl DecodeMessage for Message {
///     fn decode_fields(mut fields: Fields) -> Result<Self, ProtobufError> {
///         let mut msg = Message::default();
///         while let Some(field) = fields.next()? {
///             match field.number() {
///                 Self::INT_FIELD => { msg.int_field = field.get_int32()?; }
///                 Self::STRING_FIELD => {
///                     msg.string_field = Some(field.read_string()?);
///                 }
///                 _ => {}
///             }
///         }
///         Ok(msg)
///     }
/// }
///
/// let message: &[u8] = &[
///     0x08, 0x96, 0x01, // int_field = 150
///     0x12, 0x02, 0x68, 0x69, // string_field = "hi"
/// ];
/// let msg = Message::decode(message).unwrap();
/// assert_eq!(msg.int_field, 150);
/// assert_eq!(msg.string_field.unwrap(), "hi");
/// ```
pub trait DecodeMessage: Sized {
    /// Decode a message from a buffer.
    fn decode(buf: &[u8]) -> Result<Self, ProtobufError> {
        let ctx = Some(std::any::type_name::<Self>());
        Self::decode_fields(Fields::new(buf, ctx))
    }

    /// Decode a message from an iterator over message fields.
    fn decode_fields(fields: Fields) -> Result<Self, ProtobufError>;

    /// Decode a message stored in a field in a parent message.
    fn decode_field(field: &Field) -> Result<Self, ProtobufError> {
        let ctx = Some(std::any::type_name::<Self>());
        Self::decode_fields(field.read_message(ctx)?)
    }
}

/// Defines how to serialize a type as a message.
///
/// Implementations should write fields in ascending field-number order,
/// followed by any preserved unknown fields.
pub trait EncodeMessage {
    /// Write the fields of this message to `writer`.
    fn encode_fields(&self, writer: &mut Writer);

    /// Encode this message into a new buffer.
    fn encode(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        self.encode_fields(&mut writer);
        writer.into_inner()
    }
}
