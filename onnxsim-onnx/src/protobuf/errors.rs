use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::protobuf::varint::VarintError;

/// Errors decoding Protocol Buffers messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtobufError {
    kind: ErrorKind,
    context: Option<&'static str>,
    field: Option<u64>,
}

impl ProtobufError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            field: None,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Return the message type associated with this error.
    pub fn context(&self) -> Option<&str> {
        self.context
    }

    /// Return the field number associated with this error.
    pub fn field(&self) -> Option<u64> {
        self.field
    }

    /// Associate a message type and/or field number with this error.
    ///
    /// Context which has already been set is kept, so that errors report the
    /// innermost message in which they occurred.
    pub fn with_context(mut self, context: Option<&'static str>, field: Option<u64>) -> Self {
        if self.context.is_none() {
            self.context = context;
            self.field = field;
        }
        self
    }
}

impl Display for ProtobufError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.context, self.field) {
            (Some(message), Some(field)) => write!(f, "{} field {}: {}", message, field, self.kind),
            (Some(message), None) => write!(f, "{}: {}", message, self.kind),
            (None, Some(field)) => write!(f, "field {}: {}", field, self.kind),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

impl Error for ProtobufError {}

impl From<VarintError> for ProtobufError {
    fn from(val: VarintError) -> Self {
        match val {
            VarintError::Eof => Self::new(ErrorKind::Eof),
            VarintError::InvalidVarint => Self::new(ErrorKind::InvalidVarint),
        }
    }
}

/// Enum describing the kind of a [`ProtobufError`] error.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid varint value was encountered.
    ///
    /// This can be reported if a varint value is encountered that contains
    /// more than 64 bits of value data.
    InvalidVarint,

    /// The end of the buffer was reached unexpectedly.
    Eof,

    /// Attempted to read a field value of a type that doesn't match the wire
    /// type.
    FieldTypeMismatch,

    /// A packed repeated field has a length that is not a multiple of the
    /// element size.
    FieldLengthMismatch,

    /// A field has an invalid or unsupported wire type.
    ///
    /// Protocol Buffers defines 6 wire types, but uses 3 bits to encode them.
    /// Hence there are two unused values. The deprecated group types are
    /// also rejected, since ONNX does not use them.
    InvalidWireType,

    /// A string field contained invalid UTF-8.
    InvalidUtf8,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidVarint => write!(f, "invalid varint"),
            ErrorKind::Eof => write!(f, "unexpected end of message"),
            ErrorKind::FieldTypeMismatch => write!(f, "field type mismatch"),
            ErrorKind::FieldLengthMismatch => write!(f, "field length mismatch"),
            ErrorKind::InvalidWireType => write!(f, "invalid wire type"),
            ErrorKind::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
        }
    }
}
