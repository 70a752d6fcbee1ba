use crate::protobuf::varint::write_varint;
use crate::protobuf::EncodeMessage;

const WIRE_VARINT: u64 = 0;
const WIRE_I64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_I32: u64 = 5;

/// Incrementally encode fields of a Protocol Buffers message.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the encoded message.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn write_tag(&mut self, number: u64, wire_type: u64) {
        write_varint(&mut self.buf, (number << 3) | wire_type);
    }

    /// Write a field with a varint-encoded value.
    pub fn write_varint(&mut self, number: u64, val: u64) {
        self.write_tag(number, WIRE_VARINT);
        write_varint(&mut self.buf, val);
    }

    /// Write a field with schema type `int64`.
    pub fn write_int64(&mut self, number: u64, val: i64) {
        self.write_varint(number, val as u64);
    }

    /// Write a field with schema type `int32` or an enum.
    ///
    /// Negative values are sign-extended to 64 bits, as the wire format
    /// requires.
    pub fn write_int32(&mut self, number: u64, val: i32) {
        self.write_varint(number, val as i64 as u64);
    }

    /// Write a 32-bit fixed-width field.
    pub fn write_fixed32(&mut self, number: u64, val: i32) {
        self.write_tag(number, WIRE_I32);
        self.buf.extend(val.to_le_bytes());
    }

    /// Write a 64-bit fixed-width field.
    pub fn write_fixed64(&mut self, number: u64, val: i64) {
        self.write_tag(number, WIRE_I64);
        self.buf.extend(val.to_le_bytes());
    }

    /// Write a field with schema type `float`.
    pub fn write_float(&mut self, number: u64, val: f32) {
        self.write_tag(number, WIRE_I32);
        self.buf.extend(val.to_le_bytes());
    }

    /// Write a field with schema type `double`.
    pub fn write_double(&mut self, number: u64, val: f64) {
        self.write_tag(number, WIRE_I64);
        self.buf.extend(val.to_le_bytes());
    }

    /// Write a length-delimited field containing `data`.
    pub fn write_bytes(&mut self, number: u64, data: &[u8]) {
        self.write_tag(number, WIRE_LEN);
        write_varint(&mut self.buf, data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    /// Write a field with schema type `string`.
    pub fn write_string(&mut self, number: u64, val: &str) {
        self.write_bytes(number, val.as_bytes());
    }

    /// Write an embedded message.
    pub fn write_message<M: EncodeMessage>(&mut self, number: u64, msg: &M) {
        let mut sub = Writer::new();
        msg.encode_fields(&mut sub);
        self.write_bytes(number, &sub.buf);
    }

    /// Write a packed repeated varint field.
    ///
    /// Nothing is written if `vals` is empty.
    pub fn write_packed_varints(&mut self, number: u64, vals: impl IntoIterator<Item = u64>) {
        let mut data = Vec::new();
        for val in vals {
            write_varint(&mut data, val);
        }
        if !data.is_empty() {
            self.write_bytes(number, &data);
        }
    }

    /// Write a packed `repeated float` field.
    pub fn write_packed_floats(&mut self, number: u64, vals: &[f32]) {
        let data: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
        if !data.is_empty() {
            self.write_bytes(number, &data);
        }
    }

    /// Write a packed `repeated double` field.
    pub fn write_packed_doubles(&mut self, number: u64, vals: &[f64]) {
        let data: Vec<u8> = vals.iter().flat_map(|v| v.to_le_bytes()).collect();
        if !data.is_empty() {
            self.write_bytes(number, &data);
        }
    }

    /// Append previously encoded fields, such as fields preserved from a
    /// decoded message.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::Writer;

    #[test]
    fn test_write_fields() {
        let mut w = Writer::new();
        w.write_varint(1, 150);
        w.write_string(2, "hi");
        assert_eq!(w.into_inner(), [0x08, 0x96, 0x01, 0x12, 0x02, 0x68, 0x69]);
    }

    #[test]
    fn test_write_negative_int32() {
        let mut w = Writer::new();
        w.write_int32(1, -1);
        let buf = w.into_inner();
        // Tag plus ten byte varint.
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn test_empty_packed_field_is_omitted() {
        let mut w = Writer::new();
        w.write_packed_varints(1, []);
        w.write_packed_floats(2, &[]);
        assert!(w.into_inner().is_empty());
    }
}
