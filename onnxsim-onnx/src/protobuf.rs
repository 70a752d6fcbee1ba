//! Low-level Protocol Buffers message reader and writer.
//!
//! This module provides a minimal API for decoding [Protocol
//! Buffers](https://protobuf.dev/) messages from a byte slice and encoding them
//! again. Decoders have control over which fields are read, and may capture
//! unrecognized fields as raw bytes so they can be written back unchanged.
//!
//! See <https://protobuf.dev/programming-guides/encoding/> for a guide to the
//! wire format.
//!
//! # Defining decoders and encoders
//!
//! Implement [`DecodeMessage`] and [`EncodeMessage`] for a type. Decoders use
//! [`Fields`] to visit the fields of a message and encoders use [`Writer`] to
//! emit them.

mod errors;
mod field;
mod message;
pub mod varint;
mod writer;

pub use errors::{ErrorKind, ProtobufError};
pub use field::{Field, FieldValue, Fields};
pub use message::{DecodeMessage, EncodeMessage};
pub use writer::Writer;
