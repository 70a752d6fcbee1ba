//! This crate provides a reader and writer for [ONNX][onnx] model files.
//!
//! # About ONNX models
//!
//! ONNX models are [Protocol Buffers][protobuf] messages using the `ModelProto`
//! schema from
//! [onnx.proto](https://github.com/onnx/onnx/blob/main/onnx/onnx.proto). The
//! `ModelProto` message describes the model structure as a graph. The weights
//! are usually stored inline as `TensorProto` messages.
//!
//! # Usage
//!
//! To read a model, modify it and write it back:
//!
//! ```no_run
//! use std::error::Error;
//!
//! use onnxsim_onnx::onnx::ModelProto;
//! use onnxsim_onnx::protobuf::{DecodeMessage, EncodeMessage};
//!
//! fn main() -> Result<(), Box<dyn Error>> {
//!     let buf = std::fs::read("model.onnx")?;
//!     let mut model = ModelProto::decode(&buf)?;
//!     model.producer_name = Some("my-tool".to_string());
//!     std::fs::write("model-out.onnx", model.encode())?;
//!     Ok(())
//! }
//! ```
//!
//! # Round-tripping
//!
//! A model that is decoded and re-encoded without modification should produce
//! the same bytes, provided the original encoder wrote fields in field-number
//! order (as the reference C++ and Python implementations do). To make this
//! possible:
//!
//! - Fields which this crate does not know about are preserved as raw bytes
//!   in an `unknown` field on each message and written after known fields.
//! - Optional scalar fields are represented as `Option`s so that explicitly
//!   written default values are not lost.
//! - Repeated numeric fields are written packed or unpacked according to the
//!   schema, which declares the `TensorProto` data fields as packed.
//!
//! [onnx]: https://onnx.ai/onnx/
//! [protobuf]: https://protobuf.dev/

// This is a crate for parsing potentially untrusted files, so it is preferable
// to avoid unsafe code.
#![forbid(unsafe_code)]

pub mod onnx;
pub mod protobuf;
