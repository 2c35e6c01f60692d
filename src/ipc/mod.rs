//! Framed IPC between the supervisor and its children.
//!
//! Every message is a 1-byte type discriminant followed by a type-specific,
//! length-prefixed payload. The wire format never carries pointers: a
//! message is built from owned, already-lowered fields, and the reader
//! always deserializes into freshly allocated buffers.

pub mod message;

pub use message::{IpcDecodeError, IpcEncodeError, IpcMessage};
