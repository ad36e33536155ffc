//! Framed transport I/O: serialization buffers, the outgoing frame queue
//! and the frame reader.

pub mod framed_read;
pub mod queued_write;
pub mod write_buffer;
