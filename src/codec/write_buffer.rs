use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;

use crate::proto::frame::pack_header;
use crate::proto::frame::FrameHeader;

/// Target buffer for frame serialization and source buffer for the
/// transport write path.
#[derive(Default)]
pub struct WriteBuffer {
    buf: BytesMut,
}

impl WriteBuffer {
    pub fn new() -> WriteBuffer {
        Default::default()
    }

    pub fn write_header(&mut self, header: FrameHeader) {
        self.buf.extend_from_slice(&pack_header(&header));
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.extend_from_slice(&[value]);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn extend_from_bytes(&mut self, bytes: Bytes) {
        self.buf.extend_from_slice(&bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

impl Buf for WriteBuffer {
    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.buf.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        self.buf.advance(cnt)
    }
}
