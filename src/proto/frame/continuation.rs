//! The `CONTINUATION` frame: continuation of a header-block fragment that
//! did not fit in the preceding `HEADERS` or `PUSH_PROMISE` frame.

use bytes::Bytes;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flag;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const CONTINUATION_FRAME_TYPE: u8 = 0x9;

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum ContinuationFlag {
    EndHeaders = 0x4,
}

impl Flag for ContinuationFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContinuationFrame {
    pub stream_id: StreamId,
    pub header_fragment: Bytes,
    flags: Flags<ContinuationFlag>,
}

impl ContinuationFrame {
    pub fn new<F: Into<Bytes>>(fragment: F, stream_id: StreamId) -> ContinuationFrame {
        ContinuationFrame {
            stream_id,
            header_fragment: fragment.into(),
            flags: Flags::default(),
        }
    }

    pub fn set_flag(&mut self, flag: ContinuationFlag) {
        self.flags.set(flag);
    }

    pub fn is_end_of_headers(&self) -> bool {
        self.flags.is_set(ContinuationFlag::EndHeaders)
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<ContinuationFrame> {
        let FrameHeader {
            payload_len: _,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != CONTINUATION_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        Ok(ContinuationFrame {
            stream_id,
            header_fragment: raw.payload().clone(),
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: self.header_fragment.len() as u32,
            frame_type: CONTINUATION_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for ContinuationFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.extend_from_bytes(self.header_fragment);
    }
}
