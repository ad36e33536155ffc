//! The `PRIORITY` frame and the 5-octet stream-dependency field it shares
//! with `HEADERS`.

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::flags::NoFlag;
use crate::proto::frame::parse_stream_id;
use crate::proto::frame::unpack_u32_be;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const PRIORITY_FRAME_TYPE: u8 = 0x2;

const PRIORITY_FRAME_LEN: u32 = 5;

/// Exclusive bit + 31-bit parent stream id + 1-octet weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDependency {
    pub parent: StreamId,
    pub weight: u8,
    pub exclusive: bool,
}

/// Default weight assigned to streams that do not declare one (section 5.3.5).
pub const DEFAULT_WEIGHT: u8 = 16;

impl StreamDependency {
    pub fn new(parent: StreamId, weight: u8, exclusive: bool) -> StreamDependency {
        StreamDependency {
            parent,
            weight,
            exclusive,
        }
    }

    pub(crate) fn parse(buf: &[u8]) -> StreamDependency {
        StreamDependency {
            parent: parse_stream_id(buf),
            weight: buf[4],
            exclusive: unpack_u32_be(buf) & 0x8000_0000 != 0,
        }
    }

    pub(crate) fn serialize_into(&self, buf: &mut WriteBuffer) {
        let mut parent = self.parent & 0x7fff_ffff;
        if self.exclusive {
            parent |= 0x8000_0000;
        }
        buf.write_u32(parent);
        buf.write_u8(self.weight);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub dep: StreamDependency,
    flags: Flags<NoFlag>,
}

impl PriorityFrame {
    pub fn new(stream_id: StreamId, dep: StreamDependency) -> PriorityFrame {
        PriorityFrame {
            stream_id,
            dep,
            flags: Flags::default(),
        }
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<PriorityFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != PRIORITY_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if payload_len != PRIORITY_FRAME_LEN {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        Ok(PriorityFrame {
            stream_id,
            dep: StreamDependency::parse(raw.payload()),
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: PRIORITY_FRAME_LEN,
            frame_type: PRIORITY_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for PriorityFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        self.dep.serialize_into(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn roundtrip() {
        let frame = PriorityFrame::new(5, StreamDependency::new(3, 200, true));
        let bytes = frame.serialize_into_vec();
        assert_eq!(
            vec![0, 0, 5, 0x2, 0, 0, 0, 0, 5, 0x80, 0, 0, 3, 200],
            bytes
        );

        let raw = raw_frame_from_parts(FrameHeader::new(5, 0x2, 0, 5), bytes[9..].to_vec());
        assert_eq!(frame, PriorityFrame::from_raw(&raw).unwrap());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x2, 0, 5), vec![0, 0, 0, 3]);
        assert_eq!(
            Err(ParseFrameError::IncorrectPayloadLen),
            PriorityFrame::from_raw(&raw)
        );
    }
}
