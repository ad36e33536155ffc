//! The `WINDOW_UPDATE` frame: grants additional flow-control window to a
//! stream (non-zero stream id) or to the whole connection (stream id 0).

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::flags::NoFlag;
use crate::proto::frame::unpack_u32_be;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const WINDOW_UPDATE_FRAME_TYPE: u8 = 0x8;

const WINDOW_UPDATE_FRAME_LEN: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub increment: u32,
    flags: Flags<NoFlag>,
}

impl WindowUpdateFrame {
    pub fn for_connection(increment: u32) -> WindowUpdateFrame {
        WindowUpdateFrame {
            stream_id: 0,
            increment,
            flags: Flags::default(),
        }
    }

    pub fn for_stream(stream_id: StreamId, increment: u32) -> WindowUpdateFrame {
        WindowUpdateFrame {
            stream_id,
            increment,
            flags: Flags::default(),
        }
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<WindowUpdateFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != WINDOW_UPDATE_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if payload_len != WINDOW_UPDATE_FRAME_LEN {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }

        // reserved bit ignored
        let increment = unpack_u32_be(raw.payload()) & 0x7fff_ffff;
        if increment == 0 {
            return Err(ParseFrameError::WindowUpdateIncrementZero);
        }

        Ok(WindowUpdateFrame {
            stream_id,
            increment,
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: WINDOW_UPDATE_FRAME_LEN,
            frame_type: WINDOW_UPDATE_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for WindowUpdateFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.write_u32(self.increment & 0x7fff_ffff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn roundtrip_for_stream() {
        let frame = WindowUpdateFrame::for_stream(5, 1024);
        let bytes = frame.serialize_into_vec();
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x8, 0, 5), bytes[9..].to_vec());
        assert_eq!(frame, WindowUpdateFrame::from_raw(&raw).unwrap());
    }

    #[test]
    fn parse_rejects_zero_increment() {
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x8, 0, 0), vec![0, 0, 0, 0]);
        assert_eq!(
            Err(ParseFrameError::WindowUpdateIncrementZero),
            WindowUpdateFrame::from_raw(&raw)
        );
    }
}
