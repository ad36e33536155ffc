//! The `GOAWAY` frame: the sender will stop accepting or initiating
//! streams with ids above `last_stream_id`.

use bytes::Bytes;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::error_code::ErrorCode;
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

pub const GOAWAY_FRAME_TYPE: u8 = 0x7;

/// Last stream id and error code are mandatory; debug data is optional.
const GOAWAY_MIN_FRAME_LEN: u32 = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct GoawayFrame {
    pub last_stream_id: StreamId,
    raw_error_code: u32,
    pub debug_data: Bytes,
    flags: Flags<NoFlag>,
}

impl GoawayFrame {
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode) -> GoawayFrame {
        GoawayFrame::with_debug_data(last_stream_id, error_code, Bytes::new())
    }

    pub fn with_debug_data(
        last_stream_id: StreamId,
        error_code: ErrorCode,
        debug_data: Bytes,
    ) -> GoawayFrame {
        GoawayFrame {
            last_stream_id,
            raw_error_code: error_code.into(),
            debug_data,
            flags: Flags::default(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        self.raw_error_code.into()
    }

    pub fn raw_error_code(&self) -> u32 {
        self.raw_error_code
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<GoawayFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != GOAWAY_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if payload_len < GOAWAY_MIN_FRAME_LEN {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }
        if stream_id != 0 {
            return Err(ParseFrameError::StreamIdMustBeZero);
        }

        let payload = raw.payload();
        Ok(GoawayFrame {
            last_stream_id: parse_stream_id(payload),
            raw_error_code: unpack_u32_be(&payload[4..]),
            debug_data: payload.slice(GOAWAY_MIN_FRAME_LEN as usize..),
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: GOAWAY_MIN_FRAME_LEN + self.debug_data.len() as u32,
            frame_type: GOAWAY_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: 0,
        }
    }
}

impl FrameIR for GoawayFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.write_u32(self.last_stream_id);
        buf.write_u32(self.raw_error_code);
        buf.extend_from_bytes(self.debug_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn parse_no_debug_data() {
        let raw =
            raw_frame_from_parts(FrameHeader::new(8, 0x7, 0, 0), vec![0, 0, 0, 5, 0, 0, 0, 1]);
        let frame = GoawayFrame::from_raw(&raw).unwrap();
        assert_eq!(5, frame.last_stream_id);
        assert_eq!(ErrorCode::ProtocolError, frame.error_code());
        assert!(frame.debug_data.is_empty());
    }

    #[test]
    fn parse_with_debug_data() {
        let raw = raw_frame_from_parts(
            FrameHeader::new(11, 0x7, 0, 0),
            vec![0, 0, 0, 0, 0, 0, 0, 0, b'b', b'y', b'e'],
        );
        let frame = GoawayFrame::from_raw(&raw).unwrap();
        assert_eq!(ErrorCode::NoError, frame.error_code());
        assert_eq!(&b"bye"[..], &frame.debug_data[..]);
    }

    #[test]
    fn parse_ignores_reserved_bit() {
        let raw = raw_frame_from_parts(
            FrameHeader::new(8, 0x7, 0, 0),
            vec![0x80, 0, 0, 1, 0, 0, 0, 0],
        );
        assert_eq!(1, GoawayFrame::from_raw(&raw).unwrap().last_stream_id);
    }

    #[test]
    fn parse_rejects_short_payload() {
        let raw = raw_frame_from_parts(FrameHeader::new(7, 0x7, 0, 0), vec![0; 7]);
        assert!(GoawayFrame::from_raw(&raw).is_err());
    }

    #[test]
    fn serialize() {
        let frame =
            GoawayFrame::with_debug_data(3, ErrorCode::EnhanceYourCalm, Bytes::from_static(b"x"));
        assert_eq!(
            vec![0, 0, 9, 0x7, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 0xb, b'x'],
            frame.serialize_into_vec()
        );
    }
}
