//! The `RST_STREAM` frame: immediate, unilateral termination of a stream.

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::flags::NoFlag;
use crate::proto::frame::unpack_u32_be;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const RST_STREAM_FRAME_TYPE: u8 = 0x3;

const RST_STREAM_FRAME_LEN: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    raw_error_code: u32,
    flags: Flags<NoFlag>,
}

impl RstStreamFrame {
    pub fn new(stream_id: StreamId, error_code: ErrorCode) -> RstStreamFrame {
        RstStreamFrame {
            stream_id,
            raw_error_code: error_code.into(),
            flags: Flags::default(),
        }
    }

    /// The error code mapped into the known set; unknown codes become
    /// `InternalError`.
    pub fn error_code(&self) -> ErrorCode {
        self.raw_error_code.into()
    }

    pub fn raw_error_code(&self) -> u32 {
        self.raw_error_code
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<RstStreamFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != RST_STREAM_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if payload_len != RST_STREAM_FRAME_LEN {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        Ok(RstStreamFrame {
            stream_id,
            raw_error_code: unpack_u32_be(raw.payload()),
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: RST_STREAM_FRAME_LEN,
            frame_type: RST_STREAM_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for RstStreamFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.write_u32(self.raw_error_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn parse_valid() {
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x3, 0, 7), vec![0, 0, 0, 8]);
        let frame = RstStreamFrame::from_raw(&raw).unwrap();
        assert_eq!(7, frame.stream_id);
        assert_eq!(ErrorCode::Cancel, frame.error_code());
    }

    #[test]
    fn unknown_code_maps_to_internal_error() {
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x3, 0, 7), vec![0, 0, 1, 0]);
        let frame = RstStreamFrame::from_raw(&raw).unwrap();
        assert_eq!(ErrorCode::InternalError, frame.error_code());
        assert_eq!(0x100, frame.raw_error_code());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let raw = raw_frame_from_parts(FrameHeader::new(3, 0x3, 0, 7), vec![0, 0, 0]);
        assert!(RstStreamFrame::from_raw(&raw).is_err());
    }

    #[test]
    fn serialize() {
        let frame = RstStreamFrame::new(2, ErrorCode::FlowControlError);
        assert_eq!(
            vec![0, 0, 4, 0x3, 0, 0, 0, 0, 2, 0, 0, 0, 3],
            frame.serialize_into_vec()
        );
    }
}
