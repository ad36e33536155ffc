//! The `PING` frame: connection liveness check with an 8-octet opaque
//! payload echoed back in the ACK.

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flag;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;

pub const PING_FRAME_TYPE: u8 = 0x6;

const PING_FRAME_LEN: u32 = 8;

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum PingFlag {
    Ack = 0x1,
}

impl Flag for PingFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PingFrame {
    pub opaque_data: u64,
    flags: Flags<PingFlag>,
}

impl PingFrame {
    pub fn new(opaque_data: u64) -> PingFrame {
        PingFrame {
            opaque_data,
            flags: Flags::default(),
        }
    }

    pub fn new_ack(opaque_data: u64) -> PingFrame {
        let mut frame = PingFrame::new(opaque_data);
        frame.flags.set(PingFlag::Ack);
        frame
    }

    pub fn is_ack(&self) -> bool {
        self.flags.is_set(PingFlag::Ack)
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<PingFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != PING_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if payload_len != PING_FRAME_LEN {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }
        if stream_id != 0 {
            return Err(ParseFrameError::StreamIdMustBeZero);
        }

        let payload = raw.payload();
        let mut opaque = [0u8; 8];
        opaque.copy_from_slice(&payload[..8]);

        Ok(PingFrame {
            opaque_data: u64::from_be_bytes(opaque),
            flags: Flags::new(flags),
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: PING_FRAME_LEN,
            frame_type: PING_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: 0,
        }
    }
}

impl FrameIR for PingFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.extend_from_slice(&self.opaque_data.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn roundtrip() {
        let frame = PingFrame::new_ack(0x0102030405060708);
        let bytes = frame.serialize_into_vec();
        assert_eq!(
            vec![0, 0, 8, 0x6, 0x1, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8],
            bytes
        );
        let raw = raw_frame_from_parts(FrameHeader::new(8, 0x6, 0x1, 0), bytes[9..].to_vec());
        let parsed = PingFrame::from_raw(&raw).unwrap();
        assert_eq!(frame, parsed);
        assert!(parsed.is_ack());
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let raw = raw_frame_from_parts(FrameHeader::new(7, 0x6, 0, 0), vec![0; 7]);
        assert!(PingFrame::from_raw(&raw).is_err());
    }
}
