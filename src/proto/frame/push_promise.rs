//! The `PUSH_PROMISE` frame: reserves a server-initiated stream by
//! announcing the request headers the promised response will answer.

use bytes::Bytes;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flag;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::parse_stream_id;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const PUSH_PROMISE_FRAME_TYPE: u8 = 0x5;

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum PushPromiseFlag {
    EndHeaders = 0x4,
    Padded = 0x8,
}

impl Flag for PushPromiseFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushPromiseFrame {
    /// The stream the promise is sent on.
    pub stream_id: StreamId,
    /// The reserved, server-initiated stream.
    pub promised_stream_id: StreamId,
    pub header_fragment: Bytes,
    flags: Flags<PushPromiseFlag>,
}

impl PushPromiseFrame {
    pub fn new<F: Into<Bytes>>(
        stream_id: StreamId,
        promised_stream_id: StreamId,
        fragment: F,
    ) -> PushPromiseFrame {
        PushPromiseFrame {
            stream_id,
            promised_stream_id,
            header_fragment: fragment.into(),
            flags: Flags::default(),
        }
    }

    pub fn set_flag(&mut self, flag: PushPromiseFlag) {
        self.flags.set(flag);
    }

    pub fn is_end_of_headers(&self) -> bool {
        self.flags.is_set(PushPromiseFlag::EndHeaders)
    }

    /// Append a CONTINUATION fragment joined by the framed reader.
    pub(crate) fn extend_fragment(&mut self, fragment: &[u8]) {
        let mut joined = Vec::with_capacity(self.header_fragment.len() + fragment.len());
        joined.extend_from_slice(&self.header_fragment);
        joined.extend_from_slice(fragment);
        self.header_fragment = Bytes::from(joined);
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<PushPromiseFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != PUSH_PROMISE_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        let mut flags: Flags<PushPromiseFlag> = Flags::new(flags);
        let payload = raw.payload().clone();
        let mut pos = 0;
        let mut end = payload.len();

        if flags.is_set(PushPromiseFlag::Padded) {
            if payload.is_empty() {
                return Err(ParseFrameError::IncorrectPayloadLen);
            }
            let pad_len = payload[0] as usize;
            if pad_len + 1 > payload_len as usize {
                return Err(ParseFrameError::PaddingExceedsPayload);
            }
            pos += 1;
            end -= pad_len;
            flags.clear(PushPromiseFlag::Padded);
        }

        if end - pos < 4 {
            return Err(ParseFrameError::IncorrectPayloadLen);
        }
        let promised_stream_id = parse_stream_id(&payload[pos..]);
        pos += 4;

        Ok(PushPromiseFrame {
            stream_id,
            promised_stream_id,
            header_fragment: payload.slice(pos..end),
            flags,
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: 4 + self.header_fragment.len() as u32,
            frame_type: PUSH_PROMISE_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for PushPromiseFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.write_u32(self.promised_stream_id & 0x7fff_ffff);
        buf.extend_from_bytes(self.header_fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn roundtrip() {
        let mut frame = PushPromiseFrame::new(1, 2, &b"hdrs"[..]);
        frame.set_flag(PushPromiseFlag::EndHeaders);
        let bytes = frame.clone().serialize_into_vec();
        let raw = raw_frame_from_parts(FrameHeader::new(8, 0x5, 0x4, 1), bytes[9..].to_vec());
        assert_eq!(frame, PushPromiseFrame::from_raw(&raw).unwrap());
    }

    #[test]
    fn parse_rejects_short_payload() {
        let raw = raw_frame_from_parts(FrameHeader::new(3, 0x5, 0, 1), vec![0, 0, 0]);
        assert!(PushPromiseFrame::from_raw(&raw).is_err());
    }
}
