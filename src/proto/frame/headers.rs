//! The `HEADERS` frame. Carries an opaque header-block fragment produced by
//! the header codec; fragments spanning multiple frames are joined with
//! CONTINUATION by the framed reader before the session ever sees them.

use bytes::Bytes;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::flags::Flag;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::priority::StreamDependency;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::stream_id::StreamId;

pub const HEADERS_FRAME_TYPE: u8 = 0x1;

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum HeadersFlag {
    EndStream = 0x1,
    EndHeaders = 0x4,
    Padded = 0x8,
    Priority = 0x20,
}

impl Flag for HeadersFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub header_fragment: Bytes,
    pub stream_dep: Option<StreamDependency>,
    flags: Flags<HeadersFlag>,
}

impl HeadersFrame {
    pub fn new<F: Into<Bytes>>(fragment: F, stream_id: StreamId) -> HeadersFrame {
        HeadersFrame {
            stream_id,
            header_fragment: fragment.into(),
            stream_dep: None,
            flags: Flags::default(),
        }
    }

    pub fn set_flag(&mut self, flag: HeadersFlag) {
        self.flags.set(flag);
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_set(HeadersFlag::EndStream)
    }

    pub fn is_end_of_headers(&self) -> bool {
        self.flags.is_set(HeadersFlag::EndHeaders)
    }

    /// Append a CONTINUATION fragment joined by the framed reader.
    pub(crate) fn extend_fragment(&mut self, fragment: &[u8]) {
        let mut joined = Vec::with_capacity(self.header_fragment.len() + fragment.len());
        joined.extend_from_slice(&self.header_fragment);
        joined.extend_from_slice(fragment);
        self.header_fragment = Bytes::from(joined);
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<HeadersFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != HEADERS_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        let mut flags: Flags<HeadersFlag> = Flags::new(flags);
        let payload = raw.payload().clone();
        let mut pos = 0;
        let mut end = payload.len();

        if flags.is_set(HeadersFlag::Padded) {
            if payload.is_empty() {
                return Err(ParseFrameError::IncorrectPayloadLen);
            }
            let pad_len = payload[0] as usize;
            if pad_len + 1 > payload_len as usize {
                return Err(ParseFrameError::PaddingExceedsPayload);
            }
            pos += 1;
            end -= pad_len;
            flags.clear(HeadersFlag::Padded);
        }

        let stream_dep = if flags.is_set(HeadersFlag::Priority) {
            if end - pos < 5 {
                return Err(ParseFrameError::IncorrectPayloadLen);
            }
            let dep = StreamDependency::parse(&payload[pos..]);
            pos += 5;
            Some(dep)
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id,
            header_fragment: payload.slice(pos..end),
            stream_dep,
            flags,
        })
    }

    fn payload_len(&self) -> u32 {
        let dep_len = if self.stream_dep.is_some() { 5 } else { 0 };
        self.header_fragment.len() as u32 + dep_len
    }

    fn get_header(&self) -> FrameHeader {
        let mut flags = self.flags;
        if self.stream_dep.is_some() {
            flags.set(HeadersFlag::Priority);
        }
        FrameHeader {
            payload_len: self.payload_len(),
            frame_type: HEADERS_FRAME_TYPE,
            flags: flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for HeadersFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        if let Some(dep) = self.stream_dep {
            dep.serialize_into(buf);
        }
        buf.extend_from_bytes(self.header_fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn parse_simple() {
        let raw = raw_frame_from_parts(FrameHeader::new(3, 0x1, 0x4, 1), vec![9, 8, 7]);
        let frame = HeadersFrame::from_raw(&raw).unwrap();
        assert_eq!(&[9, 8, 7][..], &frame.header_fragment[..]);
        assert!(frame.is_end_of_headers());
        assert!(!frame.is_end_of_stream());
        assert_eq!(None, frame.stream_dep);
    }

    #[test]
    fn parse_with_priority() {
        let raw = raw_frame_from_parts(
            FrameHeader::new(8, 0x1, 0x20 | 0x4, 3),
            vec![0x80, 0, 0, 1, 16, 0xaa, 0xbb, 0xcc],
        );
        let frame = HeadersFrame::from_raw(&raw).unwrap();
        assert_eq!(
            Some(StreamDependency::new(1, 16, true)),
            frame.stream_dep
        );
        assert_eq!(&[0xaa, 0xbb, 0xcc][..], &frame.header_fragment[..]);
    }

    #[test]
    fn parse_padded() {
        let raw = raw_frame_from_parts(
            FrameHeader::new(6, 0x1, 0x8 | 0x4, 1),
            vec![2, 0xaa, 0xbb, 0xcc, 0, 0],
        );
        let frame = HeadersFrame::from_raw(&raw).unwrap();
        assert_eq!(&[0xaa, 0xbb, 0xcc][..], &frame.header_fragment[..]);
    }

    #[test]
    fn serialize_roundtrip() {
        let mut frame = HeadersFrame::new(&b"frag"[..], 7);
        frame.set_flag(HeadersFlag::EndHeaders);
        frame.set_flag(HeadersFlag::EndStream);
        let bytes = frame.clone().serialize_into_vec();
        let raw = raw_frame_from_parts(FrameHeader::new(4, 0x1, 0x5, 7), bytes[9..].to_vec());
        assert_eq!(frame, HeadersFrame::from_raw(&raw).unwrap());
    }
}
