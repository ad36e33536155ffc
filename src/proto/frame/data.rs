//! The `DATA` frame: flow-controlled payload octets of a stream.

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

pub const DATA_FRAME_TYPE: u8 = 0x0;

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum DataFlag {
    EndStream = 0x1,
    Padded = 0x8,
}

impl Flag for DataFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
    flags: Flags<DataFlag>,
    /// Wire payload length including any padding; padding still counts
    /// against flow-control windows even though it is stripped at parse.
    flow_len: u32,
}

impl DataFrame {
    pub fn with_data<D: Into<Bytes>>(stream_id: StreamId, data: D) -> DataFrame {
        let data = data.into();
        let flow_len = data.len() as u32;
        DataFrame {
            stream_id,
            data,
            flags: Flags::default(),
            flow_len,
        }
    }

    pub fn set_flag(&mut self, flag: DataFlag) {
        self.flags.set(flag);
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.is_set(DataFlag::EndStream)
    }

    /// Length this frame contributes to flow-control accounting.
    pub fn flow_control_len(&self) -> u32 {
        self.flow_len
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<DataFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != DATA_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if stream_id == 0 {
            return Err(ParseFrameError::StreamIdMustBeNonZero);
        }

        let mut flags: Flags<DataFlag> = Flags::new(flags);
        let payload = raw.payload().clone();

        let data = if flags.is_set(DataFlag::Padded) {
            if payload.is_empty() {
                return Err(ParseFrameError::IncorrectPayloadLen);
            }
            let pad_len = payload[0] as usize;
            if pad_len + 1 > payload_len as usize {
                return Err(ParseFrameError::PaddingExceedsPayload);
            }
            // padding octets are dropped; the flag is cleared so the parsed
            // frame always describes exactly its data
            flags.clear(DataFlag::Padded);
            payload.slice(1..payload.len() - pad_len)
        } else {
            payload
        };

        Ok(DataFrame {
            stream_id,
            data,
            flags,
            flow_len: payload_len,
        })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: self.data.len() as u32,
            frame_type: DATA_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: self.stream_id,
        }
    }
}

impl FrameIR for DataFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        buf.extend_from_bytes(self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::frame::test_common::raw_frame_from_parts;

    #[test]
    fn parse_simple() {
        let raw = raw_frame_from_parts(FrameHeader::new(3, 0x0, 0x1, 5), vec![1, 2, 3]);
        let frame = DataFrame::from_raw(&raw).unwrap();
        assert_eq!(5, frame.stream_id);
        assert_eq!(&[1, 2, 3][..], &frame.data[..]);
        assert_eq!(3, frame.flow_control_len());
        assert!(frame.is_end_of_stream());
    }

    #[test]
    fn parse_padded_strips_padding_but_counts_it() {
        // pad length 2, data "ab", padding zeroes
        let raw = raw_frame_from_parts(
            FrameHeader::new(5, 0x0, 0x8, 1),
            vec![2, b'a', b'b', 0, 0],
        );
        let frame = DataFrame::from_raw(&raw).unwrap();
        assert_eq!(&b"ab"[..], &frame.data[..]);
        assert_eq!(5, frame.flow_control_len());
        assert!(!frame.is_end_of_stream());
    }

    #[test]
    fn parse_rejects_padding_longer_than_payload() {
        let raw = raw_frame_from_parts(FrameHeader::new(2, 0x0, 0x8, 1), vec![5, b'a']);
        assert!(DataFrame::from_raw(&raw).is_err());
    }

    #[test]
    fn parse_rejects_stream_zero() {
        let raw = raw_frame_from_parts(FrameHeader::new(1, 0x0, 0, 0), vec![1]);
        assert_eq!(
            Err(ParseFrameError::StreamIdMustBeNonZero),
            DataFrame::from_raw(&raw)
        );
    }

    #[test]
    fn serialize_simple() {
        let mut frame = DataFrame::with_data(3, &b"xyz"[..]);
        frame.set_flag(DataFlag::EndStream);
        assert_eq!(
            vec![0, 0, 3, 0x0, 0x1, 0, 0, 0, 3, b'x', b'y', b'z'],
            frame.serialize_into_vec()
        );
    }
}
