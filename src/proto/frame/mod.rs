//! HTTP/2 frame model: a 9-byte header followed by a type-specific payload.
//!
//! Inbound bytes become a [`RawFrame`], then a typed frame, then an
//! [`HttpFrame`] which the session dispatches through a single `match`
//! after classifying it as connection-scoped or stream-scoped.

use bytes::Bytes;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::stream_id::StreamId;

pub mod flags;

pub mod continuation;
pub mod data;
pub mod goaway;
pub mod headers;
pub mod ping;
pub mod priority;
pub mod push_promise;
pub mod rst_stream;
pub mod settings;
pub mod window_update;

pub use self::continuation::ContinuationFlag;
pub use self::continuation::ContinuationFrame;
pub use self::data::DataFlag;
pub use self::data::DataFrame;
pub use self::flags::Flag;
pub use self::flags::Flags;
pub use self::flags::NoFlag;
pub use self::goaway::GoawayFrame;
pub use self::headers::HeadersFlag;
pub use self::headers::HeadersFrame;
pub use self::ping::PingFrame;
pub use self::priority::PriorityFrame;
pub use self::priority::StreamDependency;
pub use self::priority::DEFAULT_WEIGHT;
pub use self::push_promise::PushPromiseFlag;
pub use self::push_promise::PushPromiseFrame;
pub use self::rst_stream::RstStreamFrame;
pub use self::settings::HttpSetting;
pub use self::settings::HttpSettings;
pub use self::settings::SettingsFrame;
pub use self::settings::SettingsUpdate;
pub use self::window_update::WindowUpdateFrame;

/// Length of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Components of an HTTP/2 frame header.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub fn new(payload_len: u32, frame_type: u8, flags: u8, stream_id: StreamId) -> FrameHeader {
        FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        }
    }
}

/// Read 4 network-endian octets as a `u32`.
#[inline]
pub(crate) fn unpack_u32_be(buf: &[u8]) -> u32 {
    ((buf[0] as u32) << 24) | ((buf[1] as u32) << 16) | ((buf[2] as u32) << 8) | (buf[3] as u32)
}

/// Parse 4 octets as a stream id: the most significant bit is reserved and
/// ignored on receipt, the rest is a network-endian 31-bit integer.
#[inline]
pub(crate) fn parse_stream_id(buf: &[u8]) -> StreamId {
    unpack_u32_be(buf) & !0x8000_0000
}

/// Serialize a frame header into its 9-octet wire form.
pub fn pack_header(header: &FrameHeader) -> [u8; FRAME_HEADER_LEN] {
    [
        ((header.payload_len >> 16) & 0xff) as u8,
        ((header.payload_len >> 8) & 0xff) as u8,
        (header.payload_len & 0xff) as u8,
        header.frame_type,
        header.flags,
        ((header.stream_id >> 24) & 0x7f) as u8,
        ((header.stream_id >> 16) & 0xff) as u8,
        ((header.stream_id >> 8) & 0xff) as u8,
        (header.stream_id & 0xff) as u8,
    ]
}

/// Parse the 9-octet wire form of a frame header.
pub fn unpack_header(buf: &[u8; FRAME_HEADER_LEN]) -> FrameHeader {
    FrameHeader {
        payload_len: ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32),
        frame_type: buf[3],
        flags: buf[4],
        stream_id: parse_stream_id(&buf[5..]),
    }
}

/// Frame-parse failures. These mean the wire state is no longer
/// trustworthy; the session treats them as fatal unless noted otherwise.
#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum ParseFrameError {
    #[error("frame dispatched to the wrong parser")]
    InternalError,
    #[error("payload length does not match frame type requirements")]
    IncorrectPayloadLen,
    #[error("frame must be associated with stream 0")]
    StreamIdMustBeZero,
    #[error("frame must not be associated with stream 0")]
    StreamIdMustBeNonZero,
    #[error("SETTINGS_ENABLE_PUSH must be 0 or 1, got {0}")]
    IncorrectSettingsPushValue(u32),
    #[error("SETTINGS_MAX_FRAME_SIZE out of range: {0}")]
    IncorrectSettingsMaxFrameSize(u32),
    #[error("WINDOW_UPDATE increment must not be zero")]
    WindowUpdateIncrementZero,
    #[error("padding longer than frame payload")]
    PaddingExceedsPayload,
    #[error("malformed frame")]
    ProtocolError,
}

pub type ParseFrameResult<T> = Result<T, ParseFrameError>;

/// An unparsed frame: header plus opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    header: FrameHeader,
    payload: Bytes,
}

impl RawFrame {
    pub fn new(header: FrameHeader, payload: Bytes) -> RawFrame {
        debug_assert_eq!(header.payload_len as usize, payload.len());
        RawFrame { header, payload }
    }

    pub fn header(&self) -> FrameHeader {
        self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Serialization of a frame into the outgoing write buffer.
pub trait FrameIR: std::fmt::Debug {
    fn serialize_into(self, buf: &mut WriteBuffer);

    fn serialize_into_vec(self) -> Vec<u8>
    where
        Self: Sized,
    {
        let mut buf = WriteBuffer::new();
        self.serialize_into(&mut buf);
        buf.into_vec()
    }
}

/// Any HTTP/2 frame, tagged by type.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpFrame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Frames of unknown type must be ignored and discarded (section 4.1).
    Unknown(RawFrame),
}

impl HttpFrame {
    pub fn from_raw(raw: RawFrame) -> ParseFrameResult<HttpFrame> {
        Ok(match raw.header().frame_type {
            data::DATA_FRAME_TYPE => HttpFrame::Data(DataFrame::from_raw(&raw)?),
            headers::HEADERS_FRAME_TYPE => HttpFrame::Headers(HeadersFrame::from_raw(&raw)?),
            priority::PRIORITY_FRAME_TYPE => HttpFrame::Priority(PriorityFrame::from_raw(&raw)?),
            rst_stream::RST_STREAM_FRAME_TYPE => {
                HttpFrame::RstStream(RstStreamFrame::from_raw(&raw)?)
            }
            settings::SETTINGS_FRAME_TYPE => HttpFrame::Settings(SettingsFrame::from_raw(&raw)?),
            push_promise::PUSH_PROMISE_FRAME_TYPE => {
                HttpFrame::PushPromise(PushPromiseFrame::from_raw(&raw)?)
            }
            ping::PING_FRAME_TYPE => HttpFrame::Ping(PingFrame::from_raw(&raw)?),
            goaway::GOAWAY_FRAME_TYPE => HttpFrame::Goaway(GoawayFrame::from_raw(&raw)?),
            window_update::WINDOW_UPDATE_FRAME_TYPE => {
                HttpFrame::WindowUpdate(WindowUpdateFrame::from_raw(&raw)?)
            }
            continuation::CONTINUATION_FRAME_TYPE => {
                HttpFrame::Continuation(ContinuationFrame::from_raw(&raw)?)
            }
            _ => HttpFrame::Unknown(raw),
        })
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            HttpFrame::Data(f) => f.stream_id,
            HttpFrame::Headers(f) => f.stream_id,
            HttpFrame::Priority(f) => f.stream_id,
            HttpFrame::RstStream(f) => f.stream_id,
            HttpFrame::Settings(..) => 0,
            HttpFrame::PushPromise(f) => f.stream_id,
            HttpFrame::Ping(..) => 0,
            HttpFrame::Goaway(..) => 0,
            HttpFrame::WindowUpdate(f) => f.stream_id,
            HttpFrame::Continuation(f) => f.stream_id,
            HttpFrame::Unknown(f) => f.header().stream_id,
        }
    }
}

impl FrameIR for HttpFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        match self {
            HttpFrame::Data(f) => f.serialize_into(buf),
            HttpFrame::Headers(f) => f.serialize_into(buf),
            HttpFrame::Priority(f) => f.serialize_into(buf),
            HttpFrame::RstStream(f) => f.serialize_into(buf),
            HttpFrame::Settings(f) => f.serialize_into(buf),
            HttpFrame::PushPromise(f) => f.serialize_into(buf),
            HttpFrame::Ping(f) => f.serialize_into(buf),
            HttpFrame::Goaway(f) => f.serialize_into(buf),
            HttpFrame::WindowUpdate(f) => f.serialize_into(buf),
            HttpFrame::Continuation(f) => f.serialize_into(buf),
            HttpFrame::Unknown(f) => {
                buf.write_header(f.header());
                buf.extend_from_bytes(f.payload().clone());
            }
        }
    }
}

/// Frames addressed to the connection as a whole (stream id 0).
#[derive(Debug)]
pub enum ConnFrame {
    Settings(SettingsFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
}

/// Frames addressed to a particular stream.
#[derive(Debug)]
pub enum StreamFrame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    PushPromise(PushPromiseFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
}

impl StreamFrame {
    pub fn stream_id(&self) -> StreamId {
        match self {
            StreamFrame::Data(f) => f.stream_id,
            StreamFrame::Headers(f) => f.stream_id,
            StreamFrame::Priority(f) => f.stream_id,
            StreamFrame::RstStream(f) => f.stream_id,
            StreamFrame::PushPromise(f) => f.stream_id,
            StreamFrame::WindowUpdate(f) => f.stream_id,
            StreamFrame::Continuation(f) => f.stream_id,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        match self {
            StreamFrame::Data(f) => f.is_end_of_stream(),
            StreamFrame::Headers(f) => f.is_end_of_stream(),
            _ => false,
        }
    }
}

/// A frame classified by dispatch scope.
#[derive(Debug)]
pub enum FrameClassified {
    Conn(ConnFrame),
    Stream(StreamFrame),
    Unknown(RawFrame),
}

impl From<HttpFrame> for FrameClassified {
    fn from(frame: HttpFrame) -> FrameClassified {
        match frame {
            HttpFrame::Data(f) => FrameClassified::Stream(StreamFrame::Data(f)),
            HttpFrame::Headers(f) => FrameClassified::Stream(StreamFrame::Headers(f)),
            HttpFrame::Priority(f) => FrameClassified::Stream(StreamFrame::Priority(f)),
            HttpFrame::RstStream(f) => FrameClassified::Stream(StreamFrame::RstStream(f)),
            HttpFrame::Settings(f) => FrameClassified::Conn(ConnFrame::Settings(f)),
            HttpFrame::PushPromise(f) => FrameClassified::Stream(StreamFrame::PushPromise(f)),
            HttpFrame::Ping(f) => FrameClassified::Conn(ConnFrame::Ping(f)),
            HttpFrame::Goaway(f) => FrameClassified::Conn(ConnFrame::Goaway(f)),
            HttpFrame::WindowUpdate(f) => {
                if f.stream_id == 0 {
                    FrameClassified::Conn(ConnFrame::WindowUpdate(f))
                } else {
                    FrameClassified::Stream(StreamFrame::WindowUpdate(f))
                }
            }
            HttpFrame::Continuation(f) => FrameClassified::Stream(StreamFrame::Continuation(f)),
            HttpFrame::Unknown(f) => FrameClassified::Unknown(f),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_common {
    use super::*;

    /// Build a `RawFrame` from a header and payload the way it would arrive
    /// off the wire.
    pub fn raw_frame_from_parts(header: FrameHeader, payload: Vec<u8>) -> RawFrame {
        RawFrame::new(header, Bytes::from(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = FrameHeader::new(0x12345, 0x6, 0x80, 0x7654321);
        assert_eq!(header, unpack_header(&pack_header(&header)));
    }

    #[test]
    fn stream_id_reserved_bit_ignored() {
        assert_eq!(1, parse_stream_id(&[0x80, 0, 0, 1]));
    }
}
