use std::io;

use crate::proto::error_code::ErrorCode;
use crate::proto::frame::ParseFrameError;
use crate::proto::stream_id::StreamId;

/// Errors arising from operations on an HTTP/2 session or its streams.
///
/// Variants fall into the taxonomy the session enforces: fatal to the whole
/// session (id-space exhaustion, untrustworthy wire state), fatal to one
/// stream (validation failures, operations on dead streams), or synchronous
/// argument validation surfaced directly to the caller.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[source] io::Error),
    #[error("transport layer error: {0}")]
    TransportError(#[source] anyhow::Error),
    #[error("failed to parse frame: {0}")]
    ParseFrame(ParseFrameError),
    #[error("HTTP/2 error code: {0}")]
    CodeError(ErrorCode),
    #[error("RST_STREAM received")]
    RstStreamReceived(ErrorCode),
    #[error("stream reset while writes were pending")]
    StreamAborted(ErrorCode),
    #[error("window size overflow")]
    WindowSizeOverflow,

    #[error("operation on a destroyed session")]
    InvalidSession,
    #[error("operation on a destroyed stream")]
    InvalidStream,
    #[error("write on a closed stream side")]
    StreamAlreadyClosed,
    #[error("final header block already sent for this direction")]
    HeadersAlreadySent,
    #[error("response status out of range: {0}")]
    InvalidStatus(u32),
    #[error("informational status out of range: {0}")]
    InvalidInformationalStatus(u32),
    #[error("informational status 101 (Switching Protocols) is not valid in HTTP/2")]
    Status101NotAllowed,
    #[error("malformed :status value")]
    MalformedStatus,

    #[error("CONNECT request requires :authority")]
    ConnectAuthorityMissing,
    #[error("CONNECT request must not carry :scheme")]
    ConnectSchemeForbidden,
    #[error("CONNECT request must not carry :path")]
    ConnectPathForbidden,

    #[error("a stream cannot depend on itself")]
    StreamSelfDependency,
    #[error("too many unacknowledged SETTINGS frames: {0}")]
    TooManyPendingSettings(u32),
    #[error("setting {name} out of range: {value}")]
    SettingOutOfRange { name: &'static str, value: u32 },
    #[error("packed settings length {0} is not a multiple of 6")]
    InvalidPackedSettingsLength(usize),
    #[error("got SETTINGS ack without SETTINGS sent")]
    SettingsAckWithoutSettingsSent,

    #[error("stream id space exhausted")]
    StreamIdExhausted,
    #[error("too many concurrent streams")]
    TooManyStreams,
    #[error("the peer has disabled push streams")]
    PushDisabled,
    #[error("received PUSH_PROMISE although push is disabled locally")]
    UnexpectedPushPromise,

    #[error("pseudo-header {0} must not repeat")]
    PseudoHeaderNotSingular(String),
    #[error("connection-specific header {0} must not be sent")]
    ConnectionSpecificHeader(String),
    #[error("single-valued header {0} must not repeat")]
    SingleValuedHeaderRepeated(String),
    #[error("missing required pseudo-header {0}")]
    MissingPseudoHeader(&'static str),
    #[error("pseudo-header {0} not valid here")]
    UnexpectedPseudoHeader(String),
    #[error("pseudo-header after a regular header")]
    PseudoHeaderAfterRegular,

    #[error("GOAWAY after GOAWAY")]
    GoawayAfterGoaway,
    #[error("GOAWAY received")]
    GoawayReceived,
    #[error("PING ack carried wrong opaque data: sent {0}, got {1}")]
    PingAckMismatch(u64, u64),

    #[error("expecting CONTINUATION frame, got frame type {0}")]
    ExpectingContinuationGot(u8),
    #[error("CONTINUATION for stream {1}, expected stream {0}")]
    ExpectingContinuationGotDifferentStreamId(StreamId, StreamId),
    #[error("CONTINUATION frame without preceding HEADERS")]
    ContinuationFrameWithoutHeaders,
    #[error("frame payload of {0} exceeds the advertised maximum {1}")]
    PayloadTooLarge(u32, u32),
    #[error("client connection preface missing or malformed")]
    InvalidConnectionPreface,

    #[error("only {0}-role sessions may perform this operation")]
    WrongRole(&'static str),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("cannot parse authority: {0}")]
    InvalidAuthority(String),
    #[error("session died, command channel closed")]
    ConnDied,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ParseFrameError> for Error {
    fn from(err: ParseFrameError) -> Error {
        Error::ParseFrame(err)
    }
}

impl Into<io::Error> for Error {
    fn into(self) -> io::Error {
        match self {
            Error::IoError(e) => e,
            e => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

fn _assert_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<Error>();
    assert_sync::<Error>();
}
