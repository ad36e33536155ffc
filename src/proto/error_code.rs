/// Error codes used in `RST_STREAM` and `GOAWAY` frames,
/// as defined in section 7 of the HTTP/2 spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Not an error; used for graceful shutdown and clean stream end.
    NoError = 0x0,
    /// Unspecific protocol error.
    ProtocolError = 0x1,
    /// Unexpected internal error in the endpoint.
    InternalError = 0x2,
    /// The peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// SETTINGS frame was not acknowledged in a timely manner.
    SettingsTimeout = 0x4,
    /// A frame was received after the stream was half-closed.
    StreamClosed = 0x5,
    /// A frame had an invalid size.
    FrameSizeError = 0x6,
    /// The stream was refused before any application processing.
    RefusedStream = 0x7,
    /// The stream is no longer needed.
    Cancel = 0x8,
    /// Header compression context cannot be maintained.
    CompressionError = 0x9,
    /// A CONNECT tunnel was reset or abnormally closed.
    ConnectError = 0xa,
    /// The peer is generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The transport does not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// HTTP/1.1 is required.
    Http11Required = 0xd,
}

impl Default for ErrorCode {
    fn default() -> ErrorCode {
        ErrorCode::NoError
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> ErrorCode {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            // Unknown error codes MAY be treated as equivalent to INTERNAL_ERROR.
            _ => ErrorCode::InternalError,
        }
    }
}

impl Into<u32> for ErrorCode {
    #[inline]
    fn into(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
