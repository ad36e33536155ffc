//! Wire-level protocol model: frames, settings, error codes, stream states
//! and flow-control window arithmetic.

pub mod end_stream;
pub mod error_code;
pub mod frame;
pub mod stream_id;
pub mod stream_state;
pub mod window_size;

pub use self::end_stream::EndStream;
pub use self::error_code::ErrorCode;
pub use self::stream_id::StreamId;
pub use self::stream_id::MAX_STREAM_ID;
pub use self::stream_state::StreamState;
pub use self::window_size::WindowSize;
pub use self::window_size::MAX_WINDOW_SIZE;

use self::frame::HttpSettings;

/// Initial values of all defined settings (section 6.5.2).
pub const DEFAULT_SETTINGS: HttpSettings = HttpSettings {
    header_table_size: 4_096,
    enable_push: true,
    max_concurrent_streams: u32::MAX,
    initial_window_size: 65_535,
    max_frame_size: 16_384,
    max_header_list_size: u32::MAX,
};

/// The 24-octet client connection preface that precedes the first frame
/// sent by a client (section 3.5).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
