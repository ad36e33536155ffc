//! HTTP/2 connection multiplexing core.
//!
//! One [`Session`] owns one duplex transport and multiplexes many
//! concurrent logical [`Stream`]s over it: settings negotiation, per-stream
//! and per-connection flow control, priority, and goaway/shutdown
//! sequencing all live here. The transport is any
//! `AsyncRead + AsyncWrite` byte channel (TLS, if any, is established by
//! the caller); header compression is pluggable behind [`HeaderCodec`].
//!
//! Built on tokio. All state of one connection is owned by a single task;
//! application handles talk to it through channels only.

#[macro_use]
extern crate log;

pub use crate::error::Error;
pub use crate::headers::Header;
pub use crate::headers::HeaderCodec;
pub use crate::headers::Headers;
pub use crate::headers::PlainHeaderCodec;
pub use crate::mux::command::TrailerProducer;
pub use crate::mux::conf::Config;
pub use crate::mux::conf::DEFAULT_MAX_PENDING_ACK;
pub use crate::mux::conn::SessionStateSnapshot;
pub use crate::mux::conn::StreamStateSnapshot;
pub use crate::mux::event::IncomingStream;
pub use crate::mux::event::SessionEvent;
pub use crate::mux::event::SessionEvents;
pub use crate::mux::event::StreamEvent;
pub use crate::mux::event::StreamEvents;
pub use crate::mux::handle::RespondOptions;
pub use crate::mux::handle::Session;
pub use crate::mux::handle::Stream;
pub use crate::mux::handle::StreamOptions;
pub use crate::mux::role::Role;
pub use crate::mux::shutdown::ShutdownOptions;
pub use crate::mux::shutdown::ShutdownState;
pub use crate::proto::error_code::ErrorCode;
pub use crate::proto::frame::settings::pack_settings;
pub use crate::proto::frame::settings::unpack_settings;
pub use crate::proto::frame::HttpSettings;
pub use crate::proto::frame::SettingsUpdate;
pub use crate::proto::stream_id::StreamId;
pub use crate::proto::stream_state::StreamState;
pub use crate::result::Result;

pub mod client;
pub mod server;

mod codec;
mod error;
mod headers;
mod mux;
mod result;

pub(crate) mod proto;

/// Wire-level types, exposed for tests and for integrating a real frame
/// or header codec.
pub mod for_test {
    pub use crate::codec::write_buffer::WriteBuffer;
    pub use crate::proto::frame;
    pub use crate::proto::window_size::WindowSize;
    pub use crate::proto::CONNECTION_PREFACE;
    pub use crate::proto::DEFAULT_SETTINGS;
    pub use crate::proto::MAX_WINDOW_SIZE;
}
