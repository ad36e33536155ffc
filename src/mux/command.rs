//! Commands marshalled from application handles into the connection task.
//!
//! The command channel is the session's single pending-operation queue:
//! commands issued before the transport is bound (or before a stream id
//! exists) simply wait in FIFO order and are replayed in issue order, which
//! is what guarantees deferred-write ordering.

use std::sync::Arc;

use bytes::Bytes;
use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;

use crate::headers::Headers;
use crate::mux::cell::StreamCell;
use crate::mux::conn::SessionStateSnapshot;
use crate::mux::event::StreamEvent;
use crate::mux::shutdown::ShutdownOptions;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::SettingsUpdate;
use crate::proto::frame::StreamDependency;

/// Correlates handle-side stream references with core-side streams before
/// and after the wire id is assigned.
pub(crate) type StreamKey = u32;

/// Deferred producer of a trailing header block, invoked exactly once when
/// the write side finishes. `FnOnce` makes a second invocation
/// unrepresentable.
pub type TrailerProducer = Box<dyn FnOnce() -> Headers + Send + 'static>;

pub(crate) struct OpenStreamCmd {
    pub key: StreamKey,
    pub headers: Headers,
    pub end_stream: bool,
    pub dep: Option<StreamDependency>,
    pub trailers: Option<TrailerProducer>,
    pub events: UnboundedSender<StreamEvent>,
    pub cell: Arc<StreamCell>,
}

pub(crate) struct PushStreamCmd {
    pub key: StreamKey,
    pub parent: StreamKey,
    pub headers: Headers,
    pub events: UnboundedSender<StreamEvent>,
    pub cell: Arc<StreamCell>,
}

pub(crate) enum Command {
    OpenStream(OpenStreamCmd),
    PushStream(PushStreamCmd),
    SendData {
        key: StreamKey,
        data: Bytes,
        end_stream: bool,
    },
    SendHeaders {
        key: StreamKey,
        headers: Headers,
        end_stream: bool,
        trailers: Option<TrailerProducer>,
    },
    SendInformational {
        key: StreamKey,
        headers: Headers,
    },
    RstStream {
        key: StreamKey,
        code: ErrorCode,
    },
    Priority {
        key: StreamKey,
        dep: StreamDependency,
    },
    DestroyStream {
        key: StreamKey,
        errored: bool,
    },
    UpdateSettings(SettingsUpdate),
    Ping(u64),
    Shutdown(ShutdownOptions),
    /// Internal: second half of a graceful shutdown, processed one loop
    /// turn after the notice went out.
    FinishGracefulShutdown(ShutdownOptions),
    Destroy,
    DumpState(oneshot::Sender<SessionStateSnapshot>),
}
