//! Events delivered to the application: session-scoped on the session
//! event queue, stream-scoped on each stream's own queue.

use std::fmt;

use bytes::Bytes;
use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::StreamExt;

use crate::error::Error;
use crate::headers::Headers;
use crate::mux::handle::Stream;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::HttpSettings;
use crate::proto::stream_id::StreamId;

/// A peer-initiated stream: a request on a server session, a pushed
/// response on a client session.
pub struct IncomingStream {
    pub stream: Stream,
    pub events: StreamEvents,
    pub headers: Headers,
    pub end_stream: bool,
}

impl fmt::Debug for IncomingStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IncomingStream")
            .field("stream", &self.stream)
            .field("headers", &self.headers)
            .field("end_stream", &self.end_stream)
            .finish()
    }
}

/// Session-scoped events.
#[derive(Debug)]
pub enum SessionEvent {
    /// The transport is bound; queued commands are now being processed.
    Connected,
    Stream(IncomingStream),
    /// The peer declared new settings (already in effect).
    RemoteSettings(HttpSettings),
    /// The peer acknowledged our settings; they are now current.
    LocalSettingsAcked(HttpSettings),
    GoawayReceived {
        last_stream_id: StreamId,
        raw_error_code: u32,
        debug_data: Bytes,
    },
    /// We sent our GOAWAY; streams above the id will not be serviced.
    ShutdownSent {
        last_stream_id: StreamId,
    },
    PingAcked(u64),
    /// Idle timer expired. Informational; the default policy (graceful
    /// shutdown on servers) has already been applied.
    Timeout,
    /// Session-fatal error; a `Closed` event follows.
    Error(Error),
    /// Terminal. Emitted exactly once, after every stream is destroyed and
    /// the transport is closed.
    Closed,
}

/// Stream-scoped events.
#[derive(Debug)]
pub enum StreamEvent {
    /// The stream id is assigned; deferred operations have been replayed.
    Ready(StreamId),
    /// A header block from the peer: the request/response block, or an
    /// informational (1xx) block preceding it.
    Headers {
        headers: Headers,
        end_stream: bool,
    },
    Data {
        data: Bytes,
        end_stream: bool,
    },
    Trailers(Headers),
    /// Peer reset without local writes pending: a normal early end,
    /// not an error.
    Reset(ErrorCode),
    Timeout,
    /// Stream-fatal error; sibling streams are unaffected.
    Error(Error),
    /// Terminal notification; the id has been released.
    Closed(ErrorCode),
}

/// Receiver side of the session event queue.
pub struct SessionEvents {
    pub(crate) rx: UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Next event; `None` once the session is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.next().await
    }
}

/// Receiver side of one stream's event queue.
pub struct StreamEvents {
    pub(crate) rx: UnboundedReceiver<StreamEvent>,
}

impl StreamEvents {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.next().await
    }
}
