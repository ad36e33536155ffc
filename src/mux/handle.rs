//! Application-facing handles.
//!
//! A [`Session`] or [`Stream`] handle never touches connection state
//! directly: operations validate synchronously against the shared cells,
//! then marshal a command into the connection task. The transport itself is
//! owned by that task and is not reachable from here at all.

use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::mpsc::unbounded;
use futures::channel::mpsc::UnboundedSender;
use futures::channel::oneshot;

use crate::error::Error;
use crate::headers;
use crate::headers::Headers;
use crate::mux::cell::SessionCell;
use crate::mux::cell::StreamCell;
use crate::mux::command::Command;
use crate::mux::command::OpenStreamCmd;
use crate::mux::command::PushStreamCmd;
use crate::mux::command::StreamKey;
use crate::mux::command::TrailerProducer;
use crate::mux::conn::SessionStateSnapshot;
use crate::mux::event::StreamEvents;
use crate::mux::role::Role;
use crate::mux::shutdown::ShutdownOptions;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::HttpSettings;
use crate::proto::frame::SettingsUpdate;
use crate::proto::frame::StreamDependency;
use crate::proto::frame::DEFAULT_WEIGHT;
use crate::proto::stream_id::StreamId;

/// Options for [`Session::open_stream`] and [`Stream::push`].
#[derive(Default)]
pub struct StreamOptions {
    /// Close the write side with the header block. Defaults to true for
    /// methods whose requests carry no payload (GET, HEAD, DELETE).
    pub end_stream: Option<bool>,
    pub parent: Option<StreamId>,
    pub weight: Option<u8>,
    pub exclusive: bool,
    /// Invoked once when the write side finishes, producing the trailing
    /// header block.
    pub get_trailers: Option<TrailerProducer>,
}

/// Options for [`Stream::respond`].
#[derive(Default)]
pub struct RespondOptions {
    pub end_stream: bool,
    pub get_trailers: Option<TrailerProducer>,
}

/// Handle to one HTTP/2 session. Cheap to clone; all clones address the
/// same connection.
pub struct Session {
    pub(crate) tx: UnboundedSender<Command>,
    pub(crate) cell: Arc<SessionCell>,
    pub(crate) role: Role,
    pub(crate) next_key: Arc<AtomicU32>,
    /// `authority` and `scheme` fill in request pseudo-header defaults on
    /// client sessions.
    pub(crate) authority: Option<String>,
    pub(crate) scheme: String,
}

impl Clone for Session {
    fn clone(&self) -> Session {
        Session {
            tx: self.tx.clone(),
            cell: self.cell.clone(),
            role: self.role,
            next_key: self.next_key.clone(),
            authority: self.authority.clone(),
            scheme: self.scheme.clone(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session").field("role", &self.role).finish()
    }
}

macro_rules! send_command {
    ($self:expr, $command:expr) => {
        $self.tx.unbounded_send($command).map_err(|_| Error::ConnDied)
    };
}

impl Session {
    pub fn role(&self) -> Role {
        self.role
    }

    fn check_alive(&self) -> crate::Result<()> {
        let cell = self.cell.lock();
        if cell.destroyed || cell.destroying {
            return Err(Error::InvalidSession);
        }
        Ok(())
    }

    /// Open a request stream (client sessions only).
    ///
    /// The stream handle is returned immediately and is usable before the
    /// stream id exists; writes issued in the meantime are replayed in
    /// order once the id is assigned. Header validation happens here,
    /// synchronously, before anything is placed on the wire.
    pub fn open_stream(
        &self,
        mut headers: Headers,
        options: StreamOptions,
    ) -> crate::Result<(Stream, StreamEvents)> {
        if self.role != Role::Client {
            return Err(Error::WrongRole("client"));
        }
        self.check_alive()?;

        if headers.method().is_none() {
            headers.add(":method", "GET");
        }
        let connect = headers.method() == Some("CONNECT");
        if !connect {
            if headers.scheme().is_none() {
                headers.add(":scheme", self.scheme.clone());
            }
            if headers.authority().is_none() {
                if let Some(authority) = &self.authority {
                    headers.add(":authority", authority.clone());
                }
            }
            if headers.path().is_none() {
                headers.add(":path", "/");
            }
        }

        headers.validate_request()?;
        headers.to_wire()?;

        let end_stream = options.end_stream.unwrap_or_else(|| {
            headers
                .method()
                .map(headers::method_has_no_payload)
                .unwrap_or(false)
        });

        let dep = match options.parent {
            Some(parent) => Some(StreamDependency::new(
                parent,
                options.weight.unwrap_or(DEFAULT_WEIGHT),
                options.exclusive,
            )),
            None => None,
        };

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        // the request header block is the final block of this direction
        let cell = Arc::new(StreamCell::new(true, end_stream));
        let (events_tx, events_rx) = unbounded();

        let stream = Stream {
            key,
            cell: cell.clone(),
            tx: self.tx.clone(),
            role: self.role,
            session_cell: self.cell.clone(),
            next_key: self.next_key.clone(),
        };

        send_command!(
            self,
            Command::OpenStream(OpenStreamCmd {
                key,
                headers,
                end_stream,
                dep,
                trailers: options.get_trailers,
                events: events_tx,
                cell,
            })
        )?;

        Ok((stream, StreamEvents { rx: events_rx }))
    }

    /// Queue a SETTINGS change. Field ranges are validated here; the
    /// change becomes current once the peer acknowledges it.
    pub fn update_settings(&self, update: SettingsUpdate) -> crate::Result<()> {
        update.validate()?;
        {
            let mut cell = self.cell.lock();
            if cell.destroyed || cell.destroying {
                return Err(Error::InvalidSession);
            }
            if cell.pending_ack >= self.cell.max_pending_ack {
                return Err(Error::TooManyPendingSettings(cell.pending_ack));
            }
            cell.pending_ack += 1;
        }
        send_command!(self, Command::UpdateSettings(update))
    }

    /// Send a PING; the ack surfaces as [`SessionEvent::PingAcked`] with
    /// the returned opaque payload.
    ///
    /// [`SessionEvent::PingAcked`]: crate::SessionEvent::PingAcked
    pub fn ping(&self) -> crate::Result<u64> {
        self.check_alive()?;
        let opaque_data = rand::random::<u64>();
        send_command!(self, Command::Ping(opaque_data))?;
        Ok(opaque_data)
    }

    /// Begin shutdown. Graceful shutdown (servers) first announces, then
    /// sends the real GOAWAY one loop turn later.
    pub fn shutdown(&self, options: ShutdownOptions) -> crate::Result<()> {
        self.check_alive()?;
        send_command!(self, Command::Shutdown(options))
    }

    /// Destroy the session: every stream is torn down, the transport is
    /// closed, and a single `Closed` event is emitted. Safe to call any
    /// number of times.
    pub fn destroy(&self) {
        drop(self.tx.unbounded_send(Command::Destroy));
    }

    /// Local settings currently in effect (i.e. acknowledged by the peer).
    pub fn local_settings(&self) -> HttpSettings {
        self.cell.lock().local_settings
    }

    /// The peer's latest declared settings.
    pub fn remote_settings(&self) -> HttpSettings {
        self.cell.lock().remote_settings
    }

    pub fn pending_settings_ack(&self) -> bool {
        self.cell.lock().pending_ack > 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.cell.lock().destroyed
    }

    /// Snapshot of current windows, stream states and shutdown phase.
    pub async fn state(&self) -> crate::Result<SessionStateSnapshot> {
        let (tx, rx) = oneshot::channel();
        send_command!(self, Command::DumpState(tx))?;
        rx.await.map_err(|_| Error::ConnDied)
    }
}

/// Handle to one logical stream multiplexed over a session.
pub struct Stream {
    pub(crate) key: StreamKey,
    pub(crate) cell: Arc<StreamCell>,
    pub(crate) tx: UnboundedSender<Command>,
    pub(crate) role: Role,
    pub(crate) session_cell: Arc<SessionCell>,
    pub(crate) next_key: Arc<AtomicU32>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stream").field("id", &self.id()).finish()
    }
}

impl Stream {
    pub(crate) fn new(
        key: StreamKey,
        cell: Arc<StreamCell>,
        tx: UnboundedSender<Command>,
        role: Role,
        session_cell: Arc<SessionCell>,
        next_key: Arc<AtomicU32>,
    ) -> Stream {
        Stream {
            key,
            cell,
            tx,
            role,
            session_cell,
            next_key,
        }
    }

    /// The stream id, `None` until assignment.
    pub fn id(&self) -> Option<StreamId> {
        self.cell.lock().id
    }

    /// Whether this stream was torn down before a normal finish.
    pub fn aborted(&self) -> bool {
        self.cell.lock().aborted
    }

    /// The reset code, if the stream was reset (locally or by the peer).
    pub fn rst_code(&self) -> Option<ErrorCode> {
        self.cell.lock().rst
    }

    /// True once the final header block of the local direction went out.
    pub fn headers_sent(&self) -> bool {
        self.cell.lock().headers_sent
    }

    /// Whether the peer accepts push streams right now.
    pub fn push_allowed(&self) -> bool {
        self.session_cell.lock().remote_settings.enable_push
    }

    /// Write a chunk. On a server stream with no response headers sent
    /// yet, a default `200` response header block is sent first.
    pub fn send_data(&self, data: Bytes, end_stream: bool) -> crate::Result<()> {
        {
            let mut cell = self.cell.lock();
            if cell.closed || cell.rst.is_some() {
                return Err(Error::InvalidStream);
            }
            if cell.local_ended {
                return Err(Error::StreamAlreadyClosed);
            }
            if end_stream {
                cell.local_ended = true;
            }
        }

        if self.role == Role::Server && !self.cell.lock().headers_sent {
            let mut headers = Headers::new();
            headers.add(":status", "200");
            self.respond(headers, RespondOptions::default())?;
        }

        self.tx
            .unbounded_send(Command::SendData {
                key: self.key,
                data,
                end_stream,
            })
            .map_err(|_| Error::ConnDied)
    }

    /// Close the write side without more data.
    pub fn end(&self) -> crate::Result<()> {
        self.send_data(Bytes::new(), true)
    }

    /// Send the final response header block (server streams only).
    ///
    /// Exactly one final block may be sent per direction; the status must
    /// parse into `[200, 599]`. Responses that cannot carry a payload
    /// (204/205/304, or any response to a HEAD request) force END_STREAM.
    pub fn respond(&self, headers: Headers, options: RespondOptions) -> crate::Result<()> {
        if self.role != Role::Server {
            return Err(Error::WrongRole("server"));
        }

        headers.validate_response()?;
        let status = headers.status()?;
        if !headers::is_final_status(status) {
            return Err(Error::InvalidStatus(status));
        }
        headers.to_wire()?;

        let end_stream;
        {
            let mut cell = self.cell.lock();
            if cell.closed || cell.rst.is_some() {
                return Err(Error::InvalidStream);
            }
            if cell.headers_sent {
                return Err(Error::HeadersAlreadySent);
            }
            end_stream = options.end_stream
                || headers::status_forbids_payload(status)
                || cell.head_request;
            cell.headers_sent = true;
            if end_stream {
                cell.local_ended = true;
            }
        }

        let trailers = if end_stream {
            None
        } else {
            options.get_trailers
        };

        self.tx
            .unbounded_send(Command::SendHeaders {
                key: self.key,
                headers,
                end_stream,
                trailers,
            })
            .map_err(|_| Error::ConnDied)
    }

    /// Send an informational (1xx) header block. Any number may precede
    /// the final block; 101 is never valid in HTTP/2.
    pub fn send_informational(&self, headers: Headers) -> crate::Result<()> {
        if self.role != Role::Server {
            return Err(Error::WrongRole("server"));
        }

        headers.validate_response()?;
        let status = headers.status()?;
        headers::validate_informational_status(status)?;
        headers.to_wire()?;

        {
            let cell = self.cell.lock();
            if cell.closed || cell.rst.is_some() {
                return Err(Error::InvalidStream);
            }
            if cell.headers_sent {
                return Err(Error::HeadersAlreadySent);
            }
        }

        self.tx
            .unbounded_send(Command::SendInformational {
                key: self.key,
                headers,
            })
            .map_err(|_| Error::ConnDied)
    }

    /// Promise a pushed stream answering `headers` (server streams only).
    /// Fails synchronously when the peer has disabled push.
    pub fn push(&self, mut headers: Headers) -> crate::Result<(Stream, StreamEvents)> {
        if self.role != Role::Server {
            return Err(Error::WrongRole("server"));
        }
        if self.cell.lock().closed {
            return Err(Error::InvalidStream);
        }
        if !self.push_allowed() {
            return Err(Error::PushDisabled);
        }

        if headers.method().is_none() {
            headers.add(":method", "GET");
        }
        if headers.path().is_none() {
            headers.add(":path", "/");
        }
        headers.validate_request()?;
        headers.to_wire()?;

        let head_request = headers.method() == Some("HEAD");

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(StreamCell::new(false, false));
        if head_request {
            cell.lock().head_request = true;
        }
        let (events_tx, events_rx) = unbounded();

        let stream = Stream {
            key,
            cell: cell.clone(),
            tx: self.tx.clone(),
            role: self.role,
            session_cell: self.session_cell.clone(),
            next_key: self.next_key.clone(),
        };

        self.tx
            .unbounded_send(Command::PushStream(PushStreamCmd {
                key,
                parent: self.key,
                headers,
                events: events_tx,
                cell,
            }))
            .map_err(|_| Error::ConnDied)?;

        Ok((stream, StreamEvents { rx: events_rx }))
    }

    /// Reset the stream. Idempotent: a second call skips the frame and
    /// proceeds straight to destruction. The stream is marked reset
    /// locally immediately, even while the frame write is still queued.
    pub fn rst_stream(&self, code: ErrorCode) -> crate::Result<()> {
        let already_reset = {
            let mut cell = self.cell.lock();
            if cell.closed {
                return Err(Error::InvalidStream);
            }
            match cell.rst {
                Some(..) => true,
                None => {
                    cell.rst = Some(code);
                    false
                }
            }
        };

        let command = if already_reset {
            Command::DestroyStream {
                key: self.key,
                errored: false,
            }
        } else {
            Command::RstStream {
                key: self.key,
                code,
            }
        };
        self.tx.unbounded_send(command).map_err(|_| Error::ConnDied)
    }

    /// Re-prioritize the stream. A stream cannot depend on itself; that
    /// is caught here once the id is known, and in the session otherwise.
    pub fn priority(
        &self,
        parent: StreamId,
        weight: Option<u8>,
        exclusive: bool,
    ) -> crate::Result<()> {
        {
            let cell = self.cell.lock();
            if cell.closed {
                return Err(Error::InvalidStream);
            }
            if cell.id == Some(parent) {
                return Err(Error::StreamSelfDependency);
            }
        }
        self.tx
            .unbounded_send(Command::Priority {
                key: self.key,
                dep: StreamDependency::new(parent, weight.unwrap_or(DEFAULT_WEIGHT), exclusive),
            })
            .map_err(|_| Error::ConnDied)
    }

    /// Destroy the stream. An RST is sent first if the stream did not
    /// close cleanly (`INTERNAL_ERROR` when `errored`, `NO_ERROR`
    /// otherwise). Subsequent calls are no-ops.
    pub fn destroy(&self, errored: bool) {
        drop(self.tx.unbounded_send(Command::DestroyStream {
            key: self.key,
            errored,
        }));
    }
}
