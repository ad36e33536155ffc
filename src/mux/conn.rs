//! The connection core: single authority over one transport connection.
//!
//! All inbound frames and all application commands funnel into `Conn`
//! sequentially; there is no locking because there is no concurrent
//! mutation, only interleaved sequential steps on the driver task.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use futures::channel::mpsc::unbounded;
use futures::channel::mpsc::UnboundedSender;

use crate::codec::queued_write::QueuedWrite;
use crate::error::Error;
use crate::headers::Headers;
use crate::headers::HeaderCodec;
use crate::mux::cell::SessionCell;
use crate::mux::cell::StreamCell;
use crate::mux::closed::ClosedStreams;
use crate::mux::command::Command;
use crate::mux::command::OpenStreamCmd;
use crate::mux::command::PushStreamCmd;
use crate::mux::command::StreamKey;
use crate::mux::command::TrailerProducer;
use crate::mux::conf::Config;
use crate::mux::event::IncomingStream;
use crate::mux::event::SessionEvent;
use crate::mux::event::StreamEvent;
use crate::mux::event::StreamEvents;
use crate::mux::flow::ConnFlow;
use crate::mux::handle::Stream;
use crate::mux::role::Role;
use crate::mux::shutdown::ShutdownOptions;
use crate::mux::shutdown::ShutdownState;
use crate::mux::stream::StreamCommand;
use crate::mux::stream::StreamCore;
use crate::mux::stream_map::MissingStream;
use crate::mux::stream_map::StreamMap;
use crate::mux::stream_queue::DataOrHeaders;
use crate::proto::end_stream::EndStream;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::ConnFrame;
use crate::proto::frame::ContinuationFlag;
use crate::proto::frame::ContinuationFrame;
use crate::proto::frame::DataFlag;
use crate::proto::frame::DataFrame;
use crate::proto::frame::FrameClassified;
use crate::proto::frame::FrameIR;
use crate::proto::frame::GoawayFrame;
use crate::proto::frame::HeadersFlag;
use crate::proto::frame::HeadersFrame;
use crate::proto::frame::HttpFrame;
use crate::proto::frame::HttpSetting;
use crate::proto::frame::HttpSettings;
use crate::proto::frame::PingFrame;
use crate::proto::frame::PriorityFrame;
use crate::proto::frame::PushPromiseFlag;
use crate::proto::frame::PushPromiseFrame;
use crate::proto::frame::RstStreamFrame;
use crate::proto::frame::SettingsFrame;
use crate::proto::frame::SettingsUpdate;
use crate::proto::frame::StreamFrame;
use crate::proto::frame::WindowUpdateFrame;
use crate::proto::stream_id::StreamId;
use crate::proto::stream_id::MAX_STREAM_ID;
use crate::proto::stream_state::StreamState;
use crate::proto::window_size::MAX_WINDOW_SIZE;
use crate::proto::DEFAULT_SETTINGS;

/// Point-in-time view of session state, for inspection and tests.
#[derive(Debug, Clone)]
pub struct SessionStateSnapshot {
    pub shutdown: ShutdownState,
    pub in_window_size: i32,
    pub out_window_size: i32,
    pub pending_settings_ack: u32,
    pub streams: HashMap<StreamId, StreamStateSnapshot>,
}

#[derive(Debug, Clone)]
pub struct StreamStateSnapshot {
    pub state: StreamState,
    pub in_window_size: i32,
    pub out_window_size: i32,
    pub queued_out_data: usize,
}

pub(crate) struct Conn {
    role: Role,
    conf: Config,
    pub streams: StreamMap,
    closed_streams: ClosedStreams,
    pub flow: ConnFlow,
    pub queued_write: QueuedWrite,
    events: UnboundedSender<SessionEvent>,
    cell: Arc<SessionCell>,
    self_tx: UnboundedSender<Command>,
    next_key: Arc<AtomicU32>,
    codec: Box<dyn HeaderCodec>,

    local_settings_acked: HttpSettings,
    pending_local_settings: VecDeque<SettingsUpdate>,
    peer_settings: HttpSettings,

    ping_sent: Option<u64>,
    pub shutdown_state: ShutdownState,
    goaway_sent: Option<(StreamId, ErrorCode)>,
    goaway_received: Option<(StreamId, u32)>,

    last_activity: Instant,
    flushed_bytes: u64,
    flushed_at_last_tick: u64,
    closed_emitted: bool,
}

impl Conn {
    pub fn new(
        role: Role,
        conf: Config,
        codec: Box<dyn HeaderCodec>,
        events: UnboundedSender<SessionEvent>,
        self_tx: UnboundedSender<Command>,
        cell: Arc<SessionCell>,
        next_key: Arc<AtomicU32>,
    ) -> crate::Result<Conn> {
        conf.settings.validate()?;
        Ok(Conn {
            role,
            streams: StreamMap::new(role),
            closed_streams: ClosedStreams::new(),
            flow: ConnFlow::new(DEFAULT_SETTINGS.initial_window_size),
            queued_write: QueuedWrite::new(),
            events,
            cell,
            self_tx,
            next_key,
            codec,
            local_settings_acked: DEFAULT_SETTINGS,
            pending_local_settings: VecDeque::new(),
            peer_settings: DEFAULT_SETTINGS,
            ping_sent: None,
            shutdown_state: ShutdownState::Active,
            goaway_sent: None,
            goaway_received: None,
            last_activity: Instant::now(),
            flushed_bytes: 0,
            flushed_at_last_tick: 0,
            closed_emitted: false,
            conf,
        })
    }

    fn emit(&self, event: SessionEvent) {
        drop(self.events.unbounded_send(event));
    }

    fn queue_frame<F: FrameIR>(&mut self, frame: F) {
        self.queued_write.queue_not_goaway(frame);
    }

    /// The transport is bound: advertise our settings and tell the
    /// application the session is live. The pending-ACK slot for the
    /// initial SETTINGS was taken at session construction.
    pub fn on_bind(&mut self) {
        let settings = self.conf.settings;
        self.pending_local_settings.push_back(settings);
        self.queue_frame(SettingsFrame::from_settings(settings.to_settings()));
        self.emit(SessionEvent::Connected);
    }

    pub fn note_flushed(&mut self, bytes: u64) {
        self.flushed_bytes += bytes;
    }

    /// The loop ends once a GOAWAY has passed in either direction and
    /// every stream has drained, or once destruction began.
    pub fn should_end(&self) -> bool {
        if self.shutdown_state.is_destroying_or_destroyed() {
            return true;
        }
        let goaway = self.goaway_sent.is_some() || self.goaway_received.is_some();
        goaway && self.streams.is_empty()
    }

    /// Peer EOF is the normal end of a connection that exchanged GOAWAY;
    /// anywhere else it aborts the session.
    pub fn eof_expected(&self) -> bool {
        self.goaway_sent.is_some() || self.goaway_received.is_some()
    }

    // ----------------------------------------------------------------
    // Inbound frame dispatch
    // ----------------------------------------------------------------

    pub fn process_frame(&mut self, frame: HttpFrame) -> crate::Result<()> {
        self.last_activity = Instant::now();
        match FrameClassified::from(frame) {
            FrameClassified::Conn(frame) => self.process_conn_frame(frame),
            FrameClassified::Stream(frame) => self.process_stream_frame(frame),
            FrameClassified::Unknown(frame) => {
                // 4.1: unknown frame types must be ignored and discarded
                debug!("ignoring frame of unknown type {}", frame.header().frame_type);
                Ok(())
            }
        }
    }

    fn process_conn_frame(&mut self, frame: ConnFrame) -> crate::Result<()> {
        match frame {
            ConnFrame::Settings(frame) => self.process_settings(frame),
            ConnFrame::Ping(frame) => self.process_ping(frame),
            ConnFrame::Goaway(frame) => self.process_goaway(frame),
            ConnFrame::WindowUpdate(frame) => self.process_conn_window_update(frame),
        }
    }

    fn process_stream_frame(&mut self, frame: StreamFrame) -> crate::Result<()> {
        // 6.8: after sending GOAWAY, ignore frames on peer-initiated
        // streams above the announced last stream id.
        if let Some((last_stream_id, _)) = self.goaway_sent {
            let stream_id = frame.stream_id();
            if !self.role.is_local_init(stream_id) && stream_id > last_stream_id {
                return Ok(());
            }
        }

        if let Some(stream) = self.streams.get_mut(frame.stream_id()) {
            stream.last_activity = Instant::now();
        }

        match frame {
            StreamFrame::Data(frame) => self.process_data_frame(frame),
            StreamFrame::Headers(frame) => self.process_headers_frame(frame),
            StreamFrame::Priority(frame) => self.process_priority_frame(frame),
            StreamFrame::RstStream(frame) => self.process_rst_stream_frame(frame),
            StreamFrame::PushPromise(frame) => self.process_push_promise_frame(frame),
            StreamFrame::WindowUpdate(frame) => self.process_stream_window_update_frame(frame),
            StreamFrame::Continuation(..) => {
                // joined with HEADERS by the framed reader
                Err(Error::ContinuationFrameWithoutHeaders)
            }
        }
    }

    fn process_data_frame(&mut self, frame: DataFrame) -> crate::Result<()> {
        let stream_id = frame.stream_id;
        let flow_len = frame.flow_control_len() as i32;

        // the whole frame counts against the connection window whether or
        // not the stream still exists
        self.flow
            .in_window
            .try_decrease_to_non_negative(flow_len)
            .map_err(|()| Error::CodeError(ErrorCode::FlowControlError))?;

        if self.flow.in_window.size() < (DEFAULT_SETTINGS.initial_window_size / 2) as i32 {
            let increment = DEFAULT_SETTINGS.initial_window_size;
            self.flow
                .in_window
                .try_increase(increment)
                .map_err(|()| Error::WindowSizeOverflow)?;
            self.queue_frame(WindowUpdateFrame::for_connection(increment));
        }

        let stream_increment;
        {
            let stream = match self.streams.get_mut(stream_id) {
                Some(stream) => stream,
                None => {
                    return match self.streams.missing_stream_kind(stream_id) {
                        // 5.1: frames for a stream that has since closed
                        // are a benign race
                        MissingStream::Closed => Ok(()),
                        MissingStream::NeverExisted => {
                            Err(Error::CodeError(ErrorCode::ProtocolError))
                        }
                    };
                }
            };

            stream
                .in_window
                .try_decrease_to_non_negative(flow_len)
                .map_err(|()| Error::CodeError(ErrorCode::FlowControlError))?;

            stream_increment =
                if stream.in_window.size() < (DEFAULT_SETTINGS.initial_window_size / 2) as i32 {
                    let increment = DEFAULT_SETTINGS.initial_window_size;
                    stream
                        .in_window
                        .try_increase(increment)
                        .map_err(|()| Error::WindowSizeOverflow)?;
                    Some(increment)
                } else {
                    None
                };

            let end_stream = frame.is_end_of_stream();
            stream.data_received(frame.data, end_stream);
            if end_stream {
                stream.close_remote();
            }
        }

        if let Some(increment) = stream_increment {
            self.queue_frame(WindowUpdateFrame::for_stream(stream_id, increment));
        }

        self.destroy_stream_if_finished(stream_id);
        Ok(())
    }

    fn process_headers_frame(&mut self, frame: HeadersFrame) -> crate::Result<()> {
        let stream_id = frame.stream_id;
        let end_stream = frame.is_end_of_stream();

        let pairs = self.codec.decode(&frame.header_fragment)?;
        let headers = Headers::from_wire(pairs);

        if self.streams.get_mut(stream_id).is_some() {
            return self.process_headers_on_stream(stream_id, headers, end_stream);
        }

        if self.role.is_local_init(stream_id) {
            // the peer cannot open streams of our parity
            return match self.streams.missing_stream_kind(stream_id) {
                MissingStream::Closed => Ok(()),
                MissingStream::NeverExisted => Err(Error::CodeError(ErrorCode::ProtocolError)),
            };
        }

        if self.closed_streams.contains(stream_id)
            || stream_id <= self.streams.last_peer_stream_id()
        {
            // late frames for a stream we already tore down
            return Ok(());
        }

        self.accept_peer_stream(stream_id, headers, end_stream)
    }

    /// Headers on an existing stream: informational block, the final
    /// block, or trailers.
    fn process_headers_on_stream(
        &mut self,
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    ) -> crate::Result<()> {
        {
            let stream = match self.streams.get_mut(stream_id) {
                Some(stream) => stream,
                None => return Ok(()),
            };

            let status = headers.status_opt();
            let informational =
                !end_stream && matches!(status, Some(status) if (100..200).contains(&status));

            if informational {
                stream.emit(StreamEvent::Headers {
                    headers,
                    end_stream: false,
                });
            } else if !stream.seen_final_headers_in {
                stream.seen_final_headers_in = true;
                stream.emit(StreamEvent::Headers {
                    headers,
                    end_stream,
                });
            } else {
                stream.emit(StreamEvent::Trailers(headers));
            }

            if end_stream {
                stream.close_remote();
            }
        }

        self.destroy_stream_if_finished(stream_id);
        Ok(())
    }

    /// HEADERS for an id the peer just opened.
    fn accept_peer_stream(
        &mut self,
        stream_id: StreamId,
        headers: Headers,
        end_stream: bool,
    ) -> crate::Result<()> {
        if self.role == Role::Client {
            // servers initiate streams with PUSH_PROMISE, never bare HEADERS
            return Err(Error::CodeError(ErrorCode::ProtocolError));
        }
        self.streams.note_peer_stream(stream_id);

        let max_concurrent = self.local_settings_acked.max_concurrent_streams;
        if self.streams.len() as u32 >= max_concurrent {
            debug!("refusing stream {}: too many concurrent streams", stream_id);
            self.closed_streams.add(stream_id);
            self.queue_frame(RstStreamFrame::new(stream_id, ErrorCode::RefusedStream));
            return Ok(());
        }

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let cell = Arc::new(StreamCell::new(false, false));
        {
            let mut cell_state = cell.lock();
            cell_state.id = Some(stream_id);
            if headers.method() == Some("HEAD") {
                // HEAD responses must not carry a payload; the header
                // write forces END_STREAM
                cell_state.head_request = true;
            }
        }

        let (events_tx, events_rx) = unbounded();
        let state = if end_stream {
            StreamState::HalfClosedRemote
        } else {
            StreamState::Open
        };
        let mut stream = StreamCore::new(
            key,
            state,
            self.local_settings_acked.initial_window_size,
            self.peer_settings.initial_window_size,
            events_tx,
            cell.clone(),
        );
        // the request block is delivered with the stream itself; any
        // further header block is trailers
        stream.seen_final_headers_in = true;
        self.streams.insert(stream_id, stream)?;

        let handle = Stream::new(
            key,
            cell,
            self.self_tx.clone(),
            self.role,
            self.cell.clone(),
            self.next_key.clone(),
        );
        self.emit(SessionEvent::Stream(IncomingStream {
            stream: handle,
            events: StreamEvents { rx: events_rx },
            headers,
            end_stream,
        }));
        Ok(())
    }

    fn process_push_promise_frame(&mut self, frame: PushPromiseFrame) -> crate::Result<()> {
        if !self.local_settings_acked.enable_push || self.role == Role::Server {
            return Err(Error::UnexpectedPushPromise);
        }

        let parent_id = frame.stream_id;
        let promised_id = frame.promised_stream_id;

        if self.streams.get_mut(parent_id).is_none() {
            return match self.streams.missing_stream_kind(parent_id) {
                MissingStream::Closed => {
                    // promise raced with parent teardown: refuse it
                    self.streams.note_peer_stream(promised_id);
                    self.closed_streams.add(promised_id);
                    self.queue_frame(RstStreamFrame::new(promised_id, ErrorCode::RefusedStream));
                    Ok(())
                }
                MissingStream::NeverExisted => Err(Error::CodeError(ErrorCode::ProtocolError)),
            };
        }

        let pairs = self.codec.decode(&frame.header_fragment)?;
        let headers = Headers::from_wire(pairs);

        self.streams.note_peer_stream(promised_id);

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        // nothing will ever be written on a pushed stream from this side
        let cell = Arc::new(StreamCell::new(true, true));
        cell.lock().id = Some(promised_id);

        let (events_tx, events_rx) = unbounded();
        let stream = StreamCore::new(
            key,
            StreamState::HalfClosedLocal,
            self.local_settings_acked.initial_window_size,
            self.peer_settings.initial_window_size,
            events_tx,
            cell.clone(),
        );
        self.streams.insert(promised_id, stream)?;

        let handle = Stream::new(
            key,
            cell,
            self.self_tx.clone(),
            self.role,
            self.cell.clone(),
            self.next_key.clone(),
        );
        self.emit(SessionEvent::Stream(IncomingStream {
            stream: handle,
            events: StreamEvents { rx: events_rx },
            headers,
            end_stream: true,
        }));
        Ok(())
    }

    fn process_priority_frame(&mut self, frame: PriorityFrame) -> crate::Result<()> {
        debug!(
            "priority advisement for stream {}: parent {}, weight {}, exclusive {}",
            frame.stream_id, frame.dep.parent, frame.dep.weight, frame.dep.exclusive
        );
        Ok(())
    }

    fn process_rst_stream_frame(&mut self, frame: RstStreamFrame) -> crate::Result<()> {
        let stream_id = frame.stream_id;
        match self.streams.get_mut(stream_id) {
            Some(stream) => {
                stream.rst_received(frame.error_code());
                self.destroy_stream(stream_id, false);
                Ok(())
            }
            None => match self.streams.missing_stream_kind(stream_id) {
                // second RST for an already-reset stream: first one won
                MissingStream::Closed => Ok(()),
                MissingStream::NeverExisted => Err(Error::CodeError(ErrorCode::ProtocolError)),
            },
        }
    }

    fn process_stream_window_update_frame(
        &mut self,
        frame: WindowUpdateFrame,
    ) -> crate::Result<()> {
        let stream_id = frame.stream_id;
        let stream = match self.streams.get_mut(stream_id) {
            Some(stream) => stream,
            None => {
                // 6.9: WINDOW_UPDATE may arrive on half-closed or closed
                // streams and must not be treated as an error
                debug!("WINDOW_UPDATE for unknown stream {}", stream_id);
                return Ok(());
            }
        };

        if stream.out_window.try_increase(frame.increment).is_err() {
            // 6.9.1: stream window overflow resets the stream
            info!("stream {} window overflow", stream_id);
            self.reset_stream_local(stream_id, ErrorCode::FlowControlError);
        }
        Ok(())
    }

    fn process_conn_window_update(&mut self, frame: WindowUpdateFrame) -> crate::Result<()> {
        if self.flow.out_window.try_increase(frame.increment).is_err() {
            // 6.9.1: connection window overflow is a connection error
            return Err(Error::WindowSizeOverflow);
        }
        debug!("conn out window now {}", self.flow.out_window);
        Ok(())
    }

    fn process_ping(&mut self, frame: PingFrame) -> crate::Result<()> {
        if frame.is_ack() {
            match self.ping_sent.take() {
                Some(sent) if sent == frame.opaque_data => {
                    self.emit(SessionEvent::PingAcked(sent));
                    Ok(())
                }
                Some(sent) => Err(Error::PingAckMismatch(sent, frame.opaque_data)),
                None => {
                    warn!("PING ack without PING");
                    Ok(())
                }
            }
        } else {
            self.queue_frame(PingFrame::new_ack(frame.opaque_data));
            Ok(())
        }
    }

    fn process_settings(&mut self, frame: SettingsFrame) -> crate::Result<()> {
        if frame.is_ack() {
            self.process_settings_ack()
        } else {
            self.process_settings_req(frame)
        }
    }

    /// The peer applied our settings; they are now current.
    fn process_settings_ack(&mut self) -> crate::Result<()> {
        let update = match self.pending_local_settings.pop_front() {
            Some(update) => update,
            None => return Err(Error::SettingsAckWithoutSettingsSent),
        };

        let old_initial_window = self.local_settings_acked.initial_window_size;
        update.apply_to(&mut self.local_settings_acked);

        let delta =
            self.local_settings_acked.initial_window_size as i64 - old_initial_window as i64;
        if delta != 0 {
            // receive windows of open streams shift with the new initial
            // window; may legitimately go negative
            for (_, stream) in self.streams.iter_mut() {
                stream.in_window.0 = (stream.in_window.0 as i64 + delta) as i32;
            }
        }

        {
            let mut cell = self.cell.lock();
            cell.pending_ack = cell.pending_ack.saturating_sub(1);
            cell.local_settings = self.local_settings_acked;
        }
        self.cell
            .set_max_frame_size(self.local_settings_acked.max_frame_size);

        self.emit(SessionEvent::LocalSettingsAcked(self.local_settings_acked));
        Ok(())
    }

    /// New settings declared by the peer: apply, adjust stream send
    /// windows on an initial-window change, acknowledge.
    fn process_settings_req(&mut self, frame: SettingsFrame) -> crate::Result<()> {
        for setting in &frame.settings {
            if let HttpSetting::InitialWindowSize(new_size) = *setting {
                // 6.5.2: values above 2^31-1 are a connection
                // FLOW_CONTROL_ERROR
                if new_size > MAX_WINDOW_SIZE {
                    return Err(Error::CodeError(ErrorCode::FlowControlError));
                }

                let old_size = self.peer_settings.initial_window_size;
                let delta = new_size as i64 - old_size as i64;
                if delta != 0 {
                    // 6.9.2: adjust every open stream's send window by the
                    // difference; the result may be negative, which only
                    // blocks sends until updates catch up
                    for (_, stream) in self.streams.iter_mut() {
                        stream.out_window.0 = (stream.out_window.0 as i64 + delta) as i32;
                    }
                }
            }
            self.peer_settings.apply(*setting);
        }

        self.queue_frame(SettingsFrame::new_ack());
        self.cell.lock().remote_settings = self.peer_settings;
        self.emit(SessionEvent::RemoteSettings(self.peer_settings));
        Ok(())
    }

    fn process_goaway(&mut self, frame: GoawayFrame) -> crate::Result<()> {
        // 6.8: a shutdown notice is followed by a second GOAWAY with a
        // lower (final) last stream id; the id may never increase
        if let Some((previous_last, _)) = self.goaway_received {
            if frame.last_stream_id > previous_last {
                return Err(Error::GoawayAfterGoaway);
            }
        }

        let last_stream_id = frame.last_stream_id;
        let raw_error_code = frame.raw_error_code();
        self.goaway_received = Some((last_stream_id, raw_error_code));

        self.emit(SessionEvent::GoawayReceived {
            last_stream_id,
            raw_error_code,
            debug_data: frame.debug_data.clone(),
        });

        // streams the peer will never process die now
        for (stream_id, mut stream) in
            self.streams.remove_local_streams_with_id_gt(last_stream_id)
        {
            debug!("dropping stream {} because of GOAWAY", stream_id);
            {
                let mut cell = stream.cell.lock();
                cell.closed = true;
                cell.aborted = true;
            }
            stream.emit(StreamEvent::Error(Error::GoawayReceived));
            stream.emit(StreamEvent::Closed(ErrorCode::RefusedStream));
            self.closed_streams.add(stream_id);
        }

        // a peer GOAWAY is a shutdown trigger, not merely informational
        if self.shutdown_state == ShutdownState::Active {
            self.process_shutdown(ShutdownOptions {
                graceful: true,
                ..Default::default()
            });
        }
        Ok(())
    }

    // ----------------------------------------------------------------
    // Application commands
    // ----------------------------------------------------------------

    pub fn process_command(&mut self, command: Command) -> crate::Result<()> {
        match command {
            Command::OpenStream(cmd) => self.process_open_stream(cmd),
            Command::PushStream(cmd) => self.process_push_stream(cmd),
            Command::SendData {
                key,
                data,
                end_stream,
            } => {
                self.process_send_data(key, data, end_stream);
                Ok(())
            }
            Command::SendHeaders {
                key,
                headers,
                end_stream,
                trailers,
            } => {
                self.process_send_headers(key, headers, end_stream, trailers);
                Ok(())
            }
            Command::SendInformational { key, headers } => {
                if let Some(stream) = self.stream_for_key(key) {
                    stream.outgoing.push_back(DataOrHeaders::Headers(headers));
                }
                Ok(())
            }
            Command::RstStream { key, code } => {
                self.process_rst_command(key, code);
                Ok(())
            }
            Command::Priority { key, dep } => {
                self.process_priority_command(key, dep);
                Ok(())
            }
            Command::DestroyStream { key, errored } => {
                if let Some(stream_id) = self.streams.id_for_key(key) {
                    self.destroy_stream(stream_id, errored);
                }
                Ok(())
            }
            Command::UpdateSettings(update) => {
                self.pending_local_settings.push_back(update);
                self.queue_frame(SettingsFrame::from_settings(update.to_settings()));
                Ok(())
            }
            Command::Ping(opaque_data) => {
                self.ping_sent = Some(opaque_data);
                self.queue_frame(PingFrame::new(opaque_data));
                Ok(())
            }
            Command::Shutdown(options) => {
                self.process_shutdown(options);
                Ok(())
            }
            Command::FinishGracefulShutdown(options) => {
                if self.shutdown_state == ShutdownState::ShuttingDown {
                    self.do_shutdown(options);
                }
                Ok(())
            }
            Command::Destroy => {
                self.shutdown_state = ShutdownState::Destroying;
                self.cell.lock().destroying = true;
                Ok(())
            }
            Command::DumpState(sender) => {
                drop(sender.send(self.snapshot()));
                Ok(())
            }
        }
    }

    fn stream_for_key(&mut self, key: StreamKey) -> Option<&mut StreamCore> {
        let stream_id = self.streams.id_for_key(key)?;
        self.streams.get_mut(stream_id)
    }

    fn process_open_stream(&mut self, cmd: OpenStreamCmd) -> crate::Result<()> {
        let OpenStreamCmd {
            key,
            headers,
            end_stream,
            dep,
            trailers,
            events,
            cell,
        } = cmd;

        let refuse = |reason: Error| {
            let mut cell_state = cell.lock();
            cell_state.closed = true;
            drop(cell_state);
            drop(events.unbounded_send(StreamEvent::Error(reason)));
            drop(events.unbounded_send(StreamEvent::Closed(ErrorCode::RefusedStream)));
        };

        if self.shutdown_state != ShutdownState::Active || self.goaway_received.is_some() {
            refuse(Error::GoawayReceived);
            return Ok(());
        }

        if self.streams.len() as u32 >= self.peer_settings.max_concurrent_streams {
            refuse(Error::TooManyStreams);
            return Ok(());
        }

        // id space exhaustion is fatal to the whole session
        let stream_id = self.streams.alloc_local()?;

        if let Some(dep) = dep {
            if dep.parent == stream_id {
                // scoped to this stream; the session is unaffected
                self.closed_streams.add(stream_id);
                refuse(Error::StreamSelfDependency);
                return Ok(());
            }
        }

        cell.lock().id = Some(stream_id);
        drop(events.unbounded_send(StreamEvent::Ready(stream_id)));

        let mut stream = StreamCore::new(
            key,
            StreamState::Open,
            self.local_settings_acked.initial_window_size,
            self.peer_settings.initial_window_size,
            events,
            cell,
        );
        stream.pending_dep = dep;
        stream.trailers = trailers;
        stream.outgoing.push_back(DataOrHeaders::Headers(headers));
        if end_stream {
            stream.outgoing.close(ErrorCode::NoError);
        }
        self.streams.insert(stream_id, stream)?;

        debug!("stream {} initialized", stream_id);
        Ok(())
    }

    fn process_push_stream(&mut self, cmd: PushStreamCmd) -> crate::Result<()> {
        let PushStreamCmd {
            key,
            parent,
            headers,
            events,
            cell,
        } = cmd;

        let refuse = |reason: Error| {
            let mut cell_state = cell.lock();
            cell_state.closed = true;
            drop(cell_state);
            drop(events.unbounded_send(StreamEvent::Error(reason)));
            drop(events.unbounded_send(StreamEvent::Closed(ErrorCode::RefusedStream)));
        };

        // push must ride on a live parent
        let parent_id = match self.streams.id_for_key(parent) {
            Some(id) => id,
            None => {
                refuse(Error::InvalidStream);
                return Ok(());
            }
        };

        if !self.peer_settings.enable_push {
            refuse(Error::PushDisabled);
            return Ok(());
        }
        if self.shutdown_state != ShutdownState::Active || self.goaway_received.is_some() {
            refuse(Error::GoawayReceived);
            return Ok(());
        }

        let promised_id = self.streams.alloc_local()?;

        let pairs = match headers.to_wire() {
            Ok(pairs) => pairs,
            Err(e) => {
                refuse(e);
                return Ok(());
            }
        };
        let fragment = self.codec.encode(&pairs)?;
        let mut promise = PushPromiseFrame::new(parent_id, promised_id, fragment);
        promise.set_flag(PushPromiseFlag::EndHeaders);
        self.queue_frame(promise);

        cell.lock().id = Some(promised_id);
        drop(events.unbounded_send(StreamEvent::Ready(promised_id)));

        // the client never sends on a pushed stream
        let mut stream = StreamCore::new(
            key,
            StreamState::HalfClosedRemote,
            self.local_settings_acked.initial_window_size,
            self.peer_settings.initial_window_size,
            events,
            cell,
        );
        stream.seen_final_headers_in = true;
        self.streams.insert(promised_id, stream)?;
        debug!("push stream {} reserved on {}", promised_id, parent_id);
        Ok(())
    }

    fn process_send_data(&mut self, key: StreamKey, data: Bytes, end_stream: bool) {
        let stream = match self.stream_for_key(key) {
            Some(stream) => stream,
            None => return,
        };

        if !data.is_empty() {
            stream.outgoing.push_back(DataOrHeaders::Data(data));
        }
        if end_stream {
            if let Some(producer) = stream.trailers.take() {
                let trailers = producer();
                stream.outgoing.push_back(DataOrHeaders::Headers(trailers));
            }
            stream.outgoing.close(ErrorCode::NoError);
        }
    }

    fn process_send_headers(
        &mut self,
        key: StreamKey,
        headers: Headers,
        end_stream: bool,
        trailers: Option<TrailerProducer>,
    ) {
        let stream = match self.stream_for_key(key) {
            Some(stream) => stream,
            None => return,
        };

        stream.outgoing.push_back(DataOrHeaders::Headers(headers));
        if end_stream {
            stream.outgoing.close(ErrorCode::NoError);
        } else {
            stream.trailers = trailers;
        }
    }

    fn process_rst_command(&mut self, key: StreamKey, code: ErrorCode) {
        let stream_id = match self.streams.id_for_key(key) {
            Some(id) => id,
            None => return,
        };
        self.reset_stream_local(stream_id, code);
    }

    /// Reset a stream from this side: the RST goes out now, buffered
    /// writes are dropped, the stream is torn down.
    fn reset_stream_local(&mut self, stream_id: StreamId, code: ErrorCode) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            {
                let mut cell = stream.cell.lock();
                if cell.rst.is_none() {
                    cell.rst = Some(code);
                }
            }
            stream.outgoing.clear();
            stream.state = StreamState::Closed;
        } else {
            return;
        }
        self.queue_frame(RstStreamFrame::new(stream_id, code));
        self.destroy_stream(stream_id, false);
    }

    fn process_priority_command(&mut self, key: StreamKey, dep: crate::proto::frame::StreamDependency) {
        let stream_id = match self.streams.id_for_key(key) {
            Some(id) => id,
            None => return,
        };
        if dep.parent == stream_id {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.emit(StreamEvent::Error(Error::StreamSelfDependency));
            }
            return;
        }
        self.queue_frame(PriorityFrame::new(stream_id, dep));
    }

    // ----------------------------------------------------------------
    // Shutdown and teardown
    // ----------------------------------------------------------------

    fn process_shutdown(&mut self, options: ShutdownOptions) {
        match self.shutdown_state {
            ShutdownState::Active => {}
            // already on its way down
            _ => return,
        }

        if self.role == Role::Server && options.graceful {
            // announce first so in-flight responses on open streams can
            // still be written, then send the real GOAWAY next turn
            debug!("graceful shutdown: sending notice");
            self.queue_frame(GoawayFrame::new(MAX_STREAM_ID, ErrorCode::NoError));
            self.shutdown_state = ShutdownState::ShuttingDown;
            drop(
                self.self_tx
                    .unbounded_send(Command::FinishGracefulShutdown(options)),
            );
        } else {
            self.do_shutdown(options);
        }
    }

    fn do_shutdown(&mut self, options: ShutdownOptions) {
        let last_stream_id = options
            .last_stream_id
            .unwrap_or_else(|| self.streams.last_peer_stream_id());
        let code = options.error_code;

        debug!("sending GOAWAY, last stream {}, code {:?}", last_stream_id, code);
        let frame = GoawayFrame::with_debug_data(last_stream_id, code, options.opaque_data);
        if code == ErrorCode::NoError {
            // a clean GOAWAY still lets streams at or below the announced
            // id finish; only an error GOAWAY terminates the write queue
            self.queue_frame(frame);
        } else {
            self.queued_write.queue_goaway(frame);
        }
        self.goaway_sent = Some((last_stream_id, code));
        self.shutdown_state = ShutdownState::Shutdown;
        self.emit(SessionEvent::ShutdownSent { last_stream_id });
    }

    /// Queue a terminal GOAWAY for a session-fatal error.
    pub fn terminal_goaway(&mut self, code: ErrorCode) {
        let last_stream_id = self.streams.last_peer_stream_id();
        self.queued_write
            .queue_goaway(GoawayFrame::new(last_stream_id, code));
        self.goaway_sent = Some((last_stream_id, code));
    }

    /// Tear everything down. Idempotent; exactly one `Closed` event is
    /// emitted no matter how many error paths fired.
    pub fn destroy(&mut self, error: Option<Error>) {
        if self.closed_emitted {
            return;
        }
        self.shutdown_state = ShutdownState::Destroying;
        self.cell.lock().destroying = true;

        if let Some(error) = error {
            self.emit(SessionEvent::Error(error));
        }

        for (stream_id, mut stream) in self.streams.drain() {
            debug!("destroying stream {}", stream_id);
            let code = {
                let cell = stream.cell.lock();
                cell.rst.unwrap_or(ErrorCode::Cancel)
            };
            stream.conn_died(code);
        }

        self.shutdown_state = ShutdownState::Destroyed;
        {
            let mut cell = self.cell.lock();
            cell.destroying = false;
            cell.destroyed = true;
        }
        self.emit(SessionEvent::Closed);
        self.closed_emitted = true;
    }

    /// Final step of one stream's life: make sure an RST went out unless
    /// the stream closed cleanly, release the id, notify the application.
    fn destroy_stream(&mut self, stream_id: StreamId, errored: bool) {
        let stream = match self.streams.release(stream_id) {
            Some(stream) => stream,
            None => return,
        };

        let code = {
            let mut cell = stream.cell.lock();
            let code = match cell.rst {
                Some(code) => code,
                None => {
                    let code = if errored {
                        ErrorCode::InternalError
                    } else {
                        ErrorCode::NoError
                    };
                    if !stream.state.is_closed() {
                        cell.rst = Some(code);
                        self.queued_write
                            .queue_not_goaway(RstStreamFrame::new(stream_id, code));
                    }
                    code
                }
            };
            cell.closed = true;
            code
        };

        stream.emit(StreamEvent::Closed(code));
        self.closed_streams.add(stream_id);
        debug!("stream {} destroyed", stream_id);
    }

    fn destroy_stream_if_finished(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get(stream_id) {
            if stream.finished() {
                self.destroy_stream(stream_id, false);
            }
        }
    }

    // ----------------------------------------------------------------
    // Outgoing data
    // ----------------------------------------------------------------

    fn has_write_buffer_capacity(&self) -> bool {
        self.queued_write.queued_bytes_len() < 0x8000
    }

    /// Move flushable stream output into the write queue, interleaving
    /// ready streams subject to flow control.
    pub fn buffer_outg(&mut self) -> crate::Result<()> {
        for stream_id in self.streams.writable_stream_ids() {
            loop {
                if !self.has_write_buffer_capacity() {
                    return Ok(());
                }

                let part = match self.streams.get_mut(stream_id) {
                    Some(stream) => stream.pop_outg(&mut self.flow),
                    None => break,
                };

                match part {
                    Some(part) => self.write_part(stream_id, part)?,
                    None => break,
                }
            }
            self.destroy_stream_if_finished(stream_id);
        }
        Ok(())
    }

    fn write_part(&mut self, stream_id: StreamId, part: StreamCommand) -> crate::Result<()> {
        match part {
            StreamCommand::Data(data, end_stream) => {
                self.write_part_data(stream_id, data, end_stream);
                Ok(())
            }
            StreamCommand::Headers(headers, end_stream, dep) => {
                self.write_part_headers(stream_id, headers, end_stream, dep)
            }
            StreamCommand::Rst(code) => {
                self.queue_frame(RstStreamFrame::new(stream_id, code));
                Ok(())
            }
        }
    }

    fn write_part_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: EndStream) {
        let max_frame_size = self.peer_settings.max_frame_size as usize;

        // a requested end of stream is carried by at least one frame
        if end_stream == EndStream::Yes && data.is_empty() {
            let mut frame = DataFrame::with_data(stream_id, Bytes::new());
            frame.set_flag(DataFlag::EndStream);
            self.queue_frame(frame);
            return;
        }

        let mut pos = 0;
        while pos < data.len() {
            let end = std::cmp::min(data.len(), pos + max_frame_size);

            let mut frame = DataFrame::with_data(stream_id, data.slice(pos..end));
            if end == data.len() && end_stream == EndStream::Yes {
                frame.set_flag(DataFlag::EndStream);
            }
            self.queue_frame(frame);

            pos = end;
        }
    }

    fn write_part_headers(
        &mut self,
        stream_id: StreamId,
        headers: Headers,
        end_stream: EndStream,
        dep: Option<crate::proto::frame::StreamDependency>,
    ) -> crate::Result<()> {
        let pairs = match headers.to_wire() {
            Ok(pairs) => pairs,
            Err(e) => {
                // validation failures are scoped to the stream
                if let Some(stream) = self.streams.get_mut(stream_id) {
                    stream.emit(StreamEvent::Error(e));
                }
                self.reset_stream_local(stream_id, ErrorCode::InternalError);
                return Ok(());
            }
        };

        // a codec failure poisons the compression context: session-fatal
        let fragment = self.codec.encode(&pairs)?;

        let max_frame_size = self.peer_settings.max_frame_size as usize;
        let mut pos = 0;
        let mut first = true;
        while pos < fragment.len() || first {
            let end = std::cmp::min(fragment.len(), pos + max_frame_size);
            let chunk = fragment.slice(pos..end);
            let last = end == fragment.len();

            if first {
                let mut frame = HeadersFrame::new(chunk, stream_id);
                frame.stream_dep = dep;
                if end_stream == EndStream::Yes {
                    frame.set_flag(HeadersFlag::EndStream);
                }
                if last {
                    frame.set_flag(HeadersFlag::EndHeaders);
                }
                self.queue_frame(frame);
                first = false;
            } else {
                let mut frame = ContinuationFrame::new(chunk, stream_id);
                if last {
                    frame.set_flag(ContinuationFlag::EndHeaders);
                }
                self.queue_frame(frame);
            }

            pos = end;
            if last {
                break;
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------------
    // Timers
    // ----------------------------------------------------------------

    /// Idle-timer sweep. Activity on a scope resets its timer; a write
    /// that is stalled but making progress counts as activity, a write
    /// that is queued and going nowhere does not.
    pub fn on_tick(&mut self) {
        let now = Instant::now();

        if let Some(timeout) = self.conf.session_timeout {
            if now.duration_since(self.last_activity) >= timeout {
                let write_progressing = self.queued_write.queued_bytes_len() > 0
                    && self.flushed_bytes != self.flushed_at_last_tick;
                self.flushed_at_last_tick = self.flushed_bytes;

                if write_progressing {
                    self.last_activity = now;
                } else {
                    debug!("session idle timeout");
                    self.last_activity = now;
                    self.emit(SessionEvent::Timeout);
                    if self.role == Role::Server && self.shutdown_state == ShutdownState::Active {
                        self.process_shutdown(ShutdownOptions {
                            graceful: true,
                            ..Default::default()
                        });
                    }
                }
            }
        }

        if let Some(timeout) = self.conf.stream_timeout {
            for (_, stream) in self.streams.iter_mut() {
                if now.duration_since(stream.last_activity) >= timeout {
                    stream.last_activity = now;
                    stream.emit(StreamEvent::Timeout);
                }
            }
        }
    }

    /// How long the driver may sleep before the next timer could fire.
    pub fn next_wakeup(&self) -> Duration {
        let mut wakeup = Duration::from_secs(3600);
        let now = Instant::now();

        if let Some(timeout) = self.conf.session_timeout {
            let elapsed = now.duration_since(self.last_activity);
            wakeup = std::cmp::min(wakeup, timeout.saturating_sub(elapsed));
        }
        if let Some(timeout) = self.conf.stream_timeout {
            for stream_id in self.streams.stream_ids() {
                if let Some(stream) = self.streams.get(stream_id) {
                    let elapsed = now.duration_since(stream.last_activity);
                    wakeup = std::cmp::min(wakeup, timeout.saturating_sub(elapsed));
                }
            }
        }
        std::cmp::max(wakeup, Duration::from_millis(10))
    }

    pub fn snapshot(&self) -> SessionStateSnapshot {
        let mut streams = HashMap::new();
        for stream_id in self.streams.stream_ids() {
            if let Some(stream) = self.streams.get(stream_id) {
                streams.insert(
                    stream_id,
                    StreamStateSnapshot {
                        state: stream.state,
                        in_window_size: stream.in_window.size(),
                        out_window_size: stream.out_window.size(),
                        queued_out_data: stream.outgoing.data_size(),
                    },
                );
            }
        }
        SessionStateSnapshot {
            shutdown: self.shutdown_state,
            in_window_size: self.flow.in_window.size(),
            out_window_size: self.flow.out_window.size(),
            pending_settings_ack: self.cell.lock().pending_ack,
            streams,
        }
    }
}
