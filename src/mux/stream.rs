//! Per-stream state: the combined half-close state machine, the outgoing
//! queue, flow-control windows and the event channel to the application.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::channel::mpsc::UnboundedSender;

use crate::error::Error;
use crate::headers::Headers;
use crate::mux::cell::StreamCell;
use crate::mux::command::StreamKey;
use crate::mux::command::TrailerProducer;
use crate::mux::event::StreamEvent;
use crate::mux::flow::ConnFlow;
use crate::mux::stream_queue::DataOrHeaders;
use crate::mux::stream_queue::StreamQueue;
use crate::proto::end_stream::EndStream;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::StreamDependency;
use crate::proto::stream_state::StreamState;
use crate::proto::window_size::WindowSize;

/// One flushable unit popped off a stream, turned into frames by the
/// connection write path.
pub(crate) enum StreamCommand {
    Headers(Headers, EndStream, Option<StreamDependency>),
    Data(Bytes, EndStream),
    Rst(ErrorCode),
}

pub(crate) struct StreamCore {
    pub key: StreamKey,
    pub state: StreamState,
    pub out_window: WindowSize,
    pub in_window: WindowSize,
    pub outgoing: StreamQueue,
    pub events: UnboundedSender<StreamEvent>,
    pub cell: Arc<StreamCell>,
    pub trailers: Option<TrailerProducer>,
    /// Priority attached to the first HEADERS frame popped.
    pub pending_dep: Option<StreamDependency>,
    /// The peer's final (non-informational) header block has arrived;
    /// later blocks are trailers.
    pub seen_final_headers_in: bool,
    pub last_activity: Instant,
}

impl StreamCore {
    pub fn new(
        key: StreamKey,
        state: StreamState,
        in_window: u32,
        out_window: u32,
        events: UnboundedSender<StreamEvent>,
        cell: Arc<StreamCell>,
    ) -> StreamCore {
        StreamCore {
            key,
            state,
            out_window: WindowSize::new(out_window as i32),
            in_window: WindowSize::new(in_window as i32),
            outgoing: StreamQueue::new(),
            events,
            cell,
            trailers: None,
            pending_dep: None,
            seen_final_headers_in: false,
            last_activity: Instant::now(),
        }
    }

    /// Deliver an event to the application; a dropped receiver is not an
    /// error, the application just stopped listening.
    pub fn emit(&self, event: StreamEvent) {
        drop(self.events.unbounded_send(event));
    }

    pub fn close_local(&mut self) {
        trace!("close local");
        self.state = match self.state {
            StreamState::Closed | StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        };
    }

    pub fn close_remote(&mut self) {
        trace!("close remote");
        self.state = match self.state {
            StreamState::Closed | StreamState::HalfClosedLocal => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        };
    }

    /// Everything flushed and both directions done.
    pub fn finished(&self) -> bool {
        self.state.is_closed() && self.outgoing.is_empty() && !self.writable_end_pending()
    }

    fn writable_end_pending(&self) -> bool {
        self.outgoing.end_recorded() && !self.state.is_closed_local()
    }

    /// Kept in sync with `pop_outg`: would a pop yield anything given a
    /// non-empty connection window?
    pub fn is_writable(&self) -> bool {
        match self.outgoing.front() {
            Some(DataOrHeaders::Headers(..)) => true,
            Some(DataOrHeaders::Data(data)) => data.is_empty() || self.out_window.size() > 0,
            None => self.outgoing.end().is_some() && !self.state.is_closed_local(),
        }
    }

    pub fn pop_outg(&mut self, flow: &mut ConnFlow) -> Option<StreamCommand> {
        if self.outgoing.is_empty() {
            return match self.outgoing.end() {
                Some(code) if !self.state.is_closed_local() => {
                    self.close_local();
                    Some(match code {
                        // a clean end with nothing queued still needs one
                        // frame carrying the END_STREAM flag
                        ErrorCode::NoError => StreamCommand::Data(Bytes::new(), EndStream::Yes),
                        code => StreamCommand::Rst(code),
                    })
                }
                _ => None,
            };
        }

        if let Some(DataOrHeaders::Headers(..)) = self.outgoing.front() {
            let headers = match self.outgoing.pop_front() {
                Some(DataOrHeaders::Headers(headers)) => headers,
                _ => unreachable!(),
            };
            let last = self.outgoing.end() == Some(ErrorCode::NoError);
            if last {
                self.close_local();
            }
            let dep = self.pending_dep.take();
            return Some(StreamCommand::Headers(
                headers,
                EndStream::from_bool(last),
                dep,
            ));
        }

        let max = flow.max_can_send(&self.out_window);
        if max == 0 {
            return None;
        }

        let mut data = match self.outgoing.pop_front() {
            Some(DataOrHeaders::Data(data)) => data,
            _ => unreachable!(),
        };

        if data.len() > max {
            trace!("truncating data of len {} to {}", data.len(), max);
            let rest = data.split_off(max);
            self.outgoing.push_front(DataOrHeaders::Data(rest));
        }

        flow.note_sent(&mut self.out_window, data.len());

        let last = self.outgoing.end() == Some(ErrorCode::NoError);
        if last {
            self.close_local();
        }
        Some(StreamCommand::Data(data, EndStream::from_bool(last)))
    }

    /// Inbound data chunk for the application.
    pub fn data_received(&mut self, data: Bytes, end_stream: bool) {
        self.last_activity = Instant::now();
        self.emit(StreamEvent::Data { data, end_stream });
    }

    /// Peer reset. Returns the terminal code to report. A reset that
    /// arrives while local writes are still queued is an abort and is
    /// surfaced as an error; otherwise it is a normal early end.
    pub fn rst_received(&mut self, code: ErrorCode) -> ErrorCode {
        let pending_writes = self.outgoing.data_size() > 0;
        {
            let mut cell = self.cell.lock();
            if cell.rst.is_none() {
                cell.rst = Some(code);
            }
            if pending_writes {
                cell.aborted = true;
            }
        }
        if pending_writes {
            self.emit(StreamEvent::Error(Error::StreamAborted(code)));
        } else {
            self.emit(StreamEvent::Reset(code));
        }
        self.state = StreamState::Closed;
        self.outgoing.clear();
        code
    }

    /// The session is going away before this stream finished.
    pub fn conn_died(&mut self, code: ErrorCode) {
        let cleanly = self.state.is_closed() && self.outgoing.is_empty();
        {
            let mut cell = self.cell.lock();
            cell.closed = true;
            if !cleanly {
                cell.aborted = true;
            }
        }
        if !cleanly {
            self.emit(StreamEvent::Error(Error::ConnDied));
        }
        self.emit(StreamEvent::Closed(code));
    }
}
