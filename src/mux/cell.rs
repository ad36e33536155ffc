//! State shared between the application-facing handles and the connection
//! core.
//!
//! Handles must surface validation errors synchronously at the call site
//! (never deferred to a later tick), so the observable bits they check —
//! headers-sent, reset, closed, pending-ACK count — live here behind a
//! mutex, written by the core as transitions happen. This mirrors the
//! original's split between JS-side stream state and the native handle.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::proto::error_code::ErrorCode;
use crate::proto::frame::HttpSettings;
use crate::proto::stream_id::StreamId;
use crate::proto::DEFAULT_SETTINGS;

pub(crate) struct StreamCellState {
    /// `None` until the id is assigned.
    pub id: Option<StreamId>,
    /// The final header block for the local direction has been sent
    /// (or queued).
    pub headers_sent: bool,
    /// The local write side has ended.
    pub local_ended: bool,
    /// The stream answers a HEAD request; responses must not carry data.
    pub head_request: bool,
    /// First reset wins; set locally even before the RST frame is written.
    pub rst: Option<ErrorCode>,
    /// Destruction has started; operations fail with `InvalidStream`.
    pub closed: bool,
    /// The peer or the transport went away before a normal finish.
    pub aborted: bool,
}

pub(crate) struct StreamCell {
    state: Mutex<StreamCellState>,
}

impl StreamCell {
    pub fn new(headers_sent: bool, local_ended: bool) -> StreamCell {
        StreamCell {
            state: Mutex::new(StreamCellState {
                id: None,
                headers_sent,
                local_ended,
                head_request: false,
                rst: None,
                closed: false,
                aborted: false,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<StreamCellState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct SessionCellState {
    pub pending_ack: u32,
    pub local_settings: HttpSettings,
    pub remote_settings: HttpSettings,
    pub destroying: bool,
    pub destroyed: bool,
}

pub(crate) struct SessionCell {
    state: Mutex<SessionCellState>,
    /// Read by the frame-reader task on every frame; our acked
    /// SETTINGS_MAX_FRAME_SIZE governs what the peer may send.
    pub max_frame_size: AtomicU32,
    pub max_pending_ack: u32,
}

impl SessionCell {
    pub fn new(max_pending_ack: u32) -> SessionCell {
        SessionCell {
            state: Mutex::new(SessionCellState {
                pending_ack: 0,
                local_settings: DEFAULT_SETTINGS,
                remote_settings: DEFAULT_SETTINGS,
                destroying: false,
                destroyed: false,
            }),
            max_frame_size: AtomicU32::new(DEFAULT_SETTINGS.max_frame_size),
            max_pending_ack,
        }
    }

    pub fn lock(&self) -> MutexGuard<SessionCellState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size.load(Ordering::Relaxed)
    }

    pub fn set_max_frame_size(&self, size: u32) {
        self.max_frame_size.store(size, Ordering::Relaxed);
    }
}
