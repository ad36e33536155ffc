use bytes::Bytes;

use crate::proto::error_code::ErrorCode;
use crate::proto::stream_id::StreamId;

/// Session lifecycle phases.
///
/// `Active → ShuttingDown → Shutdown → Destroying → Destroyed`; destruction
/// may short-circuit from any phase. `Destroyed` is terminal and every
/// public operation after it fails with `InvalidSession`.
#[derive(Eq, PartialEq, Copy, Clone, Debug, PartialOrd, Ord)]
pub enum ShutdownState {
    Active,
    /// Graceful shutdown notice sent, real GOAWAY pending one loop turn.
    ShuttingDown,
    /// GOAWAY sent, draining remaining streams.
    Shutdown,
    Destroying,
    Destroyed,
}

impl ShutdownState {
    pub fn is_destroying_or_destroyed(&self) -> bool {
        *self >= ShutdownState::Destroying
    }
}

/// Options of a shutdown request.
#[derive(Default, Debug, Clone)]
pub struct ShutdownOptions {
    /// Server-only: first announce a shutdown notice, then send the real
    /// GOAWAY on the next loop turn so in-flight responses keep going.
    pub graceful: bool,
    pub error_code: ErrorCode,
    /// Highest stream id that will still be serviced; defaults to the
    /// highest peer-initiated stream processed so far.
    pub last_stream_id: Option<StreamId>,
    pub opaque_data: Bytes,
}
