use bytes::Buf;

use crate::codec::write_buffer::WriteBuffer;
use crate::proto::frame::FrameIR;
use crate::proto::frame::GoawayFrame;

/// Outgoing frame queue.
///
/// Once a GOAWAY is queued the connection is ending: later frames are
/// silently discarded and a second GOAWAY is ignored, so exactly one GOAWAY
/// is the last thing on the wire.
#[derive(Default)]
pub struct QueuedWrite {
    buf: WriteBuffer,
    goaway_queued: bool,
}

impl QueuedWrite {
    pub fn new() -> QueuedWrite {
        Default::default()
    }

    pub fn queue_not_goaway<F: FrameIR>(&mut self, frame: F) {
        if self.goaway_queued {
            return;
        }
        debug!("send {:?}", frame);
        frame.serialize_into(&mut self.buf);
    }

    pub fn queue_goaway(&mut self, frame: GoawayFrame) {
        if self.goaway_queued {
            return;
        }
        self.goaway_queued = true;
        debug!("send {:?}", frame);
        frame.serialize_into(&mut self.buf);
    }

    pub fn queued_bytes_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn goaway_queued(&self) -> bool {
        self.goaway_queued
    }

    pub fn goaway_queued_and_flushed(&self) -> bool {
        self.goaway_queued && self.buf.is_empty()
    }

    /// The byte queue for the transport write path.
    pub fn buf_mut(&mut self) -> &mut impl Buf {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::error_code::ErrorCode;
    use crate::proto::frame::PingFrame;

    #[test]
    fn frames_after_goaway_are_discarded() {
        let mut q = QueuedWrite::new();
        q.queue_goaway(GoawayFrame::new(0, ErrorCode::NoError));
        let len = q.queued_bytes_len();
        q.queue_not_goaway(PingFrame::new(1));
        q.queue_goaway(GoawayFrame::new(5, ErrorCode::ProtocolError));
        assert_eq!(len, q.queued_bytes_len());
        assert!(q.goaway_queued());
    }
}
