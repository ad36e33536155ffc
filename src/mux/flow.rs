//! Connection-level flow control.
//!
//! A send is permitted only when both the stream window and the connection
//! window allow it; completing a send decrements both. Per-stream windows
//! live on the streams themselves and are passed in.

use crate::proto::window_size::WindowSize;

pub(crate) struct ConnFlow {
    pub out_window: WindowSize,
    pub in_window: WindowSize,
}

impl ConnFlow {
    pub fn new(initial: u32) -> ConnFlow {
        ConnFlow {
            out_window: WindowSize::new(initial as i32),
            in_window: WindowSize::new(initial as i32),
        }
    }

    /// May `n` bytes be sent on a stream with the given window right now?
    pub fn can_send(&self, stream_window: &WindowSize, n: usize) -> bool {
        self.max_can_send(stream_window) >= n
    }

    /// Largest chunk sendable right now: min of stream and connection
    /// windows, never negative.
    pub fn max_can_send(&self, stream_window: &WindowSize) -> usize {
        let min = std::cmp::min(stream_window.size(), self.out_window.size());
        std::cmp::max(min, 0) as usize
    }

    /// Account for `n` bytes handed to the transport; decrements the
    /// stream and the connection window together.
    pub fn note_sent(&mut self, stream_window: &mut WindowSize, n: usize) {
        // callers only send what max_can_send allowed
        stream_window
            .try_decrease_to_non_negative(n as i32)
            .expect("stream window underflow");
        self.out_window
            .try_decrease_to_non_negative(n as i32)
            .expect("conn window underflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_requires_both_windows() {
        let mut flow = ConnFlow::new(100);
        let mut stream = WindowSize::new(10);

        assert!(flow.can_send(&stream, 10));
        assert!(!flow.can_send(&stream, 11));

        flow.note_sent(&mut stream, 10);
        assert!(!flow.can_send(&stream, 1));
        assert_eq!(90, flow.out_window.size());

        // replenishing the stream window alone is not enough once the
        // connection window is exhausted
        stream.try_increase(200).unwrap();
        assert_eq!(90, flow.max_can_send(&stream));
    }

    #[test]
    fn accounting_is_lossless() {
        // final window == initial + updates - sent
        let mut flow = ConnFlow::new(1000);
        let mut stream = WindowSize::new(1000);

        let mut sent = 0usize;
        let mut granted = 0u32;
        for (send, grant) in &[(300usize, 0u32), (700, 500), (400, 1000), (100, 0)] {
            let n = std::cmp::min(*send, flow.max_can_send(&stream));
            flow.note_sent(&mut stream, n);
            sent += n;
            if *grant > 0 {
                stream.try_increase(*grant).unwrap();
                flow.out_window.try_increase(*grant).unwrap();
                granted += *grant;
            }
        }

        assert_eq!(1000 + granted as i64 - sent as i64, stream.size() as i64);
        assert_eq!(
            1000 + granted as i64 - sent as i64,
            flow.out_window.size() as i64
        );
    }

    #[test]
    fn negative_stream_window_blocks_sends() {
        let flow = ConnFlow::new(100);
        let stream = WindowSize::new(-5);
        assert_eq!(0, flow.max_can_send(&stream));
        assert!(!flow.can_send(&stream, 1));
    }
}
