use std::collections::VecDeque;

use bytes::Bytes;

use crate::headers::Headers;
use crate::proto::error_code::ErrorCode;

/// One element of a stream's outgoing queue.
pub(crate) enum DataOrHeaders {
    Data(Bytes),
    Headers(Headers),
}

fn data_size(item: &DataOrHeaders) -> usize {
    match item {
        DataOrHeaders::Headers(..) => 0,
        DataOrHeaders::Data(data) => data.len(),
    }
}

/// Outgoing queue of one stream.
///
/// `end` records how the queue finishes once it drains: `NoError` means a
/// clean END_STREAM, any other code means a RST. Once an end is recorded
/// nothing further can be queued.
#[derive(Default)]
pub(crate) struct StreamQueue {
    queue: VecDeque<DataOrHeaders>,
    end: Option<ErrorCode>,
    data_size: usize,
}

impl StreamQueue {
    pub fn new() -> StreamQueue {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn push_back(&mut self, item: DataOrHeaders) {
        if self.end.is_some() {
            return;
        }
        self.data_size += data_size(&item);
        self.queue.push_back(item);
    }

    /// Requeue a partially sent item at the front (flow-control split).
    pub fn push_front(&mut self, item: DataOrHeaders) {
        self.data_size += data_size(&item);
        self.queue.push_front(item);
    }

    pub fn pop_front(&mut self) -> Option<DataOrHeaders> {
        let item = self.queue.pop_front()?;
        self.data_size -= data_size(&item);
        Some(item)
    }

    pub fn front(&self) -> Option<&DataOrHeaders> {
        self.queue.front()
    }

    /// Record how the queue ends. A clean end may still be upgraded to an
    /// error; the first error wins.
    pub fn close(&mut self, code: ErrorCode) {
        if self.end.is_none() || self.end == Some(ErrorCode::NoError) {
            self.end = Some(code);
        }
    }

    /// Drop everything still queued; used when a reset supersedes
    /// buffered writes.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.data_size = 0;
    }

    /// The end code, visible only once the queue has drained.
    pub fn end(&self) -> Option<ErrorCode> {
        if !self.is_empty() {
            None
        } else {
            self.end
        }
    }

    /// Whether an end has been recorded, drained or not.
    pub fn end_recorded(&self) -> bool {
        self.end.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_hidden_until_drained() {
        let mut q = StreamQueue::new();
        q.push_back(DataOrHeaders::Data(Bytes::from_static(b"abc")));
        q.close(ErrorCode::NoError);
        assert_eq!(None, q.end());
        assert_eq!(3, q.data_size());

        q.pop_front();
        assert_eq!(Some(ErrorCode::NoError), q.end());
        assert_eq!(0, q.data_size());
    }

    #[test]
    fn nothing_queued_after_close() {
        let mut q = StreamQueue::new();
        q.close(ErrorCode::NoError);
        q.push_back(DataOrHeaders::Data(Bytes::from_static(b"abc")));
        assert!(q.is_empty());
    }

    #[test]
    fn first_error_wins() {
        let mut q = StreamQueue::new();
        q.close(ErrorCode::Cancel);
        q.close(ErrorCode::InternalError);
        assert_eq!(Some(ErrorCode::Cancel), q.end());

        let mut q = StreamQueue::new();
        q.close(ErrorCode::NoError);
        q.close(ErrorCode::Cancel);
        assert_eq!(Some(ErrorCode::Cancel), q.end());
    }
}
