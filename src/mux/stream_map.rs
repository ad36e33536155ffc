//! The stream table: the only place stream ids are allocated, looked up
//! and released. The session owns the table; application handles refer to
//! streams through keys that survive the pre-assignment window.

use std::collections::HashMap;

use crate::error::Error;
use crate::mux::command::StreamKey;
use crate::mux::role::Role;
use crate::mux::stream::StreamCore;
use crate::proto::stream_id::StreamId;
use crate::proto::stream_id::MAX_STREAM_ID;

pub(crate) struct StreamMap {
    map: HashMap<StreamId, StreamCore>,
    key_to_id: HashMap<StreamKey, StreamId>,
    role: Role,
    last_local_stream_id: StreamId,
    last_peer_stream_id: StreamId,
}

/// What a failed lookup means; distinguishing these is what keeps benign
/// races from being escalated into protocol errors (and vice versa).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum MissingStream {
    /// Previously valid, since released: drop the frame silently.
    Closed,
    /// The peer referenced an id that was never created: protocol
    /// violation.
    NeverExisted,
}

impl StreamMap {
    pub fn new(role: Role) -> StreamMap {
        StreamMap {
            map: HashMap::new(),
            key_to_id: HashMap::new(),
            role,
            last_local_stream_id: 0,
            last_peer_stream_id: 0,
        }
    }

    /// Allocate the next locally-initiated stream id. Ids increase
    /// strictly monotonically and are never reused; running out is fatal
    /// to the session.
    pub fn alloc_local(&mut self) -> crate::Result<StreamId> {
        let id = match self.last_local_stream_id {
            0 => self.role.first_local_stream_id(),
            n => match n.checked_add(2) {
                Some(id) if id <= MAX_STREAM_ID => id,
                _ => return Err(Error::StreamIdExhausted),
            },
        };
        self.last_local_stream_id = id;
        Ok(id)
    }

    /// Record the highest peer-initiated id seen.
    pub fn note_peer_stream(&mut self, id: StreamId) {
        if id > self.last_peer_stream_id {
            self.last_peer_stream_id = id;
        }
    }

    pub fn insert(&mut self, id: StreamId, stream: StreamCore) -> crate::Result<()> {
        self.key_to_id.insert(stream.key, id);
        if self.map.insert(id, stream).is_some() {
            return Err(Error::InternalError(format!(
                "stream {} inserted twice",
                id
            )));
        }
        Ok(())
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut StreamCore> {
        self.map.get_mut(&id)
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamCore> {
        self.map.get(&id)
    }

    pub fn id_for_key(&self, key: StreamKey) -> Option<StreamId> {
        self.key_to_id.get(&key).copied()
    }

    /// Remove the mapping; called exactly once, as the final step of
    /// stream destruction.
    pub fn release(&mut self, id: StreamId) -> Option<StreamCore> {
        let stream = self.map.remove(&id)?;
        self.key_to_id.remove(&stream.key);
        Some(stream)
    }

    /// Classify a failed lookup. Both sides hand out ids in increasing
    /// order, so anything at or below the relevant high-water mark once
    /// existed.
    pub fn missing_stream_kind(&self, id: StreamId) -> MissingStream {
        let last = if self.role.is_local_init(id) {
            self.last_local_stream_id
        } else {
            self.last_peer_stream_id
        };
        if id <= last {
            MissingStream::Closed
        } else {
            MissingStream::NeverExisted
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn last_peer_stream_id(&self) -> StreamId {
        self.last_peer_stream_id
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.map.keys().copied().collect()
    }

    pub fn writable_stream_ids(&self) -> Vec<StreamId> {
        self.map
            .iter()
            .filter(|(_, s)| s.is_writable())
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&StreamId, &mut StreamCore)> {
        self.map.iter_mut()
    }

    /// Remove every locally-initiated stream above `last_stream_id`;
    /// those are the streams a received GOAWAY tells us will never be
    /// processed.
    pub fn remove_local_streams_with_id_gt(
        &mut self,
        last_stream_id: StreamId,
    ) -> Vec<(StreamId, StreamCore)> {
        let ids: Vec<StreamId> = self
            .map
            .keys()
            .copied()
            .filter(|&id| self.role.is_local_init(id) && id > last_stream_id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.release(id).map(|s| (id, s)))
            .collect()
    }

    /// Drain every stream for session teardown.
    pub fn drain(&mut self) -> Vec<(StreamId, StreamCore)> {
        self.key_to_id.clear();
        self.map.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_strictly_increasing_odd_for_client() {
        let mut map = StreamMap::new(Role::Client);
        assert_eq!(1, map.alloc_local().unwrap());
        assert_eq!(3, map.alloc_local().unwrap());
        assert_eq!(5, map.alloc_local().unwrap());
    }

    #[test]
    fn local_ids_even_for_server() {
        let mut map = StreamMap::new(Role::Server);
        assert_eq!(2, map.alloc_local().unwrap());
        assert_eq!(4, map.alloc_local().unwrap());
    }

    #[test]
    fn id_space_exhaustion_is_an_error() {
        let mut map = StreamMap::new(Role::Client);
        map.last_local_stream_id = MAX_STREAM_ID;
        assert!(matches!(map.alloc_local(), Err(Error::StreamIdExhausted)));
    }

    #[test]
    fn missing_stream_classification() {
        let mut map = StreamMap::new(Role::Server);
        map.note_peer_stream(5);
        assert_eq!(MissingStream::Closed, map.missing_stream_kind(3));
        assert_eq!(MissingStream::Closed, map.missing_stream_kind(5));
        assert_eq!(MissingStream::NeverExisted, map.missing_stream_kind(7));
        // our own parity, nothing allocated yet
        assert_eq!(MissingStream::NeverExisted, map.missing_stream_kind(2));
    }
}
