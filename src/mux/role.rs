use crate::proto::stream_id::StreamId;

/// Which end of the connection a session is. Decides stream-id parity
/// (odd = client-initiated, even = server-initiated) and who may push.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// First stream id this role may initiate.
    pub fn first_local_stream_id(&self) -> StreamId {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Which role initiated the stream with the given id.
    pub fn initiated_by(stream_id: StreamId) -> Role {
        match stream_id % 2 == 0 {
            true => Role::Server,
            false => Role::Client,
        }
    }

    /// Is the given stream id of the parity this endpoint initiates?
    pub fn is_local_init(&self, stream_id: StreamId) -> bool {
        Role::initiated_by(stream_id) == *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity() {
        assert_eq!(Role::Client, Role::initiated_by(1));
        assert_eq!(Role::Server, Role::initiated_by(2));
        assert!(Role::Client.is_local_init(17));
        assert!(!Role::Client.is_local_init(16));
    }
}
