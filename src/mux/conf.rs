use std::time::Duration;

use crate::proto::frame::SettingsUpdate;

/// Default bound on outstanding un-acked SETTINGS frames.
pub const DEFAULT_MAX_PENDING_ACK: u32 = 10;

/// Default session idle timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Session configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Settings advertised at bind time.
    pub settings: SettingsUpdate,
    /// At most this many SETTINGS frames may await acknowledgement;
    /// further `update_settings` calls fail until ACKs arrive.
    pub max_pending_ack: u32,
    /// Idle timeout for the whole session; inbound frame activity resets
    /// it. `None` disables the timer.
    pub session_timeout: Option<Duration>,
    /// Idle timeout per stream. `None` (the default) disables stream
    /// timers; expiry only emits an event, the application decides.
    pub stream_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            settings: SettingsUpdate::default(),
            max_pending_ack: DEFAULT_MAX_PENDING_ACK,
            session_timeout: Some(DEFAULT_SESSION_TIMEOUT),
            stream_timeout: None,
        }
    }
}
