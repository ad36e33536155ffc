//! The `SETTINGS` frame and the 6-octet packed-settings wire format:
//! a 2-octet big-endian identifier followed by a 4-octet big-endian value
//! per setting.

use crate::codec::write_buffer::WriteBuffer;
use crate::error::Error;
use crate::proto::frame::flags::Flag;
use crate::proto::frame::flags::Flags;
use crate::proto::frame::unpack_u32_be;
use crate::proto::frame::FrameHeader;
use crate::proto::frame::FrameIR;
use crate::proto::frame::ParseFrameError;
use crate::proto::frame::ParseFrameResult;
use crate::proto::frame::RawFrame;
use crate::proto::window_size::MAX_WINDOW_SIZE;

pub const SETTINGS_FRAME_TYPE: u8 = 0x4;

const SETTING_RECORD_LEN: usize = 6;

/// Legal range of SETTINGS_MAX_FRAME_SIZE (section 6.5.2).
pub const MIN_MAX_FRAME_SIZE: u32 = 0x4000;
pub const MAX_MAX_FRAME_SIZE: u32 = 0xff_ffff;

/// One valid setting, identified per section 6.5.2.
#[derive(Clone, PartialEq, Eq, Debug, Copy)]
pub enum HttpSetting {
    HeaderTableSize(u32),
    EnablePush(bool),
    MaxConcurrentStreams(u32),
    InitialWindowSize(u32),
    MaxFrameSize(u32),
    MaxHeaderListSize(u32),
}

impl HttpSetting {
    /// Build the setting matching a wire identifier; unknown identifiers
    /// yield `None` and must be ignored by the receiver.
    pub fn from_id(id: u16, val: u32) -> ParseFrameResult<Option<HttpSetting>> {
        Ok(Some(match id {
            1 => HttpSetting::HeaderTableSize(val),
            2 => match val {
                0 => HttpSetting::EnablePush(false),
                1 => HttpSetting::EnablePush(true),
                _ => return Err(ParseFrameError::IncorrectSettingsPushValue(val)),
            },
            3 => HttpSetting::MaxConcurrentStreams(val),
            // Values above 2^31-1 are a FLOW_CONTROL_ERROR,
            // handled at the session level where a GOAWAY can be sent.
            4 => HttpSetting::InitialWindowSize(val),
            5 => {
                if val < MIN_MAX_FRAME_SIZE || val > MAX_MAX_FRAME_SIZE {
                    return Err(ParseFrameError::IncorrectSettingsMaxFrameSize(val));
                }
                HttpSetting::MaxFrameSize(val)
            }
            6 => HttpSetting::MaxHeaderListSize(val),
            _ => return Ok(None),
        }))
    }

    fn parse_record(record: &[u8]) -> ParseFrameResult<Option<HttpSetting>> {
        let id = ((record[0] as u16) << 8) | record[1] as u16;
        HttpSetting::from_id(id, unpack_u32_be(&record[2..]))
    }

    pub fn id(&self) -> u16 {
        match *self {
            HttpSetting::HeaderTableSize(..) => 1,
            HttpSetting::EnablePush(..) => 2,
            HttpSetting::MaxConcurrentStreams(..) => 3,
            HttpSetting::InitialWindowSize(..) => 4,
            HttpSetting::MaxFrameSize(..) => 5,
            HttpSetting::MaxHeaderListSize(..) => 6,
        }
    }

    pub fn value(&self) -> u32 {
        match *self {
            HttpSetting::HeaderTableSize(v)
            | HttpSetting::MaxConcurrentStreams(v)
            | HttpSetting::InitialWindowSize(v)
            | HttpSetting::MaxFrameSize(v)
            | HttpSetting::MaxHeaderListSize(v) => v,
            HttpSetting::EnablePush(true) => 1,
            HttpSetting::EnablePush(false) => 0,
        }
    }

    fn serialize(&self) -> [u8; SETTING_RECORD_LEN] {
        let (id, val) = (self.id(), self.value());
        [
            (id >> 8) as u8,
            id as u8,
            (val >> 24) as u8,
            (val >> 16) as u8,
            (val >> 8) as u8,
            val as u8,
        ]
    }
}

/// A complete settings snapshot for one endpoint.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct HttpSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl HttpSettings {
    pub fn apply(&mut self, setting: HttpSetting) {
        match setting {
            HttpSetting::HeaderTableSize(v) => self.header_table_size = v,
            HttpSetting::EnablePush(v) => self.enable_push = v,
            HttpSetting::MaxConcurrentStreams(v) => self.max_concurrent_streams = v,
            HttpSetting::InitialWindowSize(v) => self.initial_window_size = v,
            HttpSetting::MaxFrameSize(v) => self.max_frame_size = v,
            HttpSetting::MaxHeaderListSize(v) => self.max_header_list_size = v,
        }
    }
}

/// A partial settings change requested by the application or decoded from a
/// packed-settings buffer. Unset fields keep their current value.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct SettingsUpdate {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl SettingsUpdate {
    /// Range-check every present field. Performed synchronously at the call
    /// site of `update_settings` so the caller can correct and retry;
    /// nothing is placed on the wire when validation fails.
    ///
    /// `header_table_size`, `initial_window_size` and `max_header_list_size`
    /// span the full `u32` range, so their checks hold by construction.
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(v) = self.max_frame_size {
            if v < MIN_MAX_FRAME_SIZE || v > MAX_MAX_FRAME_SIZE {
                return Err(Error::SettingOutOfRange {
                    name: "max_frame_size",
                    value: v,
                });
            }
        }
        if let Some(v) = self.max_concurrent_streams {
            if v > MAX_WINDOW_SIZE {
                return Err(Error::SettingOutOfRange {
                    name: "max_concurrent_streams",
                    value: v,
                });
            }
        }
        Ok(())
    }

    pub fn to_settings(&self) -> Vec<HttpSetting> {
        let mut settings = Vec::new();
        if let Some(v) = self.header_table_size {
            settings.push(HttpSetting::HeaderTableSize(v));
        }
        if let Some(v) = self.enable_push {
            settings.push(HttpSetting::EnablePush(v));
        }
        if let Some(v) = self.max_concurrent_streams {
            settings.push(HttpSetting::MaxConcurrentStreams(v));
        }
        if let Some(v) = self.initial_window_size {
            settings.push(HttpSetting::InitialWindowSize(v));
        }
        if let Some(v) = self.max_frame_size {
            settings.push(HttpSetting::MaxFrameSize(v));
        }
        if let Some(v) = self.max_header_list_size {
            settings.push(HttpSetting::MaxHeaderListSize(v));
        }
        settings
    }

    pub fn apply_to(&self, settings: &mut HttpSettings) {
        for setting in self.to_settings() {
            settings.apply(setting);
        }
    }
}

/// Serialize a settings change into the packed 6-octet-record wire format,
/// e.g. for an `HTTP2-Settings` header.
pub fn pack_settings(update: &SettingsUpdate) -> crate::Result<Vec<u8>> {
    update.validate()?;
    let mut buf = Vec::new();
    for setting in update.to_settings() {
        buf.extend_from_slice(&setting.serialize());
    }
    Ok(buf)
}

/// Decode a packed-settings buffer. The buffer length must be an exact
/// multiple of 6; records with unknown identifiers are skipped.
pub fn unpack_settings(buf: &[u8]) -> crate::Result<SettingsUpdate> {
    if buf.len() % SETTING_RECORD_LEN != 0 {
        return Err(Error::InvalidPackedSettingsLength(buf.len()));
    }

    let mut update = SettingsUpdate::default();
    for record in buf.chunks(SETTING_RECORD_LEN) {
        match HttpSetting::parse_record(record).map_err(Error::ParseFrame)? {
            Some(HttpSetting::HeaderTableSize(v)) => update.header_table_size = Some(v),
            Some(HttpSetting::EnablePush(v)) => update.enable_push = Some(v),
            Some(HttpSetting::MaxConcurrentStreams(v)) => {
                update.max_concurrent_streams = Some(v)
            }
            Some(HttpSetting::InitialWindowSize(v)) => update.initial_window_size = Some(v),
            Some(HttpSetting::MaxFrameSize(v)) => update.max_frame_size = Some(v),
            Some(HttpSetting::MaxHeaderListSize(v)) => update.max_header_list_size = Some(v),
            None => {}
        }
    }
    Ok(update)
}

#[derive(Clone, PartialEq, Debug, Copy)]
pub enum SettingsFlag {
    Ack = 0x1,
}

impl Flag for SettingsFlag {
    #[inline]
    fn bitmask(self) -> u8 {
        self as u8
    }
}

/// The SETTINGS frame, section 6.5. Always associated with stream 0; an ACK
/// carries no payload.
#[derive(PartialEq, Debug, Clone)]
pub struct SettingsFrame {
    pub settings: Vec<HttpSetting>,
    flags: Flags<SettingsFlag>,
}

impl SettingsFrame {
    pub fn new() -> SettingsFrame {
        SettingsFrame {
            settings: Vec::new(),
            flags: Flags::default(),
        }
    }

    pub fn new_ack() -> SettingsFrame {
        let mut frame = SettingsFrame::new();
        frame.flags.set(SettingsFlag::Ack);
        frame
    }

    pub fn from_settings(settings: Vec<HttpSetting>) -> SettingsFrame {
        SettingsFrame {
            settings,
            flags: Flags::default(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.flags.is_set(SettingsFlag::Ack)
    }

    pub fn from_raw(raw: &RawFrame) -> ParseFrameResult<SettingsFrame> {
        let FrameHeader {
            payload_len,
            frame_type,
            flags,
            stream_id,
        } = raw.header();
        if frame_type != SETTINGS_FRAME_TYPE {
            return Err(ParseFrameError::InternalError);
        }
        if stream_id != 0 {
            return Err(ParseFrameError::StreamIdMustBeZero);
        }

        let flags: Flags<SettingsFlag> = Flags::new(flags);
        if flags.is_set(SettingsFlag::Ack) {
            // ACK must not carry a payload
            return if payload_len == 0 {
                Ok(SettingsFrame {
                    settings: Vec::new(),
                    flags,
                })
            } else {
                Err(ParseFrameError::ProtocolError)
            };
        }

        let payload = raw.payload();
        if payload.len() % SETTING_RECORD_LEN != 0 {
            return Err(ParseFrameError::ProtocolError);
        }

        let mut settings = Vec::new();
        for record in payload.chunks(SETTING_RECORD_LEN) {
            if let Some(setting) = HttpSetting::parse_record(record)? {
                settings.push(setting);
            }
        }

        Ok(SettingsFrame { settings, flags })
    }

    fn get_header(&self) -> FrameHeader {
        FrameHeader {
            payload_len: (SETTING_RECORD_LEN * self.settings.len()) as u32,
            frame_type: SETTINGS_FRAME_TYPE,
            flags: self.flags.0,
            stream_id: 0,
        }
    }
}

impl FrameIR for SettingsFrame {
    fn serialize_into(self, buf: &mut WriteBuffer) {
        buf.write_header(self.get_header());
        for setting in &self.settings {
            buf.extend_from_slice(&setting.serialize());
        }
    }
}
