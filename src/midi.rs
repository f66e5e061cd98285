//! MIDI status-byte codec and short message type
//!
//! Maps the symbolic message categories used in binding configuration to
//! their status bytes and back, and models the 1-3 byte short messages that
//! travel between the hardware and the dispatcher.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Status byte (or name) that is not one of the recognized categories
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownMessageType {
    #[error("unknown MIDI message type byte: 0x{0:02X}")]
    Byte(u8),

    #[error("unknown MIDI message type name: '{0}'")]
    Name(String),
}

/// Short message fields that fall outside their MIDI ranges
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMessageData {
    #[error("MIDI channel out of range: {0} (must be 0-15)")]
    Channel(u8),

    #[error("MIDI data byte 1 out of range: {0} (must be 0-127)")]
    Data1(u8),

    #[error("MIDI data byte 2 out of range: {0} (must be 0-127)")]
    Data2(u8),
}

/// Recognized MIDI status categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SystemReset,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    MidiTimeCode,
    SongPositionPointer,
    SongSelect,
    TuneRequest,
    EndOfExclusive,
}

impl MessageType {
    /// Every recognized category
    pub const ALL: [MessageType; 18] = [
        MessageType::NoteOff,
        MessageType::NoteOn,
        MessageType::PolyPressure,
        MessageType::ControlChange,
        MessageType::ProgramChange,
        MessageType::ChannelPressure,
        MessageType::PitchBend,
        MessageType::SystemReset,
        MessageType::TimingClock,
        MessageType::Start,
        MessageType::Continue,
        MessageType::Stop,
        MessageType::ActiveSensing,
        MessageType::MidiTimeCode,
        MessageType::SongPositionPointer,
        MessageType::SongSelect,
        MessageType::TuneRequest,
        MessageType::EndOfExclusive,
    ];

    /// Status byte for this category (channel nibble zero)
    pub const fn status_byte(self) -> u8 {
        match self {
            MessageType::NoteOff => 0x80,
            MessageType::NoteOn => 0x90,
            MessageType::PolyPressure => 0xA0,
            MessageType::ControlChange => 0xB0,
            MessageType::ProgramChange => 0xC0,
            MessageType::ChannelPressure => 0xD0,
            MessageType::PitchBend => 0xE0,
            MessageType::MidiTimeCode => 0xF1,
            MessageType::SongPositionPointer => 0xF2,
            MessageType::SongSelect => 0xF3,
            MessageType::TuneRequest => 0xF6,
            MessageType::EndOfExclusive => 0xF7,
            MessageType::TimingClock => 0xF8,
            MessageType::Start => 0xFA,
            MessageType::Continue => 0xFB,
            MessageType::Stop => 0xFC,
            MessageType::ActiveSensing => 0xFE,
            MessageType::SystemReset => 0xFF,
        }
    }

    /// Exact inverse of [`MessageType::status_byte`].
    ///
    /// `0x93` is not a category byte and fails here; use
    /// [`MessageType::from_message_status`] for bytes read off the wire.
    pub fn from_status_byte(byte: u8) -> Result<Self, UnknownMessageType> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.status_byte() == byte)
            .ok_or(UnknownMessageType::Byte(byte))
    }

    /// Category of a status byte as received, channel nibble included
    pub fn from_message_status(status: u8) -> Result<Self, UnknownMessageType> {
        if (0x80..0xF0).contains(&status) {
            Self::from_status_byte(status & 0xF0)
        } else {
            Self::from_status_byte(status)
        }
    }

    /// Symbolic name as used in configuration strings
    pub const fn name(self) -> &'static str {
        match self {
            MessageType::NoteOff => "NOTE_OFF",
            MessageType::NoteOn => "NOTE_ON",
            MessageType::PolyPressure => "POLY_PRESSURE",
            MessageType::ControlChange => "CONTROL_CHANGE",
            MessageType::ProgramChange => "PROGRAM_CHANGE",
            MessageType::ChannelPressure => "CHANNEL_PRESSURE",
            MessageType::PitchBend => "PITCH_BEND",
            MessageType::SystemReset => "SYSTEM_RESET",
            MessageType::TimingClock => "TIMING_CLOCK",
            MessageType::Start => "START",
            MessageType::Continue => "CONTINUE",
            MessageType::Stop => "STOP",
            MessageType::ActiveSensing => "ACTIVE_SENSING",
            MessageType::MidiTimeCode => "MIDI_TIME_CODE",
            MessageType::SongPositionPointer => "SONG_POSITION_POINTER",
            MessageType::SongSelect => "SONG_SELECT",
            MessageType::TuneRequest => "TUNE_REQUEST",
            MessageType::EndOfExclusive => "END_OF_EXCLUSIVE",
        }
    }

    /// Parse a symbolic name (exact, case-sensitive)
    pub fn from_name(name: &str) -> Result<Self, UnknownMessageType> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| UnknownMessageType::Name(name.to_string()))
    }

    /// Channel voice messages carry the channel in the status low nibble
    pub const fn is_channel_voice(self) -> bool {
        self.status_byte() < 0xF0
    }

    /// Number of data bytes that follow the status byte on the wire
    pub const fn data_len(self) -> usize {
        match self {
            MessageType::ProgramChange
            | MessageType::ChannelPressure
            | MessageType::MidiTimeCode
            | MessageType::SongSelect => 1,
            MessageType::NoteOff
            | MessageType::NoteOn
            | MessageType::PolyPressure
            | MessageType::ControlChange
            | MessageType::PitchBend
            | MessageType::SongPositionPointer => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// A MIDI short message: status byte plus up to two data bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortMessage {
    status: u8,
    data1: u8,
    data2: Option<u8>,
    len: u8,
}

impl ShortMessage {
    /// Build a message for `message_type` on `channel` (0-15).
    ///
    /// System categories ignore the channel. Data bytes the category does
    /// not put on the wire are still range-checked.
    pub fn new(
        message_type: MessageType,
        channel: u8,
        data1: u8,
        data2: u8,
    ) -> Result<Self, InvalidMessageData> {
        if channel > 15 {
            return Err(InvalidMessageData::Channel(channel));
        }
        if data1 > 127 {
            return Err(InvalidMessageData::Data1(data1));
        }
        if data2 > 127 {
            return Err(InvalidMessageData::Data2(data2));
        }

        let status = if message_type.is_channel_voice() {
            message_type.status_byte() | channel
        } else {
            message_type.status_byte()
        };

        Ok(Self {
            status,
            data1,
            data2: (message_type.data_len() == 2).then_some(data2),
            len: 1 + message_type.data_len() as u8,
        })
    }

    /// Read a short message from raw bytes delivered by the transport.
    ///
    /// Single-byte system messages read as `data1 == 0`. Running status
    /// (a data byte first), a status byte in a data position and empty
    /// buffers yield `None`.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        if status < 0x80 {
            return None;
        }

        let data_bytes = &data[1..data.len().min(3)];
        if data_bytes.iter().any(|&b| b > 0x7F) {
            return None;
        }

        match *data_bytes {
            [] => Some(Self {
                status,
                data1: 0,
                data2: None,
                len: 1,
            }),
            [data1] => Some(Self {
                status,
                data1,
                data2: None,
                len: 2,
            }),
            [data1, data2, ..] => Some(Self {
                status,
                data1,
                data2: Some(data2),
                len: 3,
            }),
        }
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn data2(&self) -> Option<u8> {
        self.data2
    }

    /// Value/velocity byte, 0 when the message has none
    pub fn value(&self) -> u8 {
        self.data2.unwrap_or(0)
    }

    pub fn message_type(&self) -> Result<MessageType, UnknownMessageType> {
        MessageType::from_message_status(self.status)
    }

    /// Channel (0-15) for channel voice messages
    pub fn channel(&self) -> Option<u8> {
        (self.status < 0xF0).then_some(self.status & 0x0F)
    }

    /// Bytes as they go on the wire
    pub fn encode(&self) -> Vec<u8> {
        let bytes = [self.status, self.data1, self.data2.unwrap_or(0)];
        bytes[..self.len as usize].to_vec()
    }
}

impl fmt::Display for ShortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message_type(), self.channel()) {
            (Ok(t), Some(ch)) => write!(f, "{} ch:{} d1:{}", t, ch + 1, self.data1)?,
            (Ok(t), None) => write!(f, "{} d1:{}", t, self.data1)?,
            (Err(_), _) => write!(f, "0x{:02X} d1:{}", self.status, self.data1)?,
        }
        if let Some(d2) = self.data2 {
            write!(f, " d2:{}", d2)?;
        }
        Ok(())
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
