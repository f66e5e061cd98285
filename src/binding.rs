//! Action bindings
//!
//! One binding ties a MIDI message pattern (type, channel, data byte 1) to a
//! named application action. Bindings are read from configuration strings
//! of the form `"<enabled>,<TYPE>,<channel 1-16>,<data1 0-127>"`.

use std::fmt;
use thiserror::Error;

use crate::midi::{InvalidMessageData, MessageType, ShortMessage};

/// Prefix of the configuration key for every action binding
pub const CONFIG_KEY_PREFIX: &str = "midi.Action.";

/// Configuration key for an action (`midi.Action.<lowercase action>`)
pub fn config_key(action: &str) -> String {
    format!("{}{}", CONFIG_KEY_PREFIX, action.to_lowercase())
}

/// Errors building or editing a binding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("malformed binding for '{action}': {reason}")]
    ConfigFormat { action: String, reason: String },

    #[error("unknown message type '{value}' for '{action}'")]
    ConfigValue { action: String, value: String },

    #[error("{field} {value} out of range for '{action}' (must be {min}-{max})")]
    ConfigRange {
        action: String,
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

/// A configured mapping from a MIDI pattern to an application action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    enabled: bool,
    message_type: MessageType,
    /// Zero-based
    channel: u8,
    /// Note, controller or program number depending on the type
    data1: u8,
    action: String,
    config_key: String,
    /// False for the stand-in of a rejected configuration entry
    configured: bool,
}

impl ActionBinding {
    /// Create an enabled binding. `channel` is zero-based.
    pub fn new(
        action: &str,
        message_type: MessageType,
        channel: u8,
        data1: u8,
    ) -> Result<Self, BindingError> {
        let mut binding = Self::placeholder(action);
        binding.set_message_type(message_type);
        binding.set_channel(channel)?;
        binding.set_data1(data1)?;
        binding.set_enabled(true);
        binding.configured = true;
        Ok(binding)
    }

    /// Disabled stand-in for an action whose configuration was rejected
    pub(crate) fn placeholder(action: &str) -> Self {
        Self {
            enabled: false,
            message_type: MessageType::NoteOn,
            channel: 15,
            data1: 0,
            action: action.to_string(),
            config_key: config_key(action),
            configured: false,
        }
    }

    /// Parse a configuration string for `action`.
    ///
    /// All whitespace is stripped first. The type field takes a symbolic
    /// name (`NOTE_ON`) or a numeric status byte (`144`, `0x90`), so both the
    /// hand-written and the serialized forms load.
    pub fn parse(config: &str, action: &str) -> Result<Self, BindingError> {
        let stripped: String = config.chars().filter(|c| !c.is_whitespace()).collect();
        let fields: Vec<&str> = stripped.split(',').collect();

        if fields.len() != 4 {
            return Err(BindingError::ConfigFormat {
                action: action.to_string(),
                reason: format!("expected 4 fields, found {} in '{}'", fields.len(), config),
            });
        }

        let enabled = fields[0].eq_ignore_ascii_case("true");
        let message_type = parse_message_type(fields[1], action)?;
        let channel = parse_ranged(fields[2], action, "channel", 1, 16)?;
        let data1 = parse_ranged(fields[3], action, "data byte 1", 0, 127)?;

        Ok(Self {
            enabled,
            message_type,
            channel: (channel - 1) as u8,
            data1: data1 as u8,
            action: action.to_string(),
            config_key: config_key(action),
            configured: true,
        })
    }

    /// Build an enabled binding from a captured message (learn mode)
    pub fn from_message(action: &str, message: &ShortMessage) -> Result<Self, BindingError> {
        let message_type = message
            .message_type()
            .map_err(|e| BindingError::IllegalArgument(e.to_string()))?;
        Self::new(
            action,
            message_type,
            message.channel().unwrap_or(0),
            message.data1(),
        )
    }

    /// Persisted form, type written as its decimal status byte
    pub fn serialize(&self) -> String {
        format!(
            "{},{},{},{}",
            self.enabled,
            self.message_type.status_byte(),
            self.channel + 1,
            self.data1
        )
    }

    /// Human-editable form, type written by name
    pub fn config_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.enabled,
            self.message_type.name(),
            self.channel + 1,
            self.data1
        )
    }

    /// Status byte this binding expects on the wire
    pub fn encoded_status(&self) -> u8 {
        if self.message_type.is_channel_voice() {
            self.message_type.status_byte() | self.channel
        } else {
            self.message_type.status_byte()
        }
    }

    /// True when status and data byte 1 both match. The value byte is never
    /// compared, so a gesture fires regardless of velocity.
    pub fn matches(&self, status: u8, data1: u8) -> bool {
        status == self.encoded_status() && data1 == self.data1
    }

    /// True when both bindings would match the same messages
    pub fn same_pattern(&self, other: &ActionBinding) -> bool {
        self.encoded_status() == other.encoded_status() && self.data1 == other.data1
    }

    /// Short message for this binding carrying `velocity` as data byte 2
    pub fn to_message(&self, velocity: u8) -> Result<ShortMessage, InvalidMessageData> {
        ShortMessage::new(self.message_type, self.channel, self.data1, velocity)
    }

    /// False when this binding only stands in for a rejected entry
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Zero-based channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn data1(&self) -> u8 {
        self.data1
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.message_type = message_type;
    }

    /// Set the type from a raw status byte; only category bytes are accepted
    pub fn set_message_type_byte(&mut self, status: u8) -> Result<(), BindingError> {
        let message_type = MessageType::from_status_byte(status).map_err(|_| {
            BindingError::IllegalArgument(format!("invalid MIDI message type: 0x{:02X}", status))
        })?;
        self.message_type = message_type;
        Ok(())
    }

    /// Set the zero-based channel (0-15)
    pub fn set_channel(&mut self, channel: u8) -> Result<(), BindingError> {
        if channel > 15 {
            return Err(BindingError::IllegalArgument(format!(
                "MIDI channel must be between 0 and 15, got {}",
                channel
            )));
        }
        self.channel = channel;
        Ok(())
    }

    pub fn set_data1(&mut self, data1: u8) -> Result<(), BindingError> {
        if data1 > 127 {
            return Err(BindingError::IllegalArgument(format!(
                "MIDI data byte 1 must be between 0 and 127, got {}",
                data1
            )));
        }
        self.data1 = data1;
        Ok(())
    }
}

impl fmt::Display for ActionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.action, self.config_string())
    }
}

fn parse_message_type(field: &str, action: &str) -> Result<MessageType, BindingError> {
    let unknown = || BindingError::ConfigValue {
        action: action.to_string(),
        value: field.to_string(),
    };

    let numeric = if let Some(hex) = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(u8::from_str_radix(hex, 16).map_err(|_| unknown())?)
    } else if field.starts_with(|c: char| c.is_ascii_digit()) {
        Some(field.parse::<u8>().map_err(|_| unknown())?)
    } else {
        None
    };

    match numeric {
        Some(byte) => MessageType::from_status_byte(byte).map_err(|_| unknown()),
        None => MessageType::from_name(field).map_err(|_| unknown()),
    }
}

fn parse_ranged(
    field: &str,
    action: &str,
    name: &'static str,
    min: i64,
    max: i64,
) -> Result<i64, BindingError> {
    let value = field.parse::<i64>().map_err(|_| BindingError::ConfigFormat {
        action: action.to_string(),
        reason: format!("{} '{}' is not a number", name, field),
    })?;

    if !(min..=max).contains(&value) {
        return Err(BindingError::ConfigRange {
            action: action.to_string(),
            field: name,
            value,
            min,
            max,
        });
    }
    Ok(value)
}
