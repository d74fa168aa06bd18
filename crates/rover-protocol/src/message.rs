//! Protocol message types for broker communication.

use std::fmt;

use rover_core::{ClientName, DomainError};

use crate::parse::{split_frame, strip_terminator, ProtocolError, FIELD_SEPARATOR};

/// Two-letter code that opens every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// `DC` - device is connecting
    DeviceConnect,
    /// `CC` - controller is connecting
    ControllerConnect,
    /// `CD` - controller selects a device (client) / selection accepted (server)
    ConnectDevice,
    /// `RE` - relayed payload
    Relay,
    /// `DL` - available device list
    DeviceList,
    /// `DD` - paired device disconnected
    DeviceDisconnected,
    /// `SE` - request error
    ServerError,
}

impl CommandCode {
    pub const ALL: [Self; 7] = [
        Self::DeviceConnect,
        Self::ControllerConnect,
        Self::ConnectDevice,
        Self::Relay,
        Self::DeviceList,
        Self::DeviceDisconnected,
        Self::ServerError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceConnect => "DC",
            Self::ControllerConnect => "CC",
            Self::ConnectDevice => "CD",
            Self::Relay => "RE",
            Self::DeviceList => "DL",
            Self::DeviceDisconnected => "DD",
            Self::ServerError => "SE",
        }
    }

    /// Parses a code; matching is case-sensitive.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins a code and a body into one frame.
fn frame(code: CommandCode, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 3);
    out.extend_from_slice(code.as_str().as_bytes());
    out.push(FIELD_SEPARATOR as u8);
    out.extend_from_slice(body);
    out
}

// ============================================================================
// Client -> Broker
// ============================================================================

/// Commands a client sends to the broker, decoded once at the transport edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Register the sending session as a device.
    DeviceConnect { name: ClientName },

    /// Register the sending session as a controller.
    ControllerConnect { name: ClientName },

    /// Controller asks to be paired with the named device.
    SelectDevice { device: ClientName },

    /// Opaque payload for the paired peer, as received. May contain `:` and
    /// need not be UTF-8.
    Relay { payload: Vec<u8> },
}

impl ClientCommand {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::DeviceConnect { .. } => CommandCode::DeviceConnect,
            Self::ControllerConnect { .. } => CommandCode::ControllerConnect,
            Self::SelectDevice { .. } => CommandCode::ConnectDevice,
            Self::Relay { .. } => CommandCode::Relay,
        }
    }

    /// Encodes the command as frame bytes without the line terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = match self {
            Self::DeviceConnect { name } | Self::ControllerConnect { name } => name.as_str().as_bytes(),
            Self::SelectDevice { device } => device.as_str().as_bytes(),
            Self::Relay { payload } => payload.as_slice(),
        };
        frame(self.code(), body)
    }

    /// Text form of the frame. Non-UTF-8 payload bytes are shown as U+FFFD.
    pub fn encode(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// ============================================================================
// Error codes
// ============================================================================

/// Error codes carried by `SE:<code>` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `E_10` - invalid client command
    InvalidCommand,
    /// `E_20` - no endpoint connected
    NoEndpoint,
    /// `E_30` - name already in use
    NameTaken,
    /// `E_40` - selected device does not exist
    DeviceNotFound,
    /// `E_50` - selected device is paired with another controller
    DeviceUnavailable,
}

impl ErrorCode {
    pub const ALL: [Self; 5] = [
        Self::InvalidCommand,
        Self::NoEndpoint,
        Self::NameTaken,
        Self::DeviceNotFound,
        Self::DeviceUnavailable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCommand => "E_10",
            Self::NoEndpoint => "E_20",
            Self::NameTaken => "E_30",
            Self::DeviceNotFound => "E_40",
            Self::DeviceUnavailable => "E_50",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::InvalidCommand => "invalid client command",
            Self::NoEndpoint => "no endpoint connected",
            Self::NameTaken => "name already in use",
            Self::DeviceNotFound => "device not found",
            Self::DeviceUnavailable => "device paired with another controller",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&DomainError> for ErrorCode {
    fn from(err: &DomainError) -> Self {
        match err {
            DomainError::NameTaken { .. } => Self::NameTaken,
            DomainError::UnknownDevice { .. } => Self::DeviceNotFound,
            DomainError::DeviceUnavailable { .. } => Self::DeviceUnavailable,
            DomainError::NotRegistered(_) | DomainError::NotPaired(_) => Self::NoEndpoint,
            DomainError::InvalidName { .. }
            | DomainError::AlreadyRegistered { .. }
            | DomainError::UnknownConnection(_)
            | DomainError::RoleMismatch { .. } => Self::InvalidCommand,
        }
    }
}

impl From<&ProtocolError> for ErrorCode {
    fn from(_: &ProtocolError) -> Self {
        Self::InvalidCommand
    }
}

// ============================================================================
// Broker -> Client
// ============================================================================

/// Lines the broker sends to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `DL:<name>:<name>:...` - devices available for pairing, possibly none
    DeviceList { devices: Vec<ClientName> },

    /// `CD:OK` - device selection accepted
    SelectOk,

    /// `RE:<payload>` - payload from the paired peer, byte-for-byte
    Relay { payload: Vec<u8> },

    /// `DD:` - the paired device went away
    DeviceDisconnected,

    /// `SE:<code>` - the last request failed
    Error { code: ErrorCode },
}

impl ServerMessage {
    pub fn device_list(devices: Vec<ClientName>) -> Self {
        Self::DeviceList { devices }
    }

    pub fn relay(payload: impl Into<Vec<u8>>) -> Self {
        Self::Relay {
            payload: payload.into(),
        }
    }

    pub fn error(code: ErrorCode) -> Self {
        Self::Error { code }
    }

    pub fn code(&self) -> CommandCode {
        match self {
            Self::DeviceList { .. } => CommandCode::DeviceList,
            Self::SelectOk => CommandCode::ConnectDevice,
            Self::Relay { .. } => CommandCode::Relay,
            Self::DeviceDisconnected => CommandCode::DeviceDisconnected,
            Self::Error { .. } => CommandCode::ServerError,
        }
    }

    /// Encodes the message as the bytes written to the socket, without the
    /// line terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let code = self.code();
        match self {
            Self::DeviceList { devices } => {
                let names: Vec<&str> = devices.iter().map(ClientName::as_str).collect();
                frame(code, names.join(":").as_bytes())
            }
            Self::SelectOk => frame(code, b"OK"),
            Self::Relay { payload } => frame(code, payload),
            Self::DeviceDisconnected => frame(code, b""),
            Self::Error { code: error } => frame(code, error.as_str().as_bytes()),
        }
    }

    /// Text form of the frame, for logs and tests. Non-UTF-8 payload bytes
    /// are shown as U+FFFD; use [`ServerMessage::to_bytes`] for the wire.
    pub fn encode(&self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    /// Parses a line received from the broker.
    ///
    /// Used by clients and tests; the broker itself never decodes these.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = strip_terminator(line);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (code, body) = split_frame(line);
        let malformed = || ProtocolError::MalformedReply(line.to_string());

        match CommandCode::from_code(code) {
            Some(CommandCode::DeviceList) if body.is_empty() => Ok(Self::device_list(Vec::new())),
            Some(CommandCode::DeviceList) => {
                let devices = body
                    .split(FIELD_SEPARATOR)
                    .map(ClientName::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::device_list(devices))
            }
            Some(CommandCode::ConnectDevice) if body == "OK" => Ok(Self::SelectOk),
            Some(CommandCode::Relay) => Ok(Self::relay(body)),
            Some(CommandCode::DeviceDisconnected) if body.is_empty() => Ok(Self::DeviceDisconnected),
            Some(CommandCode::ServerError) => ErrorCode::from_code(body)
                .map(Self::error)
                .ok_or_else(malformed),
            Some(_) => Err(malformed()),
            None => Err(ProtocolError::UnknownCode(code.to_string())),
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
