//! Framing and decoding of inbound client lines.

use rover_core::{ClientName, DomainError};
use thiserror::Error;

use crate::message::{ClientCommand, CommandCode};

/// Terminator appended to every outbound line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Separator between the command code and its body (and between list items).
pub const FIELD_SEPARATOR: char = ':';

/// Errors produced while decoding a frame.
///
/// Every variant is reported to the sender as `SE:E_10`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,

    #[error("unknown command code: {0:?}")]
    UnknownCode(String),

    /// A server-only code (`DL`, `DD`, `SE`) sent by a client.
    #[error("command {0} is not accepted from clients")]
    UnexpectedCode(CommandCode),

    #[error(transparent)]
    InvalidName(#[from] DomainError),

    /// Names must be UTF-8; relay payloads are never checked.
    #[error("name is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed reply: {0:?}")]
    MalformedReply(String),
}

/// Removes a trailing `\r\n` or `\n`.
pub fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Splits a frame on its first separator into code and body.
///
/// A line without a separator is all code with an empty body.
pub fn split_frame(line: &str) -> (&str, &str) {
    line.split_once(FIELD_SEPARATOR).unwrap_or((line, ""))
}

fn strip_terminator_bytes(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn split_frame_bytes(line: &[u8]) -> (&[u8], &[u8]) {
    let mut parts = line.splitn(2, |&b| b == FIELD_SEPARATOR as u8);
    let code = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default();
    (code, body)
}

fn parse_name(body: &[u8]) -> Result<ClientName, ProtocolError> {
    let raw = std::str::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(ClientName::parse(raw)?)
}

/// Decodes one client line (terminator optional) into a command.
pub fn decode_line(line: &str) -> Result<ClientCommand, ProtocolError> {
    decode_bytes(line.as_bytes())
}

/// Decodes one raw client line (terminator optional) into a command.
///
/// Only the code and any name are interpreted. A relay body is carried as
/// the exact bytes received, whatever their encoding.
pub fn decode_bytes(line: &[u8]) -> Result<ClientCommand, ProtocolError> {
    let line = strip_terminator_bytes(line);
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (code, body) = split_frame_bytes(line);
    let code = std::str::from_utf8(code)
        .ok()
        .and_then(CommandCode::from_code)
        .ok_or_else(|| ProtocolError::UnknownCode(String::from_utf8_lossy(code).into_owned()))?;

    match code {
        CommandCode::DeviceConnect => Ok(ClientCommand::DeviceConnect {
            name: parse_name(body)?,
        }),
        CommandCode::ControllerConnect => Ok(ClientCommand::ControllerConnect {
            name: parse_name(body)?,
        }),
        CommandCode::ConnectDevice => Ok(ClientCommand::SelectDevice {
            device: parse_name(body)?,
        }),
        CommandCode::Relay => Ok(ClientCommand::Relay {
            payload: body.to_vec(),
        }),
        CommandCode::DeviceList | CommandCode::DeviceDisconnected | CommandCode::ServerError => {
            Err(ProtocolError::UnexpectedCode(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> ClientName {
        ClientName::parse(raw).unwrap()
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("DC:a\r\n"), "DC:a");
        assert_eq!(strip_terminator("DC:a\n"), "DC:a");
        assert_eq!(strip_terminator("DC:a"), "DC:a");
        // Only one terminator is removed
        assert_eq!(strip_terminator("RE:x\r\n\r\n"), "RE:x\r\n");
    }

    #[test]
    fn test_split_frame() {
        assert_eq!(split_frame("RE:0:0:0"), ("RE", "0:0:0"));
        assert_eq!(split_frame("DD:"), ("DD", ""));
        assert_eq!(split_frame("DC"), ("DC", ""));
    }

    #[test]
    fn test_decode_registration_commands() {
        assert_eq!(
            decode_line("DC:rover1\r\n").unwrap(),
            ClientCommand::DeviceConnect { name: name("rover1") }
        );
        assert_eq!(
            decode_line("CC:ctrl1").unwrap(),
            ClientCommand::ControllerConnect { name: name("ctrl1") }
        );
        assert_eq!(
            decode_line("CD:rover1").unwrap(),
            ClientCommand::SelectDevice { device: name("rover1") }
        );
    }

    #[test]
    fn test_decode_relay_keeps_separators() {
        assert_eq!(
            decode_line("RE:0:0:0\r\n").unwrap(),
            ClientCommand::Relay {
                payload: b"0:0:0".to_vec()
            }
        );
        assert_eq!(
            decode_line("RE").unwrap(),
            ClientCommand::Relay { payload: Vec::new() }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_line("\r\n"), Err(ProtocolError::Empty));
        assert_eq!(
            decode_line("XX:1"),
            Err(ProtocolError::UnknownCode("XX".to_string()))
        );
        assert_eq!(
            decode_line("hello world"),
            Err(ProtocolError::UnknownCode("hello world".to_string()))
        );
        assert_eq!(
            decode_line("dc:rover1"),
            Err(ProtocolError::UnknownCode("dc".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_server_codes() {
        assert_eq!(
            decode_line("DL:rover1"),
            Err(ProtocolError::UnexpectedCode(CommandCode::DeviceList))
        );
        assert_eq!(
            decode_line("SE:E_10"),
            Err(ProtocolError::UnexpectedCode(CommandCode::ServerError))
        );
    }

    #[test]
    fn test_decode_rejects_invalid_names() {
        assert!(matches!(decode_line("DC:"), Err(ProtocolError::InvalidName(_))));
        assert!(matches!(decode_line("CC"), Err(ProtocolError::InvalidName(_))));
        assert!(matches!(decode_line("DC:a:b"), Err(ProtocolError::InvalidName(_))));
        assert!(matches!(decode_line("CD:"), Err(ProtocolError::InvalidName(_))));
    }

    #[test]
    fn test_decode_bytes_keeps_binary_payload() {
        assert_eq!(
            decode_bytes(b"RE:\x01\xff\x80\r\n").unwrap(),
            ClientCommand::Relay {
                payload: vec![0x01, 0xff, 0x80]
            }
        );
        // Embedded CR and NUL stay in the payload; only the terminator goes
        assert_eq!(
            decode_bytes(b"RE:a\rb\0c\r\n").unwrap(),
            ClientCommand::Relay {
                payload: b"a\rb\0c".to_vec()
            }
        );
    }

    #[test]
    fn test_decode_bytes_requires_utf8_names() {
        assert_eq!(decode_bytes(b"DC:\xff\xfe\r\n"), Err(ProtocolError::InvalidUtf8));
        assert_eq!(decode_bytes(b"CD:rov\xe9r\n"), Err(ProtocolError::InvalidUtf8));
        assert_eq!(
            decode_bytes(b"\xffX:1"),
            Err(ProtocolError::UnknownCode("\u{fffd}X".to_string()))
        );
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(ProtocolError::InvalidUtf8.to_string(), "name is not valid UTF-8");
        assert_eq!(
            ProtocolError::UnexpectedCode(CommandCode::DeviceDisconnected).to_string(),
            "command DD is not accepted from clients"
        );
    }
}
