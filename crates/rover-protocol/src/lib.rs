//! Rover Protocol - Line-oriented wire protocol for the relay broker
//!
//! This crate provides the command types exchanged between rovers,
//! controllers and the broker, plus the framing rules for turning a raw
//! line into a typed command and back.
//!
//! Every frame is `<code>:<body>` terminated by `\r\n`, where `<code>` is a
//! two-letter command code.

pub mod message;
pub mod parse;

pub use message::{ClientCommand, CommandCode, ErrorCode, ServerMessage};
pub use parse::{
    decode_bytes, decode_line, split_frame, strip_terminator, ProtocolError, FIELD_SEPARATOR, LINE_TERMINATOR,
};
