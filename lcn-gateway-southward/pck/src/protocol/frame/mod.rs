pub mod address;
pub mod generator;
pub mod parser;
pub mod variable;

pub use address::LcnAddr;
pub use parser::{LedState, LogicOpState, ModuleMessage};
pub use variable::Variable;

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Frame terminator
pub const TERMINATION: &str = "\n";
/// Prompt sent by LCN-PCHK before it expects the user name
pub const AUTH_USERNAME: &str = "Username:";
/// Prompt sent by LCN-PCHK before it expects the password
pub const AUTH_PASSWORD: &str = "Password:";
/// Sent by LCN-PCHK after successful authentication
pub const AUTH_OK: &str = "OK";
/// LCN-PCHK reached the LCN bus
pub const LCNCONNSTATE_CONNECTED: &str = "$io:#LCN:connected";
/// LCN-PCHK lost the LCN bus
pub const LCNCONNSTATE_DISCONNECTED: &str = "$io:#LCN:disconnected";
/// LCN-PCHK rejects the connection for lack of licenses
pub const INSUFFICIENT_LICENSES: &str = "$err:(license?)";

/// Firmware date code since which every variable response carries its type
pub const FIRMWARE_TYPED_VARIABLES: u32 = 0x170206;
/// Number of output ports of a module
pub const OUTPUT_COUNT: usize = 4;
/// Number of relays of a module
pub const RELAY_COUNT: usize = 8;
/// Number of binary sensors of a module
pub const BINARY_SENSOR_COUNT: usize = 8;
/// Number of LEDs of a module
pub const LED_COUNT: usize = 12;
/// Number of logic operations of a module
pub const LOGIC_OP_COUNT: usize = 4;
/// Number of key tables of a module
pub const KEY_TABLE_COUNT: usize = 4;

/// Unit of data queued for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendData {
    /// Command addressed to a module or group, prefixed with an address header.
    Pck {
        addr: LcnAddr,
        wants_ack: bool,
        data: Bytes,
    },
    /// Raw line, used for the handshake and keep-alive pings.
    PlainText(String),
}

impl SendData {
    #[inline]
    pub fn pck(addr: LcnAddr, wants_ack: bool, data: impl Into<Bytes>) -> Self {
        SendData::Pck {
            addr,
            wants_ack,
            data: data.into(),
        }
    }

    #[inline]
    pub fn plain_text(text: impl Into<String>) -> Self {
        SendData::PlainText(text.into())
    }

    /// Renders the complete frame, terminator included.
    pub fn write(&self, local_seg_id: i32, dst: &mut BytesMut) {
        match self {
            SendData::Pck {
                addr,
                wants_ack,
                data,
            } => {
                let header = generator::address_header(addr, local_seg_id, *wants_ack);
                dst.reserve(header.len() + data.len() + TERMINATION.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(data);
            }
            SendData::PlainText(text) => {
                dst.reserve(text.len() + TERMINATION.len());
                put_latin1(text, dst);
            }
        }
        dst.put_slice(TERMINATION.as_bytes());
    }
}

impl fmt::Display for SendData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendData::Pck {
                addr,
                wants_ack,
                data,
            } => write!(
                f,
                "{addr}{}{}",
                if *wants_ack { "!" } else { "." },
                latin1_to_string(data)
            ),
            SendData::PlainText(text) => f.write_str(text),
        }
    }
}

/// Writes `text` as Latin-1, replacing characters outside of it with `?`.
pub fn put_latin1(text: &str, dst: &mut BytesMut) {
    for c in text.chars() {
        let code = c as u32;
        dst.put_u8(if code <= 0xFF { code as u8 } else { b'?' });
    }
}

/// Encodes `text` as Latin-1 bytes.
pub fn latin1_bytes(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len());
    put_latin1(text, &mut buf);
    buf.freeze()
}

#[inline]
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_terminated() {
        let mut buf = BytesMut::new();
        SendData::plain_text("^ping1").write(-1, &mut buf);
        assert_eq!(&buf[..], b"^ping1\n");
    }

    #[test]
    fn plain_text_is_latin1() {
        let mut buf = BytesMut::new();
        SendData::plain_text("pässwort€").write(-1, &mut buf);
        assert_eq!(&buf[..], b"p\xe4sswort?\n");
    }

    #[test]
    fn addressed_command_gets_header() {
        let mut buf = BytesMut::new();
        SendData::pck(LcnAddr::module(0, 7), true, "PIN001").write(0, &mut buf);
        assert_eq!(&buf[..], b">M000007!PIN001\n");

        buf.clear();
        SendData::pck(LcnAddr::group(3, 3), false, "SK").write(-1, &mut buf);
        assert_eq!(&buf[..], b">G003003.SK\n");
    }

    #[test]
    fn display_shows_header_and_payload() {
        let data = SendData::pck(LcnAddr::module(2, 9), false, "SMR");
        assert_eq!(data.to_string(), "M002009.SMR");
    }
}
