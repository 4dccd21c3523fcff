//! Recognisers for inbound PCK lines.

use super::{latin1_bytes, LcnAddr, Variable, KEY_TABLE_COUNT, LED_COUNT, LOGIC_OP_COUNT};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static PCK pattern")
}

static PATTERN_SK_RESPONSE: Lazy<Regex> =
    Lazy::new(|| pattern(r"^=M(?P<seg>\d{3})(?P<id>\d{3})\.SK(?P<local>\d+)$"));
static PATTERN_ACK: Lazy<Regex> =
    Lazy::new(|| pattern(r"^-M(?P<seg>\d{3})(?P<id>\d{3})(?P<code>!|\d+)$"));
static PATTERN_SN: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^=M(?P<seg>\d{3})(?P<id>\d{3})\.SN(?P<sn>[0-9A-F]{10})(?P<manu>[0-9A-F]{2})FW(?P<fw>[0-9A-F]{6})HW(?P<hw>\d+)$",
    )
});
static PATTERN_OUTPUT_PERCENT: Lazy<Regex> =
    Lazy::new(|| pattern(r"^:M(?P<seg>\d{3})(?P<id>\d{3})A(?P<output>\d)(?P<percent>\d+)$"));
static PATTERN_OUTPUT_NATIVE: Lazy<Regex> =
    Lazy::new(|| pattern(r"^:M(?P<seg>\d{3})(?P<id>\d{3})O(?P<output>\d)(?P<value>\d+)$"));
static PATTERN_RELAYS: Lazy<Regex> =
    Lazy::new(|| pattern(r"^:M(?P<seg>\d{3})(?P<id>\d{3})Rx(?P<byte>\d+)$"));
static PATTERN_BINARY_SENSORS: Lazy<Regex> =
    Lazy::new(|| pattern(r"^:M(?P<seg>\d{3})(?P<id>\d{3})Bx(?P<byte>\d+)$"));
static PATTERN_VARIABLE: Lazy<Regex> =
    Lazy::new(|| pattern(r"^%M(?P<seg>\d{3})(?P<id>\d{3})\.A(?P<var>\d{3})(?P<value>\d+)$"));
static PATTERN_SETPOINT: Lazy<Regex> =
    Lazy::new(|| pattern(r"^%M(?P<seg>\d{3})(?P<id>\d{3})\.S(?P<reg>\d)(?P<value>\d+)$"));
static PATTERN_THRESHOLD: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^%M(?P<seg>\d{3})(?P<id>\d{3})\.T(?P<reg>\d)(?P<thr>\d)(?P<value>\d+)$")
});
static PATTERN_S0_INPUT: Lazy<Regex> =
    Lazy::new(|| pattern(r"^%M(?P<seg>\d{3})(?P<id>\d{3})\.C(?P<input>\d)(?P<value>\d+)$"));
static PATTERN_VARIABLE_TYPELESS: Lazy<Regex> =
    Lazy::new(|| pattern(r"^%M(?P<seg>\d{3})(?P<id>\d{3})\.(?P<value>\d+)$"));
static PATTERN_LEDS_AND_LOGIC_OPS: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^=M(?P<seg>\d{3})(?P<id>\d{3})\.TL(?P<leds>[AEBF]{12})(?P<logic>[NTV]{4})$")
});
static PATTERN_KEY_LOCKS: Lazy<Regex> = Lazy::new(|| {
    pattern(
        r"^=M(?P<seg>\d{3})(?P<id>\d{3})\.TX(?P<a>\d{3})(?P<b>\d{3})(?P<c>\d{3})(?P<d>\d{3})?$",
    )
});
static PATTERN_ADDRESSED_COMMAND: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^>(?P<kind>[MG])(?P<seg>\d{3})(?P<id>\d{3})(?P<ack>[!.])(?P<payload>.*)$")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    On,
    Blink,
    Flicker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOpState {
    NotFulfilled,
    PartlyFulfilled,
    Fulfilled,
}

/// Status or acknowledgment sent by a module.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleMessage {
    /// `code` is `None` for a positive acknowledgment.
    Ack { addr: LcnAddr, code: Option<u16> },
    Firmware {
        addr: LcnAddr,
        serial: String,
        manufacturer: u8,
        firmware_version: u32,
        hardware_type: u32,
    },
    /// `output` is 1-based.
    Output {
        addr: LcnAddr,
        output: usize,
        percent: f64,
    },
    /// Bit `n` holds relay `n + 1`.
    Relays { addr: LcnAddr, states: u8 },
    /// Bit `n` holds sensor `n + 1`.
    BinarySensors { addr: LcnAddr, states: u8 },
    /// `variable` is `None` when the module answered without stating it.
    Variable {
        addr: LcnAddr,
        variable: Option<Variable>,
        value: i64,
    },
    LedsAndLogicOps {
        addr: LcnAddr,
        leds: [LedState; LED_COUNT],
        logic_ops: [LogicOpState; LOGIC_OP_COUNT],
    },
    /// Bit `n` of table `t` holds the lock state of key `n + 1` in table `t`.
    KeyLocks {
        addr: LcnAddr,
        tables: [u8; KEY_TABLE_COUNT],
    },
}

impl ModuleMessage {
    pub fn addr(&self) -> LcnAddr {
        match self {
            ModuleMessage::Ack { addr, .. }
            | ModuleMessage::Firmware { addr, .. }
            | ModuleMessage::Output { addr, .. }
            | ModuleMessage::Relays { addr, .. }
            | ModuleMessage::BinarySensors { addr, .. }
            | ModuleMessage::Variable { addr, .. }
            | ModuleMessage::LedsAndLogicOps { addr, .. }
            | ModuleMessage::KeyLocks { addr, .. } => *addr,
        }
    }

    /// Parses a module status line. Addresses are resolved against
    /// `local_seg_id`. Returns `None` for anything else.
    pub fn parse(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
        match line.as_bytes().first()? {
            b'-' => parse_ack(line, local_seg_id),
            b'=' => parse_firmware(line, local_seg_id)
                .or_else(|| parse_leds_and_logic_ops(line, local_seg_id))
                .or_else(|| parse_key_locks(line, local_seg_id)),
            b':' => parse_output(line, local_seg_id)
                .or_else(|| parse_bit_states(line, local_seg_id)),
            b'%' => parse_variable(line, local_seg_id),
            _ => None,
        }
    }
}

/// Scan reply of a segment coupler: `(segment field, module id, local segment id)`.
pub fn parse_segment_scan_reply(line: &str) -> Option<(i32, i32, i32)> {
    let caps = PATTERN_SK_RESPONSE.captures(line)?;
    Some((num(&caps, "seg")?, num(&caps, "id")?, num(&caps, "local")?))
}

/// Decodes an outbound addressed command into `(address, wants_ack, payload)`.
///
/// The address is returned as written on the wire.
pub fn parse_addressed_command(line: &str) -> Option<(LcnAddr, bool, Bytes)> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let caps = PATTERN_ADDRESSED_COMMAND.captures(line)?;
    let segment_id = num(&caps, "seg")?;
    let id = num(&caps, "id")?;
    let addr = if &caps["kind"] == "G" {
        LcnAddr::group(segment_id, id)
    } else {
        LcnAddr::module(segment_id, id)
    };
    Some((addr, &caps["ack"] == "!", latin1_bytes(&caps["payload"])))
}

fn num<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name)?.as_str().parse().ok()
}

fn addr_of(caps: &Captures<'_>, local_seg_id: i32) -> Option<LcnAddr> {
    Some(LcnAddr::logical(
        num(caps, "seg")?,
        num(caps, "id")?,
        local_seg_id,
    ))
}

fn parse_ack(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    let caps = PATTERN_ACK.captures(line)?;
    let code = match &caps["code"] {
        "!" => None,
        other => Some(other.parse().ok()?),
    };
    Some(ModuleMessage::Ack {
        addr: addr_of(&caps, local_seg_id)?,
        code,
    })
}

fn parse_firmware(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    let caps = PATTERN_SN.captures(line)?;
    Some(ModuleMessage::Firmware {
        addr: addr_of(&caps, local_seg_id)?,
        serial: caps["sn"].to_string(),
        manufacturer: u8::from_str_radix(&caps["manu"], 16).ok()?,
        firmware_version: u32::from_str_radix(&caps["fw"], 16).ok()?,
        hardware_type: num(&caps, "hw")?,
    })
}

fn parse_output(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    if let Some(caps) = PATTERN_OUTPUT_PERCENT.captures(line) {
        return Some(ModuleMessage::Output {
            addr: addr_of(&caps, local_seg_id)?,
            output: num(&caps, "output")?,
            percent: num::<u32>(&caps, "percent")? as f64,
        });
    }
    let caps = PATTERN_OUTPUT_NATIVE.captures(line)?;
    Some(ModuleMessage::Output {
        addr: addr_of(&caps, local_seg_id)?,
        output: num(&caps, "output")?,
        percent: num::<u32>(&caps, "value")? as f64 / 2.0,
    })
}

fn parse_bit_states(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    if let Some(caps) = PATTERN_RELAYS.captures(line) {
        return Some(ModuleMessage::Relays {
            addr: addr_of(&caps, local_seg_id)?,
            states: num(&caps, "byte")?,
        });
    }
    let caps = PATTERN_BINARY_SENSORS.captures(line)?;
    Some(ModuleMessage::BinarySensors {
        addr: addr_of(&caps, local_seg_id)?,
        states: num(&caps, "byte")?,
    })
}

fn parse_variable(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    let (caps, variable) = if let Some(caps) = PATTERN_VARIABLE.captures(line) {
        let variable = Variable::Var(num(&caps, "var")?);
        (caps, Some(variable))
    } else if let Some(caps) = PATTERN_SETPOINT.captures(line) {
        let variable = Variable::Setpoint(num(&caps, "reg")?);
        (caps, Some(variable))
    } else if let Some(caps) = PATTERN_THRESHOLD.captures(line) {
        let variable = Variable::Threshold {
            register: num(&caps, "reg")?,
            index: num(&caps, "thr")?,
        };
        (caps, Some(variable))
    } else if let Some(caps) = PATTERN_S0_INPUT.captures(line) {
        let variable = Variable::S0Input(num(&caps, "input")?);
        (caps, Some(variable))
    } else {
        (PATTERN_VARIABLE_TYPELESS.captures(line)?, None)
    };
    if variable.is_some_and(|v| !v.is_valid()) {
        return None;
    }
    Some(ModuleMessage::Variable {
        addr: addr_of(&caps, local_seg_id)?,
        variable,
        value: num(&caps, "value")?,
    })
}

fn parse_leds_and_logic_ops(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    let caps = PATTERN_LEDS_AND_LOGIC_OPS.captures(line)?;
    let mut leds = [LedState::Off; LED_COUNT];
    for (led, c) in leds.iter_mut().zip(caps["leds"].bytes()) {
        *led = match c {
            b'E' => LedState::On,
            b'B' => LedState::Blink,
            b'F' => LedState::Flicker,
            _ => LedState::Off,
        };
    }
    let mut logic_ops = [LogicOpState::NotFulfilled; LOGIC_OP_COUNT];
    for (op, c) in logic_ops.iter_mut().zip(caps["logic"].bytes()) {
        *op = match c {
            b'T' => LogicOpState::PartlyFulfilled,
            b'V' => LogicOpState::Fulfilled,
            _ => LogicOpState::NotFulfilled,
        };
    }
    Some(ModuleMessage::LedsAndLogicOps {
        addr: addr_of(&caps, local_seg_id)?,
        leds,
        logic_ops,
    })
}

fn parse_key_locks(line: &str, local_seg_id: i32) -> Option<ModuleMessage> {
    let caps = PATTERN_KEY_LOCKS.captures(line)?;
    let mut tables = [0u8; KEY_TABLE_COUNT];
    for (table, name) in tables.iter_mut().zip(["a", "b", "c", "d"]) {
        if caps.name(name).is_some() {
            *table = num(&caps, name)?;
        }
    }
    Some(ModuleMessage::KeyLocks {
        addr: addr_of(&caps, local_seg_id)?,
        tables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{latin1_to_string, SendData};
    use bytes::BytesMut;

    #[test]
    fn segment_scan_reply() {
        assert_eq!(parse_segment_scan_reply("=M000005.SK5"), Some((0, 5, 5)));
        assert_eq!(parse_segment_scan_reply("=M012005.SK12"), Some((12, 5, 12)));
        assert_eq!(parse_segment_scan_reply("=M000005.SN"), None);
    }

    #[test]
    fn acknowledgments() {
        assert_eq!(
            ModuleMessage::parse("-M000010!", 0),
            Some(ModuleMessage::Ack {
                addr: LcnAddr::module(0, 10),
                code: None
            })
        );
        assert_eq!(
            ModuleMessage::parse("-M004010005", 0),
            Some(ModuleMessage::Ack {
                addr: LcnAddr::module(4, 10),
                code: Some(5)
            })
        );
    }

    #[test]
    fn firmware_and_serial() {
        let msg = ModuleMessage::parse("=M000010.SN1AB20A123401FW190B11HW015", 7).unwrap();
        assert_eq!(
            msg,
            ModuleMessage::Firmware {
                addr: LcnAddr::module(7, 10),
                serial: "1AB20A1234".to_string(),
                manufacturer: 1,
                firmware_version: 0x190B11,
                hardware_type: 15,
            }
        );
    }

    #[test]
    fn output_and_bit_states() {
        assert_eq!(
            ModuleMessage::parse(":M000010A2050", 0),
            Some(ModuleMessage::Output {
                addr: LcnAddr::module(0, 10),
                output: 2,
                percent: 50.0
            })
        );
        assert_eq!(
            ModuleMessage::parse(":M000010O1101", 0),
            Some(ModuleMessage::Output {
                addr: LcnAddr::module(0, 10),
                output: 1,
                percent: 50.5
            })
        );
        assert_eq!(
            ModuleMessage::parse(":M000010Rx005", 0),
            Some(ModuleMessage::Relays {
                addr: LcnAddr::module(0, 10),
                states: 5
            })
        );
        assert_eq!(
            ModuleMessage::parse(":M000010Bx128", 0),
            Some(ModuleMessage::BinarySensors {
                addr: LcnAddr::module(0, 10),
                states: 128
            })
        );
    }

    #[test]
    fn variables() {
        assert_eq!(
            ModuleMessage::parse("%M000010.A00301234", 0),
            Some(ModuleMessage::Variable {
                addr: LcnAddr::module(0, 10),
                variable: Some(Variable::Var(3)),
                value: 1234
            })
        );
        assert_eq!(
            ModuleMessage::parse("%M000010.T2300100", 0),
            Some(ModuleMessage::Variable {
                addr: LcnAddr::module(0, 10),
                variable: Some(Variable::Threshold {
                    register: 2,
                    index: 3
                }),
                value: 100
            })
        );
        assert_eq!(
            ModuleMessage::parse("%M000010.00815", 0),
            Some(ModuleMessage::Variable {
                addr: LcnAddr::module(0, 10),
                variable: None,
                value: 815
            })
        );
    }

    #[test]
    fn leds_and_key_locks() {
        let msg = ModuleMessage::parse("=M000010.TLAEBFAAAAAAAANTVN", 0).unwrap();
        match msg {
            ModuleMessage::LedsAndLogicOps { leds, logic_ops, .. } => {
                assert_eq!(leds[1], LedState::On);
                assert_eq!(leds[2], LedState::Blink);
                assert_eq!(leds[3], LedState::Flicker);
                assert_eq!(logic_ops[1], LogicOpState::PartlyFulfilled);
                assert_eq!(logic_ops[2], LogicOpState::Fulfilled);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            ModuleMessage::parse("=M000010.TX001002003", 0),
            Some(ModuleMessage::KeyLocks {
                addr: LcnAddr::module(0, 10),
                tables: [1, 2, 3, 0]
            })
        );
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(ModuleMessage::parse("$io:#LCN:connected", 0), None);
        assert_eq!(ModuleMessage::parse("", 0), None);
        assert_eq!(ModuleMessage::parse("^ping1", 0), None);
    }

    #[test]
    fn addressed_command_round_trip() {
        let payload = Bytes::from_static(b"TX\xe4012");
        for (addr, wants_ack) in [
            (LcnAddr::module(5, 17), true),
            (LcnAddr::module(9, 250), false),
            (LcnAddr::group(3, 3), false),
        ] {
            let mut buf = BytesMut::new();
            SendData::pck(addr, wants_ack, payload.clone()).write(0, &mut buf);
            let line = latin1_to_string(&buf);
            let (decoded, ack, data) = parse_addressed_command(&line).unwrap();
            assert_eq!(decoded, addr);
            assert_eq!(ack, wants_ack);
            assert_eq!(data, payload);
        }
    }
}
