//! Builders for outbound PCK payloads.

use super::{LcnAddr, Variable, FIRMWARE_TYPED_VARIABLES};
use crate::{
    protocol::error::{Error, Result},
    types::{DimMode, StatusMode},
};

/// Header preceding every addressed command, e.g. `>M000005!`.
pub fn address_header(addr: &LcnAddr, local_seg_id: i32, wants_ack: bool) -> String {
    format!(
        ">{}{:03}{:03}{}",
        if addr.is_group { "G" } else { "M" },
        addr.physical_segment_id(local_seg_id),
        addr.id,
        if wants_ack { "!" } else { "." }
    )
}

/// Selects dimming range and output status format for this connection.
pub fn set_operation_mode(dim_mode: DimMode, status_mode: StatusMode) -> String {
    format!(
        "!OM{}{}",
        match dim_mode {
            DimMode::Steps200 => "1",
            DimMode::Steps50 => "0",
        },
        match status_mode {
            StatusMode::Percent => "P",
            StatusMode::Native => "N",
        }
    )
}

/// Keep-alive line. LCN-PCHK closes idle connections.
pub fn ping(counter: u64) -> String {
    format!("^ping{counter}")
}

/// Asks segment couplers for their segment id. Sent to group 3 in segment 3.
pub fn segment_coupler_scan() -> &'static str {
    "SK"
}

pub fn request_serial() -> &'static str {
    "SN"
}

/// `output` is 1-based.
pub fn request_output_status(output: usize) -> String {
    format!("SMA{output}")
}

pub fn request_relays_status() -> &'static str {
    "SMR"
}

pub fn request_binary_sensors_status() -> &'static str {
    "SMB"
}

pub fn request_leds_and_logic_ops() -> &'static str {
    "SMT"
}

pub fn request_key_locks_status() -> &'static str {
    "STX"
}

pub fn request_var_status(variable: Variable, firmware_version: u32) -> Result<String> {
    if firmware_version >= FIRMWARE_TYPED_VARIABLES {
        return Ok(match variable {
            Variable::Var(n) => format!("MWT{n:03}"),
            Variable::Setpoint(n) => format!("MWS{n:03}"),
            // one request answers all thresholds of a register
            Variable::Threshold { register, .. } => format!("SE{register:03}"),
            Variable::S0Input(n) => format!("MWC{n:03}"),
        });
    }
    match variable {
        Variable::Var(1) => Ok("MWV".to_string()),
        Variable::Var(2) => Ok("MWTA".to_string()),
        Variable::Var(3) => Ok("MWTB".to_string()),
        Variable::Setpoint(1) => Ok("MWSA".to_string()),
        Variable::Setpoint(2) => Ok("MWSB".to_string()),
        Variable::Threshold { register: 1, .. } => Ok("SL1".to_string()),
        _ => Err(Error::ErrUnsupportedVariable {
            variable,
            firmware: firmware_version,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_mode() {
        assert_eq!(
            set_operation_mode(DimMode::Steps200, StatusMode::Percent),
            "!OM1P"
        );
        assert_eq!(set_operation_mode(DimMode::Steps50, StatusMode::Native), "!OM0N");
    }

    #[test]
    fn header_flags() {
        assert_eq!(
            address_header(&LcnAddr::module(4, 12), -1, false),
            ">M004012."
        );
        assert_eq!(address_header(&LcnAddr::module(4, 12), 4, true), ">M000012!");
        assert_eq!(address_header(&LcnAddr::group(0, 3), 4, false), ">G000003.");
    }

    #[test]
    fn variable_requests_follow_firmware() {
        let new = FIRMWARE_TYPED_VARIABLES;
        assert_eq!(request_var_status(Variable::Var(5), new).unwrap(), "MWT005");
        assert_eq!(
            request_var_status(
                Variable::Threshold {
                    register: 2,
                    index: 3
                },
                new
            )
            .unwrap(),
            "SE002"
        );
        assert_eq!(request_var_status(Variable::Var(2), 0x150000).unwrap(), "MWTA");
        assert!(matches!(
            request_var_status(Variable::S0Input(1), 0x150000),
            Err(Error::ErrUnsupportedVariable { .. })
        ));
    }

    #[test]
    fn status_requests() {
        assert_eq!(request_output_status(3), "SMA3");
        assert_eq!(ping(42), "^ping42");
    }
}
