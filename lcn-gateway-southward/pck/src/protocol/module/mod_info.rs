use super::request_status::RequestStatus;
use crate::protocol::frame::{
    generator, latin1_to_string, LcnAddr, LedState, LogicOpState, ModuleMessage, SendData,
    Variable, KEY_TABLE_COUNT, LED_COUNT, LOGIC_OP_COUNT, OUTPUT_COUNT,
};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    time::Duration,
};
use tokio::time::Instant;

/// Tries per request before a quantity is considered unreachable
pub const NUM_TRIES: u32 = 3;
/// Refresh interval of values the module reports on change
pub const MAX_STATUS_EVENTBASED_VALUEAGE: Duration = Duration::from_secs(600);
/// Refresh interval of values that have to be polled
pub const MAX_STATUS_POLLED_VALUEAGE: Duration = Duration::from_secs(30);
/// Delay of the status request following a command
pub const STATUS_REQUEST_DELAY_AFTER_COMMAND: Duration = Duration::from_secs(2);

/// Group of values requested with one status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCategory {
    Firmware,
    /// 1-based output port
    Output(usize),
    Relays,
    BinarySensors,
    LedsAndLogicOps,
    LockedKeys,
    Variable(Variable),
}

/// Polling and acknowledgment state of one module.
#[derive(Debug)]
pub struct ModInfo {
    addr: LcnAddr,
    firmware_version: Option<u32>,
    serial: Option<String>,
    request_firmware_version: RequestStatus,
    request_status_outputs: [RequestStatus; OUTPUT_COUNT],
    request_status_relays: RequestStatus,
    request_status_bin_sensors: RequestStatus,
    request_status_leds_and_logic_ops: RequestStatus,
    request_status_locked_keys: RequestStatus,
    request_status_vars: BTreeMap<Variable, RequestStatus>,
    /// Variable whose answer will not name it; blocks other such requests.
    last_requested_var_without_type_in_response: Option<Variable>,
    variable_values: HashMap<Variable, i64>,
    outputs: [Option<f64>; OUTPUT_COUNT],
    relays: Option<u8>,
    bin_sensors: Option<u8>,
    leds: Option<[LedState; LED_COUNT]>,
    logic_ops: Option<[LogicOpState; LOGIC_OP_COUNT]>,
    locked_keys: Option<[u8; KEY_TABLE_COUNT]>,
    pck_commands_with_ack: VecDeque<Bytes>,
    request_current_pck_command_with_ack: RequestStatus,
}

impl ModInfo {
    /// Creates the module state. The firmware version is requested first.
    pub fn new(addr: LcnAddr, now: Instant) -> Self {
        let mut request_firmware_version = RequestStatus::new(None, NUM_TRIES, "Firmware Version");
        request_firmware_version.refresh(now);
        Self {
            addr,
            firmware_version: None,
            serial: None,
            request_firmware_version,
            request_status_outputs: std::array::from_fn(|i| {
                RequestStatus::new(
                    Some(MAX_STATUS_EVENTBASED_VALUEAGE),
                    NUM_TRIES,
                    format!("Output {}", i + 1),
                )
            }),
            request_status_relays: RequestStatus::new(
                Some(MAX_STATUS_EVENTBASED_VALUEAGE),
                NUM_TRIES,
                "Relays",
            ),
            request_status_bin_sensors: RequestStatus::new(
                Some(MAX_STATUS_EVENTBASED_VALUEAGE),
                NUM_TRIES,
                "Binary Sensors",
            ),
            request_status_leds_and_logic_ops: RequestStatus::new(
                Some(MAX_STATUS_POLLED_VALUEAGE),
                NUM_TRIES,
                "LEDs and Logic",
            ),
            request_status_locked_keys: RequestStatus::new(
                Some(MAX_STATUS_POLLED_VALUEAGE),
                NUM_TRIES,
                "Key Locks",
            ),
            request_status_vars: BTreeMap::new(),
            last_requested_var_without_type_in_response: None,
            variable_values: HashMap::new(),
            outputs: [None; OUTPUT_COUNT],
            relays: None,
            bin_sensors: None,
            leds: None,
            logic_ops: None,
            locked_keys: None,
            pck_commands_with_ack: VecDeque::new(),
            request_current_pck_command_with_ack: RequestStatus::new(
                None,
                NUM_TRIES,
                "Commands with Ack",
            ),
        }
    }

    #[inline]
    pub fn addr(&self) -> LcnAddr {
        self.addr
    }

    #[inline]
    pub fn firmware_version(&self) -> Option<u32> {
        self.firmware_version
    }

    #[inline]
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    #[inline]
    pub fn variable_value(&self, variable: Variable) -> Option<i64> {
        self.variable_values.get(&variable).copied()
    }

    /// `output` is 1-based.
    pub fn output_percent(&self, output: usize) -> Option<f64> {
        self.outputs.get(output.checked_sub(1)?).copied().flatten()
    }

    /// `relay` is 1-based.
    pub fn relay(&self, relay: usize) -> Option<bool> {
        bit(self.relays?, relay)
    }

    /// `sensor` is 1-based.
    pub fn binary_sensor(&self, sensor: usize) -> Option<bool> {
        bit(self.bin_sensors?, sensor)
    }

    /// `led` is 1-based.
    pub fn led(&self, led: usize) -> Option<LedState> {
        self.leds?.get(led.checked_sub(1)?).copied()
    }

    /// `logic_op` is 1-based.
    pub fn logic_op(&self, logic_op: usize) -> Option<LogicOpState> {
        self.logic_ops?.get(logic_op.checked_sub(1)?).copied()
    }

    /// `table` and `key` are 1-based.
    pub fn key_locked(&self, table: usize, key: usize) -> Option<bool> {
        let tables = self.locked_keys?;
        bit(*tables.get(table.checked_sub(1)?)?, key)
    }

    /// Number of commands waiting for an acknowledgment, in-flight one included.
    #[inline]
    pub fn pending_acks(&self) -> usize {
        self.pck_commands_with_ack.len()
    }

    /// Starts polling `category`, requesting it right away.
    pub fn refresh(&mut self, category: StatusCategory, now: Instant) {
        if let StatusCategory::Variable(variable) = category {
            self.request_status_vars
                .entry(variable)
                .or_insert_with(|| {
                    RequestStatus::new(
                        Some(MAX_STATUS_POLLED_VALUEAGE),
                        NUM_TRIES,
                        variable.to_string(),
                    )
                })
                .refresh(now);
            return;
        }
        let addr = self.addr;
        match self.status_mut(category) {
            Some(status) => status.refresh(now),
            None => tracing::debug!(addr = %addr, ?category, "Ignoring unknown status category"),
        }
    }

    /// Postpones the next poll of `category` so that it follows a command
    /// changing the value.
    pub fn request_status_after_command(&mut self, category: StatusCategory, now: Instant) {
        if let Some(status) = self.status_mut(category) {
            if status.is_active() && !status.is_pending() {
                status.next_request_in(STATUS_REQUEST_DELAY_AFTER_COMMAND, now);
            }
        }
    }

    fn status_mut(&mut self, category: StatusCategory) -> Option<&mut RequestStatus> {
        match category {
            StatusCategory::Firmware => Some(&mut self.request_firmware_version),
            StatusCategory::Output(output) => {
                self.request_status_outputs.get_mut(output.checked_sub(1)?)
            }
            StatusCategory::Relays => Some(&mut self.request_status_relays),
            StatusCategory::BinarySensors => Some(&mut self.request_status_bin_sensors),
            StatusCategory::LedsAndLogicOps => Some(&mut self.request_status_leds_and_logic_ops),
            StatusCategory::LockedKeys => Some(&mut self.request_status_locked_keys),
            StatusCategory::Variable(variable) => self.request_status_vars.get_mut(&variable),
        }
    }

    /// Picks the single request to send for this module in the current tick.
    pub fn update(&mut self, timeout: Duration, now: Instant) -> Option<SendData> {
        let addr = self.addr;
        if self.firmware_version.is_none() {
            if let Some(cmd) = poll(addr, &mut self.request_firmware_version, timeout, now, || {
                generator::request_serial().to_string()
            }) {
                return Some(cmd);
            }
        }

        for (i, status) in self.request_status_outputs.iter_mut().enumerate() {
            if let Some(cmd) = poll(addr, status, timeout, now, || {
                generator::request_output_status(i + 1)
            }) {
                return Some(cmd);
            }
        }

        let simple: [(&mut RequestStatus, &'static str); 4] = [
            (
                &mut self.request_status_relays,
                generator::request_relays_status(),
            ),
            (
                &mut self.request_status_bin_sensors,
                generator::request_binary_sensors_status(),
            ),
            (
                &mut self.request_status_leds_and_logic_ops,
                generator::request_leds_and_logic_ops(),
            ),
            (
                &mut self.request_status_locked_keys,
                generator::request_key_locks_status(),
            ),
        ];
        for (status, payload) in simple {
            if let Some(cmd) = poll(addr, status, timeout, now, || payload.to_string()) {
                return Some(cmd);
            }
        }

        if let Some(cmd) = self.poll_variables(timeout, now) {
            return Some(cmd);
        }

        self.try_process_next_command_with_ack(timeout, now)
    }

    fn poll_variables(&mut self, timeout: Duration, now: Instant) -> Option<SendData> {
        // variable requests depend on the firmware
        let firmware = self.firmware_version?;
        for (variable, status) in self.request_status_vars.iter_mut() {
            match status.should_send_next_request(timeout, now) {
                Ok(true) => {
                    let has_type = variable.has_type_in_response(firmware);
                    // only another outstanding typeless request blocks this one
                    if !has_type
                        && self
                            .last_requested_var_without_type_in_response
                            .is_some_and(|pending| pending != *variable)
                    {
                        continue;
                    }
                    match generator::request_var_status(*variable, firmware) {
                        Ok(payload) => {
                            status.on_request_sent(now);
                            if !has_type {
                                self.last_requested_var_without_type_in_response = Some(*variable);
                            }
                            return Some(SendData::pck(self.addr, false, payload));
                        }
                        Err(e) => {
                            tracing::warn!(addr = %self.addr, error = %e, "Cannot request variable");
                            status.reset();
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(addr = %self.addr, error = %e, "Module did not answer status request");
                    if self.last_requested_var_without_type_in_response == Some(*variable) {
                        self.last_requested_var_without_type_in_response = None;
                    }
                }
            }
        }
        None
    }

    /// Enqueues a command behind those already awaiting an acknowledgment.
    /// Returns the command to send when nothing was in flight.
    pub fn queue_pck_command_with_ack(
        &mut self,
        data: Bytes,
        timeout: Duration,
        now: Instant,
    ) -> Option<SendData> {
        self.pck_commands_with_ack.push_back(data);
        self.try_process_next_command_with_ack(timeout, now)
    }

    /// Completes the command in flight, if any, and returns the next one.
    pub fn on_ack(&mut self, code: Option<u16>, timeout: Duration, now: Instant) -> Option<SendData> {
        if !self.request_current_pck_command_with_ack.is_pending() {
            return None;
        }
        let command = self.pck_commands_with_ack.pop_front();
        self.request_current_pck_command_with_ack.reset();
        if let (Some(code), Some(command)) = (code, command) {
            tracing::warn!(
                addr = %self.addr,
                code,
                command = %latin1_to_string(&command),
                "Module rejected command"
            );
        }
        self.try_process_next_command_with_ack(timeout, now)
    }

    fn try_process_next_command_with_ack(
        &mut self,
        timeout: Duration,
        now: Instant,
    ) -> Option<SendData> {
        loop {
            let command = self.pck_commands_with_ack.front()?.clone();
            let status = &mut self.request_current_pck_command_with_ack;
            if !status.is_active() {
                status.refresh(now);
            }
            match status.should_send_next_request(timeout, now) {
                Ok(true) => {
                    status.on_request_sent(now);
                    return Some(SendData::pck(self.addr, true, command));
                }
                Ok(false) => return None,
                Err(e) => {
                    tracing::warn!(
                        addr = %self.addr,
                        error = %e,
                        command = %latin1_to_string(&command),
                        "Module did not acknowledge command"
                    );
                    self.pck_commands_with_ack.pop_front();
                    status.reset();
                }
            }
        }
    }

    /// Applies a status message of this module.
    ///
    /// A variable reported without its kind is attributed to the outstanding
    /// typeless request and `msg` is completed accordingly. Returns the next
    /// acknowledged command to send, if an acknowledgment freed the slot.
    pub fn handle_message(
        &mut self,
        msg: &mut ModuleMessage,
        timeout: Duration,
        now: Instant,
    ) -> Option<SendData> {
        match msg {
            ModuleMessage::Ack { code, .. } => return self.on_ack(*code, timeout, now),
            ModuleMessage::Firmware {
                serial,
                firmware_version,
                ..
            } => {
                self.firmware_version = Some(*firmware_version);
                self.serial = Some(serial.clone());
                self.request_firmware_version.on_response_received(now);
            }
            ModuleMessage::Output {
                output, percent, ..
            } => {
                if let Some(i) = output.checked_sub(1).filter(|i| *i < OUTPUT_COUNT) {
                    self.outputs[i] = Some(*percent);
                    self.request_status_outputs[i].on_response_received(now);
                }
            }
            ModuleMessage::Relays { states, .. } => {
                self.relays = Some(*states);
                self.request_status_relays.on_response_received(now);
            }
            ModuleMessage::BinarySensors { states, .. } => {
                self.bin_sensors = Some(*states);
                self.request_status_bin_sensors.on_response_received(now);
            }
            ModuleMessage::Variable {
                variable, value, ..
            } => {
                let Some(resolved) = variable.or(self.last_requested_var_without_type_in_response)
                else {
                    tracing::debug!(addr = %self.addr, value = *value, "Dropping variable value of unknown kind");
                    return None;
                };
                *variable = Some(resolved);
                self.variable_values.insert(resolved, *value);
                if let Some(status) = self.request_status_vars.get_mut(&resolved) {
                    status.on_response_received(now);
                }
                if self.last_requested_var_without_type_in_response == Some(resolved) {
                    self.last_requested_var_without_type_in_response = None;
                }
            }
            ModuleMessage::LedsAndLogicOps {
                leds, logic_ops, ..
            } => {
                self.leds = Some(*leds);
                self.logic_ops = Some(*logic_ops);
                self.request_status_leds_and_logic_ops
                    .on_response_received(now);
            }
            ModuleMessage::KeyLocks { tables, .. } => {
                self.locked_keys = Some(*tables);
                self.request_status_locked_keys.on_response_received(now);
            }
        }
        None
    }
}

fn poll(
    addr: LcnAddr,
    status: &mut RequestStatus,
    timeout: Duration,
    now: Instant,
    payload: impl FnOnce() -> String,
) -> Option<SendData> {
    match status.should_send_next_request(timeout, now) {
        Ok(true) => {
            status.on_request_sent(now);
            Some(SendData::pck(addr, false, payload()))
        }
        Ok(false) => None,
        Err(e) => {
            tracing::warn!(addr = %addr, error = %e, "Module did not answer status request");
            None
        }
    }
}

#[inline]
fn bit(states: u8, n: usize) -> Option<bool> {
    (1..=8)
        .contains(&n)
        .then(|| states & (1 << (n - 1)) != 0)
}
