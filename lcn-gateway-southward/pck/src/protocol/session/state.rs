use super::offline::PckQueueItem;
use crate::{
    protocol::{
        error::Error,
        frame::{
            generator, parser, LcnAddr, SendData, AUTH_PASSWORD, AUTH_USERNAME,
            INSUFFICIENT_LICENSES, LCNCONNSTATE_CONNECTED, LCNCONNSTATE_DISCONNECTED,
        },
        module::RequestStatus,
    },
    types::ConnectionSettings,
};
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval of the segment coupler scan
pub const SEGMENT_SCAN_INTERVAL: Duration = Duration::from_millis(500);
/// Scan requests sent before assuming there is no segment coupler
pub const SEGMENT_SCAN_TRIES: u32 = 3;
/// Interval of the per-module scheduler
pub const MOD_INFO_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Observable lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Init,
    Connecting,
    SendUsername,
    SendPassword,
    WaitForBusConnected,
    WaitForBusConnectedAfterDisconnected,
    SendOperatingMode,
    SegmentScan,
    Connected,
    GracePeriodBeforeReconnect,
    Shutdown,
}

/// Active protocol state together with its private data.
#[derive(Debug)]
pub enum ConnectionState {
    Init,
    Connecting,
    SendUsername,
    SendPassword,
    /// `legacy_timer_armed` is cleared by a disconnect notice.
    WaitForBusConnected { legacy_timer_armed: bool },
    WaitForBusConnectedAfterDisconnected,
    SendOperatingMode,
    SegmentScan { status: RequestStatus },
    Connected { ping_counter: u64 },
    GracePeriodBeforeReconnect,
    Shutdown,
}

impl ConnectionState {
    pub fn kind(&self) -> StateKind {
        match self {
            ConnectionState::Init => StateKind::Init,
            ConnectionState::Connecting => StateKind::Connecting,
            ConnectionState::SendUsername => StateKind::SendUsername,
            ConnectionState::SendPassword => StateKind::SendPassword,
            ConnectionState::WaitForBusConnected { .. } => StateKind::WaitForBusConnected,
            ConnectionState::WaitForBusConnectedAfterDisconnected => {
                StateKind::WaitForBusConnectedAfterDisconnected
            }
            ConnectionState::SendOperatingMode => StateKind::SendOperatingMode,
            ConnectionState::SegmentScan { .. } => StateKind::SegmentScan,
            ConnectionState::Connected { .. } => StateKind::Connected,
            ConnectionState::GracePeriodBeforeReconnect => StateKind::GracePeriodBeforeReconnect,
            ConnectionState::Shutdown => StateKind::Shutdown,
        }
    }
}

/// Timers a state may register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTimer {
    AuthTimeout,
    LegacyBusConnected,
    SegmentScan,
    KeepAlive,
    ModuleUpdate,
    Reconnect,
}

/// Lifetime of the timers of one state.
///
/// The token is cancelled when the state is left; the epoch lets the machine
/// discard expiries that were already in flight.
#[derive(Debug, Clone)]
pub struct TimerScope {
    pub epoch: u64,
    pub token: CancellationToken,
}

/// Side effects available to the states.
pub trait StateContext {
    fn settings(&self) -> &ConnectionSettings;
    /// Starts opening the socket; the outcome is reported back asynchronously.
    fn connect(&mut self);
    fn close_socket(&mut self);
    /// Forgets per-connection data such as the local segment id.
    fn clear_runtime_data(&mut self);
    /// Sends without consulting the state.
    fn queue_directly(&mut self, data: SendData);
    /// Hands a command to the acknowledgment FIFO of its module.
    fn queue_with_ack(&mut self, addr: LcnAddr, data: Bytes);
    fn queue_offline(&mut self, addr: LcnAddr, wants_ack: bool, data: Bytes);
    /// Empties the offline buffer, returning the items that are not stale.
    fn take_offline_queue(&mut self) -> Vec<PckQueueItem>;
    fn set_local_seg_id(&mut self, local_seg_id: i32);
    fn update_mod_infos(&mut self);
    /// Fires `timer` after `delay`, then every `period` if given, until the scope is cancelled.
    fn schedule(
        &mut self,
        scope: &TimerScope,
        timer: StateTimer,
        delay: Duration,
        period: Option<Duration>,
    );
    fn state_changed(&mut self, kind: StateKind);
    fn on_online(&mut self);
    fn on_offline(&mut self, reason: &str);
}

/// Drives the connection lifecycle.
///
/// Every transition cancels the timers of the state being left and starts a
/// new epoch before the next state's entry action runs.
#[derive(Debug)]
pub struct StateMachine {
    state: ConnectionState,
    epoch: u64,
    timers: CancellationToken,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Init,
            epoch: 0,
            timers: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        matches!(self.state, ConnectionState::Shutdown)
    }

    fn scope(&self) -> TimerScope {
        TimerScope {
            epoch: self.epoch,
            token: self.timers.clone(),
        }
    }

    /// Runs the entry action of the initial state.
    pub fn start<C: StateContext>(&mut self, ctx: &mut C) {
        if let ConnectionState::Init = self.state {
            ctx.state_changed(StateKind::Init);
            if let Some(next) = self.on_enter(ctx) {
                self.set_state(ctx, next);
            }
        }
    }

    fn set_state<C: StateContext>(&mut self, ctx: &mut C, next: ConnectionState) {
        let mut next = Some(next);
        while let Some(state) = next.take() {
            self.timers.cancel();
            self.timers = CancellationToken::new();
            self.epoch = self.epoch.wrapping_add(1);
            tracing::debug!(from = ?self.state.kind(), to = ?state.kind(), epoch = self.epoch, "State transition");
            self.state = state;
            ctx.state_changed(self.state.kind());
            next = self.on_enter(ctx);
        }
    }

    fn on_enter<C: StateContext>(&mut self, ctx: &mut C) -> Option<ConnectionState> {
        let scope = self.scope();
        let mut flush_offline = false;
        let next = match &mut self.state {
            ConnectionState::Init => Some(ConnectionState::Connecting),
            ConnectionState::Connecting => {
                ctx.close_socket();
                ctx.clear_runtime_data();
                ctx.connect();
                None
            }
            ConnectionState::SendUsername | ConnectionState::SendPassword => {
                let timeout = ctx.settings().auth_timeout();
                ctx.schedule(&scope, StateTimer::AuthTimeout, timeout, None);
                None
            }
            ConnectionState::WaitForBusConnected { .. } => {
                // LCN-PKE does not announce the bus; no disconnect notice means connected
                let timeout = ctx.settings().timeout();
                ctx.schedule(&scope, StateTimer::LegacyBusConnected, timeout, None);
                None
            }
            ConnectionState::WaitForBusConnectedAfterDisconnected => None,
            ConnectionState::SendOperatingMode => {
                let settings = ctx.settings();
                let mode = generator::set_operation_mode(settings.dim_mode, settings.status_mode);
                ctx.queue_directly(SendData::plain_text(mode));
                Some(ConnectionState::SegmentScan {
                    status: RequestStatus::new(None, SEGMENT_SCAN_TRIES, "Segment Scan"),
                })
            }
            ConnectionState::SegmentScan { status } => {
                status.refresh(Instant::now());
                ctx.schedule(
                    &scope,
                    StateTimer::SegmentScan,
                    Duration::ZERO,
                    Some(SEGMENT_SCAN_INTERVAL),
                );
                None
            }
            ConnectionState::Connected { .. } => {
                let ping_interval = ctx.settings().ping_interval();
                ctx.schedule(
                    &scope,
                    StateTimer::KeepAlive,
                    ping_interval,
                    Some(ping_interval),
                );
                ctx.schedule(
                    &scope,
                    StateTimer::ModuleUpdate,
                    Duration::ZERO,
                    Some(MOD_INFO_UPDATE_INTERVAL),
                );
                ctx.on_online();
                flush_offline = true;
                None
            }
            ConnectionState::GracePeriodBeforeReconnect => {
                ctx.close_socket();
                let grace = ctx.settings().reconnect_grace();
                ctx.schedule(&scope, StateTimer::Reconnect, grace, None);
                None
            }
            ConnectionState::Shutdown => {
                ctx.close_socket();
                None
            }
        };
        if flush_offline {
            let items = ctx.take_offline_queue();
            if !items.is_empty() {
                tracing::debug!(count = items.len(), "Sending commands queued while offline");
            }
            for item in items {
                self.queue(ctx, item.addr, item.wants_ack, item.data);
            }
        }
        next
    }

    /// The socket of the current connection attempt is open.
    pub fn on_connected<C: StateContext>(&mut self, ctx: &mut C) {
        if let ConnectionState::Connecting = self.state {
            self.set_state(ctx, ConnectionState::SendUsername);
        }
    }

    pub fn on_pck_message<C: StateContext>(&mut self, ctx: &mut C, line: &str) {
        let next = match &mut self.state {
            ConnectionState::SendUsername if line == AUTH_USERNAME => {
                let username = ctx.settings().username.clone();
                ctx.queue_directly(SendData::plain_text(username));
                Some(ConnectionState::SendPassword)
            }
            ConnectionState::SendPassword if line == AUTH_PASSWORD => {
                let password = ctx.settings().password.clone();
                ctx.queue_directly(SendData::plain_text(password));
                Some(ConnectionState::WaitForBusConnected {
                    legacy_timer_armed: true,
                })
            }
            ConnectionState::WaitForBusConnected { legacy_timer_armed } => match line {
                LCNCONNSTATE_DISCONNECTED => {
                    // stay until the bus comes up
                    *legacy_timer_armed = false;
                    ctx.on_offline("LCN bus not connected to LCN-PCHK");
                    None
                }
                LCNCONNSTATE_CONNECTED => Some(ConnectionState::SendOperatingMode),
                INSUFFICIENT_LICENSES => {
                    Some(fail(ctx, &Error::ErrInsufficientLicenses))
                }
                _ => None,
            },
            ConnectionState::WaitForBusConnectedAfterDisconnected => match line {
                LCNCONNSTATE_CONNECTED => Some(ConnectionState::SendOperatingMode),
                INSUFFICIENT_LICENSES => {
                    Some(fail(ctx, &Error::ErrInsufficientLicenses))
                }
                _ => None,
            },
            ConnectionState::SegmentScan { .. } => match parser::parse_segment_scan_reply(line) {
                // only the coupler of the local segment answers with segment 0
                Some((0, _, local_seg_id)) => {
                    ctx.set_local_seg_id(local_seg_id);
                    Some(ConnectionState::Connected { ping_counter: 0 })
                }
                _ => None,
            },
            ConnectionState::Connected { .. } => match line {
                LCNCONNSTATE_DISCONNECTED => {
                    ctx.on_offline("LCN bus not connected to LCN-PCHK");
                    Some(ConnectionState::WaitForBusConnectedAfterDisconnected)
                }
                INSUFFICIENT_LICENSES => {
                    Some(fail(ctx, &Error::ErrInsufficientLicenses))
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(next) = next {
            self.set_state(ctx, next);
        }
    }

    pub fn on_timer<C: StateContext>(&mut self, ctx: &mut C, epoch: u64, timer: StateTimer) {
        if epoch != self.epoch {
            tracing::trace!(?timer, epoch, current = self.epoch, "Ignoring stale timer");
            return;
        }
        let kind = self.state.kind();
        let next = match (&mut self.state, timer) {
            (
                ConnectionState::SendUsername | ConnectionState::SendPassword,
                StateTimer::AuthTimeout,
            ) => Some(fail(ctx, &Error::ErrNetworkTimeout(kind))),
            (
                ConnectionState::WaitForBusConnected {
                    legacy_timer_armed: true,
                },
                StateTimer::LegacyBusConnected,
            ) => Some(ConnectionState::SendOperatingMode),
            (ConnectionState::SegmentScan { status }, StateTimer::SegmentScan) => {
                let now = Instant::now();
                match status.should_send_next_request(ctx.settings().timeout(), now) {
                    Ok(true) => {
                        status.on_request_sent(now);
                        ctx.queue_directly(SendData::pck(
                            LcnAddr::group(3, 3),
                            false,
                            generator::segment_coupler_scan(),
                        ));
                        None
                    }
                    Ok(false) => None,
                    Err(_) => {
                        tracing::debug!("No segment coupler detected");
                        ctx.set_local_seg_id(0);
                        Some(ConnectionState::Connected { ping_counter: 0 })
                    }
                }
            }
            (ConnectionState::Connected { ping_counter }, StateTimer::KeepAlive) => {
                *ping_counter += 1;
                ctx.queue_directly(SendData::plain_text(generator::ping(*ping_counter)));
                None
            }
            (ConnectionState::Connected { .. }, StateTimer::ModuleUpdate) => {
                ctx.update_mod_infos();
                None
            }
            (ConnectionState::GracePeriodBeforeReconnect, StateTimer::Reconnect) => {
                Some(ConnectionState::Connecting)
            }
            _ => None,
        };
        if let Some(next) = next {
            self.set_state(ctx, next);
        }
    }

    /// Routes an I/O failure, timeout or rejection to the reconnect cycle.
    pub fn handle_connection_failed<C: StateContext>(&mut self, ctx: &mut C, error: &Error) {
        if self.is_shutdown() {
            return;
        }
        let next = fail(ctx, error);
        self.set_state(ctx, next);
    }

    /// Submits a command on behalf of the host.
    pub fn queue<C: StateContext>(&mut self, ctx: &mut C, addr: LcnAddr, wants_ack: bool, data: Bytes) {
        match self.state {
            ConnectionState::Connected { .. } => {
                if wants_ack && !addr.is_group {
                    ctx.queue_with_ack(addr, data);
                } else {
                    ctx.queue_directly(SendData::pck(addr, false, data));
                }
            }
            ConnectionState::Shutdown => {
                tracing::debug!(addr = %addr, "Dropping command, connection is shut down");
            }
            _ => ctx.queue_offline(addr, wants_ack, data),
        }
    }

    /// Terminates the connection for good.
    pub fn shutdown_finally<C: StateContext>(&mut self, ctx: &mut C) {
        if !self.is_shutdown() {
            self.set_state(ctx, ConnectionState::Shutdown);
        }
    }
}

fn fail<C: StateContext>(ctx: &mut C, error: &Error) -> ConnectionState {
    tracing::warn!(error = %error, "Connection failed");
    ctx.on_offline(&error.to_string());
    ConnectionState::GracePeriodBeforeReconnect
}
