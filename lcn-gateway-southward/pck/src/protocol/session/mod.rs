pub mod offline;
pub mod state;
pub use offline::{OfflineQueue, PckQueueItem};
pub use state::{ConnectionState, StateContext, StateKind, StateMachine, StateTimer, TimerScope};

use super::{
    codec::PckCodec,
    error::{Error, Result},
    frame::{LcnAddr, LedState, ModuleMessage, SendData, Variable},
    module::{ModInfo, StatusCategory},
};
use crate::types::ConnectionSettings;
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};

/// Callbacks for the owner of a connection.
///
/// Invoked from the event loop task; implementations must not block.
pub trait ConnectionListener: Send + Sync {
    /// The bus is reachable and the segment is known.
    fn on_online(&self) {}

    /// The connection or the bus was lost.
    fn on_offline(&self, _reason: &str) {}

    /// Every line received from LCN-PCHK.
    fn on_pck_message(&self, _line: &str) {}

    /// A recognized module message, after the module cache was updated.
    fn on_module_message(&self, _addr: LcnAddr, _msg: &ModuleMessage) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

#[derive(Debug)]
enum Event {
    Queue {
        addr: LcnAddr,
        wants_ack: bool,
        data: Bytes,
    },
    Shutdown,
    Connected {
        generation: u64,
        stream: TcpStream,
    },
    ConnectFailed {
        generation: u64,
        error: Error,
    },
    Received {
        generation: u64,
        line: String,
    },
    IoFailed {
        generation: u64,
        error: Error,
    },
    Timer {
        epoch: u64,
        timer: StateTimer,
    },
}

/// Handle to a connection with LCN-PCHK.
///
/// Cheap to share; all protocol work happens on the [`ConnectionEventLoop`].
pub struct Connection {
    settings: ConnectionSettings,
    local_seg_id: Arc<AtomicI32>,
    modules: DashMap<LcnAddr, ModInfo>,
    listener: Arc<dyn ConnectionListener>,
    state_tx: watch::Sender<StateKind>,
    writer: ArcSwapOption<mpsc::UnboundedSender<SendData>>,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("settings", &self.settings)
            .field("local_seg_id", &self.local_seg_id())
            .field("modules", &self.modules.len())
            .field("state", &self.current_state())
            .finish()
    }
}

impl Connection {
    /// Creates the handle and the event loop driving it. Nothing happens on
    /// the network until the loop is spawned.
    pub fn create(
        settings: ConnectionSettings,
        listener: Arc<dyn ConnectionListener>,
    ) -> (Arc<Connection>, ConnectionEventLoop) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(StateKind::Init);
        let offline = OfflineQueue::new(settings.offline_max_age());
        let connection = Arc::new(Connection {
            settings,
            local_seg_id: Arc::new(AtomicI32::new(-1)),
            modules: DashMap::new(),
            listener,
            state_tx,
            writer: ArcSwapOption::empty(),
            events_tx: events_tx.clone(),
        });
        let event_loop = ConnectionEventLoop {
            machine: StateMachine::new(),
            inner: LoopContext {
                connection: Arc::clone(&connection),
                offline,
                socket_generation: 0,
                socket_cancel: None,
                events_tx,
            },
            events_rx,
            cancel: CancellationToken::new(),
        };
        (connection, event_loop)
    }

    #[inline]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Segment id of the local bus, `None` until the segment scan finished.
    pub fn local_seg_id(&self) -> Option<i32> {
        match self.local_seg_id.load(Ordering::Acquire) {
            id if id < 0 => None,
            id => Some(id),
        }
    }

    /// Submits a PCK command. Commands submitted while offline are buffered
    /// and sent once the connection is up, unless they went stale.
    pub fn queue(&self, addr: LcnAddr, wants_ack: bool, data: impl Into<Bytes>) -> Result<()> {
        self.events_tx
            .send(Event::Queue {
                addr,
                wants_ack,
                data: data.into(),
            })
            .map_err(|_| Error::ErrShutdown)
    }

    /// Starts polling `category` of a module, creating its cache on first use.
    pub fn refresh(&self, addr: LcnAddr, category: StatusCategory) {
        let now = Instant::now();
        self.modules
            .entry(addr)
            .or_insert_with(|| ModInfo::new(addr, now))
            .refresh(category, now);
    }

    /// Postpones the next poll of `category` so the module can settle after a command.
    pub fn request_status_after_command(&self, addr: LcnAddr, category: StatusCategory) {
        if let Some(mut info) = self.modules.get_mut(&self.resolve(addr)) {
            info.request_status_after_command(category, Instant::now());
        }
    }

    /// Forgets a module together with its pending commands.
    pub fn remove_module(&self, addr: LcnAddr) -> bool {
        self.modules.remove(&addr).is_some()
    }

    pub fn is_module_known(&self, addr: LcnAddr) -> bool {
        self.modules.contains_key(&self.resolve(addr))
    }

    /// Maps `addr` to the key its cache is stored under. A module on the
    /// local bus may be registered with segment 0 or with the local segment
    /// id; once that id is known both spellings reach the same entry.
    fn resolve(&self, addr: LcnAddr) -> LcnAddr {
        if addr.is_group || self.modules.contains_key(&addr) {
            return addr;
        }
        let Some(local) = self.local_seg_id() else {
            return addr;
        };
        let alias = if addr.segment_id == 0 {
            LcnAddr::module(local, addr.id)
        } else if addr.segment_id == local {
            LcnAddr::module(0, addr.id)
        } else {
            return addr;
        };
        if self.modules.contains_key(&alias) {
            alias
        } else {
            addr
        }
    }

    pub fn firmware_version(&self, addr: LcnAddr) -> Option<u32> {
        self.modules.get(&self.resolve(addr))?.firmware_version()
    }

    pub fn serial(&self, addr: LcnAddr) -> Option<String> {
        self.modules.get(&self.resolve(addr))?.serial().map(str::to_string)
    }

    /// Commands of a module waiting for an acknowledgment, in-flight one included.
    pub fn pending_acks(&self, addr: LcnAddr) -> usize {
        self.modules.get(&self.resolve(addr)).map_or(0, |info| info.pending_acks())
    }

    pub fn variable_value(&self, addr: LcnAddr, variable: Variable) -> Option<i64> {
        self.modules.get(&self.resolve(addr))?.variable_value(variable)
    }

    pub fn output_percent(&self, addr: LcnAddr, output: usize) -> Option<f64> {
        self.modules.get(&self.resolve(addr))?.output_percent(output)
    }

    pub fn relay(&self, addr: LcnAddr, relay: usize) -> Option<bool> {
        self.modules.get(&self.resolve(addr))?.relay(relay)
    }

    pub fn binary_sensor(&self, addr: LcnAddr, sensor: usize) -> Option<bool> {
        self.modules.get(&self.resolve(addr))?.binary_sensor(sensor)
    }

    pub fn led(&self, addr: LcnAddr, led: usize) -> Option<LedState> {
        self.modules.get(&self.resolve(addr))?.led(led)
    }

    pub fn key_locked(&self, addr: LcnAddr, table: usize, key: usize) -> Option<bool> {
        self.modules.get(&self.resolve(addr))?.key_locked(table, key)
    }

    /// Closes the socket for good. The event loop ends after processing it.
    pub fn shutdown(&self) {
        let _ = self.events_tx.send(Event::Shutdown);
    }

    pub fn current_state(&self) -> StateKind {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StateKind> {
        self.state_tx.subscribe()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.current_state() == StateKind::Connected
    }

    /// Waits until the connection reaches `expected`. Returns false if the
    /// event loop is gone before that.
    pub async fn wait_for_state(&self, expected: StateKind) -> bool {
        let mut rx = self.subscribe_state();
        let reached = rx.wait_for(|s| *s == expected).await.is_ok();
        reached
    }
}

/// Owns the state machine and serializes every event touching it.
pub struct ConnectionEventLoop {
    machine: StateMachine,
    inner: LoopContext,
    events_rx: mpsc::UnboundedReceiver<Event>,
    cancel: CancellationToken,
}

impl ConnectionEventLoop {
    /// Token stopping the loop without the shutdown handshake.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        tracing::info!(
            host = %self.inner.connection.settings.host,
            port = self.inner.connection.settings.port,
            "Starting LCN-PCHK connection"
        );
        self.machine.start(&mut self.inner);
        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    self.machine.shutdown_finally(&mut self.inner);
                    break;
                }
                event = self.events_rx.recv() => {
                    let Some(event) = event else {
                        self.machine.shutdown_finally(&mut self.inner);
                        break;
                    };
                    self.handle_event(event);
                    if self.machine.is_shutdown() {
                        break;
                    }
                }
            }
        }
        tracing::info!("LCN-PCHK connection stopped");
    }

    fn handle_event(&mut self, event: Event) {
        let machine = &mut self.machine;
        let ctx = &mut self.inner;
        match event {
            Event::Queue {
                addr,
                wants_ack,
                data,
            } => machine.queue(ctx, addr, wants_ack, data),
            Event::Shutdown => machine.shutdown_finally(ctx),
            Event::Connected { generation, stream } => {
                if generation != ctx.socket_generation {
                    return;
                }
                tracing::info!(
                    host = %ctx.connection.settings.host,
                    port = ctx.connection.settings.port,
                    "Connected to LCN-PCHK"
                );
                ctx.attach(stream);
                machine.on_connected(ctx);
            }
            Event::ConnectFailed { generation, error } | Event::IoFailed { generation, error } => {
                if generation != ctx.socket_generation {
                    tracing::trace!(generation, error = %error, "Ignoring event of closed socket");
                    return;
                }
                machine.handle_connection_failed(ctx, &error);
            }
            Event::Received { generation, line } => {
                if generation != ctx.socket_generation {
                    return;
                }
                tracing::trace!(line = %line, "Received");
                machine.on_pck_message(ctx, &line);
                ctx.connection.listener.on_pck_message(&line);
                ctx.dispatch_module_message(&line);
            }
            Event::Timer { epoch, timer } => machine.on_timer(ctx, epoch, timer),
        }
    }
}

struct LoopContext {
    connection: Arc<Connection>,
    offline: OfflineQueue,
    socket_generation: u64,
    socket_cancel: Option<CancellationToken>,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl LoopContext {
    fn attach(&mut self, stream: TcpStream) {
        let Some(cancel) = self.socket_cancel.clone() else {
            return;
        };
        let generation = self.socket_generation;
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let local_seg_id = &self.connection.local_seg_id;
        tokio::spawn(read_loop(
            FramedRead::new(read_half, PckCodec::new(Arc::clone(local_seg_id))),
            generation,
            self.events_tx.clone(),
            cancel.child_token(),
        ));
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, PckCodec::new(Arc::clone(local_seg_id))),
            writer_rx,
            generation,
            self.events_tx.clone(),
            cancel.child_token(),
        ));
        self.connection.writer.store(Some(Arc::new(writer_tx)));
    }

    fn dispatch_module_message(&mut self, line: &str) {
        let local_seg_id = self.connection.local_seg_id.load(Ordering::Acquire);
        let Some(mut msg) = ModuleMessage::parse(line, local_seg_id) else {
            return;
        };
        let timeout = self.connection.settings.timeout();
        let now = Instant::now();
        let mut addr = msg.addr();
        let mut next = None;
        let mut known = false;
        if let Some(mut info) = self.connection.modules.get_mut(&addr) {
            known = true;
            next = info.handle_message(&mut msg, timeout, now);
        } else if addr.segment_id == local_seg_id.max(0) {
            // modules may have been registered with segment 0 for the local bus
            let local = LcnAddr::module(0, addr.id);
            if let Some(mut info) = self.connection.modules.get_mut(&local) {
                known = true;
                addr = local;
                next = info.handle_message(&mut msg, timeout, now);
            }
        }
        if !known {
            tracing::trace!(addr = %addr, "Message from untracked module");
        }
        if let Some(data) = next {
            self.queue_directly(data);
        }
        self.connection.listener.on_module_message(addr, &msg);
    }
}

impl StateContext for LoopContext {
    fn settings(&self) -> &ConnectionSettings {
        &self.connection.settings
    }

    fn connect(&mut self) {
        self.socket_generation += 1;
        let generation = self.socket_generation;
        let cancel = CancellationToken::new();
        self.socket_cancel = Some(cancel.clone());
        let host = self.connection.settings.host.clone();
        let port = self.connection.settings.port;
        let connect_timeout = self.connection.settings.connect_timeout();
        let events_tx = self.events_tx.clone();
        tracing::debug!(host = %host, port, generation, "Connecting to LCN-PCHK");
        tokio::spawn(async move {
            select! {
                _ = cancel.cancelled() => {}
                result = open_socket(&host, port, connect_timeout) => {
                    let event = match result {
                        Ok(stream) => Event::Connected { generation, stream },
                        Err(error) => Event::ConnectFailed { generation, error },
                    };
                    let _ = events_tx.send(event);
                }
            }
        });
    }

    fn close_socket(&mut self) {
        self.connection.writer.store(None);
        if let Some(cancel) = self.socket_cancel.take() {
            cancel.cancel();
            self.socket_generation += 1;
            tracing::debug!("Socket closed");
        }
    }

    fn clear_runtime_data(&mut self) {
        self.connection.local_seg_id.store(-1, Ordering::Release);
    }

    fn queue_directly(&mut self, data: SendData) {
        match self.connection.writer.load().as_ref() {
            Some(writer) => {
                tracing::trace!(data = %data, "Queued for sending");
                if writer.send(data).is_err() {
                    tracing::debug!("Writer task gone, dropping data");
                }
            }
            None => tracing::debug!(data = %data, "No socket, dropping data"),
        }
    }

    fn queue_with_ack(&mut self, addr: LcnAddr, data: Bytes) {
        let timeout = self.connection.settings.timeout();
        let now = Instant::now();
        let next = self
            .connection
            .modules
            .entry(addr)
            .or_insert_with(|| ModInfo::new(addr, now))
            .queue_pck_command_with_ack(data, timeout, now);
        if let Some(data) = next {
            self.queue_directly(data);
        }
    }

    fn queue_offline(&mut self, addr: LcnAddr, wants_ack: bool, data: Bytes) {
        tracing::debug!(addr = %addr, "Offline, buffering command");
        self.offline.push(addr, wants_ack, data, Instant::now());
    }

    fn take_offline_queue(&mut self) -> Vec<PckQueueItem> {
        self.offline.drain_fresh(Instant::now())
    }

    fn set_local_seg_id(&mut self, local_seg_id: i32) {
        tracing::info!(local_seg_id, "Local segment determined");
        self.connection
            .local_seg_id
            .store(local_seg_id, Ordering::Release);
    }

    fn update_mod_infos(&mut self) {
        let timeout = self.connection.settings.timeout();
        let now = Instant::now();
        let pending: Vec<SendData> = self
            .connection
            .modules
            .iter_mut()
            .filter_map(|mut info| info.value_mut().update(timeout, now))
            .collect();
        for data in pending {
            self.queue_directly(data);
        }
    }

    fn schedule(
        &mut self,
        scope: &TimerScope,
        timer: StateTimer,
        delay: Duration,
        period: Option<Duration>,
    ) {
        let events_tx = self.events_tx.clone();
        let token = scope.token.clone();
        let epoch = scope.epoch;
        tokio::spawn(async move {
            let mut wait = delay;
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = sleep(wait) => {
                        if events_tx.send(Event::Timer { epoch, timer }).is_err() {
                            break;
                        }
                    }
                }
                match period {
                    Some(period) => wait = period,
                    None => break,
                }
            }
        });
    }

    fn state_changed(&mut self, kind: StateKind) {
        self.connection.state_tx.send_replace(kind);
    }

    fn on_online(&mut self) {
        tracing::info!("LCN bus online");
        self.connection.listener.on_online();
    }

    fn on_offline(&mut self, reason: &str) {
        tracing::warn!(reason, "LCN bus offline");
        self.connection.listener.on_offline(reason);
    }
}

async fn open_socket(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::ErrConnectTimeout(connect_timeout.as_millis() as u64))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, PckCodec>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => break,
            frame = reader.next() => {
                let event = match frame {
                    Some(Ok(line)) => Event::Received { generation, line },
                    Some(Err(error)) => Event::IoFailed { generation, error },
                    None => Event::IoFailed { generation, error: Error::ErrConnectionClosed },
                };
                let failed = matches!(event, Event::IoFailed { .. });
                if events_tx.send(event).is_err() || failed {
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, PckCodec>,
    mut rx: mpsc::UnboundedReceiver<SendData>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => break,
            data = rx.recv() => {
                let Some(data) = data else { break };
                if let Err(error) = writer.send(data).await {
                    let _ = events_tx.send(Event::IoFailed { generation, error });
                    break;
                }
            }
        }
    }
    let _ = writer.close().await;
}
