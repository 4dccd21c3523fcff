use crate::{
    protocol::{
        error::{Error, Result},
        session::{Connection, ConnectionEventLoop, ConnectionListener, StateKind},
    },
    types::ConnectionSettings,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::Mutex, task::JoinHandle};

/// LCN-PCHK driver.
///
/// Owns one [`Connection`] and the task running its event loop. The connection
/// handle can be used before [`start`](Self::start); commands queued then are
/// buffered until the bus is reachable.
pub struct PckDriver {
    /// Shared connection handle.
    connection: Arc<Connection>,
    /// Event loop, consumed once in `start`.
    event_loop: Mutex<Option<ConnectionEventLoop>>,
    /// Running event loop task.
    task: Mutex<Option<JoinHandle<()>>>,
    /// Started flag to prevent duplicate `start` calls.
    started: AtomicBool,
    /// Set once `stop` ran.
    stopped: AtomicBool,
}

impl PckDriver {
    pub fn new(settings: ConnectionSettings, listener: Arc<dyn ConnectionListener>) -> Self {
        let (connection, event_loop) = Connection::create(settings, listener);
        Self {
            connection,
            event_loop: Mutex::new(Some(event_loop)),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawns the event loop. Subsequent calls are no-ops; a stopped driver
    /// cannot be started again.
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::ErrShutdown);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let event_loop = self.event_loop.lock().await.take().ok_or(Error::ErrShutdown)?;
        *self.task.lock().await = Some(event_loop.spawn());
        Ok(())
    }

    /// Shuts the connection down and waits for the event loop to finish.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connection.shutdown();
        // never started: dropping the loop closes nothing that is open
        self.event_loop.lock().await.take();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "LCN-PCHK event loop task failed");
            }
        }
        tracing::info!(state = ?self.connection.current_state(), "LCN-PCHK driver stopped");
    }

    /// Waits until the bus is reachable. Returns false if the connection
    /// stopped before that.
    pub async fn wait_online(&self) -> bool {
        self.connection.wait_for_state(StateKind::Connected).await
    }
}
