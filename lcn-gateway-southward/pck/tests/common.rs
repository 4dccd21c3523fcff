#![allow(dead_code)]

use anyhow::{anyhow, Context};
use lcn_driver_pck::{ConnectionListener, ConnectionSettings, LcnAddr, ModuleMessage};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, Once,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    time::{timeout, Duration},
};
use tracing::Level;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs the test subscriber once per test binary.
static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .with_test_writer()
            .try_init();
    });
}

/// Settings tuned for fast reconnects against a local fake gateway.
pub fn settings(port: u16) -> ConnectionSettings {
    let mut settings = ConnectionSettings::new("127.0.0.1", port).with_credentials("admin", "secret");
    settings.timeout_ms = 500;
    settings.connect_timeout_ms = 1_000;
    settings.auth_timeout_ms = 300;
    settings.reconnect_grace_ms = 100;
    settings
}

/// In-process stand-in for LCN-PCHK.
pub struct FakeGateway {
    listener: TcpListener,
}

impl FakeGateway {
    pub async fn bind() -> anyhow::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind("127.0.0.1:0").await?,
        })
    }

    pub fn port(&self) -> anyhow::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub async fn accept(&self) -> anyhow::Result<GatewaySession> {
        let (stream, _) = timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .context("no client connected")??;
        let (read_half, write_half) = stream.into_split();
        Ok(GatewaySession {
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
        })
    }
}

/// One client connection seen by the fake gateway.
pub struct GatewaySession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl GatewaySession {
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn next_line(&mut self) -> anyhow::Result<String> {
        timeout(STEP_TIMEOUT, self.lines.next_line())
            .await
            .context("no line from client")??
            .ok_or_else(|| anyhow!("client closed the connection"))
    }

    /// Reads lines until one equals `expected`, skipping status polls and pings.
    pub async fn expect(&mut self, expected: &str) -> anyhow::Result<()> {
        loop {
            let line = self.next_line().await?;
            if line == expected {
                return Ok(());
            }
            tracing::debug!(line = %line, expected, "Fake gateway skipped line");
        }
    }

    /// Plays the LCN-PCHK side of authentication, bus announcement and
    /// segment scan.
    pub async fn handshake(&mut self, local_seg_id: i32) -> anyhow::Result<()> {
        self.send("LCN-PCK/IP 1.0").await?;
        self.send("Username:").await?;
        self.expect("admin").await?;
        self.send("Password:").await?;
        self.expect("secret").await?;
        self.send("OK").await?;
        self.send("$io:#LCN:connected").await?;
        self.expect("!OM1P").await?;
        self.expect(">G003003.SK").await?;
        self.send(&format!("=M000{local_seg_id:03}.SK{local_seg_id}")).await?;
        Ok(())
    }
}

/// Listener recording every callback.
#[derive(Default)]
pub struct RecordingListener {
    pub online: AtomicUsize,
    pub offline: Mutex<Vec<String>>,
    pub lines: Mutex<Vec<String>>,
    pub module_messages: Mutex<Vec<(LcnAddr, ModuleMessage)>>,
}

impl RecordingListener {
    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    pub fn offline_reasons(&self) -> Vec<String> {
        self.offline.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn module_messages(&self) -> Vec<(LcnAddr, ModuleMessage)> {
        self.module_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl ConnectionListener for RecordingListener {
    fn on_online(&self) {
        self.online.fetch_add(1, Ordering::SeqCst);
    }

    fn on_offline(&self, reason: &str) {
        if let Ok(mut reasons) = self.offline.lock() {
            reasons.push(reason.to_string());
        }
    }

    fn on_pck_message(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }

    fn on_module_message(&self, addr: LcnAddr, msg: &ModuleMessage) {
        if let Ok(mut messages) = self.module_messages.lock() {
            messages.push((addr, msg.clone()));
        }
    }
}

/// Polls `check` until it holds or the step timeout elapses.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for {what}"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}
