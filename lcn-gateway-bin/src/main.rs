use clap::Parser;
use lcn_driver_pck::{ConnectionListener, LcnAddr, ModuleMessage, PckDriver};
use lcn_gateway_common::{Logger, Settings};
use lcn_gateway_error::{GatewayError, GatewayResult};
use std::{env::current_dir, path::PathBuf, sync::Arc};
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE_NAME: &str = "lcn-gateway.toml";

/// LCN gateway client
///
/// Keeps a connection to LCN-PCHK alive and caches the status of the
/// configured modules.
#[derive(Parser)]
#[command(name = "lcn-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LCN-PCHK client", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, the gateway looks for 'lcn-gateway.toml'
    /// in the current working directory.
    #[arg(short, long, env = "LCN_CONFIG")]
    config: Option<PathBuf>,
}

/// Logs bus state changes and module status.
struct LoggingListener;

impl ConnectionListener for LoggingListener {
    fn on_online(&self) {
        info!("LCN bus is online");
    }

    fn on_offline(&self, reason: &str) {
        warn!(reason, "LCN bus is offline");
    }

    fn on_module_message(&self, addr: LcnAddr, msg: &ModuleMessage) {
        info!(addr = %addr, ?msg, "Module status");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> GatewayResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => {
            let dir = current_dir().map_err(|e| {
                GatewayError::from(format!("Failed to get current directory: {e}"))
            })?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };
    let settings = Settings::new(&config_path.to_string_lossy())?;

    let mut logger = Logger::new(Some(settings.general.level()?));
    logger.initialize(&settings.general.log_dir)?;

    let driver = PckDriver::new(settings.gateway.clone(), Arc::new(LoggingListener));
    let connection = driver.connection();
    for module in &settings.modules {
        for category in module.categories()? {
            connection.refresh(module.addr(), category);
        }
    }
    info!(
        modules = settings.modules.len(),
        config = %config_path.display(),
        "Starting LCN gateway"
    );
    driver.start().await?;

    wait_for_shutdown_signal().await?;

    info!("Shutting down");
    driver.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> GatewayResult<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
        _ = sigint.recv() => info!("Received SIGINT signal"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> GatewayResult<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c signal");
    Ok(())
}
