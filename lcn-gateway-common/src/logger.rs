use lcn_gateway_error::{GatewayError, GatewayResult};
use std::sync::{Arc, RwLock};
use tracing::{subscriber::set_global_default, Level};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    filter::DynFilterFn,
    fmt::{self},
    layer::SubscriberExt,
    Layer, Registry,
};

/// Console and daily rolling file output sharing one adjustable level.
pub struct Logger {
    level: Arc<RwLock<Level>>,
    _file_guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn new(level: Option<Level>) -> Self {
        Logger {
            level: Arc::new(RwLock::new(level.unwrap_or(Level::INFO))),
            _file_guard: None,
        }
    }

    /// Sets the new logging level. Takes effect for both outputs immediately.
    pub fn set_level(&self, new_level: Level) {
        if let Ok(mut level) = self.level.write() {
            *level = new_level;
        }
    }

    #[inline]
    pub fn level(&self) -> Level {
        current_level(&self.level)
    }

    /// Installs the global subscriber writing to stdout and to
    /// `<log_dir>/lcn-gateway.log.<date>`.
    pub fn initialize(&mut self, log_dir: &str) -> GatewayResult<()> {
        let file_appender = rolling::daily(log_dir, "lcn-gateway.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        self._file_guard = Some(guard);

        let console_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &current_level(&level))
        };
        let file_filter = {
            let level = Arc::clone(&self.level);
            DynFilterFn::new(move |metadata, _| metadata.level() <= &current_level(&level))
        };

        let console_layer = {
            #[cfg(debug_assertions)]
            let layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(true)
                .with_line_number(true);

            #[cfg(not(debug_assertions))]
            let layer = fmt::layer().with_writer(std::io::stdout);

            layer.with_filter(console_filter)
        };

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(file_filter);

        let subscriber = Registry::default().with(console_layer).with(file_layer);
        set_global_default(subscriber).map_err(|_| GatewayError::from("Failed to set logger"))?;
        Ok(())
    }
}

fn current_level(level: &RwLock<Level>) -> Level {
    level.read().map(|l| *l).unwrap_or(Level::INFO)
}
