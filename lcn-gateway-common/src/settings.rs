use config::{Config, File};
use lcn_driver_pck::{ConnectionSettings, LcnAddr, StatusCategory, Variable};
use lcn_gateway_error::{GatewayError, GatewayResult};
use serde::{self, Deserialize};
use std::{ops::Deref, str::FromStr, sync::Arc};
use tracing::Level;

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    /// Loads `config_path` (any format known to `config`, extension optional)
    /// overlaid with `LCN__SECTION__KEY` environment variables.
    pub fn new(config_path: &str) -> GatewayResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("LCN")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        inner.validate()?;
        Ok(Self(Arc::new(inner)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    pub gateway: ConnectionSettings,
    #[serde(default)]
    pub modules: Vec<ModuleSettings>,
}

impl Inner {
    fn validate(&self) -> GatewayResult<()> {
        if self.gateway.host.trim().is_empty() {
            return Err(GatewayError::ConfigurationError(
                "gateway.host must not be empty".to_string(),
            ));
        }
        self.general.level()?;
        for module in &self.modules {
            module.categories()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// One of `trace`, `debug`, `info`, `warn`, `error`
    #[serde(default = "General::log_level_default")]
    pub log_level: String,
    /// Directory of the rolling log files
    #[serde(default = "General::log_dir_default")]
    pub log_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            log_level: General::log_level_default(),
            log_dir: General::log_dir_default(),
        }
    }
}

impl General {
    fn log_level_default() -> String {
        "info".into()
    }

    fn log_dir_default() -> String {
        "logs".into()
    }

    pub fn level(&self) -> GatewayResult<Level> {
        Level::from_str(self.log_level.trim()).map_err(|_| {
            GatewayError::ConfigurationError(format!("invalid log level: {}", self.log_level))
        })
    }
}

/// A module whose status is polled and cached.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleSettings {
    /// `0` for the segment the gateway is attached to
    #[serde(default)]
    pub segment_id: i32,
    pub id: i32,
    /// Outputs to poll, 1-based
    #[serde(default)]
    pub outputs: Vec<usize>,
    #[serde(default)]
    pub relays: bool,
    #[serde(default)]
    pub binary_sensors: bool,
    #[serde(default)]
    pub leds: bool,
    #[serde(default)]
    pub key_locks: bool,
    /// Variables to poll, e.g. `var1`, `setpoint2`, `threshold1.3`, `s0:1`
    #[serde(default)]
    pub variables: Vec<String>,
}

impl ModuleSettings {
    #[inline]
    pub fn addr(&self) -> LcnAddr {
        LcnAddr::module(self.segment_id, self.id)
    }

    /// Status categories this module asks for, in configuration order.
    pub fn categories(&self) -> GatewayResult<Vec<StatusCategory>> {
        let mut categories: Vec<StatusCategory> = self
            .outputs
            .iter()
            .map(|output| StatusCategory::Output(*output))
            .collect();
        let flags = [
            (self.relays, StatusCategory::Relays),
            (self.binary_sensors, StatusCategory::BinarySensors),
            (self.leds, StatusCategory::LedsAndLogicOps),
            (self.key_locks, StatusCategory::LockedKeys),
        ];
        categories.extend(flags.into_iter().filter(|(on, _)| *on).map(|(_, c)| c));
        for name in &self.variables {
            let variable = Variable::from_str(name).map_err(|e| {
                GatewayError::ConfigurationError(format!("module {}: {e}", self.addr()))
            })?;
            categories.push(StatusCategory::Variable(variable));
        }
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_gateway_and_modules() {
        let file = write_config(
            r#"
[general]
log_level = "debug"

[gateway]
host = "192.168.1.20"
username = "admin"
password = "secret"
reconnect_grace_ms = 2000

[[modules]]
id = 7
outputs = [1, 2]
relays = true
variables = ["var1", "setpoint2"]

[[modules]]
segment_id = 12
id = 40
key_locks = true
"#,
        );
        let settings = Settings::new(file.path().to_str().expect("utf-8 path")).expect("settings");
        assert_eq!(settings.general.level().expect("level"), Level::DEBUG);
        assert_eq!(settings.general.log_dir, "logs");
        assert_eq!(settings.gateway.host, "192.168.1.20");
        assert_eq!(settings.gateway.port, 4114);
        assert_eq!(settings.gateway.username, "admin");
        assert_eq!(settings.gateway.reconnect_grace_ms, 2000);
        assert_eq!(settings.gateway.timeout_ms, 3500);
        assert_eq!(settings.modules.len(), 2);

        let first = &settings.modules[0];
        assert_eq!(first.addr(), LcnAddr::module(0, 7));
        assert_eq!(
            first.categories().expect("categories"),
            [
                StatusCategory::Output(1),
                StatusCategory::Output(2),
                StatusCategory::Relays,
                StatusCategory::Variable(Variable::Var(1)),
                StatusCategory::Variable(Variable::Setpoint(2)),
            ]
        );
        assert_eq!(
            settings.modules[1].categories().expect("categories"),
            [StatusCategory::LockedKeys]
        );
    }

    #[test]
    fn rejects_unknown_variable() {
        let file = write_config(
            r#"
[gateway]
host = "lcn.local"

[[modules]]
id = 5
variables = ["var13"]
"#,
        );
        assert!(Settings::new(file.path().to_str().expect("utf-8 path")).is_err());
    }

    #[test]
    fn missing_gateway_section_is_an_error() {
        let file = write_config("[general]\nlog_level = \"info\"\n");
        assert!(Settings::new(file.path().to_str().expect("utf-8 path")).is_err());
    }
}
