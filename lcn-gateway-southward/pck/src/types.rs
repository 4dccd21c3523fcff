use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Dimming range of the output ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimMode {
    Steps50,
    #[default]
    Steps200,
}

/// Format of output status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    Native,
    #[default]
    Percent,
}

/// Settings of one link to LCN-PCHK. Never mutated after the connection is created.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Gateway host name or address
    pub host: String,
    /// Gateway port, default 4114
    #[serde(default = "ConnectionSettings::default_port")]
    pub port: u16,
    #[serde(default = "ConnectionSettings::default_credential")]
    pub username: String,
    #[serde(default = "ConnectionSettings::default_credential")]
    pub password: String,
    #[serde(default)]
    pub dim_mode: DimMode,
    #[serde(default)]
    pub status_mode: StatusMode,
    /// Per-request timeout (ms), applies to every polled quantity and acknowledgment
    #[serde(default = "ConnectionSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// TCP connect timeout (ms)
    #[serde(default = "ConnectionSettings::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time allowed for each authentication prompt (ms)
    #[serde(default = "ConnectionSettings::default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    /// Delay between a connection failure and the next attempt (ms)
    #[serde(default = "ConnectionSettings::default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// Keep-alive interval (ms)
    #[serde(default = "ConnectionSettings::default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Commands queued while offline expire after `timeout_ms` times this factor
    #[serde(default = "ConnectionSettings::default_offline_max_age_factor")]
    pub offline_max_age_factor: u32,
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: Self::default_credential(),
            password: Self::default_credential(),
            dim_mode: DimMode::default(),
            status_mode: StatusMode::default(),
            timeout_ms: Self::default_timeout_ms(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            auth_timeout_ms: Self::default_auth_timeout_ms(),
            reconnect_grace_ms: Self::default_reconnect_grace_ms(),
            ping_interval_ms: Self::default_ping_interval_ms(),
            offline_max_age_factor: Self::default_offline_max_age_factor(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    #[inline]
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    #[inline]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Maximum age of a command waiting in the offline queue.
    #[inline]
    pub fn offline_max_age(&self) -> Duration {
        self.timeout() * self.offline_max_age_factor
    }

    fn default_port() -> u16 {
        4114
    }

    fn default_credential() -> String {
        "lcn".to_string()
    }

    fn default_timeout_ms() -> u64 {
        3_500
    }

    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    fn default_auth_timeout_ms() -> u64 {
        10_000
    }

    fn default_reconnect_grace_ms() -> u64 {
        5_000
    }

    fn default_ping_interval_ms() -> u64 {
        60_000
    }

    fn default_offline_max_age_factor() -> u32 {
        4
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("dim_mode", &self.dim_mode)
            .field("status_mode", &self.status_mode)
            .field("timeout_ms", &self.timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("auth_timeout_ms", &self.auth_timeout_ms)
            .field("reconnect_grace_ms", &self.reconnect_grace_ms)
            .field("ping_interval_ms", &self.ping_interval_ms)
            .field("offline_max_age_factor", &self.offline_max_age_factor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = ConnectionSettings::new("pchk.local", 4114);
        let b = ConnectionSettings::new("pchk.local", 4114);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_credentials("admin", "secret"));
    }

    #[test]
    fn debug_hides_password() {
        let s = ConnectionSettings::new("pchk.local", 4114).with_credentials("admin", "secret");
        assert!(!format!("{s:?}").contains("secret"));
    }

    #[test]
    fn offline_window_scales_with_timeout() {
        let mut s = ConnectionSettings::new("pchk.local", 4114);
        assert_eq!(s.offline_max_age(), Duration::from_millis(14_000));
        s.offline_max_age_factor = 2;
        s.timeout_ms = 100;
        assert_eq!(s.offline_max_age(), Duration::from_millis(200));
    }
}
