//! Configuration record (§4.12, §6): realizes the "CLI surface" the core
//! consumes. Parsing from a config file or argv is out of scope (§1) —
//! callers (a binary, or a test) populate this struct directly.

use crate::serial::{Parity, SerialConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFacility {
    Disabled,
    Daemon,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub name: String,
    pub endpoint: EndpointConfig,
    pub logfile: Option<String>,
}

#[derive(Debug, Clone)]
pub enum EndpointConfig {
    Serial(SerialConfig),
    Telnet { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_port: u16,
    pub loopback_only: bool,
    pub keep_alive: bool,
    pub tcp_wrappers_enable: bool,
    pub zero_logs_on_start: bool,
    /// 0 disables the timestamp timer (§6).
    pub timestamp_interval_minutes: u32,
    /// Absolute path when set (§6).
    pub daemon_log_path: Option<String>,
    pub log_level: log::LevelFilter,
    pub reset_cmd: Option<String>,
    /// Seconds the watchdog allows a reset command to run before killing
    /// its process group (§4.9 `RESET_CMD_TIMEOUT`).
    pub reset_timeout_secs: u64,
    pub syslog_facility: SyslogFacility,
    pub consoles: Vec<ConsoleConfig>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), crate::error::ConsoledError> {
        if self.consoles.is_empty() {
            return Err(crate::error::ConsoledError::NoConsoles { name: "<in-process config>".into() });
        }
        for c in &self.consoles {
            if c.name.is_empty() {
                return Err(crate::error::ConsoledError::InvalidConsole {
                    name: c.name.clone(),
                    reason: "console name must not be empty".into(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_port: 7890,
            loopback_only: true,
            keep_alive: true,
            tcp_wrappers_enable: false,
            zero_logs_on_start: false,
            timestamp_interval_minutes: 0,
            daemon_log_path: None,
            log_level: log::LevelFilter::Info,
            reset_cmd: None,
            reset_timeout_secs: 30,
            syslog_facility: SyslogFacility::Disabled,
            consoles: Vec::new(),
        }
    }
}

/// Convenience constructor matching the original's default line
/// discipline, used by tests and the demo binary.
pub fn default_serial(name: &str, device: &str) -> ConsoleConfig {
    ConsoleConfig {
        name: name.to_string(),
        endpoint: EndpointConfig::Serial(SerialConfig {
            device: device.to_string(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
        }),
        logfile: None,
    }
}

pub fn default_telnet(name: &str, host: &str, port: u16) -> ConsoleConfig {
    ConsoleConfig {
        name: name.to_string(),
        endpoint: EndpointConfig::Telnet { host: host.to_string(), port },
        logfile: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_fails_validation() {
        let cfg = ServerConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_with_one_console_validates() {
        let mut cfg = ServerConfig::default();
        cfg.consoles.push(default_telnet("alpha", "127.0.0.1", 9999));
        assert!(cfg.validate().is_ok());
    }
}
