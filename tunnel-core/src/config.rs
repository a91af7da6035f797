//! Configuration types and utilities

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TunnelError;
use crate::Result;

/// Cipher used when the stored config has none
pub const DEFAULT_METHOD: &str = "chacha20-ietf-poly1305";

/// Address the proxy process listens on
pub const LOCAL_ADDRESS: &str = "127.0.0.1";

/// Port the proxy process listens on
pub const LOCAL_PORT: u16 = 1080;

/// Idle timeout handed to the proxy process
pub const IDLE_TIMEOUT_SECS: u64 = 300;

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

/// User-editable connection fields, exactly as entered or decoded.
///
/// Nothing here is validated; [`ConnectionConfig::validate`] produces the
/// [`SessionConfig`] the supervisor actually runs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default, deserialize_with = "port_from_text_or_number")]
    pub port: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_method")]
    pub method: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: String::new(),
            password: String::new(),
            method: default_method(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("password", &mask(&self.password))
            .field("method", &self.method)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(
        server: impl Into<String>,
        port: impl Into<String>,
        password: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port: port.into(),
            password: password.into(),
            method: method.into(),
        }
    }

    /// Trim surrounding whitespace from every field, the way entry fields
    /// are read before use.
    pub fn trimmed(&self) -> Self {
        Self {
            server: self.server.trim().to_string(),
            port: self.port.trim().to_string(),
            password: self.password.trim().to_string(),
            method: self.method.trim().to_string(),
        }
    }

    /// Check the fields and produce a runnable session config.
    ///
    /// The port must parse as an integer in `1..=65535`; server and password
    /// must be non-empty. A blank method falls back to [`DEFAULT_METHOD`].
    pub fn validate(&self) -> Result<SessionConfig> {
        let fields = self.trimmed();

        let port = match fields.port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                return Err(TunnelError::InvalidPort {
                    value: fields.port,
                })
            }
        };

        if fields.server.is_empty() {
            return Err(TunnelError::MissingCredential { field: "server" });
        }
        if fields.password.is_empty() {
            return Err(TunnelError::MissingCredential { field: "password" });
        }

        let method = if fields.method.is_empty() {
            default_method()
        } else {
            fields.method
        };

        Ok(SessionConfig {
            server: fields.server,
            port,
            password: fields.password,
            method,
        })
    }
}

/// A validated connection, ready to hand to the proxy process
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub server: String,
    pub port: u16,
    pub password: String,
    pub method: String,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("password", &mask(&self.password))
            .field("method", &self.method)
            .finish()
    }
}

impl SessionConfig {
    /// Translate into the proxy executable's own config format
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            server: self.server.clone(),
            server_port: self.port,
            password: self.password.clone(),
            method: self.method.clone(),
            local_address: LOCAL_ADDRESS.to_string(),
            local_port: LOCAL_PORT,
            timeout: IDLE_TIMEOUT_SECS,
        }
    }
}

/// On-disk config read by the proxy executable via `-c <file>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub server: String,
    pub server_port: u16,
    pub password: String,
    pub method: String,
    pub local_address: String,
    pub local_port: u16,
    pub timeout: u64,
}

/// Static client settings, fixed for the lifetime of a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Location of the proxy executable. Never looked up on `PATH`.
    pub proxy_binary: PathBuf,
    /// Where the transient process config is written on each connect
    pub process_config_path: PathBuf,
    /// Traffic sampling interval in milliseconds
    pub sample_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            proxy_binary: default_proxy_binary(),
            process_config_path: PathBuf::from("temp_ss_config.json"),
            sample_interval_ms: 1000,
        }
    }
}

impl ClientSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// `sslocal` next to the working directory, with the platform suffix
pub fn default_proxy_binary() -> PathBuf {
    let name = format!("sslocal{}", std::env::consts::EXE_SUFFIX);
    match std::env::current_dir() {
        Ok(dir) => dir.join(name),
        Err(_) => PathBuf::from(name),
    }
}

/// Replace every character of a secret with `*`
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortField {
    Text(String),
    Number(u64),
}

fn port_from_text_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match PortField::deserialize(deserializer)? {
        PortField::Text(text) => text,
        PortField::Number(number) => number.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: &str) -> ConnectionConfig {
        ConnectionConfig::new("1.2.3.4", port, "secret", DEFAULT_METHOD)
    }

    #[test]
    fn test_validate_accepts_port_range_bounds() {
        assert_eq!(config("1").validate().unwrap().port, 1);
        assert_eq!(config("65535").validate().unwrap().port, 65535);
        assert_eq!(config(" 8388 ").validate().unwrap().port, 8388);
    }

    #[test]
    fn test_validate_rejects_bad_ports() {
        for port in ["", "abc", "0", "65536", "-1", "80.5", "8388/extra"] {
            let err = config(port).validate().unwrap_err();
            assert!(
                matches!(err, TunnelError::InvalidPort { .. }),
                "port {:?} should be rejected, got {:?}",
                port,
                err
            );
        }
    }

    #[test]
    fn test_validate_requires_server_and_password() {
        let err = ConnectionConfig::new("  ", "8388", "pw", DEFAULT_METHOD)
            .validate()
            .unwrap_err();
        assert!(matches!(err, TunnelError::MissingCredential { field: "server" }));

        let err = ConnectionConfig::new("host", "8388", "", DEFAULT_METHOD)
            .validate()
            .unwrap_err();
        assert!(matches!(err, TunnelError::MissingCredential { field: "password" }));
    }

    #[test]
    fn test_port_checked_before_credentials() {
        let err = ConnectionConfig::new("", "abc", "", "").validate().unwrap_err();
        assert!(matches!(err, TunnelError::InvalidPort { .. }));
    }

    #[test]
    fn test_blank_method_uses_default() {
        let session = ConnectionConfig::new("host", "8388", "pw", " ")
            .validate()
            .unwrap();
        assert_eq!(session.method, DEFAULT_METHOD);
    }

    #[test]
    fn test_process_config_fixed_fields() {
        let process = config("8388").validate().unwrap().process_config();
        assert_eq!(process.server_port, 8388);
        assert_eq!(process.local_address, "127.0.0.1");
        assert_eq!(process.local_port, 1080);
        assert_eq!(process.timeout, 300);

        let json = serde_json::to_value(&process).unwrap();
        assert_eq!(json["server_port"], 8388);
        assert_eq!(json["local_port"], 1080);
        assert_eq!(json["method"], DEFAULT_METHOD);
    }

    #[test]
    fn test_deserialize_port_as_number_or_text() {
        let from_text: ConnectionConfig =
            serde_json::from_str(r#"{"server":"h","port":"8388","password":"p"}"#).unwrap();
        let from_number: ConnectionConfig =
            serde_json::from_str(r#"{"server":"h","port":8388,"password":"p"}"#).unwrap();
        assert_eq!(from_text, from_number);
        assert_eq!(from_text.method, DEFAULT_METHOD);
    }

    #[test]
    fn test_debug_masks_password() {
        let debug = format!("{:?}", config("8388"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("******"));
    }
}
