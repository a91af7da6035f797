//! Host-wide proxy routing
//!
//! [`SystemProxyToggle`] points the host's proxy setting at the local SOCKS
//! endpoint while a session is connected. Every host call is best-effort:
//! failures come back as [`TunnelError::HostConfigFailed`] for reporting and
//! never block a state transition.

use std::fmt;

use tracing::{info, warn};

use crate::config::LOCAL_ADDRESS;
use crate::error::TunnelError;
use crate::host::HostEnvironment;
use crate::Result;

/// Local SOCKS endpoint the host is pointed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub address: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn local(port: u16) -> Self {
        Self {
            address: LOCAL_ADDRESS.to_string(),
            port,
        }
    }

    /// Value for the host proxy setting, e.g. `socks=127.0.0.1:1080`
    pub fn socks_setting(&self) -> String {
        format!("socks={}:{}", self.address, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Tracks whether this controller turned host proxying on
#[derive(Debug, Default)]
pub struct SystemProxyToggle {
    active: Option<ProxyEndpoint>,
}

impl SystemProxyToggle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.active.as_ref()
    }

    /// Point the host at `127.0.0.1:local_port`.
    ///
    /// Proxying is marked active even when the host refuses, so the
    /// matching `disable` always runs.
    pub fn enable<H>(&mut self, host: &mut H, local_port: u16) -> Result<()>
    where
        H: HostEnvironment + ?Sized,
    {
        let endpoint = ProxyEndpoint::local(local_port);
        let result = host.enable_system_proxy(&endpoint);
        match &result {
            Ok(()) => info!("System proxy enabled: {}", endpoint.socks_setting()),
            Err(e) => warn!("Failed to enable system proxy ({}): {}", endpoint, e),
        }
        self.active = Some(endpoint);
        result
    }

    /// Restore the non-proxied state. No-op when not active.
    pub fn disable<H>(&mut self, host: &mut H) -> Result<()>
    where
        H: HostEnvironment + ?Sized,
    {
        if self.active.take().is_none() {
            return Ok(());
        }
        let result = host.disable_system_proxy();
        match &result {
            Ok(()) => info!("System proxy disabled"),
            Err(e) => warn!("Failed to disable system proxy: {}", e),
        }
        result
    }
}

fn command_failure(program: &str, output: &std::process::Output) -> TunnelError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    TunnelError::host_config(format!(
        "{} exited with {}: {}",
        program,
        output.status,
        stderr.trim()
    ))
}

fn run(program: &str, args: &[&str]) -> Result<std::process::Output> {
    let output = std::process::Command::new(program)
        .args(args)
        .output()
        .map_err(|e| TunnelError::host_config(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(command_failure(program, &output));
    }
    Ok(output)
}

/// Platform backends used by [`crate::host::SystemHost`]
#[cfg(target_os = "windows")]
pub mod platform {
    use super::{run, ProxyEndpoint};
    use crate::Result;

    const INTERNET_SETTINGS: &str =
        r"HKCU\Software\Microsoft\Windows\CurrentVersion\Internet Settings";

    fn set_value(name: &str, kind: &str, data: &str) -> Result<()> {
        run(
            "reg",
            &["add", INTERNET_SETTINGS, "/v", name, "/t", kind, "/d", data, "/f"],
        )?;
        Ok(())
    }

    pub fn enable(endpoint: &ProxyEndpoint) -> Result<()> {
        set_value("ProxyEnable", "REG_DWORD", "1")?;
        set_value("ProxyServer", "REG_SZ", &endpoint.socks_setting())
    }

    pub fn disable() -> Result<()> {
        set_value("ProxyEnable", "REG_DWORD", "0")
    }
}

/// Platform backends used by [`crate::host::SystemHost`]
#[cfg(target_os = "linux")]
pub mod platform {
    use super::{run, ProxyEndpoint};
    use crate::Result;

    fn gsettings_set(schema: &str, key: &str, value: &str) -> Result<()> {
        run("gsettings", &["set", schema, key, value])?;
        Ok(())
    }

    pub fn enable(endpoint: &ProxyEndpoint) -> Result<()> {
        gsettings_set("org.gnome.system.proxy.socks", "host", &endpoint.address)?;
        gsettings_set(
            "org.gnome.system.proxy.socks",
            "port",
            &endpoint.port.to_string(),
        )?;
        gsettings_set("org.gnome.system.proxy", "mode", "manual")
    }

    pub fn disable() -> Result<()> {
        gsettings_set("org.gnome.system.proxy", "mode", "none")
    }
}

/// Platform backends used by [`crate::host::SystemHost`]
#[cfg(target_os = "macos")]
pub mod platform {
    use super::{run, ProxyEndpoint};
    use crate::error::TunnelError;
    use crate::Result;

    /// Enabled network services; disabled ones are prefixed with `*`
    fn network_services() -> Result<Vec<String>> {
        let output = run("networksetup", &["-listallnetworkservices"])?;
        let services: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .skip(1)
            .filter(|line| !line.is_empty() && !line.starts_with('*'))
            .map(str::to_string)
            .collect();
        if services.is_empty() {
            return Err(TunnelError::host_config("no enabled network services"));
        }
        Ok(services)
    }

    pub fn enable(endpoint: &ProxyEndpoint) -> Result<()> {
        let port = endpoint.port.to_string();
        for service in network_services()? {
            run(
                "networksetup",
                &["-setsocksfirewallproxy", &service, &endpoint.address, &port],
            )?;
            run(
                "networksetup",
                &["-setsocksfirewallproxystate", &service, "on"],
            )?;
        }
        Ok(())
    }

    pub fn disable() -> Result<()> {
        for service in network_services()? {
            run(
                "networksetup",
                &["-setsocksfirewallproxystate", &service, "off"],
            )?;
        }
        Ok(())
    }
}

/// Platform backends used by [`crate::host::SystemHost`]
#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
pub mod platform {
    use super::ProxyEndpoint;
    use crate::error::TunnelError;
    use crate::Result;

    pub fn enable(_endpoint: &ProxyEndpoint) -> Result<()> {
        Err(TunnelError::host_config("system proxy not supported on this platform"))
    }

    pub fn disable() -> Result<()> {
        Err(TunnelError::host_config("system proxy not supported on this platform"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks_setting_format() {
        let endpoint = ProxyEndpoint::local(1080);
        assert_eq!(endpoint.socks_setting(), "socks=127.0.0.1:1080");
        assert_eq!(endpoint.to_string(), "127.0.0.1:1080");
    }
}
