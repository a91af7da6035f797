//! Scripted host environment shared by the integration tests

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use tunnel_core::{
    ChildExit, ClientSettings, HostEnvironment, NetCounters, ProxyChild, ProxyEndpoint,
    TunnelError,
};

/// Every call the controller made into the host, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Spawn { program: PathBuf, config: PathBuf },
    Terminate(u32),
    EnableProxy(String),
    DisableProxy,
    ReadCounters,
    HandOver(PathBuf),
}

#[derive(Debug, Default)]
struct Shared {
    calls: Vec<HostCall>,
    exit: Option<ChildExit>,
    counters: NetCounters,
}

#[derive(Debug, Default)]
pub struct MockHost {
    shared: Arc<Mutex<Shared>>,
    next_pid: u32,
    pub spawn_error: Option<io::ErrorKind>,
    pub proxy_fails: bool,
    pub terminate_fails: bool,
    /// Contents of the process config file at the moment of the last spawn
    pub spawned_config: Option<String>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            next_pid: 4000,
            ..Default::default()
        }
    }

    pub fn handle(&self) -> HostHandle {
        HostHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn record(&self, call: HostCall) {
        self.shared.lock().unwrap().calls.push(call);
    }
}

/// Lets a test inspect and script the host after the controller owns it
#[derive(Debug, Clone)]
pub struct HostHandle {
    shared: Arc<Mutex<Shared>>,
}

impl HostHandle {
    pub fn calls(&self) -> Vec<HostCall> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().unwrap().calls.clear();
    }

    pub fn set_counters(&self, bytes_sent: u64, bytes_received: u64) {
        self.shared.lock().unwrap().counters = NetCounters {
            bytes_sent,
            bytes_received,
        };
    }

    pub fn advance_counters(&self, sent: u64, received: u64) {
        let mut shared = self.shared.lock().unwrap();
        shared.counters.bytes_sent += sent;
        shared.counters.bytes_received += received;
    }

    /// Make the running child report an exit on the next poll
    pub fn exit_child(&self, code: Option<i32>) {
        self.shared.lock().unwrap().exit = Some(ChildExit { code });
    }
}

#[derive(Debug)]
struct MockChild {
    pid: u32,
    shared: Arc<Mutex<Shared>>,
    terminate_fails: bool,
}

impl ProxyChild for MockChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.shared
            .lock()
            .unwrap()
            .calls
            .push(HostCall::Terminate(self.pid));
        if self.terminate_fails {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        }
        Ok(())
    }

    fn try_exit(&mut self) -> io::Result<Option<ChildExit>> {
        Ok(self.shared.lock().unwrap().exit)
    }
}

impl HostEnvironment for MockHost {
    fn spawn_proxy(
        &mut self,
        program: &Path,
        config_path: &Path,
    ) -> io::Result<Box<dyn ProxyChild>> {
        self.record(HostCall::Spawn {
            program: program.to_path_buf(),
            config: config_path.to_path_buf(),
        });
        if let Some(kind) = self.spawn_error {
            return Err(io::Error::new(kind, "scripted spawn failure"));
        }
        self.spawned_config = fs::read_to_string(config_path).ok();
        self.shared.lock().unwrap().exit = None;
        self.next_pid += 1;
        Ok(Box::new(MockChild {
            pid: self.next_pid,
            shared: Arc::clone(&self.shared),
            terminate_fails: self.terminate_fails,
        }))
    }

    fn enable_system_proxy(&mut self, endpoint: &ProxyEndpoint) -> tunnel_core::Result<()> {
        self.record(HostCall::EnableProxy(endpoint.socks_setting()));
        if self.proxy_fails {
            return Err(TunnelError::host_config("access denied"));
        }
        Ok(())
    }

    fn disable_system_proxy(&mut self) -> tunnel_core::Result<()> {
        self.record(HostCall::DisableProxy);
        if self.proxy_fails {
            return Err(TunnelError::host_config("access denied"));
        }
        Ok(())
    }

    fn read_counters(&mut self) -> NetCounters {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(HostCall::ReadCounters);
        shared.counters
    }

    fn hand_over(&mut self, binary: &Path) -> io::Result<()> {
        self.record(HostCall::HandOver(binary.to_path_buf()));
        Ok(())
    }
}

/// Temp directory holding a fake proxy executable
pub struct Fixture {
    pub dir: TempDir,
    pub settings: ClientSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("sslocal");
        fs::write(&binary, b"#!/bin/sh\n").unwrap();
        let settings = ClientSettings {
            proxy_binary: binary,
            process_config_path: dir.path().join("temp_ss_config.json"),
            sample_interval_ms: 1000,
        };
        Self { dir, settings }
    }

    /// Settings pointing at an executable that does not exist
    pub fn without_binary() -> Self {
        let mut fixture = Self::new();
        fs::remove_file(&fixture.settings.proxy_binary).unwrap();
        fixture.settings.proxy_binary = fixture.dir.path().join("missing-sslocal");
        fixture
    }
}
