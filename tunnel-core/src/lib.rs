//! Tunnel Core Library
//!
//! This library provides the session core of a local SOCKS tunnel client:
//! share-link decoding, proxy process supervision, host proxy toggling and
//! traffic sampling, driven by a single session state machine.

/// Configuration types and utilities
pub mod config;

/// Error types for session operations
pub mod error;

pub mod controller;
pub mod host;
pub mod share_link;
pub mod store;
pub mod supervisor;
pub mod system_proxy;
pub mod traffic;

pub use config::{ClientSettings, ConnectionConfig, ProcessConfig, SessionConfig, DEFAULT_METHOD};
pub use controller::{SessionController, SessionState};
pub use error::TunnelError;
pub use host::{ChildExit, HostEnvironment, NetCounters, ProxyChild, SystemHost};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
pub use supervisor::{ProcessGuard, ProcessSupervisor};
pub use system_proxy::{ProxyEndpoint, SystemProxyToggle};
pub use traffic::{TrafficMonitor, TrafficRate, TrafficReading, TrafficSample};

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, TunnelError>;
