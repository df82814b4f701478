//! Network controller interface and sandbox options
//!
//! The controller is initialized once, after every container has been
//! reconciled, with the sandboxes that still have a running container behind
//! them so it can re-attach instead of tearing them down.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::DaemonConfig;
use crate::container::ContainerRecord;

/// Sandbox ID -> options needed to re-attach it
pub type ActiveSandboxes = HashMap<String, SandboxOptions>;

/// Options to recreate a container's network sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOptions {
    pub container_id: String,
    pub hostname: String,
    pub domainname: String,
    pub use_host_network: bool,
    pub dns: Vec<IpAddr>,
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<(String, IpAddr)>,
}

impl SandboxOptions {
    /// Bare options for a container whose configuration couldn't be parsed
    pub fn bare(container_id: &str) -> Self {
        Self {
            container_id: container_id.to_string(),
            ..Default::default()
        }
    }
}

/// Build sandbox options from a container's configuration
pub fn build_sandbox_options(record: &ContainerRecord) -> Result<SandboxOptions, NetworkError> {
    let mut opts = SandboxOptions {
        container_id: record.id.clone(),
        hostname: record.config.hostname.clone(),
        domainname: record.config.domainname.clone(),
        use_host_network: record.host_config.network_mode.is_host(),
        dns_search: record.host_config.dns_search.clone(),
        ..Default::default()
    };

    for server in &record.host_config.dns {
        let addr = server
            .parse::<IpAddr>()
            .map_err(|_| NetworkError::InvalidDns(server.clone()))?;
        opts.dns.push(addr);
    }

    for entry in &record.host_config.extra_hosts {
        let (host, ip) = entry
            .split_once(':')
            .ok_or_else(|| NetworkError::InvalidExtraHost(entry.clone()))?;
        let addr = ip
            .parse::<IpAddr>()
            .map_err(|_| NetworkError::InvalidExtraHost(entry.clone()))?;
        if host.is_empty() {
            return Err(NetworkError::InvalidExtraHost(entry.clone()));
        }
        opts.extra_hosts.push((host.to_string(), addr));
    }

    Ok(opts)
}

#[async_trait]
pub trait NetworkController: Send + Sync {
    /// Initialize networking, keeping the given sandboxes alive
    async fn init(
        &self,
        config: &DaemonConfig,
        active: &ActiveSandboxes,
    ) -> Result<(), NetworkError>;

    async fn stop(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Invalid DNS server: {0}")]
    InvalidDns(String),

    #[error("Invalid extra host entry: {0}")]
    InvalidExtraHost(String),

    #[error("Network controller initialization failed: {0}")]
    Init(String),
}
