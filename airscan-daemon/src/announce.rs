//! mDNS/DNS-SD announcement of shared scanners.
//!
//! [`MdnsPublisher`] owns one `mdns-sd` responder daemon for the whole
//! process. Each published scanner gets an [`MdnsAnnouncement`] handle that
//! the registry withdraws on reload or shutdown.

use std::sync::Arc;

use airscan_escl::{Announcement, EsclError, ServiceDescription, ServicePublisher};
use anyhow::Result;
use mdns_sd::{IfKind, ServiceDaemon, ServiceInfo};

const MDNS_DOMAIN: &str = "local.";
const DEFAULT_HOST: &str = "airscan";

/// Publishes scanners through an `mdns-sd` responder.
pub struct MdnsPublisher {
    daemon: Arc<ServiceDaemon>,
    host_name: String,
    port: u16,
}

impl MdnsPublisher {
    /// Starts the responder. A non-empty `interface` restricts announcements
    /// to that network interface.
    pub fn new(interface: &str, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| anyhow::anyhow!("failed to start mDNS responder: {}", e))?;

        if !interface.is_empty() {
            daemon
                .disable_interface(IfKind::All)
                .and_then(|()| daemon.enable_interface(IfKind::Name(interface.to_owned())))
                .map_err(|e| {
                    anyhow::anyhow!("failed to restrict mDNS to interface {}: {}", interface, e)
                })?;
            tracing::info!(interface = interface, "mDNS announcements restricted");
        }

        Ok(Self {
            daemon: Arc::new(daemon),
            host_name: format!("{}.{}", local_host_name(), MDNS_DOMAIN),
            port,
        })
    }

    /// Stops the responder. Outstanding announcements should be withdrawn first.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!(error = %e, "mDNS responder shutdown failed");
        }
    }
}

impl ServicePublisher for MdnsPublisher {
    fn publish(&self, service: &ServiceDescription) -> Result<Box<dyn Announcement>, EsclError> {
        let service_type = format!("{}{}", service.service_type, MDNS_DOMAIN);
        let txt: Vec<(&str, &str)> = service
            .txt
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let info = ServiceInfo::new(
            &service_type,
            &service.instance_name,
            &self.host_name,
            "",
            self.port,
            &txt[..],
        )
        .map_err(|e| EsclError::Announce(e.to_string()))?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_owned();
        self.daemon
            .register(info)
            .map_err(|e| EsclError::Announce(e.to_string()))?;
        tracing::debug!(fullname = %fullname, port = self.port, "mDNS service registered");

        Ok(Box::new(MdnsAnnouncement {
            daemon: Arc::clone(&self.daemon),
            name: service.instance_name.clone(),
            fullname,
            withdrawn: false,
        }))
    }
}

/// One registered service instance.
pub struct MdnsAnnouncement {
    daemon: Arc<ServiceDaemon>,
    name: String,
    fullname: String,
    withdrawn: bool,
}

impl Announcement for MdnsAnnouncement {
    fn name(&self) -> &str {
        &self.name
    }

    fn withdraw(&mut self) {
        if self.withdrawn {
            return;
        }
        self.withdrawn = true;
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            tracing::warn!(fullname = %self.fullname, error = %e, "mDNS unregister failed");
        }
    }
}

impl Drop for MdnsAnnouncement {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Kernel host name, used as the mDNS host label.
fn local_host_name() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|name| sanitize_label(name.trim()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_owned())
}

/// Keeps characters valid in a DNS label.
fn sanitize_label(name: &str) -> String {
    name.split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}
