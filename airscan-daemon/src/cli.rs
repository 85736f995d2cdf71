//! CLI argument definitions for airscan-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Every server flag is optional and, when present, takes precedence over
//! the config file and environment variables.

use std::path::PathBuf;

use airscan_core::config::AirscanConfig;
use clap::Parser;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/airscan/airscan.toml";

/// airscan eSCL scanner-sharing daemon.
///
/// Shares local scanners with AirScan/eSCL clients over HTTP and
/// announces them via mDNS/DNS-SD.
#[derive(Parser, Debug)]
#[command(name = "airscan-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to airscan.toml configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Shorthand for `--log-level debug`.
    #[arg(long)]
    pub debug: bool,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,

    /// HTTP listen address.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// HTTP listen port.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Restrict mDNS announcements to one network interface.
    #[arg(long)]
    pub interface: Option<String>,

    /// Access log target: "-" for stdout, otherwise a file path.
    #[arg(long)]
    pub access_log: Option<String>,

    /// Value of the Access-Control-Allow-Origin header.
    #[arg(long)]
    pub cross_origin: Option<String>,

    /// Reload when scanners are attached or detached.
    #[arg(long)]
    pub hotplug: Option<bool>,

    /// Announce scanners via mDNS/DNS-SD.
    #[arg(long)]
    pub mdns_announce: Option<bool>,

    /// Share local scanners only.
    #[arg(long)]
    pub local_scanners_only: Option<bool>,
}

impl DaemonCli {
    /// True when `--config` was left at its default.
    pub fn uses_default_config(&self) -> bool {
        self.config.as_os_str() == DEFAULT_CONFIG_PATH
    }

    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut AirscanConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if self.debug {
            config.general.log_level = "debug".to_owned();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }

        let server = &mut config.server;
        if let Some(addr) = &self.listen_addr {
            server.listen_addr = addr.clone();
        }
        if let Some(port) = self.listen_port {
            server.listen_port = port;
        }
        if let Some(interface) = &self.interface {
            server.interface = interface.clone();
        }
        if let Some(access_log) = &self.access_log {
            server.access_log = access_log.clone();
        }
        if let Some(origin) = &self.cross_origin {
            server.cross_origin = origin.clone();
        }
        if let Some(hotplug) = self.hotplug {
            server.hotplug = hotplug;
        }
        if let Some(announce) = self.mdns_announce {
            server.mdns_announce = announce;
        }
        if let Some(local_only) = self.local_scanners_only {
            server.local_scanners_only = local_only;
        }
    }
}
