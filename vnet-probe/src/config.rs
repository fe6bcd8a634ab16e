// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Run-time configuration of the probe.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;

use common::logging::LogFormat;
use packet::vxlan::VXLAN_UDP_PORT;

const DEFAULT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_SYSFS_ROOT: &str = "/sys/class/net";
const DEFAULT_RESPONDER_CONF: &str = "/tmp/vnet_arpresponder.conf";
const DEFAULT_RESPONDER_CMD: &str = "supervisorctl";

#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Topology description to test against.
    pub config_file: PathBuf,

    /// Send traffic.  Without this, the topology is loaded and checked
    /// but nothing goes on the wire.
    pub vxlan_enabled: bool,

    /// Destination UDP port of the tunnel.
    pub vxlan_port: u16,

    /// How long to wait for each expected frame.
    pub timeout: Duration,

    /// Directory holding one entry per local interface, each with an
    /// `address` file.
    pub sysfs_root: PathBuf,

    /// Where the ARP responder reads its config from.
    pub responder_conf: PathBuf,

    /// Program used to start and stop the ARP responder.
    pub responder_cmd: String,

    /// Manage the ARP responder at all?
    pub responder: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Human,
            config_file: PathBuf::new(),
            vxlan_enabled: false,
            vxlan_port: VXLAN_UDP_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            responder_conf: PathBuf::from(DEFAULT_RESPONDER_CONF),
            responder_cmd: DEFAULT_RESPONDER_CMD.to_string(),
            responder: true,
        }
    }
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(
    opts: &crate::Opt,
    config: &mut Config,
) -> anyhow::Result<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    match &opts.config_file {
        Some(file) => config.config_file = PathBuf::from(file),
        None => bail!("--config-file must be provided"),
    }

    config.vxlan_enabled = opts.vxlan_enabled;

    if let Some(port) = opts.vxlan_port {
        if port == 0 {
            bail!("vxlan port must be non-zero");
        }
        config.vxlan_port = port;
    }

    if let Some(ms) = opts.timeout_ms {
        if ms == 0 {
            bail!("timeout must be non-zero");
        }
        config.timeout = Duration::from_millis(ms);
    }

    if let Some(root) = &opts.sysfs_root {
        config.sysfs_root = PathBuf::from(root);
    }

    if let Some(conf) = &opts.responder_conf {
        config.responder_conf = PathBuf::from(conf);
    }

    if let Some(cmd) = &opts.responder_cmd {
        config.responder_cmd = cmd.to_string();
    }

    if opts.no_responder {
        config.responder = false;
    }

    Ok(())
}

/// Build the run-time config from the defaults, overridden by whatever was
/// given on the command line.
pub(crate) fn build_config(opts: &crate::Opt) -> anyhow::Result<Config> {
    let mut config = Config::default();
    update_from_cli(opts, &mut config)?;
    Ok(config)
}
