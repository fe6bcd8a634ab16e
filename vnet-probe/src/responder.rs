// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Control of the helper that answers ARP requests for the neighbor
//! addresses, so the device can resolve the servers behind each port.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use slog::{debug, info};
use tokio::process::Command;

use crate::macaddrs::port_ifname;
use crate::topology::TopologyModel;
use crate::types::{ProbeError, ProbeResult};

const SERVICE: &str = "arp_responder";

/// The addresses to answer for, keyed by `ethN`, or `ethN@VLAN` for
/// neighbors behind a tagged interface.
pub fn responder_config(
    topo: &TopologyModel,
) -> BTreeMap<String, Vec<Ipv4Addr>> {
    let mut config: BTreeMap<String, Vec<Ipv4Addr>> = BTreeMap::new();
    for nbr in topo.neighbors() {
        let Some(port) = nbr.ports.first() else {
            continue;
        };
        let key = match nbr.vlan_id {
            0 => port_ifname(*port),
            vid => format!("{}@{vid}", port_ifname(*port)),
        };
        config.entry(key).or_default().push(nbr.ip);
    }
    config
}

pub fn render_config(topo: &TopologyModel) -> ProbeResult<String> {
    let mut s = serde_json::to_string_pretty(&responder_config(topo))
        .map_err(|e| ProbeError::Responder(e.to_string()))?;
    s.push('\n');
    Ok(s)
}

// Run a command, returning its stdout.  A command that can't be launched
// and one that exits non-zero are both reported as responder errors, the
// latter with whatever it wrote to stderr.
async fn run_cmd(cmd: &str, args: &[&str]) -> ProbeResult<Vec<String>> {
    let out = Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| ProbeError::Responder(format!("{cmd}: {e:?}")))?;

    if !out.status.success() {
        return Err(ProbeError::Responder(format!(
            "{} {} failed: {}",
            cmd,
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.to_string())
        .collect())
}

pub struct ArpResponder {
    log: slog::Logger,
    conf_path: PathBuf,
    cmd: String,
}

impl ArpResponder {
    /// `cmd` is a supervisor-style control program, invoked as
    /// `cmd start arp_responder` and `cmd stop arp_responder`.
    pub fn new(
        log: &slog::Logger,
        conf_path: impl AsRef<Path>,
        cmd: impl ToString,
    ) -> Self {
        ArpResponder {
            log: log.new(slog::o!("unit" => "arp_responder")),
            conf_path: conf_path.as_ref().to_path_buf(),
            cmd: cmd.to_string(),
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    pub fn write_config(&self, topo: &TopologyModel) -> ProbeResult<()> {
        let config = render_config(topo)?;
        std::fs::write(&self.conf_path, config).map_err(|e| {
            ProbeError::Responder(format!(
                "writing {}: {e}",
                self.conf_path.display()
            ))
        })?;
        info!(self.log, "wrote responder config";
            "path" => %self.conf_path.display(),
            "interfaces" => topo.neighbors().len());
        Ok(())
    }

    async fn control(&self, action: &str) -> ProbeResult<()> {
        let out = run_cmd(&self.cmd, &[action, SERVICE]).await?;
        for line in out {
            debug!(self.log, "{}", line; "action" => action);
        }
        info!(self.log, "{action} {SERVICE}");
        Ok(())
    }

    pub async fn start(&self) -> ProbeResult<()> {
        self.control("start").await
    }

    pub async fn stop(&self) -> ProbeResult<()> {
        self.control("stop").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TOPOLOGY;
    use pretty_assertions::assert_eq;

    fn topo() -> TopologyModel {
        TopologyModel::from_json(TOPOLOGY).unwrap()
    }

    #[test]
    fn test_config_keys() {
        let config = responder_config(&topo());
        let keys: Vec<&str> = config.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["eth2@1000", "eth5@1001", "eth6", "eth8"]);
        assert_eq!(config["eth6"], vec![Ipv4Addr::new(192, 168, 1, 2)]);
    }

    #[test]
    fn test_config_output() {
        let rendered = render_config(&topo()).unwrap();
        expectorate::assert_contents("tests/output/arp_responder.json", &rendered);
    }

    #[test]
    fn test_write_config() {
        let path = std::env::temp_dir()
            .join(format!("vnet-probe-arp-{}.conf", std::process::id()));
        let log = common::logging::discard();
        let responder = ArpResponder::new(&log, &path, "true");
        responder.write_config(&topo()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, Vec<Ipv4Addr>> =
            serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, responder_config(&topo()));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_control() {
        let log = common::logging::discard();
        let ok = ArpResponder::new(&log, "/tmp/unused", "true");
        ok.start().await.unwrap();
        ok.stop().await.unwrap();

        let failing = ArpResponder::new(&log, "/tmp/unused", "false");
        assert!(matches!(
            failing.start().await,
            Err(ProbeError::Responder(_))
        ));

        let missing =
            ArpResponder::new(&log, "/tmp/unused", "/nonexistent/supervisorctl");
        assert!(matches!(
            missing.stop().await,
            Err(ProbeError::Responder(_))
        ));
    }
}
