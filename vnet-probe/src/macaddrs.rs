// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! MAC addresses of the local interfaces wired to the device's ports.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use common::network::MacAddr;
use slog::{debug, warn};

use crate::types::{ProbeError, ProbeResult};

/// Port `N` of the device is cabled to local interface `ethN`.
pub fn port_ifname(port: u16) -> String {
    format!("eth{port}")
}

#[derive(Clone, Debug, Default)]
pub struct MacRegistry {
    addrs: BTreeMap<String, MacAddr>,
}

impl MacRegistry {
    /// Read the address of every interface under `root`, laid out like
    /// `/sys/class/net`: one directory per interface, each holding an
    /// `address` file.  Interfaces without a readable Ethernet address are
    /// skipped.
    pub fn load(log: &slog::Logger, root: &Path) -> ProbeResult<Self> {
        let entries = fs::read_dir(root).map_err(|e| {
            ProbeError::Config(format!(
                "unable to list interfaces in {}: {e}",
                root.display()
            ))
        })?;

        let mut addrs = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            let ifname = entry.file_name().to_string_lossy().to_string();
            let path = entry.path().join("address");
            let mac = match fs::read_to_string(&path) {
                Ok(raw) => match raw.parse::<MacAddr>() {
                    Ok(mac) => mac,
                    Err(e) => {
                        warn!(log, "skipping interface";
                            "ifname" => &ifname,
                            "error" => %e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(log, "skipping interface";
                        "ifname" => &ifname,
                        "error" => %e);
                    continue;
                }
            };
            debug!(log, "found interface"; "ifname" => &ifname, "mac" => %mac);
            addrs.insert(ifname, mac);
        }

        Ok(MacRegistry { addrs })
    }

    pub fn insert(&mut self, ifname: impl ToString, mac: MacAddr) {
        self.addrs.insert(ifname.to_string(), mac);
    }

    pub fn get(&self, ifname: &str) -> Option<MacAddr> {
        self.addrs.get(ifname).copied()
    }

    /// The MAC of the interface cabled to `port`.
    pub fn port_mac(&self, port: u16) -> ProbeResult<MacAddr> {
        let ifname = port_ifname(port);
        self.get(&ifname).ok_or_else(|| {
            ProbeError::TopologyResolution(format!(
                "no mac address for {ifname}"
            ))
        })
    }

    /// Confirm every one of `ports` has an interface address, naming all of
    /// the ones that don't.
    pub fn require_ports(
        &self,
        ports: impl IntoIterator<Item = u16>,
    ) -> ProbeResult<()> {
        let missing: Vec<String> = ports
            .into_iter()
            .map(port_ifname)
            .filter(|ifname| self.get(ifname).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::TopologyResolution(format!(
                "no mac address for {}",
                missing.join(", ")
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl FromIterator<(String, MacAddr)> for MacRegistry {
    fn from_iter<I: IntoIterator<Item = (String, MacAddr)>>(iter: I) -> Self {
        MacRegistry {
            addrs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs(entries: &[(&str, &str)]) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!(
            "vnet-probe-macs-{}-{}",
            std::process::id(),
            entries.len()
        ));
        let _ = fs::remove_dir_all(&root);
        for (ifname, contents) in entries {
            let dir = root.join(ifname);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("address"), contents).unwrap();
        }
        root
    }

    #[test]
    fn test_load() {
        let root = sysfs(&[
            ("eth0", "00:aa:bb:cc:dd:00\n"),
            ("eth12", "00:aa:bb:cc:dd:0c\n"),
            ("lo", "00:00:00:00:00:00\n"),
            ("ipip0", "00:00:00:00\n"),
        ]);
        let log = common::logging::discard();
        let macs = MacRegistry::load(&log, &root).unwrap();
        assert_eq!(macs.len(), 3);
        assert_eq!(
            macs.port_mac(12).unwrap(),
            MacAddr::new(0x00, 0xaa, 0xbb, 0xcc, 0xdd, 0x0c)
        );
        assert!(macs.get("ipip0").is_none());
        assert!(matches!(
            macs.port_mac(7),
            Err(ProbeError::TopologyResolution(_))
        ));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_require_ports() {
        let macs: MacRegistry = [0u8, 1, 3]
            .iter()
            .map(|p| (port_ifname(*p as u16), MacAddr::new(2, 0, 0, 0, 0, *p)))
            .collect();
        assert!(macs.require_ports([0, 3]).is_ok());
        assert!(macs.require_ports(Vec::new()).is_ok());
        match macs.require_ports([0, 2, 3, 7]) {
            Err(ProbeError::TopologyResolution(msg)) => {
                assert_eq!(msg, "no mac address for eth2, eth7")
            }
            x => panic!("expected resolution error, got {x:?}"),
        }
    }

    #[test]
    fn test_missing_root() {
        let log = common::logging::discard();
        let root = Path::new("/nonexistent/sys/class/net");
        assert!(matches!(
            MacRegistry::load(&log, root),
            Err(ProbeError::Config(_))
        ));
    }
}
