// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The static description of the device under test.
//!
//! The topology file is the JSON document the deployment tooling renders
//! from the device's minigraph and VNet configuration.  It is parsed once
//! into a `TopologyModel`, which is never modified afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use common::network::{validate_vlan, MacAddr};
use oxnet::Ipv4Net;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::types::{ProbeError, ProbeResult};

/// Next-hop MAC expected on encapsulated traffic when a route doesn't name
/// one.
pub const DEFAULT_ROUTER_MAC: MacAddr =
    MacAddr::new(0x00, 0xaa, 0xbb, 0xcc, 0x78, 0x9a);

/// VNIs are assigned as this base plus the numeric suffix of the VNet name.
pub const VNI_BASE: u32 = 10000;

const VNI_MAX: u32 = 0xff_ffff;

// The raw shape of the topology file.  Field names match the file.

/// A JSON object whose entries are kept in the order the file lists them.
#[derive(Debug)]
struct Entries<V>(Vec<(String, V)>);

impl<V> Entries<V> {
    fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }
}

struct EntriesVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
    type Value = Entries<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut map: A,
    ) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(Entries(entries))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[derive(Debug, Deserialize)]
struct RawPortChannel {
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPortChannelInterface {
    attachto: String,
    peer_addr: String,
}

#[derive(Debug, Deserialize)]
struct RawVlan {
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawLoInterface {
    addr: String,
    prefixlen: u8,
}

#[derive(Debug, Deserialize)]
struct RawVnetInterface {
    vnet: String,
    ifname: String,
    #[serde(default)]
    vni: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawNeighbor {
    ip: String,
    ifname: String,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    pfx: String,
    end: Ipv4Addr,
    #[serde(default)]
    mac: Option<MacAddr>,
    #[serde(default)]
    vni: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawLocalRoute {
    pfx: String,
    nexthop: Ipv4Addr,
    ifname: String,
}

#[derive(Debug, Deserialize)]
struct RawTopology {
    minigraph_portchannels: BTreeMap<String, RawPortChannel>,
    minigraph_portchannel_interfaces: Vec<RawPortChannelInterface>,
    minigraph_vlans: BTreeMap<String, RawVlan>,
    minigraph_port_indices: BTreeMap<String, u16>,
    minigraph_lo_interfaces: Vec<RawLoInterface>,
    vnet_interfaces: Vec<RawVnetInterface>,
    vnet_neighbors: Vec<RawNeighbor>,
    vnet_peers: Vec<Entries<String>>,
    vnet_routes: Vec<Entries<Vec<RawRoute>>>,
    vnet_local_routes: Vec<Entries<Vec<RawLocalRoute>>>,
    dut_mac: MacAddr,
}

/// A server-facing attachment point of a VNet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub vnet: String,
    pub ifname: String,
    /// 0 for an untagged interface
    pub vlan_id: u16,
    pub ip: Ipv4Addr,
    /// Physical ports behind the interface, never empty.
    pub ports: Vec<u16>,
    pub vni: u32,
}

impl ServiceEndpoint {
    /// The port traffic for this endpoint is sent and expected on.
    pub fn port(&self) -> u16 {
        self.ports[0]
    }

    pub fn is_tagged(&self) -> bool {
        self.vlan_id != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vnet {
    pub name: String,
    /// In the order the interfaces appear in the topology file
    pub endpoints: Vec<ServiceEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbor {
    pub ip: Ipv4Addr,
    pub vlan_id: u16,
    pub ports: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortChannelInfo {
    pub name: String,
    pub peer_addr: Ipv4Addr,
    pub members: Vec<u16>,
}

/// Two VNets whose endpoints can reach one another without encapsulation.
/// The pair is unordered: `(a, b)` and `(b, a)` are the same relation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PeeringRelation {
    lo: String,
    hi: String,
}

impl PeeringRelation {
    pub fn new(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        PeeringRelation {
            lo: lo.to_string(),
            hi: hi.to_string(),
        }
    }

    /// If `vnet` is one side of this relation, the other side.
    pub fn partner_of(&self, vnet: &str) -> Option<&str> {
        if self.lo == vnet {
            Some(&self.hi)
        } else if self.hi == vnet {
            Some(&self.lo)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub vnet: String,
    pub prefix: Ipv4Net,
    /// Underlay address of the tunnel endpoint behind this route
    pub nexthop: Ipv4Addr,
    pub nexthop_mac: Option<MacAddr>,
    pub vni: Option<u32>,
}

impl Route {
    pub fn inner_mac(&self) -> MacAddr {
        self.nexthop_mac.unwrap_or(DEFAULT_ROUTER_MAC)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalRoute {
    pub vnet: String,
    pub prefix: Ipv4Net,
    pub nexthop: Ipv4Addr,
    pub ifname: String,
}

#[derive(Clone, Debug)]
pub struct TopologyModel {
    vnets: Vec<Vnet>,
    port_channels: Vec<PortChannelInfo>,
    neighbors: Vec<Neighbor>,
    peerings: Vec<PeeringRelation>,
    routes: Vec<Route>,
    local_routes: Vec<LocalRoute>,
    dut_mac: MacAddr,
    loopback: Ipv4Addr,
}

fn resolution(msg: impl ToString) -> ProbeError {
    ProbeError::TopologyResolution(msg.to_string())
}

/// Route tables are keyed "<vnet>_<tag>".
fn vnet_of_key(key: &str) -> &str {
    key.split('_').next().unwrap_or(key)
}

fn parse_prefix(pfx: &str) -> ProbeResult<Ipv4Net> {
    Ipv4Net::from_str(pfx)
        .map_err(|e| ProbeError::Config(format!("invalid prefix {pfx}: {e}")))
}

/// The VNI derived from a VNet's name: `Vnet12` is VNI 10012.
pub fn vni_for_name(vnet: &str) -> ProbeResult<u32> {
    let digits = vnet.len()
        - vnet
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .count();
    let suffix = &vnet[digits..];
    let n: u32 = suffix.parse().map_err(|_| {
        resolution(format!("vnet {vnet} has no numeric suffix to derive a vni"))
    })?;
    match n.checked_add(VNI_BASE) {
        Some(vni) if vni <= VNI_MAX => Ok(vni),
        _ => Err(resolution(format!("vni for {vnet} out of range"))),
    }
}

/// `VlanN` interfaces carry VLAN N; everything else is untagged.
pub fn vlan_id_for_ifname(ifname: &str) -> ProbeResult<u16> {
    let Some(vid) = ifname.strip_prefix("Vlan") else {
        return Ok(0);
    };
    let vid: u16 = vid
        .parse()
        .map_err(|_| resolution(format!("bad vlan interface name {ifname}")))?;
    match validate_vlan(vid) {
        Ok(()) if vid != 0 => Ok(vid),
        Ok(()) => Err(resolution(format!("interface {ifname} has vlan 0"))),
        Err(e) => Err(resolution(format!("interface {ifname}: {e}"))),
    }
}

/// The first usable host of a prefix.  Point-to-point and host prefixes
/// have no network or broadcast address, so their first host is the lowest
/// address in the prefix.
pub fn first_host(prefix: &Ipv4Net) -> Ipv4Addr {
    let width = prefix.width();
    let mask = match width {
        0 => 0,
        w => u32::MAX << (32 - w as u32),
    };
    let network = u32::from(prefix.addr()) & mask;
    match width {
        32 => prefix.addr(),
        31 => Ipv4Addr::from(network),
        _ => Ipv4Addr::from(network + 1),
    }
}

impl TopologyModel {
    pub fn from_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| {
            ProbeError::Config(format!(
                "unable to read topology file {}: {e}",
                path.display()
            ))
        })?;
        TopologyModel::from_json(&data)
    }

    pub fn from_json(data: &str) -> ProbeResult<Self> {
        let raw: RawTopology = serde_json::from_str(data)?;
        TopologyModel::build(raw)
    }

    fn build(raw: RawTopology) -> ProbeResult<Self> {
        let port_index = |name: &str| -> ProbeResult<u16> {
            raw.minigraph_port_indices
                .get(name)
                .copied()
                .ok_or_else(|| resolution(format!("no port index for {name}")))
        };

        let mut port_channels = Vec::new();
        for (name, pc) in &raw.minigraph_portchannels {
            let members = pc
                .members
                .iter()
                .map(|m| port_index(m))
                .collect::<ProbeResult<Vec<u16>>>()?;
            let peer_addr = raw
                .minigraph_portchannel_interfaces
                .iter()
                .filter(|i| &i.attachto == name)
                .find_map(|i| i.peer_addr.parse::<Ipv4Addr>().ok())
                .ok_or_else(|| {
                    resolution(format!(
                        "portchannel {name} has no ipv4 peer address"
                    ))
                })?;
            port_channels.push(PortChannelInfo {
                name: name.clone(),
                peer_addr,
                members,
            });
        }

        // The first member of each vlan is the vlan's own interface.
        let mut vlan_ports = BTreeMap::new();
        for (name, vlan) in &raw.minigraph_vlans {
            let ports = vlan
                .members
                .iter()
                .skip(1)
                .map(|m| port_index(m))
                .collect::<ProbeResult<Vec<u16>>>()?;
            vlan_ports.insert(name.as_str(), ports);
        }

        let mut vnets: Vec<Vnet> = Vec::new();
        let mut neighbors = Vec::new();
        for intf in &raw.vnet_interfaces {
            let ports = match vlan_ports.get(intf.ifname.as_str()) {
                Some(ports) => ports.clone(),
                None => vec![port_index(&intf.ifname)?],
            };
            if ports.is_empty() {
                return Err(resolution(format!(
                    "interface {} has no access ports",
                    intf.ifname
                )));
            }
            let vlan_id = vlan_id_for_ifname(&intf.ifname)?;

            let nbr_ips: Vec<Ipv4Addr> = raw
                .vnet_neighbors
                .iter()
                .filter(|n| n.ifname == intf.ifname)
                .filter_map(|n| n.ip.parse().ok())
                .collect();
            let Some(ip) = nbr_ips.first().copied() else {
                return Err(resolution(format!(
                    "no ipv4 neighbor on interface {}",
                    intf.ifname
                )));
            };
            neighbors.extend(nbr_ips.into_iter().map(|ip| Neighbor {
                ip,
                vlan_id,
                ports: ports.clone(),
            }));

            let vni = match intf.vni {
                Some(vni) if vni <= VNI_MAX => vni,
                Some(vni) => {
                    return Err(resolution(format!(
                        "vni {vni} on {} out of range",
                        intf.ifname
                    )))
                }
                None => vni_for_name(&intf.vnet)?,
            };

            let ep = ServiceEndpoint {
                vnet: intf.vnet.clone(),
                ifname: intf.ifname.clone(),
                vlan_id,
                ip,
                ports,
                vni,
            };
            match vnets.iter_mut().find(|v| v.name == intf.vnet) {
                Some(v) => {
                    if v.endpoints.iter().any(|e| e.ifname == ep.ifname) {
                        return Err(resolution(format!(
                            "interface {} listed twice in {}",
                            ep.ifname, v.name
                        )));
                    }
                    v.endpoints.push(ep)
                }
                None => vnets.push(Vnet {
                    name: intf.vnet.clone(),
                    endpoints: vec![ep],
                }),
            }
        }

        let mut peerings = Vec::new();
        for (a, b) in raw.vnet_peers.iter().flat_map(|m| m.iter()) {
            if a == b {
                return Err(resolution(format!("vnet {a} peered with itself")));
            }
            let rel = PeeringRelation::new(a, b);
            if !peerings.contains(&rel) {
                peerings.push(rel);
            }
        }

        let mut routes = Vec::new();
        for (key, list) in raw.vnet_routes.iter().flat_map(|m| m.iter()) {
            for entry in list {
                routes.push(Route {
                    vnet: vnet_of_key(key).to_string(),
                    prefix: parse_prefix(&entry.pfx)?,
                    nexthop: entry.end,
                    nexthop_mac: entry.mac,
                    vni: entry.vni,
                });
            }
        }

        let mut local_routes = Vec::new();
        for (key, list) in raw.vnet_local_routes.iter().flat_map(|m| m.iter())
        {
            for entry in list {
                local_routes.push(LocalRoute {
                    vnet: vnet_of_key(key).to_string(),
                    prefix: parse_prefix(&entry.pfx)?,
                    nexthop: entry.nexthop,
                    ifname: entry.ifname.clone(),
                });
            }
        }

        let loopbacks: Vec<Ipv4Addr> = raw
            .minigraph_lo_interfaces
            .iter()
            .filter(|lo| lo.prefixlen == 32)
            .filter_map(|lo| lo.addr.parse().ok())
            .collect();
        let loopback = match loopbacks.as_slice() {
            [lo] => *lo,
            [] => return Err(resolution("no ipv4 /32 loopback interface")),
            _ => {
                return Err(resolution(format!(
                    "{} ipv4 /32 loopback interfaces",
                    loopbacks.len()
                )))
            }
        };

        Ok(TopologyModel {
            vnets,
            port_channels,
            neighbors,
            peerings,
            routes,
            local_routes,
            dut_mac: raw.dut_mac,
            loopback,
        })
    }

    pub fn vnets(&self) -> &[Vnet] {
        &self.vnets
    }

    pub fn vnet(&self, name: &str) -> ProbeResult<&Vnet> {
        self.vnets
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| resolution(format!("no such vnet {name}")))
    }

    pub fn port_channels(&self) -> &[PortChannelInfo] {
        &self.port_channels
    }

    /// Every network-facing port: the members of all port-channels.
    pub fn uplink_ports(&self) -> Vec<u16> {
        self.port_channels
            .iter()
            .flat_map(|pc| pc.members.iter().copied())
            .collect()
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn peerings(&self) -> &[PeeringRelation] {
        &self.peerings
    }

    /// The VNets peered with `vnet`, in the order the relations were
    /// declared.
    pub fn peers_of(&self, vnet: &str) -> Vec<&str> {
        self.peerings
            .iter()
            .filter_map(|p| p.partner_of(vnet))
            .collect()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn local_routes(&self) -> &[LocalRoute] {
        &self.local_routes
    }

    pub fn dut_mac(&self) -> MacAddr {
        self.dut_mac
    }

    pub fn loopback(&self) -> Ipv4Addr {
        self.loopback
    }

    /// Find a VNet's endpoint.  With an interface name, this is the endpoint
    /// on that interface.  Without one, it is the VNet's first endpoint in
    /// the order the topology file lists its interfaces.
    pub fn lookup_service_endpoint(
        &self,
        vnet: &str,
        ifname: Option<&str>,
    ) -> ProbeResult<&ServiceEndpoint> {
        let v = self.vnet(vnet)?;
        match ifname {
            Some(ifname) => {
                v.endpoints.iter().find(|e| e.ifname == ifname).ok_or_else(
                    || resolution(format!("vnet {vnet} has no interface {ifname}")),
                )
            }
            None => v
                .endpoints
                .first()
                .ok_or_else(|| resolution(format!("vnet {vnet} has no endpoints"))),
        }
    }

    /// Like `lookup_service_endpoint()` without an interface name, but
    /// refuses to choose when the VNet has more than one endpoint.
    pub fn lookup_unique_service_endpoint(
        &self,
        vnet: &str,
    ) -> ProbeResult<&ServiceEndpoint> {
        let v = self.vnet(vnet)?;
        match v.endpoints.as_slice() {
            [ep] => Ok(ep),
            [] => Err(resolution(format!("vnet {vnet} has no endpoints"))),
            eps => Err(resolution(format!(
                "vnet {vnet} has {} endpoints, an interface name is required",
                eps.len()
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) const TOPOLOGY: &str = include_str!("../tests/data/topology.json");

    fn edit(f: impl FnOnce(&mut serde_json::Value)) -> String {
        let mut v: serde_json::Value = serde_json::from_str(TOPOLOGY).unwrap();
        f(&mut v);
        v.to_string()
    }

    #[test]
    fn test_vni_rule() {
        assert_eq!(vni_for_name("Vnet1").unwrap(), 10001);
        assert_eq!(vni_for_name("Vnet12").unwrap(), 10012);
        assert!(vni_for_name("Vnet").is_err());
        assert!(vni_for_name("Vnet99999999").is_err());
    }

    #[test]
    fn test_vlan_rule() {
        assert_eq!(vlan_id_for_ifname("Vlan1001").unwrap(), 1001);
        assert_eq!(vlan_id_for_ifname("Ethernet12").unwrap(), 0);
        assert_eq!(vlan_id_for_ifname("Vlan1").unwrap(), 1);
        assert_eq!(vlan_id_for_ifname("Vlan4094").unwrap(), 4094);
        assert!(vlan_id_for_ifname("Vlan0").is_err());
        assert!(vlan_id_for_ifname("Vlan4095").is_err());
        assert!(vlan_id_for_ifname("Vlan5000").is_err());
        assert!(vlan_id_for_ifname("Vlanx").is_err());
    }

    #[test]
    fn test_first_host() {
        let host = |s: &str| first_host(&s.parse().unwrap());
        assert_eq!(host("10.1.0.0/24"), Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(host("10.1.0.7/32"), Ipv4Addr::new(10, 1, 0, 7));
        assert_eq!(host("10.1.0.6/31"), Ipv4Addr::new(10, 1, 0, 6));
        assert_eq!(host("192.168.4.128/25"), Ipv4Addr::new(192, 168, 4, 129));
    }

    #[test]
    fn test_peering_relation() {
        let ab = PeeringRelation::new("Vnet1", "Vnet2");
        assert_eq!(ab, PeeringRelation::new("Vnet2", "Vnet1"));
        assert_eq!(ab.partner_of("Vnet1"), Some("Vnet2"));
        assert_eq!(ab.partner_of("Vnet2"), Some("Vnet1"));
        assert_eq!(ab.partner_of("Vnet3"), None);
    }

    #[test]
    fn test_build() {
        let topo = TopologyModel::from_json(TOPOLOGY).unwrap();
        assert_eq!(topo.loopback(), Ipv4Addr::new(10, 1, 0, 32));
        assert_eq!(topo.dut_mac().to_string(), "52:54:00:c1:2a:10");
        assert_eq!(topo.uplink_ports(), vec![28, 29, 30, 31]);
        assert_eq!(topo.port_channels()[1].peer_addr, Ipv4Addr::new(10, 0, 0, 59));

        // Vlan1000 lists Ethernet4 first, which is skipped
        let ep = topo.lookup_service_endpoint("Vnet1", None).unwrap();
        assert_eq!(ep.ifname, "Vlan1000");
        assert_eq!(ep.ports, vec![2, 3]);
        assert_eq!(ep.port(), 2);
        assert_eq!(ep.vlan_id, 1000);
        assert_eq!(ep.vni, 10001);
        assert_eq!(ep.ip, Ipv4Addr::new(192, 168, 0, 2));

        let ep = topo.lookup_service_endpoint("Vnet2", None).unwrap();
        assert_eq!(ep.ifname, "Ethernet24");
        assert_eq!(ep.vlan_id, 0);
        assert_eq!(ep.ports, vec![6]);

        // An explicit vni on the interface wins over the name
        let ep = topo.lookup_service_endpoint("Vnet3", None).unwrap();
        assert_eq!(ep.vni, 20003);

        assert_eq!(topo.peerings().len(), 1);
        assert_eq!(topo.peers_of("Vnet1"), vec!["Vnet2"]);
        assert_eq!(topo.peers_of("Vnet2"), vec!["Vnet1"]);
        assert!(topo.peers_of("Vnet3").is_empty());

        let routes = topo.routes();
        assert_eq!(routes[0].vnet, "Vnet1");
        assert_eq!(routes[0].inner_mac(), DEFAULT_ROUTER_MAC);
        assert_eq!(routes[1].vnet, "Vnet2");
        assert_eq!(routes[1].vni, Some(10001));
        assert_eq!(
            routes[1].inner_mac().to_string(),
            "00:00:00:00:00:02"
        );
        assert_eq!(topo.local_routes()[0].vnet, "Vnet1");
        assert_eq!(topo.neighbors().len(), 4);
    }

    #[test]
    fn test_lookup_by_ifname() {
        let topo = TopologyModel::from_json(TOPOLOGY).unwrap();
        let ep = topo
            .lookup_service_endpoint("Vnet1", Some("Vlan1001"))
            .unwrap();
        assert_eq!(ep.vlan_id, 1001);
        assert_eq!(ep.ports, vec![5]);
        assert!(topo.lookup_service_endpoint("Vnet1", Some("Vlan9")).is_err());
        assert!(topo.lookup_service_endpoint("Vnet9", None).is_err());

        assert!(topo.lookup_unique_service_endpoint("Vnet1").is_err());
        let ep = topo.lookup_unique_service_endpoint("Vnet2").unwrap();
        assert_eq!(ep.ifname, "Ethernet24");
    }

    #[test]
    fn test_missing_field() {
        for field in
            ["dut_mac", "vnet_peers", "vnet_routes", "vnet_local_routes"]
        {
            let data = edit(|v| {
                v.as_object_mut().unwrap().remove(field);
            });
            match TopologyModel::from_json(&data) {
                Err(ProbeError::Config(msg)) => assert!(msg.contains(field)),
                x => panic!("expected config error for {field}, got {x:?}"),
            }
        }
    }

    #[test]
    fn test_vlan1_interface() {
        let data = edit(|v| {
            let vlans = v["minigraph_vlans"].as_object_mut().unwrap();
            let vlan = vlans.remove("Vlan1001").unwrap();
            vlans.insert("Vlan1".to_string(), vlan);
            v["vnet_interfaces"][2]["ifname"] = "Vlan1".into();
            v["vnet_neighbors"][3]["ifname"] = "Vlan1".into();
            v["vnet_local_routes"][0]["Vnet1_local_routes"][0]["ifname"] =
                "Vlan1".into();
        });
        let topo = TopologyModel::from_json(&data).unwrap();
        let ep = topo.lookup_service_endpoint("Vnet1", Some("Vlan1")).unwrap();
        assert_eq!(ep.vlan_id, 1);
        assert_eq!(ep.ports, vec![5]);
    }

    #[test]
    fn test_route_file_order() {
        // Keys within one entry are taken in the order they are written.
        let data = TOPOLOGY.replacen(
            r#""vnet_routes": ["#,
            r#""vnet_routes": [
    { "Vnet3_route_list": [ { "pfx": "3.3.0.0/16", "end": "100.1.1.30" } ],
      "Vnet1_route_list": [ { "pfx": "1.2.0.0/16", "end": "100.1.1.10" } ] },"#,
            1,
        );
        let topo = TopologyModel::from_json(&data).unwrap();
        let vnets: Vec<&str> =
            topo.routes().iter().map(|r| r.vnet.as_str()).collect();
        assert_eq!(vnets, vec!["Vnet3", "Vnet1", "Vnet1", "Vnet2", "Vnet3"]);
    }

    #[test]
    fn test_missing_peer_addr() {
        let data = edit(|v| {
            v["minigraph_portchannel_interfaces"]
                .as_array_mut()
                .unwrap()
                .retain(|i| i["attachto"] != "PortChannel02");
        });
        assert!(matches!(
            TopologyModel::from_json(&data),
            Err(ProbeError::TopologyResolution(_))
        ));
    }

    #[test]
    fn test_loopback_count() {
        let none = edit(|v| {
            v["minigraph_lo_interfaces"]
                .as_array_mut()
                .unwrap()
                .retain(|lo| lo["prefixlen"] != 32);
        });
        assert!(matches!(
            TopologyModel::from_json(&none),
            Err(ProbeError::TopologyResolution(_))
        ));

        let two = edit(|v| {
            v["minigraph_lo_interfaces"].as_array_mut().unwrap().push(
                serde_json::json!({"addr": "10.1.0.33", "prefixlen": 32}),
            );
        });
        assert!(matches!(
            TopologyModel::from_json(&two),
            Err(ProbeError::TopologyResolution(_))
        ));
    }

    #[test]
    fn test_interface_without_neighbor() {
        let data = edit(|v| {
            v["vnet_neighbors"]
                .as_array_mut()
                .unwrap()
                .retain(|n| n["ifname"] != "Ethernet24");
        });
        assert!(matches!(
            TopologyModel::from_json(&data),
            Err(ProbeError::TopologyResolution(_))
        ));
    }
}
