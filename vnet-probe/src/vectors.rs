// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Expansion of the topology's routes into individual forwarding checks.
//!
//! Every route produces a direct vector sourced from the first endpoint of
//! its VNet.  Each direct vector is immediately followed by one sibling per
//! VNet peered with the route's VNet, sourced from that peer's first
//! endpoint, and then by one vector per local route of the VNet, sourced
//! from the first host of the local prefix.  Nothing is deduplicated.

use std::fmt;
use std::net::Ipv4Addr;

use common::network::MacAddr;
use oxnet::Ipv4Net;

use crate::topology::{first_host, ServiceEndpoint, TopologyModel};
use crate::types::ProbeResult;

/// How a vector was derived from the topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum VectorOrigin {
    Direct,
    Peered,
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestVector {
    pub vnet: String,
    pub origin: VectorOrigin,
    /// Interface of the endpoint the vector is sourced from
    pub ifname: String,
    pub src_ip: Ipv4Addr,
    pub port: u16,
    pub vlan_id: u16,
    pub vni: u32,
    pub dst_prefix: Ipv4Net,
    pub dst_ip: Ipv4Addr,
    /// Underlay address of the remote tunnel endpoint
    pub nexthop: Ipv4Addr,
    /// Destination MAC of the inner frame after encapsulation
    pub nexthop_mac: MacAddr,
    pub dst_vni: Option<u32>,
}

impl TestVector {
    /// The VNI traffic from this vector is encapsulated with.
    pub fn encap_vni(&self) -> u32 {
        self.dst_vni.unwrap_or(self.vni)
    }

    pub fn is_tagged(&self) -> bool {
        self.vlan_id != 0
    }

    // Re-source the vector from a different endpoint.
    fn sourced_from(&self, ep: &ServiceEndpoint, origin: VectorOrigin) -> Self {
        TestVector {
            vnet: ep.vnet.clone(),
            origin,
            ifname: ep.ifname.clone(),
            src_ip: ep.ip,
            port: ep.port(),
            vlan_id: ep.vlan_id,
            vni: ep.vni,
            ..self.clone()
        }
    }
}

impl fmt::Display for TestVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {} via {}",
            self.vnet, self.origin, self.src_ip, self.dst_prefix, self.nexthop
        )
    }
}

#[derive(Clone, Debug)]
pub struct VectorSet {
    vectors: Vec<TestVector>,
    // For each vnet, its peers
    peers: Vec<(String, Vec<String>)>,
}

impl VectorSet {
    pub fn synthesize(topo: &TopologyModel) -> ProbeResult<VectorSet> {
        let mut vectors = Vec::new();

        for route in topo.routes() {
            let ep = topo.lookup_service_endpoint(&route.vnet, None)?;
            let direct = TestVector {
                vnet: route.vnet.clone(),
                origin: VectorOrigin::Direct,
                ifname: ep.ifname.clone(),
                src_ip: ep.ip,
                port: ep.port(),
                vlan_id: ep.vlan_id,
                vni: ep.vni,
                dst_prefix: route.prefix,
                dst_ip: route.prefix.addr(),
                nexthop: route.nexthop,
                nexthop_mac: route.inner_mac(),
                dst_vni: route.vni,
            };

            let mut siblings = Vec::new();
            for peer in topo.peers_of(&route.vnet) {
                let ep = topo.lookup_service_endpoint(peer, None)?;
                siblings.push(direct.sourced_from(ep, VectorOrigin::Peered));
            }

            for local in
                topo.local_routes().iter().filter(|l| l.vnet == route.vnet)
            {
                let ep =
                    topo.lookup_service_endpoint(&local.vnet, Some(&local.ifname))?;
                let mut v = direct.sourced_from(ep, VectorOrigin::Local);
                v.src_ip = first_host(&local.prefix);
                siblings.push(v);
            }

            vectors.push(direct);
            vectors.extend(siblings);
        }

        let peers = topo
            .vnets()
            .iter()
            .map(|v| {
                let names =
                    topo.peers_of(&v.name).into_iter().map(String::from);
                (v.name.clone(), names.collect())
            })
            .collect();

        Ok(VectorSet { vectors, peers })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestVector> {
        self.vectors.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&TestVector> {
        self.vectors.get(idx)
    }

    /// Every vector, of any origin, whose VNet is peered with the VNet of
    /// `vector`.  These are the destinations for server-to-server traffic.
    pub fn peers_of(&self, vector: &TestVector) -> Vec<&TestVector> {
        let Some((_, partners)) =
            self.peers.iter().find(|(name, _)| *name == vector.vnet)
        else {
            return Vec::new();
        };
        self.vectors
            .iter()
            .filter(|v| partners.contains(&v.vnet))
            .collect()
    }
}

impl<'a> IntoIterator for &'a VectorSet {
    type Item = &'a TestVector;
    type IntoIter = std::slice::Iter<'a, TestVector>;

    fn into_iter(self) -> Self::IntoIter {
        self.vectors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TOPOLOGY;
    use crate::topology::DEFAULT_ROUTER_MAC;
    use pretty_assertions::assert_eq;

    fn vectors() -> VectorSet {
        let topo = TopologyModel::from_json(TOPOLOGY).unwrap();
        VectorSet::synthesize(&topo).unwrap()
    }

    #[test]
    fn test_order() {
        let set = vectors();
        let summary: Vec<(String, VectorOrigin, u16)> = set
            .iter()
            .map(|v| (v.vnet.clone(), v.origin, v.port))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Vnet1".to_string(), VectorOrigin::Direct, 2),
                ("Vnet2".to_string(), VectorOrigin::Peered, 6),
                ("Vnet1".to_string(), VectorOrigin::Local, 5),
                ("Vnet2".to_string(), VectorOrigin::Direct, 6),
                ("Vnet1".to_string(), VectorOrigin::Peered, 2),
                ("Vnet3".to_string(), VectorOrigin::Direct, 8),
            ]
        );
    }

    #[test]
    fn test_vni_from_name() {
        for v in vectors().iter().filter(|v| v.vnet != "Vnet3") {
            let n: u32 = v.vnet.trim_start_matches("Vnet").parse().unwrap();
            assert_eq!(v.vni, 10000 + n);
        }
    }

    #[test]
    fn test_peering_symmetry() {
        let set = vectors();
        let direct = set.get(0).unwrap();
        let sibling = set.get(1).unwrap();
        assert_eq!(sibling.vnet, "Vnet2");
        assert_eq!(sibling.src_ip, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(sibling.vlan_id, 0);
        assert_eq!(sibling.vni, 10002);
        assert_eq!(sibling.dst_prefix, direct.dst_prefix);
        assert_eq!(sibling.dst_ip, direct.dst_ip);
        assert_eq!(sibling.nexthop, direct.nexthop);
        assert_eq!(sibling.nexthop_mac, direct.nexthop_mac);
        assert_eq!(sibling.dst_vni, direct.dst_vni);

        // The override on Vnet2's route survives onto Vnet1's sibling
        let sibling = set.get(4).unwrap();
        assert_eq!(sibling.vnet, "Vnet1");
        assert_eq!(sibling.vni, 10001);
        assert_eq!(sibling.dst_vni, Some(10001));
        assert_eq!(sibling.nexthop_mac.to_string(), "00:00:00:00:00:02");
    }

    #[test]
    fn test_local_sourcing() {
        let set = vectors();
        let local = set.get(2).unwrap();
        assert_eq!(local.origin, VectorOrigin::Local);
        assert_eq!(local.ifname, "Vlan1001");
        assert_eq!(local.vlan_id, 1001);
        assert_eq!(local.src_ip, Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(local.dst_ip, Ipv4Addr::new(1, 1, 1, 0));
        assert_eq!(local.nexthop_mac, DEFAULT_ROUTER_MAC);
    }

    #[test]
    fn test_encap_vni() {
        let set = vectors();
        assert_eq!(set.get(0).unwrap().encap_vni(), 10001);
        assert_eq!(set.get(3).unwrap().encap_vni(), 10001);
        assert_eq!(set.get(3).unwrap().vni, 10002);
        assert_eq!(set.get(5).unwrap().encap_vni(), 20003);
    }

    #[test]
    fn test_peers_of() {
        let set = vectors();
        let peers: Vec<usize> = set
            .peers_of(set.get(0).unwrap())
            .into_iter()
            .map(|p| set.iter().position(|v| std::ptr::eq(v, p)).unwrap())
            .collect();
        assert_eq!(peers, vec![1, 3]);

        // Local vectors are partners too
        let peers: Vec<usize> = set
            .peers_of(set.get(3).unwrap())
            .into_iter()
            .map(|p| set.iter().position(|v| std::ptr::eq(v, p)).unwrap())
            .collect();
        assert_eq!(peers, vec![0, 2, 4]);

        assert!(set.peers_of(set.get(5).unwrap()).is_empty());
    }

    #[test]
    fn test_unknown_vnet() {
        let mut v: serde_json::Value = serde_json::from_str(TOPOLOGY).unwrap();
        v["vnet_routes"].as_array_mut().unwrap().push(serde_json::json!(
            {"Vnet9_route_list": [{"pfx": "9.9.9.0/24", "end": "100.1.1.90"}]}
        ));
        let topo = TopologyModel::from_json(&v.to_string()).unwrap();
        assert!(matches!(
            VectorSet::synthesize(&topo),
            Err(crate::types::ProbeError::TopologyResolution(_))
        ));
    }
}
