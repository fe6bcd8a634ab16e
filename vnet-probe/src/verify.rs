// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The three packet exchanges run against every test vector.
//!
//! - FromServer: a plain frame from a server port must leave on some uplink,
//!   VXLAN-encapsulated toward the route's next hop.
//! - FromVM: an encapsulated frame arriving on an uplink must be
//!   decapsulated and delivered to the vector's server port.
//! - Serv2Serv: a frame between endpoints of peered VNets must be routed
//!   directly, without ever being encapsulated.

use std::time::Duration;

use common::network::MacAddr;
use packet::eth::{self, EthHdr};
use packet::ipv4::{self, Ipv4Hdr};
use packet::mask::{Field, Mask};
use packet::vxlan::VxlanHdr;
use packet::{Endpoint, Packet};
use slog::{debug, error, info};

use crate::harness::{PacketHarness, PhysPort};
use crate::macaddrs::{port_ifname, MacRegistry};
use crate::report::{CheckOutcome, RunReport, VectorReport};
use crate::topology::{TopologyModel, DEFAULT_ROUTER_MAC};
use crate::types::{ProbeError, ProbeResult};
use crate::vectors::{TestVector, VectorSet};

/// Source MAC of frames from the far side of the underlay.
pub const REMOTE_MAC: MacAddr = MacAddr::new(0x00, 0x01, 0x02, 0x03, 0x04, 0x05);

/// Length of an untagged test frame.  A VLAN tag adds 4 bytes.
pub const PKT_LEN: usize = 100;

const TCP_SPORT: u16 = 1234;
const TCP_DPORT: u16 = 80;

// Fixed tunnel source port.  The device picks its own on egress, so it is
// only compared on ingress.
const TUNNEL_SPORT: u16 = 1234;

const FROM_VM_IP_ID: u16 = 108;
const FROM_SERVER_IP_ID: u16 = 105;
const SERV2SERV_IP_ID: u16 = 205;

const SERV2SERV_TTL: u8 = 2;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter,
)]
pub enum Check {
    FromServer,
    #[strum(serialize = "FromVM")]
    FromVm,
    Serv2Serv,
}

/// A 100-byte TCP frame, tagged with `vlan_id` unless it is 0.
pub fn tcp_frame(
    smac: MacAddr,
    dmac: MacAddr,
    vlan_id: u16,
    src_ip: std::net::Ipv4Addr,
    dst_ip: std::net::Ipv4Addr,
    ip_id: u16,
    ttl: u8,
) -> ProbeResult<Packet> {
    let src = Endpoint::new(smac, src_ip, TCP_SPORT);
    let dst = Endpoint::new(dmac, dst_ip, TCP_DPORT);
    let body = [0u8; PKT_LEN - 54];
    let mut pkt = Packet::gen(
        src,
        dst,
        vec![ipv4::IPPROTO_TCP as u16, eth::ETHER_IPV4],
        Some(&body),
    )?;
    Ipv4Hdr::set_id(&mut pkt, ip_id);
    Ipv4Hdr::set_ttl(&mut pkt, ttl);
    EthHdr::set_vlan(&mut pkt, vlan_id);
    Ok(pkt)
}

/// Builds the frames injected for each check and the frames the device is
/// expected to emit in response.
pub struct FrameBuilder<'a> {
    topo: &'a TopologyModel,
    macs: &'a MacRegistry,
    vxlan_port: u16,
}

impl<'a> FrameBuilder<'a> {
    pub fn new(
        topo: &'a TopologyModel,
        macs: &'a MacRegistry,
        vxlan_port: u16,
    ) -> Self {
        FrameBuilder {
            topo,
            macs,
            vxlan_port,
        }
    }

    /// The tunnelled frame sent to the device from the vector's next hop,
    /// and the decapsulated frame expected on the vector's server port.
    pub fn from_vm(&self, v: &TestVector) -> ProbeResult<(Packet, Packet)> {
        let dut_mac = self.topo.dut_mac();
        let inner = tcp_frame(
            REMOTE_MAC,
            DEFAULT_ROUTER_MAC,
            0,
            v.dst_ip,
            v.src_ip,
            FROM_VM_IP_ID,
            ipv4::DEFAULT_TTL,
        )?;
        let tunnel = VxlanHdr::encapsulate(
            Endpoint::new(REMOTE_MAC, v.nexthop, TUNNEL_SPORT),
            Endpoint::new(dut_mac, self.topo.loopback(), self.vxlan_port),
            v.vni,
            &inner,
        )?;

        let mut expected = inner;
        EthHdr::rewrite_smac(&mut expected, dut_mac);
        EthHdr::rewrite_dmac(&mut expected, self.macs.port_mac(v.port)?);
        EthHdr::set_vlan(&mut expected, v.vlan_id);
        Ipv4Hdr::adjust_ttl(&mut expected, -1);
        Ok((tunnel, expected))
    }

    /// The plain frame sent from the vector's server port, and a mask
    /// matching the encapsulated frame expected on an uplink.
    pub fn from_server(&self, v: &TestVector) -> ProbeResult<(Packet, Mask)> {
        let dut_mac = self.topo.dut_mac();
        let send = tcp_frame(
            self.macs.port_mac(v.port)?,
            dut_mac,
            v.vlan_id,
            v.src_ip,
            v.dst_ip,
            FROM_SERVER_IP_ID,
            ipv4::DEFAULT_TTL,
        )?;

        let mut inner = send.clone();
        EthHdr::set_vlan(&mut inner, 0);
        EthHdr::rewrite_smac(&mut inner, dut_mac);
        EthHdr::rewrite_dmac(&mut inner, v.nexthop_mac);
        Ipv4Hdr::adjust_ttl(&mut inner, -1);

        let mut tunnel = VxlanHdr::encapsulate(
            Endpoint::new(dut_mac, self.topo.loopback(), TUNNEL_SPORT),
            Endpoint::new(REMOTE_MAC, v.nexthop, self.vxlan_port),
            v.encap_vni(),
            &inner,
        )?;
        Ipv4Hdr::set_dont_fragment(&mut tunnel, true);

        let mut mask = Mask::new(&tunnel)?;
        for field in [
            Field::EthSrc,
            Field::EthDst,
            Field::Ipv4Ttl,
            Field::Ipv4Checksum,
            Field::UdpSrcPort,
        ] {
            mask.dont_care_field(&tunnel, field)?;
        }
        Ok((send, mask))
    }

    /// The frame sent from `v`'s server port toward `peer`'s address, and
    /// the routed frame expected on `peer`'s server port.
    pub fn serv2serv(
        &self,
        v: &TestVector,
        peer: &TestVector,
    ) -> ProbeResult<(Packet, Packet)> {
        let dut_mac = self.topo.dut_mac();
        let send = tcp_frame(
            self.macs.port_mac(v.port)?,
            dut_mac,
            v.vlan_id,
            v.src_ip,
            peer.src_ip,
            SERV2SERV_IP_ID,
            SERV2SERV_TTL,
        )?;

        let mut expected = send.clone();
        EthHdr::rewrite_smac(&mut expected, dut_mac);
        EthHdr::rewrite_dmac(&mut expected, self.macs.port_mac(peer.port)?);
        EthHdr::set_vlan(&mut expected, peer.vlan_id);
        Ipv4Hdr::adjust_ttl(&mut expected, -1);
        Ok((send, expected))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    pub vxlan_port: u16,
    /// How long to wait for each expected frame
    pub timeout: Duration,
}

pub struct VerificationEngine<'a, H> {
    log: slog::Logger,
    frames: FrameBuilder<'a>,
    uplinks: Vec<PhysPort>,
    harness: H,
    timeout: Duration,
}

impl<'a, H: PacketHarness> VerificationEngine<'a, H> {
    pub fn new(
        log: &slog::Logger,
        topo: &'a TopologyModel,
        macs: &'a MacRegistry,
        harness: H,
        config: EngineConfig,
    ) -> Self {
        VerificationEngine {
            log: log.new(slog::o!("unit" => "verify")),
            frames: FrameBuilder::new(topo, macs, config.vxlan_port),
            uplinks: topo.uplink_ports(),
            harness,
            timeout: config.timeout,
        }
    }

    /// Run every check for every vector.  Errors are recorded against the
    /// check that hit them and the run carries on with the next one.
    pub fn run(&mut self, vectors: &VectorSet) -> RunReport {
        let mut report = RunReport::default();
        for (idx, v) in vectors.iter().enumerate() {
            info!(self.log, "testing vector";
                "idx" => idx,
                "vnet" => &v.vnet,
                "origin" => %v.origin,
                "dst" => %v.dst_prefix);
            let outcomes = self.verify(vectors, v);
            report.vectors.push(VectorReport {
                idx,
                vector: v.clone(),
                outcomes,
            });
        }
        report
    }

    /// Run the three checks for one vector, in a fixed order.
    pub fn verify(
        &mut self,
        vectors: &VectorSet,
        v: &TestVector,
    ) -> Vec<CheckOutcome> {
        let from_server = self.check_from_server(v);
        let from_vm = self.check_from_vm(v);
        let peers = vectors.peers_of(v);
        let serv2serv = self.check_serv2serv(v, &peers);

        let outcomes = vec![from_server, from_vm, serv2serv];
        for o in &outcomes {
            if o.passed() {
                info!(self.log, "check passed";
                    "vnet" => &v.vnet,
                    "check" => %o.check,
                    "attempts" => o.attempts);
            } else {
                for f in &o.failures {
                    error!(self.log, "check failed";
                        "vnet" => &v.vnet,
                        "check" => %o.check,
                        "error" => %f);
                }
            }
        }
        outcomes
    }

    fn send(&mut self, port: PhysPort, pkt: &Packet) -> ProbeResult<()> {
        let frame = pkt.deparse()?;
        self.harness.flush()?;
        self.harness.send(port, &frame)
    }

    pub fn check_from_server(&mut self, v: &TestVector) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(Check::FromServer);
        outcome.record(self.from_server(v));
        outcome
    }

    fn from_server(&mut self, v: &TestVector) -> ProbeResult<()> {
        let (send, mask) = self.frames.from_server(v)?;
        debug!(self.log, "FromServer";
            "send" => port_ifname(v.port),
            "expect" => ?self.uplinks,
            "pkt" => %send);
        self.send(v.port, &send)?;

        match self
            .harness
            .expect_on_any_of(&self.uplinks, &mask, self.timeout)?
        {
            Some(port) => {
                debug!(self.log, "FromServer matched"; "port" => port);
                Ok(())
            }
            None => Err(ProbeError::Assertion(format!(
                "{v}: no vxlan frame ({mask}) seen on any uplink after \
                 sending from {}",
                port_ifname(v.port)
            ))),
        }
    }

    /// Inject the tunnelled frame on every uplink in turn; each injection
    /// is a separate attempt.
    pub fn check_from_vm(&mut self, v: &TestVector) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(Check::FromVm);
        let frames = match self.frames.from_vm(v) {
            Ok(f) => f,
            Err(e) => {
                outcome.record(Err(e));
                return outcome;
            }
        };

        for uplink in self.uplinks.clone() {
            let r = self.from_vm(v, uplink, &frames);
            outcome.record(r);
        }
        outcome
    }

    fn from_vm(
        &mut self,
        v: &TestVector,
        uplink: PhysPort,
        (tunnel, expected): &(Packet, Packet),
    ) -> ProbeResult<()> {
        debug!(self.log, "FromVM";
            "send" => port_ifname(uplink),
            "expect" => port_ifname(v.port),
            "pkt" => %tunnel);
        self.send(uplink, tunnel)?;

        let frame = expected.deparse()?;
        if self.harness.expect_exact(v.port, &frame, self.timeout)? {
            Ok(())
        } else {
            Err(ProbeError::Assertion(format!(
                "{v}: decapsulated frame not seen on {} after sending on {}",
                port_ifname(v.port),
                port_ifname(uplink)
            )))
        }
    }

    pub fn check_serv2serv(
        &mut self,
        v: &TestVector,
        peers: &[&TestVector],
    ) -> CheckOutcome {
        let mut outcome = CheckOutcome::new(Check::Serv2Serv);
        for peer in peers {
            let r = self.serv2serv(v, peer);
            outcome.record(r);
        }
        outcome
    }

    fn serv2serv(&mut self, v: &TestVector, peer: &TestVector) -> ProbeResult<()> {
        let (send, expected) = self.frames.serv2serv(v, peer)?;
        debug!(self.log, "Serv2Serv";
            "send" => port_ifname(v.port),
            "expect" => port_ifname(peer.port),
            "dst" => %peer.src_ip);
        self.send(v.port, &send)?;

        let frame = expected.deparse()?;
        if self.harness.expect_exact(peer.port, &frame, self.timeout)? {
            Ok(())
        } else {
            Err(ProbeError::Assertion(format!(
                "{v}: frame to {} ({}) not seen on {}",
                peer.src_ip,
                peer.vnet,
                port_ifname(peer.port)
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TOPOLOGY;
    use packet::tcp::TcpHdr;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn setup() -> (TopologyModel, MacRegistry, VectorSet) {
        let topo = TopologyModel::from_json(TOPOLOGY).unwrap();
        let macs = (0..32u8)
            .map(|p| (port_ifname(p as u16), MacAddr::new(0x02, 0, 0, 0, 0, p)))
            .collect();
        let vectors = VectorSet::synthesize(&topo).unwrap();
        (topo, macs, vectors)
    }

    #[test]
    fn test_check_names() {
        use strum::IntoEnumIterator;
        let names: Vec<String> = Check::iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["FromServer", "FromVM", "Serv2Serv"]);
    }

    #[test]
    fn test_tcp_frame_lengths() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let untagged =
            tcp_frame(REMOTE_MAC, DEFAULT_ROUTER_MAC, 0, a, b, 1, 64).unwrap();
        assert_eq!(untagged.deparse().unwrap().len(), PKT_LEN);
        let tagged =
            tcp_frame(REMOTE_MAC, DEFAULT_ROUTER_MAC, 1000, a, b, 1, 64).unwrap();
        let wire = tagged.deparse().unwrap();
        assert_eq!(wire.len(), PKT_LEN + 4);
        assert_eq!(&wire[12..16], &[0x81, 0x00, 0x03, 0xe8]);
    }

    // Scenario A: decapsulation onto a tagged server port
    #[test]
    fn test_from_vm_frames() {
        let (topo, macs, vectors) = setup();
        let frames = FrameBuilder::new(&topo, &macs, 4789);
        let v = vectors.get(0).unwrap();
        let (tunnel, expected) = frames.from_vm(v).unwrap();

        let wire = tunnel.deparse().unwrap();
        let parsed = Packet::parse(&wire).unwrap();
        assert_eq!(VxlanHdr::vni(&parsed), Some(10001));
        let outer = parsed.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(outer.ipv4_src_ip, Ipv4Addr::new(100, 1, 1, 10));
        assert_eq!(outer.ipv4_dst_ip, topo.loopback());
        assert_eq!(outer.ipv4_id, 0);
        let udp = parsed.hdrs.udp_hdr.as_ref().unwrap();
        assert_eq!((udp.udp_sport, udp.udp_dport, udp.udp_sum), (1234, 4789, 0));

        let inner = VxlanHdr::decapsulate(&parsed).unwrap();
        assert_eq!(inner.len(), PKT_LEN);
        let ip = inner.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(ip.ipv4_ttl, 64);
        assert_eq!(ip.ipv4_id, FROM_VM_IP_ID);

        assert_eq!(expected.len(), PKT_LEN + 4);
        assert_eq!(EthHdr::vlan(&expected), 1000);
        let eth = expected.hdrs.eth_hdr.as_ref().unwrap();
        assert_eq!(eth.eth_smac, topo.dut_mac());
        assert_eq!(eth.eth_dmac, macs.port_mac(2).unwrap());
        let ip = expected.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(ip.ipv4_ttl, 63);
        assert_eq!(ip.ipv4_src_ip, Ipv4Addr::new(1, 1, 1, 0));
        assert_eq!(ip.ipv4_dst_ip, Ipv4Addr::new(192, 168, 0, 2));

        // The decapsulated frame is the injected inner frame modulo TTL and
        // the layer-2 rewrite.
        let mut undone = expected.clone();
        EthHdr::set_vlan(&mut undone, 0);
        EthHdr::rewrite_smac(&mut undone, REMOTE_MAC);
        EthHdr::rewrite_dmac(&mut undone, DEFAULT_ROUTER_MAC);
        Ipv4Hdr::adjust_ttl(&mut undone, 1);
        assert_eq!(undone, inner);
    }

    #[test]
    fn test_from_vm_uses_vnet_vni() {
        let (topo, macs, vectors) = setup();
        let frames = FrameBuilder::new(&topo, &macs, 4789);
        // Vnet2's route carries vni 10001, which only applies to traffic
        // leaving through the tunnel.
        let v = vectors.get(3).unwrap();
        assert_eq!(v.encap_vni(), 10001);
        let (tunnel, _) = frames.from_vm(v).unwrap();
        let parsed = Packet::parse(&tunnel.deparse().unwrap()).unwrap();
        assert_eq!(VxlanHdr::vni(&parsed), Some(10002));
    }

    // Scenario B: encapsulation from an untagged server port
    #[test]
    fn test_from_server_frames() {
        let (topo, macs, vectors) = setup();
        let frames = FrameBuilder::new(&topo, &macs, 4789);
        let v = vectors.get(3).unwrap();
        let (send, mask) = frames.from_server(v).unwrap();
        assert_eq!(send.len(), PKT_LEN);
        assert_eq!(EthHdr::vlan(&send), 0);

        let expected = Packet::parse(mask.expected()).unwrap();
        let outer = expected.hdrs.ipv4_hdr.as_ref().unwrap();
        assert!(outer.ipv4_flags & ipv4::IPV4_FLAG_DF != 0);
        assert_eq!(outer.ipv4_src_ip, topo.loopback());
        assert_eq!(outer.ipv4_dst_ip, Ipv4Addr::new(100, 1, 1, 20));
        // Vnet2's route overrides the vni
        assert_eq!(VxlanHdr::vni(&expected), Some(10001));

        let inner = VxlanHdr::decapsulate(&expected).unwrap();
        assert_eq!(inner.len(), PKT_LEN);
        let eth = inner.hdrs.eth_hdr.as_ref().unwrap();
        assert_eq!(eth.eth_dmac.to_string(), "00:00:00:00:00:02");
        assert_eq!(eth.eth_smac, topo.dut_mac());
        let ip = inner.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(ip.ipv4_ttl, 63);
        assert_eq!(ip.ipv4_id, FROM_SERVER_IP_ID);

        // Load-balancing choices are ignored
        let mut seen = expected.clone();
        EthHdr::rewrite_smac(&mut seen, MacAddr::new(2, 2, 2, 2, 2, 2));
        EthHdr::rewrite_dmac(&mut seen, MacAddr::new(4, 4, 4, 4, 4, 4));
        Ipv4Hdr::set_ttl(&mut seen, 255);
        packet::udp::UdpHdr::set_sport(&mut seen, 51234);
        assert!(mask.matches(&seen.deparse().unwrap()));

        // but a missing DF bit is not
        Ipv4Hdr::set_dont_fragment(&mut seen, false);
        assert!(!mask.matches(&seen.deparse().unwrap()));
    }

    // Scenario C: pass-through between peered VNets
    #[test]
    fn test_serv2serv_frames() {
        let (topo, macs, vectors) = setup();
        let frames = FrameBuilder::new(&topo, &macs, 4789);
        let v = vectors.get(0).unwrap();
        let peer = vectors.get(1).unwrap();
        let (send, expected) = frames.serv2serv(v, peer).unwrap();

        assert_eq!(EthHdr::vlan(&send), 1000);
        assert_eq!(send.len(), PKT_LEN + 4);
        assert_eq!(send.hdrs.ipv4_hdr.as_ref().unwrap().ipv4_ttl, 2);

        // The peer is untagged, so the frame shrinks on the way out
        assert_eq!(EthHdr::vlan(&expected), 0);
        assert_eq!(expected.len(), PKT_LEN);
        assert!(expected.hdrs.vxlan_hdr.is_none());
        let ip = expected.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(ip.ipv4_ttl, 1);
        assert_eq!(ip.ipv4_dst_ip, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(
            expected.hdrs.eth_hdr.as_ref().unwrap().eth_dmac,
            macs.port_mac(6).unwrap()
        );
        let tcp: &TcpHdr = expected.hdrs.tcp_hdr.as_ref().unwrap();
        assert_eq!((tcp.tcp_sport, tcp.tcp_dport), (TCP_SPORT, TCP_DPORT));
    }

    #[test]
    fn test_missing_mac() {
        let (topo, _, vectors) = setup();
        let macs = MacRegistry::default();
        let frames = FrameBuilder::new(&topo, &macs, 4789);
        assert!(matches!(
            frames.from_server(vectors.get(0).unwrap()),
            Err(ProbeError::TopologyResolution(_))
        ));
    }
}
