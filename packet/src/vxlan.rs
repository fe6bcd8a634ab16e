// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! VXLAN (RFC 7348) encapsulation.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::eth;
use crate::ipv4;
use crate::pbuf::ParseBuffer;
use crate::udp;
use crate::Endpoint;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

/// IANA-assigned VXLAN port, the one `Packet::parse` recognizes.  Tunnels on
/// other ports need `Packet::parse_with_vxlan_port`.
pub const VXLAN_UDP_PORT: u16 = 4789;

/// The "I" flag: the VNI field is valid.
pub const VXLAN_FLAG_VNI: u8 = 0x08;

pub const VXLAN_MAX_VNI: u32 = 0xff_ffff;

const VXLAN_HDR_SZ: usize = 8;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VxlanHdr {
    pub vxlan_flags: u8,
    pub vxlan_vni: u32,
}

impl VxlanHdr {
    /// Wrap `inner` in Ethernet/IPv4/UDP/VXLAN headers addressed from `src`
    /// to `dst`.  The UDP ports come from the endpoints; the outer IPv4
    /// header gets id 0 and the default TTL.
    pub fn encapsulate(
        src: Endpoint,
        dst: Endpoint,
        vni: u32,
        inner: &Packet,
    ) -> PacketResult<Packet> {
        if vni > VXLAN_MAX_VNI {
            return Err(PacketError::Invalid(format!("vni {vni} too large")));
        }

        let body = inner.deparse()?;
        let mut pkt = udp::UdpHdr::gen(
            src,
            dst,
            vec![ipv4::IPPROTO_UDP as u16, eth::ETHER_IPV4],
            Some(&body),
        )?;
        pkt.hdrs.vxlan_hdr = Some(VxlanHdr {
            vxlan_flags: VXLAN_FLAG_VNI,
            vxlan_vni: vni,
        });
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_id = 0;
        }
        pkt.finalize();
        Ok(pkt)
    }

    /// Parse the body of a VXLAN packet as the inner Ethernet frame.
    pub fn decapsulate(pkt: &Packet) -> PacketResult<Packet> {
        if pkt.hdrs.vxlan_hdr.is_none() {
            return Err(PacketError::Invalid("not a vxlan packet".to_string()));
        }
        match &pkt.body {
            Some(body) => Packet::parse(body),
            None => Err(PacketError::Invalid("empty vxlan body".to_string())),
        }
    }

    pub fn vni(pkt: &Packet) -> Option<u32> {
        pkt.hdrs.vxlan_hdr.as_ref().map(|v| v.vxlan_vni)
    }
}

impl Protocol for VxlanHdr {
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self> {
        if pb.bytes_left() < VXLAN_HDR_SZ {
            return Err(crate::parse_error(pb, "vxlan header too short"));
        }

        let vxlan_flags = pb.get_u8()?;
        let _reserved = pb.get_u24()?;
        let vxlan_vni = pb.get_u24()?;
        let _reserved = pb.get_u8()?;
        if vxlan_flags & VXLAN_FLAG_VNI == 0 {
            return Err(crate::parse_error(pb, "vxlan vni flag not set"));
        }

        Ok(VxlanHdr {
            vxlan_flags,
            vxlan_vni,
        })
    }

    fn gen(
        _src: Endpoint,
        _dst: Endpoint,
        _protos: Vec<u16>,
        _body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        Err(PacketError::Invalid(
            "vxlan packets are built with VxlanHdr::encapsulate".to_string(),
        ))
    }

    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut> {
        let vxlan = match &pkt.hdrs.vxlan_hdr {
            Some(vxlan) => vxlan,
            None => {
                return Err(PacketError::Deparse(
                    "packet has no vxlan header".to_string(),
                ))
            }
        };

        let mut v = udp::UdpHdr::deparse(pkt, hdr_size + VXLAN_HDR_SZ)?;
        v.put_u8(vxlan.vxlan_flags);
        v.put_slice(&[0, 0, 0]);
        v.put_slice(&vxlan.vxlan_vni.to_be_bytes()[1..]);
        v.put_u8(0);
        Ok(v)
    }

    fn header_size(pkt: &Packet) -> usize {
        match &pkt.hdrs.vxlan_hdr {
            Some(_) => VXLAN_HDR_SZ,
            None => 0,
        }
    }
}

impl fmt::Display for VxlanHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vxlan vni {}", self.vxlan_vni)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    fn inner() -> Packet {
        let src =
            Endpoint::parse("00:01:02:03:04:05", "192.168.0.2", 0).unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.5", 0).unwrap();
        Packet::gen(
            src,
            dst,
            vec![ipv4::IPPROTO_TCP as u16, eth::ETHER_IPV4],
            Some(&[0; 46]),
        )
        .unwrap()
    }

    #[test]
    fn test_encapsulate() {
        let src = Endpoint::parse("00:01:02:03:04:05", "10.0.0.57", 1234)
            .unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.32", 4789)
            .unwrap();
        let inner = inner();
        let pkt = VxlanHdr::encapsulate(src, dst, 10001, &inner).unwrap();
        assert_eq!(pkt.len(), 14 + 20 + 8 + 8 + inner.len());

        let wire = pkt.deparse().unwrap();
        // udp ports, length, zero checksum
        assert_eq!(&wire[34..42], &hex!("04d2 12b5 0074 0000"));
        // flags, reserved, vni 10001, reserved
        assert_eq!(&wire[42..50], &hex!("0800 0000 0027 1100"));

        let parsed = Packet::parse(&wire).unwrap();
        assert_eq!(VxlanHdr::vni(&parsed), Some(10001));
        let ip = parsed.hdrs.ipv4_hdr.as_ref().unwrap();
        assert_eq!(ip.ipv4_id, 0);
        assert_eq!(ip.ipv4_ttl, ipv4::DEFAULT_TTL);
        assert_eq!(VxlanHdr::decapsulate(&parsed).unwrap(), inner);
    }

    #[test]
    fn test_other_port_is_plain_udp() {
        let src = Endpoint::parse("00:01:02:03:04:05", "10.0.0.57", 1234)
            .unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.32", 13330)
            .unwrap();
        let pkt = VxlanHdr::encapsulate(src, dst, 10001, &inner()).unwrap();
        let wire = pkt.deparse().unwrap();
        let parsed = Packet::parse(&wire).unwrap();
        assert!(parsed.hdrs.vxlan_hdr.is_none());
        assert!(parsed.hdrs.udp_hdr.is_some());

        let parsed = Packet::parse_with_vxlan_port(&wire, 13330).unwrap();
        assert_eq!(VxlanHdr::vni(&parsed), Some(10001));
    }

    #[test]
    fn test_vni_range() {
        let src = Endpoint::parse("00:01:02:03:04:05", "10.0.0.57", 1234)
            .unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.32", 4789)
            .unwrap();
        assert!(VxlanHdr::encapsulate(src, dst, 1 << 24, &inner()).is_err());
    }
}
