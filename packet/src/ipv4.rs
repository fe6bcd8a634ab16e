// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;
use std::net::Ipv4Addr;

use bytes::{BufMut, BytesMut};

use crate::eth;
use crate::pbuf::ParseBuffer;
use crate::tcp;
use crate::udp;
use crate::vxlan;
use crate::Endpoint;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// The "don't fragment" bit of the 3-bit flags field.
pub const IPV4_FLAG_DF: u8 = 0x2;

pub const DEFAULT_TTL: u8 = 64;

const IPV4_HDR_SZ: usize = 20;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Hdr {
    pub ipv4_version: u8,
    pub ipv4_ihl: u8,
    pub ipv4_dscp: u8,
    pub ipv4_ecn: u8,
    pub ipv4_total_len: u16,
    pub ipv4_id: u16,
    pub ipv4_flags: u8,
    pub ipv4_frag_off: u16,
    pub ipv4_ttl: u8,
    pub ipv4_proto: u8,
    pub ipv4_sum: u16,
    pub ipv4_src_ip: Ipv4Addr,
    pub ipv4_dst_ip: Ipv4Addr,
    pub ipv4_options: Vec<u8>,
}

impl Ipv4Hdr {
    pub fn size(&self) -> usize {
        self.ipv4_ihl as usize * 4
    }

    fn write(&self, v: &mut BytesMut, sum: u16) {
        v.put_u8((self.ipv4_version << 4) | (self.ipv4_ihl & 0xf));
        v.put_u8((self.ipv4_dscp << 2) | (self.ipv4_ecn & 0x3));
        v.put_u16(self.ipv4_total_len);
        v.put_u16(self.ipv4_id);
        v.put_u16(
            ((self.ipv4_flags as u16 & 0x7) << 13)
                | (self.ipv4_frag_off & 0x1fff),
        );
        v.put_u8(self.ipv4_ttl);
        v.put_u8(self.ipv4_proto);
        v.put_u16(sum);
        v.put_slice(&self.ipv4_src_ip.octets());
        v.put_slice(&self.ipv4_dst_ip.octets());
        v.put_slice(&self.ipv4_options);
    }

    /// The header checksum this header should carry.
    pub fn checksum(&self) -> u16 {
        let mut v = BytesMut::with_capacity(self.size());
        self.write(&mut v, 0);
        u16::from_be_bytes(internet_checksum::checksum(&v))
    }

    /// Add `delta` to the TTL, saturating at the ends of the range, and
    /// refresh the header checksum.
    pub fn adjust_ttl(pkt: &mut Packet, delta: i16) {
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            let ttl = (ip.ipv4_ttl as i16 + delta).clamp(0, 255);
            ip.ipv4_ttl = ttl as u8;
            ip.ipv4_sum = ip.checksum();
        }
    }

    pub fn set_ttl(pkt: &mut Packet, ttl: u8) {
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_ttl = ttl;
            ip.ipv4_sum = ip.checksum();
        }
    }

    pub fn set_id(pkt: &mut Packet, id: u16) {
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_id = id;
            ip.ipv4_sum = ip.checksum();
        }
    }

    pub fn set_dont_fragment(pkt: &mut Packet, df: bool) {
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            if df {
                ip.ipv4_flags |= IPV4_FLAG_DF;
            } else {
                ip.ipv4_flags &= !IPV4_FLAG_DF;
            }
            ip.ipv4_sum = ip.checksum();
        }
    }

    pub fn dont_fragment(pkt: &Packet) -> bool {
        pkt.hdrs
            .ipv4_hdr
            .as_ref()
            .map(|ip| ip.ipv4_flags & IPV4_FLAG_DF != 0)
            .unwrap_or(false)
    }

    pub fn update_len(pkt: &mut Packet) {
        let payload = udp::UdpHdr::header_size(pkt)
            + tcp::TcpHdr::header_size(pkt)
            + vxlan::VxlanHdr::header_size(pkt)
            + pkt.body_len();
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_total_len = (ip.size() + payload) as u16;
        }
    }

    pub fn update_checksum(pkt: &mut Packet) {
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_sum = ip.checksum();
        }
    }
}

impl Protocol for Ipv4Hdr {
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self> {
        if pb.bytes_left() < IPV4_HDR_SZ {
            return Err(crate::parse_error(pb, "ipv4 header too short"));
        }

        let ipv4_version = pb.get_bits(4)? as u8;
        let ipv4_ihl = pb.get_bits(4)? as u8;
        if ipv4_version != 4 {
            return Err(crate::parse_error(pb, "not an ipv4 header"));
        }
        if ipv4_ihl < 5 {
            return Err(crate::parse_error(pb, "ipv4 ihl too small"));
        }
        let ipv4_dscp = pb.get_bits(6)? as u8;
        let ipv4_ecn = pb.get_bits(2)? as u8;
        let ipv4_total_len = pb.get_u16()?;
        let ipv4_id = pb.get_u16()?;
        let ipv4_flags = pb.get_bits(3)? as u8;
        let ipv4_frag_off = pb.get_bits(13)? as u16;
        let ipv4_ttl = pb.get_u8()?;
        let ipv4_proto = pb.get_u8()?;
        let ipv4_sum = pb.get_u16()?;
        let ipv4_src_ip = pb.get_ipv4()?;
        let ipv4_dst_ip = pb.get_ipv4()?;
        let opt_len = (ipv4_ihl as usize * 4) - IPV4_HDR_SZ;
        let ipv4_options = pb.get_bytes(opt_len)?;

        Ok(Ipv4Hdr {
            ipv4_version,
            ipv4_ihl,
            ipv4_dscp,
            ipv4_ecn,
            ipv4_total_len,
            ipv4_id,
            ipv4_flags,
            ipv4_frag_off,
            ipv4_ttl,
            ipv4_proto,
            ipv4_sum,
            ipv4_src_ip,
            ipv4_dst_ip,
            ipv4_options,
        })
    }

    fn gen(
        src: Endpoint,
        dst: Endpoint,
        protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        if protos.first() != Some(&eth::ETHER_IPV4) {
            return Err(PacketError::Invalid(
                "ipv4 header must sit on an ipv4 ethertype".to_string(),
            ));
        }

        let mut pkt = eth::EthHdr::gen(src, dst, protos, body)?;
        pkt.hdrs.ipv4_hdr = Some(Ipv4Hdr {
            ipv4_version: 4,
            ipv4_ihl: 5,
            ipv4_dscp: 0,
            ipv4_ecn: 0,
            ipv4_total_len: 0,
            ipv4_id: 1,
            ipv4_flags: 0,
            ipv4_frag_off: 0,
            ipv4_ttl: DEFAULT_TTL,
            ipv4_proto: 0,
            ipv4_sum: 0,
            ipv4_src_ip: src.ip,
            ipv4_dst_ip: dst.ip,
            ipv4_options: Vec::new(),
        });
        Ok(pkt)
    }

    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut> {
        let ip = match &pkt.hdrs.ipv4_hdr {
            Some(ip) => ip,
            None => {
                return Err(PacketError::Deparse(
                    "packet has no ipv4 header".to_string(),
                ))
            }
        };

        let mut v = eth::EthHdr::deparse(pkt, hdr_size + ip.size())?;
        ip.write(&mut v, ip.ipv4_sum);
        Ok(v)
    }

    fn header_size(pkt: &Packet) -> usize {
        match &pkt.hdrs.ipv4_hdr {
            Some(ip) => ip.size(),
            None => 0,
        }
    }
}

impl fmt::Display for Ipv4Hdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ipv4 {} -> {} proto {} id {} ttl {}",
            self.ipv4_src_ip,
            self.ipv4_dst_ip,
            self.ipv4_proto,
            self.ipv4_id,
            self.ipv4_ttl
        )?;
        if self.ipv4_flags & IPV4_FLAG_DF != 0 {
            write!(f, " DF")?;
        }
        Ok(())
    }
}

#[cfg(test)]
use hex_literal::hex;

#[test]
fn test_checksum() {
    // Textbook header with a known-good checksum
    let bytes = hex!(
        "
        0001 0203 0405 00aa bbcc 789a 0800 4500
        0073 0000 4000 4011 b861 c0a8 0001 c0a8
        00c7
    "
    );

    let p = Packet::parse(&[&bytes[..], &[0u8; 95][..]].concat()).unwrap();
    let ip = p.hdrs.ipv4_hdr.unwrap();
    assert_eq!(ip.ipv4_sum, 0xb861);
    assert_eq!(ip.checksum(), 0xb861);
    assert_eq!(ip.ipv4_flags, IPV4_FLAG_DF);
}

#[test]
fn test_adjust_ttl() {
    let src = Endpoint::parse("00:01:02:03:04:05", "10.1.0.5", 0).unwrap();
    let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "192.168.0.2", 0).unwrap();
    let mut pkt =
        Packet::gen(src, dst, vec![eth::ETHER_IPV4], Some(&[0; 26])).unwrap();
    let before = pkt.hdrs.ipv4_hdr.clone().unwrap();
    assert_eq!(before.ipv4_ttl, 64);
    assert_eq!(before.ipv4_total_len, 46);

    Ipv4Hdr::adjust_ttl(&mut pkt, -1);
    let after = pkt.hdrs.ipv4_hdr.clone().unwrap();
    assert_eq!(after.ipv4_ttl, 63);
    assert_ne!(after.ipv4_sum, before.ipv4_sum);
    assert_eq!(after.ipv4_sum, after.checksum());

    // The checksum we carry must validate on the wire
    let wire = pkt.deparse().unwrap();
    assert_eq!(internet_checksum::checksum(&wire[14..34]), [0, 0]);
}
