// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::pbuf::ParseBuffer;
use crate::Endpoint;
use crate::MacAddr;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

pub const ETHER_IPV4: u16 = 0x0800;
pub const ETHER_ARP: u16 = 0x0806;
pub const ETHER_VLAN: u16 = 0x8100;

const ETH_HDR_SZ: usize = 14;
const ETH_8021Q_SZ: usize = 4;

/// An 802.1Q tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EthQHdr {
    pub eth_pcp: u8,
    pub eth_dei: u8,
    pub eth_vlan_tag: u16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EthHdr {
    pub eth_dmac: MacAddr,
    pub eth_smac: MacAddr,
    pub eth_8021q: Option<EthQHdr>,
    pub eth_type: u16,
}

impl EthHdr {
    pub fn size(&self) -> usize {
        match self.eth_8021q {
            Some(_) => ETH_HDR_SZ + ETH_8021Q_SZ,
            None => ETH_HDR_SZ,
        }
    }

    pub fn rewrite_dmac(pkt: &mut Packet, mac: MacAddr) {
        if let Some(eth) = pkt.hdrs.eth_hdr.as_mut() {
            eth.eth_dmac = mac;
        }
    }

    pub fn rewrite_smac(pkt: &mut Packet, mac: MacAddr) {
        if let Some(eth) = pkt.hdrs.eth_hdr.as_mut() {
            eth.eth_smac = mac;
        }
    }

    /// Tag the frame with `vlan_id`, replacing any existing tag.  VLAN 0
    /// strips the tag instead, leaving an untagged frame.
    pub fn set_vlan(pkt: &mut Packet, vlan_id: u16) {
        if let Some(eth) = pkt.hdrs.eth_hdr.as_mut() {
            eth.eth_8021q = match vlan_id {
                0 => None,
                vid => Some(EthQHdr {
                    eth_pcp: 0,
                    eth_dei: 0,
                    eth_vlan_tag: vid & 0xfff,
                }),
            };
        }
    }

    /// The VLAN the frame is tagged with, or 0 if untagged.
    pub fn vlan(pkt: &Packet) -> u16 {
        pkt.hdrs
            .eth_hdr
            .as_ref()
            .and_then(|e| e.eth_8021q)
            .map(|q| q.eth_vlan_tag)
            .unwrap_or(0)
    }
}

impl Protocol for EthHdr {
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self> {
        if pb.bytes_left() < ETH_HDR_SZ {
            return Err(crate::parse_error(pb, "ethernet header too short"));
        }

        let eth_dmac = pb.get_mac()?;
        let eth_smac = pb.get_mac()?;
        let mut eth_type = pb.get_u16()?;
        let mut eth_8021q = None;
        if eth_type == ETHER_VLAN {
            let eth_pcp = pb.get_bits(3)? as u8;
            let eth_dei = pb.get_bits(1)? as u8;
            let eth_vlan_tag = pb.get_bits(12)? as u16;
            eth_8021q = Some(EthQHdr {
                eth_pcp,
                eth_dei,
                eth_vlan_tag,
            });
            eth_type = pb.get_u16()?;
        }

        Ok(EthHdr {
            eth_dmac,
            eth_smac,
            eth_8021q,
            eth_type,
        })
    }

    fn gen(
        src: Endpoint,
        dst: Endpoint,
        protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        let eth_type = match protos.first() {
            Some(t) => *t,
            None => {
                return Err(PacketError::Invalid(
                    "no ethertype for ethernet header".to_string(),
                ))
            }
        };

        let mut pkt = Packet::new(body);
        pkt.hdrs.eth_hdr = Some(EthHdr {
            eth_dmac: dst.mac,
            eth_smac: src.mac,
            eth_8021q: None,
            eth_type,
        });
        Ok(pkt)
    }

    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut> {
        let eth = match &pkt.hdrs.eth_hdr {
            Some(eth) => eth,
            None => {
                return Err(PacketError::Deparse(
                    "packet has no ethernet header".to_string(),
                ))
            }
        };

        let mut v =
            BytesMut::with_capacity(hdr_size + eth.size() + pkt.body_len());
        v.put_slice(&eth.eth_dmac.octets());
        v.put_slice(&eth.eth_smac.octets());
        if let Some(q) = eth.eth_8021q {
            v.put_u16(ETHER_VLAN);
            v.put_u16(
                ((q.eth_pcp as u16 & 0x7) << 13)
                    | ((q.eth_dei as u16 & 0x1) << 12)
                    | (q.eth_vlan_tag & 0xfff),
            );
        }
        v.put_u16(eth.eth_type);
        Ok(v)
    }

    fn header_size(pkt: &Packet) -> usize {
        match &pkt.hdrs.eth_hdr {
            Some(eth) => eth.size(),
            None => 0,
        }
    }
}

impl fmt::Display for EthHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eth {} -> {}", self.eth_smac, self.eth_dmac)?;
        if let Some(q) = self.eth_8021q {
            write!(f, " vlan {}", q.eth_vlan_tag)?;
        }
        write!(f, " type {:#06x}", self.eth_type)
    }
}

#[cfg(test)]
use hex_literal::hex;

#[test]
fn test_tagged_parse() {
    let bytes = hex!(
        "
        0001 0203 0405 00aa bbcc 789a 8100 03e8
        0806 0000
    "
    );

    let p = Packet::parse(&bytes).unwrap();
    let eth = p.hdrs.eth_hdr.unwrap();
    assert_eq!(eth.eth_dmac, MacAddr::new(0, 1, 2, 3, 4, 5));
    assert_eq!(eth.eth_8021q.unwrap().eth_vlan_tag, 1000);
    assert_eq!(eth.eth_type, ETHER_ARP);
    assert_eq!(p.body.unwrap(), vec![0, 0]);
}

#[test]
fn test_vlan_toggle() {
    let src = Endpoint::parse("00:01:02:03:04:05", "10.0.0.1", 0).unwrap();
    let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.0.0.2", 0).unwrap();
    let mut pkt = EthHdr::gen(src, dst, vec![ETHER_ARP], Some(&[0; 46]))
        .unwrap();
    assert_eq!(pkt.len(), 60);

    EthHdr::set_vlan(&mut pkt, 1000);
    assert_eq!(pkt.len(), 64);
    assert_eq!(EthHdr::vlan(&pkt), 1000);
    let wire = pkt.deparse().unwrap();
    assert_eq!(&wire[12..16], &[0x81, 0x00, 0x03, 0xe8]);

    EthHdr::set_vlan(&mut pkt, 0);
    assert_eq!(pkt.len(), 60);
    assert_eq!(EthHdr::vlan(&pkt), 0);
}
