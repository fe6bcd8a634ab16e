// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::ipv4;
use crate::pbuf::ParseBuffer;
use crate::vxlan;
use crate::Endpoint;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

const UDP_HDR_SZ: usize = 8;

// UDP checksums are optional over IPv4 and tunnel endpoints routinely send
// zero, so generated packets always carry 0 here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UdpHdr {
    pub udp_sport: u16,
    pub udp_dport: u16,
    pub udp_len: u16,
    pub udp_sum: u16,
}

impl UdpHdr {
    pub fn update_len(pkt: &mut Packet) {
        let payload = vxlan::VxlanHdr::header_size(pkt) + pkt.body_len();
        if let Some(udp) = pkt.hdrs.udp_hdr.as_mut() {
            udp.udp_len = (UDP_HDR_SZ + payload) as u16;
        }
    }

    pub fn set_sport(pkt: &mut Packet, sport: u16) {
        if let Some(udp) = pkt.hdrs.udp_hdr.as_mut() {
            udp.udp_sport = sport;
        }
    }
}

impl Protocol for UdpHdr {
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self> {
        if pb.bytes_left() < UDP_HDR_SZ {
            return Err(crate::parse_error(pb, "udp header too short"));
        }

        Ok(UdpHdr {
            udp_sport: pb.get_u16()?,
            udp_dport: pb.get_u16()?,
            udp_len: pb.get_u16()?,
            udp_sum: pb.get_u16()?,
        })
    }

    fn gen(
        src: Endpoint,
        dst: Endpoint,
        mut protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        if protos.first() != Some(&(ipv4::IPPROTO_UDP as u16)) {
            return Err(PacketError::Invalid(
                "protocol stack does not start with udp".to_string(),
            ));
        }
        protos.remove(0);

        let mut pkt = ipv4::Ipv4Hdr::gen(src, dst, protos, body)?;
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_proto = ipv4::IPPROTO_UDP;
        }
        pkt.hdrs.udp_hdr = Some(UdpHdr {
            udp_sport: src.port,
            udp_dport: dst.port,
            udp_len: 0,
            udp_sum: 0,
        });
        Ok(pkt)
    }

    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut> {
        let udp = match &pkt.hdrs.udp_hdr {
            Some(udp) => udp,
            None => {
                return Err(PacketError::Deparse(
                    "packet has no udp header".to_string(),
                ))
            }
        };

        let mut v = ipv4::Ipv4Hdr::deparse(pkt, hdr_size + UDP_HDR_SZ)?;
        v.put_u16(udp.udp_sport);
        v.put_u16(udp.udp_dport);
        v.put_u16(udp.udp_len);
        v.put_u16(udp.udp_sum);
        Ok(v)
    }

    fn header_size(pkt: &Packet) -> usize {
        match &pkt.hdrs.udp_hdr {
            Some(_) => UDP_HDR_SZ,
            None => 0,
        }
    }
}

impl fmt::Display for UdpHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "udp {} -> {} len {}",
            self.udp_sport, self.udp_dport, self.udp_len
        )
    }
}
