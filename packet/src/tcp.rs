// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::ipv4;
use crate::pbuf::ParseBuffer;
use crate::Endpoint;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_SYN: u8 = 0x02;
pub const TCP_FLAG_RST: u8 = 0x04;
pub const TCP_FLAG_PSH: u8 = 0x08;
pub const TCP_FLAG_ACK: u8 = 0x10;

const TCP_HDR_SZ: usize = 20;
const DEFAULT_WINDOW: u16 = 8192;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TcpHdr {
    pub tcp_sport: u16,
    pub tcp_dport: u16,
    pub tcp_seq: u32,
    pub tcp_ack: u32,
    pub tcp_offset: u8,
    pub tcp_flags: u8,
    pub tcp_window: u16,
    pub tcp_sum: u16,
    pub tcp_urg: u16,
    pub tcp_options: Vec<u8>,
}

impl TcpHdr {
    pub fn size(&self) -> usize {
        self.tcp_offset as usize * 4
    }

    fn write(&self, v: &mut BytesMut, sum: u16) {
        v.put_u16(self.tcp_sport);
        v.put_u16(self.tcp_dport);
        v.put_u32(self.tcp_seq);
        v.put_u32(self.tcp_ack);
        v.put_u8(self.tcp_offset << 4);
        v.put_u8(self.tcp_flags);
        v.put_u16(self.tcp_window);
        v.put_u16(sum);
        v.put_u16(self.tcp_urg);
        v.put_slice(&self.tcp_options);
    }

    /// Recompute the checksum over the IPv4 pseudo-header, the TCP header
    /// and the body.
    pub fn update_checksum(pkt: &mut Packet) {
        let (src, dst) = match &pkt.hdrs.ipv4_hdr {
            Some(ip) => (ip.ipv4_src_ip, ip.ipv4_dst_ip),
            None => return,
        };
        let body = pkt.body.clone().unwrap_or_default();
        let tcp = match pkt.hdrs.tcp_hdr.as_mut() {
            Some(tcp) => tcp,
            None => return,
        };

        let seg_len = tcp.size() + body.len();
        let mut v = BytesMut::with_capacity(12 + seg_len);
        v.put_slice(&src.octets());
        v.put_slice(&dst.octets());
        v.put_u8(0);
        v.put_u8(ipv4::IPPROTO_TCP);
        v.put_u16(seg_len as u16);
        tcp.write(&mut v, 0);
        v.put_slice(&body);
        tcp.tcp_sum = u16::from_be_bytes(internet_checksum::checksum(&v));
    }
}

impl Protocol for TcpHdr {
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self> {
        if pb.bytes_left() < TCP_HDR_SZ {
            return Err(crate::parse_error(pb, "tcp header too short"));
        }

        let tcp_sport = pb.get_u16()?;
        let tcp_dport = pb.get_u16()?;
        let tcp_seq = pb.get_u32()?;
        let tcp_ack = pb.get_u32()?;
        let tcp_offset = pb.get_bits(4)? as u8;
        let _reserved = pb.get_bits(4)?;
        let tcp_flags = pb.get_u8()?;
        let tcp_window = pb.get_u16()?;
        let tcp_sum = pb.get_u16()?;
        let tcp_urg = pb.get_u16()?;
        if tcp_offset < 5 {
            return Err(crate::parse_error(pb, "tcp data offset too small"));
        }
        let tcp_options =
            pb.get_bytes(tcp_offset as usize * 4 - TCP_HDR_SZ)?;

        Ok(TcpHdr {
            tcp_sport,
            tcp_dport,
            tcp_seq,
            tcp_ack,
            tcp_offset,
            tcp_flags,
            tcp_window,
            tcp_sum,
            tcp_urg,
            tcp_options,
        })
    }

    fn gen(
        src: Endpoint,
        dst: Endpoint,
        mut protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        if protos.first() != Some(&(ipv4::IPPROTO_TCP as u16)) {
            return Err(PacketError::Invalid(
                "protocol stack does not start with tcp".to_string(),
            ));
        }
        protos.remove(0);

        let mut pkt = ipv4::Ipv4Hdr::gen(src, dst, protos, body)?;
        if let Some(ip) = pkt.hdrs.ipv4_hdr.as_mut() {
            ip.ipv4_proto = ipv4::IPPROTO_TCP;
        }
        pkt.hdrs.tcp_hdr = Some(TcpHdr {
            tcp_sport: src.port,
            tcp_dport: dst.port,
            tcp_seq: 0,
            tcp_ack: 0,
            tcp_offset: 5,
            tcp_flags: TCP_FLAG_SYN,
            tcp_window: DEFAULT_WINDOW,
            tcp_sum: 0,
            tcp_urg: 0,
            tcp_options: Vec::new(),
        });
        Ok(pkt)
    }

    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut> {
        let tcp = match &pkt.hdrs.tcp_hdr {
            Some(tcp) => tcp,
            None => {
                return Err(PacketError::Deparse(
                    "packet has no tcp header".to_string(),
                ))
            }
        };

        let mut v = ipv4::Ipv4Hdr::deparse(pkt, hdr_size + tcp.size())?;
        tcp.write(&mut v, tcp.tcp_sum);
        Ok(v)
    }

    fn header_size(pkt: &Packet) -> usize {
        match &pkt.hdrs.tcp_hdr {
            Some(tcp) => tcp.size(),
            None => 0,
        }
    }
}

impl fmt::Display for TcpHdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tcp {} -> {} flags {:#04x}",
            self.tcp_sport, self.tcp_dport, self.tcp_flags
        )
    }
}

#[test]
fn test_tcp_checksum() {
    let src = Endpoint::parse("00:01:02:03:04:05", "10.1.0.5", 1234).unwrap();
    let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "192.168.0.2", 80).unwrap();
    let pkt = Packet::gen(
        src,
        dst,
        vec![ipv4::IPPROTO_TCP as u16, crate::eth::ETHER_IPV4],
        Some(&[0xa5; 10]),
    )
    .unwrap();
    assert_eq!(pkt.len(), 14 + 20 + 20 + 10);

    // Summing the pseudo-header and segment, checksum included, gives zero
    let wire = pkt.deparse().unwrap();
    let mut v = Vec::new();
    v.extend_from_slice(&[10, 1, 0, 5, 192, 168, 0, 2, 0, 6, 0, 30]);
    v.extend_from_slice(&wire[34..]);
    assert_eq!(internet_checksum::checksum(&v), [0, 0]);

    let parsed = Packet::parse(&wire).unwrap();
    let tcp = parsed.hdrs.tcp_hdr.unwrap();
    assert_eq!(tcp.tcp_sport, 1234);
    assert_eq!(tcp.tcp_dport, 80);
    assert_eq!(tcp.tcp_flags, TCP_FLAG_SYN);
    assert_eq!(parsed.body.unwrap(), vec![0xa5; 10]);
}
