// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! A small frame model for building the packets we inject into the device
//! and the packets we expect to see come back out.
//!
//! A `Packet` is a stack of optional headers plus a body.  Each header type
//! implements `Protocol`, which knows how to parse itself out of a
//! `ParseBuffer`, how to generate a default header for a pair of endpoints,
//! and how to serialize itself behind whatever headers precede it.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::BytesMut;
use thiserror::Error;

pub mod eth;
pub mod ipv4;
pub mod mask;
pub mod tcp;
pub mod udp;
pub mod vxlan;

mod pbuf;

pub use common::network::MacAddr;
pub use pbuf::ParseBuffer;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("parse error at byte {offset}: {message}")]
    Parse { message: String, offset: usize },
    #[error("deparse error: {0}")]
    Deparse(String),
    #[error("invalid argument: {0}")]
    Invalid(String),
}

pub type PacketResult<T> = Result<T, PacketError>;

pub fn parse_error(pb: &ParseBuffer, message: impl ToString) -> PacketError {
    PacketError::Parse {
        message: message.to_string(),
        offset: pb.offset(),
    }
}

/// One end of a conversation: the addresses a generated packet is sent from
/// or to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(mac: MacAddr, ip: Ipv4Addr, port: u16) -> Self {
        Endpoint { mac, ip, port }
    }

    pub fn parse(mac: &str, ip: &str, port: u16) -> PacketResult<Self> {
        let mac = mac
            .parse()
            .map_err(|e| PacketError::Invalid(format!("bad mac {mac}: {e}")))?;
        let ip = ip
            .parse()
            .map_err(|e| PacketError::Invalid(format!("bad ip {ip}: {e}")))?;
        Ok(Endpoint { mac, ip, port })
    }
}

pub trait Protocol {
    /// Pull this header off the front of the buffer.
    fn parse(pb: &mut ParseBuffer) -> PacketResult<Self>
    where
        Self: Sized;

    /// Build a packet whose innermost header is this protocol.  `protos`
    /// lists the protocol stack from the inside out, starting with this one.
    fn gen(
        src: Endpoint,
        dst: Endpoint,
        protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet>;

    /// Serialize every header up to and including this one.  `hdr_size` is
    /// the number of header bytes the inner layers will append, so the
    /// outermost layer can size the buffer once.
    fn deparse(pkt: &Packet, hdr_size: usize) -> PacketResult<BytesMut>;

    fn header_size(pkt: &Packet) -> usize;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Headers {
    pub eth_hdr: Option<eth::EthHdr>,
    pub ipv4_hdr: Option<ipv4::Ipv4Hdr>,
    pub udp_hdr: Option<udp::UdpHdr>,
    pub tcp_hdr: Option<tcp::TcpHdr>,
    pub vxlan_hdr: Option<vxlan::VxlanHdr>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub hdrs: Headers,
    pub body: Option<Vec<u8>>,
}

impl Packet {
    pub fn new(body: Option<&[u8]>) -> Self {
        Packet {
            hdrs: Headers::default(),
            body: body.map(|b| b.to_vec()),
        }
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Total size of all headers.
    pub fn header_size(&self) -> usize {
        eth::EthHdr::header_size(self)
            + ipv4::Ipv4Hdr::header_size(self)
            + udp::UdpHdr::header_size(self)
            + tcp::TcpHdr::header_size(self)
            + vxlan::VxlanHdr::header_size(self)
    }

    /// Size of the frame on the wire, excluding the FCS.
    pub fn len(&self) -> usize {
        self.header_size() + self.body_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn gen(
        src: Endpoint,
        dst: Endpoint,
        protos: Vec<u16>,
        body: Option<&[u8]>,
    ) -> PacketResult<Packet> {
        let mut pkt = match protos.first() {
            None => Ok(Packet::new(body)),
            Some(&p) if p == ipv4::IPPROTO_TCP as u16 => {
                tcp::TcpHdr::gen(src, dst, protos, body)
            }
            Some(&p) if p == ipv4::IPPROTO_UDP as u16 => {
                udp::UdpHdr::gen(src, dst, protos, body)
            }
            Some(&p) if p == eth::ETHER_IPV4 => {
                ipv4::Ipv4Hdr::gen(src, dst, protos, body)
            }
            Some(p) => {
                Err(PacketError::Invalid(format!("unsupported protocol {p}")))
            }
        }?;
        pkt.finalize();
        Ok(pkt)
    }

    /// Recompute every length and checksum field from the current contents.
    /// Anything that edits headers or the body should call this (or the
    /// narrower per-header helpers) before the packet is deparsed.
    pub fn finalize(&mut self) {
        udp::UdpHdr::update_len(self);
        ipv4::Ipv4Hdr::update_len(self);
        ipv4::Ipv4Hdr::update_checksum(self);
        tcp::TcpHdr::update_checksum(self);
    }

    pub fn parse(data: &[u8]) -> PacketResult<Packet> {
        Packet::parse_with_vxlan_port(data, vxlan::VXLAN_UDP_PORT)
    }

    /// Parse a frame, treating UDP datagrams addressed to `vxlan_port` as
    /// VXLAN tunnel traffic.
    pub fn parse_with_vxlan_port(
        data: &[u8],
        vxlan_port: u16,
    ) -> PacketResult<Packet> {
        let mut pb = ParseBuffer::new_from_slice(data);
        let mut hdrs = Headers::default();

        let eth = eth::EthHdr::parse(&mut pb)?;
        let eth_type = eth.eth_type;
        hdrs.eth_hdr = Some(eth);
        if eth_type != eth::ETHER_IPV4 {
            return Ok(Packet {
                hdrs,
                body: Some(pb.get_remaining()),
            });
        }

        let ip_start = pb.offset();
        let ip = ipv4::Ipv4Hdr::parse(&mut pb)?;
        let l4_start = pb.offset();
        // Anything past the IP datagram is Ethernet padding.
        let ip_end = ip_start + ip.ipv4_total_len as usize;
        if ip_end > data.len() || ip_end < l4_start {
            return Err(parse_error(&pb, "ipv4 total length out of range"));
        }
        let proto = ip.ipv4_proto;
        hdrs.ipv4_hdr = Some(ip);

        let mut pb = ParseBuffer::new_from_slice(&data[..ip_end]);
        pb.advance_bytes(l4_start);

        match proto {
            ipv4::IPPROTO_TCP => {
                hdrs.tcp_hdr = Some(tcp::TcpHdr::parse(&mut pb)?)
            }
            ipv4::IPPROTO_UDP => {
                let udp = udp::UdpHdr::parse(&mut pb)?;
                let is_vxlan = udp.udp_dport == vxlan_port;
                hdrs.udp_hdr = Some(udp);
                if is_vxlan {
                    hdrs.vxlan_hdr = Some(vxlan::VxlanHdr::parse(&mut pb)?);
                }
            }
            _ => {}
        }

        Ok(Packet {
            hdrs,
            body: Some(pb.get_remaining()),
        })
    }

    pub fn deparse(&self) -> PacketResult<BytesMut> {
        let mut v = if self.hdrs.vxlan_hdr.is_some() {
            vxlan::VxlanHdr::deparse(self, 0)?
        } else if self.hdrs.tcp_hdr.is_some() {
            tcp::TcpHdr::deparse(self, 0)?
        } else if self.hdrs.udp_hdr.is_some() {
            udp::UdpHdr::deparse(self, 0)?
        } else if self.hdrs.ipv4_hdr.is_some() {
            ipv4::Ipv4Hdr::deparse(self, 0)?
        } else if self.hdrs.eth_hdr.is_some() {
            eth::EthHdr::deparse(self, 0)?
        } else {
            BytesMut::with_capacity(self.body_len())
        };

        if let Some(body) = &self.body {
            v.extend_from_slice(body);
        }
        Ok(v)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut layers = Vec::new();
        if let Some(h) = &self.hdrs.eth_hdr {
            layers.push(h.to_string());
        }
        if let Some(h) = &self.hdrs.ipv4_hdr {
            layers.push(h.to_string());
        }
        if let Some(h) = &self.hdrs.udp_hdr {
            layers.push(h.to_string());
        }
        if let Some(h) = &self.hdrs.tcp_hdr {
            layers.push(h.to_string());
        }
        if let Some(h) = &self.hdrs.vxlan_hdr {
            layers.push(h.to_string());
        }
        write!(f, "{} body: {} bytes", layers.join(" / "), self.body_len())
    }
}
