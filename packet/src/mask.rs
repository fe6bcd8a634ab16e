// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Byte-granular matching against an expected frame.
//!
//! Some fields of a forwarded packet depend on choices the device is free to
//! make, such as which next-hop MAC a load-balanced path uses or the source
//! port picked for a tunnel's entropy.  A `Mask` marks those bytes as
//! don't-care so the rest of the frame can still be compared exactly.

use std::fmt;

use crate::eth;
use crate::ipv4;
use crate::udp;
use crate::Packet;
use crate::PacketError;
use crate::PacketResult;
use crate::Protocol;

/// Header fields that can be masked by name.  Offsets are taken from the
/// packet the mask was built from, so tagged frames and IPv4 options are
/// accounted for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    EthDst,
    EthSrc,
    Ipv4Ttl,
    Ipv4Checksum,
    UdpSrcPort,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Field::EthDst => "eth.dst",
            Field::EthSrc => "eth.src",
            Field::Ipv4Ttl => "ipv4.ttl",
            Field::Ipv4Checksum => "ipv4.checksum",
            Field::UdpSrcPort => "udp.sport",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mask {
    expected: Vec<u8>,
    care: Vec<bool>,
    masked: Vec<Field>,
}

impl Mask {
    /// A mask that requires every byte of `pkt` to match.
    pub fn new(pkt: &Packet) -> PacketResult<Mask> {
        let expected = pkt.deparse()?.to_vec();
        let care = vec![true; expected.len()];
        Ok(Mask {
            expected,
            care,
            masked: Vec::new(),
        })
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    pub fn masked_fields(&self) -> &[Field] {
        &self.masked
    }

    pub fn dont_care(&mut self, offset: usize, len: usize) -> PacketResult<()> {
        let end = offset + len;
        if end > self.care.len() {
            return Err(PacketError::Invalid(format!(
                "mask range {offset}..{end} beyond {}-byte frame",
                self.care.len()
            )));
        }
        self.care[offset..end].iter_mut().for_each(|c| *c = false);
        Ok(())
    }

    /// Ignore a named field.  `pkt` must be the packet the mask was built
    /// from.
    pub fn dont_care_field(
        &mut self,
        pkt: &Packet,
        field: Field,
    ) -> PacketResult<()> {
        let missing =
            || PacketError::Invalid(format!("no header carries {field}"));

        let l2 = eth::EthHdr::header_size(pkt);
        let l3 = ipv4::Ipv4Hdr::header_size(pkt);
        let (offset, len) = match field {
            Field::EthDst if l2 > 0 => (0, 6),
            Field::EthSrc if l2 > 0 => (6, 6),
            Field::Ipv4Ttl if l3 > 0 => (l2 + 8, 1),
            Field::Ipv4Checksum if l3 > 0 => (l2 + 10, 2),
            Field::UdpSrcPort if udp::UdpHdr::header_size(pkt) > 0 => {
                (l2 + l3, 2)
            }
            _ => return Err(missing()),
        };
        self.dont_care(offset, len)?;
        self.masked.push(field);
        Ok(())
    }

    /// The first byte offset at which `data` differs from the expected frame
    /// in a byte we care about.  A length difference counts as a mismatch at
    /// the end of the shorter frame.
    pub fn first_mismatch(&self, data: &[u8]) -> Option<usize> {
        let common = data.len().min(self.expected.len());
        let diff = (0..common)
            .find(|&i| self.care[i] && data[i] != self.expected[i]);
        match diff {
            Some(i) => Some(i),
            None if data.len() != self.expected.len() => Some(common),
            None => None,
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        self.first_mismatch(data).is_none()
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.expected.len())?;
        if !self.masked.is_empty() {
            let names: Vec<String> =
                self.masked.iter().map(|m| m.to_string()).collect();
            write!(f, ", ignoring {}", names.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vxlan::VxlanHdr;
    use crate::Endpoint;

    fn tunnel() -> Packet {
        let src = Endpoint::parse("00:01:02:03:04:05", "192.168.0.2", 0).unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.5", 0).unwrap();
        let inner = Packet::gen(
            src,
            dst,
            vec![ipv4::IPPROTO_TCP as u16, eth::ETHER_IPV4],
            Some(&[0; 46]),
        )
        .unwrap();

        let osrc =
            Endpoint::parse("00:aa:bb:cc:78:9a", "10.1.0.32", 1234).unwrap();
        let odst =
            Endpoint::parse("00:01:02:03:04:05", "10.0.0.57", 4789).unwrap();
        VxlanHdr::encapsulate(osrc, odst, 10001, &inner).unwrap()
    }

    #[test]
    fn test_exact() {
        let pkt = tunnel();
        let mask = Mask::new(&pkt).unwrap();
        let wire = pkt.deparse().unwrap();
        assert!(mask.matches(&wire));

        let mut other = wire.to_vec();
        other[60] ^= 0xff;
        assert_eq!(mask.first_mismatch(&other), Some(60));

        // Trailing bytes are a mismatch, not padding
        let mut longer = wire.to_vec();
        longer.push(0);
        assert_eq!(mask.first_mismatch(&longer), Some(wire.len()));
        assert!(!mask.matches(&wire[..wire.len() - 1]));
    }

    #[test]
    fn test_masked_fields() {
        let pkt = tunnel();
        let mut mask = Mask::new(&pkt).unwrap();
        for f in [
            Field::EthSrc,
            Field::EthDst,
            Field::Ipv4Ttl,
            Field::Ipv4Checksum,
            Field::UdpSrcPort,
        ] {
            mask.dont_care_field(&pkt, f).unwrap();
        }

        let mut seen = pkt.clone();
        eth::EthHdr::rewrite_smac(&mut seen, "00:11:22:33:44:55".parse().unwrap());
        eth::EthHdr::rewrite_dmac(&mut seen, "00:66:77:88:99:aa".parse().unwrap());
        ipv4::Ipv4Hdr::set_ttl(&mut seen, 17);
        udp::UdpHdr::set_sport(&mut seen, 49152);
        assert!(mask.matches(&seen.deparse().unwrap()));

        // A different VNI is still caught
        seen.hdrs.vxlan_hdr.as_mut().unwrap().vxlan_vni = 10002;
        assert!(!mask.matches(&seen.deparse().unwrap()));
        assert_eq!(
            mask.to_string(),
            "150 bytes, ignoring eth.src, eth.dst, ipv4.ttl, ipv4.checksum, udp.sport"
        );
    }

    #[test]
    fn test_missing_header() {
        let src = Endpoint::parse("00:01:02:03:04:05", "10.0.0.1", 0).unwrap();
        let dst = Endpoint::parse("00:aa:bb:cc:78:9a", "10.0.0.2", 0).unwrap();
        let pkt = Packet::gen(
            src,
            dst,
            vec![ipv4::IPPROTO_TCP as u16, eth::ETHER_IPV4],
            None,
        )
        .unwrap();
        let mut mask = Mask::new(&pkt).unwrap();
        assert!(mask.dont_care_field(&pkt, Field::UdpSrcPort).is_err());
        assert!(mask.dont_care(50, 10).is_err());
    }
}
