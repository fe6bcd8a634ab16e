// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::net::Ipv4Addr;

use crate::parse_error;
use crate::MacAddr;
use crate::PacketResult;

/// Cursor over a received frame.  Header parsers pull fields off the front in
/// wire order; bit-level reads are used for the packed IPv4 and 802.1Q
/// fields.
pub struct ParseBuffer<'a> {
    data: &'a [u8],
    len: usize,
    byte: usize,
    bit: usize,
}

impl<'a> ParseBuffer<'a> {
    pub fn new_from_slice(d: &'a [u8]) -> ParseBuffer<'a> {
        ParseBuffer {
            data: d,
            byte: 0,
            bit: 0,
            len: d.len() * 8,
        }
    }

    pub fn offset(&self) -> usize {
        self.byte
    }

    pub fn verify_aligned(&self) -> PacketResult<()> {
        if self.bit == 0 {
            Ok(())
        } else {
            Err(parse_error(self, "not byte aligned"))
        }
    }

    pub fn byte_align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.byte += 1;
        }
    }

    pub fn advance_bytes(&mut self, bytes: usize) {
        self.byte += bytes;
    }

    pub fn bytes_left(&self) -> usize {
        let consumed = (self.byte * 8) + self.bit;

        if consumed < self.len {
            ((self.len - consumed) / 8)
                - match self.bit {
                    0 => 0,
                    _ => 1,
                }
        } else {
            0
        }
    }

    pub fn bits_left(&self) -> usize {
        let consumed = (self.byte * 8) + self.bit;

        if consumed < self.len {
            self.len - consumed
        } else {
            0
        }
    }

    fn get_chunk(&mut self, bits: usize) -> (u32, usize) {
        let byte = self.byte;
        let bit = self.bit;
        let mut rval = self.data[byte] as u32;

        // simple case - return a single, aligned byte
        if bit == 0 && bits >= 8 {
            self.byte += 1;
            return (rval, 8);
        }

        // we're starting mid-byte, grab the unused bits in this byte
        let unused = 8 - bit;
        rval &= (1 << unused) - 1;

        // if the caller wants all of those bits, return them
        if bits >= unused {
            self.byte += 1;
            self.bit = 0;
            return (rval, unused);
        }

        // shift the unwanted bits out of the buffer before returning the
        // result to the caller.
        rval >>= unused - bits;
        self.bit += bits;

        (rval, bits)
    }

    pub fn get_bits(&mut self, len: usize) -> PacketResult<u32> {
        if len > 32 {
            return Err(parse_error(self, "attempted to read more than 32 bits"));
        }

        let mut rval: u32 = 0;
        let mut left = len;
        while left > 0 {
            if self.byte >= self.data.len() {
                return Err(parse_error(self, "buffer overrun"));
            }

            let (chunk, bits) = self.get_chunk(left);
            rval = (rval << bits) | chunk;
            left -= bits;
        }

        Ok(rval)
    }

    pub fn get_bytes(&mut self, bytes: usize) -> PacketResult<Vec<u8>> {
        self.byte_align();

        if self.bytes_left() < bytes {
            Err(parse_error(self, "buffer overrun"))
        } else {
            let v = self.data[self.byte..self.byte + bytes].to_vec();
            self.byte += bytes;
            Ok(v)
        }
    }

    /// Consume everything that is left in the buffer.
    pub fn get_remaining(&mut self) -> Vec<u8> {
        self.byte_align();
        let start = self.byte.min(self.data.len());
        self.byte = self.data.len();
        self.data[start..].to_vec()
    }

    pub fn get_u32(&mut self) -> PacketResult<u32> {
        let b = self.get_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a 24-bit big-endian value, as used for the VXLAN VNI.
    pub fn get_u24(&mut self) -> PacketResult<u32> {
        let b = self.get_bytes(3)?;
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32))
    }

    pub fn get_u16(&mut self) -> PacketResult<u16> {
        let b = self.get_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u8(&mut self) -> PacketResult<u8> {
        let b = self.get_bytes(1)?;
        Ok(b[0])
    }

    pub fn get_flag(&mut self) -> PacketResult<bool> {
        Ok(self.get_bits(1)? == 1)
    }

    pub fn get_mac(&mut self) -> PacketResult<MacAddr> {
        let b = self.get_bytes(6)?;
        Ok(MacAddr::from_slice(&b))
    }

    pub fn get_ipv4(&mut self) -> PacketResult<Ipv4Addr> {
        let x = self.get_bytes(4)?;
        Ok(Ipv4Addr::new(x[0], x[1], x[2], x[3]))
    }
}

#[test]
fn test_short() {
    let raw: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_u16().unwrap(), 0x1122);
    assert_eq!(tbuf.get_u16().unwrap(), 0x3344);
}

#[test]
fn test_u24() {
    let raw: [u8; 4] = [0x00, 0x27, 0x11, 0x44];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_u24().unwrap(), 10001);
    assert_eq!(tbuf.get_u8().unwrap(), 0x44);
}

#[test]
fn test_nibble() {
    let raw: [u8; 2] = [0x45, 0x00];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_bits(4).unwrap(), 0x4);
    assert_eq!(tbuf.get_bits(4).unwrap(), 0x5);
    assert_eq!(tbuf.get_u8().unwrap(), 0x00);
}

#[test]
fn test_thirteen() {
    // 3 flag bits (DF set) followed by a 13-bit fragment offset
    let raw: [u8; 2] = [0x40, 0x01];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_bits(3).unwrap(), 0x2);
    assert_eq!(tbuf.get_bits(13).unwrap(), 0x1);
}

#[test]
fn test_overflow() {
    let raw: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_u32().unwrap(), 0x11223344);
    assert!(tbuf.get_u32().is_err());
    assert!(tbuf.get_remaining().is_empty());
}
