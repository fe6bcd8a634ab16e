// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// An EUI-48 MAC address, used for layer-2 addressing.
#[derive(
    Copy, Deserialize, Serialize, Clone, Eq, PartialEq, Ord, PartialOrd, Hash,
)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr {
    a: [u8; 6],
}

impl From<[u8; 6]> for MacAddr {
    fn from(a: [u8; 6]) -> Self {
        Self { a }
    }
}

impl MacAddr {
    pub const ZERO: Self = MacAddr {
        a: [0, 0, 0, 0, 0, 0],
    };

    /// Create a new MAC address from octets in network byte order.
    pub const fn new(
        o0: u8,
        o1: u8,
        o2: u8,
        o3: u8,
        o4: u8,
        o5: u8,
    ) -> MacAddr {
        MacAddr {
            a: [o0, o1, o2, o3, o4, o5],
        }
    }

    /// Create a new MAC address from a slice of bytes in network byte order.
    ///
    /// # Panics
    ///
    /// Panics if the slice is fewer than 6 octets.
    pub fn from_slice(s: &[u8]) -> MacAddr {
        MacAddr::new(s[0], s[1], s[2], s[3], s[4], s[5])
    }

    /// The address as an array of octets in network byte order.
    pub fn octets(&self) -> [u8; 6] {
        self.a
    }

    /// Return `true` if `self` is the null MAC address, all zeros.
    pub fn is_null(self) -> bool {
        self == Self::ZERO
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacError {
    /// Too few octets to be a valid MAC address
    #[error("Too few octets")]
    TooShort,
    /// Too many octets to be a valid MAC address
    #[error("Too many octets")]
    TooLong,
    /// Found an octet with a non-hexadecimal character or invalid separator
    #[error("Invalid octet")]
    InvalidOctet,
}

impl FromStr for MacAddr {
    type Err = MacError;

    // sysfs hands us addresses with a trailing newline, so trim before
    // splitting.
    fn from_str(s: &str) -> Result<Self, MacError> {
        let v: Vec<&str> = s.trim().split(':').collect();

        match v.len().cmp(&6) {
            std::cmp::Ordering::Less => Err(MacError::TooShort),
            std::cmp::Ordering::Greater => Err(MacError::TooLong),
            std::cmp::Ordering::Equal => {
                let mut m = MacAddr { a: [0u8; 6] };
                for (i, octet) in v.iter().enumerate() {
                    if octet.is_empty() || octet.len() > 2 {
                        return Err(MacError::InvalidOctet);
                    }
                    m.a[i] = u8::from_str_radix(octet, 16)
                        .map_err(|_| MacError::InvalidOctet)?;
                }
                Ok(m)
            }
        }
    }
}

impl TryFrom<String> for MacAddr {
    type Error = MacError;

    fn try_from(s: String) -> Result<Self, MacError> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> String {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.a[0], self.a[1], self.a[2], self.a[3], self.a[4], self.a[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<MacAddr> for [u8; 6] {
    fn from(mac: MacAddr) -> [u8; 6] {
        mac.a
    }
}

impl From<MacAddr> for u64 {
    fn from(mac: MacAddr) -> u64 {
        mac.a.iter().fold(0u64, |acc, o| (acc << 8) | *o as u64)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlanError {
    /// Not a valid VLAN ID
    #[error("Invalid VLAN tag: {}", .0)]
    InvalidVlan(u16),
}

/// VLAN 0 means "untagged" on the server-facing side, so it is accepted here
/// alongside the 802.1Q range.  4095 is reserved.
pub fn validate_vlan(id: impl Into<u16>) -> Result<(), VlanError> {
    let id: u16 = id.into();
    match id {
        0..=4094 => Ok(()),
        _ => Err(VlanError::InvalidVlan(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into() {
        let a = MacAddr::new(0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc);
        let u: u64 = a.into();
        assert_eq!(u, 0x123456789abc);
    }

    #[test]
    fn test_parse() {
        let a = MacAddr::new(0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc);
        let b = "12:34:56:78:9A:bc".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_sysfs() {
        let a: MacAddr = "00:aa:bb:cc:78:9a\n".parse().unwrap();
        assert_eq!(a, MacAddr::new(0x00, 0xaa, 0xbb, 0xcc, 0x78, 0x9a));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("12:34:56".parse::<MacAddr>(), Err(MacError::TooShort));
        assert_eq!(
            "12:34:56:78:9a:bc:de".parse::<MacAddr>(),
            Err(MacError::TooLong)
        );
        assert_eq!(
            "12:34:56:78:9a:zz".parse::<MacAddr>(),
            Err(MacError::InvalidOctet)
        );
        assert_eq!(
            "12:34:56:78:9a:".parse::<MacAddr>(),
            Err(MacError::InvalidOctet)
        );
    }

    #[test]
    fn test_to_string() {
        let a = MacAddr::new(0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc);
        assert_eq!(format!("{a}"), "12:34:56:78:9a:bc");
    }

    #[test]
    fn test_serde() {
        let a = MacAddr::new(0x00, 0x01, 0x02, 0x03, 0x04, 0x05);
        let s = serde_json::to_string(&a).unwrap();
        assert_eq!(s, "\"00:01:02:03:04:05\"");
        let b: MacAddr = serde_json::from_str(&s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_vlan_range() {
        assert!(validate_vlan(0u16).is_ok());
        assert!(validate_vlan(1u16).is_ok());
        assert!(validate_vlan(1000u16).is_ok());
        assert!(validate_vlan(4095u16).is_err());
    }
}
