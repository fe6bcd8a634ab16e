// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! General types used throughout the probe.

use std::convert;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The topology file is missing, unreadable, or lacks a required field.
    #[error("Configuration error: {0}")]
    Config(String),
    /// The topology is internally inconsistent, e.g. a route names a VNet
    /// with no endpoint.
    #[error("Topology resolution error: {0}")]
    TopologyResolution(String),
    /// An expected frame was not observed.
    #[error("Assertion failed: {0}")]
    Assertion(String),
    #[error("Packet harness error: {0}")]
    Harness(String),
    #[error("ARP responder error: {0}")]
    Responder(String),
    #[error("Packet construction error: {0}")]
    Packet(#[from] packet::PacketError),
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
}

impl convert::From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Io(err)
    }
}

impl convert::From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Config(format!("invalid topology json: {err}"))
    }
}
