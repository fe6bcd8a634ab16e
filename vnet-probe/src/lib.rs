// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Verification of VXLAN-based virtual network forwarding on a device under
//! test.
//!
//! A [`topology::TopologyModel`] is built from the device's topology
//! description, expanded into a [`vectors::VectorSet`], and each vector is
//! exercised on the wire by a [`verify::VerificationEngine`].

pub mod harness;
pub mod macaddrs;
pub mod report;
pub mod responder;
pub mod topology;
pub mod types;
pub mod vectors;
pub mod verify;

pub use types::{ProbeError, ProbeResult};
