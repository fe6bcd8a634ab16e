// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

use std::collections::BTreeSet;

use anyhow::bail;
use anyhow::Context;
use slog::{error, info};
use structopt::StructOpt;

use vnet_probe::harness::{PacketHarness, PhysPort, RawHarness};
use vnet_probe::macaddrs::MacRegistry;
use vnet_probe::report::RunReport;
use vnet_probe::responder::ArpResponder;
use vnet_probe::topology::TopologyModel;
use vnet_probe::vectors::VectorSet;
use vnet_probe::verify::{EngineConfig, VerificationEngine};

mod config;

#[derive(Debug, Default, StructOpt)]
#[structopt(
    name = "vnet-probe",
    about = "verify VXLAN virtual network forwarding on a device under test"
)]
pub(crate) struct Opt {
    #[structopt(long, about = "log file")]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(long, help = "topology description of the device (json)")]
    config_file: Option<String>,

    #[structopt(
        long,
        help = "send test traffic; otherwise only validate the topology"
    )]
    vxlan_enabled: bool,

    #[structopt(long, help = "destination udp port of the vxlan tunnel")]
    vxlan_port: Option<u16>,

    #[structopt(long, help = "how long to wait for each expected frame")]
    timeout_ms: Option<u64>,

    #[structopt(long, help = "where to find interface mac addresses")]
    sysfs_root: Option<String>,

    #[structopt(long, help = "arp responder config file")]
    responder_conf: Option<String>,

    #[structopt(long, help = "program used to start/stop the arp responder")]
    responder_cmd: Option<String>,

    #[structopt(long, help = "don't manage the arp responder")]
    no_responder: bool,
}

// Every port a frame is sent on or expected on.  All of them need a local
// interface address before any traffic is sent.
fn harness_ports(topo: &TopologyModel, vectors: &VectorSet) -> Vec<PhysPort> {
    let mut ports: BTreeSet<PhysPort> =
        topo.uplink_ports().into_iter().collect();
    ports.extend(vectors.iter().map(|v| v.port));
    ports.into_iter().collect()
}

fn run_checks(
    log: &slog::Logger,
    config: &config::Config,
    topo: &TopologyModel,
    macs: &MacRegistry,
    vectors: &VectorSet,
) -> anyhow::Result<RunReport> {
    let mut harness = RawHarness::open(log, &harness_ports(topo, vectors))
        .context("opening packet harness")?;
    harness.flush()?;

    let mut engine = VerificationEngine::new(
        log,
        topo,
        macs,
        &mut harness,
        EngineConfig {
            vxlan_port: config.vxlan_port,
            timeout: config.timeout,
        },
    );
    Ok(engine.run(vectors))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    let config = config::build_config(&opts)?;

    const NAME: &str = "vnet-probe";
    let log = common::logging::init(NAME, &config.log_file, config.log_format)?;

    let topo = TopologyModel::from_file(&config.config_file).with_context(
        || format!("loading topology from {}", config.config_file.display()),
    )?;
    info!(log, "loaded topology";
        "vnets" => topo.vnets().len(),
        "routes" => topo.routes().len(),
        "local_routes" => topo.local_routes().len(),
        "uplinks" => ?topo.uplink_ports(),
        "loopback" => %topo.loopback());

    let vectors =
        VectorSet::synthesize(&topo).context("building test vectors")?;
    info!(log, "built test vectors"; "count" => vectors.len());

    let macs = MacRegistry::load(&log, &config.sysfs_root)
        .context("reading interface mac addresses")?;
    if config.vxlan_enabled {
        macs.require_ports(harness_ports(&topo, &vectors))
            .context("checking interface mac addresses")?;
    }

    let responder = config.responder.then(|| {
        ArpResponder::new(&log, &config.responder_conf, &config.responder_cmd)
    });
    if let Some(r) = &responder {
        r.write_config(&topo)?;
        r.start().await?;
    }

    if !config.vxlan_enabled {
        info!(log, "vxlan testing disabled, not sending traffic");
        return Ok(());
    }

    let report = run_checks(&log, &config, &topo, &macs, &vectors);

    if let Some(r) = &responder {
        if let Err(e) = r.stop().await {
            error!(log, "failed to stop arp responder: {e}");
        }
    }

    let report = report?;
    report.print(std::io::stdout())?;
    if !report.passed() {
        bail!(
            "{} of {} checks failed",
            report.failed_checks(),
            report.total_checks()
        );
    }
    Ok(())
}
