// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Results of a verification run, and their presentation.

use std::io::Write;

use colored::*;
use tabwriter::TabWriter;

use crate::types::{ProbeError, ProbeResult};
use crate::vectors::TestVector;
use crate::verify::Check;

/// The result of one check against one vector.  A check may make several
/// attempts (one per uplink, or one per peer), each of which can fail
/// independently.
#[derive(Debug)]
pub struct CheckOutcome {
    pub check: Check,
    pub attempts: usize,
    pub failures: Vec<ProbeError>,
}

impl CheckOutcome {
    pub fn new(check: Check) -> Self {
        CheckOutcome {
            check,
            attempts: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ProbeResult<()>) {
        self.attempts += 1;
        if let Err(e) = result {
            self.failures.push(e);
        }
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    fn status(&self) -> ColoredString {
        if !self.passed() {
            "FAIL".red()
        } else if self.attempts == 0 {
            "-".normal()
        } else {
            "ok".green()
        }
    }
}

#[derive(Debug)]
pub struct VectorReport {
    pub idx: usize,
    pub vector: TestVector,
    pub outcomes: Vec<CheckOutcome>,
}

impl VectorReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(CheckOutcome::passed)
    }

    pub fn outcome(&self, check: Check) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.check == check)
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub vectors: Vec<VectorReport>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.vectors.iter().all(VectorReport::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &ProbeError)> {
        self.vectors.iter().flat_map(|v| {
            v.outcomes
                .iter()
                .flat_map(move |o| o.failures.iter().map(move |f| (v.idx, f)))
        })
    }

    pub fn failed_checks(&self) -> usize {
        self.vectors
            .iter()
            .flat_map(|v| v.outcomes.iter())
            .filter(|o| !o.passed())
            .count()
    }

    pub fn total_checks(&self) -> usize {
        self.vectors.iter().map(|v| v.outcomes.len()).sum()
    }

    /// Write a table with one row per vector, followed by the details of
    /// every failure.
    pub fn print<W: Write>(&self, out: W) -> anyhow::Result<()> {
        let mut tw = TabWriter::new(out);
        writeln!(
            &mut tw,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            "#".underline(),
            "VNet".underline(),
            "Origin".underline(),
            "Source".underline(),
            "Port".underline(),
            "Destination".underline(),
            "Nexthop".underline(),
            Check::FromServer.to_string().underline(),
            Check::FromVm.to_string().underline(),
            Check::Serv2Serv.to_string().underline(),
        )?;

        for v in &self.vectors {
            let status = |check| {
                v.outcome(check)
                    .map(CheckOutcome::status)
                    .unwrap_or_else(|| "-".normal())
            };
            let port = match v.vector.vlan_id {
                0 => format!("{}", v.vector.port),
                vid => format!("{}@{vid}", v.vector.port),
            };
            writeln!(
                &mut tw,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                v.idx,
                v.vector.vnet,
                v.vector.origin,
                v.vector.src_ip,
                port,
                v.vector.dst_prefix,
                v.vector.nexthop,
                status(Check::FromServer),
                status(Check::FromVm),
                status(Check::Serv2Serv),
            )?;
        }
        tw.flush()?;

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            writeln!(&mut tw)?;
            for (idx, f) in failures {
                writeln!(&mut tw, "{}: {f}", format!("vector {idx}").red())?;
            }
        }
        writeln!(&mut tw)?;
        writeln!(
            &mut tw,
            "{} vectors, {} of {} checks failed",
            self.vectors.len(),
            self.failed_checks(),
            self.total_checks()
        )?;
        tw.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::TOPOLOGY;
    use crate::topology::TopologyModel;
    use crate::vectors::VectorSet;

    fn report() -> RunReport {
        let topo = TopologyModel::from_json(TOPOLOGY).unwrap();
        let vectors = VectorSet::synthesize(&topo).unwrap();
        let mut report = RunReport::default();
        for (idx, v) in vectors.iter().enumerate().take(2) {
            let mut outcomes = Vec::new();
            let mut o = CheckOutcome::new(Check::FromServer);
            o.record(Ok(()));
            outcomes.push(o);
            let mut o = CheckOutcome::new(Check::FromVm);
            o.record(Ok(()));
            if idx == 1 {
                o.record(Err(ProbeError::Assertion("lost on eth29".into())));
            }
            outcomes.push(o);
            outcomes.push(CheckOutcome::new(Check::Serv2Serv));
            report.vectors.push(VectorReport {
                idx,
                vector: v.clone(),
                outcomes,
            });
        }
        report
    }

    #[test]
    fn test_counts() {
        let report = report();
        assert!(!report.passed());
        assert!(report.vectors[0].passed());
        assert_eq!(report.failed_checks(), 1);
        assert_eq!(report.total_checks(), 6);
        let failures: Vec<usize> = report.failures().map(|(i, _)| i).collect();
        assert_eq!(failures, vec![1]);
        assert_eq!(
            report.vectors[1].outcome(Check::FromVm).unwrap().attempts,
            2
        );
    }

    #[test]
    fn test_print() {
        colored::control::set_override(false);
        let mut buf = Vec::new();
        report().print(&mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        expectorate::assert_contents("tests/output/report.txt", &out);
    }
}
