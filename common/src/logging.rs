// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Logger construction shared by the probe binary and its tests.

use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use slog::o;
use slog::Drain;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

fn build<W>(name: &'static str, w: W, format: LogFormat) -> slog::Logger
where
    W: std::io::Write + Send + 'static,
{
    let drain = match format {
        LogFormat::Human => {
            let decorator = slog_term::PlainDecorator::new(w);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
        LogFormat::Json => {
            let drain = slog_bunyan::with_name(name, w).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
    };
    slog::Logger::root(drain, o!("name" => name))
}

/// Build the root logger.  If `log_file` is set, records are appended to that
/// file; otherwise they go to stdout.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Ok(build(name, file, format))
        }
        None => Ok(build(name, std::io::stdout(), format)),
    }
}

/// A logger that drops everything, for unit tests that need one to pass in.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}
