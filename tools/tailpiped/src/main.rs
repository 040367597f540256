// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! tailpiped - log-tailing metrics daemon
//!
//! Follows configured log files, extracts values with regex match
//! rules every interval, and writes them to InfluxDB in batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use tailpipe::reactor::HttpReactor;
use tailpipe::tail::{SimpleLabels, TailMatch};
use tailpipe::value::{hostname, ValueList, ValueSink};
use tailpipe_influx_sink::writer::Destination;

mod config;

use config::DaemonConfig;

const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Log-tailing metrics daemon
#[derive(Parser, Debug)]
#[command(name = "tailpiped")]
#[command(version)]
#[command(about = "Follow log files and write extracted metrics to InfluxDB")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: std::path::PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Fans every sample out to all configured destinations.
struct FanOut {
    destinations: Vec<Arc<Destination>>,
}

impl ValueSink for FanOut {
    fn dispatch(&self, vl: &ValueList) {
        for dest in &self.destinations {
            dest.dispatch(vl);
        }
    }
}

fn build_tails(
    config: &DaemonConfig,
    host: &str,
    sink: Arc<dyn ValueSink>,
) -> anyhow::Result<Vec<TailMatch>> {
    let mut tails = Vec::with_capacity(config.tails.len());
    for tail_cfg in &config.tails {
        let mut tail = TailMatch::new(&tail_cfg.file, host.to_string(), sink.clone());
        for m in &tail_cfg.matches {
            let value = m
                .match_value()
                .map_err(|e| anyhow::anyhow!("{}: {}", tail_cfg.file, e))?;
            tail.add_match_simple(
                &m.regex,
                m.exclude.as_deref(),
                value,
                SimpleLabels {
                    plugin: tail_cfg.plugin.clone(),
                    plugin_instance: tail_cfg.instance.clone().unwrap_or_default(),
                    type_: m.type_name.clone(),
                    type_instance: m.type_instance.clone().unwrap_or_default(),
                },
            )
            .with_context(|| format!("{}: pattern {:?}", tail_cfg.file, m.regex))?;
        }
        tails.push(tail);
    }
    Ok(tails)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = DaemonConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if args.check {
        println!(
            "{}: OK ({} files, {} destinations)",
            args.config.display(),
            config.tails.len(),
            config.writer.destinations.len()
        );
        return Ok(());
    }

    let max_connections = config.writer.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
    let max_host_connections = config.writer.max_host_connections.unwrap_or(0);
    let reactor = HttpReactor::new(max_connections, max_host_connections)
        .context("creating HTTP reactor")?;

    let mut destinations = Vec::new();
    for dest_cfg in &config.writer.destinations {
        let dest = Destination::from_config(dest_cfg, reactor.clone())
            .with_context(|| format!("destination {}", dest_cfg.name))?;
        destinations.push(dest);
    }
    if destinations.is_empty() {
        anyhow::bail!("no destinations configured");
    }

    let host = match &config.hostname {
        Some(h) => h.clone(),
        None => hostname(),
    };

    let sink: Arc<dyn ValueSink> = Arc::new(FanOut {
        destinations: destinations.clone(),
    });
    let mut tails = build_tails(&config, &host, sink)?;
    if tails.is_empty() {
        anyhow::bail!("no files to tail configured");
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    let interval = Duration::from_secs(config.interval_secs());
    info!(
        "tailpiped started: {} files, {} destinations, interval {}s",
        tails.len(),
        destinations.len(),
        interval.as_secs()
    );

    while !stop.load(Ordering::SeqCst) {
        for tail in &mut tails {
            if let Err(e) = tail.read() {
                error!("reading {}: {}", tail.path().display(), e);
            }
        }
        // Push out batches that have been sitting for a full interval.
        for dest in &destinations {
            dest.flush(interval);
        }

        let mut slept = Duration::ZERO;
        while slept < interval && !stop.load(Ordering::SeqCst) {
            let step = Duration::from_millis(200).min(interval - slept);
            std::thread::sleep(step);
            slept += step;
        }
    }

    info!("shutting down, flushing buffers");
    for dest in &destinations {
        dest.flush(Duration::ZERO);
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("tailpiped: {:#}", e);
        std::process::exit(1);
    }
}
