// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tether: native event log replay host.
//
// Entry point. Initialises logging, loads the configuration, wires every
// plugin to one router and replays an event log through it.

mod host;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use tether_core::config::TetherConfig;
use tether_core::error::Result;
use tether_core::types::WebviewId;

use host::Host;

/// Replay native event logs through the Tether event core
#[derive(Parser, Debug)]
#[command(name = "tether", version, long_about = None)]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Web view the host serves (defaults to the configured one)
    #[arg(short, long)]
    webview: Option<String>,

    /// Stop at the first line that cannot be replayed
    #[arg(long)]
    strict: bool,

    /// Event log to replay; standard input when omitted
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "replay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => TetherConfig::load(path)?,
        None => TetherConfig::default(),
    };
    let webview = WebviewId::new(
        args.webview
            .clone()
            .unwrap_or_else(|| config.default_webview.clone()),
    );

    info!("Tether starting v{}", env!("CARGO_PKG_VERSION"));
    let mut host = Host::new(config, webview)?;
    info!(
        channels = host.router().channel_names().count(),
        "router ready"
    );
    let sweepers = host.spawn_sweepers();

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if let Err(e) = host.replay_line(&line) {
            if args.strict {
                for sweeper in &sweepers {
                    sweeper.abort();
                }
                return Err(e);
            }
            warn!(line = line_no, error = %e, "line skipped");
        }
    }

    for sweeper in sweepers {
        sweeper.abort();
    }
    println!("{}", host.stats());
    Ok(())
}
