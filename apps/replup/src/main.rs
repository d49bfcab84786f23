//! replup entry point.

mod args;
mod config;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use replup_connection::{Connection, Event, Signal};
use replup_transport::SerialTransport;
use replup_upload::{Uploader, scan};

use crate::args::Args;
use crate::config::Config;

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr so `--json` output stays clean.
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    config.apply(&args);

    let options = config.upload_options(args.dry_run)?;
    let filter = config.scan_filter();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = %args.port,
        root = %args.directory.display(),
        excludes = ?filter.excludes,
        includes = ?filter.includes,
        smash = ?options.smash.map(u8::from),
        dry_run = options.dry_run,
        "replup"
    );

    let candidates = scan(&args.directory, &filter)?;
    if candidates.is_empty() {
        tracing::warn!(root = %args.directory.display(), "nothing to upload");
    }

    let transport = SerialTransport::new(args.port.clone(), config.baud_rate);
    let conn = Connection::new(Box::new(transport), config.connection_config()?);
    if args.verbose {
        conn.events().connect(Signal::DataLine, |event| {
            if let Event::DataLine(line) = event {
                tracing::info!(">> {line}");
            }
        });
    }

    let report = if options.dry_run {
        let mut uploader = Uploader::new(&conn, options);
        uploader.upload(candidates);
        uploader.into_report()
    } else {
        let guard = conn
            .acquire()
            .with_context(|| format!("cannot connect to {}", args.port))?;
        let mut uploader = Uploader::new(&guard, options);
        uploader.upload(candidates);
        uploader.into_report()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    for failed in report.failed() {
        tracing::warn!(path = %failed.remote, status = ?failed.status, "not uploaded");
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
