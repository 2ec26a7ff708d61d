#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # rembashd
//!
//! A multi-client remote shell server. Each accepted TCP client completes a
//! fixed challenge/response handshake, then gets a PTY-backed interactive
//! shell relayed bidirectionally until either side closes.

use clap::Parser;
use nix::sys::signal::{signal, SigHandler, Signal};
use tracing::error;

use rembashd::config::Config;
use rembashd::Server;

/// Multi-client rembash protocol server.
#[derive(Parser)]
#[command(name = "rembashd", version)]
struct Cli {
    /// Path to a TOML config file. Defaults to `rembashd.toml` in the CWD if present.
    #[arg(long)]
    config: Option<String>,
    /// Override `server.listen` from the config (e.g. `0.0.0.0:4070`).
    #[arg(long)]
    listen: Option<String>,
    /// Override `server.workers` from the config.
    #[arg(long)]
    workers: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref());

    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(workers) = cli.workers {
        config.server.workers = workers;
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            error!("config error: {err}");
        }
        std::process::exit(1);
    }

    install_signal_hygiene();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        workers = config.server.workers,
        "rembashd starting"
    );

    match Server::new(&config) {
        Ok(server) => server.run(),
        Err(e) => {
            error!("failed to start: {e}");
            std::process::exit(1);
        }
    }
}

/// Ignore broken-pipe-like signals and let the kernel auto-reap children,
/// exactly as the protocol's host-program contract requires.
fn install_signal_hygiene() {
    // SAFETY: SIG_IGN is always a valid handler and these calls happen before
    // any other thread is spawned.
    unsafe {
        if let Err(e) = signal(Signal::SIGPIPE, SigHandler::SigIgn) {
            error!("failed to ignore SIGPIPE: {e}");
        }
        if let Err(e) = signal(Signal::SIGCHLD, SigHandler::SigIgn) {
            error!("failed to ignore SIGCHLD: {e}");
        }
    }
}
