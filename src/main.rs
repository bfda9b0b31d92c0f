//! # Sniffproxy
//!
//! Dual-mode payload-sniffing TCP proxy. Accepts connections on a single
//! listening port, inspects the first bytes of the client stream to
//! classify the intended upstream protocol (SSH, OpenVPN, V2Ray), or honours
//! an HTTP `CONNECT` priming handshake, then relays bytes to the matching
//! backend until either side closes.
//!
//! ## Architecture
//!
//! - `classifier` / `http_head` — pure, synchronous parsing of the first
//!   chunk of client bytes.
//! - `connection` — a socket plus an outbound buffer, the primitive every
//!   session is built from.
//! - `session` — the per-connection state machine and readiness loop.
//! - `listener` — the accept loop, one per listen mode.
//! - `config` — CLI surface and the derived backend table.
//! - `counter` — the process-wide live-session count.
//! - `tls` — certificate loading for `--https` mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

mod classifier;
mod config;
mod connection;
mod counter;
mod error;
mod http_head;
mod listener;
mod session;
mod tls;

use config::{Cli, ListenMode};
use counter::ConnectionCounter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);
    raise_fd_limit();

    let Some(mode) = cli.listen_mode() else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli, mode))
}

async fn run(cli: Cli, mode: ListenMode) -> anyhow::Result<()> {
    let backends = Arc::new(config::BackendTable::from_cli(&cli));
    let counter = Arc::new(ConnectionCounter::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("SIGINT received, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("failed to install SIGINT handler");
    }

    match mode {
        ListenMode::Http => {
            listener::serve_plain(
                &cli.host,
                cli.port,
                cli.backlog,
                backends,
                counter,
                shutdown,
            )
            .await
        }
        ListenMode::Https => {
            let acceptor = tls::load_acceptor(&cli.cert)?;
            listener::serve_tls(
                &cli.host,
                cli.port,
                cli.backlog,
                acceptor,
                backends,
                counter,
                shutdown,
            )
            .await
        }
    }
}

/// Installs `env_logger` at the level named by `--log`, pointed at stderr.
/// Falls back to `info` on an unrecognised level name rather than failing
/// startup over a logging flag.
fn init_logging(level: &str) {
    let level = level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .init();
}

/// Best-effort raise of the soft `RLIMIT_NOFILE` to 65536. Never fatal: a
/// platform that refuses the raise just runs with its existing limit.
fn raise_fd_limit() {
    let limit = libc::rlimit {
        rlim_cur: 65536,
        rlim_max: 65536,
    };
    let result = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if result != 0 {
        log::warn!("failed to raise RLIMIT_NOFILE to 65536, continuing with current limit");
    }
}
