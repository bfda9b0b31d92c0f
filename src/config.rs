//! # CLI and Backend Configuration
//!
//! Parses the command-line surface into a `Cli` struct, then derives a
//! `BackendTable` from it: a fixed, read-only mapping from `ProtocolKind` to
//! the `(host, port)` pair the proxy should dial once it has classified a
//! session. There is no file-based or dynamic configuration layer — every
//! value here is fixed for the lifetime of the process.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

use crate::classifier::ProtocolKind;

/// Dual-mode payload-sniffing TCP proxy for SSH, OpenVPN and V2Ray backends.
#[derive(Parser, Debug)]
#[command(name = "sniffproxy")]
#[command(about = "Dual-mode payload-sniffing TCP proxy", long_about = None)]
pub struct Cli {
    /// Listen address; also the default backend address for every protocol.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// `listen()` backlog.
    #[arg(long, default_value_t = 5)]
    pub backlog: u32,

    /// Backend port used for sessions classified as OpenVPN.
    #[arg(long = "openvpn-port", default_value_t = 1194)]
    pub openvpn_port: u16,

    /// Backend port used for sessions classified as SSH.
    #[arg(long = "ssh-port", default_value_t = 22)]
    pub ssh_port: u16,

    /// Backend port used for sessions classified as V2Ray.
    #[arg(long = "v2ray-port", default_value_t = 1080)]
    pub v2ray_port: u16,

    /// PEM file containing both the certificate and the private key, used
    /// only in `--https` mode.
    #[arg(long, default_value = "./cert.pem")]
    pub cert: PathBuf,

    /// Listen for plaintext TCP connections.
    #[arg(long)]
    pub http: bool,

    /// Listen for TLS connections. Wins over `--http` if both are set.
    #[arg(long)]
    pub https: bool,

    /// Log level: error, warn, info, debug, or trace.
    #[arg(long, default_value = "INFO")]
    pub log: String,
}

/// Which listener mode the CLI selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Http,
    Https,
}

impl Cli {
    /// Resolves `--http`/`--https` into a single mode. `--https` wins if
    /// both are set; `None` means the caller should print help and exit 0.
    pub fn listen_mode(&self) -> Option<ListenMode> {
        if self.https {
            Some(ListenMode::Https)
        } else if self.http {
            Some(ListenMode::Http)
        } else {
            None
        }
    }
}

/// Immutable mapping from protocol kind to the backend address the proxy
/// dials once a session has been classified.
#[derive(Debug, Clone)]
pub struct BackendTable {
    backends: HashMap<ProtocolKind, (String, u16)>,
}

impl BackendTable {
    /// Builds the table from `(--host, --<kind>-port)` triples.
    /// `ProtocolKind::Unknown` has no entry: it is never looked up, since an
    /// Unknown first chunk never reaches the dial step unless it is
    /// re-routed through HTTP CONNECT priming.
    pub fn from_cli(cli: &Cli) -> Self {
        let mut backends = HashMap::with_capacity(3);
        backends.insert(ProtocolKind::Ssh, (cli.host.clone(), cli.ssh_port));
        backends.insert(ProtocolKind::OpenVpn, (cli.host.clone(), cli.openvpn_port));
        backends.insert(ProtocolKind::V2Ray, (cli.host.clone(), cli.v2ray_port));
        BackendTable { backends }
    }

    /// Looks up the `(host, port)` pair for a classified protocol kind.
    /// Returns `None` for `Unknown` or any kind this table was not built
    /// with.
    pub fn lookup(&self, kind: ProtocolKind) -> Option<(&str, u16)> {
        self.backends
            .get(&kind)
            .map(|(host, port)| (host.as_str(), *port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(host: &str, ssh: u16, openvpn: u16, v2ray: u16) -> Cli {
        Cli {
            host: host.to_string(),
            port: 8080,
            backlog: 5,
            openvpn_port: openvpn,
            ssh_port: ssh,
            v2ray_port: v2ray,
            cert: PathBuf::from("./cert.pem"),
            http: false,
            https: false,
            log: "INFO".to_string(),
        }
    }

    #[test]
    fn backend_table_looks_up_each_kind() {
        let c = cli("10.0.0.1", 22, 1194, 1080);
        let table = BackendTable::from_cli(&c);
        assert_eq!(table.lookup(ProtocolKind::Ssh), Some(("10.0.0.1", 22)));
        assert_eq!(
            table.lookup(ProtocolKind::OpenVpn),
            Some(("10.0.0.1", 1194))
        );
        assert_eq!(table.lookup(ProtocolKind::V2Ray), Some(("10.0.0.1", 1080)));
        assert_eq!(table.lookup(ProtocolKind::Unknown), None);
    }

    #[test]
    fn https_wins_when_both_set() {
        let mut c = cli("0.0.0.0", 22, 1194, 1080);
        c.http = true;
        c.https = true;
        assert_eq!(c.listen_mode(), Some(ListenMode::Https));
    }

    #[test]
    fn neither_flag_yields_no_mode() {
        let c = cli("0.0.0.0", 22, 1194, 1080);
        assert_eq!(c.listen_mode(), None);
    }
}
