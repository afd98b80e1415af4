use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// WSRX - relay raw TCP traffic over WebSocket tunnels
#[derive(Parser, Debug)]
#[command(name = "wsrx")]
#[command(about = "Relay raw TCP traffic over WebSocket tunnels", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(
    env!("GIT_TAG"), "\n",
    "Commit: ", env!("GIT_HASH"), "\n",
    "Built: ", env!("BUILD_TIME")
))]
pub struct Cli {
    /// YAML config file with `server`, `client`, `daemon` and `logger` sections
    #[arg(short, long, global = true, env = "WSRX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, env = "WSRX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept tunnels on /traffic/{id} and relay them to mapped TCP backends
    Serve(ServeArgs),

    /// Listen locally and open one tunnel per accepted TCP connection
    Connect(ConnectArgs),

    /// Manage a pool of local tunnels over an HTTP API
    Daemon(DaemonArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on [default: 0.0.0.0:1145]
    #[arg(short, long, env = "WSRX_BIND")]
    pub bind: Option<SocketAddr>,

    /// Bearer token required by the admin API (unset leaves it open)
    #[arg(long, env = "WSRX_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Mapping database URL [default: sqlite::memory:]
    #[arg(long, env = "WSRX_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Seconds to wait when dialing a backend (unset waits for the OS)
    #[arg(long, env = "WSRX_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// Bytes read per chunk by each bridge [default: 1024]
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Largest binary message sent on a tunnel [default: 16777216]
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Allow cross-origin requests to the admin API
    #[arg(long)]
    pub enable_cors: bool,
}

#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Tunnel URL, e.g. wss://relay.example.com/traffic/abc
    pub url: String,

    /// Local address to listen on [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<String>,

    /// Local port, 0 picks an ephemeral one [default: 0]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Skip TLS certificate verification (INSECURE)
    #[arg(long)]
    pub insecure: bool,

    /// Seconds to wait for each tunnel handshake
    #[arg(long, env = "WSRX_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// DER encoded CA certificate trusted for wss:// besides the web PKI roots
    #[arg(long, env = "WSRX_CA_CERT")]
    pub ca_cert: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct DaemonArgs {
    /// Management API address [default: 127.0.0.1:0]
    #[arg(short, long, env = "WSRX_DAEMON_BIND")]
    pub bind: Option<SocketAddr>,

    /// Bearer token required by every route (unset leaves it open)
    #[arg(long, env = "WSRX_DAEMON_SECRET")]
    pub secret: Option<String>,

    /// Origin allowed to call the API from a browser, repeatable; `*` allows any
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Exit when no heartbeat arrives for this many seconds
    #[arg(long)]
    pub heartbeat: Option<u64>,

    /// Skip TLS certificate verification for every pool tunnel (INSECURE)
    #[arg(long)]
    pub insecure: bool,

    /// Seconds to wait for each tunnel handshake
    #[arg(long, env = "WSRX_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// DER encoded CA certificate trusted for wss:// besides the web PKI roots
    #[arg(long, env = "WSRX_CA_CERT")]
    pub ca_cert: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "wsrx",
            "--log-json",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--buffer-size",
            "4096",
        ])
        .unwrap();

        assert!(cli.log_json);
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.bind, Some("127.0.0.1:9000".parse().unwrap()));
                assert_eq!(args.buffer_size, Some(4096));
                assert!(!args.enable_cors);
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_connect() {
        let cli = Cli::try_parse_from([
            "wsrx",
            "connect",
            "wss://relay.example.com/traffic/abc",
            "--port",
            "2222",
            "--insecure",
        ])
        .unwrap();

        match cli.command {
            Command::Connect(args) => {
                assert_eq!(args.url, "wss://relay.example.com/traffic/abc");
                assert_eq!(args.port, Some(2222));
                assert!(args.insecure);
                assert!(args.host.is_none());
            }
            other => panic!("expected connect, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_daemon() {
        let cli = Cli::try_parse_from([
            "wsrx",
            "daemon",
            "--bind",
            "127.0.0.1:3307",
            "--allowed-origin",
            "https://a.example.com",
            "--allowed-origin",
            "https://b.example.com",
            "--heartbeat",
            "30",
        ])
        .unwrap();

        match cli.command {
            Command::Daemon(args) => {
                assert_eq!(args.bind, Some("127.0.0.1:3307".parse().unwrap()));
                assert_eq!(
                    args.allowed_origins,
                    vec!["https://a.example.com", "https://b.example.com"]
                );
                assert_eq!(args.heartbeat, Some(30));
                assert!(args.secret.is_none());
            }
            other => panic!("expected daemon, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_requires_url() {
        assert!(Cli::try_parse_from(["wsrx", "connect"]).is_err());
    }
}
