//! probe-agent: CLI entry point, TLS certificate loading, and runtime wiring.

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

const DEFAULT_BIND: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 9469;

#[derive(Parser, Debug)]
#[command(name = "probe-agent", about = "Local audio measurement agent")]
struct Cli {
    /// Address to bind the TLS WebSocket listener on.
    #[arg(long, default_value_t = DEFAULT_BIND)]
    bind: IpAddr,

    /// Port to bind the TLS WebSocket listener on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory holding cert.pem/key.pem. Defaults to ~/.probe-agent.
    #[arg(long)]
    cert_dir: Option<PathBuf>,

    /// Allowed browser Origin header (repeatable). An absent Origin header
    /// is always permitted (non-browser/local client).
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Log level passed through to `env_logger` if RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(e) = run(cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn init_logging(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level.to_string());
    env_logger::Builder::from_env(env).init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cert_dir = cli
        .cert_dir
        .or_else(default_cert_dir)
        .ok_or("could not determine a home directory for the default certificate path; pass --cert-dir explicitly")?;

    let tls_config = load_tls_config(&cert_dir)?;
    let addr = SocketAddr::new(cli.bind, cli.port);
    let allowed_origins = Arc::new(cli.allowed_origins);

    log::info!("starting probe-agent on {addr}, {} allowed origin(s)", allowed_origins.len());

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(probe_session::server::run(addr, tls_config, allowed_origins))?;
    Ok(())
}

fn default_cert_dir() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".probe-agent"))
}

fn load_tls_config(cert_dir: &PathBuf) -> Result<Arc<rustls::ServerConfig>, Box<dyn std::error::Error>> {
    let cert_path = cert_dir.join("cert.pem");
    let key_path = cert_dir.join("key.pem");

    if !cert_path.exists() || !key_path.exists() {
        return Err(format!(
            "no TLS certificate found at {}; place cert.pem and key.pem there \
             (certificate provisioning is not handled by this agent) or pass --cert-dir",
            cert_dir.display()
        )
        .into());
    }

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(&cert_path)?)).collect::<Result<Vec<_>, _>>()?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(&key_path)?)).collect::<Result<Vec<_>, _>>()?;

    let key = keys
        .pop()
        .ok_or_else(|| format!("no private key found in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, rustls::pki_types::PrivateKeyDer::Pkcs8(key))?;

    Ok(Arc::new(config))
}
