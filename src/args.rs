use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

/// Ten years, in seconds.
const MAX_SESSION_TTL: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether clients connect to paperfeed over https.
    /// If so, the sessionid cookie is sent as a secure cookie.
    #[arg(short, long, env = "SECURE")]
    secure: bool,

    /// The address paperfeed should listen on. By default
    /// paperfeed will listen just on the IPv4 loopback.
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// The port paperfeed listens on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Where users (and, for the file backend, papers) are stored.
    #[arg(short, long, env = "DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Serve static files from here, for anything not under /api.
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// How long a login lasts, in seconds.
    #[arg(
        long,
        env = "SESSION_TTL",
        default_value_t = 24 * 60 * 60,
        value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_TTL),
    )]
    session_ttl: u64,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn static_dir(&self) -> Option<&Path> {
        self.static_dir.as_deref()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }
}
