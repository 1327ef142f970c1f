//! CLI entry point. Offers `client` and `server` subcommands, each
//! loading a `Config` from an optional file and layering flag overrides
//! on top (`fsocks/client.py` / `fsocks/server.py`'s `-c/--config`).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use fsocks::core::{client, server};
use fsocks::{Config, Result};

#[derive(Parser)]
#[command(name = "fsocks", about = "A two-endpoint SOCKS5 tunneling proxy")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the SOCKS5-facing client, relaying user agents through the tunnel.
    Client {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the address the SOCKS5 listener binds to.
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Override the tunnel server address to connect to.
        #[arg(long)]
        server: Option<SocketAddr>,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Run the tunnel server, connecting out to requested targets.
    Server {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the address the tunnel listener binds to.
        #[arg(long)]
        listen: Option<SocketAddr>,
        #[arg(short, long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.role {
        Role::Client {
            config,
            listen,
            server,
            password,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(addr) = listen {
                cfg.client_host = addr.ip().to_string();
                cfg.client_port = addr.port();
            }
            if let Some(addr) = server {
                cfg.server_host = addr.ip().to_string();
                cfg.server_port = addr.port();
            }
            if let Some(password) = password {
                cfg.password = password;
            }
            client::run(cfg).await
        }
        Role::Server {
            config,
            listen,
            password,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(addr) = listen {
                cfg.server_host = addr.ip().to_string();
                cfg.server_port = addr.port();
            }
            if let Some(password) = password {
                cfg.password = password;
            }
            server::run(cfg).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}
