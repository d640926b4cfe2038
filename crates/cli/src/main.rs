use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trowser_net::{
    Bootstrap, Config, ConnectionState, Notification, ProxySettings, RunOutcome, TorHttpClient,
    TrowserError,
};

mod address;

#[derive(Parser, Debug)]
#[command(
    name = "trowser",
    version,
    about = "Bootstrap a private Tor SOCKS proxy and browse through it"
)]
struct Args {
    /// Pages to open once connected. The scheme is always forced to https.
    urls: Vec<String>,

    /// Port for the local SOCKS5 proxy (default: pick a free one)
    #[arg(long)]
    socks_port: Option<u16>,

    #[arg(long, value_name = "HOST")]
    listen_host: Option<String>,

    /// Page opened first once the proxy is up
    #[arg(long, value_name = "URL")]
    landing_url: Option<String>,

    /// SOCKS address of a running Tor daemon
    #[arg(long, value_name = "ADDR")]
    upstream: Option<String>,

    /// Use the embedded Arti client instead of a Tor daemon
    #[arg(long)]
    embedded: bool,

    #[arg(long)]
    no_verify_tls: bool,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl Args {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(port) = self.socks_port {
            config = config.with_socks_port(port);
        }
        if let Some(host) = &self.listen_host {
            config = config.with_listen_host(host.as_str());
        }
        if let Some(url) = &self.landing_url {
            config = config.with_landing_url(url.as_str());
        }
        if let Some(addr) = &self.upstream {
            config = config.with_upstream_socks_addr(addr.as_str());
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(secs);
        }
        if self.no_verify_tls {
            config = config.without_tls_verify();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trowser=info,trowser_net=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = args.apply(Config::from_env()?);

    let bootstrap = start(&args, &config).context("Failed to start Tor proxy")?;
    let (handle, mut binding) = bootstrap.into_parts();
    info!("Local SOCKS5 proxy: {}", handle.endpoint().socks_url());

    let tabs = address::tabs(&config.landing_url, &config.new_tab_url, &args.urls);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            notification = binding.recv() => match notification {
                Some(Notification::StatusChanged { state, status }) => print_status(state, &status),
                Some(Notification::Ready { landing_url }) => {
                    info!("Connected, opening {}", landing_url);
                    tokio::spawn(open_tabs(config.clone(), tabs.clone()));
                }
                None => break,
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    if handle.stop().await == RunOutcome::Failed {
        bail!("Tor proxy failed: {}", binding.status());
    }
    Ok(())
}

fn start(args: &Args, config: &Config) -> trowser_net::Result<Bootstrap> {
    if args.embedded {
        return start_embedded(config);
    }
    info!("Using Tor daemon at {}", config.upstream_socks_addr);
    trowser_net::launch_with_tor_daemon(config)
}

#[cfg(feature = "embedded-tor")]
fn start_embedded(config: &Config) -> trowser_net::Result<Bootstrap> {
    info!("Using embedded Arti Tor client");
    trowser_net::launch(trowser_net::ArtiProvider::new(), config, ProxySettings::global())
}

#[cfg(not(feature = "embedded-tor"))]
fn start_embedded(_config: &Config) -> trowser_net::Result<Bootstrap> {
    Err(TrowserError::Config(
        "--embedded requires building with the embedded-tor feature".into(),
    ))
}

fn print_status(state: ConnectionState, status: &str) {
    match state {
        ConnectionState::Connecting => println!("{}", status.yellow()),
        ConnectionState::Connected => println!("{}", status.green()),
    }
}

async fn open_tabs(config: Config, tabs: Vec<String>) {
    let client = match TorHttpClient::from_settings(ProxySettings::global(), &config) {
        Ok(client) => client,
        Err(e) => {
            warn!("Cannot create HTTP client: {}", e);
            return;
        }
    };

    for url in &tabs {
        match client.fetch_page(url).await {
            Ok(page) => println!(
                "{} {} {} ({} bytes)",
                page.status.to_string().cyan(),
                page.url,
                page.title.as_deref().unwrap_or("Untitled").bold(),
                page.bytes
            ),
            Err(e) => warn!("Failed to load {}: {}", url, e),
        }
    }

    match client.verify_tor_connection().await {
        Ok(check) => println!("{} traffic exits through Tor at {}", "✓".green(), check.ip),
        Err(TrowserError::TorNotAvailable) => {
            println!("{} traffic is NOT using Tor", "✗".red())
        }
        Err(e) => warn!("Tor check failed: {}", e),
    }
}
