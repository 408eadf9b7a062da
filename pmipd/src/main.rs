use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::UdpSocket;
#[cfg(target_family = "unix")]
use tokio::signal::{self, unix::SignalKind};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use pmip::driver::{AccessDriver, DummyDriver};
use pmip::metrics::NoMetrics;
use pmip::{Lma, Mag};

mod config;

use config::Config;

/// Default path of the configuration file.
const DEFAULT_CONFIG_FILE: &str = "pmip.toml";

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run as a mobile access gateway.
    Mag,
    /// Run as a local mobility anchor.
    Lma,
    /// Validate the configuration file and print a summary.
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.silent {
        LevelFilter::ERROR
    } else if cli.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load(&cli.config)?;
    info!(
        node_id = %config.node_id,
        nodes = config.nodes.len(),
        anchors = config.anchors.len(),
        "Loaded configuration"
    );

    match cli.command {
        Command::Check => {
            println!("node id:  {}", config.node_id);
            println!("address:  [{}]:{}", config.address, config.port);
            println!("mobile nodes: {}", config.nodes.len());
            println!("anchors:      {}", config.anchors.len());
            println!("access links: {}", config.mag.links.len());
            return Ok(());
        }
        Command::Mag => run_mag(config).await?,
        Command::Lma => run_lma(config).await?,
    }

    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_mag(config: Config) -> Result<(), Box<dyn Error>> {
    use pmip::router_advertiser::IcmpRaSocket;
    use pmip::tunnel_router::NetlinkPlane;

    let socket = UdpSocket::bind(SocketAddr::from((config.address, config.port))).await?;
    let plane = NetlinkPlane::new()?;
    let ra_out = IcmpRaSocket::new()?;

    let node_db = std::sync::Arc::new(config.node_db());
    let mag = Mag::new(
        config.mag_config(),
        node_db,
        socket,
        plane,
        ra_out,
        NoMetrics,
    )?;

    // Without a platform attachment detector, the dummy driver exercises
    // the configured terminals.
    let mut driver = (!config.mag.dummy_clients.is_empty()).then(|| {
        DummyDriver::new(
            config
                .mag
                .dummy_clients
                .iter()
                .map(|c| (c.mac, c.link))
                .collect(),
            Duration::from_secs(config.mag.dummy_period_secs),
        )
    });
    if let Some(driver) = driver.as_mut() {
        driver.start(mag.driver_handle())?;
    }

    wait_for_shutdown().await;
    if let Some(driver) = driver.as_mut() {
        driver.stop();
    }
    mag.shutdown();

    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_lma(config: Config) -> Result<(), Box<dyn Error>> {
    use pmip::tunnel_router::NetlinkPlane;

    let socket = UdpSocket::bind(SocketAddr::from((config.address, config.port))).await?;
    let plane = NetlinkPlane::new()?;

    let node_db = std::sync::Arc::new(config.node_db());
    let lma = Lma::new(config.lma_config(), node_db, socket, plane, NoMetrics)?;

    wait_for_shutdown().await;
    lma.shutdown();

    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run_mag(_config: Config) -> Result<(), Box<dyn Error>> {
    panic!("The kernel forwarding plane is only supported on linux");
}

#[cfg(not(target_os = "linux"))]
async fn run_lma(_config: Config) -> Result<(), Box<dyn Error>> {
    panic!("The kernel forwarding plane is only supported on linux");
}

#[cfg(target_family = "unix")]
async fn wait_for_shutdown() {
    let mut sigint =
        signal::unix::signal(SignalKind::interrupt()).expect("Can install SIGINT handler");
    let mut sigterm =
        signal::unix::signal(SignalKind::terminate()).expect("Can install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => { }
        _ = sigterm.recv() => { }
    }
    info!("Shutting down");
}

#[cfg(not(target_family = "unix"))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}
