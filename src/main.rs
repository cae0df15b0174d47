mod candidates;
mod client;
mod config;
mod error;
mod fees;
mod graph;
mod rebalancer;
mod reaper;
mod scheduler;
mod state;
mod view;

use crate::client::LightningClient;
use crate::error::Error;
use crate::fees::LiquidityFees;
use crate::graph::{ChannelId, PubKey};
use crate::state::FeePpm;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "lnboss", version, about = "Channel management helpers for an LND node")]
struct Cli {
    /// Path to lnboss.toml config file
    #[arg(short, long, env = "LNBOSS_CONFIG", default_value = "lnboss.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Log decisions without sending fee updates or payments
    #[arg(long, env = "LNBOSS_DRY_RUN")]
    dry_run: bool,

    /// LND REST host:port
    #[arg(long, env = "LNBOSS_HOST")]
    host: Option<String>,

    /// LND TLS certificate
    #[arg(long, env = "LNBOSS_TLS_CERT_PATH")]
    tls_cert_path: Option<PathBuf>,

    /// Macaroon file
    #[arg(long, env = "LNBOSS_MACAROON_PATH")]
    macaroon_path: Option<PathBuf>,

    /// Bitcoin network, used to find the default macaroon
    #[arg(long, env = "LNBOSS_NETWORK")]
    network: Option<String>,

    /// Comma separated liquidity percent thresholds, highest first
    #[arg(long, env = "LNBOSS_LIQUIDITY_THRESHOLDS")]
    liquidity_thresholds: Option<String>,

    /// Comma separated fees in ppm, one more than thresholds
    #[arg(long, env = "LNBOSS_LIQUIDITY_FEES")]
    liquidity_fees: Option<String>,

    /// Percent past a threshold before a fee changes
    #[arg(long, env = "LNBOSS_LIQUIDITY_STICKINESS")]
    liquidity_stickiness: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List nodes worth opening a channel to
    Candidates {
        /// Measure distances from this node instead of ours
        #[arg(long)]
        pubkey: Option<String>,
        #[arg(long)]
        min_capacity: Option<u64>,
        #[arg(long)]
        min_channels: Option<usize>,
        #[arg(long)]
        min_distance: Option<u32>,
        #[arg(long)]
        min_distant_neighbors: Option<usize>,
        /// Nodes to treat as already connected, comma separated
        #[arg(long, value_delimiter = ',')]
        assume: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Only nodes with a non-tor address
        #[arg(long)]
        clearnet: Option<bool>,
    },
    /// Set channel fees from local liquidity
    Fees {
        /// Keep running and follow liquidity changes
        #[arg(long)]
        daemon: bool,
    },
    /// Move liquidity with circular payments
    Rebalance {
        /// Size of each payment, percent of the out channel's capacity
        step_percent: f64,
        /// Total to move, percent of capacity
        max_percent: f64,
        /// Channel to send out of; all channels when omitted
        #[arg(long, requires = "last_hop_pubkey")]
        out_channel_id: Option<u64>,
        /// Peer the payment must come back through
        #[arg(long)]
        last_hop_pubkey: Option<String>,
        /// Routing fee limit; defaults to the lowest-liquidity fee
        #[arg(long)]
        max_fee_ppm: Option<FeePpm>,
    },
    /// List channels that have not routed recently
    Reaper,
    /// Convert bitcoins to satoshis
    #[command(name = "btc2sat")]
    Btc2sat {
        btc: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config).context("loading configuration")?;
    apply_overrides(&mut config, &cli)?;

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_secs()
        .init();

    // Offline conversion, no node needed
    if let Commands::Btc2sat { btc } = cli.command {
        return print_btc2sat(btc);
    }

    config.validate().context("invalid configuration")?;
    if config.general.dry_run {
        warn!("DRY-RUN MODE: no fee updates or payments will be sent");
    }

    let policy = Arc::new(config.liquidity_fees()?);
    let config = Arc::new(config);
    let client = Arc::new(client::lnd::LndClient::new(&config.server)?);

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal, finishing current step...");
        let _ = shutdown_tx.send(true);
    });

    run(config, client, policy, cli.command, shutdown_rx).await
}

/// Fold command line flags over the file configuration.
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<(), Error> {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(path) = &cli.tls_cert_path {
        config.server.tls_cert_path = path.clone();
    }
    if let Some(path) = &cli.macaroon_path {
        config.server.macaroon_path = Some(path.clone());
    }
    if let Some(network) = &cli.network {
        config.server.network = network.clone();
    }
    if let Some(raw) = &cli.liquidity_thresholds {
        config.liquidity.thresholds = config::parse_list(raw, "liquidity threshold")?;
    }
    if let Some(raw) = &cli.liquidity_fees {
        config.liquidity.fees = config::parse_list(raw, "liquidity fee")?;
    }
    if let Some(stickiness) = cli.liquidity_stickiness {
        config.liquidity.stickiness = stickiness;
    }
    if cli.dry_run {
        config.general.dry_run = true;
    }
    Ok(())
}

async fn run<C: LightningClient + 'static>(
    config: Arc<Config>,
    client: Arc<C>,
    policy: Arc<LiquidityFees>,
    command: Commands,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    match command {
        Commands::Candidates {
            pubkey,
            min_capacity,
            min_channels,
            min_distance,
            min_distant_neighbors,
            assume,
            limit,
            clearnet,
        } => {
            let mut request = candidates::CandidatesRequest::from_config(&config.candidates)?;
            request.pubkey = pubkey.as_deref().map(str::parse::<PubKey>).transpose()?;
            request.assume = assume
                .iter()
                .map(|s| s.parse::<PubKey>())
                .collect::<Result<_, _>>()?;
            if let Some(v) = min_capacity {
                request.min_capacity_sats = v;
            }
            if let Some(v) = min_channels {
                request.min_channels = v;
            }
            if let Some(v) = min_distance {
                request.min_distance = v;
            }
            if let Some(v) = min_distant_neighbors {
                request.min_distant_neighbors = v;
            }
            if let Some(v) = limit {
                request.limit = v;
            }
            if let Some(v) = clearnet {
                request.clearnet = v;
            }

            let found = candidates::candidates(client.as_ref(), &request).await?;
            print!("{}", view::candidates_table(&found));
        }

        Commands::Fees { daemon: false } => {
            print!("{}", view::fee_table(&policy));
            let updates = fees::apply(&config, client.as_ref(), &policy, &cancel).await?;
            for update in &updates {
                println!("{}", view::fee_update(update));
            }
        }

        Commands::Fees { daemon: true } => {
            print!("{}", view::fee_table(&policy));
            run_fee_daemon(config, client, policy, cancel).await?;
        }

        Commands::Rebalance {
            step_percent,
            max_percent,
            out_channel_id,
            last_hop_pubkey,
            max_fee_ppm,
        } => {
            let max_fee_ppm = max_fee_ppm.unwrap_or_else(|| policy.rebalance_fee());
            match (out_channel_id, last_hop_pubkey) {
                (Some(id), Some(last_hop)) => {
                    let last_hop: PubKey = last_hop.parse()?;
                    print!("{}", view::fee_table(&policy));
                    let result = rebalancer::rebalance(
                        &config,
                        client.as_ref(),
                        ChannelId(id),
                        &last_hop,
                        step_percent,
                        max_percent,
                        max_fee_ppm,
                        &cancel,
                    )
                    .await?;
                    for attempt in &result.attempts {
                        println!("{}", view::attempt(attempt));
                    }
                    println!(
                        "Moved {:.2}% of channel {} for {} sat",
                        result.percent, id, result.fee_sats
                    );
                }
                (None, None) => {
                    print!("{}", view::fee_table(&policy));
                    let moved = rebalancer::rebalance_all(
                        &config,
                        client.as_ref(),
                        &policy,
                        step_percent,
                        max_percent,
                        &cancel,
                    )
                    .await?;
                    print!("{}", view::rebalanced_table(&moved));
                }
                _ => {
                    return Err(Error::Validation(
                        "--out-channel-id and --last-hop-pubkey must be given together".into(),
                    )
                    .into())
                }
            }
        }

        Commands::Reaper => {
            let reaped = reaper::reap(&config, client.as_ref()).await?;
            print!("{}", view::reaped_table(&reaped));
        }

        Commands::Btc2sat { btc } => print_btc2sat(btc)?,
    }
    Ok(())
}

fn print_btc2sat(btc: f64) -> anyhow::Result<()> {
    debug!("Converting {} BTC to sats", btc);
    println!("{}", view::btc_to_sats(btc)?);
    Ok(())
}

async fn run_fee_daemon<C: LightningClient + 'static>(
    config: Arc<Config>,
    client: Arc<C>,
    policy: Arc<LiquidityFees>,
    cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let info = client
        .get_root_info()
        .await
        .context("cannot reach the node")?;
    info!("Connected to {} ({})", info.alias, info.pubkey);

    let (mut updates, mut errors) = fees::monitor::monitor(config, client, policy, cancel);
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => println!("{}", view::fee_update(&update)),
                None => break,
            },
            Some(e) = errors.recv() => {
                error!("Fee monitor failed: {}", e);
                return Err(e.into());
            }
        }
    }
    // The monitor may have failed just before closing its update stream
    if let Ok(e) = errors.try_recv() {
        error!("Fee monitor failed: {}", e);
        return Err(e.into());
    }
    info!("Fee monitor stopped");
    Ok(())
}
