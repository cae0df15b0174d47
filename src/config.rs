use crate::error::{Error, Result};
use crate::fees::LiquidityFees;
use crate::state::FeePpm;
use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest forwarding history window the reaper will ask for.
pub const MAX_LOOKBACK_DAYS: u64 = 3650;
/// Ten years of gossip.
pub const MAX_UPDATE_AGE_HOURS: u64 = 87_600;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub liquidity: LiquidityConfig,
    #[serde(default)]
    pub candidates: CandidatesConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub rebalancer: RebalancerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// LND REST endpoint (host:port, no scheme)
    #[serde(default = "default_host")]
    pub host: String,
    /// Path to LND's TLS certificate
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: PathBuf,
    /// Macaroon with the needed permissions, defaults to the network's admin macaroon
    #[serde(default)]
    pub macaroon_path: Option<PathBuf>,
    /// Bitcoin network
    #[serde(default = "default_network")]
    pub network: String,
    /// Per-request timeout; graph and forwarding pulls can be slow
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Dry-run mode: log decisions but send no fee updates or payments
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct LiquidityConfig {
    /// Local liquidity percent thresholds, highest first
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,
    /// Fee in PPM for each bucket, one more than thresholds
    #[serde(default = "default_fees")]
    pub fees: Vec<FeePpm>,
    /// Percent of capacity past a threshold to wait before changing fees
    #[serde(default)]
    pub stickiness: f64,
    /// Base fee written alongside every rate change
    #[serde(default)]
    pub base_fee_msat: u64,
}

#[derive(Debug, Deserialize)]
pub struct CandidatesConfig {
    #[serde(default = "default_min_capacity")]
    pub min_capacity_sats: u64,
    #[serde(default = "default_min_channels")]
    pub min_channels: usize,
    /// 0 is the root node and 1 a direct peer
    #[serde(default = "default_min_distance")]
    pub min_distance: u32,
    #[serde(default)]
    pub min_distant_neighbors: usize,
    /// Nodes without a gossip update in this window are skipped
    #[serde(default = "default_max_update_age")]
    pub max_update_age_hours: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Skip tor-only nodes
    #[serde(default = "default_true")]
    pub clearnet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorTrigger {
    /// Re-evaluate on a fixed timer
    Interval,
    /// Also re-evaluate whenever the node reports HTLC activity
    Events,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_trigger")]
    pub trigger: MonitorTrigger,
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// Uniform random delay added to every interval
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RebalancerConfig {
    /// Automatic mode stops once the best liquidity gap is below this
    #[serde(default = "default_min_gap")]
    pub min_gap_percent: f64,
    /// Automatic mode tries at most this many channel pairs
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

#[derive(Debug, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,
    /// Channels with at most this many forwards are reported
    #[serde(default)]
    pub max_forwards: usize,
}

// Default value functions
fn lnd_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".lnd")
}
fn default_host() -> String {
    "localhost:8080".to_string()
}
fn default_tls_cert_path() -> PathBuf {
    lnd_dir().join("tls.cert")
}
fn default_network() -> String {
    "mainnet".to_string()
}
fn default_rpc_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_thresholds() -> Vec<f64> {
    vec![85.0, 15.0]
}
fn default_fees() -> Vec<FeePpm> {
    vec![5, 50, 500]
}
fn default_min_capacity() -> u64 {
    1_000_000
}
fn default_min_channels() -> usize {
    1
}
fn default_min_distance() -> u32 {
    2
}
fn default_max_update_age() -> u64 {
    48
}
fn default_limit() -> usize {
    100
}
fn default_trigger() -> MonitorTrigger {
    MonitorTrigger::Events
}
fn default_monitor_interval() -> u64 {
    600
}
fn default_jitter() -> u64 {
    30
}
fn default_min_gap() -> f64 {
    10.0
}
fn default_max_rounds() -> usize {
    10
}
fn default_lookback_days() -> u64 {
    30
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tls_cert_path: default_tls_cert_path(),
            macaroon_path: None,
            network: default_network(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn macaroon_path(&self) -> PathBuf {
        self.macaroon_path.clone().unwrap_or_else(|| {
            lnd_dir()
                .join("data/chain/bitcoin")
                .join(&self.network)
                .join("admin.macaroon")
        })
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
        }
    }
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            fees: default_fees(),
            stickiness: 0.0,
            base_fee_msat: 0,
        }
    }
}

impl Default for CandidatesConfig {
    fn default() -> Self {
        Self {
            min_capacity_sats: default_min_capacity(),
            min_channels: default_min_channels(),
            min_distance: default_min_distance(),
            min_distant_neighbors: 0,
            max_update_age_hours: default_max_update_age(),
            limit: default_limit(),
            clearnet: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
            interval_secs: default_monitor_interval(),
            jitter_secs: default_jitter(),
        }
    }
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            min_gap_percent: default_min_gap(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_forwards: 0,
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file means all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        // Building the policy checks thresholds, fees and stickiness
        self.liquidity_fees()?;

        if self.server.rpc_timeout_secs == 0 {
            return Err(Error::Configuration("rpc_timeout_secs must be positive".into()));
        }
        if self.candidates.min_distance < 2 {
            return Err(Error::Configuration(format!(
                "candidates.min_distance ({}) must be at least 2",
                self.candidates.min_distance
            )));
        }
        if self.monitor.interval_secs == 0 {
            return Err(Error::Configuration("monitor.interval_secs must be positive".into()));
        }
        if !(self.rebalancer.min_gap_percent > 0.0 && self.rebalancer.min_gap_percent <= 100.0) {
            return Err(Error::Configuration(
                "rebalancer.min_gap_percent must be between 0 and 100".into(),
            ));
        }
        if self.rebalancer.max_rounds == 0 {
            return Err(Error::Configuration("rebalancer.max_rounds must be positive".into()));
        }
        if self.candidates.max_update_age_hours > MAX_UPDATE_AGE_HOURS {
            return Err(Error::Configuration(format!(
                "candidates.max_update_age_hours ({}) must be at most {}",
                self.candidates.max_update_age_hours, MAX_UPDATE_AGE_HOURS
            )));
        }
        if self.reaper.lookback_days == 0 {
            return Err(Error::Configuration("reaper.lookback_days must be positive".into()));
        }
        if self.reaper.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(Error::Configuration(format!(
                "reaper.lookback_days ({}) must be at most {}",
                self.reaper.lookback_days, MAX_LOOKBACK_DAYS
            )));
        }
        Ok(())
    }

    pub fn liquidity_fees(&self) -> Result<LiquidityFees> {
        LiquidityFees::new(
            self.liquidity.thresholds.clone(),
            self.liquidity.fees.clone(),
            self.liquidity.stickiness,
        )
    }
}

impl CandidatesConfig {
    /// Oldest gossip update a candidate may have, counted back from `now`.
    pub fn min_updated(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        i64::try_from(self.max_update_age_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .and_then(|age| now.checked_sub_signed(age))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "candidates.max_update_age_hours ({}) is out of range",
                    self.max_update_age_hours
                ))
            })
    }
}

impl ReaperConfig {
    /// Start of the forwarding window ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        i64::try_from(self.lookback_days)
            .ok()
            .and_then(TimeDelta::try_days)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "reaper.lookback_days ({}) is out of range",
                    self.lookback_days
                ))
            })
    }
}

/// Parse a comma separated flag value; empty entries are skipped so `""` is an empty list.
pub fn parse_list<T>(raw: &str, name: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| Error::Configuration(format!("invalid {} entry {:?}: {}", name, s, e)))
        })
        .collect()
}
