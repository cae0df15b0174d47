use super::LightningClient;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::graph::{Channel, ChannelId, Graph, Node, PubKey};
use crate::state::{FeePolicy, FeePpm, ForwardEvent, LocalChannel, NodeInfo};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE};
use base64::Engine;
use chrono::{DateTime, Utc};
use hex::DisplayHex;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell, Semaphore, SemaphorePermit};
use tokio::time::sleep;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 1000;
const RATE_LIMIT_DELAY_MS: u64 = 100;
/// Page size for forwarding history queries.
const FORWARDS_PAGE_SIZE: u32 = 10_000;
/// LND's default CLTV delta, used when our policy is not in the graph yet.
const DEFAULT_TIME_LOCK_DELTA: u32 = 80;
const INVOICE_EXPIRY_SECS: u64 = 600;
const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Rate-limited, retrying client for LND's REST gateway.
pub struct LndClient {
    http: reqwest::Client,
    /// No overall timeout, for long-lived subscriptions.
    stream_http: reqwest::Client,
    base_url: String,
    macaroon_hex: String,
    rate_limiter: Arc<Semaphore>,
    own_pubkey: OnceCell<PubKey>,
    /// Funding outpoints learned from channel listings, needed for policy updates.
    channel_points: Mutex<HashMap<ChannelId, String>>,
}

impl LndClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let cert_pem = std::fs::read(&config.tls_cert_path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read TLS cert at {}: {}",
                config.tls_cert_path.display(),
                e
            ))
        })?;
        let macaroon = std::fs::read(config.macaroon_path()).map_err(|e| {
            Error::Configuration(format!(
                "failed to read macaroon at {}: {}",
                config.macaroon_path().display(),
                e
            ))
        })?;

        let build = |timeout: Option<Duration>| -> Result<reqwest::Client> {
            let cert = reqwest::Certificate::from_pem(&cert_pem)
                .map_err(|e| Error::Configuration(format!("invalid TLS cert: {}", e)))?;
            let mut builder = reqwest::Client::builder().add_root_certificate(cert);
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            builder
                .build()
                .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))
        };

        Ok(Self {
            http: build(Some(Duration::from_secs(config.rpc_timeout_secs)))?,
            stream_http: build(None)?,
            base_url: format!("https://{}", config.host.trim_end_matches('/')),
            macaroon_hex: macaroon.as_slice().to_lower_hex_string(),
            rate_limiter: Arc::new(Semaphore::new(1)),
            own_pubkey: OnceCell::new(),
            channel_points: Mutex::new(HashMap::new()),
        })
    }

    /// Hold the returned permit for the whole request.
    async fn rate_limit(&self) -> Result<SemaphorePermit<'_>> {
        take_slot(&self.rate_limiter).await
    }

    async fn with_retry<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let permit = self.rate_limit().await?;
            let result = f().await;
            drop(permit);
            match result {
                Ok(resp) => {
                    debug!("{}: success", name);
                    return Ok(resp);
                }
                Err(e) if attempt + 1 < MAX_RETRIES => {
                    let delay = RETRY_BASE_MS * 2u64.pow(attempt);
                    warn!(
                        "{}: attempt {} failed ({}), retrying in {}ms",
                        name,
                        attempt + 1,
                        e,
                        delay
                    );
                    sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::Transport(format!(
                        "{}: all {} attempts failed: {}",
                        name, MAX_RETRIES, e
                    )));
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .send()
            .await?;
        decode(path, resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .json(body)
            .send()
            .await?;
        decode(path, resp).await
    }

    async fn own_pubkey(&self) -> Result<PubKey> {
        self.own_pubkey
            .get_or_try_init(|| async { self.get_root_info().await.map(|info| info.pubkey) })
            .await
            .cloned()
    }

    async fn channel_point(&self, channel_id: ChannelId) -> Result<String> {
        if let Some(point) = self.lookup_channel_point(channel_id) {
            return Ok(point);
        }
        // Refreshes the cache as a side effect
        self.list_owned_channels().await?;
        self.lookup_channel_point(channel_id)
            .ok_or_else(|| Error::Validation(format!("channel {} is not ours", channel_id)))
    }

    fn lookup_channel_point(&self, channel_id: ChannelId) -> Option<String> {
        self.channel_points
            .lock()
            .ok()
            .and_then(|points| points.get(&channel_id).cloned())
    }

    /// Fee of the cheapest circular route with no fee limit, or `None` when LND
    /// finds no route at all. A single attempt.
    async fn unbounded_route_fee(
        &self,
        out_channel: ChannelId,
        last_hop: &PubKey,
        amount_sats: u64,
    ) -> Result<Option<u64>> {
        let own = self.own_pubkey().await?;
        let path = routes_path(&own, out_channel, last_hop, amount_sats);
        let _permit = self.rate_limit().await?;
        let resp: QueryRoutesResponse = self.get(&path).await?;
        Ok(cheapest_route_fee(&resp))
    }

    /// LND applies the fee limit while searching for a path, so a route that is
    /// only too expensive comes back as "no path". Ask again without a limit to
    /// tell the two apart.
    async fn explain_no_path(
        &self,
        out_channel: ChannelId,
        last_hop: &PubKey,
        amount_sats: u64,
        max_fee_sats: u64,
    ) -> Error {
        let fee = match self.unbounded_route_fee(out_channel, last_hop, amount_sats).await {
            Ok(fee) => fee,
            Err(e) => {
                debug!("QueryRoutes after failed payment: {}", e);
                None
            }
        };
        no_path_error(fee, out_channel, last_hop, amount_sats, max_fee_sats)
    }

    /// CLTV delta of our side of the channel, preserved across fee updates.
    async fn time_lock_delta(&self, channel_id: ChannelId) -> Result<u32> {
        let own = self.own_pubkey().await?;
        let path = format!("/v1/graph/edge/{}", channel_id);
        let edge: EdgeResponse = self
            .with_retry("GetChanInfo", || self.get(&path))
            .await?;
        let policy = if edge.node1_pub == own.as_str() {
            edge.node1_policy
        } else {
            edge.node2_policy
        };
        Ok(policy
            .map(|p| p.time_lock_delta)
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_TIME_LOCK_DELTA))
    }
}

async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ApiError>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(Error::Transport(format!("{} returned {}: {}", path, status, message)));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn parse_pubkey(s: &str) -> Result<PubKey> {
    s.parse()
        .map_err(|e| Error::Transport(format!("node returned bad pubkey: {}", e)))
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

async fn take_slot(limiter: &Semaphore) -> Result<SemaphorePermit<'_>> {
    let permit = limiter
        .acquire()
        .await
        .map_err(|_| Error::Transport("rate limiter semaphore closed".into()))?;
    sleep(Duration::from_millis(RATE_LIMIT_DELAY_MS)).await;
    Ok(permit)
}

/// Pathfinding failure, as opposed to a route that failed in flight.
fn is_no_path(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("unable to find a path") || lower.contains("no_route")
}

/// `QueryRoutes` towards ourselves, leaving through `out_channel` and returning via
/// `last_hop`. Bytes in query strings take URL-safe base64.
fn routes_path(own: &PubKey, out_channel: ChannelId, last_hop: &PubKey, amount_sats: u64) -> String {
    format!(
        "/v1/graph/routes/{}/{}?outgoing_chan_id={}&last_hop_pubkey={}&use_mission_control=true",
        own,
        amount_sats,
        out_channel,
        URL_SAFE.encode(last_hop.to_bytes())
    )
}

/// Cheapest route fee in whole satoshis, rounded up.
fn cheapest_route_fee(resp: &QueryRoutesResponse) -> Option<u64> {
    resp.routes
        .iter()
        .map(|r| {
            if r.total_fees_msat > 0 {
                r.total_fees_msat.div_ceil(1000)
            } else {
                r.total_fees
            }
        })
        .min()
}

fn no_path_error(
    unbounded_fee: Option<u64>,
    out_channel: ChannelId,
    last_hop: &PubKey,
    amount_sats: u64,
    max_fee_sats: u64,
) -> Error {
    match unbounded_fee {
        Some(fee) if fee > max_fee_sats => {
            debug!(
                "Cheapest route for {} sat costs {} sat, limit was {}",
                amount_sats, fee, max_fee_sats
            );
            Error::FeeExceeded {
                out_channel,
                last_hop: last_hop.clone(),
                amount_sats,
                max_fee_sats,
            }
        }
        _ => Error::NoRoute {
            out_channel,
            last_hop: last_hop.clone(),
            amount_sats,
        },
    }
}

/// Classify LND's `payment_error` string.
fn payment_error(
    message: &str,
    out_channel: ChannelId,
    last_hop: &PubKey,
    amount_sats: u64,
    max_fee_sats: u64,
) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("insufficient") {
        Error::InsufficientBalance {
            out_channel,
            amount_sats,
        }
    } else if lower.contains("fee") && (lower.contains("limit") || lower.contains("exceed")) {
        Error::FeeExceeded {
            out_channel,
            last_hop: last_hop.clone(),
            amount_sats,
            max_fee_sats,
        }
    } else {
        debug!("Payment failed with {:?}, treating as no route", message);
        Error::NoRoute {
            out_channel,
            last_hop: last_hop.clone(),
            amount_sats,
        }
    }
}

#[async_trait::async_trait]
impl LightningClient for LndClient {
    async fn get_root_info(&self) -> Result<NodeInfo> {
        let resp: GetInfoResponse = self
            .with_retry("GetInfo", || self.get("/v1/getinfo"))
            .await?;
        Ok(NodeInfo {
            pubkey: parse_pubkey(&resp.identity_pubkey)?,
            alias: resp.alias,
        })
    }

    async fn get_graph(&self) -> Result<Graph> {
        let resp: GraphResponse = self
            .with_retry("DescribeGraph", || self.get("/v1/graph"))
            .await?;

        let nodes = resp
            .nodes
            .into_iter()
            .map(|n| {
                Ok(Node {
                    pubkey: parse_pubkey(&n.pub_key)?,
                    alias: n.alias,
                    last_update: timestamp(n.last_update),
                    channels: Vec::new(),
                    addresses: n.addresses.into_iter().map(|a| a.addr).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let channels = resp
            .edges
            .into_iter()
            .map(|e| {
                Ok(Channel {
                    id: ChannelId(e.channel_id),
                    node1: parse_pubkey(&e.node1_pub)?,
                    node2: parse_pubkey(&e.node2_pub)?,
                    capacity_sats: e.capacity,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Graph: {} nodes, {} channels", nodes.len(), channels.len());
        Ok(Graph::new(nodes, channels))
    }

    async fn list_owned_channels(&self) -> Result<Vec<LocalChannel>> {
        let resp: ListChannelsResponse = self
            .with_retry("ListChannels", || self.get("/v1/channels"))
            .await?;
        let fees: FeeReportResponse = self
            .with_retry("FeeReport", || self.get("/v1/fees"))
            .await?;
        let fees: HashMap<u64, FeePolicy> = fees
            .channel_fees
            .into_iter()
            .map(|f| {
                (
                    f.chan_id,
                    FeePolicy {
                        rate_ppm: f.fee_per_mil.min(FeePpm::MAX as u64) as FeePpm,
                        base_fee_msat: f.base_fee_msat,
                    },
                )
            })
            .collect();

        if let Ok(mut points) = self.channel_points.lock() {
            for ch in &resp.channels {
                points.insert(ChannelId(ch.chan_id), ch.channel_point.clone());
            }
        }

        resp.channels
            .into_iter()
            .map(|ch| {
                Ok(LocalChannel {
                    id: ChannelId(ch.chan_id),
                    remote_pubkey: parse_pubkey(&ch.remote_pubkey)?,
                    capacity_sats: ch.capacity,
                    local_sats: ch.local_balance,
                    remote_sats: ch.remote_balance,
                    fee: fees.get(&ch.chan_id).copied().unwrap_or_default(),
                    active: ch.active,
                })
            })
            .collect()
    }

    async fn forwarding_history(&self, since: DateTime<Utc>) -> Result<Vec<ForwardEvent>> {
        let mut events = Vec::new();
        let mut index_offset = 0u32;
        let end_time = Utc::now().timestamp();

        loop {
            let request = ForwardingHistoryRequest {
                start_time: since.timestamp().to_string(),
                end_time: end_time.to_string(),
                index_offset,
                num_max_events: FORWARDS_PAGE_SIZE,
            };
            let resp: ForwardingHistoryResponse = self
                .with_retry("ForwardingHistory", || self.post("/v1/switch", &request))
                .await?;

            let page_len = resp.forwarding_events.len();
            events.extend(resp.forwarding_events.into_iter().map(|f| ForwardEvent {
                chan_in: ChannelId(f.chan_id_in),
                chan_out: ChannelId(f.chan_id_out),
                timestamp: timestamp(f.timestamp),
            }));

            if page_len < FORWARDS_PAGE_SIZE as usize || resp.last_offset_index <= index_offset {
                break;
            }
            index_offset = resp.last_offset_index;
        }

        debug!("Forwarding history since {}: {} events", since, events.len());
        Ok(events)
    }

    async fn update_channel_fee(
        &self,
        channel_id: ChannelId,
        rate_ppm: FeePpm,
        base_fee_msat: u64,
    ) -> Result<()> {
        let point = self.channel_point(channel_id).await?;
        let (txid, index) = point
            .split_once(':')
            .and_then(|(txid, idx)| idx.parse::<u32>().ok().map(|i| (txid.to_string(), i)))
            .ok_or_else(|| Error::Transport(format!("malformed channel point {:?}", point)))?;

        let request = PolicyUpdateRequest {
            chan_point: ChannelPoint {
                funding_txid_str: txid,
                output_index: index,
            },
            base_fee_msat: base_fee_msat.to_string(),
            fee_rate_ppm: rate_ppm,
            time_lock_delta: self.time_lock_delta(channel_id).await?,
        };
        let resp: PolicyUpdateResponse = self
            .with_retry("UpdateChannelPolicy", || self.post("/v1/chanpolicy", &request))
            .await?;

        if let Some(failed) = resp.failed_updates.first() {
            return Err(Error::Transport(format!(
                "policy update for channel {} failed: {} {}",
                channel_id, failed.reason, failed.update_error
            )));
        }
        Ok(())
    }

    async fn send_circular_payment(
        &self,
        out_channel: ChannelId,
        last_hop: &PubKey,
        amount_sats: u64,
        max_fee_sats: u64,
    ) -> Result<u64> {
        let invoice_request = InvoiceRequest {
            value: amount_sats.to_string(),
            memo: "lnboss rebalance".to_string(),
            expiry: INVOICE_EXPIRY_SECS.to_string(),
        };
        let invoice: InvoiceResponse = self
            .with_retry("AddInvoice", || self.post("/v1/invoices", &invoice_request))
            .await?;

        let request = SendRequest {
            payment_request: invoice.payment_request,
            outgoing_chan_id: out_channel.0.to_string(),
            last_hop_pubkey: BASE64.encode(last_hop.to_bytes()),
            fee_limit: FeeLimit {
                fixed: max_fee_sats.to_string(),
            },
            allow_self_payment: true,
        };

        // Payments are not idempotent: a single attempt only.
        let resp: SendResponse = {
            let _permit = self.rate_limit().await?;
            self.post("/v1/channels/transactions", &request).await?
        };

        if !resp.payment_error.is_empty() {
            if is_no_path(&resp.payment_error) {
                return Err(self
                    .explain_no_path(out_channel, last_hop, amount_sats, max_fee_sats)
                    .await);
            }
            return Err(payment_error(
                &resp.payment_error,
                out_channel,
                last_hop,
                amount_sats,
                max_fee_sats,
            ));
        }
        let fee = resp.payment_route.map(|r| r.total_fees).unwrap_or(0);
        if fee > max_fee_sats {
            warn!(
                "Circular payment on channel {} paid {} sat, above its {} sat limit",
                out_channel, fee, max_fee_sats
            );
        }
        Ok(fee)
    }

    async fn channel_events(&self) -> Result<Option<mpsc::Receiver<()>>> {
        let mut resp = self
            .stream_http
            .get(format!("{}/v2/router/htlcevents", self.base_url))
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "HTLC event subscription returned {}",
                resp.status()
            )));
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => {
                        buf.extend_from_slice(&chunk);
                        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            if line.iter().all(u8::is_ascii_whitespace) {
                                continue;
                            }
                            if tx.is_closed() {
                                return;
                            }
                            // Coalesce bursts: one pending notification is enough
                            let _ = tx.try_send(());
                        }
                    }
                    Ok(None) => {
                        warn!("HTLC event stream ended");
                        return;
                    }
                    Err(e) => {
                        warn!("HTLC event stream failed: {}", e);
                        return;
                    }
                }
            }
        });
        Ok(Some(rx))
    }
}

// ---------------------------------------------------------------------------
// REST wire types. 64-bit integers arrive as JSON strings.
// ---------------------------------------------------------------------------

mod string_int {
    use serde::{Deserialize, Deserializer};
    use std::fmt::Display;
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum<T> {
        Str(String),
        Num(T),
    }

    pub fn deserialize<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
    {
        match StrOrNum::<T>::deserialize(d)? {
            StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
            StrOrNum::Num(n) => Ok(n),
        }
    }
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct GetInfoResponse {
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
}

#[derive(Deserialize)]
struct GraphResponse {
    #[serde(default)]
    nodes: Vec<LndNode>,
    #[serde(default)]
    edges: Vec<LndEdge>,
}

#[derive(Deserialize)]
struct LndNode {
    pub_key: String,
    #[serde(default)]
    alias: String,
    #[serde(default, with = "string_int")]
    last_update: i64,
    #[serde(default)]
    addresses: Vec<LndAddress>,
}

#[derive(Deserialize)]
struct LndAddress {
    #[serde(default)]
    addr: String,
}

#[derive(Deserialize)]
struct LndEdge {
    #[serde(with = "string_int")]
    channel_id: u64,
    node1_pub: String,
    node2_pub: String,
    #[serde(default, with = "string_int")]
    capacity: u64,
}

#[derive(Deserialize)]
struct EdgeResponse {
    node1_pub: String,
    #[serde(default)]
    node1_policy: Option<RoutingPolicy>,
    #[serde(default)]
    node2_policy: Option<RoutingPolicy>,
}

#[derive(Deserialize)]
struct RoutingPolicy {
    #[serde(default)]
    time_lock_delta: u32,
}

#[derive(Deserialize)]
struct ListChannelsResponse {
    #[serde(default)]
    channels: Vec<LndChannel>,
}

#[derive(Deserialize)]
struct LndChannel {
    #[serde(default)]
    active: bool,
    remote_pubkey: String,
    channel_point: String,
    #[serde(with = "string_int")]
    chan_id: u64,
    #[serde(default, with = "string_int")]
    capacity: u64,
    #[serde(default, with = "string_int")]
    local_balance: u64,
    #[serde(default, with = "string_int")]
    remote_balance: u64,
}

#[derive(Deserialize)]
struct FeeReportResponse {
    #[serde(default)]
    channel_fees: Vec<ChannelFeeReport>,
}

#[derive(Deserialize)]
struct ChannelFeeReport {
    #[serde(with = "string_int")]
    chan_id: u64,
    #[serde(default, with = "string_int")]
    base_fee_msat: u64,
    #[serde(default, with = "string_int")]
    fee_per_mil: u64,
}

#[derive(Serialize)]
struct ForwardingHistoryRequest {
    start_time: String,
    end_time: String,
    index_offset: u32,
    num_max_events: u32,
}

#[derive(Deserialize)]
struct ForwardingHistoryResponse {
    #[serde(default)]
    forwarding_events: Vec<LndForward>,
    #[serde(default)]
    last_offset_index: u32,
}

#[derive(Deserialize)]
struct LndForward {
    #[serde(default, with = "string_int")]
    timestamp: i64,
    #[serde(with = "string_int")]
    chan_id_in: u64,
    #[serde(with = "string_int")]
    chan_id_out: u64,
}

#[derive(Serialize)]
struct ChannelPoint {
    funding_txid_str: String,
    output_index: u32,
}

#[derive(Serialize)]
struct PolicyUpdateRequest {
    chan_point: ChannelPoint,
    base_fee_msat: String,
    fee_rate_ppm: u32,
    time_lock_delta: u32,
}

#[derive(Deserialize)]
struct PolicyUpdateResponse {
    #[serde(default)]
    failed_updates: Vec<FailedUpdate>,
}

#[derive(Deserialize)]
struct FailedUpdate {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    update_error: String,
}

#[derive(Serialize)]
struct InvoiceRequest {
    value: String,
    memo: String,
    expiry: String,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    payment_request: String,
}

#[derive(Serialize)]
struct FeeLimit {
    fixed: String,
}

#[derive(Serialize)]
struct SendRequest {
    payment_request: String,
    outgoing_chan_id: String,
    last_hop_pubkey: String,
    fee_limit: FeeLimit,
    allow_self_payment: bool,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    payment_error: String,
    #[serde(default)]
    payment_route: Option<PaymentRoute>,
}

#[derive(Deserialize)]
struct PaymentRoute {
    #[serde(default, with = "string_int")]
    total_fees: u64,
}

#[derive(Deserialize)]
struct QueryRoutesResponse {
    #[serde(default)]
    routes: Vec<LndRoute>,
}

#[derive(Deserialize)]
struct LndRoute {
    #[serde(default, with = "string_int")]
    total_fees: u64,
    #[serde(default, with = "string_int")]
    total_fees_msat: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pk;

    #[test]
    fn test_decode_graph_with_string_integers() {
        let json = r#"{
            "nodes": [
                {"last_update": 1700000000, "pub_key": "0202020202020202020202020202020202020202020202020202020202020202020202", "alias": "bob",
                 "addresses": [{"network": "tcp", "addr": "1.2.3.4:9735"}]}
            ],
            "edges": [
                {"channel_id": "812345678901234567", "last_update": 1700000100,
                 "node1_pub": "02aa", "node2_pub": "02bb", "capacity": "5000000"}
            ]
        }"#;
        let resp: GraphResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.nodes[0].alias, "bob");
        assert_eq!(resp.nodes[0].last_update, 1_700_000_000);
        assert_eq!(resp.nodes[0].addresses[0].addr, "1.2.3.4:9735");
        assert_eq!(resp.edges[0].channel_id, 812_345_678_901_234_567);
        assert_eq!(resp.edges[0].capacity, 5_000_000);
    }

    #[test]
    fn test_decode_channels_defaults_missing_balances() {
        let json = r#"{"channels": [
            {"active": true, "remote_pubkey": "02bb", "channel_point": "abcd:1",
             "chan_id": "42", "capacity": "1000000", "local_balance": "400000"}
        ]}"#;
        let resp: ListChannelsResponse = serde_json::from_str(json).unwrap();
        let ch = &resp.channels[0];
        assert_eq!(ch.chan_id, 42);
        assert_eq!(ch.local_balance, 400_000);
        assert_eq!(ch.remote_balance, 0);
        assert!(ch.active);
    }

    #[test]
    fn test_decode_forwarding_history() {
        let json = r#"{"forwarding_events": [
            {"timestamp": "1700000000", "chan_id_in": "1", "chan_id_out": "2", "amt_in": "1000"}
        ], "last_offset_index": 1}"#;
        let resp: ForwardingHistoryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.forwarding_events[0].chan_id_in, 1);
        assert_eq!(resp.forwarding_events[0].chan_id_out, 2);
        assert_eq!(resp.last_offset_index, 1);
    }

    #[test]
    fn test_empty_responses_decode() {
        let resp: GraphResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.nodes.is_empty() && resp.edges.is_empty());
        let resp: ForwardingHistoryResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.forwarding_events.is_empty());
        let resp: SendResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.payment_error.is_empty());
    }

    #[test]
    fn test_payment_error_classification() {
        let hop = pk(3);
        let ch = ChannelId(7);
        assert!(matches!(
            payment_error("insufficient local balance", ch, &hop, 1000, 1),
            Error::InsufficientBalance { .. }
        ));
        assert!(matches!(
            payment_error("FAILURE_REASON_NO_ROUTE", ch, &hop, 1000, 1),
            Error::NoRoute { .. }
        ));
        assert!(matches!(
            payment_error("unable to find a path to destination", ch, &hop, 1000, 1),
            Error::NoRoute { .. }
        ));
        assert!(matches!(
            payment_error("route fee exceeds fee limit", ch, &hop, 1000, 1),
            Error::FeeExceeded { .. }
        ));
    }

    #[test]
    fn test_no_path_detection() {
        assert!(is_no_path("unable to find a path to destination"));
        assert!(is_no_path("FAILURE_REASON_NO_ROUTE"));
        assert!(!is_no_path("TemporaryChannelFailure"));
        assert!(!is_no_path("insufficient local balance"));
    }

    #[test]
    fn test_no_path_with_expensive_route_is_fee_exceeded() {
        let json = r#"{"routes": [
            {"total_time_lock": 800000, "total_fees": "12", "total_amt": "100012",
             "total_fees_msat": "12345", "total_amt_msat": "100012345"},
            {"total_fees": "20", "total_fees_msat": "20000"}
        ], "success_prob": 0.5}"#;
        let resp: QueryRoutesResponse = serde_json::from_str(json).unwrap();
        let fee = cheapest_route_fee(&resp);
        assert_eq!(fee, Some(13));

        let err = no_path_error(fee, ChannelId(7), &pk(3), 100_000, 10);
        match err {
            Error::FeeExceeded {
                out_channel,
                amount_sats,
                max_fee_sats,
                ..
            } => {
                assert_eq!(out_channel, ChannelId(7));
                assert_eq!(amount_sats, 100_000);
                assert_eq!(max_fee_sats, 10);
            }
            other => panic!("expected FeeExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_no_path_with_affordable_or_missing_route_is_no_route() {
        // A route within the limit exists: the failure was something else
        assert!(matches!(
            no_path_error(Some(13), ChannelId(7), &pk(3), 100_000, 50),
            Error::NoRoute { .. }
        ));
        let resp: QueryRoutesResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(cheapest_route_fee(&resp), None);
        assert!(matches!(
            no_path_error(None, ChannelId(7), &pk(3), 100_000, 50),
            Error::NoRoute { .. }
        ));
    }

    #[test]
    fn test_route_fee_falls_back_to_whole_sats() {
        let resp: QueryRoutesResponse =
            serde_json::from_str(r#"{"routes": [{"total_fees": "7"}]}"#).unwrap();
        assert_eq!(cheapest_route_fee(&resp), Some(7));
    }

    #[test]
    fn test_routes_path() {
        let path = routes_path(&pk(0), ChannelId(42), &pk(1), 250_000);
        assert!(path.starts_with(&format!("/v1/graph/routes/{}/250000?", pk(0))));
        assert!(path.contains("outgoing_chan_id=42&"));
        let encoded = path
            .split("last_hop_pubkey=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap();
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(URL_SAFE.decode(encoded).unwrap(), pk(1).to_bytes());
    }

    #[tokio::test]
    async fn test_rate_limit_slot_held_until_dropped() {
        let limiter = Semaphore::new(1);
        let permit = take_slot(&limiter).await.unwrap();
        // A second request cannot start while the first is in flight
        let blocked = tokio::time::timeout(Duration::from_millis(300), take_slot(&limiter)).await;
        assert!(blocked.is_err());
        drop(permit);
        let next = tokio::time::timeout(Duration::from_secs(2), take_slot(&limiter)).await;
        assert!(next.is_ok());
    }

    #[test]
    fn test_send_request_encodes_last_hop_as_base64() {
        let hop = pk(1);
        let encoded = BASE64.encode(hop.to_bytes());
        let decoded = BASE64.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), PubKey::LEN);
        assert_eq!(decoded[0], 0x02);
    }
}
