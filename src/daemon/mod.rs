//! Orchestrator
//!
//! Owns every subsystem and the event loop that wires them to the three
//! external collaborators: the main-chain node (JSON-RPC plus the ZMQ
//! reader's event queue), Stratum-connected miners, and the P2P gossip
//! overlay. The transports themselves live outside this crate and attach
//! through the [`StratumSink`] and [`PeerGossip`] seams.

pub mod found_blocks;

use crate::api::{
    abbreviated_hash, FoundBlockRecord, NetworkStats, PoolStatistics, PoolStats, StatsMod,
    StatsModConfig, StatsModNetwork, StatsModPool, StatsModPoolStats, StatsModPort, StatusApi,
};
use crate::block::PoolBlock;
use crate::config::Config;
use crate::core::constants::{BLOCK_HEADERS_REQUIRED, SEED_EPOCH_BLOCKS};
use crate::core::{Difficulty, Hash};
use crate::crypto::{seed_height, NetworkType, PowHasher};
use crate::error::{Error, Result};
use crate::mainchain::{MainChainHeader, MainChainShadow};
use crate::mempool::{Mempool, TxEntry};
use crate::protocol::rpc::{MIN_RPC_VERSION, RETRY_DELAY};
use crate::protocol::{ChainMainEvent, EventQueue, MinerData, NodeEvent, NodeRpcClient};
use crate::sidechain::{AcceptOutcome, IngestResult, NetworkParams, SideChain};
use crate::template::{HashingJob, SideChainSnapshot, SubmitOutcome, TemplateBuilder};
use async_trait::async_trait;
use found_blocks::{FoundBlock, FoundBlockLog};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Node silence this long triggers an RPC poll
pub const ZMQ_TIMEOUT: Duration = Duration::from_secs(30);

/// Orphans are dropped after waiting this long for a parent
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(600);

/// Persisted found-block file, in the working directory
const FOUND_BLOCKS_FILE: &str = "p2pool.blocks";

/// Found blocks exposed through the `pool/blocks` status file
const API_BLOCKS_LIMIT: usize = 51;

/// Capacity of the node event queue
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Bound on shutdown waiting for background jobs
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Seam to the Stratum server: it is told about new templates and calls
/// back into [`Daemon::submit_share`] from its connection workers.
#[async_trait]
pub trait StratumSink: Send + Sync {
    /// A new template is current; push jobs to connected miners
    async fn on_template(&self, job: HashingJob);
}

/// Seam to the P2P overlay
#[async_trait]
pub trait PeerGossip: Send + Sync {
    /// Gossip a serialized pool block
    async fn broadcast(&self, blob: Vec<u8>);
    /// Ask peers for a block by side-chain id
    async fn request_block(&self, id: Hash);
    /// Connected peer count (used by the status API)
    fn peer_count(&self) -> usize;
}

/// No-op Stratum seam for embedding without a miner-facing server
pub struct DisabledStratum;

#[async_trait]
impl StratumSink for DisabledStratum {
    async fn on_template(&self, _job: HashingJob) {}
}

/// No-op gossip seam for a standalone node
pub struct DisabledGossip;

#[async_trait]
impl PeerGossip for DisabledGossip {
    async fn broadcast(&self, _blob: Vec<u8>) {}
    async fn request_block(&self, _id: Hash) {}
    fn peer_count(&self) -> usize {
        0
    }
}

/// Cross-thread nudges drained by the event loop
#[derive(Debug)]
enum Notification {
    /// Rebuild the block template
    UpdateTemplate,
    /// Submit a mined template upstream
    SubmitBlock {
        template_id: u32,
        nonce: u32,
        extra_nonce: u32,
    },
    /// Submit an externally assembled blob upstream
    SubmitBlob(Vec<u8>),
    /// Graceful stop
    Stop,
}

/// The daemon
pub struct Daemon {
    config: Config,
    rpc: NodeRpcClient,
    hasher: Arc<dyn PowHasher>,
    stratum: Arc<dyn StratumSink>,
    peers: Arc<dyn PeerGossip>,

    // shared with background jobs, hence the extra Arc layer
    mainchain: Arc<RwLock<MainChainShadow>>,
    stopped: Arc<AtomicBool>,

    sidechain: RwLock<SideChain>,
    mempool: Mutex<Mempool>,
    template: Mutex<TemplateBuilder>,
    found_blocks: Mutex<FoundBlockLog>,
    miner_data: Mutex<MinerData>,
    api: Option<StatusApi>,

    events: Arc<EventQueue>,
    notify_tx: mpsc::Sender<Notification>,
    notify_rx: Mutex<Option<mpsc::Receiver<Notification>>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    booted: AtomicBool,
}

impl Daemon {
    /// Wire up a daemon; nothing talks to the network yet
    pub fn new(
        config: Config,
        hasher: Arc<dyn PowHasher>,
        stratum: Arc<dyn StratumSink>,
        peers: Arc<dyn PeerGossip>,
    ) -> Result<Self> {
        let rpc = NodeRpcClient::new(&config.host, config.rpc_port)?;
        let api = match &config.api_path {
            Some(path) => Some(StatusApi::new(path.clone())?),
            None => None,
        };
        let params = NetworkParams::for_network(config.network);
        let (notify_tx, notify_rx) = mpsc::channel(64);

        Ok(Self {
            rpc,
            hasher,
            stratum,
            peers,
            mainchain: Arc::new(RwLock::new(MainChainShadow::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            sidechain: RwLock::new(SideChain::new(params)),
            mempool: Mutex::new(Mempool::new()),
            template: Mutex::new(TemplateBuilder::new(config.wallet)),
            found_blocks: Mutex::new(FoundBlockLog::empty(FOUND_BLOCKS_FILE)),
            miner_data: Mutex::new(MinerData::default()),
            api,
            events: EventQueue::new(EVENT_QUEUE_CAPACITY),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            jobs: Mutex::new(Vec::new()),
            booted: AtomicBool::new(false),
            config,
        })
    }

    /// Queue the ZMQ reader feeds
    pub fn events(&self) -> Arc<EventQueue> {
        Arc::clone(&self.events)
    }

    /// Whether shutdown was requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Request a graceful stop from any thread
    pub fn stop(&self) {
        let _ = self.notify_tx.try_send(Notification::Stop);
    }

    /// Request a template rebuild from any thread
    pub fn update_template_async(&self) {
        let _ = self.notify_tx.try_send(Notification::UpdateTemplate);
    }

    /// Submit an externally assembled block blob upstream
    pub fn submit_block_blob(&self, blob: Vec<u8>) {
        let _ = self.notify_tx.try_send(Notification::SubmitBlob(blob));
    }

    fn spawn_job(&self, handle: JoinHandle<()>) {
        let mut jobs = self.jobs.lock();
        jobs.retain(|j| !j.is_finished());
        jobs.push(handle);
    }

    // ---- startup -----------------------------------------------------

    /// Boot sequence against the node, in strict order. Fatal errors
    /// (network mismatch, incompatible RPC) abort; unavailability retries
    /// every second forever.
    async fn startup(&self) -> Result<()> {
        // 1. channels and locks exist since `new`

        // 2. wait for a synchronized node on the right network
        loop {
            match self.rpc.get_info().await {
                Ok(info) => {
                    if info.busy_syncing || !info.synchronized {
                        info!(
                            "node is {}, trying again in 1 second",
                            if info.busy_syncing {
                                "busy syncing"
                            } else {
                                "not synchronized"
                            }
                        );
                        tokio::time::sleep(RETRY_DELAY).await;
                        continue;
                    }
                    let node_network = if info.mainnet {
                        NetworkType::Mainnet
                    } else if info.testnet {
                        NetworkType::Testnet
                    } else if info.stagenet {
                        NetworkType::Stagenet
                    } else {
                        return Err(Error::config("node reports no network type"));
                    };
                    if node_network != self.config.network {
                        return Err(Error::config(format!(
                            "node is on {}, but the wallet and side chain are {}",
                            node_network, self.config.network
                        )));
                    }
                    break;
                }
                Err(e) => {
                    warn!("get_info failed: {}, trying again in 1 second", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        // 3. RPC version gate
        loop {
            match self.rpc.get_version().await {
                Ok(version) => {
                    if version < MIN_RPC_VERSION {
                        return Err(Error::rpc_incompatible(format!(
                            "node RPC v{}.{} is incompatible, update to RPC >= v3.8",
                            version >> 16,
                            version & 0xFFFF
                        )));
                    }
                    break;
                }
                Err(e) => {
                    warn!("get_version failed: {}, trying again in 1 second", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }

        // 4. first miner data
        let miner_data = loop {
            match self.rpc.get_miner_data().await {
                Ok(data) => break data,
                Err(e) => {
                    warn!("get_miner_data failed: {}, trying again in 1 second", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        };

        // 5. the two most recent seed headers; the previous epoch must be
        // installed before any share or peer block can arrive
        let cur_seed_height = seed_height(miner_data.height);
        let prev_seed_height = cur_seed_height.saturating_sub(SEED_EPOCH_BLOCKS);
        let prev = self.fetch_header_retrying(prev_seed_height).await;
        self.hasher.set_old_seed(prev.id);
        let cur = self.fetch_header_retrying(cur_seed_height).await;
        self.hasher.set_seed(cur.id);
        {
            let mut mc = self.mainchain.write();
            mc.ingest_header(prev);
            mc.ingest_header(cur);
        }

        // 6. fill the median-timestamp window and pruning baseline
        let start = miner_data.height.saturating_sub(BLOCK_HEADERS_REQUIRED);
        let end = miner_data.height.saturating_sub(1);
        let expected = end - start + 1;
        let headers = loop {
            match self.rpc.get_block_headers_range(start, end).await {
                Ok(headers) if headers.len() as u64 >= expected => break headers,
                Ok(headers) => {
                    return Err(Error::rpc_schema(
                        "get_block_headers_range",
                        format!("got {} headers, need {}", headers.len(), expected),
                    ));
                }
                Err(e) => {
                    warn!("header download failed: {}, trying again in 1 second", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        };
        {
            let mut mc = self.mainchain.write();
            for h in headers {
                mc.ingest_header(h);
            }
        }

        self.handle_miner_data(miner_data).await;
        self.booted.store(true, Ordering::Release);
        info!("startup complete, servers may attach");
        Ok(())
    }

    async fn fetch_header_retrying(&self, height: u64) -> MainChainHeader {
        loop {
            match self.rpc.get_block_header_by_height(height).await {
                Ok(h) => return h,
                Err(e) => {
                    warn!(
                        "couldn't download block header for height {}: {}, retrying",
                        height, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    // ---- event handlers ----------------------------------------------

    async fn handle_miner_data(&self, mut data: MinerData) {
        self.mempool
            .lock()
            .swap(std::mem::take(&mut data.tx_backlog));
        {
            let mut mc = self.mainchain.write();
            mc.note_miner_data(data.height, data.prev_id, data.difficulty);
            mc.prune(data.height);
        }
        self.hasher.set_seed(data.seed_hash);

        info!(
            "new miner data: height = {}, prev_id = {}, difficulty = {}, median_weight = {}",
            data.height, data.prev_id, data.difficulty, data.median_weight
        );
        let height = data.height;
        *self.miner_data.lock() = data;

        self.update_template().await;

        if self.booted.load(Ordering::Acquire) {
            let missing = self.mainchain.read().missing_heights(height);
            for h in missing {
                warn!(
                    "main-chain header for height {} is missing, re-requesting",
                    h
                );
                let rpc = self.rpc.clone();
                let mainchain = Arc::clone(&self.mainchain);
                self.spawn_job(tokio::spawn(async move {
                    match rpc.get_block_header_by_height(h).await {
                        Ok(header) => mainchain.write().ingest_header(header),
                        Err(e) => warn!("couldn't re-download header {}: {}", h, e),
                    }
                }));
            }
        }
    }

    async fn handle_chain_main(&self, event: ChainMainEvent) {
        {
            let mut mc = self.mainchain.write();
            mc.ingest_header(MainChainHeader {
                height: event.height,
                id: Hash::ZERO,
                difficulty: Difficulty::ZERO,
                timestamp: event.timestamp,
                reward: event.reward,
            });
        }
        let header = self
            .mainchain
            .read()
            .by_height(event.height)
            .unwrap_or(MainChainHeader {
                height: event.height,
                id: Hash::ZERO,
                difficulty: Difficulty::ZERO,
                timestamp: event.timestamp,
                reward: event.reward,
            });

        info!(
            "new main chain block: height = {}, id = {}, reward = {}",
            header.height,
            header.id,
            crate::utils::format_amount(header.reward)
        );

        // a merge-mined side-chain id sits at the tail of the miner tx extra
        if let Some(side_id) = event
            .miner_tx_extra
            .as_deref()
            .filter(|extra| extra.len() >= 64)
            .and_then(|extra| Hash::from_hex(&extra[extra.len() - 64..]).ok())
        {
            if self.sidechain.read().has_block(&side_id) {
                self.block_found(header).await;
            } else {
                self.sidechain
                    .write()
                    .watch_main_chain_block(header, side_id);
            }
        }

        self.api_update_network_stats();
    }

    fn handle_txpool(&self, txs: Vec<TxEntry>) {
        let mut pool = self.mempool.lock();
        for tx in txs {
            if pool.add(tx) {
                debug!(
                    "new tx id = {}, weight = {}, fee = {}",
                    tx.id, tx.weight, tx.fee
                );
            }
        }
    }

    // ---- template / shares -------------------------------------------

    async fn update_template(&self) {
        let median_timestamp = self.mainchain.read().median_timestamp();

        let snapshot = {
            let side = self.sidechain.read();
            let wallet = self.config.wallet;
            let tip = side.tip();
            let uncles = side.uncle_candidates();
            let difficulty = side.next_difficulty(tip.as_ref());
            let height = side.tip_height().map(|h| h + 1).unwrap_or(0);

            let mut cumulative_difficulty = difficulty;
            if let Some(t) = &tip {
                if let Some(b) = side.get(t) {
                    cumulative_difficulty += b.side.cumulative_difficulty;
                }
            }
            for u in &uncles {
                if let Some(b) = side.get(u) {
                    cumulative_difficulty += b.side.difficulty;
                }
            }
            let entries = side
                .payout_entries(
                    &tip.unwrap_or(Hash::ZERO),
                    &uncles,
                    (wallet.spend_pub, wallet.view_pub),
                )
                .unwrap_or_default();

            SideChainSnapshot {
                tip: tip.unwrap_or(Hash::ZERO),
                height,
                difficulty,
                cumulative_difficulty,
                uncles,
                entries,
            }
        };

        let data = self.miner_data.lock().clone();
        let txs = self.mempool.lock().collect();
        let job = {
            let mut template = self.template.lock();
            let id = template.update(&data, &txs, &snapshot, median_timestamp);
            template.get_hashing_blob(id, 0)
        };
        if let Some(job) = job {
            self.stratum.on_template(job).await;
        }
        self.api_update_pool_stats();
    }

    /// Verify and route a share from a Stratum worker.
    pub async fn submit_share(
        &self,
        template_id: u32,
        nonce: u32,
        extra_nonce: u32,
    ) -> SubmitOutcome {
        let outcome =
            self.template
                .lock()
                .submit_share(template_id, nonce, extra_nonce, &*self.hasher);

        if let SubmitOutcome::Accepted {
            block,
            pow_hash,
            main_chain_hit,
        } = &outcome
        {
            debug!(
                "share accepted: template = {}, nonce = {}, extra_nonce = {}",
                template_id, nonce, extra_nonce
            );
            if *main_chain_hit {
                info!(
                    "submit_block: height = {}, template id = {}, nonce = {}, extra_nonce = {}",
                    block.main_height(),
                    template_id,
                    nonce,
                    extra_nonce
                );
                let _ = self.notify_tx.try_send(Notification::SubmitBlock {
                    template_id,
                    nonce,
                    extra_nonce,
                });
            }

            let blob = block.serialize().bytes;
            let result = self.sidechain.write().ingest((**block).clone(), *pow_hash);
            self.peers.broadcast(blob).await;
            self.process_ingest_result(result).await;
        }
        outcome
    }

    /// Validate and route a side-chain block gossiped by a peer.
    ///
    /// Returns `Some(reason)` when the peer should be banned.
    pub async fn ingest_pool_block(&self, blob: &[u8]) -> Option<&'static str> {
        let block = match PoolBlock::parse(blob) {
            Ok(b) => b,
            Err(e) => {
                warn!("unparseable pool block from peer: {}", e);
                return Some("malformed block");
            }
        };

        let seed = self.mainchain.read().seed_hash(block.main_height());
        let Some(seed) = seed else {
            // seed epoch not cached yet; transient, no ban
            warn!(
                "no seed header for main height {}, dropping block {}",
                block.main_height(),
                block.side.id
            );
            return None;
        };
        let Some(pow_hash) = self.hasher.calculate(&block.hashing_blob().bytes, &seed) else {
            warn!("PoW dataset not ready for seed {}", seed);
            return None;
        };

        let result = self.sidechain.write().ingest(block, pow_hash);
        let ban = match &result.outcome {
            Some(AcceptOutcome::Invalid(reason)) if reason.bans_peer() => {
                Some("consensus violation")
            }
            _ => None,
        };
        self.process_ingest_result(result).await;
        ban
    }

    async fn process_ingest_result(&self, result: IngestResult) {
        for id in result.request {
            self.peers.request_block(id).await;
        }
        for header in result.found {
            self.block_found(header).await;
        }
        if result.tip_changed {
            self.update_template_async();
        }
    }

    // ---- found blocks ------------------------------------------------

    async fn block_found(&self, header: MainChainHeader) {
        info!(
            "BLOCK FOUND: main chain block at height {} was mined by this pool",
            header.height
        );

        self.sidechain.write().clear_caches();
        self.template.lock().clear_caches();

        let difficulty = self
            .mainchain
            .read()
            .difficulty_at(header.height)
            .unwrap_or(header.difficulty);
        let total_hashes = self.sidechain.read().total_hashes();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let found = FoundBlock {
            timestamp: now,
            height: header.height,
            id: header.id,
            difficulty,
            total_hashes,
        };
        if let Err(e) = self.found_blocks.lock().append(found) {
            error!("couldn't persist found block: {}", e);
        }
        self.api_update_block_found();
    }

    // ---- upstream submission -----------------------------------------

    async fn submit_template_upstream(&self, template_id: u32, nonce: u32, extra_nonce: u32) {
        let Some(blob) = self
            .template
            .lock()
            .block_blob(template_id, nonce, extra_nonce)
        else {
            error!(
                "submit_block: couldn't find block template with id {}",
                template_id
            );
            return;
        };
        self.submit_blob_upstream(blob, false);
    }

    fn submit_blob_upstream(&self, blob: Vec<u8>, external: bool) {
        let rpc = self.rpc.clone();
        let stopped = Arc::clone(&self.stopped);
        let height = self.miner_data.lock().height;
        self.spawn_job(tokio::spawn(async move {
            if stopped.load(Ordering::Acquire) {
                return;
            }
            match rpc.submit_block(&hex::encode(&blob)).await {
                Ok(status) if status == "OK" => {
                    info!("submit_block: BLOCK ACCEPTED at height {}", height);
                }
                Ok(status) => {
                    warn!("submit_block: daemon replied with status {:?}", status);
                }
                Err(e) if external => {
                    warn!("submit_block (external blob) failed: {}", e);
                }
                Err(e) => {
                    error!("submit_block failed: {}", e);
                }
            }
        }));
    }

    // ---- status files ------------------------------------------------

    fn main_tip_header(&self) -> MainChainHeader {
        let prev_id = self.miner_data.lock().prev_id;
        self.mainchain.read().by_id(&prev_id).unwrap_or_default()
    }

    fn api_update_network_stats(&self) {
        let Some(api) = &self.api else { return };
        let tip = self.main_tip_header();
        if let Err(e) = api.set_network_stats(&NetworkStats {
            difficulty: tip.difficulty,
            hash: tip.id,
            height: tip.height,
            reward: tip.reward,
            timestamp: tip.timestamp,
        }) {
            warn!("couldn't write network stats: {}", e);
        }
        self.api_update_stats_mod();
    }

    fn pool_hashrate(&self) -> u64 {
        let side = self.sidechain.read();
        let block_time = side.params().block_time.max(1);
        (side.current_difficulty().0 / block_time as u128) as u64
    }

    fn api_update_pool_stats(&self) {
        let Some(api) = &self.api else { return };

        let (miners, total_hashes) = {
            let side = self.sidechain.read();
            (side.miner_count(), side.total_hashes())
        };
        let miners = miners.max(self.peers.peer_count()) as u64;

        let (last_time, last_height, total_found) = {
            let log = self.found_blocks.lock();
            match log.last() {
                Some(b) => (b.timestamp, b.height, log.len() as u64),
                None => (0, 0, 0),
            }
        };

        if let Err(e) = api.set_pool_stats(&PoolStats {
            pool_list: vec!["pplns"],
            pool_statistics: PoolStatistics {
                hash_rate: self.pool_hashrate(),
                miners,
                total_hashes,
                last_block_found_time: last_time,
                last_block_found: last_height,
                total_blocks_found: total_found,
            },
        }) {
            warn!("couldn't write pool stats: {}", e);
        }
        self.api_update_stats_mod();
    }

    fn api_update_stats_mod(&self) {
        let Some(api) = &self.api else { return };

        let tip = self.main_tip_header();
        let (last_time, last_height, last_hash, last_total) = {
            let log = self.found_blocks.lock();
            match log.last() {
                Some(b) => (b.timestamp, b.height, b.id, b.total_hashes),
                None => (0, 0, Hash::ZERO, Difficulty::ZERO),
            }
        };

        let (miners, total_hashes) = {
            let side = self.sidechain.read();
            (side.miner_count(), side.total_hashes())
        };
        let round_hashes = total_hashes.saturating_sub(last_total).0 as u64;

        let stats = StatsMod {
            config: StatsModConfig {
                ports: vec![StatsModPort {
                    port: self.config.stratum_port(),
                    tls: false,
                }],
                fee: 0,
                min_payment_threshold: 400_000_000,
            },
            network: StatsModNetwork { height: tip.height },
            pool: StatsModPool {
                stats: StatsModPoolStats {
                    last_block_found: format!("{}000", last_time),
                },
                blocks: vec![
                    format!("{}:{}", abbreviated_hash(&last_hash), last_time),
                    format!("{}", last_height),
                ],
                miners: miners.max(self.peers.peer_count()) as u64,
                hashrate: self.pool_hashrate(),
                round_hashes,
            },
        };
        if let Err(e) = api.set_stats_mod(&stats) {
            warn!("couldn't write stats_mod: {}", e);
        }
    }

    fn api_update_block_found(&self) {
        let Some(api) = &self.api else { return };
        let records: Vec<FoundBlockRecord> = self
            .found_blocks
            .lock()
            .recent(API_BLOCKS_LIMIT)
            .into_iter()
            .map(|b| FoundBlockRecord {
                height: b.height,
                hash: b.id,
                difficulty: b.difficulty,
                total_hashes: b.total_hashes,
                ts: b.timestamp,
            })
            .collect();
        if let Err(e) = api.set_pool_blocks(&records) {
            warn!("couldn't write pool blocks: {}", e);
        }
        self.api_update_stats_mod();
    }

    // ---- event loop --------------------------------------------------

    // Signal listeners are not tracked as background jobs; they live for
    // the whole process and die with the runtime.
    fn install_signal_handlers(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            for kind in [
                SignalKind::hangup(),
                SignalKind::interrupt(),
                SignalKind::terminate(),
            ] {
                let notify = self.notify_tx.clone();
                tokio::spawn(async move {
                    let Ok(mut stream) = signal(kind) else {
                        error!("failed to install signal handler");
                        return;
                    };
                    if stream.recv().await.is_some() {
                        info!("caught signal, stopping");
                        let _ = notify.try_send(Notification::Stop);
                    }
                });
            }
            tokio::spawn(async {
                let Ok(mut stream) = signal(SignalKind::user_defined1()) else {
                    return;
                };
                while stream.recv().await.is_some() {
                    crate::utils::reopen_log();
                }
            });
        }
        #[cfg(not(unix))]
        {
            let notify = self.notify_tx.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("caught ctrl-c, stopping");
                    let _ = notify.try_send(Notification::Stop);
                }
            });
        }
    }

    async fn handle_notification(&self, note: Notification) -> bool {
        match note {
            Notification::UpdateTemplate => {
                self.update_template().await;
                true
            }
            Notification::SubmitBlock {
                template_id,
                nonce,
                extra_nonce,
            } => {
                self.submit_template_upstream(template_id, nonce, extra_nonce)
                    .await;
                true
            }
            Notification::SubmitBlob(blob) => {
                self.submit_blob_upstream(blob, true);
                true
            }
            Notification::Stop => false,
        }
    }

    /// Boot against the node, then run the event loop until a stop signal.
    pub async fn run(&self) -> Result<()> {
        self.install_signal_handlers();
        self.startup().await?;

        // 7. servers are attached by the embedder; load persisted state
        *self.found_blocks.lock() = FoundBlockLog::load(FOUND_BLOCKS_FILE);
        self.api_update_block_found();
        self.api_update_network_stats();

        let mut rx = self
            .notify_rx
            .lock()
            .take()
            .ok_or_else(|| Error::other("daemon", "run called twice"))?;
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let mut zmq_last_active = Instant::now();

        loop {
            tokio::select! {
                event = self.events.pop() => {
                    zmq_last_active = Instant::now();
                    match event {
                        NodeEvent::ChainMain(ev) => self.handle_chain_main(ev).await,
                        NodeEvent::MinerData(data) => self.handle_miner_data(*data).await,
                        NodeEvent::TxPoolAdd(txs) => self.handle_txpool(txs),
                    }
                }
                note = rx.recv() => {
                    match note {
                        Some(note) => {
                            if !self.handle_notification(note).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    if zmq_last_active.elapsed() > ZMQ_TIMEOUT {
                        warn!("no ZMQ messages for {:?}, polling miner data", ZMQ_TIMEOUT);
                        zmq_last_active = Instant::now();
                        match self.rpc.get_miner_data().await {
                            Ok(data) => self.handle_miner_data(data).await,
                            Err(e) => warn!("miner data poll failed: {}", e),
                        }
                    }
                    let dropped = self.sidechain.write().expire_orphans(ORPHAN_MAX_AGE);
                    if dropped > 0 {
                        debug!("expired {} stale orphans", dropped);
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        info!("stopping");
        self.stopped.store(true, Ordering::Release);

        let jobs: Vec<JoinHandle<()>> = std::mem::take(&mut *self.jobs.lock());
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for mut job in jobs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut job).await.is_err() {
                warn!("background job did not finish in time, aborting it");
                job.abort();
            }
        }
        info!("stopped");
    }
}
