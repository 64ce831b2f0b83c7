// This file is part of SENSA.
//
// Copyright (C) 2023 Affidaty Spa.
//
// SENSA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// SENSA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with SENSA. If not, see <https://www.gnu.org/licenses/>.

//! Network worker.
//!
//! Owns every socket of the node: the RPC server, the broadcast fan-out,
//! the periodic sync cycle and the peer health probing. The chain service is
//! reached exclusively via message passing, so no network task ever holds
//! the chain-writer lock across I/O.

use super::{
    client::RpcClient,
    protocol::{self, RpcRequest, RpcResponse, StatusCode},
    service::NetConfig,
};
use crate::{
    base::{schema::Block, serialize::json_deserialize, serialize::json_serialize, RwLock},
    blockchain::{BlockRequestSender, Event, Message},
    channel::Receiver,
    peers::PeerRegistry,
    Error, ErrorKind, Result,
};
use async_std::{
    net::{TcpListener, TcpStream},
    task,
};
use futures::{select, StreamExt};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Wall-clock alignment period of the sync schedule.
const SYNC_SLOT_MS: u64 = 30_000;

/// Broadcast rate limiter: a single shared timestamp advanced by
/// compare-and-swap. Acquisitions within the cooldown window are refused.
pub(crate) struct Cooldown {
    interval: Duration,
    base: Instant,
    last: AtomicU64,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Cooldown {
            interval,
            base: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Try to pass the rate limiter.
    pub fn try_acquire(&self) -> bool {
        let now = (self.base.elapsed().as_millis() as u64).max(1);
        let interval = self.interval.as_millis() as u64;
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            if last != 0 && now.saturating_sub(last) < interval {
                return false;
            }
            match self
                .last
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(current) => last = current,
            }
        }
    }
}

/// Single-flight state of the sync cycle.
///
/// `cycle` is a generation counter: the cycle owner and its watchdog race on
/// bumping it, and only the winner releases the `syncing` flag. This way a
/// watchdog release can never free the lock out from under a newer cycle.
#[derive(Clone)]
pub(crate) struct SyncState {
    syncing: Arc<AtomicBool>,
    cycle: Arc<AtomicU64>,
}

impl SyncState {
    pub fn new() -> Self {
        SyncState {
            syncing: Arc::new(AtomicBool::new(false)),
            cycle: Arc::new(AtomicU64::new(0)),
        }
    }

    fn finish(&self, id: u64) -> bool {
        if self
            .cycle
            .compare_exchange(id, id + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.syncing.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

/// Milliseconds until the next wall-clock `:00`/`:30` boundary, so that all
/// nodes enter their sync window together.
fn millis_until_next_sync_slot() -> Duration {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    Duration::from_millis(SYNC_SLOT_MS - now_ms % SYNC_SLOT_MS)
}

/// Submit a request to the chain service and wait for the answer.
async fn request(bc_chan: &BlockRequestSender, msg: Message) -> Result<Message> {
    let rx = bc_chan
        .send(msg)
        .await
        .map_err(|_| Error::new_ext(ErrorKind::Other, "chain service unavailable"))?;
    rx.recv()
        .await
        .map_err(|_| Error::new_ext(ErrorKind::Other, "chain service unavailable"))
}

/// Submit a request expected to answer with the current chain.
async fn chain_request(bc_chan: &BlockRequestSender, msg: Message) -> Result<Vec<Block>> {
    match request(bc_chan, msg).await? {
        Message::GetChainResponse { chain } => Ok(chain),
        Message::Exception(err) => Err(err),
        other => Err(Error::new_ext(
            ErrorKind::Other,
            format!("unexpected chain response: {:?}", other),
        )),
    }
}

/// Run one sync cycle: pull the chains of every healthy peer, then hand them
/// to the chain service for validation and reconciliation.
///
/// Single-flight: re-entrant invocations return immediately. A watchdog
/// force-releases the lock after `sync_lock_timeout` so a crashed cycle can
/// not block synchronization forever; a cycle overtaken by its watchdog is
/// abandoned wholesale.
pub(crate) async fn run_sync_cycle(
    config: &Arc<NetConfig>,
    bc_chan: &BlockRequestSender,
    registry: &Arc<RwLock<PeerRegistry>>,
    client: &RpcClient,
    state: &SyncState,
) {
    if state.syncing.swap(true, Ordering::SeqCst) {
        debug!("[sync] cycle already in flight");
        return;
    }
    let id = state.cycle.fetch_add(1, Ordering::SeqCst) + 1;

    {
        let state = state.clone();
        let lock_timeout = config.sync_lock_timeout;
        task::spawn(async move {
            task::sleep(Duration::from_secs(lock_timeout)).await;
            if state.finish(id) {
                warn!("[sync] watchdog released a stuck sync lock");
            }
        });
    }

    let peers = registry.read().healthy();
    if peers.is_empty() {
        debug!("[sync] no healthy peers, chain kept");
        state.finish(id);
        return;
    }

    let timeout = Duration::from_secs(config.sync_peer_timeout);
    let pulls = peers.into_iter().map(|addr| {
        let client = client.clone();
        let registry = registry.clone();
        async move {
            let started = Instant::now();
            match client.get_chain(&addr, timeout).await {
                Ok(chain) => {
                    registry
                        .write()
                        .record_success(&addr, chain.len() as u64, started.elapsed());
                    Some(chain)
                }
                Err(err) => {
                    debug!(
                        "[sync] get-chain from {} failed: {}",
                        addr,
                        err.to_string_full()
                    );
                    registry.write().record_failure(&addr);
                    None
                }
            }
        }
    });
    let candidates: Vec<Vec<Block>> = futures::future::join_all(pulls)
        .await
        .into_iter()
        .flatten()
        .collect();

    // The watchdog may have fired while we were on the network.
    if state.cycle.load(Ordering::SeqCst) != id {
        warn!("[sync] cycle abandoned after watchdog release");
        return;
    }

    match request(bc_chan, Message::SyncRequest { candidates }).await {
        Ok(Message::SyncResponse {
            adopted: true,
            length,
        }) => info!("[sync] adopted a remote chain of length {}", length),
        Ok(Message::SyncResponse { .. }) => debug!("[sync] local chain kept"),
        Ok(other) => warn!("[sync] unexpected reconciliation response: {:?}", other),
        Err(err) => warn!("[sync] reconciliation failed: {}", err.to_string_full()),
    }
    state.finish(id);
}

/// Periodic sync schedule, aligned to the wall clock.
async fn sync_loop(
    config: Arc<NetConfig>,
    bc_chan: BlockRequestSender,
    registry: Arc<RwLock<PeerRegistry>>,
    client: RpcClient,
    state: SyncState,
    stopping: Arc<AtomicBool>,
) {
    loop {
        task::sleep(millis_until_next_sync_slot()).await;
        if stopping.load(Ordering::Relaxed) || bc_chan.is_closed() {
            break;
        }
        run_sync_cycle(&config, &bc_chan, &registry, &client, &state).await;
    }
}

/// Periodic peer probing and eviction.
async fn discovery_loop(
    config: Arc<NetConfig>,
    registry: Arc<RwLock<PeerRegistry>>,
    client: RpcClient,
    stopping: Arc<AtomicBool>,
) {
    let timeout = Duration::from_secs(config.health_timeout);
    loop {
        task::sleep(Duration::from_secs(config.discovery_interval)).await;
        if stopping.load(Ordering::Relaxed) {
            break;
        }
        let peers = registry.read().all();
        let probes = peers.into_iter().map(|addr| {
            let client = client.clone();
            let registry = registry.clone();
            async move {
                let started = Instant::now();
                match client.get_chain(&addr, timeout).await {
                    Ok(chain) => registry.write().record_success(
                        &addr,
                        chain.len() as u64,
                        started.elapsed(),
                    ),
                    Err(err) => {
                        debug!("[peers] probe of {} failed: {}", addr, err.to_string_full());
                        registry.write().record_failure(&addr);
                    }
                }
            }
        });
        futures::future::join_all(probes).await;
        registry.write().evict_stale();
    }
}

/// Push a freshly appended block to the healthy peers.
///
/// Peers whose cached chain length says they already hold the block are
/// skipped, as are peers too far behind to link it (the periodic sync will
/// catch them up). Fan-out is bounded; failures are logged, never surfaced
/// to the admission path.
async fn broadcast_block(
    config: Arc<NetConfig>,
    registry: Arc<RwLock<PeerRegistry>>,
    client: RpcClient,
    block: Block,
) {
    let targets: Vec<String> = {
        let registry = registry.read();
        registry
            .healthy()
            .into_iter()
            .filter(|addr| {
                match registry.info(addr).and_then(|peer| peer.chain_length) {
                    Some(length) if length > block.index => false,
                    Some(length) if length + 1 < block.index => false,
                    _ => true,
                }
            })
            .collect()
    };
    if targets.is_empty() {
        debug!("[net] no eligible peers for block {}", block.index);
        return;
    }
    debug!(
        "[net] broadcasting block {} to {} peer(s)",
        block.index,
        targets.len()
    );

    let timeout = Duration::from_secs(config.broadcast_timeout);
    for chunk in targets.chunks(config.max_fanout.max(1)) {
        let calls = chunk.iter().map(|addr| {
            let client = client.clone();
            let registry = registry.clone();
            let block = block.clone();
            let addr = addr.clone();
            async move {
                match client.add_block(&addr, &block, timeout).await {
                    Ok(chain) => {
                        registry.write().note_chain_length(&addr, chain.len() as u64)
                    }
                    Err(err) => {
                        if err.kind == ErrorKind::RpcTimeout {
                            registry.write().record_failure(&addr);
                        }
                        debug!(
                            "[net] broadcast to {} failed: {}",
                            addr,
                            err.to_string_full()
                        );
                    }
                }
            }
        });
        futures::future::join_all(calls).await;
    }
}

/// Serve one decoded request.
async fn serve_request(
    req: RpcRequest,
    config: &Arc<NetConfig>,
    bc_chan: &BlockRequestSender,
    registry: &Arc<RwLock<PeerRegistry>>,
    client: &RpcClient,
    state: &SyncState,
) -> RpcResponse {
    let result = match req {
        RpcRequest::GetChain => chain_request(bc_chan, Message::GetChainRequest).await,
        RpcRequest::AddBlock { block } => {
            chain_request(bc_chan, Message::AddBlockRequest { block }).await
        }
        RpcRequest::ReceiveBlock { block } => {
            let first = chain_request(
                bc_chan,
                Message::ReceiveBlockRequest {
                    block: block.clone(),
                },
            )
            .await;
            match first {
                Err(err) if err.kind == ErrorKind::InvalidSequence => {
                    // One-shot conflict merge: sync once, then retry once.
                    debug!("[net] sequence mismatch, one-shot sync before retry");
                    run_sync_cycle(config, bc_chan, registry, client, state).await;
                    chain_request(bc_chan, Message::ReceiveBlockRequest { block }).await
                }
                other => other,
            }
        }
    };
    match result {
        Ok(chain) => RpcResponse::Ok { chain },
        Err(err) => RpcResponse::Err {
            code: StatusCode::from_error(&err),
            message: err.to_string_full(),
        },
    }
}

/// Serve one authenticated connection until the peer hangs up.
pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    config: Arc<NetConfig>,
    bc_chan: BlockRequestSender,
    registry: Arc<RwLock<PeerRegistry>>,
    client: RpcClient,
    state: SyncState,
) {
    let peer_addr = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let identity = match protocol::handshake(&mut stream, &config).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(
                "[net] refusing connection from {}: {}",
                peer_addr,
                err.to_string_full()
            );
            return;
        }
    };
    if let Some(listen) = &identity.listen {
        registry.write().discover(listen);
    }
    debug!("[net] serving '{}' from {}", identity.validator, peer_addr);

    loop {
        let buf = match protocol::read_frame(&mut stream).await {
            Ok(buf) => buf,
            Err(_) => break,
        };
        let response = match json_deserialize::<RpcRequest>(&buf) {
            Ok(req) => serve_request(req, &config, &bc_chan, &registry, &client, &state).await,
            Err(err) => RpcResponse::Err {
                code: StatusCode::InvalidArgument,
                message: err.to_string_full(),
            },
        };
        let buf = match json_serialize(&response) {
            Ok(buf) => buf,
            Err(_) => break,
        };
        if protocol::write_frame(&mut stream, &buf).await.is_err() {
            break;
        }
    }
}

/// Network worker asynchronous task.
pub async fn run_async(
    config: Arc<NetConfig>,
    bc_chan: BlockRequestSender,
    registry: Arc<RwLock<PeerRegistry>>,
    stop_rx: Receiver<()>,
) {
    // Broadcast is fed by the chain block events.
    let events_rx = match bc_chan
        .send(Message::Subscribe {
            id: "net".to_owned(),
            events: Event::BLOCK,
        })
        .await
    {
        Ok(chan) => chan,
        Err(_err) => {
            error!("Starting network worker. Chain channel is closed");
            return;
        }
    };

    let listener = match TcpListener::bind(config.addr.as_str()).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Error listening on {}: {}", config.addr, err);
            return;
        }
    };
    info!("[net] listening on {}", config.addr);

    let client = RpcClient::new(config.clone());
    let state = SyncState::new();
    let stopping = Arc::new(AtomicBool::new(false));
    let cooldown = Cooldown::new(Duration::from_millis(config.broadcast_cooldown_ms));

    let sync_handle = task::spawn(sync_loop(
        config.clone(),
        bc_chan.clone(),
        registry.clone(),
        client.clone(),
        state.clone(),
        stopping.clone(),
    ));
    let probe_handle = task::spawn(discovery_loop(
        config.clone(),
        registry.clone(),
        client.clone(),
        stopping.clone(),
    ));

    let mut incoming = listener.incoming().fuse();
    let mut events = events_rx.fuse();
    let mut stop = stop_rx.fuse();

    loop {
        select! {
            conn = incoming.next() => match conn {
                Some(Ok(stream)) => {
                    task::spawn(handle_connection(
                        stream,
                        config.clone(),
                        bc_chan.clone(),
                        registry.clone(),
                        client.clone(),
                        state.clone(),
                    ));
                }
                Some(Err(err)) => warn!("[net] accept failure: {}", err),
                None => break,
            },
            event = events.next() => match event {
                Some(Message::BlockEvent { block }) => {
                    if cooldown.try_acquire() {
                        task::spawn(broadcast_block(
                            config.clone(),
                            registry.clone(),
                            client.clone(),
                            block,
                        ));
                    } else {
                        debug!("[net] broadcast of block {} suppressed by cooldown", block.index);
                    }
                }
                Some(other) => warn!("[net] unexpected chain event: {:?}", other),
                None => {
                    warn!("[net] chain channel closed, exiting");
                    break;
                }
            },
            _ = stop.next() => break,
        }
    }

    stopping.store(true, Ordering::Relaxed);
    // Drain in-flight broadcasts, then tear the periodic tasks down.
    task::sleep(Duration::from_secs(1)).await;
    sync_handle.cancel().await;
    probe_handle.cancel().await;
    debug!("[net] worker stopped");
}

/// Network worker synchronous entry point.
pub fn run(
    config: Arc<NetConfig>,
    bc_chan: BlockRequestSender,
    registry: Arc<RwLock<PeerRegistry>>,
    stop_rx: Receiver<()>,
) {
    task::block_on(run_async(config, bc_chan, registry, stop_rx));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::create_test_chain;
    use crate::blockchain::{ChainConfig, ChainService};
    use crate::crypto::{KeyPair, TrustRoster};
    use crate::db::MemoryStore;

    const CALL_TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn cooldown_suppresses_rapid_acquires() {
        let cooldown = Cooldown::new(Duration::from_millis(200));

        assert!(cooldown.try_acquire());
        assert!(!cooldown.try_acquire());
        assert!(!cooldown.try_acquire());

        std::thread::sleep(Duration::from_millis(250));
        assert!(cooldown.try_acquire());
    }

    #[test]
    fn sync_slot_is_within_the_period() {
        let wait = millis_until_next_sync_slot();

        assert!(wait > Duration::from_millis(0));
        assert!(wait <= Duration::from_millis(SYNC_SLOT_MS));
    }

    #[test]
    fn sync_state_single_flight() {
        let state = SyncState::new();

        assert!(!state.syncing.swap(true, Ordering::SeqCst));
        let id = state.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        // Second acquisition is refused while the first is in flight.
        assert!(state.syncing.swap(true, Ordering::SeqCst));

        assert!(state.finish(id));
        // The generation moved on, a stale finish is a no-op.
        assert!(!state.finish(id));
        assert!(!state.syncing.load(Ordering::SeqCst));
    }

    fn two_node_configs() -> (NetConfig, NetConfig) {
        let kp_a = KeyPair::from_random();
        let kp_b = KeyPair::from_random();
        let roster = TrustRoster::from_entries([
            ("node-a".to_owned(), kp_a.public_key().to_hex()),
            ("node-b".to_owned(), kp_b.public_key().to_hex()),
        ])
        .unwrap();

        let config_a = NetConfig::new(
            "127.0.0.1:0".to_owned(),
            "skynet".to_owned(),
            "node-a".to_owned(),
            kp_a,
            roster.clone(),
        );
        let config_b = NetConfig::new(
            "127.0.0.1:0".to_owned(),
            "skynet".to_owned(),
            "node-b".to_owned(),
            kp_b,
            roster,
        );
        (config_a, config_b)
    }

    /// Spin up a chain service and an RPC server for it on a loopback port.
    fn spawn_test_server(
        config: Arc<NetConfig>,
    ) -> (ChainService<MemoryStore>, String, Arc<RwLock<PeerRegistry>>) {
        let mut svc = ChainService::new(ChainConfig::default(), MemoryStore::new());
        svc.start();
        let bc_chan = svc.request_channel();

        let listener = task::block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let registry = Arc::new(RwLock::new(PeerRegistry::new(
            &addr,
            Vec::<String>::new(),
            Duration::from_secs(300),
        )));

        let reg = registry.clone();
        task::spawn(async move {
            let client = RpcClient::new(config.clone());
            let state = SyncState::new();
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                task::spawn(handle_connection(
                    stream,
                    config.clone(),
                    bc_chan.clone(),
                    reg.clone(),
                    client.clone(),
                    state.clone(),
                ));
            }
        });
        (svc, addr, registry)
    }

    #[test]
    fn rpc_round_trip_and_idempotence() {
        let (config_a, config_b) = two_node_configs();
        let (mut svc, addr, _registry) = spawn_test_server(Arc::new(config_b));
        let client = RpcClient::new(Arc::new(config_a));

        task::block_on(async {
            let chain = client.get_chain(&addr, CALL_TIMEOUT).await.unwrap();
            assert_eq!(chain.len(), 1);

            // AddBlock twice: both succeed, one copy stored.
            let block = create_test_chain(2)[1].clone();
            let chain = client.add_block(&addr, &block, CALL_TIMEOUT).await.unwrap();
            assert_eq!(chain.len(), 2);
            let chain = client.add_block(&addr, &block, CALL_TIMEOUT).await.unwrap();
            assert_eq!(chain.len(), 2);
            assert_eq!(chain[1], block);

            // Out of sequence push: rejected after the one-shot sync retry.
            let far = create_test_chain(5)[4].clone();
            let err = client
                .receive_block(&addr, &far, CALL_TIMEOUT)
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidSequence);
        });
        svc.stop();
    }

    #[test]
    fn unauthenticated_client_is_refused() {
        let (_config_a, config_b) = two_node_configs();
        let (mut svc, addr, _registry) = spawn_test_server(Arc::new(config_b));

        // A rogue keypair outside the roster.
        let (mut rogue, _) = two_node_configs();
        rogue.keypair = KeyPair::from_random();
        let client = RpcClient::new(Arc::new(rogue));

        task::block_on(async {
            let res = client.get_chain(&addr, Duration::from_secs(2)).await;
            assert!(res.is_err());
        });
        svc.stop();
    }

    #[test]
    fn deadline_exceeded_on_mute_peer() {
        // A listener that accepts and never answers.
        let listener = task::block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        task::spawn(async move {
            let mut held = vec![];
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (config_a, _) = two_node_configs();
        let client = RpcClient::new(Arc::new(config_a));

        task::block_on(async {
            let err = client
                .get_chain(&addr, Duration::from_millis(300))
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::RpcTimeout);
        });
    }
}
