// Node Service
// Main orchestrator tying all components together: one tick processor
// thread, N request workers, the transport, and the snapshot timer.

use crate::config::NodeConfig;
use crate::snapshot::{
    load_contract, load_spectrum, load_system, load_universe, save_requested,
};
use crate::transport::{ConnectionRegistry, Transport};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_consensus::{
    current_tick_info, run_tick_iteration, ConstantScorer, NodeParams, NodeState, ScoreOracle,
};
use tessera_contracts::ContractRegistry;
use tessera_core::{
    Frame, MessageType, RequestQuorumTick, RequestTickData, TickTime, NUMBER_OF_COMPUTORS,
    REQUEST_QUEUE_LENGTH, SYSTEM_DATA_SAVING_PERIOD_MS, TICK_REQUESTING_PERIOD_MS,
};
use tessera_network::{DejavuFilter, Dispatcher, FrameQueue, Outbound, PeerBook};
use tokio::time;
use tracing::{error, info};

fn wall_clock_start() -> TickTime {
    use chrono::{Datelike, Timelike, Utc};
    let now = Utc::now();
    TickTime {
        millisecond: 0,
        second: now.second() as u8,
        minute: now.minute() as u8,
        hour: now.hour() as u8,
        day: now.day() as u8,
        month: now.month() as u8,
        year: (now.year() - 2000).clamp(0, 255) as u8,
    }
}

/// Resume from the latest snapshots of the configured epoch, if any. Sizing
/// mismatches skip the restore; snapshots are recovery aids, not truth.
fn restore_from_snapshots(state: &NodeState, config: &NodeConfig) {
    use tessera_state::{Spectrum, Universe};

    let epoch = config.epoch;
    match load_system(&config.data_dir, epoch) {
        Ok(system) if system.epoch == epoch => {
            info!(tick = system.tick, "system snapshot restored");
            *state.solution_publication_ticks.lock().unwrap() = vec![0; system.solutions.len()];
            *state.system.lock().unwrap() = system;
        }
        _ => return,
    }

    if let Ok(entities) = load_spectrum(&config.data_dir, epoch) {
        if entities.len() == state.params.spectrum_capacity {
            *state.spectrum.lock().unwrap() =
                Spectrum::from_entities(state.params.spectrum_capacity, entities);
            info!("spectrum snapshot restored");
        }
    }
    if let Ok(assets) = load_universe(&config.data_dir, epoch) {
        if assets.len() == state.params.assets_capacity {
            *state.universe.lock().unwrap() =
                Universe::from_assets(state.params.assets_capacity, assets);
            info!("universe snapshot restored");
        }
    }
    {
        let mut computer = state.computer.lock().unwrap();
        for contract_index in 0..computer.contract_count() {
            if let Ok(blob) = load_contract(&config.data_dir, contract_index, epoch) {
                if blob.len() == computer.state(contract_index).len() {
                    computer.restore_state(contract_index, blob);
                }
            }
        }
    }

    let (tick, initial_tick) = {
        let system = state.system.lock().unwrap();
        (system.tick, system.initial_tick)
    };
    state.tick_log.reset(initial_tick);
    state.arena.reset(initial_tick);
    let mut quorum = state.quorum.lock().unwrap();
    quorum.etalon.tick = tick;
    quorum.etalon.time = state.system.lock().unwrap().initial_time;
}

pub struct TesseraNode {
    config: NodeConfig,
    state: Arc<NodeState>,
    registry: Arc<ConnectionRegistry>,
    request_queue: Arc<FrameQueue>,
    peers: Arc<PeerBook>,
    dejavu: Arc<Mutex<DejavuFilter>>,
    scorer: Arc<dyn ScoreOracle>,
}

impl TesseraNode {
    pub fn new(config: NodeConfig) -> Result<Self, String> {
        config.validate()?;

        let params: NodeParams = config.node_params();
        let state = Arc::new(NodeState::new(
            params,
            ContractRegistry::minimal(),
            config.identities()?,
            config.main,
            config.operator_public_key()?,
            config.arbitrator_public_key()?,
            config.epoch,
            config.initial_tick,
            wall_clock_start(),
        ));

        restore_from_snapshots(&state, &config);

        info!(
            epoch = config.epoch,
            initial_tick = config.initial_tick,
            identities = state.identities.len(),
            main = config.main,
            "node state initialized"
        );

        Ok(TesseraNode {
            registry: Arc::new(ConnectionRegistry::new()),
            request_queue: Arc::new(FrameQueue::new(REQUEST_QUEUE_LENGTH, 1 << 28)),
            peers: Arc::new(PeerBook::new(config.static_peers)),
            dejavu: Arc::new(Mutex::new(DejavuFilter::with_defaults(config.dejavu_bits_log2))),
            // The proof-of-useful-work scorer is an external oracle;
            // without one attached, no solution clears the threshold.
            scorer: Arc::new(ConstantScorer(0)),
            state,
            config,
        })
    }

    pub fn state(&self) -> Arc<NodeState> {
        Arc::clone(&self.state)
    }

    /// Start every worker and block until shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.spawn_tick_processor();
        self.spawn_request_workers();
        self.spawn_tick_requester();

        let transport = Arc::new(Transport {
            state: Arc::clone(&self.state),
            registry: Arc::clone(&self.registry),
            request_queue: Arc::clone(&self.request_queue),
            dejavu: Arc::clone(&self.dejavu),
            peers: Arc::clone(&self.peers),
        });
        let port = self.config.port;
        let bootstrap = self.config.bootstrap_peers();
        tokio::spawn(async move {
            if let Err(error) = transport.run(port, bootstrap).await {
                error!(%error, "transport failed");
            }
        });

        self.spawn_snapshot_timer();
        self.spawn_status_logger();

        // Block until the operator or a signal asks us to stop.
        let state = Arc::clone(&self.state);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                state.shutdown.store(true, Ordering::Relaxed);
            }
            _ = async {
                while !state.shutdown.load(Ordering::Relaxed) {
                    time::sleep(Duration::from_millis(250)).await;
                }
            } => {}
        }

        // Final snapshot on the way out.
        self.state.save_flags.request_all();
        save_requested(&self.state, &self.config.data_dir)?;
        info!("node stopped");
        Ok(())
    }

    /// The dedicated tick processor thread: runs the quorum engine until
    /// shutdown.
    fn spawn_tick_processor(&self) {
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let scorer = Arc::clone(&self.scorer);
        std::thread::Builder::new()
            .name("tick-processor".into())
            .spawn(move || {
                while !state.shutdown.load(Ordering::Relaxed) {
                    let outcome = run_tick_iteration(&state, scorer.as_ref());
                    for frame in outcome.outbound {
                        registry.route(Outbound::Broadcast(frame));
                    }
                    if !outcome.advanced {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            })
            .expect("spawn tick processor");
    }

    /// Request workers: claim from the queue, dispatch, route the results.
    fn spawn_request_workers(&self) {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.state),
            Arc::clone(&self.peers),
            Arc::clone(&self.scorer),
        ));
        for worker_index in 0..self.config.workers {
            let state = Arc::clone(&self.state);
            let queue = Arc::clone(&self.request_queue);
            let registry = Arc::clone(&self.registry);
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::Builder::new()
                .name(format!("request-worker-{worker_index}"))
                .spawn(move || {
                    while !state.shutdown.load(Ordering::Relaxed) {
                        let queued = match queue.pop(Duration::from_millis(100)) {
                            Some(queued) => queued,
                            None => continue,
                        };
                        for outbound in dispatcher.handle(queued.peer, &queued.frame) {
                            registry.route(outbound);
                        }
                    }
                })
                .expect("spawn request worker");
        }
    }

    /// Periodically re-request whatever the quorum engine is waiting for:
    /// missing votes, next-tick data, and unresolved transactions.
    fn spawn_tick_requester(&self) {
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        std::thread::Builder::new()
            .name("tick-requester".into())
            .spawn(move || {
                while !state.shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(TICK_REQUESTING_PERIOD_MS));
                    let tick = state.current_tick();

                    let mut quorum_request = RequestQuorumTick::new(tick);
                    for index in 0..NUMBER_OF_COMPUTORS {
                        if state.tick_log.vote(tick, index as u16).is_some() {
                            quorum_request.mark_vote(index);
                        }
                    }
                    registry.route(Outbound::Broadcast(Frame::new(
                        MessageType::RequestQuorumTick,
                        0,
                        quorum_request.encode(),
                    )));

                    if !state.tick_log.has_tick_data(tick + 1) {
                        let request = RequestTickData { tick: tick + 1 };
                        registry.route(Outbound::Broadcast(Frame::new(
                            MessageType::RequestTickData,
                            0,
                            request.encode(),
                        )));
                    }

                    let missing = state.quorum.lock().unwrap().missing_transactions_request.clone();
                    if let Some(request) = missing {
                        registry.route(Outbound::Broadcast(Frame::new(
                            MessageType::RequestTickTransactions,
                            0,
                            request.encode(),
                        )));
                    }
                }
            })
            .expect("spawn tick requester");
    }

    fn spawn_snapshot_timer(&self) {
        let state = Arc::clone(&self.state);
        let data_dir = self.config.data_dir.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_millis(SYSTEM_DATA_SAVING_PERIOD_MS));
            interval.tick().await;
            loop {
                interval.tick().await;
                state.save_flags.system.store(true, Ordering::Relaxed);
                if let Err(error) = save_requested(&state, &data_dir) {
                    error!(%error, "snapshot failed");
                }
            }
        });
    }

    fn spawn_status_logger(&self) {
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let info = current_tick_info(&state);
                let quorum = state.quorum.lock().unwrap();
                info!(
                    tick = info.tick,
                    epoch = info.epoch,
                    phase = quorum.phase,
                    aligned = info.number_of_aligned_votes,
                    misaligned = info.number_of_misaligned_votes,
                    future_votes = quorum.future_tick_total_number_of_computors,
                    test_flags = quorum.test_flags,
                    peers = registry.connection_count(),
                    processed = state.stats.processed_requests.load(Ordering::Relaxed),
                    duplicates = state.stats.duplicate_requests.load(Ordering::Relaxed),
                    "status"
                );
            }
        });
    }
}
