// Node state
// The single aggregate all workers borrow: stores, logs, committee, and the
// quorum engine's runtime trace, each behind its own lock.

use crate::miners::MinerTable;
use crate::system::System;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tessera_contracts::ContractRegistry;
use tessera_core::{
    Amount, Computors, Digest, KeyPair, PublicKey, RequestTickTransactions, TickTime, TickVote,
    ASSETS_CAPACITY, MAX_NUMBER_OF_TICKS_PER_EPOCH, MAX_TRANSACTION_SIZE,
    NUMBER_OF_MINER_SOLUTION_FLAG_BITS, NUMBER_OF_TRANSACTIONS_PER_TICK, SOLUTION_THRESHOLD,
    SPECTRUM_CAPACITY, TRANSACTION_SPARSENESS,
};
use tessera_mempool::{PendingPool, TickLog, TransactionArena, FIRST_TICK_TRANSACTION_OFFSET};
use tessera_state::{Computer, Spectrum, Universe};

/// Sizing knobs. The defaults are the committee-wide constants; tests and
/// small deployments shrink them (powers of two where required).
#[derive(Clone, Debug)]
pub struct NodeParams {
    pub spectrum_capacity: usize,
    pub assets_capacity: usize,
    pub max_ticks_per_epoch: usize,
    pub arena_buffer_size: usize,
    pub solution_flag_bits: u64,
    pub solution_threshold: u32,
}

impl Default for NodeParams {
    fn default() -> Self {
        NodeParams {
            spectrum_capacity: SPECTRUM_CAPACITY,
            assets_capacity: ASSETS_CAPACITY,
            max_ticks_per_epoch: MAX_NUMBER_OF_TICKS_PER_EPOCH,
            arena_buffer_size: FIRST_TICK_TRANSACTION_OFFSET
                + MAX_NUMBER_OF_TICKS_PER_EPOCH * NUMBER_OF_TRANSACTIONS_PER_TICK
                    * MAX_TRANSACTION_SIZE
                    / TRANSACTION_SPARSENESS,
            solution_flag_bits: NUMBER_OF_MINER_SOLUTION_FLAG_BITS,
            solution_threshold: SOLUTION_THRESHOLD,
        }
    }
}

impl NodeParams {
    /// Small sizing for tests: every table shrunk to a few slots.
    pub fn small() -> Self {
        NodeParams {
            spectrum_capacity: 1 << 10,
            assets_capacity: 1 << 10,
            max_ticks_per_epoch: 64,
            arena_buffer_size: 1 << 20,
            solution_flag_bits: 1 << 16,
            solution_threshold: SOLUTION_THRESHOLD,
        }
    }
}

/// The installed committee plus this node's seats in it.
#[derive(Default)]
pub struct Committee {
    pub computors: Computors,
    pub own_indices: Vec<OwnComputorIndex>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwnComputorIndex {
    pub computor_index: u16,
    pub identity_index: usize,
}

/// Runtime state of the quorum engine for the tick in flight.
pub struct QuorumTrace {
    pub phase: u8,
    pub tick_number_of_computors: u32,
    pub tick_total_number_of_computors: u32,
    pub future_tick_total_number_of_computors: u32,
    /// `None` while unknown; `Some(Digest::ZERO)` adopts an empty tick.
    pub target_next_tick_data_digest: Option<Digest>,
    /// Divergence diagnostics, one bit per mismatch source.
    pub test_flags: u32,
    /// Operator request to advance with an empty next tick.
    pub force_next_tick: bool,
    /// The local canonical projection votes are judged against.
    pub etalon: TickVote,
    pub resource_testing_digest: u64,
    pub latest_processed_tick: u32,
    pub number_of_next_tick_transactions: usize,
    pub number_of_known_next_tick_transactions: usize,
    /// Set when next-tick transactions are missing; the transport re-requests.
    pub missing_transactions_request: Option<RequestTickTransactions>,
    pub last_tick_advance: Instant,
    pub last_tick_duration_ms: u64,
}

impl QuorumTrace {
    fn new(epoch: u16, initial_tick: u32, initial_time: TickTime) -> Self {
        QuorumTrace {
            phase: 0,
            tick_number_of_computors: 0,
            tick_total_number_of_computors: 0,
            future_tick_total_number_of_computors: 0,
            target_next_tick_data_digest: None,
            test_flags: 0,
            force_next_tick: false,
            etalon: TickVote {
                epoch,
                tick: initial_tick,
                time: initial_time,
                ..Default::default()
            },
            resource_testing_digest: 0,
            latest_processed_tick: 0,
            number_of_next_tick_transactions: 0,
            number_of_known_next_tick_transactions: 0,
            missing_transactions_request: None,
            last_tick_advance: Instant::now(),
            last_tick_duration_ms: 0,
        }
    }
}

/// Flags for the persistence layer; the epoch controller and the periodic
/// saver set them, the snapshot writer clears them.
#[derive(Default)]
pub struct SaveFlags {
    pub system: AtomicBool,
    pub spectrum: AtomicBool,
    pub universe: AtomicBool,
    pub computer: AtomicBool,
}

impl SaveFlags {
    pub fn request_all(&self) {
        self.system.store(true, Ordering::Relaxed);
        self.spectrum.store(true, Ordering::Relaxed);
        self.universe.store(true, Ordering::Relaxed);
        self.computer.store(true, Ordering::Relaxed);
    }
}

/// Dispatcher and processor counters, surfaced in the status log line.
#[derive(Default)]
pub struct Stats {
    pub processed_requests: AtomicU64,
    pub discarded_requests: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub disseminated_requests: AtomicU64,
    pub number_of_transactions: AtomicU64,
}

/// The aggregate every worker borrows from the single root.
pub struct NodeState {
    pub params: NodeParams,
    /// Computor identities this node controls.
    pub identities: Vec<KeyPair>,
    /// Only the main instance emits votes, tick data, and solutions.
    pub is_main: bool,
    pub operator_public_key: PublicKey,
    pub arbitrator_public_key: PublicKey,
    pub registry: ContractRegistry,
    pub system: Mutex<System>,
    pub spectrum: Mutex<Spectrum>,
    pub universe: Mutex<Universe>,
    pub computer: Mutex<Computer>,
    pub tick_log: TickLog,
    pub arena: TransactionArena,
    pub pending: PendingPool,
    pub committee: Mutex<Committee>,
    pub miners: Mutex<MinerTable>,
    pub quorum: Mutex<QuorumTrace>,
    /// Parallel to `system.solutions`: 0 = unscheduled, >0 = publish at that
    /// tick, -1 = published or confirmed on-chain.
    pub solution_publication_ticks: Mutex<Vec<i64>>,
    /// Funds destroyed by contracts; part of the conservation identity.
    pub burned: Mutex<Amount>,
    pub save_flags: SaveFlags,
    pub shutdown: AtomicBool,
    pub stats: Stats,
}

impl NodeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: NodeParams,
        registry: ContractRegistry,
        identities: Vec<KeyPair>,
        is_main: bool,
        operator_public_key: PublicKey,
        arbitrator_public_key: PublicKey,
        epoch: u16,
        initial_tick: u32,
        initial_time: TickTime,
    ) -> Self {
        let computer = Computer::new(&registry.state_sizes());
        NodeState {
            spectrum: Mutex::new(Spectrum::new(params.spectrum_capacity)),
            universe: Mutex::new(Universe::new(params.assets_capacity)),
            computer: Mutex::new(computer),
            tick_log: TickLog::new(initial_tick, params.max_ticks_per_epoch),
            arena: TransactionArena::new(
                initial_tick,
                params.max_ticks_per_epoch,
                params.arena_buffer_size,
            ),
            pending: PendingPool::new(params.spectrum_capacity),
            committee: Mutex::new(Committee::default()),
            miners: Mutex::new(MinerTable::new(params.solution_flag_bits)),
            quorum: Mutex::new(QuorumTrace::new(epoch, initial_tick, initial_time)),
            solution_publication_ticks: Mutex::new(Vec::new()),
            burned: Mutex::new(0),
            save_flags: SaveFlags::default(),
            shutdown: AtomicBool::new(false),
            stats: Stats::default(),
            system: Mutex::new(System::new(epoch, initial_tick, initial_time)),
            registry,
            identities,
            is_main,
            operator_public_key,
            arbitrator_public_key,
            params,
        }
    }

    pub fn current_tick(&self) -> u32 {
        self.system.lock().unwrap().tick
    }

    pub fn current_epoch(&self) -> u16 {
        self.system.lock().unwrap().epoch
    }

    /// Install an arbitrator-signed committee. When it is for the running
    /// epoch, this node's seats are re-derived and the miner table reseeded
    /// with the committee keys.
    pub fn install_committee(&self, computors: Computors) {
        let epoch = self.current_epoch();
        let mut committee = self.committee.lock().unwrap();
        if computors.epoch == epoch {
            committee.own_indices.clear();
            for (computor_index, public_key) in computors.public_keys.iter().enumerate() {
                for (identity_index, identity) in self.identities.iter().enumerate() {
                    if identity.public_key() == *public_key {
                        committee.own_indices.push(OwnComputorIndex {
                            computor_index: computor_index as u16,
                            identity_index,
                        });
                        break;
                    }
                }
            }
            self.miners
                .lock()
                .unwrap()
                .seed_committee(&computors.public_keys);
        }
        committee.computors = computors;
    }

    /// Whether one of this node's identities holds the given seat.
    pub fn own_seat(&self, computor_index: u16) -> Option<usize> {
        self.committee
            .lock()
            .unwrap()
            .own_indices
            .iter()
            .find(|own| own.computor_index == computor_index)
            .map(|own| own.identity_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_identity() -> (NodeState, PublicKey) {
        let identity = KeyPair::from_seed([7u8; 32]);
        let public_key = identity.public_key();
        let state = NodeState::new(
            NodeParams::small(),
            ContractRegistry::minimal(),
            vec![identity],
            true,
            PublicKey::ZERO,
            PublicKey::from_bytes([0xEE; 32]),
            1,
            100,
            TickTime { day: 1, month: 1, year: 22, ..Default::default() },
        );
        (state, public_key)
    }

    #[test]
    fn committee_install_derives_own_seats() {
        let (state, own_pk) = state_with_identity();
        let mut computors = Computors::default();
        computors.epoch = 1;
        computors.public_keys[17] = own_pk;

        state.install_committee(computors);
        assert_eq!(state.own_seat(17), Some(0));
        assert_eq!(state.own_seat(16), None);
    }

    #[test]
    fn stale_epoch_committee_keeps_no_seats() {
        let (state, own_pk) = state_with_identity();
        let mut computors = Computors::default();
        computors.epoch = 2;
        computors.public_keys[17] = own_pk;

        state.install_committee(computors);
        assert_eq!(state.own_seat(17), None);
    }
}
