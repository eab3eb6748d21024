// Transaction processor
// Applies one tick's transactions deterministically across the stores, runs
// the contract phase hooks, and emits this node's own commitments.

use crate::node_state::NodeState;
use crate::score::ScoreOracle;
use crate::system::Solution;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tessera_contracts::{ContractPhase, Qpi};
use tessera_core::{
    crypto, timelock_digest, Frame, MessageType, ProposalOrBallot, TickData, Transaction,
    MAX_NUMBER_OF_SOLUTIONS, MIN_MINING_SOLUTIONS_PUBLICATION_OFFSET, NUMBER_OF_COMPUTORS,
    NUMBER_OF_TRANSACTIONS_PER_TICK, TICK_TRANSACTIONS_PUBLICATION_OFFSET,
};
use tessera_state::Ipo;
use tracing::debug;

/// Record a solution and keep the publication schedule aligned. Returns the
/// solution's index when it fits.
pub fn admit_solution(state: &NodeState, solution: Solution, publication_tick: i64) -> Option<usize> {
    let mut system = state.system.lock().unwrap();
    let mut publications = state.solution_publication_ticks.lock().unwrap();
    let (index, added) = system.admit_solution(solution, MAX_NUMBER_OF_SOLUTIONS);
    if let Some(index) = index {
        if added {
            publications.push(publication_tick);
        } else {
            publications[index] = publication_tick;
        }
    }
    index
}

/// Process the current tick: seed the etalon with the pre-tick digests, run
/// the contract hooks around the transaction loop, fold the post-tick
/// digests back into the etalon, and emit own tick data and due solutions.
pub fn process_tick(state: &NodeState, scorer: &dyn ScoreOracle) -> Vec<Frame> {
    let (tick, epoch, initial_tick) = {
        let system = state.system.lock().unwrap();
        (system.tick, system.epoch, system.initial_tick)
    };

    {
        let mut quorum = state.quorum.lock().unwrap();
        if quorum.phase < 1 {
            quorum.phase = 1;
        }
        quorum.etalon.computor_index = 0;
        quorum.etalon.epoch = epoch;
        quorum.etalon.tick = tick;
        quorum.etalon.prev_resource_testing_digest = quorum.resource_testing_digest;
        quorum.etalon.prev_spectrum_digest = state.spectrum.lock().unwrap().digest();
        quorum.etalon.prev_universe_digest = state.universe.lock().unwrap().digest();
        quorum.etalon.prev_computer_digest = state.computer.lock().unwrap().digest();
    }

    if tick == initial_tick {
        run_contract_phase(state, ContractPhase::Initialize, epoch, tick);
        run_contract_phase(state, ContractPhase::BeginEpoch, epoch, tick);
    }
    run_contract_phase(state, ContractPhase::BeginTick, epoch, tick);

    let tick_data = state.tick_log.tick_data(tick).filter(|data| data.epoch == epoch);
    if let Some(data) = tick_data {
        apply_transactions(state, scorer, &data, tick, epoch);
    }

    run_contract_phase(state, ContractPhase::EndTick, epoch, tick);

    {
        let mut quorum = state.quorum.lock().unwrap();
        let mut spectrum = state.spectrum.lock().unwrap();
        spectrum.refresh_changes_for_tick(tick);
        quorum.etalon.salted_spectrum_digest = spectrum.digest();
        drop(spectrum);
        quorum.etalon.salted_universe_digest = state.universe.lock().unwrap().digest();
        quorum.etalon.salted_computer_digest = state.computer.lock().unwrap().digest();
        quorum.etalon.salted_resource_testing_digest = quorum.resource_testing_digest;
    }

    let mut outbound = Vec::new();
    outbound.extend(emit_own_tick_data(state, tick, epoch));
    outbound.extend(publish_due_solutions(state, tick));
    outbound
}

/// Run one lifecycle hook over every live contract, in registry order.
fn run_contract_phase(state: &NodeState, phase: ContractPhase, epoch: u16, tick: u32) {
    let order = state.registry.phase_order(phase, epoch);
    if order.is_empty() {
        return;
    }
    let time = state.quorum.lock().unwrap().etalon.time;
    let committee_keys = state.committee.lock().unwrap().computors.public_keys.clone();
    let mut spectrum = state.spectrum.lock().unwrap();
    let mut universe = state.universe.lock().unwrap();
    let mut computer = state.computer.lock().unwrap();
    let mut burned = state.burned.lock().unwrap();
    for contract_index in order {
        let procedure = match state.registry.system_procedure(contract_index, phase) {
            Some(procedure) => procedure,
            None => continue,
        };
        let contract_id = tessera_core::PublicKey::for_contract(contract_index as u32);
        let mut qpi = Qpi::new(
            &mut spectrum,
            &mut universe,
            contract_index as u32,
            contract_id,
            contract_id,
            0,
            tick,
            epoch,
            time,
            state.arbitrator_public_key,
            &committee_keys,
            &mut burned,
        );
        procedure(&mut qpi, computer.state_mut(contract_index));
    }
}

/// The per-tick transaction loop, in proposer-declared order.
fn apply_transactions(state: &NodeState, scorer: &dyn ScoreOracle, data: &TickData, tick: u32, epoch: u16) {
    let mut spent_sources: HashSet<usize> = HashSet::new();
    for slot in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
        if data.transaction_digests[slot].is_zero() {
            continue;
        }
        let transaction = match state.arena.get(tick, slot) {
            Some(transaction) => transaction,
            // The quorum engine only lets a tick through once every
            // referenced transaction is known; a hole here means the node
            // state is beyond repair.
            None => panic!("CRITICAL SITUATION: transaction {slot} of tick {tick} missing"),
        };

        let source_index = {
            let spectrum = state.spectrum.lock().unwrap();
            spectrum.index_of(&transaction.source_public_key)
        };
        let source_index = match source_index {
            Some(index) if !spent_sources.contains(&index) => index,
            _ => continue,
        };
        spent_sources.insert(source_index);
        state.stats.number_of_transactions.fetch_add(1, Ordering::Relaxed);

        {
            let mut spectrum = state.spectrum.lock().unwrap();
            if spectrum.debit(source_index, transaction.amount, tick) {
                let destination = transaction.destination_public_key;
                spectrum.credit(&destination, transaction.amount, tick);
            }
        }

        if transaction.destination_public_key.is_zero() {
            continue;
        }
        if let Some(contract_index) = transaction.destination_public_key.contract_index() {
            let contract_index = contract_index as usize;
            if contract_index < state.registry.contract_count() {
                if state.registry.in_ipo(contract_index, epoch) {
                    apply_ipo_bid(state, &transaction, source_index, contract_index, tick);
                } else {
                    invoke_user_procedure(state, &transaction, contract_index, epoch, tick);
                }
                continue;
            }
        }
        if transaction.destination_public_key == state.arbitrator_public_key {
            apply_solution_submission(state, scorer, &transaction, tick);
        }
    }
}

fn add_release(releases: &mut Vec<(tessera_core::PublicKey, i64)>, public_key: tessera_core::PublicKey, amount: i64) {
    for (existing, total) in releases.iter_mut() {
        if *existing == public_key {
            *total += amount;
            return;
        }
    }
    releases.push((public_key, amount));
}

/// Bid on the shares of a contract below its construction epoch.
fn apply_ipo_bid(
    state: &NodeState,
    transaction: &Transaction,
    source_index: usize,
    contract_index: usize,
    tick: u32,
) {
    let bid = match transaction.ipo_bid() {
        Some(bid) if bid.is_valid() => bid,
        _ => return,
    };
    let total = bid.price * bid.quantity as i64;

    let mut spectrum = state.spectrum.lock().unwrap();
    if !spectrum.debit(source_index, total, tick) {
        return;
    }

    let mut computer = state.computer.lock().unwrap();
    let mut ipo = Ipo::load(computer.state(contract_index));
    let mut releases: Vec<(tessera_core::PublicKey, i64)> = Vec::new();
    let mut book_changed = false;
    for _ in 0..bid.quantity {
        match ipo.insert_bid(transaction.source_public_key, bid.price) {
            tessera_state::BidOutcome::Rejected => {
                add_release(&mut releases, transaction.source_public_key, bid.price);
            }
            tessera_state::BidOutcome::Inserted { displaced_bidder, displaced_price } => {
                add_release(&mut releases, displaced_bidder, displaced_price);
                book_changed = true;
            }
        }
    }
    if book_changed {
        ipo.store(computer.state_mut(contract_index));
    }
    drop(computer);

    for (public_key, amount) in releases {
        spectrum.credit(&public_key, amount, tick);
    }
}

/// Dispatch into the destination contract's procedure table.
fn invoke_user_procedure(
    state: &NodeState,
    transaction: &Transaction,
    contract_index: usize,
    epoch: u16,
    tick: u32,
) {
    let registered = match state.registry.user_procedure(contract_index, transaction.input_type) {
        Some(registered) => registered,
        None => return,
    };
    // Inputs land in a zeroed scratch buffer of the registered size; short
    // inputs stay zero-padded, long ones are truncated.
    let mut input = vec![0u8; registered.input_size as usize];
    let copied = transaction.input.len().min(input.len());
    input[..copied].copy_from_slice(&transaction.input[..copied]);

    let time = state.quorum.lock().unwrap().etalon.time;
    let committee_keys = state.committee.lock().unwrap().computors.public_keys.clone();
    let mut spectrum = state.spectrum.lock().unwrap();
    let mut universe = state.universe.lock().unwrap();
    let mut computer = state.computer.lock().unwrap();
    let mut burned = state.burned.lock().unwrap();
    let mut qpi = Qpi::new(
        &mut spectrum,
        &mut universe,
        contract_index as u32,
        transaction.source_public_key,
        transaction.source_public_key,
        transaction.amount,
        tick,
        epoch,
        time,
        state.arbitrator_public_key,
        &committee_keys,
        &mut burned,
    );
    (registered.procedure)(&mut qpi, computer.state_mut(contract_index), &input);
}

/// A zero-amount 32-byte payload to the arbitrator is a mining solution.
fn apply_solution_submission(
    state: &NodeState,
    scorer: &dyn ScoreOracle,
    transaction: &Transaction,
    _tick: u32,
) {
    let nonce = match transaction.solution_nonce() {
        Some(nonce) => nonce,
        None => return,
    };
    {
        let mut miners = state.miners.lock().unwrap();
        if !miners.check_and_set_solution_flag(&transaction.source_public_key, &nonce) {
            return;
        }
    }

    let score = scorer.score(&transaction.source_public_key, &nonce);
    {
        let mut quorum = state.quorum.lock().unwrap();
        quorum.resource_testing_digest ^= score as u64;
        quorum.resource_testing_digest = crypto::rehash_u64(quorum.resource_testing_digest);
    }

    // Our own solution appearing on-chain confirms it; stop re-publishing.
    let is_own = state
        .identities
        .iter()
        .any(|identity| identity.public_key() == transaction.source_public_key);
    if is_own {
        admit_solution(
            state,
            Solution {
                computor_public_key: transaction.source_public_key,
                nonce,
            },
            -1,
        );
    }

    if score >= state.params.solution_threshold {
        debug!(score, "solution accepted");
        let mut miners = state.miners.lock().unwrap();
        miners.add_score(&transaction.source_public_key);
        let future = miners.future_committee();
        drop(miners);
        state.system.lock().unwrap().future_computors = future;
    }
}

/// When one of this node's seats proposes the tick two ahead, assemble tick
/// data from the pending pool and broadcast it (dejavu zero).
fn emit_own_tick_data(state: &NodeState, tick: u32, epoch: u16) -> Vec<Frame> {
    let target_tick = tick + TICK_TRANSACTIONS_PUBLICATION_OFFSET;
    let seat = {
        let committee = state.committee.lock().unwrap();
        committee
            .own_indices
            .iter()
            .find(|own| target_tick % NUMBER_OF_COMPUTORS as u32 == own.computor_index as u32)
            .copied()
    };
    let seat = match seat {
        Some(seat) => seat,
        None => return Vec::new(),
    };
    {
        let system = state.system.lock().unwrap();
        if tick <= system.latest_led_tick {
            return Vec::new();
        }
    }

    let mut frames = Vec::new();
    if state.is_main {
        let (timelock, mut time) = {
            let quorum = state.quorum.lock().unwrap();
            (
                timelock_digest(
                    &quorum.etalon.salted_spectrum_digest,
                    &quorum.etalon.salted_universe_digest,
                    &quorum.etalon.salted_computer_digest,
                ),
                quorum.etalon.time,
            )
        };
        time.millisecond = 0;

        let proposal_or_ballot = {
            let system = state.system.lock().unwrap();
            let seat_index = seat.computor_index as usize;
            if !system.proposals[seat_index].uri.is_empty() {
                ProposalOrBallot::Proposal(system.proposals[seat_index].clone())
            } else {
                ProposalOrBallot::Ballot(system.ballots[seat_index].clone())
            }
        };

        let mut data = TickData {
            computor_index: seat.computor_index,
            epoch,
            tick: target_tick,
            time,
            proposal_or_ballot,
            timelock,
            ..Default::default()
        };

        // Draw pending transactions targeting the led tick in random order.
        let mut staged = state.pending.entries_for_tick(target_tick);
        staged.shuffle(&mut rand::thread_rng());
        let mut slot = 0usize;
        for (_, entry) in staged {
            if slot >= NUMBER_OF_TRANSACTIONS_PER_TICK {
                break;
            }
            if state.arena.store(target_tick, slot, &entry.transaction) {
                data.transaction_digests[slot] = entry.digest;
                slot += 1;
            }
        }

        data.sign(&state.identities[seat.identity_index]);
        // Keep our own copy; peers get the broadcast.
        state.tick_log.record_tick_data(data.clone());
        frames.push(Frame::new(MessageType::BroadcastFutureTickData, 0, data.encode()));
        debug!(target_tick, transactions = slot, "proposed tick data");
    }

    state.system.lock().unwrap().latest_led_tick = tick;
    frames
}

/// Publish one due solution per identity as an arbitrator transaction with
/// a randomized future tick.
fn publish_due_solutions(state: &NodeState, tick: u32) -> Vec<Frame> {
    if !state.is_main {
        return Vec::new();
    }
    let mut frames = Vec::new();
    for identity in &state.identities {
        let public_key = identity.public_key();

        let to_publish = {
            let system = state.system.lock().unwrap();
            let publications = state.solution_publication_ticks.lock().unwrap();
            let mut selected: Option<usize> = None;
            let mut scheduled_found = false;
            for (index, solution) in system.solutions.iter().enumerate() {
                if publications[index] > 0 && solution.computor_public_key == public_key {
                    if publications[index] <= tick as i64 {
                        selected = Some(index);
                    }
                    scheduled_found = true;
                    break;
                }
            }
            if !scheduled_found {
                for (index, solution) in system.solutions.iter().enumerate() {
                    if publications[index] == 0 && solution.computor_public_key == public_key {
                        selected = Some(index);
                        break;
                    }
                }
            }
            selected.map(|index| (index, system.solutions[index].nonce))
        };

        if let Some((index, nonce)) = to_publish {
            let offset = MIN_MINING_SOLUTIONS_PUBLICATION_OFFSET
                + rand::thread_rng().gen_range(0..MIN_MINING_SOLUTIONS_PUBLICATION_OFFSET);
            let publication_tick = tick + offset;
            state.solution_publication_ticks.lock().unwrap()[index] = publication_tick as i64;

            let transaction = Transaction::new_signed(
                identity,
                state.arbitrator_public_key,
                0,
                publication_tick,
                0,
                nonce.to_vec(),
            );
            frames.push(Frame::new(MessageType::BroadcastTransaction, 0, transaction.encode()));
            debug!(publication_tick, "publishing mining solution");
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_state::NodeParams;
    use crate::score::ConstantScorer;
    use tessera_contracts::ContractRegistry;
    use tessera_core::{Computors, KeyPair, PublicKey, TickTime};

    fn test_state(identities: Vec<KeyPair>) -> NodeState {
        NodeState::new(
            NodeParams::small(),
            ContractRegistry::minimal(),
            identities,
            true,
            PublicKey::ZERO,
            PublicKey::from_bytes([0xEE; 32]),
            1,
            100,
            TickTime { day: 1, month: 1, year: 22, ..Default::default() },
        )
    }

    fn install_full_committee(state: &NodeState, leader: &KeyPair) {
        let mut computors = Computors::default();
        computors.epoch = 1;
        for i in 0..NUMBER_OF_COMPUTORS {
            computors.public_keys[i] = PublicKey::from_bytes({
                let mut bytes = [0u8; 32];
                bytes[..4].copy_from_slice(&(i as u32).to_le_bytes());
                bytes[31] = 2;
                bytes
            });
        }
        // The identity owns the seat proposing tick 102.
        computors.public_keys[102 % NUMBER_OF_COMPUTORS] = leader.public_key();
        state.install_committee(computors);
    }

    #[test]
    fn empty_tick_leaves_spectrum_digest_unchanged() {
        let state = test_state(vec![]);
        let before = state.spectrum.lock().unwrap().digest();
        let frames = process_tick(&state, &ConstantScorer(0));
        assert!(frames.is_empty());
        assert_eq!(state.spectrum.lock().unwrap().digest(), before);

        let quorum = state.quorum.lock().unwrap();
        assert_eq!(quorum.etalon.prev_spectrum_digest, before);
        assert_eq!(quorum.etalon.salted_spectrum_digest, before);
        assert!(quorum.phase >= 1);
    }

    #[test]
    fn own_seat_proposes_tick_data_two_ahead() {
        let leader = KeyPair::from_seed([3u8; 32]);
        let sender = KeyPair::from_seed([4u8; 32]);
        let state = test_state(vec![leader]);
        let leader_ref = &state.identities[0];
        install_full_committee(&state, leader_ref);

        // A pending transaction targeting tick 102 should be picked up.
        state.spectrum.lock().unwrap().credit(&sender.public_key(), 1000, 99);
        let tx = Transaction::new_signed(&sender, PublicKey::from_bytes([5u8; 32]), 10, 102, 0, vec![]);
        let source_index = state.spectrum.lock().unwrap().index_of(&sender.public_key()).unwrap();
        state.pending.offer(source_index, tx.clone());

        let frames = process_tick(&state, &ConstantScorer(0));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type(), Some(MessageType::BroadcastFutureTickData));

        let data = state.tick_log.tick_data(102).unwrap();
        assert_eq!(data.transaction_digests[0], tx.digest());
        assert!(state.arena.has(102, 0));
        assert_eq!(state.system.lock().unwrap().latest_led_tick, 100);
    }

    #[test]
    fn solution_submission_updates_resource_digest_and_scores() {
        let miner = KeyPair::from_seed([8u8; 32]);
        let state = test_state(vec![]);
        {
            let mut committee = Computors::default();
            committee.epoch = 1;
            committee.public_keys[0] = miner.public_key();
            state.install_committee(committee);
        }

        state.spectrum.lock().unwrap().credit(&miner.public_key(), 1, 99);
        let tx = Transaction::new_signed(
            &miner,
            state.arbitrator_public_key,
            0,
            100,
            0,
            vec![7u8; 32],
        );
        let digest_before = state.quorum.lock().unwrap().resource_testing_digest;

        let mut data = TickData { epoch: 1, tick: 100, ..Default::default() };
        data.transaction_digests[0] = tx.digest();
        assert!(state.arena.store(100, 0, &tx));
        state.tick_log.record_tick_data(data);

        process_tick(&state, &ConstantScorer(100));

        let quorum = state.quorum.lock().unwrap();
        assert_ne!(quorum.resource_testing_digest, digest_before);
        drop(quorum);
        assert_eq!(state.miners.lock().unwrap().score_of(&miner.public_key()), Some(1));
        assert_eq!(state.system.lock().unwrap().future_computors[0], miner.public_key());

        // Replaying the same nonce is a no-op on the miner table.
        let replay_digest = state.quorum.lock().unwrap().resource_testing_digest;
        apply_solution_submission(&state, &ConstantScorer(100), &tx, 100);
        assert_eq!(state.quorum.lock().unwrap().resource_testing_digest, replay_digest);
        assert_eq!(state.miners.lock().unwrap().score_of(&miner.public_key()), Some(1));
    }
}
