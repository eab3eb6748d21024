// End-to-end tick pipeline scenarios over small-capacity stores: a full
// committee driving empty ticks, transfers, vote conflicts, stalls, IPO
// settlement, and mining intake.

use tessera_consensus::{
    end_epoch, process_tick, run_tick_iteration, ConstantScorer, NodeParams, NodeState,
};
use tessera_contracts::{ContractDescription, ContractRegistry};
use tessera_core::{
    crypto, AssetName, Computors, Digest, IpoBid, KeyPair, PublicKey, TickData, TickTime,
    TickVote, Transaction, NUMBER_OF_COMPUTORS, QUORUM,
};
use tessera_state::CONTRACT_0_STATE_SIZE;

const START_TICK: u32 = 100;

fn seed(index: usize) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
    bytes[8] = 0xC0;
    bytes
}

fn start_time() -> TickTime {
    TickTime { day: 1, month: 1, year: 22, ..Default::default() }
}

fn committee_state(registry: ContractRegistry) -> (NodeState, Vec<KeyPair>) {
    let keys: Vec<KeyPair> = (0..NUMBER_OF_COMPUTORS).map(|i| KeyPair::from_seed(seed(i))).collect();
    let state = NodeState::new(
        NodeParams::small(),
        registry,
        vec![],
        false,
        PublicKey::ZERO,
        PublicKey::from_bytes([0xEE; 32]),
        1,
        START_TICK,
        start_time(),
    );
    let mut computors = Computors::default();
    computors.epoch = 1;
    for (i, key) in keys.iter().enumerate() {
        computors.public_keys[i] = key.public_key();
    }
    state.install_committee(computors);
    (state, keys)
}

/// Build a consistent vote for one seat from the current etalon.
fn vote_from_etalon(state: &NodeState, computor_index: u16) -> TickVote {
    let quorum = state.quorum.lock().unwrap();
    let public_key = state.committee.lock().unwrap().computors.public_keys[computor_index as usize];
    let mut vote = quorum.etalon;
    vote.computor_index = computor_index;
    vote.salted_resource_testing_digest =
        crypto::salted_u64(&public_key, quorum.resource_testing_digest);
    vote.salted_spectrum_digest =
        crypto::salted_digest(&public_key, &quorum.etalon.salted_spectrum_digest);
    vote.salted_universe_digest =
        crypto::salted_digest(&public_key, &quorum.etalon.salted_universe_digest);
    vote.salted_computer_digest =
        crypto::salted_digest(&public_key, &quorum.etalon.salted_computer_digest);
    vote
}

/// Record consistent votes for the current tick from every seat, plus
/// next-tick votes committing to the given transaction digest.
fn cast_full_committee_votes(
    state: &NodeState,
    tick: u32,
    current_transaction_digest: Digest,
    next_transaction_digest: Digest,
) {
    for index in 0..NUMBER_OF_COMPUTORS as u16 {
        let mut vote = vote_from_etalon(state, index);
        vote.transaction_digest = current_transaction_digest;
        state.tick_log.record_vote(&vote);

        let mut future = vote;
        future.tick = tick + 1;
        future.transaction_digest = next_transaction_digest;
        state.tick_log.record_vote(&future);
    }
}

// S1: all 676 computors vote an empty tick with matching digests; the tick
// advances and nothing else moves.
#[test]
fn empty_tick_happy_path() {
    let (state, _keys) = committee_state(ContractRegistry::minimal());
    let scorer = ConstantScorer(0);

    // First pass applies the (empty) tick and fixes the etalon.
    run_tick_iteration(&state, &scorer);
    let spectrum_digest_before = state.spectrum.lock().unwrap().digest();

    cast_full_committee_votes(&state, START_TICK, Digest::ZERO, Digest::ZERO);
    let outcome = run_tick_iteration(&state, &scorer);

    assert!(outcome.advanced);
    assert!(!outcome.epoch_sealed);
    assert_eq!(state.current_tick(), START_TICK + 1);
    assert_eq!(state.spectrum.lock().unwrap().digest(), spectrum_digest_before);
    assert_eq!(state.tick_log.faulty_count(), 0);
}

// S2: a single signed transfer in the tick's data moves 700 out of 1000.
#[test]
fn single_coin_transfer() {
    let (state, _keys) = committee_state(ContractRegistry::minimal());
    let scorer = ConstantScorer(0);

    let alice = KeyPair::from_seed([0xA1; 32]);
    let bob = PublicKey::from_bytes([0xB0; 32]);
    state.spectrum.lock().unwrap().credit(&alice.public_key(), 1000, START_TICK - 1);

    let transfer = Transaction::new_signed(&alice, bob, 700, START_TICK, 0, vec![]);
    assert!(transfer.is_valid());
    let mut data = TickData {
        epoch: 1,
        tick: START_TICK,
        time: start_time(),
        ..Default::default()
    };
    data.transaction_digests[0] = transfer.digest();
    let data_digest = data.digest();
    assert!(state.arena.store(START_TICK, 0, &transfer));
    state.tick_log.record_tick_data(data);

    run_tick_iteration(&state, &scorer);
    cast_full_committee_votes(&state, START_TICK, data_digest, Digest::ZERO);
    let outcome = run_tick_iteration(&state, &scorer);

    assert!(outcome.advanced);
    assert_eq!(state.current_tick(), START_TICK + 1);
    let spectrum = state.spectrum.lock().unwrap();
    let alice_index = spectrum.index_of(&alice.public_key()).unwrap();
    let bob_index = spectrum.index_of(&bob).unwrap();
    assert_eq!(spectrum.balance(alice_index), 300);
    assert_eq!(spectrum.balance(bob_index), 700);
}

// S3: two differing votes from the same computor flag it faulty and keep it
// out of the aligned count.
#[test]
fn duplicate_vote_conflict() {
    let (state, _keys) = committee_state(ContractRegistry::minimal());
    let scorer = ConstantScorer(0);

    run_tick_iteration(&state, &scorer);

    for index in 0..NUMBER_OF_COMPUTORS as u16 {
        let mut vote = vote_from_etalon(&state, index);
        if index == 13 {
            // The survivor is the first receipt, and it is wrong.
            vote.prev_spectrum_digest = crypto::digest(b"divergent");
        }
        state.tick_log.record_vote(&vote);

        let mut future = vote;
        future.tick = START_TICK + 1;
        future.transaction_digest = Digest::ZERO;
        state.tick_log.record_vote(&future);
    }
    // The conflicting re-receipt from seat 13.
    let mut second = vote_from_etalon(&state, 13);
    second.prev_spectrum_digest = crypto::digest(b"divergent again");
    state.tick_log.record_vote(&second);

    let outcome = run_tick_iteration(&state, &scorer);

    assert!(state.tick_log.is_faulty(13));
    assert!(outcome.advanced);
    // Everyone but the faulty seat aligned before the advance reset the
    // counters; the tick still carried quorum.
    assert_eq!(state.current_tick(), START_TICK + 1);
}

// S4: below-quorum next-tick votes stall the tick until the operator forces
// an empty one.
#[test]
fn quorum_stall_and_forced_tick() {
    let (state, _keys) = committee_state(ContractRegistry::minimal());
    let scorer = ConstantScorer(0);

    run_tick_iteration(&state, &scorer);

    let contested = crypto::digest(b"contested tick data");
    for index in 0..NUMBER_OF_COMPUTORS as u16 {
        let vote = vote_from_etalon(&state, index);
        state.tick_log.record_vote(&vote);

        // Only 450 seats (one short of quorum) commit to the contested
        // digest; the rest stay silent about the next tick.
        if (index as usize) < QUORUM - 1 {
            let mut future = vote;
            future.tick = START_TICK + 1;
            future.transaction_digest = contested;
            state.tick_log.record_vote(&future);
        }
    }

    let outcome = run_tick_iteration(&state, &scorer);
    assert!(!outcome.advanced);
    assert_eq!(state.current_tick(), START_TICK);
    {
        let quorum = state.quorum.lock().unwrap();
        assert!(quorum.target_next_tick_data_digest.is_none());
        assert!(quorum.tick_number_of_computors as usize >= QUORUM);
    }

    state.quorum.lock().unwrap().force_next_tick = true;
    let outcome = run_tick_iteration(&state, &scorer);
    assert!(outcome.advanced);
    assert_eq!(state.current_tick(), START_TICK + 1);
}

// S5: 700 ascending bids leave the top 676 in the book; settlement clears
// at 25, refunds overbids, and distributes one share per retained bid.
#[test]
fn ipo_auction_and_settlement() {
    let registry = ContractRegistry::new(vec![
        ContractDescription {
            asset_name: AssetName::default(),
            construction_epoch: 0,
            destruction_epoch: u16::MAX,
            state_size: CONTRACT_0_STATE_SIZE,
        },
        ContractDescription {
            asset_name: AssetName::from_str_padded("QFT"),
            construction_epoch: 2,
            destruction_epoch: u16::MAX,
            state_size: 256,
        },
    ]);
    let (state, _keys) = committee_state(registry);
    let scorer = ConstantScorer(0);

    let bidders: Vec<KeyPair> = (0..700).map(|i| KeyPair::from_seed(seed(10_000 + i))).collect();
    let mut data = TickData {
        epoch: 1,
        tick: START_TICK,
        time: start_time(),
        ..Default::default()
    };
    for (i, bidder) in bidders.iter().enumerate() {
        let price = i as i64 + 1;
        state.spectrum.lock().unwrap().credit(&bidder.public_key(), price, START_TICK - 1);
        let bid = IpoBid { price, quantity: 1 };
        let tx = Transaction::new_signed(
            bidder,
            PublicKey::for_contract(1),
            0,
            START_TICK,
            0,
            bid.encode(),
        );
        data.transaction_digests[i] = tx.digest();
        assert!(state.arena.store(START_TICK, i, &tx));
    }
    state.tick_log.record_tick_data(data);

    process_tick(&state, &scorer);

    {
        let computer = state.computer.lock().unwrap();
        let ipo = tessera_state::Ipo::load(computer.state(1));
        assert_eq!(ipo.final_price(), 25);
        assert_eq!(ipo.prices[0], 700);
        // Rejected low bids were refunded immediately.
        let spectrum = state.spectrum.lock().unwrap();
        let low_bidder = spectrum.index_of(&bidders[9].public_key()).unwrap();
        assert_eq!(spectrum.balance(low_bidder), 10);
    }

    end_epoch(&state);

    let spectrum = state.spectrum.lock().unwrap();
    // The 700-bidder overbid by 675 and got it back at settlement.
    let top_bidder = spectrum.index_of(&bidders[699].public_key()).unwrap();
    assert_eq!(spectrum.balance(top_bidder), 675);
    // The clearing bidder (price 25) paid exactly the final price.
    assert_eq!(spectrum.index_of(&bidders[24].public_key()), None);
    drop(spectrum);

    let universe = state.universe.lock().unwrap();
    let share = universe.possessions_of(&bidders[699].public_key());
    assert_eq!(share.len(), 1);
    assert_eq!(share[0].1.number_of_units, 1);
    drop(universe);

    assert_eq!(
        state.computer.lock().unwrap().fee_reserve(1),
        25 * NUMBER_OF_COMPUTORS as i64
    );
}

// S6: a solution to the arbitrator from a current computor lands in the
// solution list and bumps the miner score.
#[test]
fn mining_solution_intake() {
    let (state, keys) = committee_state(ContractRegistry::minimal());
    let scorer = ConstantScorer(80);

    let miner = KeyPair::from_seed(seed(5));
    assert_eq!(miner.public_key(), keys[5].public_key());
    state.spectrum.lock().unwrap().credit(&miner.public_key(), 1, START_TICK - 1);

    let solution_tx = Transaction::new_signed(
        &miner,
        state.arbitrator_public_key,
        0,
        START_TICK,
        0,
        vec![0x5A; 32],
    );
    let mut data = TickData {
        epoch: 1,
        tick: START_TICK,
        time: start_time(),
        ..Default::default()
    };
    data.transaction_digests[0] = solution_tx.digest();
    assert!(state.arena.store(START_TICK, 0, &solution_tx));
    state.tick_log.record_tick_data(data);

    let digest_before = state.quorum.lock().unwrap().resource_testing_digest;
    process_tick(&state, &scorer);

    assert_ne!(state.quorum.lock().unwrap().resource_testing_digest, digest_before);
    assert!(state
        .miners
        .lock()
        .unwrap()
        .score_of(&miner.public_key())
        .unwrap_or(0) >= 1);
    // The identity belongs to the committee but not to this node, so the
    // solution list stays driven by the miner table only.
    assert_eq!(state.system.lock().unwrap().future_computors[0], miner.public_key());
}

// R3: applying the same tick's transactions to a fresh copy of the state
// yields identical digests.
#[test]
fn reapplication_is_deterministic() {
    let build = || {
        let (state, _keys) = committee_state(ContractRegistry::minimal());
        let alice = KeyPair::from_seed([0xA7; 32]);
        state.spectrum.lock().unwrap().credit(&alice.public_key(), 5000, START_TICK - 1);
        let tx = Transaction::new_signed(
            &alice,
            PublicKey::from_bytes([0xBB; 32]),
            1234,
            START_TICK,
            0,
            vec![],
        );
        let mut data = TickData {
            epoch: 1,
            tick: START_TICK,
            time: start_time(),
            ..Default::default()
        };
        data.transaction_digests[0] = tx.digest();
        state.arena.store(START_TICK, 0, &tx);
        state.tick_log.record_tick_data(data);
        process_tick(&state, &ConstantScorer(0));
        let quorum = state.quorum.lock().unwrap();
        (
            quorum.etalon.salted_spectrum_digest,
            quorum.etalon.salted_universe_digest,
            quorum.etalon.salted_computer_digest,
        )
    };

    assert_eq!(build(), build());
}
