// Epoch controller
// Seals the epoch: settles IPOs, distributes issuance by proposer activity,
// compacts the stores, and reshapes the committee.

use crate::node_state::NodeState;
use rand::RngCore;
use tessera_contracts::ContractPhase;
use tessera_core::{
    AssetName, Computors, PublicKey, Signature, NUMBER_OF_COMPUTORS,
    NUMBER_OF_TRANSACTIONS_PER_TICK,
};
use tessera_state::Ipo;
use tessera_tokenomics::{compute_revenues, revenue_points};
use tracing::info;

/// Contract shares are managed by the exchange contract in slot 1.
const SHARES_MANAGING_CONTRACT: u16 = 1;

/// Run once when the tick pipeline crosses the epoch boundary. The caller
/// holds no store locks.
pub fn end_epoch(state: &NodeState) {
    let (tick, epoch, initial_tick) = {
        let system = state.system.lock().unwrap();
        (system.tick, system.epoch, system.initial_tick)
    };

    run_end_epoch_procedures(state, epoch, tick);
    settle_ipos(state, epoch, tick);

    {
        let mut system = state.system.lock().unwrap();
        let quorum = state.quorum.lock().unwrap();
        system.initial_time = quorum.etalon.time;
    }

    distribute_revenues(state, epoch, initial_tick, tick);

    state.spectrum.lock().unwrap().compact();
    state.universe.lock().unwrap().compact();

    {
        let mut system = state.system.lock().unwrap();
        system.epoch += 1;
        system.initial_tick = system.tick;
        system
            .future_computors
            .iter_mut()
            .for_each(|pk| *pk = PublicKey::ZERO);
    }
    state.tick_log.reset(tick);
    state.arena.reset(tick);
    state.pending.clear();

    // The outgoing committee is void; hold randomized placeholders until
    // the arbitrator broadcasts the next one.
    {
        let mut committee = state.committee.lock().unwrap();
        let mut placeholder = Computors {
            epoch: 0,
            public_keys: Vec::with_capacity(NUMBER_OF_COMPUTORS),
            signature: Signature::ZERO,
        };
        let mut rng = rand::thread_rng();
        for _ in 0..NUMBER_OF_COMPUTORS {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            placeholder.public_keys.push(PublicKey::from_bytes(bytes));
        }
        committee.computors = placeholder;
        committee.own_indices.clear();
    }

    state.save_flags.request_all();
    info!(sealed_epoch = epoch, tick, "epoch sealed");
}

fn run_end_epoch_procedures(state: &NodeState, epoch: u16, tick: u32) {
    let order = state.registry.phase_order(ContractPhase::EndEpoch, epoch);
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
        let procedure =
            match state.registry.system_procedure(contract_index, ContractPhase::EndEpoch) {
                Some(procedure) => procedure,
                None => continue,
            };
        let contract_id = PublicKey::for_contract(contract_index as u32);
        let mut qpi = tessera_contracts::Qpi::new(
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

/// Settle the auction of every contract constructed in the incoming epoch:
/// mint its 676 shares, hand one to each winning bidder, refund overbids,
/// and seed the fee reserve with the clearing proceeds.
fn settle_ipos(state: &NodeState, epoch: u16, tick: u32) {
    for contract_index in 1..state.registry.contract_count() {
        let description = match state.registry.description(contract_index) {
            Some(description) => description,
            None => continue,
        };
        if description.construction_epoch != epoch + 1 {
            continue;
        }
        let asset_name = description.asset_name;
        settle_one_ipo(state, contract_index, asset_name, tick);
    }
}

fn settle_one_ipo(state: &NodeState, contract_index: usize, asset_name: AssetName, tick: u32) {
    let ipo = {
        let computer = state.computer.lock().unwrap();
        Ipo::load(computer.state(contract_index))
    };
    let final_price = ipo.final_price();

    let mut spectrum = state.spectrum.lock().unwrap();
    let mut universe = state.universe.lock().unwrap();

    let minted = if final_price != 0 {
        universe.issue_asset(
            &PublicKey::ZERO,
            asset_name,
            0,
            [0i8; 7],
            NUMBER_OF_COMPUTORS as i64,
            SHARES_MANAGING_CONTRACT,
        )
    } else {
        None
    };

    let mut releases: Vec<(PublicKey, i64)> = Vec::new();
    for i in 0..NUMBER_OF_COMPUTORS {
        if ipo.prices[i] > final_price {
            match releases.iter_mut().find(|(pk, _)| *pk == ipo.public_keys[i]) {
                Some((_, total)) => *total += ipo.prices[i] - final_price,
                None => releases.push((ipo.public_keys[i], ipo.prices[i] - final_price)),
            }
        }
        if let Some((_, ownership_index, possession_index)) = minted {
            universe.transfer_ownership_and_possession(
                ownership_index,
                possession_index,
                &ipo.public_keys[i],
                1,
            );
        }
    }
    for (public_key, amount) in releases {
        spectrum.credit(&public_key, amount, tick);
    }

    let mut computer = state.computer.lock().unwrap();
    computer.set_fee_reserve(contract_index, final_price * NUMBER_OF_COMPUTORS as i64);
    info!(contract_index, final_price, "IPO settled");
}

/// Count the transactions each proposer slot landed over the epoch, map the
/// counts through the revenue curve, and pay the committee; the remainder
/// goes to the arbitrator.
fn distribute_revenues(state: &NodeState, epoch: u16, initial_tick: u32, final_tick: u32) {
    let mut transaction_counters = vec![0u64; NUMBER_OF_COMPUTORS];
    for tick in initial_tick..=final_tick {
        let data = match state.tick_log.tick_data(tick) {
            Some(data) if data.epoch == epoch => data,
            _ => continue,
        };
        let count = (0..NUMBER_OF_TRANSACTIONS_PER_TICK)
            .filter(|&slot| !data.transaction_digests[slot].is_zero())
            .count();
        transaction_counters[tick as usize % NUMBER_OF_COMPUTORS] += revenue_points(count);
    }

    let (revenues, arbitrator_revenue) = compute_revenues(&transaction_counters);
    let committee_keys = state.committee.lock().unwrap().computors.public_keys.clone();
    let mut spectrum = state.spectrum.lock().unwrap();
    for (index, revenue) in revenues.iter().enumerate() {
        spectrum.credit(&committee_keys[index], *revenue, final_tick);
    }
    spectrum.credit(&state.arbitrator_public_key, arbitrator_revenue, final_tick);
}
