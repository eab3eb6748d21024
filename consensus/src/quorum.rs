// Quorum engine
// Counts votes against the etalon, derives the target next-tick digest,
// and advances the system tick or stalls until quorum arrives.

use crate::epoch::end_epoch;
use crate::node_state::NodeState;
use crate::processor::process_tick;
use crate::score::ScoreOracle;
use std::time::Duration;
use tessera_core::{
    crypto, timelock_digest, CurrentTickInfo, Digest, Frame, MessageType, RequestTickTransactions,
    EPOCH_BASE_DAY_INDEX, NUMBER_OF_COMPUTORS, NUMBER_OF_TRANSACTIONS_PER_TICK, QUORUM,
    TARGET_TICK_DURATION_MS,
};
use tracing::{debug, info};

/// Result of one pass of the tick processor loop.
#[derive(Default)]
pub struct TickOutcome {
    /// Self-originated broadcasts (dejavu zero) for the transport.
    pub outbound: Vec<Frame>,
    pub advanced: bool,
    pub epoch_sealed: bool,
}

/// Majority scan over one digest per recorded vote: adopt the digest that
/// reached quorum, adopt the empty tick when no digest can reach it any
/// more, stay unknown otherwise.
fn derive_target(digests: &[Digest]) -> Option<Digest> {
    let mut unique: Vec<(Digest, usize)> = Vec::new();
    let mut empty_votes = 0usize;
    for digest in digests {
        if digest.is_zero() {
            empty_votes += 1;
        }
        match unique.iter_mut().find(|(d, _)| d == digest) {
            Some((_, count)) => *count += 1,
            None => unique.push((*digest, 1)),
        }
    }
    let (most_popular, top_count) = match unique.iter().max_by_key(|(_, count)| *count) {
        Some((digest, count)) => (*digest, *count),
        None => return None,
    };
    if top_count >= QUORUM {
        return Some(most_popular);
    }
    let missing = NUMBER_OF_COMPUTORS - digests.len();
    if empty_votes > NUMBER_OF_COMPUTORS - QUORUM || top_count + missing < QUORUM {
        return Some(Digest::ZERO);
    }
    None
}

/// One pass of the tick pipeline. Called in a loop by the tick processor
/// thread; each call makes whatever progress the received votes, tick data,
/// and transactions allow.
pub fn run_tick_iteration(state: &NodeState, scorer: &dyn ScoreOracle) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    let (tick, epoch, initial_tick) = {
        let system = state.system.lock().unwrap();
        (system.tick, system.epoch, system.initial_tick)
    };

    // Without a committee for this epoch there is nothing to judge votes
    // against.
    if state.committee.lock().unwrap().computors.epoch != epoch {
        return outcome;
    }

    let future_total = state.tick_log.votes_recorded(tick + 1) as u32;
    {
        let mut quorum = state.quorum.lock().unwrap();
        quorum.future_tick_total_number_of_computors = future_total;
    }
    if (tick - initial_tick) as usize >= state.params.max_ticks_per_epoch - 1 {
        return outcome;
    }

    let needs_processing = {
        let quorum = state.quorum.lock().unwrap();
        tick > quorum.latest_processed_tick
    };
    if needs_processing {
        outcome.outbound.extend(process_tick(state, scorer));
        state.quorum.lock().unwrap().latest_processed_tick = tick;
    }

    // Rule 1: the next tick's votes already commit to their transaction
    // digest.
    if future_total as usize > NUMBER_OF_COMPUTORS - QUORUM {
        let digests: Vec<Digest> = (0..NUMBER_OF_COMPUTORS as u16)
            .filter_map(|i| state.tick_log.vote(tick + 1, i))
            .map(|vote| vote.transaction_digest)
            .collect();
        if let Some(target) = derive_target(&digests) {
            let mut quorum = state.quorum.lock().unwrap();
            quorum.target_next_tick_data_digest = Some(target);
            quorum.test_flags |= if target.is_zero() { 2048 } else { 1024 };
        }
    }

    // Rule 2: fall back to what the current tick's votes expected next.
    if state.quorum.lock().unwrap().target_next_tick_data_digest.is_none() {
        let digests: Vec<Digest> = (0..NUMBER_OF_COMPUTORS as u16)
            .filter_map(|i| state.tick_log.vote(tick, i))
            .map(|vote| vote.expected_next_tick_transaction_digest)
            .collect();
        if !digests.is_empty() {
            if let Some(target) = derive_target(&digests) {
                let mut quorum = state.quorum.lock().unwrap();
                quorum.target_next_tick_data_digest = Some(target);
                quorum.test_flags |= if target.is_zero() { 8192 } else { 4096 };
            }
        }
    }

    // The next tick's data must be timelocked to our pre-tick digests.
    let mut next_tick_data = state
        .tick_log
        .tick_data(tick + 1)
        .filter(|data| data.epoch == epoch);
    if let Some(data) = &next_tick_data {
        let expected_timelock = {
            let quorum = state.quorum.lock().unwrap();
            timelock_digest(
                &quorum.etalon.prev_spectrum_digest,
                &quorum.etalon.prev_universe_digest,
                &quorum.etalon.prev_computer_digest,
            )
        };
        if data.timelock != expected_timelock {
            state.tick_log.clear_tick_data(tick + 1);
            next_tick_data = None;
        }
    }

    let target = state.quorum.lock().unwrap().target_next_tick_data_digest;
    let elapsed = state.quorum.lock().unwrap().last_tick_advance.elapsed();

    let tick_data_suits = match target {
        None => {
            // Unknown target: wait out the tick duration before conceding
            // the data may legitimately be absent.
            !(next_tick_data.is_none()
                && future_total as usize <= NUMBER_OF_COMPUTORS - QUORUM
                && elapsed < Duration::from_millis(TARGET_TICK_DURATION_MS))
        }
        Some(target_digest) if target_digest.is_zero() => {
            state.tick_log.clear_tick_data(tick + 1);
            next_tick_data = None;
            true
        }
        Some(target_digest) => match &next_tick_data {
            None => false,
            Some(data) => {
                let digest = data.digest();
                let mut quorum = state.quorum.lock().unwrap();
                quorum.etalon.expected_next_tick_transaction_digest = digest;
                let suits = digest == target_digest;
                if !suits {
                    quorum.test_flags |= 1;
                }
                suits
            }
        },
    };

    if !tick_data_suits {
        let total = state.tick_log.votes_recorded(tick) as u32;
        let mut quorum = state.quorum.lock().unwrap();
        quorum.tick_number_of_computors = 0;
        quorum.tick_total_number_of_computors = total;
        if quorum.test_flags & 1 != 0 {
            quorum.test_flags |= 512;
        }
        return outcome;
    }

    {
        let mut quorum = state.quorum.lock().unwrap();
        if quorum.phase < 2 {
            quorum.phase = 2;
        }
    }

    // Collect the next tick's transactions; back-fill what gossip already
    // staged per entity.
    let mut number_of_next = 0usize;
    let mut number_known = 0usize;
    let mut unknown_slots: Vec<usize> = Vec::new();
    if let Some(data) = &next_tick_data {
        for slot in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
            let digest = data.transaction_digests[slot];
            if digest.is_zero() {
                continue;
            }
            number_of_next += 1;
            match state.arena.get(tick + 1, slot) {
                Some(transaction) if transaction.digest() == digest => number_known += 1,
                _ => unknown_slots.push(slot),
            }
        }
        if number_known != number_of_next {
            for &slot in &unknown_slots {
                let digest = data.transaction_digests[slot];
                if let Some(transaction) = state.pending.find_by_digest(&digest, tick + 1) {
                    if state.arena.store(tick + 1, slot, &transaction) {
                        number_known += 1;
                    }
                }
            }
        }
    }

    // Stall relief: with no target in sight for ~5 tick durations, drop the
    // unfillable data and re-derive the tick.
    if number_known != number_of_next
        && target.is_none()
        && elapsed > Duration::from_millis(TARGET_TICK_DURATION_MS * 5)
    {
        state.tick_log.clear_tick_data(tick + 1);
        next_tick_data = None;
        number_of_next = 0;
        number_known = 0;
    }

    {
        let mut quorum = state.quorum.lock().unwrap();
        quorum.number_of_next_tick_transactions = number_of_next;
        quorum.number_of_known_next_tick_transactions = number_known;
    }

    if number_known != number_of_next {
        // Tell the transport which slots we still lack.
        let mut request = RequestTickTransactions::new(tick + 1);
        if let Some(data) = &next_tick_data {
            for slot in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
                let digest = data.transaction_digests[slot];
                let missing = !digest.is_zero()
                    && !matches!(state.arena.get(tick + 1, slot), Some(t) if t.digest() == digest);
                if !missing {
                    request.mark_transaction(slot);
                }
            }
        }
        state.quorum.lock().unwrap().missing_transactions_request = Some(request);
        debug!(known = number_known, total = number_of_next, "awaiting next-tick transactions");
        return outcome;
    }
    state.quorum.lock().unwrap().missing_transactions_request = None;

    // The etalon commits to the applied tick's data and to what we expect
    // next.
    {
        let current_data = state.tick_log.tick_data(tick).filter(|d| d.epoch == epoch);
        let mut quorum = state.quorum.lock().unwrap();
        quorum.etalon.transaction_digest = match current_data {
            Some(data) => data.digest(),
            None => Digest::ZERO,
        };
        match &next_tick_data {
            Some(data) => {
                if target.is_none() {
                    quorum.etalon.expected_next_tick_transaction_digest = data.digest();
                }
            }
            None => {
                quorum.etalon.expected_next_tick_transaction_digest = Digest::ZERO;
            }
        }
    }

    let should_emit = {
        let system = state.system.lock().unwrap();
        tick > system.latest_created_tick || tick == system.initial_tick
    };
    if should_emit {
        if state.is_main {
            outcome.outbound.extend(emit_own_votes(state, tick, epoch));
        }
        if tick != initial_tick {
            state.system.lock().unwrap().latest_created_tick = tick;
        }
    }

    let (aligned, total) = count_votes(state, tick);
    {
        let mut quorum = state.quorum.lock().unwrap();
        quorum.tick_number_of_computors = aligned;
        quorum.tick_total_number_of_computors = total;
        if quorum.phase < 3 {
            quorum.phase = 3;
        }
    }

    if (aligned as usize) < QUORUM {
        return outcome;
    }

    let target = {
        let mut quorum = state.quorum.lock().unwrap();
        if quorum.target_next_tick_data_digest.is_none() && quorum.force_next_tick {
            quorum.target_next_tick_data_digest = Some(Digest::ZERO);
            quorum.test_flags |= 16384;
        }
        quorum.force_next_tick = false;
        quorum.target_next_tick_data_digest
    };
    let target_digest = match target {
        Some(digest) => digest,
        None => return outcome,
    };
    {
        let mut quorum = state.quorum.lock().unwrap();
        if quorum.phase < 4 {
            quorum.phase = 4;
        }
    }

    // Final check that the stored next-tick data still matches the target.
    let ready = if target_digest.is_zero() {
        state.tick_log.clear_tick_data(tick + 1);
        true
    } else {
        match state.tick_log.tick_data(tick + 1).filter(|d| d.epoch == epoch) {
            None => false,
            Some(data) => {
                let digest = data.digest();
                state.quorum.lock().unwrap().etalon.expected_next_tick_transaction_digest = digest;
                digest == target_digest
            }
        }
    };
    if !ready {
        return outcome;
    }

    // Epoch cut-over: seal once the etalon's date reaches the boundary.
    let etalon_time = state.quorum.lock().unwrap().etalon.time;
    let day_index = etalon_time.day_index();
    let boundary = EPOCH_BASE_DAY_INDEX + epoch as u32 * 7;
    if (day_index == boundary && etalon_time.hour >= 12) || day_index > boundary {
        info!(epoch, tick, "epoch boundary reached");
        end_epoch(state);
        outcome.epoch_sealed = true;
    } else {
        // Adopt the applied tick data's later timestamp, or step one
        // millisecond.
        let current_data = state.tick_log.tick_data(tick).filter(|d| d.epoch == epoch);
        let mut quorum = state.quorum.lock().unwrap();
        match current_data {
            Some(data) if data.time > quorum.etalon.time => quorum.etalon.time = data.time,
            _ => quorum.etalon.time.advance_millisecond(),
        }
    }

    {
        let mut system = state.system.lock().unwrap();
        system.tick += 1;
        debug!(tick = system.tick, aligned, total, "tick advanced");
    }
    {
        let mut quorum = state.quorum.lock().unwrap();
        quorum.test_flags = 0;
        quorum.phase = 0;
        quorum.tick_number_of_computors = 0;
        quorum.tick_total_number_of_computors = 0;
        quorum.target_next_tick_data_digest = None;
        quorum.number_of_next_tick_transactions = 0;
        quorum.number_of_known_next_tick_transactions = 0;
        quorum.last_tick_duration_ms = quorum.last_tick_advance.elapsed().as_millis() as u64;
        quorum.last_tick_advance = std::time::Instant::now();
    }
    outcome.advanced = true;
    outcome
}

/// Sign the etalon with every seat this node holds and hand the votes to
/// the transport.
fn emit_own_votes(state: &NodeState, _tick: u32, _epoch: u16) -> Vec<Frame> {
    let own_indices = state.committee.lock().unwrap().own_indices.clone();
    let mut frames = Vec::new();
    for own in own_indices {
        let identity = &state.identities[own.identity_index];
        let public_key = identity.public_key();
        let mut vote = {
            let quorum = state.quorum.lock().unwrap();
            let mut vote = quorum.etalon;
            vote.computor_index = own.computor_index;
            vote.salted_resource_testing_digest =
                crypto::salted_u64(&public_key, quorum.resource_testing_digest);
            vote.salted_spectrum_digest =
                crypto::salted_digest(&public_key, &quorum.etalon.salted_spectrum_digest);
            vote.salted_universe_digest =
                crypto::salted_digest(&public_key, &quorum.etalon.salted_universe_digest);
            vote.salted_computer_digest =
                crypto::salted_digest(&public_key, &quorum.etalon.salted_computer_digest);
            vote
        };
        vote.sign(identity);
        // Keep our own copy; peers get the broadcast.
        state.tick_log.record_vote(&vote);
        frames.push(Frame::new(MessageType::BroadcastTick, 0, vote.encode()));
    }
    frames
}

/// Validate every recorded vote for the tick against the etalon: the salted
/// digests must equal the per-computor folds and the essence must match.
fn count_votes(state: &NodeState, tick: u32) -> (u32, u32) {
    let committee_keys = state.committee.lock().unwrap().computors.public_keys.clone();
    let (etalon, resource_testing_digest) = {
        let quorum = state.quorum.lock().unwrap();
        (quorum.etalon, quorum.resource_testing_digest)
    };
    let etalon_essence_digest = etalon.essence().digest();

    let mut aligned = 0u32;
    let mut total = 0u32;
    let mut flags = 0u32;
    for index in 0..NUMBER_OF_COMPUTORS as u16 {
        let vote = match state.tick_log.vote(tick, index) {
            Some(vote) => vote,
            None => continue,
        };
        total += 1;
        let public_key = committee_keys[index as usize];

        if vote.salted_resource_testing_digest
            != crypto::salted_u64(&public_key, resource_testing_digest)
        {
            continue;
        }
        if vote.salted_spectrum_digest
            != crypto::salted_digest(&public_key, &etalon.salted_spectrum_digest)
        {
            flags |= 2;
            continue;
        }
        if vote.salted_universe_digest
            != crypto::salted_digest(&public_key, &etalon.salted_universe_digest)
        {
            flags |= 4;
            continue;
        }
        if vote.salted_computer_digest
            != crypto::salted_digest(&public_key, &etalon.salted_computer_digest)
        {
            flags |= 8;
            continue;
        }

        if vote.essence().digest() == etalon_essence_digest {
            aligned += 1;
        } else {
            if vote.time != etalon.time {
                flags |= 16;
            }
            if vote.prev_spectrum_digest != etalon.prev_spectrum_digest {
                flags |= 32;
            }
            if vote.prev_universe_digest != etalon.prev_universe_digest {
                flags |= 64;
            }
            if vote.prev_computer_digest != etalon.prev_computer_digest {
                flags |= 128;
            }
            if vote.transaction_digest != etalon.transaction_digest {
                flags |= 256;
            }
        }
    }
    if flags != 0 {
        state.quorum.lock().unwrap().test_flags |= flags;
    }
    (aligned, total)
}

/// Liveness summary for the wire protocol.
pub fn current_tick_info(state: &NodeState) -> CurrentTickInfo {
    let (epoch, tick) = {
        let system = state.system.lock().unwrap();
        (system.epoch, system.tick)
    };
    let quorum = state.quorum.lock().unwrap();
    let duration = quorum
        .last_tick_advance
        .elapsed()
        .as_millis()
        .min(u16::MAX as u128) as u16;
    CurrentTickInfo {
        tick_duration: duration,
        epoch,
        tick,
        number_of_aligned_votes: quorum.tick_number_of_computors as u16,
        number_of_misaligned_votes: (quorum.tick_total_number_of_computors
            - quorum.tick_number_of_computors) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::from_bytes([byte; 32])
    }

    #[test]
    fn target_adopts_quorum_majority() {
        let mut digests = vec![digest(1); QUORUM];
        digests.extend(vec![digest(2); 10]);
        assert_eq!(derive_target(&digests), Some(digest(1)));
    }

    #[test]
    fn target_stays_unknown_while_reachable() {
        // 300 votes for one digest with 376 missing: quorum still possible.
        let digests = vec![digest(1); 300];
        assert_eq!(derive_target(&digests), None);
    }

    #[test]
    fn target_collapses_to_empty_when_unreachable() {
        // 400 and 276 split: neither side can reach 451 with zero missing.
        let mut digests = vec![digest(1); 400];
        digests.extend(vec![digest(2); 276]);
        assert_eq!(derive_target(&digests), Some(Digest::ZERO));
    }

    #[test]
    fn majority_of_empty_votes_adopts_empty() {
        // More empty votes than the quorum slack forces an empty tick.
        let digests = vec![Digest::ZERO; NUMBER_OF_COMPUTORS - QUORUM + 1];
        assert_eq!(derive_target(&digests), Some(Digest::ZERO));
    }

    #[test]
    fn no_votes_no_target() {
        assert_eq!(derive_target(&[]), None);
    }
}
