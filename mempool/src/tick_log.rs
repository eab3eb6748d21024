// Tick log
// Ring of per-(tick, computor) vote records plus per-tick data slots

use std::sync::Mutex;
use tessera_core::{TickData, TickVote, NUMBER_OF_COMPUTORS};

/// What happened to an incoming vote or tick data record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First receipt; stored.
    Stored,
    /// Re-receipt with an identical commitment; dropped.
    Duplicate,
    /// Re-receipt with a differing commitment; dropped and the sender
    /// flagged faulty.
    Conflict,
}

/// Per-epoch log of votes and tick data. Vote slots are locked individually
/// so the dispatcher workers and the tick processor contend per computor,
/// not per tick.
pub struct TickLog {
    initial_tick: Mutex<u32>,
    max_ticks: usize,
    votes: Vec<Mutex<Option<TickVote>>>,
    tick_data: Mutex<Vec<Option<TickData>>>,
    faulty: Mutex<Vec<u64>>,
}

impl TickLog {
    pub fn new(initial_tick: u32, max_ticks: usize) -> Self {
        let mut votes = Vec::with_capacity(max_ticks * NUMBER_OF_COMPUTORS);
        votes.resize_with(max_ticks * NUMBER_OF_COMPUTORS, || Mutex::new(None));
        TickLog {
            initial_tick: Mutex::new(initial_tick),
            max_ticks,
            votes,
            tick_data: Mutex::new(vec![None; max_ticks]),
            faulty: Mutex::new(vec![0u64; (NUMBER_OF_COMPUTORS + 63) / 64]),
        }
    }

    pub fn initial_tick(&self) -> u32 {
        *self.initial_tick.lock().unwrap()
    }

    pub fn max_ticks(&self) -> usize {
        self.max_ticks
    }

    /// Whether the tick falls inside the epoch's ring.
    pub fn in_range(&self, tick: u32) -> bool {
        let initial = self.initial_tick();
        tick >= initial && tick < initial + self.max_ticks as u32
    }

    fn vote_slot(&self, tick: u32, computor_index: u16) -> Option<&Mutex<Option<TickVote>>> {
        if !self.in_range(tick) || computor_index as usize >= NUMBER_OF_COMPUTORS {
            return None;
        }
        let offset = (tick - self.initial_tick()) as usize * NUMBER_OF_COMPUTORS
            + computor_index as usize;
        self.votes.get(offset)
    }

    /// Store a verified vote. At most one vote survives per (tick, computor);
    /// a differing second vote marks the computor faulty.
    pub fn record_vote(&self, vote: &TickVote) -> RecordOutcome {
        let slot = match self.vote_slot(vote.tick, vote.computor_index) {
            Some(slot) => slot,
            None => return RecordOutcome::Duplicate,
        };
        let mut guard = slot.lock().unwrap();
        match guard.as_ref() {
            Some(existing) => {
                if existing.same_commitment(vote) {
                    RecordOutcome::Duplicate
                } else {
                    drop(guard);
                    self.mark_faulty(vote.computor_index);
                    RecordOutcome::Conflict
                }
            }
            None => {
                *guard = Some(*vote);
                RecordOutcome::Stored
            }
        }
    }

    pub fn vote(&self, tick: u32, computor_index: u16) -> Option<TickVote> {
        self.vote_slot(tick, computor_index)
            .and_then(|slot| *slot.lock().unwrap())
    }

    /// Number of votes recorded for one tick.
    pub fn votes_recorded(&self, tick: u32) -> usize {
        (0..NUMBER_OF_COMPUTORS as u16)
            .filter(|&i| self.vote(tick, i).is_some())
            .count()
    }

    /// Store verified tick data. Differing re-receipt from the same proposer
    /// flags it faulty, matching the vote rule.
    pub fn record_tick_data(&self, data: TickData) -> RecordOutcome {
        if !self.in_range(data.tick) {
            return RecordOutcome::Duplicate;
        }
        let index = (data.tick - self.initial_tick()) as usize;
        let mut guard = self.tick_data.lock().unwrap();
        match &guard[index] {
            Some(existing) => {
                if existing.time != data.time
                    || existing.transaction_digests != data.transaction_digests
                {
                    let computor_index = data.computor_index;
                    drop(guard);
                    self.mark_faulty(computor_index);
                    RecordOutcome::Conflict
                } else {
                    RecordOutcome::Duplicate
                }
            }
            None => {
                guard[index] = Some(data);
                RecordOutcome::Stored
            }
        }
    }

    /// Install tick data unconditionally; used once the quorum has fixed the
    /// target digest and this data matches it.
    pub fn force_tick_data(&self, data: TickData) {
        if !self.in_range(data.tick) {
            return;
        }
        let index = (data.tick - self.initial_tick()) as usize;
        self.tick_data.lock().unwrap()[index] = Some(data);
    }

    pub fn tick_data(&self, tick: u32) -> Option<TickData> {
        if !self.in_range(tick) {
            return None;
        }
        let index = (tick - self.initial_tick()) as usize;
        self.tick_data.lock().unwrap()[index].clone()
    }

    pub fn has_tick_data(&self, tick: u32) -> bool {
        self.tick_data(tick).is_some()
    }

    /// Quorum decided the tick's data digest is wrong (or zero); drop it.
    pub fn clear_tick_data(&self, tick: u32) {
        if !self.in_range(tick) {
            return;
        }
        let index = (tick - self.initial_tick()) as usize;
        self.tick_data.lock().unwrap()[index] = None;
    }

    pub fn mark_faulty(&self, computor_index: u16) {
        let mut faulty = self.faulty.lock().unwrap();
        faulty[computor_index as usize >> 6] |= 1u64 << (computor_index & 63);
    }

    pub fn is_faulty(&self, computor_index: u16) -> bool {
        let faulty = self.faulty.lock().unwrap();
        faulty[computor_index as usize >> 6] & (1u64 << (computor_index & 63)) != 0
    }

    pub fn faulty_count(&self) -> usize {
        let faulty = self.faulty.lock().unwrap();
        faulty.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Epoch rollover: forget everything and rebase the ring.
    pub fn reset(&self, new_initial_tick: u32) {
        for slot in &self.votes {
            *slot.lock().unwrap() = None;
        }
        let mut tick_data = self.tick_data.lock().unwrap();
        tick_data.iter_mut().for_each(|slot| *slot = None);
        let mut faulty = self.faulty.lock().unwrap();
        faulty.iter_mut().for_each(|word| *word = 0);
        *self.initial_tick.lock().unwrap() = new_initial_tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{crypto, Digest};

    fn vote(tick: u32, computor_index: u16, seed: &[u8]) -> TickVote {
        TickVote {
            computor_index,
            epoch: 1,
            tick,
            prev_spectrum_digest: crypto::digest(seed),
            ..Default::default()
        }
    }

    #[test]
    fn vote_uniqueness_and_conflict_flagging() {
        let log = TickLog::new(100, 16);
        let first = vote(100, 5, b"a");

        assert_eq!(log.record_vote(&first), RecordOutcome::Stored);
        assert_eq!(log.record_vote(&first), RecordOutcome::Duplicate);
        assert!(!log.is_faulty(5));

        // Same slot, different commitment: the stored vote stays, the
        // computor is flagged.
        let conflicting = vote(100, 5, b"b");
        assert_eq!(log.record_vote(&conflicting), RecordOutcome::Conflict);
        assert!(log.is_faulty(5));
        assert_eq!(log.vote(100, 5).unwrap().prev_spectrum_digest, crypto::digest(b"a"));
        assert_eq!(log.faulty_count(), 1);
    }

    #[test]
    fn out_of_range_votes_are_dropped() {
        let log = TickLog::new(100, 16);
        assert_eq!(log.record_vote(&vote(99, 0, b"x")), RecordOutcome::Duplicate);
        assert_eq!(log.record_vote(&vote(116, 0, b"x")), RecordOutcome::Duplicate);
        assert_eq!(log.votes_recorded(99), 0);
    }

    #[test]
    fn tick_data_conflict_marks_proposer() {
        let log = TickLog::new(100, 16);
        let mut data = TickData {
            computor_index: 100 % NUMBER_OF_COMPUTORS as u16,
            epoch: 1,
            tick: 100,
            ..Default::default()
        };
        assert_eq!(log.record_tick_data(data.clone()), RecordOutcome::Stored);
        assert_eq!(log.record_tick_data(data.clone()), RecordOutcome::Duplicate);

        data.transaction_digests[0] = Digest::from_bytes([1u8; 32]);
        assert_eq!(log.record_tick_data(data.clone()), RecordOutcome::Conflict);
        assert!(log.is_faulty(data.computor_index));
    }

    #[test]
    fn reset_rebases_the_ring() {
        let log = TickLog::new(100, 16);
        log.record_vote(&vote(100, 1, b"a"));
        log.mark_faulty(3);

        log.reset(200);
        assert_eq!(log.initial_tick(), 200);
        assert_eq!(log.vote(100, 1), None);
        assert!(!log.is_faulty(3));
        assert!(log.in_range(200));
        assert!(!log.in_range(100));
    }
}
