// Miner ranking
// Score table ordered by bubble passes, and the future-committee derivation

use tessera_core::{crypto, PublicKey, MAX_NUMBER_OF_MINERS, NUMBER_OF_COMPUTORS, QUORUM};

const COMPETITOR_SLOTS: usize = (NUMBER_OF_COMPUTORS - QUORUM) * 2;

/// Miners ranked by accepted solutions. The first 676 positions are the
/// standing of the current committee; candidates queue behind them.
pub struct MinerTable {
    public_keys: Vec<PublicKey>,
    scores: Vec<u32>,
    solution_flags: Vec<u64>,
    flag_mask: u32,
    pub minimum_computor_score: u32,
    pub minimum_candidate_score: u32,
}

impl MinerTable {
    /// `solution_flag_bits` bounds the dedup bitmap for (miner, nonce)
    /// fingerprints; must be a power of two.
    pub fn new(solution_flag_bits: u64) -> Self {
        assert!(solution_flag_bits.is_power_of_two() && solution_flag_bits >= 64);
        MinerTable {
            public_keys: Vec::new(),
            scores: Vec::new(),
            solution_flags: vec![0u64; (solution_flag_bits / 64) as usize],
            flag_mask: (solution_flag_bits - 1) as u32,
            minimum_computor_score: 0,
            minimum_candidate_score: 0,
        }
    }

    pub fn number_of_miners(&self) -> usize {
        self.public_keys.len()
    }

    pub fn score_of(&self, public_key: &PublicKey) -> Option<u32> {
        self.public_keys
            .iter()
            .position(|pk| pk == public_key)
            .map(|index| self.scores[index])
    }

    /// Committee install: the committee keys become the leading miners with
    /// fresh scores.
    pub fn seed_committee(&mut self, computors: &[PublicKey]) {
        self.public_keys = computors.to_vec();
        self.scores = vec![0u32; self.public_keys.len()];
    }

    /// Mark a (miner, nonce) pair as seen. Returns false when the
    /// fingerprint was already set.
    pub fn check_and_set_solution_flag(&mut self, public_key: &PublicKey, nonce: &[u8; 32]) -> bool {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(public_key.as_bytes());
        data[32..].copy_from_slice(nonce);
        let flag_index = crypto::fingerprint32(&data) & self.flag_mask;
        let word = &mut self.solution_flags[(flag_index >> 6) as usize];
        let bit = 1u64 << (flag_index & 63);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        true
    }

    /// Bump a miner's score and bubble it towards the front. Committee
    /// positions and candidate positions sort independently, matching the
    /// ranking the committee reshape uses.
    pub fn add_score(&mut self, public_key: &PublicKey) {
        let mut index = match self.public_keys.iter().position(|pk| pk == public_key) {
            Some(index) => {
                self.scores[index] += 1;
                index
            }
            None => {
                if self.public_keys.len() >= MAX_NUMBER_OF_MINERS {
                    return;
                }
                self.public_keys.push(*public_key);
                self.scores.push(1);
                self.public_keys.len() - 1
            }
        };
        let floor = if index < NUMBER_OF_COMPUTORS { 0 } else { NUMBER_OF_COMPUTORS };
        while index > floor && self.scores[index - 1] < self.scores[index] {
            self.public_keys.swap(index - 1, index);
            self.scores.swap(index - 1, index);
            index -= 1;
        }
    }

    /// Recompute the top-676 ranking: the top QUORUM miners stay confirmed;
    /// positions [QUORUM, 676) compete against the best queued candidates.
    /// Returns the future committee and updates the minimum scores.
    pub fn future_committee(&mut self) -> Vec<PublicKey> {
        let mut competitor_keys = vec![PublicKey::ZERO; COMPETITOR_SLOTS];
        let mut competitor_scores = vec![0u32; COMPETITOR_SLOTS];
        let mut competitor_is_computor = vec![false; COMPETITOR_SLOTS];

        for i in 0..NUMBER_OF_COMPUTORS - QUORUM {
            if QUORUM + i < self.public_keys.len() {
                competitor_keys[i] = self.public_keys[QUORUM + i];
                competitor_scores[i] = self.scores[QUORUM + i];
            }
            competitor_is_computor[i] = true;

            let candidate = NUMBER_OF_COMPUTORS + i;
            let slot = i + (NUMBER_OF_COMPUTORS - QUORUM);
            if candidate < self.public_keys.len() {
                competitor_keys[slot] = self.public_keys[candidate];
                competitor_scores[slot] = self.scores[candidate];
            }
            competitor_is_computor[slot] = false;
        }

        // Merge the candidate half into the ranking by stable insertion.
        for i in NUMBER_OF_COMPUTORS - QUORUM..COMPETITOR_SLOTS {
            let mut j = i;
            while j > 0 && competitor_scores[j - 1] < competitor_scores[j] {
                competitor_keys.swap(j - 1, j);
                competitor_scores.swap(j - 1, j);
                competitor_is_computor.swap(j - 1, j);
                j -= 1;
            }
        }

        self.minimum_computor_score = competitor_scores[NUMBER_OF_COMPUTORS - QUORUM - 1];

        let mut candidate_counter = 0usize;
        self.minimum_candidate_score = self.minimum_computor_score;
        for i in 0..COMPETITOR_SLOTS {
            if !competitor_is_computor[i] {
                self.minimum_candidate_score = competitor_scores[i];
                candidate_counter += 1;
            }
        }
        if candidate_counter < NUMBER_OF_COMPUTORS - QUORUM {
            self.minimum_candidate_score = self.minimum_computor_score;
        }

        let mut future = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..QUORUM {
            future.push(self.public_keys.get(i).copied().unwrap_or(PublicKey::ZERO));
        }
        for i in 0..NUMBER_OF_COMPUTORS - QUORUM {
            future.push(competitor_keys[i]);
        }
        future
    }
}
