// System record
// The node's persistent consensus position, snapshotted as `system.NNN`

use serde::{Deserialize, Serialize};
use tessera_core::{Ballot, Proposal, PublicKey, TickTime, NUMBER_OF_COMPUTORS};

pub const SYSTEM_VERSION: u16 = 1;

/// A mining solution admitted by the score oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub computor_public_key: PublicKey,
    pub nonce: [u8; 32],
}

/// Everything the node must remember across restarts to resume its epoch:
/// position counters, governance state, admitted solutions, and the ranked
/// future committee.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct System {
    pub version: u16,
    pub epoch: u16,
    pub tick: u32,
    pub initial_tick: u32,
    /// Highest tick for which this node emitted its own vote.
    pub latest_created_tick: u32,
    /// Highest tick for which this node proposed tick data.
    pub latest_led_tick: u32,
    /// Wall clock at the epoch's first tick.
    pub initial_time: TickTime,
    pub latest_operator_nonce: u64,
    pub proposals: Vec<Proposal>,
    pub ballots: Vec<Ballot>,
    pub solutions: Vec<Solution>,
    pub future_computors: Vec<PublicKey>,
}

impl System {
    pub fn new(epoch: u16, initial_tick: u32, initial_time: TickTime) -> Self {
        System {
            version: SYSTEM_VERSION,
            epoch,
            tick: initial_tick,
            initial_tick,
            latest_created_tick: 0,
            latest_led_tick: 0,
            initial_time,
            latest_operator_nonce: 0,
            proposals: vec![Proposal::default(); NUMBER_OF_COMPUTORS],
            ballots: vec![Ballot::default(); NUMBER_OF_COMPUTORS],
            solutions: Vec::new(),
            future_computors: vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS],
        }
    }

    /// Record a solution if it is not already known. Returns its index and
    /// whether it was newly added.
    pub fn admit_solution(&mut self, solution: Solution, limit: usize) -> (Option<usize>, bool) {
        for (index, existing) in self.solutions.iter().enumerate() {
            if existing.nonce == solution.nonce
                && existing.computor_public_key == solution.computor_public_key
            {
                return (Some(index), false);
            }
        }
        if self.solutions.len() < limit {
            self.solutions.push(solution);
            (Some(self.solutions.len() - 1), true)
        } else {
            (None, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solutions_deduplicate_by_nonce_and_key() {
        let mut system = System::new(1, 100, TickTime::default());
        let solution = Solution {
            computor_public_key: PublicKey::from_bytes([1u8; 32]),
            nonce: [2u8; 32],
        };

        assert_eq!(system.admit_solution(solution, 4), (Some(0), true));
        assert_eq!(system.admit_solution(solution, 4), (Some(0), false));

        let other = Solution {
            computor_public_key: PublicKey::from_bytes([1u8; 32]),
            nonce: [3u8; 32],
        };
        assert_eq!(system.admit_solution(other, 4), (Some(1), true));
    }

    #[test]
    fn solution_capacity_is_bounded() {
        let mut system = System::new(1, 100, TickTime::default());
        for i in 0..2u8 {
            let solution = Solution {
                computor_public_key: PublicKey::from_bytes([i; 32]),
                nonce: [i; 32],
            };
            system.admit_solution(solution, 2);
        }
        let overflow = Solution {
            computor_public_key: PublicKey::from_bytes([9u8; 32]),
            nonce: [9u8; 32],
        };
        assert_eq!(system.admit_solution(overflow, 2), (None, false));
    }
}
