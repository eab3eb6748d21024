// Score oracle interface
// The proof-of-useful-work scorer is an external collaborator; the core
// only consumes its verdicts.

use tessera_core::PublicKey;

/// Scores a miner's nonce. Implementations must be deterministic across the
/// whole committee or consensus on the resource-testing digest breaks.
pub trait ScoreOracle: Send + Sync {
    fn score(&self, public_key: &PublicKey, nonce: &[u8; 32]) -> u32;
}

/// Fixed-score oracle for tests and benchmarking setups.
pub struct ConstantScorer(pub u32);

impl ScoreOracle for ConstantScorer {
    fn score(&self, _public_key: &PublicKey, _nonce: &[u8; 32]) -> u32 {
        self.0
    }
}
