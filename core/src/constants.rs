// Protocol tuning constants
// Every value here is consensus-critical and must agree across the committee.

/// Number of committee members per epoch.
pub const NUMBER_OF_COMPUTORS: usize = 676;

/// Votes required to finalize a tick: 2/3 of the committee plus one.
pub const QUORUM: usize = NUMBER_OF_COMPUTORS * 2 / 3 + 1;

/// Target wall-clock duration of one tick.
pub const TARGET_TICK_DURATION_MS: u64 = 4000;

/// How often missing votes and tick data are re-requested.
pub const TICK_REQUESTING_PERIOD_MS: u64 = 500;

pub const PEER_REFRESHING_PERIOD_MS: u64 = 120_000;
pub const SYSTEM_DATA_SAVING_PERIOD_MS: u64 = 300_000;

/// Maximum tolerated clock skew of a tick-data timestamp against local time.
pub const TIME_ACCURACY_MS: u64 = 60_000;

/// Ticks per one-week epoch, rounded up to a whole committee rotation.
pub const MAX_NUMBER_OF_TICKS_PER_EPOCH: usize =
    ((60 * 60 * 24 * 7 / (TARGET_TICK_DURATION_MS as usize / 1000) + NUMBER_OF_COMPUTORS - 1)
        / NUMBER_OF_COMPUTORS)
        * NUMBER_OF_COMPUTORS;

/// A proposer commits to tick data two ticks ahead of the tick it processes.
pub const TICK_TRANSACTIONS_PUBLICATION_OFFSET: u32 = 2;

/// Lower bound of the randomized delay before publishing an own solution.
pub const MIN_MINING_SOLUTIONS_PUBLICATION_OFFSET: u32 = 3;

pub const NUMBER_OF_TRANSACTIONS_PER_TICK: usize = 1024;
pub const MAX_TRANSACTION_SIZE: usize = 1024;

/// Arena sizing divisor: on average only one tick slot in six carries a
/// maximum-size transaction.
pub const TRANSACTION_SPARSENESS: usize = 6;

pub const SIGNATURE_SIZE: usize = 64;
pub const DIGEST_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;

/// New supply minted per epoch, distributed by the epoch controller.
pub const ISSUANCE_RATE: i64 = 1_000_000_000_000;
pub const MAX_AMOUNT: i64 = ISSUANCE_RATE * 1000;

/// Minimum balance an entity needs before the node relays its messages.
pub const MESSAGE_DISSEMINATION_THRESHOLD: i64 = 1_000_000_000;

/// Balance table capacity. Must be a power of two.
pub const SPECTRUM_CAPACITY: usize = 1 << 24;
pub const SPECTRUM_DEPTH: usize = 24;

/// Asset table capacity. Must be a power of two.
pub const ASSETS_CAPACITY: usize = 1 << 24;

pub const MAX_NUMBER_OF_CONTRACTS: usize = 1024;

pub const MAX_NUMBER_OF_MINERS: usize = 8192;
pub const MAX_NUMBER_OF_SOLUTIONS: usize = 65536;
pub const NUMBER_OF_MINER_SOLUTION_FLAG_BITS: u64 = 1 << 32;

/// Minimum score the oracle must report for a nonce to count as a solution.
/// Defined outside the core in the reference deployment; the whole committee
/// must agree on it.
pub const SOLUTION_THRESHOLD: u32 = 45;

pub const NUMBER_OF_EXCHANGED_PEERS: usize = 4;
pub const MAX_NUMBER_OF_PUBLIC_PEERS: usize = 1024;

/// Frames processed between dejavu plane swaps.
pub const DEJAVU_SWAP_LIMIT: u32 = 1_000_000;

/// log2 of the dejavu bitmap size in bits (two planes of 2^32 bits each).
pub const DEJAVU_BITS_LOG2: u32 = 32;

pub const REQUEST_QUEUE_BUFFER_SIZE: usize = 1 << 30;
pub const REQUEST_QUEUE_LENGTH: usize = 65536;
pub const RESPONSE_QUEUE_BUFFER_SIZE: usize = 1 << 30;
pub const RESPONSE_QUEUE_LENGTH: usize = 65536;

pub const PORT: u16 = 21841;

/// Calendar day index of the epoch-0 cut-over. The cut-over for epoch E falls
/// on day `EPOCH_BASE_DAY_INDEX + E * 7` at 12:00. Fixed network baseline;
/// verify against the live network before changing.
pub const EPOCH_BASE_DAY_INDEX: u32 = 738_570;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_two_thirds_plus_one() {
        assert_eq!(QUORUM, 451);
    }

    #[test]
    fn ticks_per_epoch_is_whole_rotations() {
        assert_eq!(MAX_NUMBER_OF_TICKS_PER_EPOCH % NUMBER_OF_COMPUTORS, 0);
        assert!(
            MAX_NUMBER_OF_TICKS_PER_EPOCH * TARGET_TICK_DURATION_MS as usize / 1000
                >= 60 * 60 * 24 * 7
        );
    }
}
