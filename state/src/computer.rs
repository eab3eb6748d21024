// Computer store
// Per-contract state blobs with a Merkle digest over fixed slots

use crate::merkle::DigestTree;
use tessera_core::{crypto, Amount, Digest, PublicKey, MAX_NUMBER_OF_CONTRACTS, NUMBER_OF_COMPUTORS};

/// Contract states. Slot 0 is the system contract holding the per-contract
/// fee reserves; contracts below their construction epoch hold an IPO book
/// instead of their own state.
pub struct Computer {
    states: Vec<Vec<u8>>,
    tree: DigestTree,
}

/// State size of the system contract: one fee reserve per contract slot.
pub const CONTRACT_0_STATE_SIZE: usize = MAX_NUMBER_OF_CONTRACTS * 8;

impl Computer {
    /// `state_sizes[i]` is the compile-time-fixed state size of contract `i`.
    /// Slots past the provided sizes digest to zero.
    pub fn new(state_sizes: &[usize]) -> Self {
        assert!(state_sizes.len() <= MAX_NUMBER_OF_CONTRACTS);
        let states = state_sizes.iter().map(|&size| vec![0u8; size]).collect();
        Computer {
            states,
            tree: DigestTree::new(MAX_NUMBER_OF_CONTRACTS),
        }
    }

    pub fn contract_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, index: usize) -> &[u8] {
        &self.states[index]
    }

    /// Mutable state access; the slot is flagged for digest recomputation.
    pub fn state_mut(&mut self, index: usize) -> &mut [u8] {
        self.tree.mark(index);
        &mut self.states[index]
    }

    pub fn mark_changed(&mut self, index: usize) {
        self.tree.mark(index);
    }

    /// Replace one contract's state from a snapshot.
    pub fn restore_state(&mut self, index: usize, state: Vec<u8>) {
        assert_eq!(state.len(), self.states[index].len());
        self.states[index] = state;
        self.tree.mark(index);
    }

    /// Merkle root over all contract slots. O(1) when nothing changed.
    pub fn digest(&mut self) -> Digest {
        let states = &self.states;
        self.tree.root_with(|i| {
            match states.get(i) {
                Some(state) if !state.is_empty() => crypto::digest(state),
                _ => Digest::ZERO,
            }
        })
    }

    pub fn fee_reserve(&self, contract_index: usize) -> Amount {
        let offset = contract_index * 8;
        i64::from_le_bytes(self.states[0][offset..offset + 8].try_into().unwrap())
    }

    pub fn set_fee_reserve(&mut self, contract_index: usize, amount: Amount) {
        let offset = contract_index * 8;
        self.states[0][offset..offset + 8].copy_from_slice(&amount.to_le_bytes());
        self.tree.mark(0);
    }
}

/// IPO book held in the state slot of a contract that has not reached its
/// construction epoch: the 676 highest bids, sorted descending by price.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipo {
    pub public_keys: Vec<PublicKey>,
    pub prices: Vec<i64>,
}

/// Fixed blob layout: 676 keys then 676 prices.
pub const IPO_STATE_SIZE: usize = NUMBER_OF_COMPUTORS * (32 + 8);

impl Default for Ipo {
    fn default() -> Self {
        Ipo {
            public_keys: vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS],
            prices: vec![0i64; NUMBER_OF_COMPUTORS],
        }
    }
}

impl Ipo {
    pub fn load(state: &[u8]) -> Self {
        assert!(state.len() >= IPO_STATE_SIZE);
        let mut ipo = Ipo::default();
        for i in 0..NUMBER_OF_COMPUTORS {
            let mut pk = [0u8; 32];
            pk.copy_from_slice(&state[i * 32..i * 32 + 32]);
            ipo.public_keys[i] = PublicKey::from_bytes(pk);
        }
        let prices_offset = NUMBER_OF_COMPUTORS * 32;
        for i in 0..NUMBER_OF_COMPUTORS {
            ipo.prices[i] = i64::from_le_bytes(
                state[prices_offset + i * 8..prices_offset + i * 8 + 8].try_into().unwrap(),
            );
        }
        ipo
    }

    pub fn store(&self, state: &mut [u8]) {
        assert!(state.len() >= IPO_STATE_SIZE);
        for i in 0..NUMBER_OF_COMPUTORS {
            state[i * 32..i * 32 + 32].copy_from_slice(self.public_keys[i].as_bytes());
        }
        let prices_offset = NUMBER_OF_COMPUTORS * 32;
        for i in 0..NUMBER_OF_COMPUTORS {
            state[prices_offset + i * 8..prices_offset + i * 8 + 8]
                .copy_from_slice(&self.prices[i].to_le_bytes());
        }
    }

    /// The lowest retained bid; the settlement price at the epoch boundary.
    pub fn final_price(&self) -> i64 {
        self.prices[NUMBER_OF_COMPUTORS - 1]
    }

    /// Insert one bid. If it beats the lowest retained bid, the displaced
    /// bidder is returned for refunding and the new bid bubbles into
    /// position; a price tie keeps the earlier bidder. Otherwise the bid is
    /// itself the refund.
    pub fn insert_bid(&mut self, bidder: PublicKey, price: i64) -> BidOutcome {
        if price <= self.final_price() {
            return BidOutcome::Rejected;
        }
        let displaced = (
            self.public_keys[NUMBER_OF_COMPUTORS - 1],
            self.prices[NUMBER_OF_COMPUTORS - 1],
        );
        self.public_keys[NUMBER_OF_COMPUTORS - 1] = bidder;
        self.prices[NUMBER_OF_COMPUTORS - 1] = price;
        let mut j = NUMBER_OF_COMPUTORS - 1;
        while j > 0 && self.prices[j - 1] < self.prices[j] {
            self.public_keys.swap(j - 1, j);
            self.prices.swap(j - 1, j);
            j -= 1;
        }
        BidOutcome::Inserted {
            displaced_bidder: displaced.0,
            displaced_price: displaced.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BidOutcome {
    /// The bid did not beat the book; the bid amount goes straight back.
    Rejected,
    /// The bid took the last slot; the displaced bid (possibly a zero
    /// placeholder) is refunded.
    Inserted {
        displaced_bidder: PublicKey,
        displaced_price: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_tracks_state_mutation() {
        let mut computer = Computer::new(&[CONTRACT_0_STATE_SIZE, 64]);
        let initial = computer.digest();

        computer.state_mut(1)[0] = 0xFF;
        let updated = computer.digest();
        assert_ne!(updated, initial);
        assert_eq!(computer.digest(), updated);
    }

    #[test]
    fn fee_reserves_live_in_contract_zero() {
        let mut computer = Computer::new(&[CONTRACT_0_STATE_SIZE, 64]);
        let before = computer.digest();
        computer.set_fee_reserve(1, 16900);
        assert_eq!(computer.fee_reserve(1), 16900);
        assert_ne!(computer.digest(), before);
    }

    #[test]
    fn ipo_round_trip_through_state_blob() {
        let mut ipo = Ipo::default();
        ipo.insert_bid(PublicKey::from_bytes([1u8; 32]), 500);

        let mut blob = vec![0u8; IPO_STATE_SIZE];
        ipo.store(&mut blob);
        assert_eq!(Ipo::load(&blob), ipo);
    }

    #[test]
    fn bids_sort_descending_and_displace_lowest() {
        let mut ipo = Ipo::default();
        for i in 0..NUMBER_OF_COMPUTORS {
            let mut pk = [0u8; 32];
            pk[0] = (i % 251) as u8;
            pk[1] = (i / 251) as u8;
            pk[31] = 1;
            assert!(matches!(
                ipo.insert_bid(PublicKey::from_bytes(pk), (i + 1) as i64),
                BidOutcome::Inserted { .. }
            ));
        }
        assert_eq!(ipo.final_price(), 1);
        assert_eq!(ipo.prices[0], NUMBER_OF_COMPUTORS as i64);

        // A losing bid bounces; a winning bid displaces the weakest.
        assert_eq!(
            ipo.insert_bid(PublicKey::from_bytes([9u8; 32]), 1),
            BidOutcome::Rejected
        );
        match ipo.insert_bid(PublicKey::from_bytes([9u8; 32]), 700) {
            BidOutcome::Inserted { displaced_price, .. } => assert_eq!(displaced_price, 1),
            BidOutcome::Rejected => panic!("winning bid rejected"),
        }
        assert_eq!(ipo.prices[0], 700);
        assert_eq!(ipo.final_price(), 2);
    }

    #[test]
    fn price_tie_keeps_earlier_bidder() {
        let mut ipo = Ipo::default();
        let first = PublicKey::from_bytes([1u8; 32]);
        let second = PublicKey::from_bytes([2u8; 32]);
        ipo.insert_bid(first, 100);
        ipo.insert_bid(second, 100);
        assert_eq!(ipo.public_keys[0], first);
        assert_eq!(ipo.public_keys[1], second);
    }
}
