// Entity-pending transactions
// One most-recent transaction (by declared target tick) per spectrum slot

use std::sync::Mutex;
use tessera_core::{Digest, Transaction};

#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub transaction: Transaction,
    pub digest: Digest,
}

/// Per-entity staging area used to back-fill a tick's transaction set when
/// only the digests are known, and to draw candidates when this node
/// proposes tick data.
pub struct PendingPool {
    slots: Mutex<Vec<Option<PendingEntry>>>,
}

impl PendingPool {
    pub fn new(capacity: usize) -> Self {
        PendingPool {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    /// Stage a transaction for its source entity. An occupant is replaced
    /// only by a strictly later target tick; on a tie the first writer wins.
    pub fn offer(&self, spectrum_index: usize, transaction: Transaction) -> bool {
        let mut slots = self.slots.lock().unwrap();
        let slot = &mut slots[spectrum_index];
        let replace = match slot {
            Some(existing) => existing.transaction.tick < transaction.tick,
            None => true,
        };
        if replace {
            let digest = transaction.digest();
            *slot = Some(PendingEntry { transaction, digest });
        }
        replace
    }

    pub fn get(&self, spectrum_index: usize) -> Option<PendingEntry> {
        self.slots.lock().unwrap()[spectrum_index].clone()
    }

    /// All staged transactions targeting `tick`.
    pub fn entries_for_tick(&self, tick: u32) -> Vec<(usize, PendingEntry)> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|entry| entry.transaction.tick == tick)
                    .map(|entry| (index, entry.clone()))
            })
            .collect()
    }

    /// Find a staged transaction by content digest, bounded to one tick.
    pub fn find_by_digest(&self, digest: &Digest, tick: u32) -> Option<Transaction> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|slot| slot.as_ref())
            .find(|entry| entry.transaction.tick == tick && entry.digest == *digest)
            .map(|entry| entry.transaction.clone())
    }

    /// Epoch rollover: drop everything.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap()
            .iter_mut()
            .for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{KeyPair, PublicKey};

    fn transaction(keypair: &KeyPair, tick: u32) -> Transaction {
        Transaction::new_signed(keypair, PublicKey::from_bytes([1u8; 32]), 5, tick, 0, vec![])
    }

    #[test]
    fn later_tick_replaces_earlier() {
        let pool = PendingPool::new(16);
        let keypair = KeyPair::generate();

        assert!(pool.offer(3, transaction(&keypair, 10)));
        assert!(pool.offer(3, transaction(&keypair, 12)));
        assert_eq!(pool.get(3).unwrap().transaction.tick, 12);

        // Older or equal target ticks never displace the occupant.
        assert!(!pool.offer(3, transaction(&keypair, 12)));
        assert!(!pool.offer(3, transaction(&keypair, 11)));
        assert_eq!(pool.get(3).unwrap().transaction.tick, 12);
    }

    #[test]
    fn lookup_by_digest_and_tick() {
        let pool = PendingPool::new(16);
        let keypair = KeyPair::generate();
        let tx = transaction(&keypair, 10);
        let digest = tx.digest();

        pool.offer(0, tx.clone());
        assert_eq!(pool.find_by_digest(&digest, 10), Some(tx));
        assert_eq!(pool.find_by_digest(&digest, 11), None);
    }

    #[test]
    fn entries_for_tick_filters() {
        let pool = PendingPool::new(16);
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        pool.offer(1, transaction(&a, 10));
        pool.offer(2, transaction(&b, 11));

        let staged = pool.entries_for_tick(10);
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].0, 1);

        pool.clear();
        assert!(pool.entries_for_tick(10).is_empty());
    }
}
