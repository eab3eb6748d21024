// Spectrum store
// Open-addressed map public key → balance record, Merkle-digested

use crate::merkle::DigestTree;
use tessera_core::{crypto, Amount, Digest, Entity, PublicKey};

/// The balance table. Probing starts at the first 32 bits of the public key
/// modulo capacity and walks linearly until a match or a zero slot. A slot,
/// once installed, is only ever vacated by the epoch compaction pass.
pub struct Spectrum {
    capacity: usize,
    mask: u32,
    entities: Vec<Entity>,
    tree: DigestTree,
    number_of_entities: u32,
}

impl Spectrum {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity >= 2);
        Spectrum {
            capacity,
            mask: (capacity - 1) as u32,
            entities: vec![Entity::default(); capacity],
            tree: DigestTree::new(capacity),
            number_of_entities: 0,
        }
    }

    /// Rebuild from a snapshot dump.
    pub fn from_entities(capacity: usize, entities: Vec<Entity>) -> Self {
        assert_eq!(entities.len(), capacity);
        let number_of_entities =
            entities.iter().filter(|e| !e.is_empty() && e.balance() != 0).count() as u32;
        let mut spectrum = Spectrum {
            capacity,
            mask: (capacity - 1) as u32,
            entities,
            tree: DigestTree::new(capacity),
            number_of_entities,
        };
        spectrum.tree.mark_all();
        spectrum
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn depth(&self) -> usize {
        self.capacity.trailing_zeros() as usize
    }

    pub fn number_of_entities(&self) -> u32 {
        self.number_of_entities
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, index: usize) -> &Entity {
        &self.entities[index]
    }

    /// Linear probe for an existing record. Zero keys never resolve.
    pub fn index_of(&self, public_key: &PublicKey) -> Option<usize> {
        if public_key.is_zero() {
            return None;
        }
        let mut index = (public_key.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            if self.entities[index].public_key == *public_key {
                return Some(index);
            }
            if self.entities[index].is_empty() {
                return None;
            }
            index = (index + 1) & self.mask as usize;
        }
        None
    }

    pub fn balance(&self, index: usize) -> Amount {
        self.entities[index].balance()
    }

    /// Add funds, installing a record on the first zero slot of the probe
    /// chain if the key is new. Fails silently on a zero key or a negative
    /// amount.
    pub fn credit(&mut self, public_key: &PublicKey, amount: Amount, tick: u32) {
        if public_key.is_zero() || amount < 0 {
            return;
        }
        let mut index = (public_key.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            let entity = &mut self.entities[index];
            if entity.public_key == *public_key {
                entity.incoming_amount += amount;
                entity.number_of_incoming_transfers += 1;
                entity.latest_incoming_transfer_tick = tick;
                return;
            }
            if entity.is_empty() {
                entity.public_key = *public_key;
                entity.incoming_amount = amount;
                entity.number_of_incoming_transfers = 1;
                entity.latest_incoming_transfer_tick = tick;
                self.number_of_entities += 1;
                return;
            }
            index = (index + 1) & self.mask as usize;
        }
        // Capacity exhaustion has no recovery within a tick; only the epoch
        // compaction can free slots.
    }

    /// Withdraw funds when covered; the record is updated and `true`
    /// returned only if the balance suffices.
    pub fn debit(&mut self, index: usize, amount: Amount, tick: u32) -> bool {
        if amount < 0 {
            return false;
        }
        let entity = &mut self.entities[index];
        if entity.balance() < amount {
            return false;
        }
        entity.outgoing_amount += amount;
        entity.number_of_outgoing_transfers += 1;
        entity.latest_outgoing_transfer_tick = tick;
        true
    }

    /// Flag every record that moved funds during `tick` for digest
    /// recomputation. Runs once per tick on the tick processor.
    pub fn refresh_changes_for_tick(&mut self, tick: u32) {
        for index in 0..self.capacity {
            let entity = &self.entities[index];
            if entity.latest_incoming_transfer_tick == tick
                || entity.latest_outgoing_transfer_tick == tick
            {
                self.tree.mark(index);
            }
        }
    }

    /// Merkle root over all records. O(1) when nothing is flagged.
    pub fn digest(&mut self) -> Digest {
        let entities = &self.entities;
        self.tree.root_with(|i| crypto::digest(&entities[i].encode()))
    }

    /// Merkle path for one slot against the current root.
    pub fn siblings(&mut self, index: usize) -> Vec<Digest> {
        self.digest();
        self.tree.siblings(index)
    }

    /// First occupied slot after the given key's slot, in table order. Used
    /// by the contract VM's entity iteration.
    pub fn next_id(&self, current: &PublicKey) -> PublicKey {
        let start = match self.index_of(current) {
            Some(index) => index + 1,
            None => 0,
        };
        for index in start..self.capacity {
            if !self.entities[index].is_empty() {
                return self.entities[index].public_key;
            }
        }
        PublicKey::ZERO
    }

    /// Epoch compaction: rehash every record with a non-zero balance into a
    /// fresh table via the same probe function, then rebuild the full tree.
    pub fn compact(&mut self) {
        let mut fresh = vec![Entity::default(); self.capacity];
        for entity in &self.entities {
            if entity.balance() != 0 {
                let mut index = (entity.public_key.slot_prefix() & self.mask) as usize;
                loop {
                    if fresh[index].is_empty() {
                        fresh[index] = *entity;
                        break;
                    }
                    index = (index + 1) & self.mask as usize;
                }
            }
        }
        self.entities = fresh;
        self.tree.mark_all();
        self.number_of_entities =
            self.entities.iter().filter(|e| !e.is_empty()).count() as u32;
    }

    /// Total of all balances; conservation checks sum this against issuance.
    pub fn total_balance(&self) -> i128 {
        self.entities.iter().map(|e| e.balance() as i128).sum()
    }
}
