// Transaction arena
// One packed byte buffer per epoch; ticks index into it by slot

use std::sync::Mutex;
use tessera_core::{
    Transaction, NUMBER_OF_TRANSACTIONS_PER_TICK, SIGNATURE_SIZE, TRANSACTION_PREFIX_SIZE,
};

/// Offsets below this are reserved so that offset zero can mean "unset".
pub const FIRST_TICK_TRANSACTION_OFFSET: usize = 8;

struct ArenaInner {
    buffer: Vec<u8>,
    next_offset: usize,
    /// `offsets[(tick - initial) * slots + slot]`; zero iff unset.
    offsets: Vec<u64>,
    initial_tick: u32,
}

/// Append-only arena of wire-encoded transactions. Overflow silently drops
/// the newest transaction; slots are never overwritten.
pub struct TransactionArena {
    max_ticks: usize,
    inner: Mutex<ArenaInner>,
}

impl TransactionArena {
    pub fn new(initial_tick: u32, max_ticks: usize, buffer_size: usize) -> Self {
        TransactionArena {
            max_ticks,
            inner: Mutex::new(ArenaInner {
                buffer: vec![0u8; buffer_size],
                next_offset: FIRST_TICK_TRANSACTION_OFFSET,
                offsets: vec![0u64; max_ticks * NUMBER_OF_TRANSACTIONS_PER_TICK],
                initial_tick,
            }),
        }
    }

    fn slot_index(&self, inner: &ArenaInner, tick: u32, slot: usize) -> Option<usize> {
        if tick < inner.initial_tick
            || tick >= inner.initial_tick + self.max_ticks as u32
            || slot >= NUMBER_OF_TRANSACTIONS_PER_TICK
        {
            return None;
        }
        Some((tick - inner.initial_tick) as usize * NUMBER_OF_TRANSACTIONS_PER_TICK + slot)
    }

    /// Append a transaction for `(tick, slot)`. Returns false when the slot
    /// is already filled, the tick is out of range, or the arena is full.
    pub fn store(&self, tick: u32, slot: usize, transaction: &Transaction) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let index = match self.slot_index(&inner, tick, slot) {
            Some(index) => index,
            None => return false,
        };
        if inner.offsets[index] != 0 {
            return false;
        }
        let bytes = transaction.encode();
        if inner.next_offset + bytes.len() > inner.buffer.len() {
            return false;
        }
        let offset = inner.next_offset;
        inner.buffer[offset..offset + bytes.len()].copy_from_slice(&bytes);
        inner.offsets[index] = offset as u64;
        inner.next_offset += bytes.len();
        true
    }

    pub fn has(&self, tick: u32, slot: usize) -> bool {
        let inner = self.inner.lock().unwrap();
        self.slot_index(&inner, tick, slot)
            .map(|index| inner.offsets[index] != 0)
            .unwrap_or(false)
    }

    pub fn get(&self, tick: u32, slot: usize) -> Option<Transaction> {
        let inner = self.inner.lock().unwrap();
        let index = self.slot_index(&inner, tick, slot)?;
        let offset = inner.offsets[index] as usize;
        if offset == 0 {
            return None;
        }
        // The stored encoding declares its own input size; recover the full
        // wire length from the prefix.
        let input_size = u16::from_le_bytes(
            inner.buffer[offset + 78..offset + 80].try_into().ok()?,
        ) as usize;
        let size = TRANSACTION_PREFIX_SIZE + input_size + SIGNATURE_SIZE;
        Transaction::decode(&inner.buffer[offset..offset + size]).ok()
    }

    /// Bytes still free in the buffer.
    pub fn remaining(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.buffer.len() - inner.next_offset
    }

    /// Epoch rollover: free the arena and rebase.
    pub fn reset(&self, new_initial_tick: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_offset = FIRST_TICK_TRANSACTION_OFFSET;
        inner.offsets.iter_mut().for_each(|offset| *offset = 0);
        inner.initial_tick = new_initial_tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{KeyPair, PublicKey};

    fn transaction(amount: i64) -> Transaction {
        let keypair = KeyPair::generate();
        Transaction::new_signed(&keypair, PublicKey::from_bytes([1u8; 32]), amount, 10, 0, vec![])
    }

    #[test]
    fn store_and_get() {
        let arena = TransactionArena::new(100, 8, 4096);
        let tx = transaction(7);

        assert!(arena.store(103, 5, &tx));
        assert!(arena.has(103, 5));
        assert_eq!(arena.get(103, 5), Some(tx));
        assert_eq!(arena.get(103, 4), None);
    }

    #[test]
    fn slots_are_never_overwritten() {
        let arena = TransactionArena::new(100, 8, 4096);
        let first = transaction(1);
        let second = transaction(2);

        assert!(arena.store(100, 0, &first));
        assert!(!arena.store(100, 0, &second));
        assert_eq!(arena.get(100, 0), Some(first));
    }

    #[test]
    fn overflow_drops_newest() {
        let tx = transaction(1);
        let arena = TransactionArena::new(100, 8, FIRST_TICK_TRANSACTION_OFFSET + tx.wire_size());

        assert!(arena.store(100, 0, &tx));
        assert!(!arena.store(100, 1, &transaction(2)));
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn out_of_range_ticks_rejected() {
        let arena = TransactionArena::new(100, 8, 4096);
        assert!(!arena.store(99, 0, &transaction(1)));
        assert!(!arena.store(108, 0, &transaction(1)));
    }

    #[test]
    fn reset_frees_everything() {
        let arena = TransactionArena::new(100, 8, 4096);
        assert!(arena.store(100, 0, &transaction(1)));

        arena.reset(200);
        assert!(!arena.has(100, 0));
        assert!(arena.store(200, 0, &transaction(2)));
    }
}
