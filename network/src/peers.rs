// Public peer book
// IPv4 addresses learned from EXCHANGE_PUBLIC_PEERS gossip

use rand::seq::SliceRandom;
use std::sync::Mutex;
use tessera_core::{ExchangePublicPeers, MAX_NUMBER_OF_PUBLIC_PEERS, NUMBER_OF_EXCHANGED_PEERS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PublicPeer {
    address: [u8; 4],
    verified: bool,
}

/// The shareable address book. Verified addresses are ones we completed a
/// handshake with; only those (when any exist) are handed to other peers.
pub struct PeerBook {
    peers: Mutex<Vec<PublicPeer>>,
    /// Operator-pinned list: never forget anybody.
    is_static: bool,
}

fn is_routable(address: [u8; 4]) -> bool {
    !(address[0] == 0
        || address[0] == 127
        || address[0] == 10
        || (address[0] == 172 && (16..=31).contains(&address[1]))
        || (address[0] == 192 && address[1] == 168)
        || address[0] == 255)
}

impl PeerBook {
    pub fn new(is_static: bool) -> Self {
        PeerBook {
            peers: Mutex::new(Vec::new()),
            is_static,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add an address unless it is private, already known, or the book is
    /// full.
    pub fn add(&self, address: [u8; 4]) {
        if !is_routable(address) {
            return;
        }
        let mut peers = self.peers.lock().unwrap();
        if peers.iter().any(|peer| peer.address == address) {
            return;
        }
        if peers.len() < MAX_NUMBER_OF_PUBLIC_PEERS {
            peers.push(PublicPeer {
                address,
                verified: false,
            });
        }
    }

    pub fn ingest(&self, exchange: &ExchangePublicPeers) {
        for address in exchange.peers {
            self.add(address);
        }
    }

    pub fn mark_verified(&self, address: [u8; 4]) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(peer) = peers.iter_mut().find(|peer| peer.address == address) {
            peer.verified = true;
        }
    }

    /// Drop a misbehaving address, keeping verified ones and a minimum
    /// population.
    pub fn forget(&self, address: [u8; 4]) {
        if self.is_static {
            return;
        }
        let mut peers = self.peers.lock().unwrap();
        if peers.len() <= NUMBER_OF_EXCHANGED_PEERS {
            return;
        }
        if let Some(position) = peers.iter().position(|peer| peer.address == address) {
            if !peers[position].verified {
                peers.swap_remove(position);
            }
        }
    }

    /// Draw addresses for an EXCHANGE_PUBLIC_PEERS frame, preferring
    /// verified entries.
    pub fn sample(&self) -> ExchangePublicPeers {
        let peers = self.peers.lock().unwrap();
        let verified: Vec<[u8; 4]> = peers
            .iter()
            .filter(|peer| peer.verified)
            .map(|peer| peer.address)
            .collect();
        let pool: Vec<[u8; 4]> = if verified.is_empty() {
            peers.iter().map(|peer| peer.address).collect()
        } else {
            verified
        };
        drop(peers);

        let mut exchange = ExchangePublicPeers::default();
        if pool.is_empty() {
            return exchange;
        }
        let mut rng = rand::thread_rng();
        for slot in exchange.peers.iter_mut() {
            *slot = *pool.choose(&mut rng).unwrap();
        }
        exchange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_rejected() {
        let book = PeerBook::new(false);
        book.add([127, 0, 0, 1]);
        book.add([10, 1, 2, 3]);
        book.add([172, 20, 0, 1]);
        book.add([192, 168, 1, 1]);
        book.add([255, 1, 1, 1]);
        assert!(book.is_empty());

        book.add([203, 0, 113, 7]);
        assert_eq!(book.len(), 1);
        // Duplicates are ignored.
        book.add([203, 0, 113, 7]);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn forget_spares_verified_and_small_books() {
        let book = PeerBook::new(false);
        for i in 0..8u8 {
            book.add([203, 0, 113, i + 1]);
        }
        book.mark_verified([203, 0, 113, 1]);

        book.forget([203, 0, 113, 1]);
        assert_eq!(book.len(), 8);
        book.forget([203, 0, 113, 2]);
        assert_eq!(book.len(), 7);

        let small = PeerBook::new(false);
        for i in 0..NUMBER_OF_EXCHANGED_PEERS as u8 {
            small.add([203, 0, 113, i + 1]);
        }
        small.forget([203, 0, 113, 1]);
        assert_eq!(small.len(), NUMBER_OF_EXCHANGED_PEERS);
    }

    #[test]
    fn sample_prefers_verified() {
        let book = PeerBook::new(false);
        book.add([203, 0, 113, 1]);
        book.add([203, 0, 113, 2]);
        book.mark_verified([203, 0, 113, 2]);

        let exchange = book.sample();
        assert!(exchange.peers.iter().all(|&address| address == [203, 0, 113, 2]));
    }
}
