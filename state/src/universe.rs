// Universe store
// Issuance/ownership/possession triples in one open-addressed table

use crate::merkle::DigestTree;
use tessera_core::{crypto, Asset, AssetName, Digest, Issuance, Ownership, Possession, PublicKey};

/// The asset graph. Possession rows point back at their ownership row, which
/// points back at its issuance row; back-references are plain slot indices.
pub struct Universe {
    capacity: usize,
    mask: u32,
    assets: Vec<Asset>,
    tree: DigestTree,
}

impl Universe {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity >= 2);
        Universe {
            capacity,
            mask: (capacity - 1) as u32,
            assets: vec![Asset::Empty; capacity],
            tree: DigestTree::new(capacity),
        }
    }

    pub fn from_assets(capacity: usize, assets: Vec<Asset>) -> Self {
        assert_eq!(assets.len(), capacity);
        let mut universe = Universe {
            capacity,
            mask: (capacity - 1) as u32,
            assets,
            tree: DigestTree::new(capacity),
        };
        universe.tree.mark_all();
        universe
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn asset(&self, index: usize) -> &Asset {
        &self.assets[index]
    }

    fn mark(&mut self, index: usize) {
        self.tree.mark(index);
    }

    /// Allocate one issuance, one ownership, and one possession for a new
    /// asset, each on its own probe chain from the issuer key. Returns the
    /// three slot indices.
    pub fn issue_asset(
        &mut self,
        issuer: &PublicKey,
        name: AssetName,
        number_of_decimal_places: i8,
        unit_of_measurement: [i8; 7],
        number_of_units: i64,
        managing_contract_index: u16,
    ) -> Option<(usize, usize, usize)> {
        let issuance_index = self.find_empty((issuer.slot_prefix() & self.mask) as usize)?;
        self.assets[issuance_index] = Asset::Issuance(Issuance {
            public_key: *issuer,
            name,
            number_of_decimal_places,
            unit_of_measurement,
        });

        let ownership_index = self.find_empty((issuance_index + 1) & self.mask as usize)?;
        self.assets[ownership_index] = Asset::Ownership(Ownership {
            public_key: *issuer,
            managing_contract_index,
            issuance_index: issuance_index as u32,
            number_of_units,
        });

        let possession_index = self.find_empty((ownership_index + 1) & self.mask as usize)?;
        self.assets[possession_index] = Asset::Possession(Possession {
            public_key: *issuer,
            managing_contract_index,
            ownership_index: ownership_index as u32,
            number_of_units,
        });

        self.mark(issuance_index);
        self.mark(ownership_index);
        self.mark(possession_index);
        Some((issuance_index, ownership_index, possession_index))
    }

    fn find_empty(&self, start: usize) -> Option<usize> {
        let mut index = start;
        for _ in 0..self.capacity {
            if self.assets[index].is_empty() {
                return Some(index);
            }
            index = (index + 1) & self.mask as usize;
        }
        None
    }

    /// Move units from one holder to another, atomically across the
    /// ownership and possession rows. Returns the destination ownership and
    /// possession indices, or `None` with no state change on any
    /// precondition violation.
    pub fn transfer_ownership_and_possession(
        &mut self,
        source_ownership_index: usize,
        source_possession_index: usize,
        destination: &PublicKey,
        number_of_units: i64,
    ) -> Option<(usize, usize)> {
        if number_of_units <= 0 {
            return None;
        }
        let source_ownership = match self.assets[source_ownership_index].as_ownership() {
            Some(o) if o.number_of_units >= number_of_units => *o,
            _ => return None,
        };
        let source_possession = match self.assets[source_possession_index].as_possession() {
            Some(p)
                if p.number_of_units >= number_of_units
                    && p.ownership_index as usize == source_ownership_index =>
            {
                *p
            }
            _ => return None,
        };

        let destination_ownership_index = self.find_ownership_slot(
            destination,
            source_ownership.managing_contract_index,
            source_ownership.issuance_index,
        )?;
        // Debit the source ownership before installing the destination so a
        // self-transfer nets out.
        if let Asset::Ownership(o) = &mut self.assets[source_ownership_index] {
            o.number_of_units -= number_of_units;
        }
        if self.assets[destination_ownership_index].is_empty() {
            self.assets[destination_ownership_index] = Asset::Ownership(Ownership {
                public_key: *destination,
                managing_contract_index: source_ownership.managing_contract_index,
                issuance_index: source_ownership.issuance_index,
                number_of_units: 0,
            });
        }
        if let Asset::Ownership(o) = &mut self.assets[destination_ownership_index] {
            o.number_of_units += number_of_units;
        }

        let destination_possession_index = match self.find_possession_slot(
            destination,
            source_possession.managing_contract_index,
            destination_ownership_index,
        ) {
            Some(index) => index,
            None => {
                // Roll the ownership movement back; the table is full.
                if let Asset::Ownership(o) = &mut self.assets[source_ownership_index] {
                    o.number_of_units += number_of_units;
                }
                if let Asset::Ownership(o) = &mut self.assets[destination_ownership_index] {
                    o.number_of_units -= number_of_units;
                }
                return None;
            }
        };
        if let Asset::Possession(p) = &mut self.assets[source_possession_index] {
            p.number_of_units -= number_of_units;
        }
        if self.assets[destination_possession_index].is_empty() {
            self.assets[destination_possession_index] = Asset::Possession(Possession {
                public_key: *destination,
                managing_contract_index: source_possession.managing_contract_index,
                ownership_index: destination_ownership_index as u32,
                number_of_units: 0,
            });
        }
        if let Asset::Possession(p) = &mut self.assets[destination_possession_index] {
            p.number_of_units += number_of_units;
        }

        self.mark(source_ownership_index);
        self.mark(source_possession_index);
        self.mark(destination_ownership_index);
        self.mark(destination_possession_index);
        Some((destination_ownership_index, destination_possession_index))
    }

    fn find_ownership_slot(
        &self,
        public_key: &PublicKey,
        managing_contract_index: u16,
        issuance_index: u32,
    ) -> Option<usize> {
        let mut index = (public_key.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => return Some(index),
                Asset::Ownership(o)
                    if o.managing_contract_index == managing_contract_index
                        && o.issuance_index == issuance_index
                        && o.public_key == *public_key =>
                {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        None
    }

    fn find_possession_slot(
        &self,
        public_key: &PublicKey,
        managing_contract_index: u16,
        ownership_index: usize,
    ) -> Option<usize> {
        let mut index = (public_key.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => return Some(index),
                Asset::Possession(p)
                    if p.managing_contract_index == managing_contract_index
                        && p.ownership_index as usize == ownership_index
                        && p.public_key == *public_key =>
                {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        None
    }

    /// Merkle root over all slots. O(1) when nothing changed.
    pub fn digest(&mut self) -> Digest {
        let assets = &self.assets;
        self.tree.root_with(|i| crypto::digest(&assets[i].encode()))
    }

    /// Issuances created by `issuer`, walking its probe chain.
    pub fn issuances_of(&self, issuer: &PublicKey) -> Vec<(usize, Issuance)> {
        let mut found = Vec::new();
        let mut index = (issuer.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => break,
                Asset::Issuance(issuance) if issuance.public_key == *issuer => {
                    found.push((index, *issuance));
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        found
    }

    /// Ownerships held by `owner`, with their backing issuance.
    pub fn ownerships_of(&self, owner: &PublicKey) -> Vec<(usize, Ownership, Issuance)> {
        let mut found = Vec::new();
        let mut index = (owner.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => break,
                Asset::Ownership(ownership) if ownership.public_key == *owner => {
                    if let Some(issuance) =
                        self.assets[ownership.issuance_index as usize].as_issuance()
                    {
                        found.push((index, *ownership, *issuance));
                    }
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        found
    }

    /// Possessions held by `possessor`, with their ownership and issuance.
    pub fn possessions_of(
        &self,
        possessor: &PublicKey,
    ) -> Vec<(usize, Possession, Ownership, Issuance)> {
        let mut found = Vec::new();
        let mut index = (possessor.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => break,
                Asset::Possession(possession) if possession.public_key == *possessor => {
                    if let Some(ownership) =
                        self.assets[possession.ownership_index as usize].as_ownership()
                    {
                        if let Some(issuance) =
                            self.assets[ownership.issuance_index as usize].as_issuance()
                        {
                            found.push((index, *possession, *ownership, *issuance));
                        }
                    }
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        found
    }

    /// Units held across all possessions backed by the given issuance slot.
    pub fn possessed_units_of_issuance(&self, issuance_index: usize) -> i64 {
        self.assets
            .iter()
            .filter_map(|asset| asset.as_possession())
            .filter(|p| {
                self.assets[p.ownership_index as usize]
                    .as_ownership()
                    .map(|o| o.issuance_index as usize == issuance_index)
                    .unwrap_or(false)
            })
            .map(|p| p.number_of_units)
            .sum()
    }

    /// Units held across all ownerships of the given issuance slot.
    pub fn owned_units_of_issuance(&self, issuance_index: usize) -> i64 {
        self.assets
            .iter()
            .filter_map(|asset| asset.as_ownership())
            .filter(|o| o.issuance_index as usize == issuance_index)
            .map(|o| o.number_of_units)
            .sum()
    }

    /// Epoch compaction: rebuild the table from possessions with positive
    /// units. Issuances are deduplicated by issuer and name; ownership units
    /// accumulate from the possessions they back.
    pub fn compact(&mut self) {
        let old = std::mem::replace(&mut self.assets, vec![Asset::Empty; self.capacity]);
        for slot in &old {
            let possession = match slot.as_possession() {
                Some(p) if p.number_of_units > 0 => *p,
                _ => continue,
            };
            let old_ownership = match old[possession.ownership_index as usize].as_ownership() {
                Some(o) => *o,
                None => continue,
            };
            let old_issuance = match old[old_ownership.issuance_index as usize].as_issuance() {
                Some(i) => *i,
                None => continue,
            };

            let issuance_index = match self.find_issuance_slot(&old_issuance) {
                Some(index) => index,
                None => continue,
            };
            if self.assets[issuance_index].is_empty() {
                self.assets[issuance_index] = Asset::Issuance(old_issuance);
            }

            let ownership_index = match self.find_ownership_slot(
                &old_ownership.public_key,
                old_ownership.managing_contract_index,
                issuance_index as u32,
            ) {
                Some(index) => index,
                None => continue,
            };
            if self.assets[ownership_index].is_empty() {
                self.assets[ownership_index] = Asset::Ownership(Ownership {
                    public_key: old_ownership.public_key,
                    managing_contract_index: old_ownership.managing_contract_index,
                    issuance_index: issuance_index as u32,
                    number_of_units: 0,
                });
            }
            if let Asset::Ownership(o) = &mut self.assets[ownership_index] {
                o.number_of_units += possession.number_of_units;
            }

            let possession_index = match self.find_possession_slot(
                &possession.public_key,
                possession.managing_contract_index,
                ownership_index,
            ) {
                Some(index) => index,
                None => continue,
            };
            if self.assets[possession_index].is_empty() {
                self.assets[possession_index] = Asset::Possession(Possession {
                    public_key: possession.public_key,
                    managing_contract_index: possession.managing_contract_index,
                    ownership_index: ownership_index as u32,
                    number_of_units: 0,
                });
            }
            if let Asset::Possession(p) = &mut self.assets[possession_index] {
                p.number_of_units += possession.number_of_units;
            }
        }
        self.tree.mark_all();
    }

    fn find_issuance_slot(&self, issuance: &Issuance) -> Option<usize> {
        let mut index = (issuance.public_key.slot_prefix() & self.mask) as usize;
        for _ in 0..self.capacity {
            match &self.assets[index] {
                Asset::Empty => return Some(index),
                Asset::Issuance(existing)
                    if existing.name == issuance.name
                        && existing.public_key == issuance.public_key =>
                {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + 1) & self.mask as usize;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[0] = byte;
        bytes[31] = 1;
        PublicKey::from_bytes(bytes)
    }

    fn issue(universe: &mut Universe, issuer: &PublicKey, units: i64) -> (usize, usize, usize) {
        universe
            .issue_asset(issuer, AssetName::from_str_padded("TSR"), 0, [0i8; 7], units, 1)
            .unwrap()
    }

    #[test]
    fn issue_creates_linked_triple() {
        let mut universe = Universe::new(64);
        let issuer = key(1);
        let (issuance, ownership, possession) = issue(&mut universe, &issuer, 1000);

        let o = universe.asset(ownership).as_ownership().unwrap().clone();
        assert_eq!(o.issuance_index as usize, issuance);
        assert_eq!(o.number_of_units, 1000);
        let p = universe.asset(possession).as_possession().unwrap().clone();
        assert_eq!(p.ownership_index as usize, ownership);
        assert_eq!(p.number_of_units, 1000);
    }

    #[test]
    fn transfer_moves_units_and_conserves_totals() {
        let mut universe = Universe::new(64);
        let issuer = key(1);
        let receiver = key(2);
        let (issuance, ownership, possession) = issue(&mut universe, &issuer, 1000);

        let (dst_ownership, dst_possession) = universe
            .transfer_ownership_and_possession(ownership, possession, &receiver, 300)
            .unwrap();

        assert_eq!(universe.asset(ownership).as_ownership().unwrap().number_of_units, 700);
        assert_eq!(universe.asset(dst_ownership).as_ownership().unwrap().number_of_units, 300);
        assert_eq!(universe.asset(dst_possession).as_possession().unwrap().number_of_units, 300);

        // Asset-unit conservation across the issuance.
        assert_eq!(universe.owned_units_of_issuance(issuance), 1000);
        assert_eq!(universe.possessed_units_of_issuance(issuance), 1000);
    }

    #[test]
    fn transfer_rejects_insufficient_units() {
        let mut universe = Universe::new(64);
        let issuer = key(1);
        let (_, ownership, possession) = issue(&mut universe, &issuer, 10);

        let before = universe.digest();
        assert!(universe
            .transfer_ownership_and_possession(ownership, possession, &key(2), 11)
            .is_none());
        assert!(universe
            .transfer_ownership_and_possession(ownership, possession, &key(2), 0)
            .is_none());
        assert_eq!(universe.digest(), before);
    }

    #[test]
    fn repeat_transfer_reuses_destination_rows() {
        let mut universe = Universe::new(64);
        let issuer = key(1);
        let receiver = key(2);
        let (_, ownership, possession) = issue(&mut universe, &issuer, 100);

        let first = universe
            .transfer_ownership_and_possession(ownership, possession, &receiver, 40)
            .unwrap();
        let second = universe
            .transfer_ownership_and_possession(ownership, possession, &receiver, 10)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(universe.asset(first.0).as_ownership().unwrap().number_of_units, 50);
    }

    #[test]
    fn compaction_drops_empty_possessions_and_keeps_units() {
        let mut universe = Universe::new(64);
        let issuer = key(1);
        let receiver = key(2);
        let (issuance, ownership, possession) = issue(&mut universe, &issuer, 1000);

        // Move everything away; the issuer's rows drop to zero units.
        universe
            .transfer_ownership_and_possession(ownership, possession, &receiver, 1000)
            .unwrap();
        universe.compact();

        assert_eq!(universe.issuances_of(&issuer).len(), 1);
        assert!(universe.ownerships_of(&issuer).is_empty());
        let receiver_possessions = universe.possessions_of(&receiver);
        assert_eq!(receiver_possessions.len(), 1);
        assert_eq!(receiver_possessions[0].1.number_of_units, 1000);

        let new_issuance = universe.issuances_of(&issuer)[0].0;
        let _ = issuance;
        assert_eq!(universe.owned_units_of_issuance(new_issuance), 1000);
        assert_eq!(universe.possessed_units_of_issuance(new_issuance), 1000);
    }
}
