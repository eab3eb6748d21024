use crate::types::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seven-character asset name, capital letters and digits, zero-padded.
/// Equality compares the full 7 bytes (the low 56 bits of the name word).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetName([u8; 7]);

impl AssetName {
    pub fn from_bytes(bytes: [u8; 7]) -> Self {
        AssetName(bytes)
    }

    pub fn from_str_padded(name: &str) -> Self {
        let mut bytes = [0u8; 7];
        for (i, b) in name.bytes().take(7).enumerate() {
            bytes[i] = b;
        }
        AssetName(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 7] {
        &self.0
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.iter().take_while(|&&b| b != 0) {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// Universe slot. Three variants share one fixed 48-byte wire layout, tagged
/// by the type byte at offset 32.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Asset {
    #[default]
    Empty,
    Issuance(Issuance),
    Ownership(Ownership),
    Possession(Possession),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub public_key: PublicKey,
    pub name: AssetName,
    pub number_of_decimal_places: i8,
    /// Powers of the SI base units in alphabetical order.
    pub unit_of_measurement: [i8; 7],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub public_key: PublicKey,
    pub managing_contract_index: u16,
    pub issuance_index: u32,
    pub number_of_units: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Possession {
    pub public_key: PublicKey,
    pub managing_contract_index: u16,
    pub ownership_index: u32,
    pub number_of_units: i64,
}

pub const ASSET_WIRE_SIZE: usize = 48;

const TYPE_EMPTY: u8 = 0;
const TYPE_ISSUANCE: u8 = 1;
const TYPE_OWNERSHIP: u8 = 2;
const TYPE_POSSESSION: u8 = 3;

impl Asset {
    pub fn is_empty(&self) -> bool {
        matches!(self, Asset::Empty)
    }

    pub fn as_issuance(&self) -> Option<&Issuance> {
        match self {
            Asset::Issuance(issuance) => Some(issuance),
            _ => None,
        }
    }

    pub fn as_ownership(&self) -> Option<&Ownership> {
        match self {
            Asset::Ownership(ownership) => Some(ownership),
            _ => None,
        }
    }

    pub fn as_possession(&self) -> Option<&Possession> {
        match self {
            Asset::Possession(possession) => Some(possession),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ASSET_WIRE_SIZE);
        match self {
            Asset::Empty => {
                out.resize(ASSET_WIRE_SIZE, 0);
            }
            Asset::Issuance(issuance) => {
                out.extend_from_slice(issuance.public_key.as_bytes());
                out.push(TYPE_ISSUANCE);
                out.extend_from_slice(issuance.name.as_bytes());
                out.push(issuance.number_of_decimal_places as u8);
                for &power in &issuance.unit_of_measurement {
                    out.push(power as u8);
                }
            }
            Asset::Ownership(ownership) => {
                out.extend_from_slice(ownership.public_key.as_bytes());
                out.push(TYPE_OWNERSHIP);
                out.push(0);
                out.extend_from_slice(&ownership.managing_contract_index.to_le_bytes());
                out.extend_from_slice(&ownership.issuance_index.to_le_bytes());
                out.extend_from_slice(&ownership.number_of_units.to_le_bytes());
            }
            Asset::Possession(possession) => {
                out.extend_from_slice(possession.public_key.as_bytes());
                out.push(TYPE_POSSESSION);
                out.push(0);
                out.extend_from_slice(&possession.managing_contract_index.to_le_bytes());
                out.extend_from_slice(&possession.ownership_index.to_le_bytes());
                out.extend_from_slice(&possession.number_of_units.to_le_bytes());
            }
        }
        out.resize(ASSET_WIRE_SIZE, 0);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ASSET_WIRE_SIZE {
            return None;
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[0..32]);
        let public_key = PublicKey::from_bytes(pk);
        match bytes[32] {
            TYPE_EMPTY => Some(Asset::Empty),
            TYPE_ISSUANCE => {
                let mut name = [0u8; 7];
                name.copy_from_slice(&bytes[33..40]);
                let mut unit_of_measurement = [0i8; 7];
                for (i, &b) in bytes[41..48].iter().enumerate() {
                    unit_of_measurement[i] = b as i8;
                }
                Some(Asset::Issuance(Issuance {
                    public_key,
                    name: AssetName::from_bytes(name),
                    number_of_decimal_places: bytes[40] as i8,
                    unit_of_measurement,
                }))
            }
            TYPE_OWNERSHIP => Some(Asset::Ownership(Ownership {
                public_key,
                managing_contract_index: u16::from_le_bytes(bytes[34..36].try_into().ok()?),
                issuance_index: u32::from_le_bytes(bytes[36..40].try_into().ok()?),
                number_of_units: i64::from_le_bytes(bytes[40..48].try_into().ok()?),
            })),
            TYPE_POSSESSION => Some(Asset::Possession(Possession {
                public_key,
                managing_contract_index: u16::from_le_bytes(bytes[34..36].try_into().ok()?),
                ownership_index: u32::from_le_bytes(bytes[36..40].try_into().ok()?),
                number_of_units: i64::from_le_bytes(bytes[40..48].try_into().ok()?),
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_wire_round_trip() {
        let issuance = Asset::Issuance(Issuance {
            public_key: PublicKey::from_bytes([5u8; 32]),
            name: AssetName::from_str_padded("TSR"),
            number_of_decimal_places: 2,
            unit_of_measurement: [0, 0, 0, 1, 0, 0, 0],
        });
        assert_eq!(Asset::decode(&issuance.encode()), Some(issuance));

        let possession = Asset::Possession(Possession {
            public_key: PublicKey::from_bytes([6u8; 32]),
            managing_contract_index: 1,
            ownership_index: 42,
            number_of_units: 676,
        });
        assert_eq!(Asset::decode(&possession.encode()), Some(possession));

        assert_eq!(Asset::decode(&Asset::Empty.encode()), Some(Asset::Empty));
    }

    #[test]
    fn asset_name_display() {
        assert_eq!(AssetName::from_str_padded("QFT").to_string(), "QFT");
    }
}
