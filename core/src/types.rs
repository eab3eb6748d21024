use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger amounts are signed 64-bit; valid values stay in `[0, MAX_AMOUNT]`.
pub type Amount = i64;

/// 32-byte identity. The all-zero key is reserved as "null/empty".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub const ZERO: PublicKey = PublicKey([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// First four little-endian bytes; open-addressed stores derive the probe
    /// start as `slot_prefix() & (capacity - 1)`.
    pub fn slot_prefix(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Contract pseudo-addresses carry the contract index in the low four
    /// bytes with the remaining 28 bytes zero.
    pub fn contract_index(&self) -> Option<u32> {
        if self.0[4..].iter().all(|&b| b == 0) {
            Some(self.slot_prefix())
        } else {
            None
        }
    }

    pub fn for_contract(index: u32) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&index.to_le_bytes());
        PublicKey(bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 32-byte hash oracle output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 64-byte signature over a 32-byte digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; 64]);

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Signature::ZERO
    }
}

// Custom serde for [u8; 64] (serde only supports up to [u8; 32] by default)
impl serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes: Vec<u8> = serde::Deserialize::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Expected 64 bytes for signature"));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Signature(arr))
    }
}

/// Wall-clock timestamp carried by ticks and tick data. `year` is an offset
/// from 2000; the leap rule is `year % 4 == 0`, valid for the century the
/// protocol operates in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTime {
    pub millisecond: u16,
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
    pub month: u8,
    pub year: u8,
}

pub const TICK_TIME_WIRE_SIZE: usize = 8;

impl TickTime {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.millisecond.to_le_bytes());
        out.push(self.second);
        out.push(self.minute);
        out.push(self.hour);
        out.push(self.day);
        out.push(self.month);
        out.push(self.year);
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TICK_TIME_WIRE_SIZE {
            return None;
        }
        Some(TickTime {
            millisecond: u16::from_le_bytes([bytes[0], bytes[1]]),
            second: bytes[2],
            minute: bytes[3],
            hour: bytes[4],
            day: bytes[5],
            month: bytes[6],
            year: bytes[7],
        })
    }

    pub fn days_in_month(year: u8, month: u8) -> u8 {
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            _ => {
                if year % 4 == 0 {
                    29
                } else {
                    28
                }
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.month >= 1
            && self.month <= 12
            && self.day >= 1
            && self.day <= Self::days_in_month(self.year, self.month)
            && self.hour <= 23
            && self.minute <= 59
            && self.second <= 59
            && self.millisecond <= 999
    }

    /// Calendar day count used for epoch cut-over arithmetic. The formula is
    /// fixed by the network baseline (see `EPOCH_BASE_DAY_INDEX`).
    pub fn day_index(&self) -> u32 {
        const DAYS_BEFORE_MONTH: [u32; 12] =
            [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
        let year = self.year as u32 + 2000;
        let leap_day = if year % 4 == 0 && self.month > 2 { 1 } else { 0 };
        year * 365
            + (year - 1) / 4
            + DAYS_BEFORE_MONTH[(self.month - 1) as usize]
            + leap_day
            + self.day as u32
    }

    /// Milliseconds on the same scale as `day_index`, for clock-skew checks.
    pub fn millis_index(&self) -> u64 {
        self.day_index() as u64 * 86_400_000
            + self.hour as u64 * 3_600_000
            + self.minute as u64 * 60_000
            + self.second as u64 * 1_000
            + self.millisecond as u64
    }

    /// Advance by one millisecond, cascading through the calendar.
    pub fn advance_millisecond(&mut self) {
        self.millisecond += 1;
        if self.millisecond > 999 {
            self.millisecond = 0;
            self.second += 1;
            if self.second > 59 {
                self.second = 0;
                self.minute += 1;
                if self.minute > 59 {
                    self.minute = 0;
                    self.hour += 1;
                    if self.hour > 23 {
                        self.hour = 0;
                        self.day += 1;
                        if self.day > Self::days_in_month(self.year, self.month) {
                            self.day = 1;
                            self.month += 1;
                            if self.month > 12 {
                                self.month = 1;
                                self.year += 1;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Ord for TickTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond,
        )
            .cmp(&(
                other.year,
                other.month,
                other.day,
                other.hour,
                other.minute,
                other.second,
                other.millisecond,
            ))
    }
}

impl PartialOrd for TickTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One spectrum record. Balance is `incoming_amount - outgoing_amount` and
/// must never go negative in any observable state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub public_key: PublicKey,
    pub incoming_amount: Amount,
    pub outgoing_amount: Amount,
    pub number_of_incoming_transfers: u32,
    pub number_of_outgoing_transfers: u32,
    pub latest_incoming_transfer_tick: u32,
    pub latest_outgoing_transfer_tick: u32,
}

pub const ENTITY_WIRE_SIZE: usize = 64;

impl Entity {
    pub fn balance(&self) -> Amount {
        self.incoming_amount - self.outgoing_amount
    }

    pub fn is_empty(&self) -> bool {
        self.public_key.is_zero()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENTITY_WIRE_SIZE);
        out.extend_from_slice(self.public_key.as_bytes());
        out.extend_from_slice(&self.incoming_amount.to_le_bytes());
        out.extend_from_slice(&self.outgoing_amount.to_le_bytes());
        out.extend_from_slice(&self.number_of_incoming_transfers.to_le_bytes());
        out.extend_from_slice(&self.number_of_outgoing_transfers.to_le_bytes());
        out.extend_from_slice(&self.latest_incoming_transfer_tick.to_le_bytes());
        out.extend_from_slice(&self.latest_outgoing_transfer_tick.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < ENTITY_WIRE_SIZE {
            return None;
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[0..32]);
        Some(Entity {
            public_key: PublicKey::from_bytes(pk),
            incoming_amount: i64::from_le_bytes(bytes[32..40].try_into().ok()?),
            outgoing_amount: i64::from_le_bytes(bytes[40..48].try_into().ok()?),
            number_of_incoming_transfers: u32::from_le_bytes(bytes[48..52].try_into().ok()?),
            number_of_outgoing_transfers: u32::from_le_bytes(bytes[52..56].try_into().ok()?),
            latest_incoming_transfer_tick: u32::from_le_bytes(bytes[56..60].try_into().ok()?),
            latest_outgoing_transfer_tick: u32::from_le_bytes(bytes[60..64].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_pseudo_address_round_trip() {
        let pk = PublicKey::for_contract(7);
        assert_eq!(pk.contract_index(), Some(7));
        assert_eq!(pk.slot_prefix(), 7);

        let mut bytes = [0u8; 32];
        bytes[10] = 1;
        assert_eq!(PublicKey::from_bytes(bytes).contract_index(), None);
    }

    #[test]
    fn tick_time_ordering_is_chronological() {
        let mut a = TickTime {
            millisecond: 999,
            second: 59,
            minute: 59,
            hour: 23,
            day: 31,
            month: 12,
            year: 22,
        };
        let b = TickTime {
            millisecond: 0,
            second: 0,
            minute: 0,
            hour: 0,
            day: 1,
            month: 1,
            year: 23,
        };
        assert!(a < b);
        a.advance_millisecond();
        assert_eq!(a, b);
    }

    #[test]
    fn day_index_is_continuous_over_leap_february() {
        let feb28 = TickTime { day: 28, month: 2, year: 24, ..Default::default() };
        let feb29 = TickTime { day: 29, month: 2, year: 24, ..Default::default() };
        let mar01 = TickTime { day: 1, month: 3, year: 24, ..Default::default() };
        assert_eq!(feb28.day_index() + 1, feb29.day_index());
        assert_eq!(feb29.day_index() + 1, mar01.day_index());

        let dec31 = TickTime { day: 31, month: 12, year: 23, ..Default::default() };
        let jan01 = TickTime { day: 1, month: 1, year: 24, ..Default::default() };
        assert_eq!(dec31.day_index() + 1, jan01.day_index());
    }

    #[test]
    fn entity_wire_round_trip() {
        let entity = Entity {
            public_key: PublicKey::from_bytes([9u8; 32]),
            incoming_amount: 1000,
            outgoing_amount: 300,
            number_of_incoming_transfers: 2,
            number_of_outgoing_transfers: 1,
            latest_incoming_transfer_tick: 40,
            latest_outgoing_transfer_tick: 41,
        };
        let bytes = entity.encode();
        assert_eq!(bytes.len(), ENTITY_WIRE_SIZE);
        assert_eq!(Entity::decode(&bytes), Some(entity));
        assert_eq!(entity.balance(), 700);
    }
}
