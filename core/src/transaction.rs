use crate::codec::CodecError;
use crate::constants::{MAX_AMOUNT, SIGNATURE_SIZE};
use crate::crypto::{self, KeyPair};
use crate::types::{Amount, Digest, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Fixed-size transaction prefix on the wire, before the variable input.
pub const TRANSACTION_PREFIX_SIZE: usize = 32 + 32 + 8 + 4 + 2 + 2;

/// Largest input a transaction may carry.
pub const MAX_INPUT_SIZE: usize =
    crate::constants::MAX_TRANSACTION_SIZE - (TRANSACTION_PREFIX_SIZE + SIGNATURE_SIZE);

/// A signed transfer, contract invocation, IPO bid, or solution submission.
/// The meaning is determined by the destination and the input shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender; pays `amount` and signs the transaction.
    pub source_public_key: PublicKey,
    /// Receiver; a contract pseudo-address or the arbitrator select special
    /// handling.
    pub destination_public_key: PublicKey,
    pub amount: Amount,
    /// The tick this transaction is scheduled for.
    pub tick: u32,
    /// Dispatch key into the destination contract's procedure table.
    pub input_type: u16,
    pub input: Vec<u8>,
    pub signature: Signature,
}

impl Transaction {
    /// Create and sign a transaction.
    pub fn new_signed(
        keypair: &KeyPair,
        destination: PublicKey,
        amount: Amount,
        tick: u32,
        input_type: u16,
        input: Vec<u8>,
    ) -> Self {
        let mut tx = Transaction {
            source_public_key: keypair.public_key(),
            destination_public_key: destination,
            amount,
            tick,
            input_type,
            input,
            signature: Signature::ZERO,
        };
        tx.signature = keypair.sign(&tx.signing_digest());
        tx
    }

    fn encode_prefix(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.source_public_key.as_bytes());
        out.extend_from_slice(self.destination_public_key.as_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.input_type.to_le_bytes());
        out.extend_from_slice(&(self.input.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.input);
    }

    /// Full wire encoding: prefix, input, signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        self.encode_prefix(&mut out);
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < TRANSACTION_PREFIX_SIZE + SIGNATURE_SIZE {
            return Err(CodecError::MalformedBody("transaction"));
        }
        let mut source = [0u8; 32];
        source.copy_from_slice(&bytes[0..32]);
        let mut destination = [0u8; 32];
        destination.copy_from_slice(&bytes[32..64]);
        let amount = i64::from_le_bytes(bytes[64..72].try_into().unwrap());
        let tick = u32::from_le_bytes(bytes[72..76].try_into().unwrap());
        let input_type = u16::from_le_bytes(bytes[76..78].try_into().unwrap());
        let input_size = u16::from_le_bytes(bytes[78..80].try_into().unwrap()) as usize;
        if input_size > MAX_INPUT_SIZE
            || bytes.len() != TRANSACTION_PREFIX_SIZE + input_size + SIGNATURE_SIZE
        {
            return Err(CodecError::MalformedBody("transaction"));
        }
        let input = bytes[TRANSACTION_PREFIX_SIZE..TRANSACTION_PREFIX_SIZE + input_size].to_vec();
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[TRANSACTION_PREFIX_SIZE + input_size..]);
        Ok(Transaction {
            source_public_key: PublicKey::from_bytes(source),
            destination_public_key: PublicKey::from_bytes(destination),
            amount,
            tick,
            input_type,
            input,
            signature: Signature::from_bytes(signature),
        })
    }

    pub fn wire_size(&self) -> usize {
        TRANSACTION_PREFIX_SIZE + self.input.len() + SIGNATURE_SIZE
    }

    /// Digest the signature commits to (everything but the signature).
    pub fn signing_digest(&self) -> Digest {
        let mut msg = Vec::with_capacity(TRANSACTION_PREFIX_SIZE + self.input.len());
        self.encode_prefix(&mut msg);
        crypto::digest(&msg)
    }

    /// Content digest over the full encoding, signature included. Tick data
    /// references transactions by this value.
    pub fn digest(&self) -> Digest {
        crypto::digest(&self.encode())
    }

    pub fn verify_signature(&self) -> bool {
        self.source_public_key
            .verify(&self.signing_digest(), &self.signature)
    }

    /// Stateless admission checks: amount domain and signature.
    pub fn is_valid(&self) -> bool {
        self.amount >= 0 && self.amount <= MAX_AMOUNT && self.verify_signature()
    }

    /// Interpret the input as an IPO bid. Only meaningful when the
    /// destination is a contract below its construction epoch.
    pub fn ipo_bid(&self) -> Option<IpoBid> {
        if self.amount != 0 || self.input.len() != IPO_BID_WIRE_SIZE {
            return None;
        }
        Some(IpoBid {
            price: i64::from_le_bytes(self.input[0..8].try_into().ok()?),
            quantity: u16::from_le_bytes(self.input[8..10].try_into().ok()?),
        })
    }

    /// Interpret the input as a mining solution nonce. Only meaningful when
    /// the destination is the arbitrator.
    pub fn solution_nonce(&self) -> Option<[u8; 32]> {
        if self.amount != 0 || self.input_type != 0 || self.input.len() != 32 {
            return None;
        }
        self.input.as_slice().try_into().ok()
    }
}

pub const IPO_BID_WIRE_SIZE: usize = 10;

/// Bid for one or more of the 676 initial shares of a contract under
/// construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpoBid {
    pub price: i64,
    pub quantity: u16,
}

impl IpoBid {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IPO_BID_WIRE_SIZE);
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.quantity.to_le_bytes());
        out
    }

    pub fn is_valid(&self) -> bool {
        self.price > 0
            && self.price <= MAX_AMOUNT / crate::constants::NUMBER_OF_COMPUTORS as i64
            && self.quantity > 0
            && self.quantity <= crate::constants::NUMBER_OF_COMPUTORS as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_signing() {
        let keypair = KeyPair::generate();
        let destination = PublicKey::from_bytes([1u8; 32]);

        let tx = Transaction::new_signed(&keypair, destination, 700, 10, 0, vec![]);
        assert!(tx.verify_signature());
        assert!(tx.is_valid());
    }

    #[test]
    fn tampered_transaction_fails_verification() {
        let keypair = KeyPair::generate();
        let destination = PublicKey::from_bytes([1u8; 32]);

        let mut tx = Transaction::new_signed(&keypair, destination, 700, 10, 0, vec![]);
        tx.amount = 9999;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn wire_round_trip() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new_signed(
            &keypair,
            PublicKey::from_bytes([2u8; 32]),
            5,
            77,
            3,
            vec![0xAA; 40],
        );
        let bytes = tx.encode();
        assert_eq!(bytes.len(), tx.wire_size());
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new_signed(&keypair, PublicKey::from_bytes([2u8; 32]), 5, 77, 0, vec![]);
        let mut bytes = tx.encode();
        bytes.push(0);
        assert!(Transaction::decode(&bytes).is_err());
    }

    #[test]
    fn ipo_bid_parsing() {
        let keypair = KeyPair::generate();
        let bid = IpoBid { price: 25, quantity: 2 };
        let tx = Transaction::new_signed(
            &keypair,
            PublicKey::for_contract(3),
            0,
            10,
            0,
            bid.encode(),
        );
        assert_eq!(tx.ipo_bid(), Some(bid));
        assert!(bid.is_valid());
        assert!(!IpoBid { price: 0, quantity: 1 }.is_valid());
    }

    #[test]
    fn solution_nonce_requires_exact_shape() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new_signed(
            &keypair,
            PublicKey::from_bytes([3u8; 32]),
            0,
            10,
            0,
            vec![7u8; 32],
        );
        assert_eq!(tx.solution_nonce(), Some([7u8; 32]));

        let paid = Transaction::new_signed(
            &keypair,
            PublicKey::from_bytes([3u8; 32]),
            1,
            10,
            0,
            vec![7u8; 32],
        );
        assert_eq!(paid.solution_nonce(), None);
    }
}
