// Tick votes and tick data
// The per-tick commitments computors sign, and the proposer's transaction set.

use crate::codec::{CodecError, MessageType};
use crate::constants::{MAX_NUMBER_OF_CONTRACTS, NUMBER_OF_COMPUTORS, NUMBER_OF_TRANSACTIONS_PER_TICK, SIGNATURE_SIZE};
use crate::crypto::{self, KeyPair};
use crate::types::{Digest, Signature, TickTime, TICK_TIME_WIRE_SIZE};
use serde::{Deserialize, Serialize};

pub const TICK_VOTE_WIRE_SIZE: usize = 2 + 2 + 4 + TICK_TIME_WIRE_SIZE + 8 + 8 + 32 * 8 + SIGNATURE_SIZE;

/// A computor's signed commitment to one tick: the previous digests, the
/// salted digests of the post-tick state, and the transaction digests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickVote {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub time: TickTime,
    pub prev_resource_testing_digest: u64,
    pub salted_resource_testing_digest: u64,
    pub prev_spectrum_digest: Digest,
    pub prev_universe_digest: Digest,
    pub prev_computer_digest: Digest,
    pub salted_spectrum_digest: Digest,
    pub salted_universe_digest: Digest,
    pub salted_computer_digest: Digest,
    pub transaction_digest: Digest,
    pub expected_next_tick_transaction_digest: Digest,
    pub signature: Signature,
}

impl TickVote {
    fn encode_unsigned(&self, computor_index: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&computor_index.to_le_bytes());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        self.time.encode_into(out);
        out.extend_from_slice(&self.prev_resource_testing_digest.to_le_bytes());
        out.extend_from_slice(&self.salted_resource_testing_digest.to_le_bytes());
        out.extend_from_slice(self.prev_spectrum_digest.as_bytes());
        out.extend_from_slice(self.prev_universe_digest.as_bytes());
        out.extend_from_slice(self.prev_computer_digest.as_bytes());
        out.extend_from_slice(self.salted_spectrum_digest.as_bytes());
        out.extend_from_slice(self.salted_universe_digest.as_bytes());
        out.extend_from_slice(self.salted_computer_digest.as_bytes());
        out.extend_from_slice(self.transaction_digest.as_bytes());
        out.extend_from_slice(self.expected_next_tick_transaction_digest.as_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TICK_VOTE_WIRE_SIZE);
        self.encode_unsigned(self.computor_index, &mut out);
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != TICK_VOTE_WIRE_SIZE {
            return Err(CodecError::MalformedBody("tick vote"));
        }
        let read_digest = |offset: usize| {
            let mut d = [0u8; 32];
            d.copy_from_slice(&bytes[offset..offset + 32]);
            Digest::from_bytes(d)
        };
        let time = TickTime::decode(&bytes[8..16]).ok_or(CodecError::MalformedBody("tick vote"))?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[TICK_VOTE_WIRE_SIZE - SIGNATURE_SIZE..]);
        Ok(TickVote {
            computor_index: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            epoch: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            tick: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            time,
            prev_resource_testing_digest: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            salted_resource_testing_digest: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            prev_spectrum_digest: read_digest(32),
            prev_universe_digest: read_digest(64),
            prev_computer_digest: read_digest(96),
            salted_spectrum_digest: read_digest(128),
            salted_universe_digest: read_digest(160),
            salted_computer_digest: read_digest(192),
            transaction_digest: read_digest(224),
            expected_next_tick_transaction_digest: read_digest(256),
            signature: Signature::from_bytes(signature),
        })
    }

    /// Digest the vote's signature commits to. The computor index is XOR-ed
    /// with the broadcast type code over the preimage; this quirk is
    /// consensus-critical and must stay bit-exact.
    pub fn signing_digest(&self) -> Digest {
        let mut msg = Vec::with_capacity(TICK_VOTE_WIRE_SIZE - SIGNATURE_SIZE);
        self.encode_unsigned(self.computor_index ^ MessageType::BroadcastTick as u16, &mut msg);
        crypto::digest(&msg)
    }

    pub fn sign(&mut self, keypair: &KeyPair) {
        self.signature = keypair.sign(&self.signing_digest());
    }

    pub fn essence(&self) -> TickEssence {
        TickEssence {
            time: self.time,
            prev_spectrum_digest: self.prev_spectrum_digest,
            prev_universe_digest: self.prev_universe_digest,
            prev_computer_digest: self.prev_computer_digest,
            transaction_digest: self.transaction_digest,
        }
    }

    /// Field-wise commitment equality; differing re-receipt marks the
    /// computor faulty.
    pub fn same_commitment(&self, other: &TickVote) -> bool {
        self.time == other.time
            && self.prev_spectrum_digest == other.prev_spectrum_digest
            && self.prev_universe_digest == other.prev_universe_digest
            && self.prev_computer_digest == other.prev_computer_digest
            && self.salted_spectrum_digest == other.salted_spectrum_digest
            && self.salted_universe_digest == other.salted_universe_digest
            && self.salted_computer_digest == other.salted_computer_digest
            && self.transaction_digest == other.transaction_digest
            && self.expected_next_tick_transaction_digest == other.expected_next_tick_transaction_digest
    }
}

/// The part of a vote that must match across the quorum for a tick to count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickEssence {
    pub time: TickTime,
    pub prev_spectrum_digest: Digest,
    pub prev_universe_digest: Digest,
    pub prev_computer_digest: Digest,
    pub transaction_digest: Digest,
}

impl TickEssence {
    pub fn digest(&self) -> Digest {
        let mut msg = Vec::with_capacity(TICK_TIME_WIRE_SIZE + 32 * 4);
        self.time.encode_into(&mut msg);
        msg.extend_from_slice(self.prev_spectrum_digest.as_bytes());
        msg.extend_from_slice(self.prev_universe_digest.as_bytes());
        msg.extend_from_slice(self.prev_computer_digest.as_bytes());
        msg.extend_from_slice(self.transaction_digest.as_bytes());
        crypto::digest(&msg)
    }
}

pub const BALLOT_VOTES_SIZE: usize = (NUMBER_OF_COMPUTORS * 3 + 7) / 8;
pub const PROPOSAL_OR_BALLOT_WIRE_SIZE: usize = 256;

/// Governance proposal: a URI of up to 255 bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub uri: Vec<u8>,
}

/// Three-state votes over the current proposals, one entry per computor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub votes: Vec<u8>,
    pub quasi_random_number: u8,
}

impl Default for Ballot {
    fn default() -> Self {
        Ballot {
            votes: vec![0u8; BALLOT_VOTES_SIZE],
            quasi_random_number: 0,
        }
    }
}

/// The 256-byte union region of tick data: a proposal when the first byte
/// (the URI size) is non-zero, a ballot otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalOrBallot {
    Proposal(Proposal),
    Ballot(Ballot),
}

impl Default for ProposalOrBallot {
    fn default() -> Self {
        ProposalOrBallot::Ballot(Ballot::default())
    }
}

impl ProposalOrBallot {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        match self {
            ProposalOrBallot::Proposal(proposal) => {
                out.push(proposal.uri.len().min(255) as u8);
                out.extend_from_slice(&proposal.uri[..proposal.uri.len().min(255)]);
            }
            ProposalOrBallot::Ballot(ballot) => {
                out.push(0);
                let mut votes = ballot.votes.clone();
                votes.resize(BALLOT_VOTES_SIZE, 0);
                out.extend_from_slice(&votes);
                out.push(ballot.quasi_random_number);
            }
        }
        out.resize(start + PROPOSAL_OR_BALLOT_WIRE_SIZE, 0);
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PROPOSAL_OR_BALLOT_WIRE_SIZE {
            return None;
        }
        let uri_size = bytes[0] as usize;
        if uri_size > 0 {
            Some(ProposalOrBallot::Proposal(Proposal {
                uri: bytes[1..1 + uri_size].to_vec(),
            }))
        } else {
            Some(ProposalOrBallot::Ballot(Ballot {
                votes: bytes[1..1 + BALLOT_VOTES_SIZE].to_vec(),
                quasi_random_number: bytes[1 + BALLOT_VOTES_SIZE],
            }))
        }
    }
}

pub const TICK_DATA_WIRE_SIZE: usize = 2
    + 2
    + 4
    + TICK_TIME_WIRE_SIZE
    + PROPOSAL_OR_BALLOT_WIRE_SIZE
    + 32
    + NUMBER_OF_TRANSACTIONS_PER_TICK * 32
    + MAX_NUMBER_OF_CONTRACTS * 8
    + SIGNATURE_SIZE;

/// The proposer's commitment to a tick's transaction set, published two
/// ticks ahead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickData {
    pub computor_index: u16,
    pub epoch: u16,
    pub tick: u32,
    pub time: TickTime,
    pub proposal_or_ballot: ProposalOrBallot,
    /// `hash(saltedSpectrum || saltedUniverse || saltedComputer)` of the
    /// proposer's state when it led; checked against the etalon's previous
    /// digests before the data is trusted.
    pub timelock: Digest,
    pub transaction_digests: Vec<Digest>,
    pub contract_fees: Vec<i64>,
    pub signature: Signature,
}

impl Default for TickData {
    fn default() -> Self {
        TickData {
            computor_index: 0,
            epoch: 0,
            tick: 0,
            time: TickTime::default(),
            proposal_or_ballot: ProposalOrBallot::default(),
            timelock: Digest::ZERO,
            transaction_digests: vec![Digest::ZERO; NUMBER_OF_TRANSACTIONS_PER_TICK],
            contract_fees: vec![0i64; MAX_NUMBER_OF_CONTRACTS],
            signature: Signature::ZERO,
        }
    }
}

impl TickData {
    fn encode_unsigned(&self, computor_index: u16, out: &mut Vec<u8>) {
        out.extend_from_slice(&computor_index.to_le_bytes());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        self.time.encode_into(out);
        self.proposal_or_ballot.encode_into(out);
        out.extend_from_slice(self.timelock.as_bytes());
        for i in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
            let digest = self.transaction_digests.get(i).copied().unwrap_or(Digest::ZERO);
            out.extend_from_slice(digest.as_bytes());
        }
        for i in 0..MAX_NUMBER_OF_CONTRACTS {
            let fee = self.contract_fees.get(i).copied().unwrap_or(0);
            out.extend_from_slice(&fee.to_le_bytes());
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TICK_DATA_WIRE_SIZE);
        self.encode_unsigned(self.computor_index, &mut out);
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != TICK_DATA_WIRE_SIZE {
            return Err(CodecError::MalformedBody("tick data"));
        }
        let time = TickTime::decode(&bytes[8..16]).ok_or(CodecError::MalformedBody("tick data"))?;
        let proposal_or_ballot = ProposalOrBallot::decode(&bytes[16..16 + PROPOSAL_OR_BALLOT_WIRE_SIZE])
            .ok_or(CodecError::MalformedBody("tick data"))?;
        let mut offset = 16 + PROPOSAL_OR_BALLOT_WIRE_SIZE;
        let mut timelock = [0u8; 32];
        timelock.copy_from_slice(&bytes[offset..offset + 32]);
        offset += 32;
        let mut transaction_digests = Vec::with_capacity(NUMBER_OF_TRANSACTIONS_PER_TICK);
        for _ in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
            let mut d = [0u8; 32];
            d.copy_from_slice(&bytes[offset..offset + 32]);
            transaction_digests.push(Digest::from_bytes(d));
            offset += 32;
        }
        let mut contract_fees = Vec::with_capacity(MAX_NUMBER_OF_CONTRACTS);
        for _ in 0..MAX_NUMBER_OF_CONTRACTS {
            contract_fees.push(i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()));
            offset += 8;
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[offset..offset + SIGNATURE_SIZE]);
        Ok(TickData {
            computor_index: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            epoch: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            tick: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            time,
            proposal_or_ballot,
            timelock: Digest::from_bytes(timelock),
            transaction_digests,
            contract_fees,
            signature: Signature::from_bytes(signature),
        })
    }

    /// Same XOR-of-type-code preimage trick as tick votes, with this type's
    /// code.
    pub fn signing_digest(&self) -> Digest {
        let mut msg = Vec::with_capacity(TICK_DATA_WIRE_SIZE - SIGNATURE_SIZE);
        self.encode_unsigned(
            self.computor_index ^ MessageType::BroadcastFutureTickData as u16,
            &mut msg,
        );
        crypto::digest(&msg)
    }

    pub fn sign(&mut self, keypair: &KeyPair) {
        self.signature = keypair.sign(&self.signing_digest());
    }

    /// Content digest over the full encoding. Votes reference tick data by
    /// this value.
    pub fn digest(&self) -> Digest {
        crypto::digest(&self.encode())
    }

    /// Non-zero transaction digests must be pairwise distinct.
    pub fn has_distinct_transaction_digests(&self) -> bool {
        for i in 0..self.transaction_digests.len() {
            if self.transaction_digests[i].is_zero() {
                continue;
            }
            for j in 0..i {
                if self.transaction_digests[i] == self.transaction_digests[j] {
                    return false;
                }
            }
        }
        true
    }

    pub fn number_of_transactions(&self) -> usize {
        self.transaction_digests.iter().filter(|d| !d.is_zero()).count()
    }
}

/// Timelock preimage over the three state digests.
pub fn timelock_digest(spectrum: &Digest, universe: &Digest, computer: &Digest) -> Digest {
    let mut msg = Vec::with_capacity(96);
    msg.extend_from_slice(spectrum.as_bytes());
    msg.extend_from_slice(universe.as_bytes());
    msg.extend_from_slice(computer.as_bytes());
    crypto::digest(&msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vote() -> TickVote {
        TickVote {
            computor_index: 5,
            epoch: 1,
            tick: 100,
            time: TickTime { day: 1, month: 1, year: 22, ..Default::default() },
            prev_resource_testing_digest: 11,
            salted_resource_testing_digest: 22,
            prev_spectrum_digest: crypto::digest(b"s"),
            prev_universe_digest: crypto::digest(b"u"),
            prev_computer_digest: crypto::digest(b"c"),
            salted_spectrum_digest: crypto::digest(b"ss"),
            salted_universe_digest: crypto::digest(b"su"),
            salted_computer_digest: crypto::digest(b"sc"),
            transaction_digest: crypto::digest(b"t"),
            expected_next_tick_transaction_digest: Digest::ZERO,
            signature: Signature::ZERO,
        }
    }

    #[test]
    fn tick_vote_round_trip_and_signature() {
        let keypair = KeyPair::generate();
        let mut vote = sample_vote();
        vote.sign(&keypair);

        let bytes = vote.encode();
        assert_eq!(bytes.len(), TICK_VOTE_WIRE_SIZE);
        let decoded = TickVote::decode(&bytes).unwrap();
        assert_eq!(decoded, vote);
        assert!(keypair.public_key().verify(&decoded.signing_digest(), &decoded.signature));
    }

    #[test]
    fn signing_preimage_depends_on_computor_index() {
        let vote = sample_vote();
        let mut other = vote;
        other.computor_index = 6;
        assert_ne!(vote.signing_digest(), other.signing_digest());
    }

    #[test]
    fn essence_ignores_salted_digests() {
        let vote = sample_vote();
        let mut other = vote;
        other.salted_spectrum_digest = crypto::digest(b"different");
        assert_eq!(vote.essence().digest(), other.essence().digest());
    }

    #[test]
    fn tick_data_round_trip() {
        let keypair = KeyPair::generate();
        let mut data = TickData {
            computor_index: 100 % NUMBER_OF_COMPUTORS as u16,
            epoch: 1,
            tick: 100,
            time: TickTime { day: 1, month: 1, year: 22, ..Default::default() },
            ..Default::default()
        };
        data.transaction_digests[0] = crypto::digest(b"tx0");
        data.sign(&keypair);

        let bytes = data.encode();
        assert_eq!(bytes.len(), TICK_DATA_WIRE_SIZE);
        let decoded = TickData::decode(&bytes).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.digest(), data.digest());
        assert_eq!(decoded.number_of_transactions(), 1);
    }

    #[test]
    fn duplicate_transaction_digests_are_detected() {
        let mut data = TickData::default();
        data.transaction_digests[0] = crypto::digest(b"dup");
        data.transaction_digests[7] = crypto::digest(b"dup");
        assert!(!data.has_distinct_transaction_digests());

        data.transaction_digests[7] = Digest::ZERO;
        assert!(data.has_distinct_transaction_digests());
    }

    #[test]
    fn proposal_or_ballot_discriminates_on_first_byte() {
        let proposal = ProposalOrBallot::Proposal(Proposal { uri: b"tessera://vote".to_vec() });
        let mut bytes = Vec::new();
        proposal.encode_into(&mut bytes);
        assert_eq!(bytes.len(), PROPOSAL_OR_BALLOT_WIRE_SIZE);
        assert_eq!(ProposalOrBallot::decode(&bytes), Some(proposal));

        let ballot = ProposalOrBallot::Ballot(Ballot { votes: vec![3u8; BALLOT_VOTES_SIZE], quasi_random_number: 9 });
        let mut bytes = Vec::new();
        ballot.encode_into(&mut bytes);
        assert_eq!(ProposalOrBallot::decode(&bytes), Some(ballot));
    }
}
