// Request/response bodies of the wire protocol that are not transactions,
// votes, or tick data.

use crate::asset::{Asset, ASSET_WIRE_SIZE};
use crate::codec::CodecError;
use crate::constants::{NUMBER_OF_COMPUTORS, NUMBER_OF_EXCHANGED_PEERS, NUMBER_OF_TRANSACTIONS_PER_TICK, SIGNATURE_SIZE};
use crate::crypto::{self, KeyPair};
use crate::tick::{Ballot, Proposal, BALLOT_VOTES_SIZE};
use crate::types::{Digest, Entity, PublicKey, Signature, ENTITY_WIRE_SIZE};
use serde::{Deserialize, Serialize};

fn read_public_key(bytes: &[u8]) -> PublicKey {
    let mut pk = [0u8; 32];
    pk.copy_from_slice(&bytes[..32]);
    PublicKey::from_bytes(pk)
}

fn read_digest(bytes: &[u8]) -> Digest {
    let mut d = [0u8; 32];
    d.copy_from_slice(&bytes[..32]);
    Digest::from_bytes(d)
}

fn read_signature(bytes: &[u8]) -> Signature {
    let mut s = [0u8; 64];
    s.copy_from_slice(&bytes[..64]);
    Signature::from_bytes(s)
}

pub const EXCHANGE_PUBLIC_PEERS_WIRE_SIZE: usize = NUMBER_OF_EXCHANGED_PEERS * 4;

/// Four IPv4 addresses drawn from the sender's verified peer book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePublicPeers {
    pub peers: [[u8; 4]; NUMBER_OF_EXCHANGED_PEERS],
}

impl ExchangePublicPeers {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EXCHANGE_PUBLIC_PEERS_WIRE_SIZE);
        for peer in &self.peers {
            out.extend_from_slice(peer);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != EXCHANGE_PUBLIC_PEERS_WIRE_SIZE {
            return Err(CodecError::MalformedBody("exchange public peers"));
        }
        let mut peers = [[0u8; 4]; NUMBER_OF_EXCHANGED_PEERS];
        for (i, peer) in peers.iter_mut().enumerate() {
            peer.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
        }
        Ok(ExchangePublicPeers { peers })
    }
}

pub const GENERAL_MESSAGE_PREFIX_SIZE: usize = 32 + 32 + 32;
pub const MAX_MESSAGE_PAYLOAD_SIZE: usize = crate::constants::MAX_TRANSACTION_SIZE;

/// Payload type carried in the first byte of the gamming key.
pub const MESSAGE_TYPE_SOLUTION: u8 = 0;

/// General-purpose gossip message; the payload is gammed with a key derived
/// from the sender/recipient shared secret. Anonymous messages use a zero
/// source key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralMessage {
    pub source_public_key: PublicKey,
    pub destination_public_key: PublicKey,
    pub gamming_nonce: [u8; 32],
    pub payload: Vec<u8>,
    pub signature: Signature,
}

impl GeneralMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(GENERAL_MESSAGE_PREFIX_SIZE + self.payload.len() + SIGNATURE_SIZE);
        out.extend_from_slice(self.source_public_key.as_bytes());
        out.extend_from_slice(self.destination_public_key.as_bytes());
        out.extend_from_slice(&self.gamming_nonce);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < GENERAL_MESSAGE_PREFIX_SIZE + SIGNATURE_SIZE
            || bytes.len() > GENERAL_MESSAGE_PREFIX_SIZE + MAX_MESSAGE_PAYLOAD_SIZE + SIGNATURE_SIZE
        {
            return Err(CodecError::MalformedBody("broadcast message"));
        }
        let mut gamming_nonce = [0u8; 32];
        gamming_nonce.copy_from_slice(&bytes[64..96]);
        Ok(GeneralMessage {
            source_public_key: read_public_key(&bytes[0..32]),
            destination_public_key: read_public_key(&bytes[32..64]),
            gamming_nonce,
            payload: bytes[GENERAL_MESSAGE_PREFIX_SIZE..bytes.len() - SIGNATURE_SIZE].to_vec(),
            signature: read_signature(&bytes[bytes.len() - SIGNATURE_SIZE..]),
        })
    }

    pub fn signing_digest(&self) -> Digest {
        let bytes = self.encode();
        crypto::digest(&bytes[..bytes.len() - SIGNATURE_SIZE])
    }

    /// Anonymous messages skip signature verification entirely.
    pub fn verify(&self) -> bool {
        if self.source_public_key.is_zero() {
            return true;
        }
        self.source_public_key
            .verify(&self.signing_digest(), &self.signature)
    }
}

pub const COMPUTORS_WIRE_SIZE: usize = 2 + NUMBER_OF_COMPUTORS * 32 + SIGNATURE_SIZE;

/// The committee for one epoch, signed by the arbitrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computors {
    pub epoch: u16,
    pub public_keys: Vec<PublicKey>,
    pub signature: Signature,
}

impl Default for Computors {
    fn default() -> Self {
        Computors {
            epoch: 0,
            public_keys: vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS],
            signature: Signature::ZERO,
        }
    }
}

impl Computors {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMPUTORS_WIRE_SIZE);
        out.extend_from_slice(&self.epoch.to_le_bytes());
        for i in 0..NUMBER_OF_COMPUTORS {
            let pk = self.public_keys.get(i).copied().unwrap_or(PublicKey::ZERO);
            out.extend_from_slice(pk.as_bytes());
        }
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != COMPUTORS_WIRE_SIZE {
            return Err(CodecError::MalformedBody("computors"));
        }
        let mut public_keys = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..NUMBER_OF_COMPUTORS {
            public_keys.push(read_public_key(&bytes[2 + i * 32..]));
        }
        Ok(Computors {
            epoch: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            public_keys,
            signature: read_signature(&bytes[COMPUTORS_WIRE_SIZE - SIGNATURE_SIZE..]),
        })
    }

    pub fn signing_digest(&self) -> Digest {
        let bytes = self.encode();
        crypto::digest(&bytes[..bytes.len() - SIGNATURE_SIZE])
    }

    pub fn sign(&mut self, arbitrator: &KeyPair) {
        self.signature = arbitrator.sign(&self.signing_digest());
    }

    pub fn verify(&self, arbitrator: &PublicKey) -> bool {
        arbitrator.verify(&self.signing_digest(), &self.signature)
    }
}

pub const VOTE_FLAGS_SIZE: usize = (NUMBER_OF_COMPUTORS + 7) / 8;
pub const REQUEST_QUORUM_TICK_WIRE_SIZE: usize = 4 + VOTE_FLAGS_SIZE;

/// Ask for the votes of one tick; the flags mark computors the caller
/// already has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQuorumTick {
    pub tick: u32,
    pub vote_flags: Vec<u8>,
}

impl RequestQuorumTick {
    pub fn new(tick: u32) -> Self {
        RequestQuorumTick {
            tick,
            vote_flags: vec![0u8; VOTE_FLAGS_SIZE],
        }
    }

    pub fn has_vote(&self, computor_index: usize) -> bool {
        self.vote_flags[computor_index >> 3] & (1 << (computor_index & 7)) != 0
    }

    pub fn mark_vote(&mut self, computor_index: usize) {
        self.vote_flags[computor_index >> 3] |= 1 << (computor_index & 7);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REQUEST_QUORUM_TICK_WIRE_SIZE);
        out.extend_from_slice(&self.tick.to_le_bytes());
        let mut flags = self.vote_flags.clone();
        flags.resize(VOTE_FLAGS_SIZE, 0);
        out.extend_from_slice(&flags);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != REQUEST_QUORUM_TICK_WIRE_SIZE {
            return Err(CodecError::MalformedBody("request quorum tick"));
        }
        Ok(RequestQuorumTick {
            tick: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            vote_flags: bytes[4..].to_vec(),
        })
    }
}

/// Ask for the tick data of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTickData {
    pub tick: u32,
}

impl RequestTickData {
    pub fn encode(&self) -> Vec<u8> {
        self.tick.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 4 {
            return Err(CodecError::MalformedBody("request tick data"));
        }
        Ok(RequestTickData {
            tick: u32::from_le_bytes(bytes.try_into().unwrap()),
        })
    }
}

pub const TRANSACTION_FLAGS_SIZE: usize = NUMBER_OF_TRANSACTIONS_PER_TICK / 8;
pub const REQUEST_TICK_TRANSACTIONS_WIRE_SIZE: usize = 4 + TRANSACTION_FLAGS_SIZE;

/// Ask for a tick's transactions; the flags mark slots the caller already
/// has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTickTransactions {
    pub tick: u32,
    pub transaction_flags: Vec<u8>,
}

impl RequestTickTransactions {
    pub fn new(tick: u32) -> Self {
        RequestTickTransactions {
            tick,
            transaction_flags: vec![0u8; TRANSACTION_FLAGS_SIZE],
        }
    }

    pub fn has_transaction(&self, slot: usize) -> bool {
        self.transaction_flags[slot >> 3] & (1 << (slot & 7)) != 0
    }

    pub fn mark_transaction(&mut self, slot: usize) {
        self.transaction_flags[slot >> 3] |= 1 << (slot & 7);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REQUEST_TICK_TRANSACTIONS_WIRE_SIZE);
        out.extend_from_slice(&self.tick.to_le_bytes());
        let mut flags = self.transaction_flags.clone();
        flags.resize(TRANSACTION_FLAGS_SIZE, 0);
        out.extend_from_slice(&flags);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != REQUEST_TICK_TRANSACTIONS_WIRE_SIZE {
            return Err(CodecError::MalformedBody("request tick transactions"));
        }
        Ok(RequestTickTransactions {
            tick: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            transaction_flags: bytes[4..].to_vec(),
        })
    }
}

pub const CURRENT_TICK_INFO_WIRE_SIZE: usize = 12;

/// Liveness summary answered without authentication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTickInfo {
    /// Duration of the last tick in milliseconds, saturated to u16.
    pub tick_duration: u16,
    pub epoch: u16,
    pub tick: u32,
    pub number_of_aligned_votes: u16,
    pub number_of_misaligned_votes: u16,
}

impl CurrentTickInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CURRENT_TICK_INFO_WIRE_SIZE);
        out.extend_from_slice(&self.tick_duration.to_le_bytes());
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.number_of_aligned_votes.to_le_bytes());
        out.extend_from_slice(&self.number_of_misaligned_votes.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != CURRENT_TICK_INFO_WIRE_SIZE {
            return Err(CodecError::MalformedBody("current tick info"));
        }
        Ok(CurrentTickInfo {
            tick_duration: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            epoch: u16::from_le_bytes(bytes[2..4].try_into().unwrap()),
            tick: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            number_of_aligned_votes: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
            number_of_misaligned_votes: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
        })
    }
}

/// Ask for one spectrum record by public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntity {
    pub public_key: PublicKey,
}

impl RequestEntity {
    pub fn encode(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 32 {
            return Err(CodecError::MalformedBody("request entity"));
        }
        Ok(RequestEntity {
            public_key: read_public_key(bytes),
        })
    }
}

/// Spectrum record with its Merkle path at the answered tick. A negative
/// index means the entity does not exist; the siblings are zeroed then.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondEntity {
    pub entity: Entity,
    pub tick: u32,
    pub spectrum_index: i32,
    pub siblings: Vec<Digest>,
}

impl RespondEntity {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENTITY_WIRE_SIZE + 8 + self.siblings.len() * 32);
        out.extend_from_slice(&self.entity.encode());
        out.extend_from_slice(&self.tick.to_le_bytes());
        out.extend_from_slice(&self.spectrum_index.to_le_bytes());
        for sibling in &self.siblings {
            out.extend_from_slice(sibling.as_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < ENTITY_WIRE_SIZE + 8 || (bytes.len() - ENTITY_WIRE_SIZE - 8) % 32 != 0 {
            return Err(CodecError::MalformedBody("respond entity"));
        }
        let entity =
            Entity::decode(&bytes[..ENTITY_WIRE_SIZE]).ok_or(CodecError::MalformedBody("respond entity"))?;
        let tick = u32::from_le_bytes(bytes[ENTITY_WIRE_SIZE..ENTITY_WIRE_SIZE + 4].try_into().unwrap());
        let spectrum_index =
            i32::from_le_bytes(bytes[ENTITY_WIRE_SIZE + 4..ENTITY_WIRE_SIZE + 8].try_into().unwrap());
        let mut siblings = Vec::new();
        let mut offset = ENTITY_WIRE_SIZE + 8;
        while offset < bytes.len() {
            siblings.push(read_digest(&bytes[offset..]));
            offset += 32;
        }
        Ok(RespondEntity {
            entity,
            tick,
            spectrum_index,
            siblings,
        })
    }
}

/// Ask for a contract's IPO book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContractIpo {
    pub contract_index: u32,
}

impl RequestContractIpo {
    pub fn encode(&self) -> Vec<u8> {
        self.contract_index.to_le_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 4 {
            return Err(CodecError::MalformedBody("request contract ipo"));
        }
        Ok(RequestContractIpo {
            contract_index: u32::from_le_bytes(bytes.try_into().unwrap()),
        })
    }
}

pub const RESPOND_CONTRACT_IPO_WIRE_SIZE: usize = 4 + 4 + NUMBER_OF_COMPUTORS * 32 + NUMBER_OF_COMPUTORS * 8;

/// The descending bid book of a contract under construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondContractIpo {
    pub contract_index: u32,
    pub tick: u32,
    pub public_keys: Vec<PublicKey>,
    pub prices: Vec<i64>,
}

impl RespondContractIpo {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RESPOND_CONTRACT_IPO_WIRE_SIZE);
        out.extend_from_slice(&self.contract_index.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());
        for i in 0..NUMBER_OF_COMPUTORS {
            let pk = self.public_keys.get(i).copied().unwrap_or(PublicKey::ZERO);
            out.extend_from_slice(pk.as_bytes());
        }
        for i in 0..NUMBER_OF_COMPUTORS {
            out.extend_from_slice(&self.prices.get(i).copied().unwrap_or(0).to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != RESPOND_CONTRACT_IPO_WIRE_SIZE {
            return Err(CodecError::MalformedBody("respond contract ipo"));
        }
        let mut public_keys = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..NUMBER_OF_COMPUTORS {
            public_keys.push(read_public_key(&bytes[8 + i * 32..]));
        }
        let prices_offset = 8 + NUMBER_OF_COMPUTORS * 32;
        let mut prices = Vec::with_capacity(NUMBER_OF_COMPUTORS);
        for i in 0..NUMBER_OF_COMPUTORS {
            prices.push(i64::from_le_bytes(
                bytes[prices_offset + i * 8..prices_offset + i * 8 + 8].try_into().unwrap(),
            ));
        }
        Ok(RespondContractIpo {
            contract_index: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            tick: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            public_keys,
            prices,
        })
    }
}

/// Asset queries share one request shape: a public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAssets {
    pub public_key: PublicKey,
}

impl RequestAssets {
    pub fn encode(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != 32 {
            return Err(CodecError::MalformedBody("request assets"));
        }
        Ok(RequestAssets {
            public_key: read_public_key(bytes),
        })
    }
}

/// One page of an asset response. Owned assets carry the backing issuance;
/// possessed assets carry both the ownership and the issuance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondAssets {
    pub asset: Asset,
    pub chain: Vec<Asset>,
    pub tick: u32,
}

impl RespondAssets {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ASSET_WIRE_SIZE * (1 + self.chain.len()) + 4);
        out.extend_from_slice(&self.asset.encode());
        for asset in &self.chain {
            out.extend_from_slice(&asset.encode());
        }
        out.extend_from_slice(&self.tick.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < ASSET_WIRE_SIZE + 4 || (bytes.len() - 4) % ASSET_WIRE_SIZE != 0 {
            return Err(CodecError::MalformedBody("respond assets"));
        }
        let asset = Asset::decode(&bytes[..ASSET_WIRE_SIZE])
            .ok_or(CodecError::MalformedBody("respond assets"))?;
        let mut chain = Vec::new();
        let mut offset = ASSET_WIRE_SIZE;
        while offset + ASSET_WIRE_SIZE <= bytes.len() - 4 {
            chain.push(
                Asset::decode(&bytes[offset..offset + ASSET_WIRE_SIZE])
                    .ok_or(CodecError::MalformedBody("respond assets"))?,
            );
            offset += ASSET_WIRE_SIZE;
        }
        let tick = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        Ok(RespondAssets { asset, chain, tick })
    }
}

pub const SPECIAL_COMMAND_SHUT_DOWN: u8 = 0;
pub const SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_REQUEST: u8 = 1;
pub const SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_RESPONSE: u8 = 2;
pub const SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_REQUEST: u8 = 3;
pub const SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_RESPONSE: u8 = 4;

const PROPOSAL_WIRE_SIZE: usize = 256;
const BALLOT_WIRE_SIZE: usize = 256;

fn encode_proposal(proposal: &Proposal, out: &mut Vec<u8>) {
    let start = out.len();
    out.push(proposal.uri.len().min(255) as u8);
    out.extend_from_slice(&proposal.uri[..proposal.uri.len().min(255)]);
    out.resize(start + PROPOSAL_WIRE_SIZE, 0);
}

fn decode_proposal(bytes: &[u8]) -> Option<Proposal> {
    if bytes.len() < PROPOSAL_WIRE_SIZE {
        return None;
    }
    let uri_size = bytes[0] as usize;
    Some(Proposal {
        uri: bytes[1..1 + uri_size].to_vec(),
    })
}

fn encode_ballot(ballot: &Ballot, out: &mut Vec<u8>) {
    let start = out.len();
    out.push(0);
    let mut votes = ballot.votes.clone();
    votes.resize(BALLOT_VOTES_SIZE, 0);
    out.extend_from_slice(&votes);
    out.push(ballot.quasi_random_number);
    out.resize(start + BALLOT_WIRE_SIZE, 0);
}

fn decode_ballot(bytes: &[u8]) -> Option<Ballot> {
    if bytes.len() < BALLOT_WIRE_SIZE {
        return None;
    }
    Some(Ballot {
        votes: bytes[1..1 + BALLOT_VOTES_SIZE].to_vec(),
        quasi_random_number: bytes[1 + BALLOT_VOTES_SIZE],
    })
}

/// Operator channel command. The low 56 bits of the leading word are a
/// strictly increasing nonce; the high 8 bits select the command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecialCommand {
    ShutDown {
        nonce: u64,
        signature: Signature,
    },
    GetProposalAndBallotRequest {
        nonce: u64,
        computor_index: u16,
        signature: Signature,
    },
    GetProposalAndBallotResponse {
        nonce: u64,
        computor_index: u16,
        proposal: Proposal,
        ballot: Ballot,
    },
    SetProposalAndBallotRequest {
        nonce: u64,
        computor_index: u16,
        proposal: Proposal,
        ballot: Ballot,
        signature: Signature,
    },
    SetProposalAndBallotResponse {
        nonce: u64,
        computor_index: u16,
    },
}

impl SpecialCommand {
    pub fn nonce(&self) -> u64 {
        match self {
            SpecialCommand::ShutDown { nonce, .. }
            | SpecialCommand::GetProposalAndBallotRequest { nonce, .. }
            | SpecialCommand::GetProposalAndBallotResponse { nonce, .. }
            | SpecialCommand::SetProposalAndBallotRequest { nonce, .. }
            | SpecialCommand::SetProposalAndBallotResponse { nonce, .. } => *nonce & 0xFF_FFFF_FFFF_FFFF,
        }
    }

    pub fn command_type(&self) -> u8 {
        match self {
            SpecialCommand::ShutDown { .. } => SPECIAL_COMMAND_SHUT_DOWN,
            SpecialCommand::GetProposalAndBallotRequest { .. } => {
                SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_REQUEST
            }
            SpecialCommand::GetProposalAndBallotResponse { .. } => {
                SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_RESPONSE
            }
            SpecialCommand::SetProposalAndBallotRequest { .. } => {
                SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_REQUEST
            }
            SpecialCommand::SetProposalAndBallotResponse { .. } => {
                SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_RESPONSE
            }
        }
    }

    fn leading_word(&self) -> u64 {
        self.nonce() | (self.command_type() as u64) << 56
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.leading_word().to_le_bytes());
        match self {
            SpecialCommand::ShutDown { signature, .. } => {
                out.extend_from_slice(signature.as_bytes());
            }
            SpecialCommand::GetProposalAndBallotRequest {
                computor_index,
                signature,
                ..
            } => {
                out.extend_from_slice(&computor_index.to_le_bytes());
                out.extend_from_slice(&[0u8; 6]);
                out.extend_from_slice(signature.as_bytes());
            }
            SpecialCommand::GetProposalAndBallotResponse {
                computor_index,
                proposal,
                ballot,
                ..
            } => {
                out.extend_from_slice(&computor_index.to_le_bytes());
                out.extend_from_slice(&[0u8; 6]);
                encode_proposal(proposal, &mut out);
                encode_ballot(ballot, &mut out);
            }
            SpecialCommand::SetProposalAndBallotRequest {
                computor_index,
                proposal,
                ballot,
                signature,
                ..
            } => {
                out.extend_from_slice(&computor_index.to_le_bytes());
                out.extend_from_slice(&[0u8; 6]);
                encode_proposal(proposal, &mut out);
                encode_ballot(ballot, &mut out);
                out.extend_from_slice(signature.as_bytes());
            }
            SpecialCommand::SetProposalAndBallotResponse { computor_index, .. } => {
                out.extend_from_slice(&computor_index.to_le_bytes());
                out.extend_from_slice(&[0u8; 6]);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 8 {
            return Err(CodecError::MalformedBody("special command"));
        }
        let word = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let nonce = word & 0xFF_FFFF_FFFF_FFFF;
        let command = (word >> 56) as u8;
        match command {
            SPECIAL_COMMAND_SHUT_DOWN => {
                if bytes.len() != 8 + SIGNATURE_SIZE {
                    return Err(CodecError::MalformedBody("special command"));
                }
                Ok(SpecialCommand::ShutDown {
                    nonce,
                    signature: read_signature(&bytes[8..]),
                })
            }
            SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_REQUEST => {
                if bytes.len() != 8 + 8 + SIGNATURE_SIZE {
                    return Err(CodecError::MalformedBody("special command"));
                }
                Ok(SpecialCommand::GetProposalAndBallotRequest {
                    nonce,
                    computor_index: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
                    signature: read_signature(&bytes[16..]),
                })
            }
            SPECIAL_COMMAND_GET_PROPOSAL_AND_BALLOT_RESPONSE => {
                if bytes.len() != 8 + 8 + PROPOSAL_WIRE_SIZE + BALLOT_WIRE_SIZE {
                    return Err(CodecError::MalformedBody("special command"));
                }
                Ok(SpecialCommand::GetProposalAndBallotResponse {
                    nonce,
                    computor_index: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
                    proposal: decode_proposal(&bytes[16..])
                        .ok_or(CodecError::MalformedBody("special command"))?,
                    ballot: decode_ballot(&bytes[16 + PROPOSAL_WIRE_SIZE..])
                        .ok_or(CodecError::MalformedBody("special command"))?,
                })
            }
            SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_REQUEST => {
                if bytes.len() != 8 + 8 + PROPOSAL_WIRE_SIZE + BALLOT_WIRE_SIZE + SIGNATURE_SIZE {
                    return Err(CodecError::MalformedBody("special command"));
                }
                Ok(SpecialCommand::SetProposalAndBallotRequest {
                    nonce,
                    computor_index: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
                    proposal: decode_proposal(&bytes[16..])
                        .ok_or(CodecError::MalformedBody("special command"))?,
                    ballot: decode_ballot(&bytes[16 + PROPOSAL_WIRE_SIZE..])
                        .ok_or(CodecError::MalformedBody("special command"))?,
                    signature: read_signature(&bytes[bytes.len() - SIGNATURE_SIZE..]),
                })
            }
            SPECIAL_COMMAND_SET_PROPOSAL_AND_BALLOT_RESPONSE => {
                if bytes.len() != 16 {
                    return Err(CodecError::MalformedBody("special command"));
                }
                Ok(SpecialCommand::SetProposalAndBallotResponse {
                    nonce,
                    computor_index: u16::from_le_bytes(bytes[8..10].try_into().unwrap()),
                })
            }
            _ => Err(CodecError::MalformedBody("special command")),
        }
    }

    /// Digest the operator signs: the whole body up to the signature.
    pub fn signing_digest(&self) -> Digest {
        let bytes = self.encode();
        let unsigned_len = match self {
            SpecialCommand::ShutDown { .. }
            | SpecialCommand::GetProposalAndBallotRequest { .. }
            | SpecialCommand::SetProposalAndBallotRequest { .. } => bytes.len() - SIGNATURE_SIZE,
            _ => bytes.len(),
        };
        crypto::digest(&bytes[..unsigned_len])
    }

    pub fn sign(&mut self, operator: &KeyPair) {
        let digest = self.signing_digest();
        match self {
            SpecialCommand::ShutDown { signature, .. }
            | SpecialCommand::GetProposalAndBallotRequest { signature, .. }
            | SpecialCommand::SetProposalAndBallotRequest { signature, .. } => {
                *signature = operator.sign(&digest);
            }
            _ => {}
        }
    }

    pub fn verify(&self, operator: &PublicKey) -> bool {
        match self {
            SpecialCommand::ShutDown { signature, .. }
            | SpecialCommand::GetProposalAndBallotRequest { signature, .. }
            | SpecialCommand::SetProposalAndBallotRequest { signature, .. } => {
                operator.verify(&self.signing_digest(), signature)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_public_peers_round_trip() {
        let message = ExchangePublicPeers {
            peers: [[203, 0, 113, 1], [198, 51, 100, 2], [192, 0, 2, 3], [203, 0, 113, 4]],
        };
        assert_eq!(ExchangePublicPeers::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn computors_sign_and_round_trip() {
        let arbitrator = KeyPair::generate();
        let mut computors = Computors::default();
        computors.epoch = 3;
        computors.public_keys[0] = KeyPair::generate().public_key();
        computors.sign(&arbitrator);

        let bytes = computors.encode();
        assert_eq!(bytes.len(), COMPUTORS_WIRE_SIZE);
        let decoded = Computors::decode(&bytes).unwrap();
        assert_eq!(decoded, computors);
        assert!(decoded.verify(&arbitrator.public_key()));
        assert!(!decoded.verify(&KeyPair::generate().public_key()));
    }

    #[test]
    fn quorum_tick_flags() {
        let mut request = RequestQuorumTick::new(42);
        request.mark_vote(675);
        assert!(request.has_vote(675));
        assert!(!request.has_vote(0));
        assert_eq!(RequestQuorumTick::decode(&request.encode()).unwrap(), request);
    }

    #[test]
    fn current_tick_info_round_trip() {
        let info = CurrentTickInfo {
            tick_duration: 4000,
            epoch: 9,
            tick: 123456,
            number_of_aligned_votes: 451,
            number_of_misaligned_votes: 3,
        };
        assert_eq!(CurrentTickInfo::decode(&info.encode()).unwrap(), info);
    }

    #[test]
    fn special_command_nonce_and_type() {
        let operator = KeyPair::generate();
        let mut command = SpecialCommand::ShutDown { nonce: 77, signature: Signature::ZERO };
        command.sign(&operator);
        assert_eq!(command.nonce(), 77);
        assert_eq!(command.command_type(), SPECIAL_COMMAND_SHUT_DOWN);

        let decoded = SpecialCommand::decode(&command.encode()).unwrap();
        assert_eq!(decoded, command);
        assert!(decoded.verify(&operator.public_key()));
        assert!(!decoded.verify(&KeyPair::generate().public_key()));
    }

    #[test]
    fn special_command_set_round_trip() {
        let command = SpecialCommand::SetProposalAndBallotRequest {
            nonce: 1000,
            computor_index: 5,
            proposal: Proposal { uri: b"tessera://upgrade".to_vec() },
            ballot: Ballot::default(),
            signature: Signature::from_bytes([9u8; 64]),
        };
        assert_eq!(SpecialCommand::decode(&command.encode()).unwrap(), command);
    }

    #[test]
    fn anonymous_message_skips_signature() {
        let message = GeneralMessage {
            source_public_key: PublicKey::ZERO,
            destination_public_key: PublicKey::from_bytes([1u8; 32]),
            gamming_nonce: [0u8; 32],
            payload: vec![0u8; 32],
            signature: Signature::ZERO,
        };
        assert!(message.verify());
        assert_eq!(GeneralMessage::decode(&message.encode()).unwrap(), message);
    }
}
