// Request dispatcher
// Verifies each frame inside its per-type handler and routes it into the
// stores, the tick log, or back out as a response.

use crate::peers::PeerBook;
use crate::queue::{Outbound, PeerId};
use rand::seq::SliceRandom;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tessera_consensus::{admit_solution, current_tick_info, NodeState, ScoreOracle, Solution};
use tessera_core::{
    crypto, Computors, CurrentTickInfo, Digest, ExchangePublicPeers, Frame, GeneralMessage,
    MessageType, RequestAssets, RequestContractIpo, RequestEntity, RequestQuorumTick,
    RequestTickData, RequestTickTransactions, RespondAssets, RespondContractIpo, RespondEntity,
    SpecialCommand, TickData, TickTime, TickVote, Transaction, MESSAGE_DISSEMINATION_THRESHOLD,
    MESSAGE_TYPE_SOLUTION, NUMBER_OF_COMPUTORS, NUMBER_OF_TRANSACTIONS_PER_TICK,
    TIME_ACCURACY_MS,
};
use tessera_state::Ipo;
use tracing::{debug, trace};

/// Local wall clock in protocol form, for tick-data skew checks.
fn wall_clock() -> TickTime {
    use chrono::{Datelike, Timelike, Utc};
    let now = Utc::now();
    TickTime {
        millisecond: (now.timestamp_subsec_millis() % 1000) as u16,
        second: now.second() as u8,
        minute: now.minute() as u8,
        hour: now.hour() as u8,
        day: now.day() as u8,
        month: now.month() as u8,
        year: (now.year() - 2000).clamp(0, 255) as u8,
    }
}

/// Routes verified requests into the node. One instance is shared by all
/// request workers.
pub struct Dispatcher {
    state: Arc<NodeState>,
    peers: Arc<PeerBook>,
    scorer: Arc<dyn ScoreOracle>,
}

impl Dispatcher {
    pub fn new(state: Arc<NodeState>, peers: Arc<PeerBook>, scorer: Arc<dyn ScoreOracle>) -> Self {
        Dispatcher { state, peers, scorer }
    }

    /// Handle one deduplicated frame. Returns the responses and
    /// re-broadcasts it produced.
    pub fn handle(&self, peer: PeerId, frame: &Frame) -> Vec<Outbound> {
        let mut out = Vec::new();
        let message_type = match frame.message_type() {
            Some(message_type) => message_type,
            None => {
                self.state.stats.discarded_requests.fetch_add(1, Ordering::Relaxed);
                return out;
            }
        };
        match message_type {
            MessageType::ExchangePublicPeers => self.on_exchange_public_peers(frame),
            MessageType::BroadcastMessage => self.on_broadcast_message(frame, &mut out),
            MessageType::BroadcastComputors => self.on_broadcast_computors(frame, &mut out),
            MessageType::BroadcastTick => self.on_broadcast_tick(frame, &mut out),
            MessageType::BroadcastFutureTickData => self.on_broadcast_tick_data(frame, &mut out),
            MessageType::BroadcastTransaction => self.on_broadcast_transaction(frame, &mut out),
            MessageType::RequestComputors => self.on_request_computors(peer, frame, &mut out),
            MessageType::RequestQuorumTick => self.on_request_quorum_tick(peer, frame, &mut out),
            MessageType::RequestTickData => self.on_request_tick_data(peer, frame, &mut out),
            MessageType::RequestTickTransactions => {
                self.on_request_tick_transactions(peer, frame, &mut out)
            }
            MessageType::RequestCurrentTickInfo => {
                self.on_request_current_tick_info(peer, frame, &mut out)
            }
            MessageType::RequestEntity => self.on_request_entity(peer, frame, &mut out),
            MessageType::RequestContractIpo => self.on_request_contract_ipo(peer, frame, &mut out),
            MessageType::RequestIssuedAssets
            | MessageType::RequestOwnedAssets
            | MessageType::RequestPossessedAssets => {
                self.on_request_assets(peer, frame, message_type, &mut out)
            }
            MessageType::SpecialCommand => self.on_special_command(peer, frame, &mut out),
            _ => {
                // Respond-type frames are not requests; nothing to do.
                self.state.stats.discarded_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.state.stats.processed_requests.fetch_add(1, Ordering::Relaxed);
        out
    }

    /// Gossip frames travel onwards unless they are self-issued responses
    /// (dejavu zero).
    fn rebroadcast(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        if frame.header.dejavu != 0 {
            out.push(Outbound::Broadcast(frame.clone()));
            self.state
                .stats
                .disseminated_requests
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reply(&self, peer: PeerId, frame: &Frame, message_type: MessageType, body: Vec<u8>, out: &mut Vec<Outbound>) {
        out.push(Outbound::Reply {
            peer,
            frame: Frame::new(message_type, frame.header.dejavu, body),
        });
    }

    fn end_response(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        self.reply(peer, frame, MessageType::EndResponse, Vec::new(), out);
    }

    fn on_exchange_public_peers(&self, frame: &Frame) {
        if let Ok(exchange) = ExchangePublicPeers::decode(&frame.body) {
            self.peers.ingest(&exchange);
        }
    }

    fn on_broadcast_message(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        let message = match GeneralMessage::decode(&frame.body) {
            Ok(message) => message,
            Err(_) => return,
        };
        if !message.verify() {
            return;
        }

        // Relaying costs the network; only entities with skin in the game
        // get their messages spread.
        let funded = {
            let spectrum = self.state.spectrum.lock().unwrap();
            spectrum
                .index_of(&message.source_public_key)
                .map(|index| spectrum.balance(index) >= MESSAGE_DISSEMINATION_THRESHOLD)
                .unwrap_or(false)
        };
        if funded {
            self.rebroadcast(frame, out);
        }

        // Messages addressed to one of our identities may carry a gammed
        // solution hint.
        let for_us = self
            .state
            .identities
            .iter()
            .any(|identity| identity.public_key() == message.destination_public_key);
        if !for_us || message.payload.is_empty() {
            return;
        }
        let shared = crypto::shared_secret(&message.source_public_key, &message.destination_public_key);
        let gamming_key = crypto::combine(&shared, &Digest::from_bytes(message.gamming_nonce));
        let gamma = crypto::expand(&gamming_key, message.payload.len());
        let payload: Vec<u8> = message
            .payload
            .iter()
            .zip(gamma.iter())
            .map(|(byte, mask)| byte ^ mask)
            .collect();

        if gamming_key.as_bytes()[0] == MESSAGE_TYPE_SOLUTION && payload.len() >= 32 {
            let mut nonce = [0u8; 32];
            nonce.copy_from_slice(&payload[..32]);
            let solution = Solution {
                computor_public_key: message.destination_public_key,
                nonce,
            };
            let already_known = {
                let system = self.state.system.lock().unwrap();
                system.solutions.iter().any(|s| {
                    s.nonce == nonce && s.computor_public_key == message.destination_public_key
                })
            };
            if !already_known
                && self.scorer.score(&message.destination_public_key, &nonce)
                    >= self.state.params.solution_threshold
            {
                admit_solution(&self.state, solution, 0);
                debug!("solution hint admitted");
            }
        }
    }

    fn on_broadcast_computors(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        let computors = match Computors::decode(&frame.body) {
            Ok(computors) => computors,
            Err(_) => return,
        };
        let known_epoch = self.state.committee.lock().unwrap().computors.epoch;
        if computors.epoch <= known_epoch && known_epoch != 0 {
            return;
        }
        if !computors.verify(&self.state.arbitrator_public_key) {
            return;
        }
        self.rebroadcast(frame, out);
        debug!(epoch = computors.epoch, "committee installed");
        self.state.install_committee(computors);
    }

    fn on_broadcast_tick(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        let vote = match TickVote::decode(&frame.body) {
            Ok(vote) => vote,
            Err(_) => return,
        };
        let (tick, epoch, initial_tick) = {
            let system = self.state.system.lock().unwrap();
            (system.tick, system.epoch, system.initial_tick)
        };
        if vote.computor_index as usize >= NUMBER_OF_COMPUTORS
            || vote.epoch != epoch
            || vote.tick < tick
            || vote.tick >= initial_tick + self.state.params.max_ticks_per_epoch as u32
            || !vote.time.is_valid()
        {
            return;
        }
        let signer = {
            let committee = self.state.committee.lock().unwrap();
            committee.computors.public_keys[vote.computor_index as usize]
        };
        if !signer.verify(&vote.signing_digest(), &vote.signature) {
            return;
        }
        self.rebroadcast(frame, out);
        self.state.tick_log.record_vote(&vote);
        trace!(tick = vote.tick, computor = vote.computor_index, "vote recorded");
    }

    fn on_broadcast_tick_data(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        let data = match TickData::decode(&frame.body) {
            Ok(data) => data,
            Err(_) => return,
        };
        let (tick, epoch, initial_tick) = {
            let system = self.state.system.lock().unwrap();
            (system.tick, system.epoch, system.initial_tick)
        };
        if data.epoch != epoch
            || data.tick <= tick
            || data.tick >= initial_tick + self.state.params.max_ticks_per_epoch as u32
            || data.tick % NUMBER_OF_COMPUTORS as u32 != data.computor_index as u32
            || !data.time.is_valid()
            || data.time.millisecond != 0
            || data.time.millis_index() > wall_clock().millis_index() + TIME_ACCURACY_MS
            || !data.has_distinct_transaction_digests()
        {
            return;
        }
        let signer = {
            let committee = self.state.committee.lock().unwrap();
            committee.computors.public_keys[data.computor_index as usize]
        };
        if !signer.verify(&data.signing_digest(), &data.signature) {
            return;
        }
        self.rebroadcast(frame, out);

        let target = self.state.quorum.lock().unwrap().target_next_tick_data_digest;
        if data.tick == tick + 1 && target.is_some() {
            // The quorum already fixed this tick's digest; only matching
            // data may enter.
            if let Some(target_digest) = target {
                if !target_digest.is_zero() && data.digest() == target_digest {
                    self.state.tick_log.force_tick_data(data);
                }
            }
        } else {
            self.state.tick_log.record_tick_data(data);
        }
    }

    fn on_broadcast_transaction(&self, frame: &Frame, out: &mut Vec<Outbound>) {
        let transaction = match Transaction::decode(&frame.body) {
            Ok(transaction) => transaction,
            Err(_) => return,
        };
        if !transaction.is_valid() {
            return;
        }
        let tick = self.state.current_tick();
        // Past and current ticks are already sealed or in flight.
        if transaction.tick <= tick {
            return;
        }
        self.rebroadcast(frame, out);

        let source_index = {
            let spectrum = self.state.spectrum.lock().unwrap();
            spectrum.index_of(&transaction.source_public_key)
        };
        if let Some(source_index) = source_index {
            self.state.pending.offer(source_index, transaction.clone());
        }

        // When the next tick's data is already known, file the transaction
        // straight into its arena slot.
        if transaction.tick == tick + 1 {
            if let Some(data) = self.state.tick_log.tick_data(transaction.tick) {
                let digest = transaction.digest();
                for slot in 0..NUMBER_OF_TRANSACTIONS_PER_TICK {
                    if data.transaction_digests[slot] == digest {
                        self.state.arena.store(transaction.tick, slot, &transaction);
                        break;
                    }
                }
            }
        }
    }

    fn on_request_computors(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let committee = self.state.committee.lock().unwrap();
        if committee.computors.epoch != 0 {
            let body = committee.computors.encode();
            drop(committee);
            self.reply(peer, frame, MessageType::BroadcastComputors, body, out);
        } else {
            drop(committee);
            self.end_response(peer, frame, out);
        }
    }

    fn on_request_quorum_tick(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        if let Ok(request) = RequestQuorumTick::decode(&frame.body) {
            if self.state.tick_log.in_range(request.tick) {
                let mut indices: Vec<u16> = (0..NUMBER_OF_COMPUTORS as u16)
                    .filter(|&index| !request.has_vote(index as usize))
                    .collect();
                indices.shuffle(&mut rand::thread_rng());
                for index in indices {
                    if let Some(vote) = self.state.tick_log.vote(request.tick, index) {
                        self.reply(peer, frame, MessageType::BroadcastTick, vote.encode(), out);
                    }
                }
            }
        }
        self.end_response(peer, frame, out);
    }

    fn on_request_tick_data(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let data = RequestTickData::decode(&frame.body)
            .ok()
            .and_then(|request| self.state.tick_log.tick_data(request.tick));
        match data {
            Some(data) => {
                self.reply(peer, frame, MessageType::BroadcastFutureTickData, data.encode(), out)
            }
            None => self.end_response(peer, frame, out),
        }
    }

    fn on_request_tick_transactions(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        if let Ok(request) = RequestTickTransactions::decode(&frame.body) {
            if self.state.tick_log.in_range(request.tick) {
                let mut slots: Vec<usize> = (0..NUMBER_OF_TRANSACTIONS_PER_TICK)
                    .filter(|&slot| !request.has_transaction(slot))
                    .collect();
                slots.shuffle(&mut rand::thread_rng());
                for slot in slots {
                    if let Some(transaction) = self.state.arena.get(request.tick, slot) {
                        self.reply(
                            peer,
                            frame,
                            MessageType::BroadcastTransaction,
                            transaction.encode(),
                            out,
                        );
                    }
                }
            }
        }
        self.end_response(peer, frame, out);
    }

    fn on_request_current_tick_info(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let info: CurrentTickInfo = current_tick_info(&self.state);
        if self.state.committee.lock().unwrap().computors.epoch != 0 {
            self.reply(peer, frame, MessageType::RespondCurrentTickInfo, info.encode(), out);
        } else {
            self.end_response(peer, frame, out);
        }
    }

    fn on_request_entity(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let request = match RequestEntity::decode(&frame.body) {
            Ok(request) => request,
            Err(_) => return,
        };
        let tick = self.state.current_tick();
        let mut spectrum = self.state.spectrum.lock().unwrap();
        let response = match spectrum.index_of(&request.public_key) {
            Some(index) => RespondEntity {
                entity: *spectrum.entity(index),
                tick,
                spectrum_index: index as i32,
                siblings: spectrum.siblings(index),
            },
            None => RespondEntity {
                entity: tessera_core::Entity {
                    public_key: request.public_key,
                    ..Default::default()
                },
                tick,
                spectrum_index: -1,
                siblings: vec![Digest::ZERO; spectrum.depth()],
            },
        };
        drop(spectrum);
        self.reply(peer, frame, MessageType::RespondEntity, response.encode(), out);
    }

    fn on_request_contract_ipo(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let request = match RequestContractIpo::decode(&frame.body) {
            Ok(request) => request,
            Err(_) => return,
        };
        let contract_index = request.contract_index as usize;
        let epoch = self.state.current_epoch();
        if !self.state.registry.in_ipo(contract_index, epoch) {
            self.end_response(peer, frame, out);
            return;
        }
        let ipo = {
            let computer = self.state.computer.lock().unwrap();
            Ipo::load(computer.state(contract_index))
        };
        let response = RespondContractIpo {
            contract_index: request.contract_index,
            tick: self.state.current_tick(),
            public_keys: ipo.public_keys,
            prices: ipo.prices,
        };
        self.reply(peer, frame, MessageType::RespondContractIpo, response.encode(), out);
    }

    fn on_request_assets(
        &self,
        peer: PeerId,
        frame: &Frame,
        message_type: MessageType,
        out: &mut Vec<Outbound>,
    ) {
        let request = match RequestAssets::decode(&frame.body) {
            Ok(request) => request,
            Err(_) => {
                self.end_response(peer, frame, out);
                return;
            }
        };
        let tick = self.state.current_tick();
        let universe = self.state.universe.lock().unwrap();
        match message_type {
            MessageType::RequestIssuedAssets => {
                for (_, issuance) in universe.issuances_of(&request.public_key) {
                    let response = RespondAssets {
                        asset: tessera_core::Asset::Issuance(issuance),
                        chain: Vec::new(),
                        tick,
                    };
                    self.reply(peer, frame, MessageType::RespondIssuedAssets, response.encode(), out);
                }
            }
            MessageType::RequestOwnedAssets => {
                for (_, ownership, issuance) in universe.ownerships_of(&request.public_key) {
                    let response = RespondAssets {
                        asset: tessera_core::Asset::Ownership(ownership),
                        chain: vec![tessera_core::Asset::Issuance(issuance)],
                        tick,
                    };
                    self.reply(peer, frame, MessageType::RespondOwnedAssets, response.encode(), out);
                }
            }
            _ => {
                for (_, possession, ownership, issuance) in
                    universe.possessions_of(&request.public_key)
                {
                    let response = RespondAssets {
                        asset: tessera_core::Asset::Possession(possession),
                        chain: vec![
                            tessera_core::Asset::Ownership(ownership),
                            tessera_core::Asset::Issuance(issuance),
                        ],
                        tick,
                    };
                    self.reply(
                        peer,
                        frame,
                        MessageType::RespondPossessedAssets,
                        response.encode(),
                        out,
                    );
                }
            }
        }
        drop(universe);
        self.end_response(peer, frame, out);
    }

    fn on_special_command(&self, peer: PeerId, frame: &Frame, out: &mut Vec<Outbound>) {
        let command = match SpecialCommand::decode(&frame.body) {
            Ok(command) => command,
            Err(_) => return,
        };
        {
            // Nonce reuse is silently dropped.
            let system = self.state.system.lock().unwrap();
            if command.nonce() <= system.latest_operator_nonce {
                return;
            }
        }
        if !command.verify(&self.state.operator_public_key) {
            return;
        }
        self.state.system.lock().unwrap().latest_operator_nonce = command.nonce();

        match command {
            SpecialCommand::ShutDown { .. } => {
                debug!("operator shutdown");
                self.state.shutdown.store(true, Ordering::Relaxed);
            }
            SpecialCommand::GetProposalAndBallotRequest { nonce, computor_index, .. } => {
                if (computor_index as usize) < NUMBER_OF_COMPUTORS {
                    let (proposal, ballot) = {
                        let system = self.state.system.lock().unwrap();
                        (
                            system.proposals[computor_index as usize].clone(),
                            system.ballots[computor_index as usize].clone(),
                        )
                    };
                    let response = SpecialCommand::GetProposalAndBallotResponse {
                        nonce,
                        computor_index,
                        proposal,
                        ballot,
                    };
                    self.reply(peer, frame, MessageType::SpecialCommand, response.encode(), out);
                }
            }
            SpecialCommand::SetProposalAndBallotRequest {
                nonce,
                computor_index,
                proposal,
                ballot,
                ..
            } => {
                if (computor_index as usize) < NUMBER_OF_COMPUTORS {
                    {
                        let mut system = self.state.system.lock().unwrap();
                        system.proposals[computor_index as usize] = proposal;
                        system.ballots[computor_index as usize] = ballot;
                    }
                    let response =
                        SpecialCommand::SetProposalAndBallotResponse { nonce, computor_index };
                    self.reply(peer, frame, MessageType::SpecialCommand, response.encode(), out);
                }
            }
            _ => {}
        }
    }
}
