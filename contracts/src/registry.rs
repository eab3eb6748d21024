// Contract registry
// Compile-time contract descriptions and the procedure dispatch tables

use crate::qpi::Qpi;
use std::collections::HashMap;
use tessera_core::AssetName;
use tessera_state::{CONTRACT_0_STATE_SIZE, IPO_STATE_SIZE};

/// Lifecycle hooks every contract may implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContractPhase {
    Initialize,
    BeginEpoch,
    BeginTick,
    EndTick,
    EndEpoch,
}

/// User procedure: mutates the contract state blob given the invocation
/// input. Contracts may not perform I/O; all effects go through the QPI.
pub type UserProcedure = fn(&mut Qpi<'_>, state: &mut [u8], input: &[u8]);

/// Lifecycle procedure: runs without invocation input.
pub type SystemProcedure = fn(&mut Qpi<'_>, state: &mut [u8]);

/// Static description of one contract slot.
#[derive(Clone, Copy, Debug)]
pub struct ContractDescription {
    /// Name of the share asset minted at IPO settlement.
    pub asset_name: AssetName,
    /// First epoch the contract runs; before it the slot auctions shares.
    pub construction_epoch: u16,
    pub destruction_epoch: u16,
    pub state_size: usize,
}

#[derive(Clone, Copy)]
pub struct RegisteredProcedure {
    pub procedure: UserProcedure,
    pub input_size: u16,
}

/// The contract dispatch surface: descriptions plus the per-contract
/// procedure tables, populated once at node start.
pub struct ContractRegistry {
    descriptions: Vec<ContractDescription>,
    system_procedures: Vec<HashMap<ContractPhase, SystemProcedure>>,
    user_procedures: Vec<HashMap<u16, RegisteredProcedure>>,
}

impl ContractRegistry {
    /// `descriptions[0]` must describe the system contract (fee reserves).
    pub fn new(descriptions: Vec<ContractDescription>) -> Self {
        let count = descriptions.len();
        ContractRegistry {
            descriptions,
            system_procedures: vec![HashMap::new(); count],
            user_procedures: vec![HashMap::new(); count],
        }
    }

    /// A registry with only the system contract; the committee runs bare.
    pub fn minimal() -> Self {
        ContractRegistry::new(vec![ContractDescription {
            asset_name: AssetName::default(),
            construction_epoch: 0,
            destruction_epoch: u16::MAX,
            state_size: CONTRACT_0_STATE_SIZE,
        }])
    }

    pub fn contract_count(&self) -> usize {
        self.descriptions.len()
    }

    pub fn description(&self, contract_index: usize) -> Option<&ContractDescription> {
        self.descriptions.get(contract_index)
    }

    /// Allocation sizes for the computer store. A contract that has an IPO
    /// phase ahead of it needs room for the bid book in the same slot.
    pub fn state_sizes(&self) -> Vec<usize> {
        self.descriptions
            .iter()
            .enumerate()
            .map(|(index, description)| {
                if index == 0 {
                    description.state_size
                } else {
                    description.state_size.max(IPO_STATE_SIZE)
                }
            })
            .collect()
    }

    pub fn is_active(&self, contract_index: usize, epoch: u16) -> bool {
        self.description(contract_index)
            .map(|d| epoch >= d.construction_epoch && epoch < d.destruction_epoch)
            .unwrap_or(false)
    }

    /// Contract is still auctioning its shares at the given epoch.
    pub fn in_ipo(&self, contract_index: usize, epoch: u16) -> bool {
        contract_index != 0
            && self
                .description(contract_index)
                .map(|d| epoch < d.construction_epoch)
                .unwrap_or(false)
    }

    pub fn register_system_procedure(
        &mut self,
        contract_index: usize,
        phase: ContractPhase,
        procedure: SystemProcedure,
    ) {
        self.system_procedures[contract_index].insert(phase, procedure);
    }

    pub fn register_user_procedure(
        &mut self,
        contract_index: usize,
        input_type: u16,
        procedure: UserProcedure,
        input_size: u16,
    ) {
        self.user_procedures[contract_index]
            .insert(input_type, RegisteredProcedure { procedure, input_size });
    }

    pub fn system_procedure(
        &self,
        contract_index: usize,
        phase: ContractPhase,
    ) -> Option<SystemProcedure> {
        self.system_procedures
            .get(contract_index)?
            .get(&phase)
            .copied()
    }

    pub fn user_procedure(
        &self,
        contract_index: usize,
        input_type: u16,
    ) -> Option<RegisteredProcedure> {
        self.user_procedures
            .get(contract_index)?
            .get(&input_type)
            .copied()
    }

    /// Contracts to run for a phase, in execution order: ascending for the
    /// opening hooks, descending for the closing ones. Slot 0 never runs.
    pub fn phase_order(&self, phase: ContractPhase, epoch: u16) -> Vec<usize> {
        let mut order: Vec<usize> = (1..self.contract_count())
            .filter(|&index| match phase {
                ContractPhase::Initialize => {
                    self.description(index)
                        .map(|d| epoch == d.construction_epoch && epoch < d.destruction_epoch)
                        .unwrap_or(false)
                }
                _ => self.is_active(index, epoch),
            })
            .collect();
        if matches!(phase, ContractPhase::EndTick | ContractPhase::EndEpoch) {
            order.reverse();
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description(construction_epoch: u16, state_size: usize) -> ContractDescription {
        ContractDescription {
            asset_name: AssetName::from_str_padded("TST"),
            construction_epoch,
            destruction_epoch: u16::MAX,
            state_size,
        }
    }

    fn registry() -> ContractRegistry {
        ContractRegistry::new(vec![
            ContractDescription {
                asset_name: AssetName::default(),
                construction_epoch: 0,
                destruction_epoch: u16::MAX,
                state_size: CONTRACT_0_STATE_SIZE,
            },
            description(1, 128),
            description(5, 64),
        ])
    }

    #[test]
    fn ipo_window_precedes_construction() {
        let registry = registry();
        assert!(!registry.in_ipo(1, 1));
        assert!(registry.in_ipo(2, 1));
        assert!(!registry.in_ipo(2, 5));
        assert!(!registry.in_ipo(0, 0));
    }

    #[test]
    fn state_sizes_reserve_room_for_the_bid_book() {
        let sizes = registry().state_sizes();
        assert_eq!(sizes[0], CONTRACT_0_STATE_SIZE);
        assert_eq!(sizes[1], IPO_STATE_SIZE);
        assert_eq!(sizes[2], IPO_STATE_SIZE);
    }

    #[test]
    fn phase_order_reverses_for_closing_hooks() {
        let registry = registry();
        assert_eq!(registry.phase_order(ContractPhase::BeginTick, 5), vec![1, 2]);
        assert_eq!(registry.phase_order(ContractPhase::EndTick, 5), vec![2, 1]);
        // Initialize runs only at the construction epoch.
        assert_eq!(registry.phase_order(ContractPhase::Initialize, 5), vec![2]);
    }

    #[test]
    fn dispatch_lookup() {
        let mut registry = registry();
        fn nop(_: &mut Qpi<'_>, _: &mut [u8], _: &[u8]) {}
        registry.register_user_procedure(1, 7, nop, 16);

        assert!(registry.user_procedure(1, 7).is_some());
        assert_eq!(registry.user_procedure(1, 7).unwrap().input_size, 16);
        assert!(registry.user_procedure(1, 8).is_none());
        assert!(registry.user_procedure(2, 7).is_none());
    }
}
