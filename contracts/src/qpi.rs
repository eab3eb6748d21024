// QPI, the interface contracts see
// Deterministic reads plus effects confined to spectrum/universe mutations

use tessera_core::{Amount, Entity, PublicKey, TickTime, MAX_AMOUNT, NUMBER_OF_COMPUTORS};
use tessera_state::{Spectrum, Universe};

/// Execution context handed to contract procedures. All calls are
/// deterministic; contracts cannot reach I/O or the network.
pub struct Qpi<'a> {
    pub spectrum: &'a mut Spectrum,
    pub universe: &'a mut Universe,
    current_contract: u32,
    invocator: PublicKey,
    originator: PublicKey,
    invocation_reward: Amount,
    tick: u32,
    epoch: u16,
    time: TickTime,
    arbitrator: PublicKey,
    computors: &'a [PublicKey],
    burned: &'a mut Amount,
}

impl<'a> Qpi<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spectrum: &'a mut Spectrum,
        universe: &'a mut Universe,
        current_contract: u32,
        invocator: PublicKey,
        originator: PublicKey,
        invocation_reward: Amount,
        tick: u32,
        epoch: u16,
        time: TickTime,
        arbitrator: PublicKey,
        computors: &'a [PublicKey],
        burned: &'a mut Amount,
    ) -> Self {
        Qpi {
            spectrum,
            universe,
            current_contract,
            invocator,
            originator,
            invocation_reward,
            tick,
            epoch,
            time,
            arbitrator,
            computors,
            burned,
        }
    }

    /// The entity that invoked this procedure.
    pub fn invocator(&self) -> PublicKey {
        self.invocator
    }

    /// The entity that signed the outermost transaction.
    pub fn originator(&self) -> PublicKey {
        self.originator
    }

    pub fn invocation_reward(&self) -> Amount {
        self.invocation_reward
    }

    /// Pseudo-address of the executing contract.
    pub fn current_contract_id(&self) -> PublicKey {
        PublicKey::for_contract(self.current_contract)
    }

    /// Move funds from the contract to `destination`. Returns the contract's
    /// remaining balance, or a negative value when the transfer could not be
    /// covered (the shortfall, or `-(MAX_AMOUNT + 1)` for an out-of-domain
    /// amount).
    pub fn transfer(&mut self, destination: PublicKey, amount: Amount) -> Amount {
        if amount as u64 > MAX_AMOUNT as u64 {
            return -(MAX_AMOUNT + 1);
        }
        let contract_id = self.current_contract_id();
        let index = match self.spectrum.index_of(&contract_id) {
            Some(index) => index,
            None => return -amount,
        };
        let remaining = self.spectrum.balance(index) - amount;
        if remaining < 0 {
            return remaining;
        }
        if self.spectrum.debit(index, amount, self.tick) {
            self.spectrum.credit(&destination, amount, self.tick);
        }
        remaining
    }

    /// Destroy funds held by the contract. Same return convention as
    /// `transfer`.
    pub fn burn(&mut self, amount: Amount) -> Amount {
        if amount as u64 > MAX_AMOUNT as u64 {
            return -(MAX_AMOUNT + 1);
        }
        let contract_id = self.current_contract_id();
        let index = match self.spectrum.index_of(&contract_id) {
            Some(index) => index,
            None => return -amount,
        };
        let remaining = self.spectrum.balance(index) - amount;
        if remaining < 0 {
            return remaining;
        }
        if self.spectrum.debit(index, amount, self.tick) {
            *self.burned += amount;
        }
        remaining
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn year(&self) -> u8 {
        self.time.year
    }

    pub fn month(&self) -> u8 {
        self.time.month
    }

    pub fn day(&self) -> u8 {
        self.time.day
    }

    pub fn day_of_week(&self) -> u8 {
        (self.time.day_index() % 7) as u8
    }

    pub fn hour(&self) -> u8 {
        self.time.hour
    }

    pub fn minute(&self) -> u8 {
        self.time.minute
    }

    pub fn second(&self) -> u8 {
        self.time.second
    }

    pub fn millisecond(&self) -> u16 {
        self.time.millisecond
    }

    /// Read one spectrum record. Returns a zeroed record (with the key
    /// filled in) and `false` when the entity does not exist.
    pub fn get_entity(&self, id: PublicKey) -> (Entity, bool) {
        match self.spectrum.index_of(&id) {
            Some(index) => (*self.spectrum.entity(index), true),
            None => (
                Entity {
                    public_key: id,
                    ..Default::default()
                },
                false,
            ),
        }
    }

    /// Iterate entities in table order; zero key terminates.
    pub fn next_id(&self, current: PublicKey) -> PublicKey {
        self.spectrum.next_id(&current)
    }

    pub fn arbitrator(&self) -> PublicKey {
        self.arbitrator
    }

    pub fn computor(&self, index: u16) -> PublicKey {
        self.computors[index as usize % NUMBER_OF_COMPUTORS]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::KeyPair;

    fn context<'a>(
        spectrum: &'a mut Spectrum,
        universe: &'a mut Universe,
        computors: &'a [PublicKey],
        burned: &'a mut Amount,
    ) -> Qpi<'a> {
        Qpi::new(
            spectrum,
            universe,
            1,
            PublicKey::from_bytes([7u8; 32]),
            PublicKey::from_bytes([7u8; 32]),
            0,
            100,
            2,
            TickTime { day: 5, month: 3, year: 22, ..Default::default() },
            PublicKey::from_bytes([9u8; 32]),
            computors,
            burned,
        )
    }

    #[test]
    fn transfer_respects_contract_balance() {
        let mut spectrum = Spectrum::new(64);
        let mut universe = Universe::new(64);
        let computors = vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS];
        let mut burned = 0;

        let contract_id = PublicKey::for_contract(1);
        spectrum.credit(&contract_id, 1000, 99);

        let recipient = KeyPair::generate().public_key();
        let mut qpi = context(&mut spectrum, &mut universe, &computors, &mut burned);
        assert_eq!(qpi.transfer(recipient, 400), 600);
        assert_eq!(qpi.transfer(recipient, 601), -1);

        let index = spectrum.index_of(&recipient).unwrap();
        assert_eq!(spectrum.balance(index), 400);
    }

    #[test]
    fn burn_accumulates() {
        let mut spectrum = Spectrum::new(64);
        let mut universe = Universe::new(64);
        let computors = vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS];
        let mut burned = 0;

        spectrum.credit(&PublicKey::for_contract(1), 500, 99);
        {
            let mut qpi = context(&mut spectrum, &mut universe, &computors, &mut burned);
            assert_eq!(qpi.burn(200), 300);
        }
        assert_eq!(burned, 200);
    }

    #[test]
    fn get_entity_reports_existence() {
        let mut spectrum = Spectrum::new(64);
        let mut universe = Universe::new(64);
        let computors = vec![PublicKey::ZERO; NUMBER_OF_COMPUTORS];
        let mut burned = 0;

        let known = KeyPair::generate().public_key();
        spectrum.credit(&known, 50, 1);

        let qpi = context(&mut spectrum, &mut universe, &computors, &mut burned);
        let (entity, exists) = qpi.get_entity(known);
        assert!(exists);
        assert_eq!(entity.balance(), 50);

        let (missing, exists) = qpi.get_entity(PublicKey::from_bytes([0xAB; 32]));
        assert!(!exists);
        assert_eq!(missing.balance(), 0);
    }
}
