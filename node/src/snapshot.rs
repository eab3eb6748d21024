// Snapshot persistence
// Raw dumps of the in-memory structures for crash recovery; never
// consensus-critical.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tessera_consensus::{NodeState, System};
use tessera_core::{Asset, Entity};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

fn system_file(data_dir: &Path, epoch: u16) -> PathBuf {
    data_dir.join(format!("system.{:03}", epoch % 1000))
}

fn spectrum_file(data_dir: &Path, epoch: u16) -> PathBuf {
    data_dir.join(format!("spectrum.{:03}", epoch % 1000))
}

fn universe_file(data_dir: &Path, epoch: u16) -> PathBuf {
    data_dir.join(format!("universe.{:03}", epoch % 1000))
}

fn contract_file(data_dir: &Path, contract_index: usize, epoch: u16) -> PathBuf {
    data_dir.join(format!("contract{:04}.{:03}", contract_index % 10_000, epoch % 1000))
}

pub fn save_system(data_dir: &Path, system: &System) -> Result<(), SnapshotError> {
    fs::write(system_file(data_dir, system.epoch), bincode::serialize(system)?)?;
    Ok(())
}

pub fn load_system(data_dir: &Path, epoch: u16) -> Result<System, SnapshotError> {
    Ok(bincode::deserialize(&fs::read(system_file(data_dir, epoch))?)?)
}

pub fn save_spectrum(data_dir: &Path, epoch: u16, entities: &[Entity]) -> Result<(), SnapshotError> {
    fs::write(spectrum_file(data_dir, epoch), bincode::serialize(entities)?)?;
    Ok(())
}

pub fn load_spectrum(data_dir: &Path, epoch: u16) -> Result<Vec<Entity>, SnapshotError> {
    Ok(bincode::deserialize(&fs::read(spectrum_file(data_dir, epoch))?)?)
}

pub fn save_universe(data_dir: &Path, epoch: u16, assets: &[Asset]) -> Result<(), SnapshotError> {
    fs::write(universe_file(data_dir, epoch), bincode::serialize(assets)?)?;
    Ok(())
}

pub fn load_universe(data_dir: &Path, epoch: u16) -> Result<Vec<Asset>, SnapshotError> {
    Ok(bincode::deserialize(&fs::read(universe_file(data_dir, epoch))?)?)
}

pub fn save_contract(
    data_dir: &Path,
    contract_index: usize,
    epoch: u16,
    state: &[u8],
) -> Result<(), SnapshotError> {
    fs::write(contract_file(data_dir, contract_index, epoch), state)?;
    Ok(())
}

pub fn load_contract(
    data_dir: &Path,
    contract_index: usize,
    epoch: u16,
) -> Result<Vec<u8>, SnapshotError> {
    Ok(fs::read(contract_file(data_dir, contract_index, epoch))?)
}

/// Write out whatever the save flags request, clearing each flag on
/// success.
pub fn save_requested(state: &NodeState, data_dir: &Path) -> Result<(), SnapshotError> {
    fs::create_dir_all(data_dir)?;
    let epoch = state.current_epoch();

    if state.save_flags.system.swap(false, Ordering::Relaxed) {
        let system = state.system.lock().unwrap().clone();
        save_system(data_dir, &system)?;
        info!(epoch, "system snapshot written");
    }
    if state.save_flags.spectrum.swap(false, Ordering::Relaxed) {
        let entities = state.spectrum.lock().unwrap().entities().to_vec();
        save_spectrum(data_dir, epoch, &entities)?;
        info!(epoch, "spectrum snapshot written");
    }
    if state.save_flags.universe.swap(false, Ordering::Relaxed) {
        let assets = state.universe.lock().unwrap().assets().to_vec();
        save_universe(data_dir, epoch, &assets)?;
        info!(epoch, "universe snapshot written");
    }
    if state.save_flags.computer.swap(false, Ordering::Relaxed) {
        let computer = state.computer.lock().unwrap();
        for contract_index in 0..computer.contract_count() {
            save_contract(data_dir, contract_index, epoch, computer.state(contract_index))?;
        }
        info!(epoch, "contract snapshots written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{PublicKey, TickTime};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tessera-snapshot-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn system_round_trip() {
        let dir = scratch_dir("system");
        let mut system = System::new(7, 1234, TickTime { day: 2, month: 3, year: 24, ..Default::default() });
        system.tick = 2000;

        save_system(&dir, &system).unwrap();
        let loaded = load_system(&dir, 7).unwrap();
        assert_eq!(loaded.tick, 2000);
        assert_eq!(loaded.initial_tick, 1234);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn spectrum_round_trip() {
        let dir = scratch_dir("spectrum");
        let entities = vec![
            Entity::default(),
            Entity {
                public_key: PublicKey::from_bytes([1u8; 32]),
                incoming_amount: 500,
                ..Default::default()
            },
        ];

        save_spectrum(&dir, 3, &entities).unwrap();
        assert_eq!(load_spectrum(&dir, 3).unwrap(), entities);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_names_follow_epoch_modulo() {
        let dir = Path::new("/tmp");
        assert_eq!(system_file(dir, 1005), dir.join("system.005"));
        assert_eq!(contract_file(dir, 12, 42), dir.join("contract0012.042"));
    }
}
