// Tessera Mempool
// Tick log ring, packed transaction arena, and entity-pending buffer

pub mod arena;
pub mod pending;
pub mod tick_log;

pub use arena::*;
pub use pending::*;
pub use tick_log::*;
