// Tessera State
// Content-addressed stores: spectrum (balances), universe (assets),
// computer (contract states), each Merkle-digested over change flags

pub mod computer;
pub mod merkle;
pub mod spectrum;
pub mod universe;

pub use computer::*;
pub use merkle::*;
pub use spectrum::*;
pub use universe::*;
