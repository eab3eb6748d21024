// Tessera Contracts
// Contract registry, procedure dispatch, and the VM interface (QPI)

pub mod qpi;
pub mod registry;

pub use qpi::*;
pub use registry::*;
