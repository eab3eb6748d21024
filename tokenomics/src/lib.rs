// Tessera Tokenomics
// Per-epoch issuance split across the committee by activity rank

pub mod revenue;

pub use revenue::*;
