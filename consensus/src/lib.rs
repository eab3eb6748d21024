// Tessera Consensus
// The tick pipeline: transaction processor, quorum engine, epoch controller

pub mod epoch;
pub mod miners;
pub mod node_state;
pub mod processor;
pub mod quorum;
pub mod score;
pub mod system;

pub use epoch::*;
pub use miners::*;
pub use node_state::*;
pub use processor::*;
pub use quorum::*;
pub use score::*;
pub use system::*;
