// Tessera Network
// Dejavu dedup filter, bounded frame queues, public-peer book, and the
// request dispatcher

pub mod dejavu;
pub mod dispatcher;
pub mod peers;
pub mod queue;

pub use dejavu::*;
pub use dispatcher::*;
pub use peers::*;
pub use queue::*;
