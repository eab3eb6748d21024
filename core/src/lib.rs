// Tessera Core
// Primitive types, crypto oracle facade, wire codec, and protocol structs

pub mod asset;
pub mod codec;
pub mod constants;
pub mod crypto;
pub mod messages;
pub mod tick;
pub mod transaction;
pub mod types;

pub use asset::*;
pub use codec::*;
pub use constants::*;
pub use crypto::*;
pub use messages::*;
pub use tick::*;
pub use transaction::*;
pub use types::*;
