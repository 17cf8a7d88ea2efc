//! Chain constants and per-network wallet parameters.

pub mod money;
pub mod params;

pub use money::{money_range, Amount, COIN, MAX_MONEY};
pub use params::{chain_params, ChainParams, Network};

pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];
