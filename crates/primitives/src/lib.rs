//! Wire-format primitives shared by the wallet: canonical byte codecs,
//! transaction types, hashing, and output script classification.

pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod script;
pub mod transaction;

pub use outpoint::{OutPoint, TREE_REGULAR, TREE_STAKE};
pub use script::{classify, determine_tx_type, ScriptClass, TxType};
pub use transaction::{Transaction, TxIn, TxOut};
