//! Durable wallet transaction store.
//!
//! Records every transaction relevant to the wallet in a flat bucket
//! namespace, tracks which outputs are spendable, maintains a running mined
//! balance, and unwinds blockchain reorganizations. Each public call runs
//! under the store lock and commits all of its writes in one atomic batch.

pub mod balance;
pub mod error;
pub mod keyspace;
pub mod records;
pub mod store;

pub use balance::BalanceKind;
pub use error::{Error, ErrorKind, Result};
pub use records::{
    Block, BlockMeta, Credit, DatabaseContents, MultisigCredit, MultisigOut, TxRecord, BLOCK_VALID,
};
pub use store::Store;
