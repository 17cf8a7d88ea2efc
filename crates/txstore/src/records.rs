//! Public data types managed by the store.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use walletd_consensus::{Amount, Hash256, ZERO_HASH};
use walletd_primitives::script::determine_tx_type;
use walletd_primitives::{OutPoint, Transaction, TxType};

use crate::error::{Error, ErrorKind, Result};

/// Vote bit signalling that the parent block's regular transaction tree was
/// approved.
pub const BLOCK_VALID: u16 = 1 << 0;

/// The minimum data to uniquely identify a block on the best or a side chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Block {
    pub hash: Hash256,
    pub height: i32,
}

impl Block {
    pub fn unmined() -> Self {
        Self {
            hash: ZERO_HASH,
            height: -1,
        }
    }
}

/// Block identity plus the header metadata the store keeps: the block time
/// and its vote bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockMeta {
    pub block: Block,
    pub time: u64,
    pub vote_bits: u16,
}

impl BlockMeta {
    pub fn parent_valid(&self) -> bool {
        self.vote_bits & BLOCK_VALID != 0
    }
}

/// A transaction managed by the store.
#[derive(Clone, Debug)]
pub struct TxRecord {
    pub tx: Transaction,
    pub hash: Hash256,
    pub received: u64,
    pub serialized: Vec<u8>,
    pub tx_type: TxType,
}

impl TxRecord {
    /// Builds a record from the canonical serialized form.
    pub fn from_bytes(serialized: Vec<u8>, received: u64) -> Result<Self> {
        let tx = Transaction::deserialize(&serialized).map_err(|err| {
            Error::with_cause(ErrorKind::Input, "failed to deserialize transaction", err)
        })?;
        let hash = tx.txid();
        let tx_type = determine_tx_type(&tx);
        Ok(Self {
            tx,
            hash,
            received,
            serialized,
            tx_type,
        })
    }

    /// Builds a record from an already decoded transaction.
    pub fn from_tx(tx: Transaction, received: u64) -> Self {
        let serialized = tx.serialize();
        let hash = tx.txid();
        let tx_type = determine_tx_type(&tx);
        Self {
            tx,
            hash,
            received,
            serialized,
            tx_type,
        }
    }
}

/// A transaction output which was or is spendable by the wallet. An unspent
/// credit is a UTXO, but not every credit is one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Credit {
    pub out_point: OutPoint,
    pub block_meta: BlockMeta,
    pub amount: Amount,
    pub pk_script: Vec<u8>,
    pub received: u64,
    pub from_coinbase: bool,
}

/// A spendable P2SH multisignature output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultisigOut {
    pub out_point: OutPoint,
    pub tree: i8,
    pub script_hash: [u8; 20],
    pub m: u8,
    pub n: u8,
    pub tx_hash: Hash256,
    pub block_hash: Hash256,
    pub block_height: u32,
    pub amount: Amount,
    pub spent: bool,
    pub spent_by: Hash256,
    pub spent_by_index: u32,
}

/// A redeemable P2SH multisignature credit with its redeem script resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultisigCredit {
    pub out_point: OutPoint,
    pub script_hash: [u8; 20],
    pub ms_script: Vec<u8>,
    pub m: u8,
    pub n: u8,
    pub amount: Amount,
}

/// Frozen snapshot of every bucket plus the derived balances, for tests and
/// diagnostics.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DatabaseContents {
    pub mined_balance: Amount,
    pub one_conf_balance: Amount,
    pub one_conf_calc_balance: Amount,
    pub blocks: BTreeMap<Vec<u8>, Vec<u8>>,
    pub tx_records: BTreeMap<Vec<u8>, Vec<u8>>,
    pub credits: BTreeMap<Vec<u8>, Vec<u8>>,
    pub unspent: BTreeMap<Vec<u8>, Vec<u8>>,
    pub debits: BTreeMap<Vec<u8>, Vec<u8>>,
    pub unmined: BTreeMap<Vec<u8>, Vec<u8>>,
    pub unmined_credits: BTreeMap<Vec<u8>, Vec<u8>>,
    pub unmined_inputs: BTreeMap<Vec<u8>, Vec<u8>>,
    pub scripts: BTreeMap<Vec<u8>, Vec<u8>>,
    pub multisig: BTreeMap<Vec<u8>, Vec<u8>>,
    pub multisig_usp: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl DatabaseContents {
    /// Lists every incongruency between two snapshots, or `None` when they
    /// agree. Unmined buckets may be skipped when comparing across a
    /// mempool-altering operation.
    pub fn diff(&self, other: &DatabaseContents, skip_unmined: bool) -> Option<String> {
        let mut report = String::new();

        if self.mined_balance != other.mined_balance {
            let _ = writeln!(
                report,
                "mined balance differs: {} vs {}",
                self.mined_balance, other.mined_balance
            );
        }
        if self.one_conf_balance != other.one_conf_balance {
            let _ = writeln!(
                report,
                "one-conf spendable balance differs: {} vs {}",
                self.one_conf_balance, other.one_conf_balance
            );
        }
        if self.one_conf_calc_balance != other.one_conf_calc_balance {
            let _ = writeln!(
                report,
                "one-conf full-scan balance differs: {} vs {}",
                self.one_conf_calc_balance, other.one_conf_calc_balance
            );
        }

        diff_map(&mut report, "blocks", &self.blocks, &other.blocks);
        diff_map(&mut report, "txRecords", &self.tx_records, &other.tx_records);
        diff_map(&mut report, "credits", &self.credits, &other.credits);
        diff_map(&mut report, "unspent", &self.unspent, &other.unspent);
        diff_map(&mut report, "debits", &self.debits, &other.debits);
        if !skip_unmined {
            diff_map(&mut report, "unmined", &self.unmined, &other.unmined);
            diff_map(
                &mut report,
                "unminedCredits",
                &self.unmined_credits,
                &other.unmined_credits,
            );
            diff_map(
                &mut report,
                "unminedInputs",
                &self.unmined_inputs,
                &other.unmined_inputs,
            );
        }
        diff_map(&mut report, "scripts", &self.scripts, &other.scripts);
        diff_map(&mut report, "multisig", &self.multisig, &other.multisig);
        diff_map(
            &mut report,
            "multisigUsp",
            &self.multisig_usp,
            &other.multisig_usp,
        );

        if report.is_empty() {
            None
        } else {
            Some(report)
        }
    }
}

fn diff_map(
    report: &mut String,
    name: &str,
    left: &BTreeMap<Vec<u8>, Vec<u8>>,
    right: &BTreeMap<Vec<u8>, Vec<u8>>,
) {
    for (key, value) in left {
        match right.get(key) {
            None => {
                let _ = writeln!(report, "{name}: key {} missing on the right", hex(key));
            }
            Some(other) if other != value => {
                let _ = writeln!(
                    report,
                    "{name}: value for key {} differs: {} vs {}",
                    hex(key),
                    hex(value),
                    hex(other)
                );
            }
            Some(_) => {}
        }
    }
    for key in right.keys() {
        if !left.contains_key(key) {
            let _ = writeln!(report, "{name}: key {} missing on the left", hex(key));
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
