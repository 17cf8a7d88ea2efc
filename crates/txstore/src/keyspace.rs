//! Canonical bucket key and value layouts.
//!
//! Every key and value is a fixed-layout byte array with explicit field
//! offsets; helpers here are pure byte transforms. Heights and amounts are
//! stored big-endian so keys sort naturally; the serialized transaction
//! embedded in a record value keeps its little-endian wire form. Value
//! slices fetched from the backend are never mutated in place: mutation
//! helpers copy, edit, and return a fresh buffer for a put.

use walletd_consensus::{Amount, Hash256};
use walletd_primitives::{Transaction, TxType};

use crate::error::{Error, ErrorKind, Result};
use crate::records::{Block, BlockMeta, TxRecord};

pub const BLOCK_KEY_LEN: usize = 4;
pub const BLOCK_VALUE_MIN_LEN: usize = 46;
pub const TX_RECORD_KEY_LEN: usize = 68;
pub const TX_RECORD_VALUE_MIN_LEN: usize = 13;
pub const CREDIT_KEY_LEN: usize = 72;
pub const CREDIT_VALUE_LEN: usize = 82;
pub const OUTPOINT_KEY_LEN: usize = 36;
pub const UNSPENT_VALUE_LEN: usize = 36;
pub const DEBIT_KEY_LEN: usize = 72;
pub const DEBIT_VALUE_LEN: usize = 80;
pub const UNMINED_CREDIT_VALUE_LEN: usize = 10;
pub const MULTISIG_OUT_VALUE_LEN: usize = 136;
pub const SCRIPT_KEY_LEN: usize = 20;

const CREDIT_FLAG_CHANGE: u8 = 1 << 0;
const CREDIT_FLAG_SPENT: u8 = 1 << 1;
const CREDIT_FLAG_COINBASE: u8 = 1 << 2;

const UNMINED_CREDIT_FLAG_CHANGE: u8 = 1 << 0;
const UNMINED_CREDIT_FLAG_COINBASE: u8 = 1 << 1;

const MULTISIG_FLAG_SPENT: u8 = 1 << 0;

/// Spender index sentinel tolerated as "unspent" in legacy credit values.
const UNSPENT_INDEX_SENTINEL: u32 = u32::MAX;

pub const META_KEY_VERSION: &[u8] = b"version";
pub const META_KEY_MINED_BALANCE: &[u8] = b"minedBalance";

pub const LATEST_VERSION: u32 = 1;

fn truncated(context: &'static str) -> Error {
    Error::new(ErrorKind::Database, context)
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_be_bytes(raw)
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    read_u64(bytes, offset) as i64
}

fn read_hash(bytes: &[u8], offset: usize) -> Hash256 {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[offset..offset + 32]);
    hash
}

// Block records.

pub fn block_key(height: i32) -> [u8; BLOCK_KEY_LEN] {
    height.to_be_bytes()
}

pub fn block_height_from_key(key: &[u8]) -> Result<i32> {
    if key.len() != BLOCK_KEY_LEN {
        return Err(truncated("malformed block key"));
    }
    Ok(read_i32(key, 0))
}

/// In-memory form of a block record: identity, header metadata, and the
/// hashes of every wallet transaction mined in it.
#[derive(Clone, Debug)]
pub struct BlockRecord {
    pub block: Block,
    pub time: u64,
    pub vote_bits: u16,
    pub tx_hashes: Vec<Hash256>,
}

impl BlockRecord {
    pub fn meta(&self) -> BlockMeta {
        BlockMeta {
            block: self.block,
            time: self.time,
            vote_bits: self.vote_bits,
        }
    }
}

pub fn value_block_record_empty(meta: &BlockMeta) -> Vec<u8> {
    let mut value = Vec::with_capacity(BLOCK_VALUE_MIN_LEN);
    value.extend_from_slice(&meta.block.hash);
    value.extend_from_slice(&meta.time.to_be_bytes());
    value.extend_from_slice(&meta.vote_bits.to_be_bytes());
    value.extend_from_slice(&0u32.to_be_bytes());
    value
}

pub fn value_block_record(meta: &BlockMeta, tx_hash: &Hash256) -> Vec<u8> {
    let mut value = Vec::with_capacity(BLOCK_VALUE_MIN_LEN + 32);
    value.extend_from_slice(&meta.block.hash);
    value.extend_from_slice(&meta.time.to_be_bytes());
    value.extend_from_slice(&meta.vote_bits.to_be_bytes());
    value.extend_from_slice(&1u32.to_be_bytes());
    value.extend_from_slice(tx_hash);
    value
}

pub fn decode_block_record(height: i32, value: &[u8]) -> Result<BlockRecord> {
    if value.len() < BLOCK_VALUE_MIN_LEN {
        return Err(truncated("malformed block record"));
    }
    let hash = read_hash(value, 0);
    let time = read_u64(value, 32);
    let vote_bits = u16::from_be_bytes([value[40], value[41]]);
    let count = read_u32(value, 42) as usize;
    if value.len() != BLOCK_VALUE_MIN_LEN + count * 32 {
        return Err(truncated("block record transaction list length mismatch"));
    }
    let mut tx_hashes = Vec::with_capacity(count);
    for i in 0..count {
        tx_hashes.push(read_hash(value, BLOCK_VALUE_MIN_LEN + i * 32));
    }
    Ok(BlockRecord {
        block: Block { hash, height },
        time,
        vote_bits,
        tx_hashes,
    })
}

/// Appends a transaction hash to a block record value. Already listed hashes
/// are not duplicated.
pub fn append_block_record(value: &[u8], tx_hash: &Hash256) -> Result<Vec<u8>> {
    if value.len() < BLOCK_VALUE_MIN_LEN {
        return Err(truncated("malformed block record"));
    }
    let count = read_u32(value, 42);
    for i in 0..count as usize {
        let offset = BLOCK_VALUE_MIN_LEN + i * 32;
        if value.get(offset..offset + 32) == Some(tx_hash.as_slice()) {
            return Ok(value.to_vec());
        }
    }
    let mut out = value.to_vec();
    out[42..46].copy_from_slice(&(count + 1).to_be_bytes());
    out.extend_from_slice(tx_hash);
    Ok(out)
}

pub fn remove_block_record(value: &[u8], tx_hash: &Hash256) -> Result<Vec<u8>> {
    if value.len() < BLOCK_VALUE_MIN_LEN {
        return Err(truncated("malformed block record"));
    }
    let count = read_u32(value, 42) as usize;
    let mut out = value[..42].to_vec();
    let mut kept = 0u32;
    let mut hashes = Vec::with_capacity(count * 32);
    for i in 0..count {
        let offset = BLOCK_VALUE_MIN_LEN + i * 32;
        let entry = value
            .get(offset..offset + 32)
            .ok_or_else(|| truncated("block record transaction list length mismatch"))?;
        if entry != tx_hash.as_slice() {
            hashes.extend_from_slice(entry);
            kept += 1;
        }
    }
    out.extend_from_slice(&kept.to_be_bytes());
    out.extend_from_slice(&hashes);
    Ok(out)
}

// Transaction records.

pub fn tx_record_key(tx_hash: &Hash256, block: &Block) -> [u8; TX_RECORD_KEY_LEN] {
    let mut key = [0u8; TX_RECORD_KEY_LEN];
    key[0..32].copy_from_slice(tx_hash);
    key[32..36].copy_from_slice(&block.height.to_be_bytes());
    key[36..68].copy_from_slice(&block.hash);
    key
}

pub fn value_tx_record(rec: &TxRecord) -> Vec<u8> {
    let mut value = Vec::with_capacity(TX_RECORD_VALUE_MIN_LEN + rec.serialized.len());
    value.extend_from_slice(&rec.received.to_be_bytes());
    value.extend_from_slice(&(rec.serialized.len() as u32).to_be_bytes());
    value.extend_from_slice(&rec.serialized);
    value.push(rec.tx_type.to_byte());
    value
}

pub fn decode_tx_record(tx_hash: &Hash256, value: &[u8]) -> Result<TxRecord> {
    if value.len() < TX_RECORD_VALUE_MIN_LEN {
        return Err(truncated("malformed transaction record"));
    }
    let received = read_u64(value, 0);
    let tx_len = read_u32(value, 8) as usize;
    if value.len() != TX_RECORD_VALUE_MIN_LEN + tx_len {
        return Err(truncated("transaction record length mismatch"));
    }
    let serialized = value[12..12 + tx_len].to_vec();
    let tx = Transaction::deserialize(&serialized)
        .map_err(|err| Error::with_cause(ErrorKind::Database, "corrupt stored transaction", err))?;
    let tx_type = TxType::from_byte(value[12 + tx_len])
        .ok_or_else(|| truncated("unknown stored transaction type"))?;
    Ok(TxRecord {
        tx,
        hash: *tx_hash,
        received,
        serialized,
        tx_type,
    })
}

pub fn tx_record_received(value: &[u8]) -> Result<u64> {
    if value.len() < TX_RECORD_VALUE_MIN_LEN {
        return Err(truncated("malformed transaction record"));
    }
    Ok(read_u64(value, 0))
}

pub fn tx_record_type(value: &[u8]) -> Result<TxType> {
    if value.len() < TX_RECORD_VALUE_MIN_LEN {
        return Err(truncated("malformed transaction record"));
    }
    TxType::from_byte(value[value.len() - 1])
        .ok_or_else(|| truncated("unknown stored transaction type"))
}

// Outpoint keys.

pub fn outpoint_key(tx_hash: &Hash256, index: u32) -> [u8; OUTPOINT_KEY_LEN] {
    let mut key = [0u8; OUTPOINT_KEY_LEN];
    key[0..32].copy_from_slice(tx_hash);
    key[32..36].copy_from_slice(&index.to_be_bytes());
    key
}

pub fn outpoint_from_key(key: &[u8]) -> Result<(Hash256, u32)> {
    if key.len() != OUTPOINT_KEY_LEN {
        return Err(truncated("malformed outpoint key"));
    }
    Ok((read_hash(key, 0), read_u32(key, 32)))
}

// Credits.

pub fn credit_key(tx_hash: &Hash256, index: u32, block: &Block) -> [u8; CREDIT_KEY_LEN] {
    let mut key = [0u8; CREDIT_KEY_LEN];
    key[0..68].copy_from_slice(&tx_record_key(tx_hash, block));
    key[68..72].copy_from_slice(&index.to_be_bytes());
    key
}

/// Rebuilds a credit key from an unspent index entry.
pub fn credit_key_from_unspent(key: &[u8], value: &[u8]) -> Result<[u8; CREDIT_KEY_LEN]> {
    if key.len() != OUTPOINT_KEY_LEN || value.len() != UNSPENT_VALUE_LEN {
        return Err(truncated("malformed unspent index entry"));
    }
    let mut credit = [0u8; CREDIT_KEY_LEN];
    credit[0..32].copy_from_slice(&key[0..32]);
    credit[32..36].copy_from_slice(&value[0..4]);
    credit[36..68].copy_from_slice(&value[4..36]);
    credit[68..72].copy_from_slice(&key[32..36]);
    Ok(credit)
}

pub fn extract_credit_tx_hash(key: &[u8]) -> Hash256 {
    read_hash(key, 0)
}

pub fn extract_credit_height(key: &[u8]) -> i32 {
    read_i32(key, 32)
}

pub fn extract_credit_block(key: &[u8]) -> Block {
    Block {
        hash: read_hash(key, 36),
        height: read_i32(key, 32),
    }
}

pub fn extract_credit_index(key: &[u8]) -> u32 {
    read_u32(key, 68)
}

/// The unspent index value paired with a credit key.
pub fn credit_unspent_value(key: &[u8]) -> [u8; UNSPENT_VALUE_LEN] {
    let mut value = [0u8; UNSPENT_VALUE_LEN];
    value.copy_from_slice(&key[32..68]);
    value
}

pub fn value_unspent_credit(amount: Amount, change: bool, coinbase: bool, op_code: u8) -> Vec<u8> {
    let mut value = vec![0u8; CREDIT_VALUE_LEN];
    value[0..8].copy_from_slice(&amount.to_be_bytes());
    let mut flags = 0u8;
    if change {
        flags |= CREDIT_FLAG_CHANGE;
    }
    if coinbase {
        flags |= CREDIT_FLAG_COINBASE;
    }
    value[8] = flags;
    value[81] = op_code;
    value
}

fn check_credit_value(value: &[u8]) -> Result<()> {
    if value.len() != CREDIT_VALUE_LEN {
        return Err(truncated("malformed credit value"));
    }
    Ok(())
}

pub fn credit_amount(value: &[u8]) -> Result<Amount> {
    check_credit_value(value)?;
    Ok(read_i64(value, 0))
}

pub fn credit_is_change(value: &[u8]) -> Result<bool> {
    check_credit_value(value)?;
    Ok(value[8] & CREDIT_FLAG_CHANGE != 0)
}

pub fn credit_is_spent(value: &[u8]) -> Result<bool> {
    check_credit_value(value)?;
    if value[8] & CREDIT_FLAG_SPENT == 0 {
        return Ok(false);
    }
    // Tolerate the legacy sentinel: an all-ones spender index marks the
    // credit unspent even when the spent flag survived a partial write.
    Ok(read_u32(value, 77) != UNSPENT_INDEX_SENTINEL)
}

pub fn credit_is_coinbase(value: &[u8]) -> Result<bool> {
    check_credit_value(value)?;
    Ok(value[8] & CREDIT_FLAG_COINBASE != 0)
}

pub fn credit_op_code(value: &[u8]) -> Result<u8> {
    check_credit_value(value)?;
    Ok(value[81])
}

/// Copies a credit value with the spender stamped in and the spent flag set.
pub fn mark_credit_spent(
    value: &[u8],
    spender_hash: &Hash256,
    spender_block: &Block,
    spender_index: u32,
) -> Result<Vec<u8>> {
    check_credit_value(value)?;
    let mut out = value.to_vec();
    out[8] |= CREDIT_FLAG_SPENT;
    out[9..13].copy_from_slice(&spender_block.height.to_be_bytes());
    out[13..45].copy_from_slice(&spender_block.hash);
    out[45..77].copy_from_slice(spender_hash);
    out[77..81].copy_from_slice(&spender_index.to_be_bytes());
    Ok(out)
}

/// Copies a credit value with the spender cleared.
pub fn mark_credit_unspent(value: &[u8]) -> Result<Vec<u8>> {
    check_credit_value(value)?;
    let mut out = value.to_vec();
    out[8] &= !CREDIT_FLAG_SPENT;
    for byte in &mut out[9..81] {
        *byte = 0;
    }
    Ok(out)
}

// Unspent index.

pub fn value_unspent(block: &Block) -> [u8; UNSPENT_VALUE_LEN] {
    let mut value = [0u8; UNSPENT_VALUE_LEN];
    value[0..4].copy_from_slice(&block.height.to_be_bytes());
    value[4..36].copy_from_slice(&block.hash);
    value
}

pub fn unspent_block(value: &[u8]) -> Result<Block> {
    if value.len() != UNSPENT_VALUE_LEN {
        return Err(truncated("malformed unspent value"));
    }
    Ok(Block {
        hash: read_hash(value, 4),
        height: read_i32(value, 0),
    })
}

// Debits.

pub fn debit_key(spender_hash: &Hash256, spender_index: u32, block: &Block) -> [u8; DEBIT_KEY_LEN] {
    let mut key = [0u8; DEBIT_KEY_LEN];
    key[0..32].copy_from_slice(spender_hash);
    key[32..36].copy_from_slice(&spender_index.to_be_bytes());
    key[36..40].copy_from_slice(&block.height.to_be_bytes());
    key[40..72].copy_from_slice(&block.hash);
    key
}

pub fn value_debit(amount: Amount, credit_key: &[u8; CREDIT_KEY_LEN]) -> [u8; DEBIT_VALUE_LEN] {
    let mut value = [0u8; DEBIT_VALUE_LEN];
    value[0..8].copy_from_slice(&amount.to_be_bytes());
    value[8..80].copy_from_slice(credit_key);
    value
}

pub fn debit_amount(value: &[u8]) -> Result<Amount> {
    if value.len() != DEBIT_VALUE_LEN {
        return Err(truncated("malformed debit value"));
    }
    Ok(read_i64(value, 0))
}

pub fn debit_credit_key(value: &[u8]) -> Result<[u8; CREDIT_KEY_LEN]> {
    if value.len() != DEBIT_VALUE_LEN {
        return Err(truncated("malformed debit value"));
    }
    let mut key = [0u8; CREDIT_KEY_LEN];
    key.copy_from_slice(&value[8..80]);
    Ok(key)
}

// Unmined credits.

pub fn value_unmined_credit(amount: Amount, change: bool, coinbase: bool, op_code: u8) -> Vec<u8> {
    let mut value = vec![0u8; UNMINED_CREDIT_VALUE_LEN];
    value[0..8].copy_from_slice(&amount.to_be_bytes());
    let mut flags = 0u8;
    if change {
        flags |= UNMINED_CREDIT_FLAG_CHANGE;
    }
    if coinbase {
        flags |= UNMINED_CREDIT_FLAG_COINBASE;
    }
    value[8] = flags;
    value[9] = op_code;
    value
}

fn check_unmined_credit_value(value: &[u8]) -> Result<()> {
    if value.len() != UNMINED_CREDIT_VALUE_LEN {
        return Err(truncated("malformed unmined credit value"));
    }
    Ok(())
}

pub fn unmined_credit_amount(value: &[u8]) -> Result<Amount> {
    check_unmined_credit_value(value)?;
    Ok(read_i64(value, 0))
}

pub fn unmined_credit_is_change(value: &[u8]) -> Result<bool> {
    check_unmined_credit_value(value)?;
    Ok(value[8] & UNMINED_CREDIT_FLAG_CHANGE != 0)
}

pub fn unmined_credit_is_coinbase(value: &[u8]) -> Result<bool> {
    check_unmined_credit_value(value)?;
    Ok(value[8] & UNMINED_CREDIT_FLAG_COINBASE != 0)
}

pub fn unmined_credit_op_code(value: &[u8]) -> Result<u8> {
    check_unmined_credit_value(value)?;
    Ok(value[9])
}

// Multisig outputs.

#[allow(clippy::too_many_arguments)]
pub fn value_multisig_out(
    script_hash: &[u8; 20],
    m: u8,
    n: u8,
    spent: bool,
    tree: i8,
    block_hash: &Hash256,
    block_height: u32,
    amount: Amount,
    spender_hash: &Hash256,
    spender_index: u32,
    tx_hash: &Hash256,
) -> Vec<u8> {
    let mut value = vec![0u8; MULTISIG_OUT_VALUE_LEN];
    value[0..20].copy_from_slice(script_hash);
    value[20] = m;
    value[21] = n;
    value[22] = tree as u8;
    if spent {
        value[23] |= MULTISIG_FLAG_SPENT;
    }
    value[24..56].copy_from_slice(block_hash);
    value[56..60].copy_from_slice(&block_height.to_be_bytes());
    value[60..68].copy_from_slice(&amount.to_be_bytes());
    value[68..100].copy_from_slice(spender_hash);
    value[100..104].copy_from_slice(&spender_index.to_be_bytes());
    value[104..136].copy_from_slice(tx_hash);
    value
}

fn check_multisig_value(value: &[u8]) -> Result<()> {
    if value.len() != MULTISIG_OUT_VALUE_LEN {
        return Err(truncated("malformed multisig output value"));
    }
    Ok(())
}

pub fn multisig_out_script_hash(value: &[u8]) -> Result<[u8; 20]> {
    check_multisig_value(value)?;
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&value[0..20]);
    Ok(hash)
}

pub fn multisig_out_m_n(value: &[u8]) -> Result<(u8, u8)> {
    check_multisig_value(value)?;
    Ok((value[20], value[21]))
}

pub fn multisig_out_tree(value: &[u8]) -> Result<i8> {
    check_multisig_value(value)?;
    Ok(value[22] as i8)
}

pub fn multisig_out_spent(value: &[u8]) -> Result<bool> {
    check_multisig_value(value)?;
    Ok(value[23] & MULTISIG_FLAG_SPENT != 0)
}

pub fn multisig_out_block(value: &[u8]) -> Result<(Hash256, u32)> {
    check_multisig_value(value)?;
    Ok((read_hash(value, 24), read_u32(value, 56)))
}

pub fn multisig_out_amount(value: &[u8]) -> Result<Amount> {
    check_multisig_value(value)?;
    Ok(read_i64(value, 60))
}

pub fn multisig_out_spender(value: &[u8]) -> Result<(Hash256, u32)> {
    check_multisig_value(value)?;
    Ok((read_hash(value, 68), read_u32(value, 100)))
}

pub fn multisig_out_tx_hash(value: &[u8]) -> Result<Hash256> {
    check_multisig_value(value)?;
    Ok(read_hash(value, 104))
}

pub fn set_multisig_out_mined(
    value: &[u8],
    block_hash: &Hash256,
    block_height: u32,
) -> Result<Vec<u8>> {
    check_multisig_value(value)?;
    let mut out = value.to_vec();
    out[24..56].copy_from_slice(block_hash);
    out[56..60].copy_from_slice(&block_height.to_be_bytes());
    Ok(out)
}

pub fn set_multisig_out_unmined(value: &[u8]) -> Result<Vec<u8>> {
    check_multisig_value(value)?;
    let mut out = value.to_vec();
    for byte in &mut out[24..60] {
        *byte = 0;
    }
    Ok(out)
}

pub fn set_multisig_out_spent(
    value: &[u8],
    spender_hash: &Hash256,
    spender_index: u32,
) -> Result<Vec<u8>> {
    check_multisig_value(value)?;
    let mut out = value.to_vec();
    out[23] |= MULTISIG_FLAG_SPENT;
    out[68..100].copy_from_slice(spender_hash);
    out[100..104].copy_from_slice(&spender_index.to_be_bytes());
    Ok(out)
}

pub fn set_multisig_out_unspent(value: &[u8]) -> Result<Vec<u8>> {
    check_multisig_value(value)?;
    let mut out = value.to_vec();
    out[23] &= !MULTISIG_FLAG_SPENT;
    for byte in &mut out[68..104] {
        *byte = 0;
    }
    Ok(out)
}

// Metadata scalars.

pub fn value_version(version: u32) -> [u8; 4] {
    version.to_be_bytes()
}

pub fn decode_version(value: &[u8]) -> Result<u32> {
    if value.len() != 4 {
        return Err(truncated("malformed version value"));
    }
    Ok(read_u32(value, 0))
}

pub fn value_mined_balance(amount: Amount) -> [u8; 8] {
    amount.to_be_bytes()
}

pub fn decode_mined_balance(value: &[u8]) -> Result<Amount> {
    if value.len() != 8 {
        return Err(truncated("malformed mined balance value"));
    }
    Ok(read_i64(value, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletd_primitives::script::OP_NONSTAKE;

    fn sample_block() -> Block {
        Block {
            hash: [0xab; 32],
            height: 1234,
        }
    }

    #[test]
    fn block_record_roundtrip() {
        let meta = BlockMeta {
            block: sample_block(),
            time: 1_700_000_000,
            vote_bits: 1,
        };
        let mut value = value_block_record(&meta, &[1u8; 32]);
        value = append_block_record(&value, &[2u8; 32]).expect("append");
        // Appending a listed hash is a no-op.
        value = append_block_record(&value, &[1u8; 32]).expect("append");

        let record = decode_block_record(1234, &value).expect("decode");
        assert_eq!(record.block, sample_block());
        assert_eq!(record.time, 1_700_000_000);
        assert_eq!(record.vote_bits, 1);
        assert_eq!(record.tx_hashes, vec![[1u8; 32], [2u8; 32]]);

        let value = remove_block_record(&value, &[1u8; 32]).expect("remove");
        let record = decode_block_record(1234, &value).expect("decode");
        assert_eq!(record.tx_hashes, vec![[2u8; 32]]);
    }

    #[test]
    fn credit_key_layout() {
        let block = sample_block();
        let key = credit_key(&[7u8; 32], 5, &block);
        assert_eq!(extract_credit_tx_hash(&key), [7u8; 32]);
        assert_eq!(extract_credit_height(&key), 1234);
        assert_eq!(extract_credit_block(&key), block);
        assert_eq!(extract_credit_index(&key), 5);

        let unspent_key = outpoint_key(&[7u8; 32], 5);
        let unspent_value = value_unspent(&block);
        assert_eq!(
            credit_key_from_unspent(&unspent_key, &unspent_value).expect("rebuild"),
            key
        );
        assert_eq!(credit_unspent_value(&key), unspent_value);
    }

    #[test]
    fn credit_value_spend_cycle() {
        let value = value_unspent_credit(42_000, true, false, OP_NONSTAKE);
        assert_eq!(credit_amount(&value).expect("amount"), 42_000);
        assert!(credit_is_change(&value).expect("change"));
        assert!(!credit_is_spent(&value).expect("spent"));
        assert!(!credit_is_coinbase(&value).expect("coinbase"));
        assert_eq!(credit_op_code(&value).expect("op code"), OP_NONSTAKE);

        let spent =
            mark_credit_spent(&value, &[9u8; 32], &sample_block(), 3).expect("mark spent");
        assert!(credit_is_spent(&spent).expect("spent"));
        assert_eq!(credit_amount(&spent).expect("amount"), 42_000);

        let unspent = mark_credit_unspent(&spent).expect("mark unspent");
        assert_eq!(unspent, value);
    }

    #[test]
    fn debit_roundtrip() {
        let block = sample_block();
        let credit = credit_key(&[7u8; 32], 1, &block);
        let value = value_debit(9_999, &credit);
        assert_eq!(debit_amount(&value).expect("amount"), 9_999);
        assert_eq!(debit_credit_key(&value).expect("credit key"), credit);
    }

    #[test]
    fn multisig_value_transitions() {
        let value = value_multisig_out(
            &[3u8; 20],
            2,
            3,
            false,
            1,
            &[0u8; 32],
            0,
            77_000,
            &[0u8; 32],
            0,
            &[5u8; 32],
        );
        assert!(!multisig_out_spent(&value).expect("spent"));
        assert_eq!(multisig_out_m_n(&value).expect("mn"), (2, 3));
        assert_eq!(multisig_out_tree(&value).expect("tree"), 1);
        assert_eq!(multisig_out_amount(&value).expect("amount"), 77_000);

        let mined = set_multisig_out_mined(&value, &[8u8; 32], 100).expect("mined");
        assert_eq!(multisig_out_block(&mined).expect("block"), ([8u8; 32], 100));
        let unmined = set_multisig_out_unmined(&mined).expect("unmined");
        assert_eq!(unmined, value);

        let spent = set_multisig_out_spent(&value, &[6u8; 32], 2).expect("spent");
        assert!(multisig_out_spent(&spent).expect("spent"));
        assert_eq!(
            multisig_out_spender(&spent).expect("spender"),
            ([6u8; 32], 2)
        );
        assert_eq!(set_multisig_out_unspent(&spent).expect("unspent"), value);
    }
}
