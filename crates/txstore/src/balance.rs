//! Balance calculations, unspent output queries, and coin selection.

use std::collections::BTreeMap;

use walletd_consensus::{Amount, Hash256};
use walletd_log::log_trace;
use walletd_primitives::script::{OP_NONSTAKE, OP_SSGEN, OP_SSRTX, OP_SSTX, OP_SSTXCHANGE};
use walletd_primitives::{OutPoint, TxType, TREE_REGULAR, TREE_STAKE};
use walletd_storage::{Bucket, KeyValueStore, WriteView};

use crate::error::{Error, ErrorKind, Result};
use crate::keyspace as ks;
use crate::records::{Block, BlockMeta, Credit};
use crate::store::{fetch_block_record, fetch_mined_balance, Store};

/// Balance calculation mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BalanceKind {
    /// Every unspent credit not consumed by an unmined input, ignoring
    /// maturity.
    All,
    /// Value locked in unspent ticket submissions.
    LockedStake,
    /// Spendable balance derived from the running mined balance.
    Spendable,
    /// Spendable balance recomputed by walking the unspent index. The
    /// oracle for `Spendable`; also used for repair.
    FullScan,
}

/// Number of confirmations for a transaction mined at `tx_height` when the
/// chain is at `cur_height`. Unmined transactions have zero.
fn confirms(tx_height: i32, cur_height: i32) -> i32 {
    if tx_height == -1 || tx_height > cur_height {
        0
    } else {
        cur_height - tx_height + 1
    }
}

fn confirmed(min_conf: i32, tx_height: i32, cur_height: i32) -> bool {
    confirms(tx_height, cur_height) >= min_conf
}

impl<S: KeyValueStore> Store<S> {
    /// Wallet balance at `sync_height` under the given mode, counting only
    /// credits with at least `min_conf` confirmations and applying the
    /// per-kind maturity rules.
    pub fn balance(&self, min_conf: i32, sync_height: i32, kind: BalanceKind) -> Result<Amount> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());
        match kind {
            BalanceKind::All => self.all_balance(&view),
            BalanceKind::LockedStake => self.locked_stake_balance(&view),
            BalanceKind::Spendable => self.spendable_balance(&view, min_conf, sync_height, None),
            BalanceKind::FullScan => self.full_scan_balance(&view, min_conf, sync_height, None),
        }
    }

    fn spent_by_unmined(
        &self,
        view: &WriteView<'_, S>,
        outpoint_key: &[u8],
        unmined_inputs: Option<&BTreeMap<Vec<u8>, Vec<u8>>>,
    ) -> Result<bool> {
        match unmined_inputs {
            Some(snapshot) => Ok(snapshot.contains_key(outpoint_key)),
            None => Ok(view.get(Bucket::UnminedInputs, outpoint_key)?.is_some()),
        }
    }

    /// Spendable balance starting from the running mined balance. When an
    /// unmined inputs snapshot is supplied, membership tests run against it
    /// instead of the live bucket (simulation across a rollback; only
    /// meaningful with a positive `min_conf`).
    pub(crate) fn spendable_balance(
        &self,
        view: &WriteView<'_, S>,
        min_conf: i32,
        sync_height: i32,
        unmined_inputs: Option<&BTreeMap<Vec<u8>, Vec<u8>>>,
    ) -> Result<Amount> {
        let mut balance = fetch_mined_balance(view)?;

        // Subtract every mined credit currently consumed by an unmined
        // input, except ticket submissions which were never counted.
        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if !self.spent_by_unmined(view, &key, unmined_inputs)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let credit_value = view
                .get(Bucket::Credits, &credit_key)?
                .ok_or_else(|| missing_credit())?;
            if ks::credit_op_code(&credit_value)? != OP_SSTX {
                balance -= ks::credit_amount(&credit_value)?;
            }
        }

        // Walk blocks from the tip down to the last height whose credits
        // could still be immature, subtracting every unspent credit that
        // does not yet count.
        let stop_conf = min_conf.max(self.params.coinbase_maturity);
        let last_height = sync_height - stop_conf;
        for (key, value) in view.iter_bucket(Bucket::Blocks)?.iter().rev() {
            let height = ks::block_height_from_key(key)?;
            if height < last_height {
                break;
            }
            let record = ks::decode_block_record(height, value)?;
            for tx_hash in &record.tx_hashes {
                let rec_key = ks::tx_record_key(tx_hash, &record.block);
                let rec_value = view
                    .get(Bucket::TxRecords, &rec_key)?
                    .ok_or_else(|| missing_tx_record())?;
                let rec = ks::decode_tx_record(tx_hash, &rec_value)?;
                for index in 0..rec.tx.tx_out.len() as u32 {
                    // Already subtracted above when consumed by an unmined
                    // input.
                    let outpoint_key = ks::outpoint_key(tx_hash, index);
                    if self.spent_by_unmined(view, &outpoint_key, unmined_inputs)? {
                        continue;
                    }
                    let credit_key = ks::credit_key(tx_hash, index, &record.block);
                    let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                        continue;
                    };
                    if ks::credit_is_spent(&credit_value)? {
                        continue;
                    }
                    let amount = ks::credit_amount(&credit_value)?;
                    match ks::credit_op_code(&credit_value)? {
                        OP_NONSTAKE => {
                            if !confirmed(min_conf, height, sync_height) {
                                balance -= amount;
                            } else if rec.tx.is_coinbase()
                                && !confirmed(self.params.coinbase_maturity, height, sync_height)
                            {
                                balance -= amount;
                            }
                        }
                        // Locked in a ticket; never added in the first place.
                        OP_SSTX => {}
                        OP_SSGEN | OP_SSRTX => {
                            if !confirmed(self.params.coinbase_maturity, height, sync_height) {
                                balance -= amount;
                            }
                        }
                        OP_SSTXCHANGE => {
                            if !confirmed(self.params.sstx_change_maturity, height, sync_height) {
                                balance -= amount;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // With zero confirmations required, unspent non-stake mempool
        // credits count as well.
        if min_conf == 0 && unmined_inputs.is_none() {
            for (key, value) in view.iter_bucket(Bucket::UnminedCredits)? {
                if self.spent_by_unmined(view, &key, None)? {
                    continue;
                }
                if ks::unmined_credit_op_code(&value)? == OP_NONSTAKE {
                    balance += ks::unmined_credit_amount(&value)?;
                }
            }
        }

        Ok(balance)
    }

    /// Recomputes the spendable balance from the unspent index alone. Agrees
    /// with [`Store::spendable_balance`] whenever no unmined inputs exist.
    pub(crate) fn full_scan_balance(
        &self,
        view: &WriteView<'_, S>,
        min_conf: i32,
        sync_height: i32,
        unmined_inputs: Option<&BTreeMap<Vec<u8>, Vec<u8>>>,
    ) -> Result<Amount> {
        if min_conf <= 0 {
            return Err(Error::new(
                ErrorKind::Input,
                "full scan balance requires a positive minimum confirmation count",
            ));
        }

        let mut balance: Amount = 0;
        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(view, &key, unmined_inputs)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let credit_value = view
                .get(Bucket::Credits, &credit_key)?
                .ok_or_else(|| missing_credit())?;
            let amount = ks::credit_amount(&credit_value)?;
            let height = ks::extract_credit_height(&credit_key);
            match ks::credit_op_code(&credit_value)? {
                OP_NONSTAKE => {
                    let mature = if ks::credit_is_coinbase(&credit_value)? {
                        confirmed(self.params.coinbase_maturity, height, sync_height)
                    } else {
                        confirmed(min_conf, height, sync_height)
                    };
                    if mature {
                        balance += amount;
                    }
                }
                OP_SSTX => {}
                OP_SSGEN | OP_SSRTX => {
                    if confirmed(self.params.coinbase_maturity, height, sync_height) {
                        balance += amount;
                    }
                }
                OP_SSTXCHANGE => {
                    if confirmed(self.params.sstx_change_maturity, height, sync_height) {
                        balance += amount;
                    }
                }
                _ => {}
            }
        }
        Ok(balance)
    }

    fn locked_stake_balance(&self, view: &WriteView<'_, S>) -> Result<Amount> {
        let mut balance: Amount = 0;
        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(view, &key, None)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                continue;
            };
            if ks::credit_op_code(&credit_value)? != OP_SSTX {
                continue;
            }
            if ks::credit_is_spent(&credit_value)? {
                return Err(Error::new(
                    ErrorKind::Database,
                    "spent credit found in the unspent index",
                ));
            }
            balance += ks::credit_amount(&credit_value)?;
        }
        Ok(balance)
    }

    fn all_balance(&self, view: &WriteView<'_, S>) -> Result<Amount> {
        let mut balance: Amount = 0;
        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(view, &key, None)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let credit_value = view
                .get(Bucket::Credits, &credit_key)?
                .ok_or_else(|| missing_credit())?;
            balance += ks::credit_amount(&credit_value)?;
        }
        Ok(balance)
    }

    /// All unspent received transaction outputs. The order is undefined.
    pub fn unspent_outputs(&self) -> Result<Vec<Credit>> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());
        let mut unspent = Vec::new();

        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let block = ks::unspent_block(&value)?;
            let block_record = fetch_block_record(&view, block.height)?;
            let rec = self.fetch_tx_record(&view, &tx_hash, &block)?;
            let output = rec
                .tx
                .tx_out
                .get(index as usize)
                .ok_or_else(|| credit_index_out_of_range())?;
            unspent.push(Credit {
                out_point: OutPoint::new(tx_hash, index, tree_for_type(rec.tx_type)),
                block_meta: block_record.meta(),
                amount: output.value,
                pk_script: output.pk_script.clone(),
                received: rec.received,
                from_coinbase: rec.tx.is_coinbase(),
            });
        }

        for (key, _) in view.iter_bucket(Bucket::UnminedCredits)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let rec_value = view
                .get(Bucket::Unmined, &tx_hash)?
                .ok_or_else(|| missing_unmined_record())?;
            let rec = ks::decode_tx_record(&tx_hash, &rec_value)?;
            let output = rec
                .tx
                .tx_out
                .get(index as usize)
                .ok_or_else(|| credit_index_out_of_range())?;
            unspent.push(Credit {
                out_point: OutPoint::new(tx_hash, index, tree_for_type(rec.tx_type)),
                block_meta: BlockMeta {
                    block: Block::unmined(),
                    time: 0,
                    vote_bits: 0,
                },
                amount: output.value,
                pk_script: output.pk_script.clone(),
                received: rec.received,
                from_coinbase: rec.tx.is_coinbase(),
            });
        }

        log_trace!("{} utxos found in the store", unspent.len());
        Ok(unspent)
    }

    /// All unspent received transaction outpoints. The order is undefined.
    pub fn unspent_outpoints(&self) -> Result<Vec<OutPoint>> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());
        let mut unspent = Vec::new();

        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let credit_value = view
                .get(Bucket::Credits, &credit_key)?
                .ok_or_else(|| missing_credit())?;
            let tree = if ks::credit_op_code(&credit_value)? == OP_NONSTAKE {
                TREE_REGULAR
            } else {
                TREE_STAKE
            };
            unspent.push(OutPoint::new(tx_hash, index, tree));
        }

        for (key, value) in view.iter_bucket(Bucket::UnminedCredits)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let tree = if ks::unmined_credit_op_code(&value)? == OP_NONSTAKE {
                TREE_REGULAR
            } else {
                TREE_STAKE
            };
            unspent.push(OutPoint::new(tx_hash, index, tree));
        }

        Ok(unspent)
    }

    /// Hashes of all unspent tickets known to the wallet, optionally
    /// including ones that have not yet reached ticket maturity (and, with
    /// immature results, unmined purchases).
    pub fn unspent_tickets(
        &self,
        sync_height: i32,
        include_immature: bool,
    ) -> Result<Vec<Hash256>> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());
        let mut tickets = Vec::new();

        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                continue;
            };
            if ks::credit_op_code(&credit_value)? != OP_SSTX {
                continue;
            }
            let height = ks::extract_credit_height(&credit_key);
            if !include_immature
                && !confirmed(self.params.ticket_maturity + 1, height, sync_height)
            {
                continue;
            }
            tickets.push(ks::extract_credit_tx_hash(&credit_key));
        }

        if include_immature {
            for (key, value) in view.iter_bucket(Bucket::UnminedCredits)? {
                if self.spent_by_unmined(&view, &key, None)? {
                    continue;
                }
                if ks::unmined_credit_op_code(&value)? != OP_SSTX {
                    continue;
                }
                let (tx_hash, _) = ks::outpoint_from_key(&key)?;
                tickets.push(tx_hash);
            }
        }

        log_trace!("{} unspent tickets found", tickets.len());
        Ok(tickets)
    }

    /// Selects non-stake outputs summing to at least `needed` by greedily
    /// taking the largest eligible credits. Returns an empty list, not an
    /// error, when the eligible total falls short. With a `min_conf` of zero
    /// unmined non-stake credits are eligible too.
    pub fn unspent_outputs_for_amount(
        &self,
        needed: Amount,
        sync_height: i32,
        min_conf: i32,
    ) -> Result<Vec<Credit>> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());

        struct MinimalCredit {
            tx_hash: Hash256,
            block: Option<Block>,
            index: u32,
            amount: Amount,
            tree: i8,
        }

        let mut eligible = Vec::new();

        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            if self.spent_by_unmined(&view, &key, None)? {
                continue;
            }
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                continue;
            };
            if ks::credit_is_spent(&credit_value)? {
                continue;
            }
            // Only votes may consume ticket submissions.
            let op_code = ks::credit_op_code(&credit_value)?;
            if op_code == OP_SSTX {
                continue;
            }
            let height = ks::extract_credit_height(&credit_key);
            if !confirmed(min_conf, height, sync_height) {
                continue;
            }
            let from_coinbase = ks::credit_is_coinbase(&credit_value)?;
            let mature = match op_code {
                OP_NONSTAKE if from_coinbase => {
                    confirmed(self.params.coinbase_maturity, height, sync_height)
                }
                OP_SSGEN | OP_SSRTX => {
                    confirmed(self.params.coinbase_maturity, height, sync_height)
                }
                OP_SSTXCHANGE => {
                    confirmed(self.params.sstx_change_maturity, height, sync_height)
                }
                _ => true,
            };
            if !mature {
                continue;
            }
            eligible.push(MinimalCredit {
                tx_hash: ks::extract_credit_tx_hash(&credit_key),
                block: Some(ks::extract_credit_block(&credit_key)),
                index: ks::extract_credit_index(&credit_key),
                amount: ks::credit_amount(&credit_value)?,
                tree: if op_code == OP_NONSTAKE {
                    TREE_REGULAR
                } else {
                    TREE_STAKE
                },
            });
        }

        if min_conf == 0 {
            for (key, value) in view.iter_bucket(Bucket::UnminedCredits)? {
                if self.spent_by_unmined(&view, &key, None)? {
                    continue;
                }
                // Immature by definition; only plain outputs qualify.
                if ks::unmined_credit_op_code(&value)? != OP_NONSTAKE {
                    continue;
                }
                let (tx_hash, index) = ks::outpoint_from_key(&key)?;
                eligible.push(MinimalCredit {
                    tx_hash,
                    block: None,
                    index,
                    amount: ks::unmined_credit_amount(&value)?,
                    tree: TREE_REGULAR,
                });
            }
        }

        eligible.sort_by(|a, b| b.amount.cmp(&a.amount));

        let mut sum: Amount = 0;
        let mut take = 0;
        for mc in &eligible {
            sum += mc.amount;
            take += 1;
            if sum >= needed {
                break;
            }
        }
        if sum < needed {
            return Ok(Vec::new());
        }

        let mut selected = Vec::with_capacity(take);
        for mc in eligible.into_iter().take(take) {
            match mc.block {
                Some(block) => {
                    let block_record = fetch_block_record(&view, block.height)?;
                    let rec = self.fetch_tx_record(&view, &mc.tx_hash, &block)?;
                    let output = rec
                        .tx
                        .tx_out
                        .get(mc.index as usize)
                        .ok_or_else(|| credit_index_out_of_range())?;
                    selected.push(Credit {
                        out_point: OutPoint::new(mc.tx_hash, mc.index, mc.tree),
                        block_meta: block_record.meta(),
                        amount: output.value,
                        pk_script: output.pk_script.clone(),
                        received: rec.received,
                        from_coinbase: rec.tx.is_coinbase(),
                    });
                }
                None => {
                    let rec_value = view
                        .get(Bucket::Unmined, &mc.tx_hash)?
                        .ok_or_else(|| missing_unmined_record())?;
                    let rec = ks::decode_tx_record(&mc.tx_hash, &rec_value)?;
                    let output = rec
                        .tx
                        .tx_out
                        .get(mc.index as usize)
                        .ok_or_else(|| credit_index_out_of_range())?;
                    selected.push(Credit {
                        out_point: OutPoint::new(mc.tx_hash, mc.index, mc.tree),
                        block_meta: BlockMeta {
                            block: Block::unmined(),
                            time: 0,
                            vote_bits: 0,
                        },
                        amount: mc.amount,
                        pk_script: output.pk_script.clone(),
                        received: rec.received,
                        from_coinbase: false,
                    });
                }
            }
        }
        Ok(selected)
    }

    fn fetch_tx_record(
        &self,
        view: &WriteView<'_, S>,
        tx_hash: &Hash256,
        block: &Block,
    ) -> Result<crate::records::TxRecord> {
        let key = ks::tx_record_key(tx_hash, block);
        let value = view
            .get(Bucket::TxRecords, &key)?
            .ok_or_else(|| missing_tx_record())?;
        ks::decode_tx_record(tx_hash, &value)
    }
}

fn tree_for_type(tx_type: TxType) -> i8 {
    if tx_type == TxType::Regular {
        TREE_REGULAR
    } else {
        TREE_STAKE
    }
}

fn missing_credit() -> Error {
    Error::new(
        ErrorKind::Database,
        "missing credit for an unspent index entry",
    )
}

fn missing_tx_record() -> Error {
    Error::new(
        ErrorKind::Database,
        "missing transaction record for a stored credit",
    )
}

fn missing_unmined_record() -> Error {
    Error::new(
        ErrorKind::Database,
        "missing unmined record for an unmined credit",
    )
}

fn credit_index_out_of_range() -> Error {
    Error::new(
        ErrorKind::Database,
        "credit output index exceeds transaction outputs",
    )
}
