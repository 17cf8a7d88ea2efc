//! The wallet transaction store.
//!
//! All state lives in the bucket namespace; a [`Store`] owns only its mutex
//! and the chain parameters. Every public call holds the mutex for its whole
//! duration and performs its work against a single [`WriteView`], committing
//! the resulting batch atomically or discarding it on error.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use walletd_consensus::{Amount, ChainParams, Hash256, Network, ZERO_HASH};
use walletd_log::{log_debug, log_info, log_warn};
use walletd_primitives::hash::hash160;
use walletd_primitives::script::{self, OP_SSTX};
use walletd_primitives::{OutPoint, ScriptClass, TxType, TREE_REGULAR, TREE_STAKE};
use walletd_storage::{Bucket, KeyValueStore, WriteView};

use crate::error::{Error, ErrorKind, Result};
use crate::keyspace as ks;
use crate::records::{
    Block, BlockMeta, DatabaseContents, MultisigCredit, MultisigOut, TxRecord, BLOCK_VALID,
};

/// Transaction store over a bucketed key/value namespace.
#[derive(Debug)]
pub struct Store<S> {
    pub(crate) db: Arc<S>,
    pub(crate) params: ChainParams,
    closed: Mutex<bool>,
}

impl<S: KeyValueStore> Store<S> {
    /// Creates and opens a new persistent transaction store in the
    /// namespace. Fails with `AlreadyExists` when one is present.
    pub fn create(db: Arc<S>, params: ChainParams) -> Result<Self> {
        let mut view = WriteView::new(db.as_ref());
        if view.get(Bucket::Meta, ks::META_KEY_VERSION)?.is_some() {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "transaction store already exists in this namespace",
            ));
        }
        view.put(
            Bucket::Meta,
            ks::META_KEY_VERSION.to_vec(),
            ks::value_version(ks::LATEST_VERSION),
        );
        put_mined_balance(&mut view, 0);
        let batch = view.into_batch();
        db.write_batch(&batch)?;
        Ok(Self {
            db,
            params,
            closed: Mutex::new(false),
        })
    }

    /// Opens an existing store, upgrading the schema as needed and
    /// optionally pruning stale mempool tickets.
    pub fn open(db: Arc<S>, prune_tickets: bool, params: ChainParams) -> Result<Self> {
        let version = match db.get(Bucket::Meta, ks::META_KEY_VERSION)? {
            Some(value) => ks::decode_version(&value)?,
            None => {
                return Err(Error::new(
                    ErrorKind::NoExists,
                    "transaction store does not exist in this namespace",
                ))
            }
        };
        if version > ks::LATEST_VERSION {
            return Err(Error::new(
                ErrorKind::Database,
                format!("unknown transaction store version {version}"),
            ));
        }

        let store = Self {
            db,
            params,
            closed: Mutex::new(false),
        };

        // Simnet block times are too short for a meaningful cutoff.
        if prune_tickets && params.network != Network::Simnet {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let mut view = WriteView::new(store.db.as_ref());
            store.prune_old_tickets(&mut view, params.ticket_cutoff_secs() as u64, now)?;
            store.commit(view)?;
        }

        Ok(store)
    }

    /// Waits for in-flight calls and fails every call made afterwards.
    pub fn close(&self) {
        *self.closed.lock().expect("store mutex") = true;
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, bool>> {
        let guard = self.closed.lock().expect("store mutex");
        if *guard {
            return Err(Error::is_closed());
        }
        Ok(guard)
    }

    pub(crate) fn commit(&self, view: WriteView<'_, S>) -> Result<()> {
        let batch = view.into_batch();
        self.db.write_batch(&batch)?;
        Ok(())
    }

    /// Inserts a block record if one does not already exist for the height.
    pub fn insert_block(&self, meta: &BlockMeta) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        let key = ks::block_key(meta.block.height);
        if view.get(Bucket::Blocks, &key)?.is_none() {
            view.put(Bucket::Blocks, key, ks::value_block_record_empty(meta));
        }
        self.commit(view)
    }

    /// Fetches the hash of the block at the given height.
    pub fn get_block_hash(&self, height: i32) -> Result<Hash256> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());
        Ok(fetch_block_record(&view, height)?.block.hash)
    }

    /// Records a transaction in the wallet history. Without a block the
    /// transaction joins the unmined pool; its index must be unset.
    pub fn insert_tx(&self, rec: &TxRecord, block: Option<&BlockMeta>) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        match block {
            None => self.insert_mempool_tx(&mut view, rec)?,
            Some(meta) => self.insert_mined_tx(&mut view, rec, meta)?,
        }
        self.commit(view)
    }

    fn insert_mempool_tx(&self, view: &mut WriteView<'_, S>, rec: &TxRecord) -> Result<()> {
        // Replacing an existing record keeps the latest relayed
        // serialization.
        view.put(Bucket::Unmined, rec.hash, ks::value_tx_record(rec));
        for input in &rec.tx.tx_in {
            let prev = &input.previous_out_point;
            let key = ks::outpoint_key(&prev.hash, prev.index);
            let relevant = view.get(Bucket::Unspent, &key)?.is_some()
                || view.get(Bucket::UnminedCredits, &key)?.is_some();
            if relevant {
                view.put(Bucket::UnminedInputs, key, rec.hash);
            }
        }
        Ok(())
    }

    /// Inserts a mined transaction record. The exact record already mined is
    /// a no-op; the same hash in the unmined pool is promoted in place, and
    /// unmined double spends (including mutations) are removed along with
    /// their spend chains.
    fn insert_mined_tx(
        &self,
        view: &mut WriteView<'_, S>,
        rec: &TxRecord,
        meta: &BlockMeta,
    ) -> Result<()> {
        let rec_key = ks::tx_record_key(&rec.hash, &meta.block);
        if view.get(Bucket::TxRecords, &rec_key)?.is_some() {
            return Ok(());
        }
        if view.get(Bucket::Unmined, &rec.hash)?.is_some() {
            return self.move_mined_tx(view, rec, meta);
        }
        self.remove_double_spends(view, rec)?;

        let block_key = ks::block_key(meta.block.height);
        let block_value = match view.get(Bucket::Blocks, &block_key)? {
            Some(value) => ks::append_block_record(&value, &rec.hash)?,
            None => ks::value_block_record(meta, &rec.hash),
        };
        view.put(Bucket::Blocks, block_key, block_value);
        view.put(Bucket::TxRecords, rec_key, ks::value_tx_record(rec));

        let mut balance = fetch_mined_balance(view)?;
        for (i, input) in rec.tx.tx_in.iter().enumerate() {
            let Some((unspent_key, credit_key)) =
                exists_unspent(view, &input.previous_out_point)?
            else {
                // Previous outputs spent by unmined transactions are tracked
                // through the unmined inputs index instead of debit records.
                continue;
            };
            let index = i as u32;
            let amount = spend_credit(view, &credit_key, &rec.hash, &meta.block, index)?;
            view.put(
                Bucket::Debits,
                ks::debit_key(&rec.hash, index, &meta.block),
                ks::value_debit(amount, &credit_key),
            );

            // The ticket-consuming input of a vote or revocation never
            // decrements the balance: the ticket was never counted.
            let is_ticket_input = (rec.tx_type == TxType::Vote && i == 1)
                || (rec.tx_type == TxType::Revocation && i == 0);
            if !is_ticket_input {
                balance -= amount;
            }
            view.delete(Bucket::Unspent, unspent_key);
            view.delete(Bucket::UnminedInputs, unspent_key);
        }
        put_mined_balance(view, balance);
        Ok(())
    }

    /// Promotes an unmined record into a block.
    fn move_mined_tx(
        &self,
        view: &mut WriteView<'_, S>,
        rec: &TxRecord,
        meta: &BlockMeta,
    ) -> Result<()> {
        log_debug!(
            "marking unconfirmed transaction {} mined in block {}",
            display_hash(&rec.hash),
            meta.block.height
        );

        let block_key = ks::block_key(meta.block.height);
        let block_value = match view.get(Bucket::Blocks, &block_key)? {
            Some(value) => ks::append_block_record(&value, &rec.hash)?,
            None => ks::value_block_record(meta, &rec.hash),
        };
        view.put(Bucket::Blocks, block_key, block_value);
        view.put(
            Bucket::TxRecords,
            ks::tx_record_key(&rec.hash, &meta.block),
            ks::value_tx_record(rec),
        );

        let mut balance = fetch_mined_balance(view)?;

        // Mark every unspent credit consumed by this transaction spent and
        // record the matching debit.
        for (i, input) in rec.tx.tx_in.iter().enumerate() {
            let Some((unspent_key, credit_key)) =
                exists_unspent(view, &input.previous_out_point)?
            else {
                continue;
            };
            let index = i as u32;
            let amount = spend_credit(view, &credit_key, &rec.hash, &meta.block, index)?;
            let credit_value = view
                .get(Bucket::Credits, &credit_key)?
                .ok_or_else(|| Error::new(ErrorKind::Database, "missing credit value"))?;
            if ks::credit_op_code(&credit_value)? != OP_SSTX {
                balance -= amount;
            }
            view.delete(Bucket::Unspent, unspent_key);
            view.put(
                Bucket::Debits,
                ks::debit_key(&rec.hash, index, &meta.block),
                ks::value_debit(amount, &credit_key),
            );
            view.delete(Bucket::UnminedInputs, unspent_key);
        }

        // Convert this record's unmined credits to mined ones. Moved credits
        // are indexed unspent even when another unconfirmed transaction
        // spends them.
        for (key, value) in view.iter_prefix(Bucket::UnminedCredits, &rec.hash)? {
            let (_, index) = ks::outpoint_from_key(&key)?;
            let amount = ks::unmined_credit_amount(&value)?;
            let change = ks::unmined_credit_is_change(&value)?;
            let coinbase = ks::unmined_credit_is_coinbase(&value)?;
            let op_code = ks::unmined_credit_op_code(&value)?;

            view.put(
                Bucket::Credits,
                ks::credit_key(&rec.hash, index, &meta.block),
                ks::value_unspent_credit(amount, change, coinbase, op_code),
            );
            view.put(
                Bucket::Unspent,
                ks::outpoint_key(&rec.hash, index),
                ks::value_unspent(&meta.block),
            );
            view.delete(Bucket::UnminedCredits, key);

            if op_code != OP_SSTX {
                balance += amount;
            }
        }

        put_mined_balance(view, balance);
        view.delete(Bucket::Unmined, rec.hash);
        Ok(())
    }

    /// Removes unmined transactions that double spend any input of the
    /// record, along with their spend chains.
    fn remove_double_spends(&self, view: &mut WriteView<'_, S>, rec: &TxRecord) -> Result<()> {
        for input in &rec.tx.tx_in {
            let prev = &input.previous_out_point;
            let key = ks::outpoint_key(&prev.hash, prev.index);
            let Some(spender_bytes) = view.get(Bucket::UnminedInputs, &key)? else {
                continue;
            };
            let spender_hash = hash_from_bytes(&spender_bytes)?;
            if spender_hash == rec.hash {
                continue;
            }
            let Some(spender_value) = view.get(Bucket::Unmined, &spender_hash)? else {
                view.delete(Bucket::UnminedInputs, key);
                continue;
            };
            let spender = ks::decode_tx_record(&spender_hash, &spender_value)?;
            log_debug!(
                "removing double spending unmined transaction {}",
                display_hash(&spender_hash)
            );
            self.remove_conflict(view, &spender)?;
        }
        Ok(())
    }

    /// Removes an unmined transaction and, transitively, every unmined
    /// transaction spending its outputs.
    fn remove_conflict(&self, view: &mut WriteView<'_, S>, rec: &TxRecord) -> Result<()> {
        // Drop the record first so a malformed spend cycle terminates.
        view.delete(Bucket::Unmined, rec.hash);

        for index in 0..rec.tx.tx_out.len() as u32 {
            let key = ks::outpoint_key(&rec.hash, index);
            if let Some(spender_bytes) = view.get(Bucket::UnminedInputs, &key)? {
                let spender_hash = hash_from_bytes(&spender_bytes)?;
                if let Some(spender_value) = view.get(Bucket::Unmined, &spender_hash)? {
                    let spender = ks::decode_tx_record(&spender_hash, &spender_value)?;
                    log_debug!(
                        "transaction {} spends a removed unmined output, removing as well",
                        display_hash(&spender_hash)
                    );
                    self.remove_conflict(view, &spender)?;
                }
                view.delete(Bucket::UnminedInputs, key);
            }
            if view.get(Bucket::UnminedCredits, &key)?.is_some() {
                view.delete(Bucket::UnminedCredits, key);
            }
        }

        for input in &rec.tx.tx_in {
            let prev = &input.previous_out_point;
            let key = ks::outpoint_key(&prev.hash, prev.index);
            if let Some(spender_bytes) = view.get(Bucket::UnminedInputs, &key)? {
                if spender_bytes == rec.hash {
                    view.delete(Bucket::UnminedInputs, key);
                }
            }
        }
        Ok(())
    }

    /// Marks a transaction output spendable by the wallet. The credit is
    /// added unspent and flips to spent when a spending transaction is
    /// inserted.
    pub fn add_credit(
        &self,
        rec: &TxRecord,
        block: Option<&BlockMeta>,
        index: u32,
        change: bool,
    ) -> Result<()> {
        let _guard = self.lock()?;
        if index as usize >= rec.tx.tx_out.len() {
            return Err(Error::new(
                ErrorKind::Input,
                "transaction output does not exist",
            ));
        }
        let mut view = WriteView::new(self.db.as_ref());
        self.add_credit_inner(&mut view, rec, block, index, change)?;
        self.commit(view)
    }

    fn add_credit_inner(
        &self,
        view: &mut WriteView<'_, S>,
        rec: &TxRecord,
        block: Option<&BlockMeta>,
        index: u32,
        change: bool,
    ) -> Result<()> {
        let output = &rec.tx.tx_out[index as usize];
        let op_code = script::credit_op_code(&output.pk_script);
        let from_coinbase = rec.tx.is_coinbase();

        let Some(meta) = block else {
            let key = ks::outpoint_key(&rec.hash, index);
            view.put(
                Bucket::UnminedCredits,
                key,
                ks::value_unmined_credit(output.value, change, from_coinbase, op_code),
            );
            return Ok(());
        };

        let key = ks::credit_key(&rec.hash, index, &meta.block);
        if view.get(Bucket::Credits, &key)?.is_some() {
            return Ok(());
        }

        log_debug!(
            "marking transaction {} output {} ({}) spendable",
            display_hash(&rec.hash),
            index,
            output.value
        );
        view.put(
            Bucket::Credits,
            key,
            ks::value_unspent_credit(output.value, change, from_coinbase, op_code),
        );

        // Ticket submissions never contribute to the running balance.
        if op_code != OP_SSTX {
            let balance = fetch_mined_balance(view)?;
            put_mined_balance(view, balance + output.value);
        }

        view.put(
            Bucket::Unspent,
            ks::outpoint_key(&rec.hash, index),
            ks::value_unspent(&meta.block),
        );
        Ok(())
    }

    /// Tracks a P2SH multisignature output. An existing unmined record is
    /// flipped mined when the output confirms.
    pub fn add_multisig_out(
        &self,
        rec: &TxRecord,
        block: Option<&BlockMeta>,
        index: u32,
    ) -> Result<()> {
        let _guard = self.lock()?;
        if index as usize >= rec.tx.tx_out.len() {
            return Err(Error::new(
                ErrorKind::Input,
                "transaction output does not exist",
            ));
        }
        let mut view = WriteView::new(self.db.as_ref());
        self.add_multisig_out_inner(&mut view, rec, block, index)?;
        self.commit(view)
    }

    fn add_multisig_out_inner(
        &self,
        view: &mut WriteView<'_, S>,
        rec: &TxRecord,
        block: Option<&BlockMeta>,
        index: u32,
    ) -> Result<()> {
        let key = ks::outpoint_key(&rec.hash, index);
        if let Some(value) = view.get(Bucket::Multisig, &key)? {
            let (block_hash, _) = ks::multisig_out_block(&value)?;
            match block {
                Some(meta) => {
                    if block_hash != ZERO_HASH {
                        return Err(Error::new(
                            ErrorKind::Database,
                            "tried to update a mined multisig output's mined information",
                        ));
                    }
                    view.put(
                        Bucket::Multisig,
                        key,
                        ks::set_multisig_out_mined(
                            &value,
                            &meta.block.hash,
                            meta.block.height as u32,
                        )?,
                    );
                    return Ok(());
                }
                // Already tracked unmined; adding it again is a no-op.
                None if block_hash == ZERO_HASH => return Ok(()),
                None => {}
            }
        }

        let output = &rec.tx.tx_out[index as usize];
        let mut tree = TREE_REGULAR;
        let mut class = script::classify(&output.pk_script);
        if class.is_stake() {
            tree = TREE_STAKE;
            class = script::stake_subclass(&output.pk_script);
        }
        if class != ScriptClass::ScriptHash {
            return Err(Error::new(
                ErrorKind::Input,
                "transaction output is not pay-to-script-hash",
            ));
        }
        let script_hash = script::script_hash_from_p2sh(&output.pk_script)
            .ok_or_else(|| Error::new(ErrorKind::Input, "malformed pay-to-script-hash output"))?;
        let ms_script = view.get(Bucket::Scripts, &script_hash)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                "multisig redeem script does not exist in the script bucket",
            )
        })?;
        let (m, n) = script::multisig_m_n(&ms_script).ok_or_else(|| {
            Error::new(
                ErrorKind::Input,
                "stored redeem script is not a standard multisig script",
            )
        })?;

        let (block_hash, block_height) = match block {
            Some(meta) => (meta.block.hash, meta.block.height as u32),
            None => (ZERO_HASH, 0),
        };
        view.put(
            Bucket::Multisig,
            key,
            ks::value_multisig_out(
                &script_hash,
                m,
                n,
                false,
                tree,
                &block_hash,
                block_height,
                output.value,
                &ZERO_HASH,
                0,
                &rec.hash,
            ),
        );
        view.put(Bucket::MultisigUsp, key, Vec::new());
        Ok(())
    }

    /// Marks a multisignature output spent and removes it from the unspent
    /// multisig set. Respending with the exact same spender is a no-op.
    pub fn spend_multisig_out(
        &self,
        op: &OutPoint,
        spender_hash: Hash256,
        spender_index: u32,
    ) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());

        let key = ks::outpoint_key(&op.hash, op.index);
        let value = view.get(Bucket::Multisig, &key)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                "tried to spend a multisig output that does not exist",
            )
        })?;
        if ks::multisig_out_spent(&value)? {
            let (found_hash, found_index) = ks::multisig_out_spender(&value)?;
            if found_hash == spender_hash && found_index == spender_index {
                return Ok(());
            }
            return Err(Error::new(
                ErrorKind::DoubleSpend,
                "tried to double spend a multisig output",
            ));
        }
        if view.get(Bucket::MultisigUsp, &key)?.is_none() {
            return Err(Error::new(
                ErrorKind::Input,
                "unspent multisig outpoint is missing from the unspent bucket",
            ));
        }
        view.put(
            Bucket::Multisig,
            key,
            ks::set_multisig_out_spent(&value, &spender_hash, spender_index)?,
        );
        view.delete(Bucket::MultisigUsp, key);
        self.commit(view)
    }

    /// Detaches every block at the given height onwards, moving the affected
    /// transactions back to the unmined pool.
    pub fn rollback(&self, height: i32) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        self.rollback_inner(&mut view, height)?;
        self.commit(view)
    }

    fn rollback_inner(&self, view: &mut WriteView<'_, S>, height: i32) -> Result<()> {
        let mut balance = fetch_mined_balance(view)?;

        // Credits removed from detached coinbase transactions. Unmined
        // transactions spending them are fixed up after the block loop, since
        // blocks detach from the tip downwards.
        let mut coinbase_credits: Vec<(Hash256, u32)> = Vec::new();

        let tip = match view.iter_bucket(Bucket::Blocks)?.last() {
            Some((key, _)) => ks::block_height_from_key(key)?,
            None => {
                put_mined_balance(view, balance);
                return Ok(());
            }
        };

        for i in (height..=tip).rev() {
            let Some(block_value) = view.get(Bucket::Blocks, &ks::block_key(i))? else {
                continue;
            };
            let record = ks::decode_block_record(i, &block_value)?;
            log_debug!(
                "rolling back transactions from block {} height {}",
                display_hash(&record.block.hash),
                i
            );

            // This block's validity vote applied the parent's regular tree.
            // When the parent is itself being detached, its regular
            // transactions unwind here, together with this block's stake
            // transactions; the parent's record is updated but not deleted.
            if record.vote_bits & BLOCK_VALID != 0 && i > 0 && i - 1 >= height {
                if let Some(parent_value) = view.get(Bucket::Blocks, &ks::block_key(i - 1))? {
                    let parent = ks::decode_block_record(i - 1, &parent_value)?;
                    for tx_hash in &parent.tx_hashes {
                        if self.mined_tx_type(view, tx_hash, &parent.block)? == TxType::Regular {
                            self.rollback_transaction(
                                view,
                                tx_hash,
                                &parent.block,
                                &mut coinbase_credits,
                                &mut balance,
                                true,
                            )?;
                        }
                    }
                }
            }

            let mut stake_txs = Vec::new();
            let mut regular_txs = Vec::new();
            for tx_hash in &record.tx_hashes {
                if self.mined_tx_type(view, tx_hash, &record.block)? == TxType::Regular {
                    regular_txs.push(*tx_hash);
                } else {
                    stake_txs.push(*tx_hash);
                }
            }
            for tx_hash in &stake_txs {
                self.rollback_transaction(
                    view,
                    tx_hash,
                    &record.block,
                    &mut coinbase_credits,
                    &mut balance,
                    false,
                )?;
            }
            // Regular transactions still listed were applied at insertion
            // but never unwound through a child's validity vote: the tip's
            // regular tree, or one a child voted invalid.
            for tx_hash in &regular_txs {
                self.rollback_transaction(
                    view,
                    tx_hash,
                    &record.block,
                    &mut coinbase_credits,
                    &mut balance,
                    false,
                )?;
            }
            view.delete(Bucket::Blocks, ks::block_key(i));
        }

        for (tx_hash, index) in &coinbase_credits {
            let key = ks::outpoint_key(tx_hash, *index);
            let Some(spender_bytes) = view.get(Bucket::UnminedInputs, &key)? else {
                continue;
            };
            let spender_hash = hash_from_bytes(&spender_bytes)?;
            let Some(spender_value) = view.get(Bucket::Unmined, &spender_hash)? else {
                continue;
            };
            let spender = ks::decode_tx_record(&spender_hash, &spender_value)?;
            log_debug!(
                "transaction {} spends a removed coinbase output, removing as well",
                display_hash(&spender_hash)
            );
            self.remove_conflict(view, &spender)?;
        }

        put_mined_balance(view, balance);
        Ok(())
    }

    fn mined_tx_type(
        &self,
        view: &WriteView<'_, S>,
        tx_hash: &Hash256,
        block: &Block,
    ) -> Result<TxType> {
        let key = ks::tx_record_key(tx_hash, block);
        let value = view.get(Bucket::TxRecords, &key)?.ok_or_else(|| {
            Error::new(
                ErrorKind::Database,
                "missing transaction record for block transaction",
            )
        })?;
        ks::tx_record_type(&value)
    }

    fn rollback_transaction(
        &self,
        view: &mut WriteView<'_, S>,
        tx_hash: &Hash256,
        block: &Block,
        coinbase_credits: &mut Vec<(Hash256, u32)>,
        balance: &mut Amount,
        is_parent: bool,
    ) -> Result<()> {
        let rec_key = ks::tx_record_key(tx_hash, block);
        let rec_value = view.get(Bucket::TxRecords, &rec_key)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                "missing transaction record to roll back",
            )
        })?;
        let rec = ks::decode_tx_record(tx_hash, &rec_value)?;
        view.delete(Bucket::TxRecords, rec_key);

        if is_parent {
            let key = ks::block_key(block.height);
            let value = view.get(Bucket::Blocks, &key)?.ok_or_else(|| {
                Error::new(
                    ErrorKind::NoExists,
                    format!("missing block record at height {}", block.height),
                )
            })?;
            view.put(Bucket::Blocks, key, ks::remove_block_record(&value, tx_hash)?);
        }

        // Coinbase transactions are destroyed outright: a coinbase has no
        // debits, and its credits cannot survive a reorganization.
        if rec.tx.is_coinbase() {
            for index in 0..rec.tx.tx_out.len() as u32 {
                let credit_key = ks::credit_key(tx_hash, index, block);
                let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                    continue;
                };
                coinbase_credits.push((*tx_hash, index));

                let outpoint_key = ks::outpoint_key(tx_hash, index);
                if view.get(Bucket::Unspent, &outpoint_key)?.is_some() {
                    *balance -= ks::credit_amount(&credit_value)?;
                    view.delete(Bucket::Unspent, outpoint_key);
                }
                view.delete(Bucket::Credits, credit_key);

                if let Some(ms_value) = view.get(Bucket::Multisig, &outpoint_key)? {
                    view.put(
                        Bucket::Multisig,
                        outpoint_key,
                        ks::set_multisig_out_unmined(&ms_value)?,
                    );
                }
            }
            return Ok(());
        }

        // Re-pool the original serialized record.
        view.put(Bucket::Unmined, *tx_hash, rec_value);

        for (i, input) in rec.tx.tx_in.iter().enumerate() {
            // The stakebase of a vote references no previous output.
            if i == 0 && rec.tx_type == TxType::Vote {
                continue;
            }
            let prev = &input.previous_out_point;
            let prev_key = ks::outpoint_key(&prev.hash, prev.index);
            view.put(Bucket::UnminedInputs, prev_key, *tx_hash);

            let debit_key = ks::debit_key(tx_hash, i as u32, block);
            let Some(debit_value) = view.get(Bucket::Debits, &debit_key)? else {
                continue;
            };
            let credit_key = ks::debit_credit_key(&debit_value)?;
            let credit_value = view.get(Bucket::Credits, &credit_key)?;
            view.delete(Bucket::Debits, debit_key);

            // The spent credit may already be gone: blocks detach in
            // decreasing order, so a later transaction in this rollback may
            // have removed it. Nothing further to do then.
            let Some(credit_value) = credit_value else {
                continue;
            };
            let op_code = ks::credit_op_code(&credit_value)?;
            let amount = unspend_raw_credit(view, &credit_key)?;
            if amount == 0 {
                continue;
            }
            // Ticket output spends were never decremented.
            if op_code != OP_SSTX {
                *balance += amount;
            }
            view.put(
                Bucket::Unspent,
                prev_key,
                ks::credit_unspent_value(&credit_key),
            );

            if let Some(ms_value) = view.get(Bucket::Multisig, &prev_key)? {
                view.put(
                    Bucket::Multisig,
                    prev_key,
                    ks::set_multisig_out_unspent(&ms_value)?,
                );
                view.put(Bucket::MultisigUsp, prev_key, Vec::new());
            }
        }

        // Move every detached credit to the unmined credits index.
        for index in 0..rec.tx.tx_out.len() as u32 {
            let credit_key = ks::credit_key(tx_hash, index, block);
            let Some(credit_value) = view.get(Bucket::Credits, &credit_key)? else {
                continue;
            };
            let amount = ks::credit_amount(&credit_value)?;
            let change = ks::credit_is_change(&credit_value)?;
            let coinbase = ks::credit_is_coinbase(&credit_value)?;
            let op_code = ks::credit_op_code(&credit_value)?;

            let outpoint_key = ks::outpoint_key(tx_hash, index);
            view.put(
                Bucket::UnminedCredits,
                outpoint_key,
                ks::value_unmined_credit(amount, change, coinbase, op_code),
            );
            view.delete(Bucket::Credits, credit_key);

            if view.get(Bucket::Unspent, &outpoint_key)?.is_some() {
                // Ticket submissions were never counted.
                if op_code != OP_SSTX {
                    *balance -= amount;
                }
                view.delete(Bucket::Unspent, outpoint_key);
            }
            if let Some(ms_value) = view.get(Bucket::Multisig, &outpoint_key)? {
                view.put(
                    Bucket::Multisig,
                    outpoint_key,
                    ks::set_multisig_out_unmined(&ms_value)?,
                );
            }
        }
        Ok(())
    }

    /// Stores a redeem script keyed by its 160-bit hash.
    pub fn insert_tx_script(&self, tx_script: &[u8]) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        view.put(Bucket::Scripts, hash160(tx_script).to_vec(), tx_script.to_vec());
        self.commit(view)
    }

    /// Fetches a stored script by its 160-bit hash.
    pub fn get_tx_script(&self, hash: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock()?;
        Ok(self.db.get(Bucket::Scripts, hash)?)
    }

    /// All scripts currently stored by the wallet.
    pub fn stored_tx_scripts(&self) -> Result<Vec<Vec<u8>>> {
        let _guard = self.lock()?;
        Ok(self
            .db
            .scan_prefix(Bucket::Scripts, &[])?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Fetches the stored multisignature output for an outpoint.
    pub fn get_multisig_output(&self, op: &OutPoint) -> Result<MultisigOut> {
        let _guard = self.lock()?;
        let key = ks::outpoint_key(&op.hash, op.index);
        let value = self.db.get(Bucket::Multisig, &key)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                format!(
                    "missing multisignature output for outpoint {}:{}",
                    display_hash(&op.hash),
                    op.index
                ),
            )
        })?;
        decode_multisig_out(op.hash, op.index, &value)
    }

    /// Fetches the redeemable multisignature credit for an outpoint,
    /// resolving its redeem script.
    pub fn get_multisig_credit(&self, op: &OutPoint) -> Result<MultisigCredit> {
        let _guard = self.lock()?;
        let key = ks::outpoint_key(&op.hash, op.index);
        let value = self.db.get(Bucket::Multisig, &key)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                format!(
                    "missing multisignature output for outpoint {}:{}",
                    display_hash(&op.hash),
                    op.index
                ),
            )
        })?;
        if ks::multisig_out_spent(&value)? {
            let (spender_hash, spender_index) = ks::multisig_out_spender(&value)?;
            return Err(Error::new(
                ErrorKind::Input,
                format!(
                    "multisignature output {}:{} has already been spent by transaction {} (input {})",
                    display_hash(&op.hash),
                    op.index,
                    display_hash(&spender_hash),
                    spender_index
                ),
            ));
        }
        let script_hash = ks::multisig_out_script_hash(&value)?;
        let ms_script = self.db.get(Bucket::Scripts, &script_hash)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NoExists,
                "multisig redeem script does not exist in the script bucket",
            )
        })?;
        let (m, n) = ks::multisig_out_m_n(&value)?;
        Ok(MultisigCredit {
            out_point: OutPoint::new(op.hash, op.index, ks::multisig_out_tree(&value)?),
            script_hash,
            ms_script,
            m,
            n,
            amount: ks::multisig_out_amount(&value)?,
        })
    }

    /// All unspent multisignature credits tracked by the wallet.
    pub fn unspent_multisig_credits(&self) -> Result<Vec<MultisigCredit>> {
        let _guard = self.lock()?;
        self.multisig_credits_filtered(None)
    }

    /// Unspent multisignature credits paying to the given script hash.
    pub fn unspent_multisig_credits_for_address(
        &self,
        addr_script_hash: &[u8; 20],
    ) -> Result<Vec<MultisigCredit>> {
        let _guard = self.lock()?;
        self.multisig_credits_filtered(Some(addr_script_hash))
    }

    fn multisig_credits_filtered(
        &self,
        filter: Option<&[u8; 20]>,
    ) -> Result<Vec<MultisigCredit>> {
        let mut credits = Vec::new();
        for (key, _) in self.db.scan_prefix(Bucket::MultisigUsp, &[])? {
            let value = self.db.get(Bucket::Multisig, &key)?.ok_or_else(|| {
                Error::new(
                    ErrorKind::NoExists,
                    "unspent multisig outpoint has no output record",
                )
            })?;
            let script_hash = ks::multisig_out_script_hash(&value)?;
            if filter.is_some_and(|wanted| *wanted != script_hash) {
                continue;
            }
            let ms_script = self.db.get(Bucket::Scripts, &script_hash)?.ok_or_else(|| {
                Error::new(
                    ErrorKind::NoExists,
                    "multisig redeem script does not exist in the script bucket",
                )
            })?;
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let (m, n) = ks::multisig_out_m_n(&value)?;
            credits.push(MultisigCredit {
                out_point: OutPoint::new(tx_hash, index, ks::multisig_out_tree(&value)?),
                script_hash,
                ms_script,
                m,
                n,
                amount: ks::multisig_out_amount(&value)?,
            });
        }
        Ok(credits)
    }

    /// Verifies that every unspent index entry is backed by a credit, a
    /// transaction record, and a block record; orphans are deleted. The
    /// surviving outpoints are returned for the caller to confirm against
    /// the network.
    pub fn repair_inconsistencies(&self) -> Result<Vec<OutPoint>> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());

        let mut survivors = Vec::new();
        let mut bad_unspent: Vec<Vec<u8>> = Vec::new();
        let mut bad_credits: Vec<[u8; ks::CREDIT_KEY_LEN]> = Vec::new();

        for (key, value) in view.iter_bucket(Bucket::Unspent)? {
            let (tx_hash, index) = ks::outpoint_from_key(&key)?;
            let block = ks::unspent_block(&value)?;
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;

            if view.get(Bucket::Credits, &credit_key)?.is_none() {
                bad_unspent.push(key);
                continue;
            }
            let missing_record = view
                .get(Bucket::TxRecords, &ks::tx_record_key(&tx_hash, &block))?
                .is_none();
            let missing_block = view
                .get(Bucket::Blocks, &ks::block_key(block.height))?
                .is_none();
            if missing_record || missing_block {
                bad_unspent.push(key);
                bad_credits.push(credit_key);
            }
            survivors.push(OutPoint::new(tx_hash, index, TREE_REGULAR));
        }

        if !bad_unspent.is_empty() || !bad_credits.is_empty() {
            log_warn!(
                "repairing transaction store: deleting {} orphaned unspent entries and {} orphaned credits",
                bad_unspent.len(),
                bad_credits.len()
            );
        }
        for credit_key in bad_credits {
            view.delete(Bucket::Credits, credit_key);
        }
        for key in bad_unspent {
            view.delete(Bucket::Unspent, key);
        }

        self.commit(view)?;
        Ok(survivors)
    }

    /// Removes the given unspent index entries, best-effort deleting the
    /// paired credits.
    pub fn delete_unspent(&self, outpoints: &[OutPoint]) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        for op in outpoints {
            let key = ks::outpoint_key(&op.hash, op.index);
            let value = view.get(Bucket::Unspent, &key)?.ok_or_else(|| {
                Error::new(ErrorKind::Database, "failed to find unspent outpoint")
            })?;
            // The paired credit may or may not still exist.
            let credit_key = ks::credit_key_from_unspent(&key, &value)?;
            view.delete(Bucket::Credits, credit_key);
            view.delete(Bucket::Unspent, key);
        }
        self.commit(view)
    }

    /// Overwrites the running mined balance with a full-scan recalculation.
    pub fn repair_mined_balance(&self, cur_height: i32) -> Result<()> {
        let _guard = self.lock()?;
        let mut view = WriteView::new(self.db.as_ref());
        let balance = self.full_scan_balance(&view, 1, cur_height, None)?;
        put_mined_balance(&mut view, balance);
        self.commit(view)
    }

    /// Exports the contents of every bucket together with the stored balance
    /// and both one-confirmation spendable calculations. When an older
    /// unmined inputs snapshot is supplied the balances are simulated
    /// against it.
    pub fn database_dump(
        &self,
        height: i32,
        old_unmined_inputs: Option<&BTreeMap<Vec<u8>, Vec<u8>>>,
    ) -> Result<DatabaseContents> {
        let _guard = self.lock()?;
        let view = WriteView::new(self.db.as_ref());

        let mut dump = DatabaseContents {
            mined_balance: fetch_mined_balance(&view)?,
            one_conf_balance: self.spendable_balance(&view, 1, height, old_unmined_inputs)?,
            one_conf_calc_balance: self.full_scan_balance(&view, 1, height, old_unmined_inputs)?,
            ..DatabaseContents::default()
        };
        dump.blocks = collect_bucket(&view, Bucket::Blocks)?;
        dump.tx_records = collect_bucket(&view, Bucket::TxRecords)?;
        dump.credits = collect_bucket(&view, Bucket::Credits)?;
        dump.unspent = collect_bucket(&view, Bucket::Unspent)?;
        dump.debits = collect_bucket(&view, Bucket::Debits)?;
        dump.unmined = collect_bucket(&view, Bucket::Unmined)?;
        dump.unmined_credits = collect_bucket(&view, Bucket::UnminedCredits)?;
        dump.unmined_inputs = collect_bucket(&view, Bucket::UnminedInputs)?;
        dump.scripts = collect_bucket(&view, Bucket::Scripts)?;
        dump.multisig = collect_bucket(&view, Bucket::Multisig)?;
        dump.multisig_usp = collect_bucket(&view, Bucket::MultisigUsp)?;
        Ok(dump)
    }

    /// Unwinds and deletes unmined ticket purchases older than the cutoff.
    /// Tickets are processed newest first since one purchase may spend the
    /// change of another.
    fn prune_old_tickets(
        &self,
        view: &mut WriteView<'_, S>,
        cutoff_secs: u64,
        now: u64,
    ) -> Result<()> {
        log_info!("pruning stale ticket purchases from the transaction store");
        let mut balance = fetch_mined_balance(view)?;

        let mut stale: Vec<TxRecord> = Vec::new();
        for (key, value) in view.iter_bucket(Bucket::Unmined)? {
            let tx_hash = hash_from_bytes(&key)?;
            let rec = ks::decode_tx_record(&tx_hash, &value)?;
            if rec.tx_type == TxType::Ticket && now.saturating_sub(rec.received) > cutoff_secs {
                stale.push(rec);
            }
        }
        stale.sort_by(|a, b| b.received.cmp(&a.received));

        for rec in &stale {
            // Return every consumed input to its unspent state.
            for input in &rec.tx.tx_in {
                let prev = &input.previous_out_point;
                let prev_key = ks::outpoint_key(&prev.hash, prev.index);
                if view.get(Bucket::UnminedInputs, &prev_key)?.is_none() {
                    return Err(Error::new(
                        ErrorKind::Database,
                        "stale ticket input is missing from the unmined inputs index",
                    ));
                }

                let mut mined_credit_key = None;
                for (candidate, _) in view.iter_prefix(Bucket::Credits, &prev.hash)? {
                    if ks::extract_credit_index(&candidate) == prev.index {
                        let mut key = [0u8; ks::CREDIT_KEY_LEN];
                        key.copy_from_slice(&candidate);
                        mined_credit_key = Some(key);
                        break;
                    }
                }
                match mined_credit_key {
                    Some(credit_key) => {
                        // A mempool spend does not mark the credit spent or
                        // touch the balance, so only a credit that actually
                        // carries a spender needs the balance patched back.
                        let was_spent = match view.get(Bucket::Credits, &credit_key)? {
                            Some(credit_value) => ks::credit_is_spent(&credit_value)?,
                            None => false,
                        };
                        let amount = unspend_raw_credit(view, &credit_key)?;
                        // Zero means the credit was removed as a double
                        // spend; only restore ones that still exist.
                        if was_spent && amount != 0 {
                            balance += amount;
                            view.put(
                                Bucket::Unspent,
                                prev_key,
                                ks::credit_unspent_value(&credit_key),
                            );
                        }
                    }
                    None => {
                        if view.get(Bucket::UnminedCredits, &prev_key)?.is_none() {
                            return Err(Error::new(
                                ErrorKind::Database,
                                "stale ticket spends an unknown output",
                            ));
                        }
                        // The store keeps no spender back-references for
                        // unmined outputs; the sibling credit is left as is.
                    }
                }
                view.delete(Bucket::UnminedInputs, prev_key);
            }

            // Only submission and change tagged outputs carry credits for a
            // ticket purchase.
            for (index, output) in rec.tx.tx_out.iter().enumerate() {
                let class = script::classify(&output.pk_script);
                if class == ScriptClass::StakeSubmission || class == ScriptClass::StakeChange {
                    let key = ks::outpoint_key(&rec.hash, index as u32);
                    if view.get(Bucket::UnminedCredits, &key)?.is_some() {
                        view.delete(Bucket::UnminedCredits, key);
                    }
                }
            }
            view.delete(Bucket::Unmined, rec.hash);
        }

        put_mined_balance(view, balance);
        Ok(())
    }
}

// Bucket-level primitives shared across the pipelines.

pub(crate) fn fetch_mined_balance<S: KeyValueStore>(view: &WriteView<'_, S>) -> Result<Amount> {
    match view.get(Bucket::Meta, ks::META_KEY_MINED_BALANCE)? {
        Some(value) => ks::decode_mined_balance(&value),
        None => Err(Error::new(ErrorKind::Database, "missing mined balance")),
    }
}

pub(crate) fn put_mined_balance<S: KeyValueStore>(view: &mut WriteView<'_, S>, amount: Amount) {
    view.put(
        Bucket::Meta,
        ks::META_KEY_MINED_BALANCE.to_vec(),
        ks::value_mined_balance(amount).to_vec(),
    );
}

pub(crate) fn fetch_block_record<S: KeyValueStore>(
    view: &WriteView<'_, S>,
    height: i32,
) -> Result<ks::BlockRecord> {
    match view.get(Bucket::Blocks, &ks::block_key(height))? {
        Some(value) => ks::decode_block_record(height, &value),
        None => Err(Error::new(
            ErrorKind::NoExists,
            format!("no block record at height {height}"),
        )),
    }
}

/// Looks up the unspent index for an outpoint, returning the index key and
/// the credit key it points at.
pub(crate) fn exists_unspent<S: KeyValueStore>(
    view: &WriteView<'_, S>,
    op: &OutPoint,
) -> Result<Option<([u8; ks::OUTPOINT_KEY_LEN], [u8; ks::CREDIT_KEY_LEN])>> {
    let key = ks::outpoint_key(&op.hash, op.index);
    match view.get(Bucket::Unspent, &key)? {
        Some(value) => Ok(Some((key, ks::credit_key_from_unspent(&key, &value)?))),
        None => Ok(None),
    }
}

/// Stamps the spender into a credit and returns its amount. Callers must
/// pair this with a debit record.
pub(crate) fn spend_credit<S: KeyValueStore>(
    view: &mut WriteView<'_, S>,
    credit_key: &[u8; ks::CREDIT_KEY_LEN],
    spender_hash: &Hash256,
    spender_block: &Block,
    spender_index: u32,
) -> Result<Amount> {
    let value = view
        .get(Bucket::Credits, credit_key)?
        .ok_or_else(|| Error::new(ErrorKind::NoExists, "missing credit to spend"))?;
    let amount = ks::credit_amount(&value)?;
    view.put(
        Bucket::Credits,
        *credit_key,
        ks::mark_credit_spent(&value, spender_hash, spender_block, spender_index)?,
    );
    Ok(amount)
}

/// Clears the spender from a credit, returning its amount. A removed credit
/// yields zero, which callers treat as "do nothing further".
pub(crate) fn unspend_raw_credit<S: KeyValueStore>(
    view: &mut WriteView<'_, S>,
    credit_key: &[u8; ks::CREDIT_KEY_LEN],
) -> Result<Amount> {
    let Some(value) = view.get(Bucket::Credits, credit_key)? else {
        return Ok(0);
    };
    let amount = ks::credit_amount(&value)?;
    view.put(
        Bucket::Credits,
        *credit_key,
        ks::mark_credit_unspent(&value)?,
    );
    Ok(amount)
}

fn collect_bucket<S: KeyValueStore>(
    view: &WriteView<'_, S>,
    bucket: Bucket,
) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    Ok(view.iter_bucket(bucket)?.into_iter().collect())
}

fn decode_multisig_out(tx_hash: Hash256, index: u32, value: &[u8]) -> Result<MultisigOut> {
    let tree = ks::multisig_out_tree(value)?;
    let (m, n) = ks::multisig_out_m_n(value)?;
    let (block_hash, block_height) = ks::multisig_out_block(value)?;
    let (spent_by, spent_by_index) = ks::multisig_out_spender(value)?;
    Ok(MultisigOut {
        out_point: OutPoint::new(tx_hash, index, tree),
        tree,
        script_hash: ks::multisig_out_script_hash(value)?,
        m,
        n,
        tx_hash: ks::multisig_out_tx_hash(value)?,
        block_hash,
        block_height,
        amount: ks::multisig_out_amount(value)?,
        spent: ks::multisig_out_spent(value)?,
        spent_by,
        spent_by_index,
    })
}

pub(crate) fn hash_from_bytes(bytes: &[u8]) -> Result<Hash256> {
    if bytes.len() != 32 {
        return Err(Error::new(
            ErrorKind::Database,
            "malformed transaction hash",
        ));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(hash)
}

/// Byte-reversed hex, matching how hashes appear in block explorers.
pub(crate) fn display_hash(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
