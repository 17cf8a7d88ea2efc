use std::sync::Arc;

use walletd_consensus::{chain_params, ChainParams, Network};
use walletd_primitives::script::{
    OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160, OP_SSTX, OP_SSTXCHANGE,
};
use walletd_primitives::{OutPoint, Transaction, TxIn, TxOut, TREE_REGULAR};
use walletd_storage::memory::MemoryStore;
use walletd_txstore::{BalanceKind, Block, BlockMeta, ErrorKind, Store, TxRecord, BLOCK_VALID};

fn params() -> ChainParams {
    chain_params(Network::Testnet)
}

fn new_store() -> Store<MemoryStore> {
    Store::create(Arc::new(MemoryStore::new()), params()).expect("create store")
}

fn p2pkh(tag: u8) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

fn tagged(op: u8, inner: Vec<u8>) -> Vec<u8> {
    let mut script = Vec::with_capacity(inner.len() + 1);
    script.push(op);
    script.extend_from_slice(&inner);
    script
}

fn output(value: i64, pk_script: Vec<u8>) -> TxOut {
    TxOut {
        value,
        version: 0,
        pk_script,
    }
}

fn spend(prev: OutPoint) -> TxIn {
    TxIn {
        previous_out_point: prev,
        sequence: u32::MAX,
        signature_script: vec![0x51],
    }
}

fn make_tx(tx_in: Vec<TxIn>, tx_out: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        tx_in,
        tx_out,
        lock_time: 0,
        expiry: 0,
    }
}

fn coinbase_tx(value: i64, tag: u8) -> Transaction {
    make_tx(
        vec![TxIn {
            previous_out_point: OutPoint::null(),
            sequence: u32::MAX,
            signature_script: vec![tag],
        }],
        vec![output(value, p2pkh(tag))],
    )
}

fn foreign_outpoint(tag: u8) -> OutPoint {
    OutPoint::new([tag; 32], 0, TREE_REGULAR)
}

fn record(tx: &Transaction, received: u64) -> TxRecord {
    TxRecord::from_tx(tx.clone(), received)
}

fn block_meta(height: i32, tag: u8) -> BlockMeta {
    BlockMeta {
        block: Block {
            hash: [tag; 32],
            height,
        },
        time: 1_700_000_000 + height as u64,
        vote_bits: BLOCK_VALID,
    }
}

#[test]
fn create_rejects_existing_namespace() {
    let db = Arc::new(MemoryStore::new());
    let store = Store::create(Arc::clone(&db), params()).expect("create");
    drop(store);

    let err = Store::create(Arc::clone(&db), params()).expect_err("recreate");
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let reopened = Store::open(db, false, params()).expect("open");
    assert_eq!(
        reopened.balance(1, 0, BalanceKind::Spendable).expect("balance"),
        0
    );
}

#[test]
fn open_requires_existing_store() {
    let err = Store::open(Arc::new(MemoryStore::new()), false, params()).expect_err("open");
    assert_eq!(err.kind(), ErrorKind::NoExists);
}

#[test]
fn closed_store_fails_every_call() {
    let store = new_store();
    store.close();
    let err = store
        .insert_block(&block_meta(1, 1))
        .expect_err("insert after close");
    assert_eq!(err.kind(), ErrorKind::IsClosed);
    let err = store
        .balance(1, 1, BalanceKind::Spendable)
        .expect_err("balance after close");
    assert_eq!(err.kind(), ErrorKind::IsClosed);
}

#[test]
fn block_records_and_hash_lookup() {
    let store = new_store();
    let meta = block_meta(7, 0x77);
    store.insert_block(&meta).expect("insert block");
    // Idempotent.
    store.insert_block(&meta).expect("insert block twice");
    assert_eq!(store.get_block_hash(7).expect("hash"), [0x77; 32]);
    let err = store.get_block_hash(8).expect_err("missing block");
    assert_eq!(err.kind(), ErrorKind::NoExists);
}

#[test]
fn credit_spend_and_reorg_roundtrip() {
    let store = new_store();

    // Tx A pays the wallet 100 in block 100.
    let tx_a = make_tx(
        vec![spend(foreign_outpoint(0x0a))],
        vec![output(100, p2pkh(1))],
    );
    let rec_a = record(&tx_a, 1);
    let blk100 = block_meta(100, 0x64);
    store.insert_tx(&rec_a, Some(&blk100)).expect("insert a");
    store
        .add_credit(&rec_a, Some(&blk100), 0, false)
        .expect("credit a");

    let dump = store.database_dump(100, None).expect("dump");
    assert_eq!(dump.mined_balance, 100);
    assert_eq!(dump.one_conf_balance, 100);
    assert_eq!(dump.one_conf_calc_balance, 100);
    assert_eq!(dump.unspent.len(), 1);

    // Tx B spends A:0 in block 101.
    let tx_b = make_tx(
        vec![spend(OutPoint::new(rec_a.hash, 0, TREE_REGULAR))],
        vec![output(90, p2pkh(2))],
    );
    let rec_b = record(&tx_b, 2);
    let blk101 = block_meta(101, 0x65);
    store.insert_tx(&rec_b, Some(&blk101)).expect("insert b");

    let mined = store.database_dump(101, None).expect("dump");
    assert_eq!(mined.mined_balance, 0);
    assert!(mined.unspent.is_empty());
    assert_eq!(mined.debits.len(), 1);

    // A reorg detaching block 101 undoes the spend and returns B to the
    // unmined pool, recording its input.
    store.rollback(101).expect("rollback");
    let dump = store.database_dump(100, None).expect("dump");
    assert_eq!(dump.mined_balance, 100);
    assert_eq!(dump.unspent.len(), 1);
    assert!(dump.debits.is_empty());
    assert_eq!(dump.unmined.len(), 1);
    assert_eq!(dump.unmined_inputs.len(), 1);
    // The restored credit is consumed by the now-unmined B.
    assert_eq!(
        store.balance(1, 100, BalanceKind::Spendable).expect("balance"),
        0
    );

    // Replaying the detached block restores the exact pre-rollback state.
    store.insert_tx(&rec_b, Some(&blk101)).expect("replay b");
    let replayed = store.database_dump(101, None).expect("dump");
    assert_eq!(mined.diff(&replayed, false), None);
}

#[test]
fn mempool_then_mined_matches_direct_mine() {
    let build = |via_mempool: bool| {
        let store = new_store();
        let tx_fund = make_tx(
            vec![spend(foreign_outpoint(0x0f))],
            vec![output(100, p2pkh(1))],
        );
        let rec_fund = record(&tx_fund, 1);
        let blk100 = block_meta(100, 0x64);
        store.insert_tx(&rec_fund, Some(&blk100)).expect("fund");
        store
            .add_credit(&rec_fund, Some(&blk100), 0, false)
            .expect("fund credit");

        let tx = make_tx(
            vec![spend(OutPoint::new(rec_fund.hash, 0, TREE_REGULAR))],
            vec![output(40, p2pkh(2)), output(55, p2pkh(3))],
        );
        let rec = record(&tx, 2);
        let blk101 = block_meta(101, 0x65);
        if via_mempool {
            store.insert_tx(&rec, None).expect("mempool insert");
            store.add_credit(&rec, None, 1, true).expect("mempool credit");
            store.insert_tx(&rec, Some(&blk101)).expect("confirm");
            store
                .add_credit(&rec, Some(&blk101), 1, true)
                .expect("mined credit again");
        } else {
            store.insert_tx(&rec, Some(&blk101)).expect("mined insert");
            store
                .add_credit(&rec, Some(&blk101), 1, true)
                .expect("mined credit");
        }
        store.database_dump(101, None).expect("dump")
    };

    let via_mempool = build(true);
    let direct = build(false);
    assert_eq!(via_mempool.diff(&direct, false), None);
    assert_eq!(via_mempool.mined_balance, 55);
}

#[test]
fn mined_double_spend_evicts_unmined_chain() {
    let store = new_store();

    let tx_fund = make_tx(
        vec![spend(foreign_outpoint(0x0f))],
        vec![output(100, p2pkh(1))],
    );
    let rec_fund = record(&tx_fund, 1);
    let blk100 = block_meta(100, 0x64);
    store.insert_tx(&rec_fund, Some(&blk100)).expect("fund");
    store
        .add_credit(&rec_fund, Some(&blk100), 0, false)
        .expect("fund credit");

    // M1 spends the credit unmined; M2 spends M1's unmined output.
    let tx_m1 = make_tx(
        vec![spend(OutPoint::new(rec_fund.hash, 0, TREE_REGULAR))],
        vec![output(95, p2pkh(2))],
    );
    let rec_m1 = record(&tx_m1, 2);
    store.insert_tx(&rec_m1, None).expect("m1");
    store.add_credit(&rec_m1, None, 0, false).expect("m1 credit");

    let tx_m2 = make_tx(
        vec![spend(OutPoint::new(rec_m1.hash, 0, TREE_REGULAR))],
        vec![output(94, p2pkh(3))],
    );
    let rec_m2 = record(&tx_m2, 3);
    store.insert_tx(&rec_m2, None).expect("m2");

    let dump = store.database_dump(100, None).expect("dump");
    assert_eq!(dump.unmined.len(), 2);
    assert_eq!(dump.unmined_inputs.len(), 2);

    // A conflicting mined spend of the same output evicts both.
    let tx_b = make_tx(
        vec![spend(OutPoint::new(rec_fund.hash, 0, TREE_REGULAR))],
        vec![output(90, p2pkh(4))],
    );
    let rec_b = record(&tx_b, 4);
    let blk101 = block_meta(101, 0x65);
    store.insert_tx(&rec_b, Some(&blk101)).expect("mined b");

    let dump = store.database_dump(101, None).expect("dump");
    assert!(dump.unmined.is_empty());
    assert!(dump.unmined_inputs.is_empty());
    assert!(dump.unmined_credits.is_empty());
    assert_eq!(dump.debits.len(), 1);
    assert_eq!(dump.mined_balance, 0);
}

#[test]
fn ticket_lifecycle_and_locked_balance() {
    let store = new_store();

    let tx_fund = make_tx(
        vec![spend(foreign_outpoint(0x0f))],
        vec![output(100, p2pkh(1))],
    );
    let rec_fund = record(&tx_fund, 1);
    let blk100 = block_meta(100, 0x64);
    store.insert_tx(&rec_fund, Some(&blk100)).expect("fund");
    store
        .add_credit(&rec_fund, Some(&blk100), 0, false)
        .expect("fund credit");

    // Ticket purchase: 90 locked in the submission, 10 back as stake change.
    let tx_ticket = make_tx(
        vec![spend(OutPoint::new(rec_fund.hash, 0, TREE_REGULAR))],
        vec![
            output(90, tagged(OP_SSTX, p2pkh(2))),
            output(10, tagged(OP_SSTXCHANGE, p2pkh(3))),
        ],
    );
    let rec_ticket = record(&tx_ticket, 2);
    let blk101 = block_meta(101, 0x65);
    store.insert_tx(&rec_ticket, Some(&blk101)).expect("ticket");
    store
        .add_credit(&rec_ticket, Some(&blk101), 0, false)
        .expect("submission credit");
    store
        .add_credit(&rec_ticket, Some(&blk101), 1, true)
        .expect("change credit");

    // The submission never joins the running balance.
    let dump = store.database_dump(101, None).expect("dump");
    assert_eq!(dump.mined_balance, 10);
    assert_eq!(
        store
            .balance(1, 101, BalanceKind::LockedStake)
            .expect("locked"),
        90
    );
    assert_eq!(
        store.balance(1, 101, BalanceKind::Spendable).expect("spendable"),
        10
    );
    assert_eq!(store.balance(1, 101, BalanceKind::All).expect("all"), 100);

    // Detaching the ticket's block restores the funding credit and drops
    // the locked value.
    store.rollback(101).expect("rollback");
    let dump = store.database_dump(100, None).expect("dump");
    assert_eq!(dump.mined_balance, 100);
    assert_eq!(dump.unmined.len(), 1);
    assert_eq!(dump.unmined_credits.len(), 2);
    assert_eq!(
        store
            .balance(1, 100, BalanceKind::LockedStake)
            .expect("locked"),
        0
    );
    // The funding credit is consumed by the unmined ticket, and neither
    // unmined ticket output is spendable at zero confirmations.
    assert_eq!(
        store.balance(0, 100, BalanceKind::Spendable).expect("spendable"),
        0
    );
}

#[test]
fn coinbase_maturity_gates_spendable() {
    let store = new_store();

    let tx_c = coinbase_tx(50, 0x0c);
    let rec_c = record(&tx_c, 1);
    let blk200 = block_meta(200, 0xc8);
    store.insert_tx(&rec_c, Some(&blk200)).expect("coinbase");
    store
        .add_credit(&rec_c, Some(&blk200), 0, false)
        .expect("coinbase credit");

    // coinbase_maturity is 16: 11 confirmations at height 210, 17 at 216.
    assert_eq!(
        store.balance(1, 210, BalanceKind::Spendable).expect("balance"),
        0
    );
    assert_eq!(
        store.balance(1, 210, BalanceKind::FullScan).expect("balance"),
        0
    );
    assert_eq!(
        store.balance(1, 216, BalanceKind::Spendable).expect("balance"),
        50
    );
    assert_eq!(
        store.balance(1, 216, BalanceKind::FullScan).expect("balance"),
        50
    );

    assert!(store
        .unspent_outputs_for_amount(50, 210, 1)
        .expect("selection")
        .is_empty());
    let selected = store
        .unspent_outputs_for_amount(50, 216, 1)
        .expect("selection");
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].amount, 50);
    assert!(selected[0].from_coinbase);
}

#[test]
fn coinbase_rollback_removes_descendant_spenders() {
    let store = new_store();

    let tx_c = coinbase_tx(50, 0x0c);
    let rec_c = record(&tx_c, 1);
    let blk200 = block_meta(200, 0xc8);
    store.insert_tx(&rec_c, Some(&blk200)).expect("coinbase");
    store
        .add_credit(&rec_c, Some(&blk200), 0, false)
        .expect("coinbase credit");

    // A mempool transaction spends the coinbase output.
    let tx_m = make_tx(
        vec![spend(OutPoint::new(rec_c.hash, 0, TREE_REGULAR))],
        vec![output(49, p2pkh(2))],
    );
    let rec_m = record(&tx_m, 2);
    store.insert_tx(&rec_m, None).expect("mempool spender");
    store.add_credit(&rec_m, None, 0, false).expect("m credit");

    // Detaching the coinbase block destroys the coinbase credits and
    // removes the unmined spend chain.
    store.rollback(200).expect("rollback");
    let dump = store.database_dump(199, None).expect("dump");
    assert_eq!(dump.mined_balance, 0);
    assert!(dump.unmined.is_empty());
    assert!(dump.unmined_inputs.is_empty());
    assert!(dump.unmined_credits.is_empty());
    assert!(dump.credits.is_empty());
    assert!(dump.unspent.is_empty());
    assert!(dump.tx_records.is_empty());
}

#[test]
fn coin_selection_is_descending_greedy() {
    let store = new_store();
    let blk100 = block_meta(100, 0x64);

    for (tag, amount) in [(1u8, 3i64), (2, 7), (3, 2), (4, 5)] {
        let tx = make_tx(
            vec![spend(foreign_outpoint(tag))],
            vec![output(amount, p2pkh(tag))],
        );
        let rec = record(&tx, tag as u64);
        store.insert_tx(&rec, Some(&blk100)).expect("insert");
        store
            .add_credit(&rec, Some(&blk100), 0, false)
            .expect("credit");
    }

    let selected = store
        .unspent_outputs_for_amount(8, 200, 1)
        .expect("selection");
    let amounts: Vec<i64> = selected.iter().map(|credit| credit.amount).collect();
    assert_eq!(amounts, vec![7, 5]);

    assert!(store
        .unspent_outputs_for_amount(20, 200, 1)
        .expect("selection")
        .is_empty());

    // With zero confirmations required, unmined non-stake credits are
    // eligible too.
    let tx_unmined = make_tx(
        vec![spend(foreign_outpoint(9))],
        vec![output(6, p2pkh(9))],
    );
    let rec_unmined = record(&tx_unmined, 9);
    store.insert_tx(&rec_unmined, None).expect("unmined");
    store
        .add_credit(&rec_unmined, None, 0, false)
        .expect("unmined credit");

    let selected = store
        .unspent_outputs_for_amount(12, 200, 0)
        .expect("selection");
    let amounts: Vec<i64> = selected.iter().map(|credit| credit.amount).collect();
    assert_eq!(amounts, vec![7, 6]);
}

#[test]
fn full_scan_agrees_with_spendable_without_unmined_inputs() {
    let store = new_store();
    let blk100 = block_meta(100, 0x64);
    let blk101 = block_meta(101, 0x65);

    // A mix of plain, coinbase, and ticket credits.
    let tx_plain = make_tx(
        vec![spend(foreign_outpoint(1))],
        vec![output(100, p2pkh(1))],
    );
    let rec_plain = record(&tx_plain, 1);
    store.insert_tx(&rec_plain, Some(&blk100)).expect("plain");
    store
        .add_credit(&rec_plain, Some(&blk100), 0, false)
        .expect("plain credit");

    let tx_cb = coinbase_tx(50, 2);
    let rec_cb = record(&tx_cb, 2);
    store.insert_tx(&rec_cb, Some(&blk101)).expect("coinbase");
    store
        .add_credit(&rec_cb, Some(&blk101), 0, false)
        .expect("coinbase credit");

    let tx_ticket = make_tx(
        vec![spend(foreign_outpoint(3))],
        vec![output(90, tagged(OP_SSTX, p2pkh(3)))],
    );
    let rec_ticket = record(&tx_ticket, 3);
    store.insert_tx(&rec_ticket, Some(&blk101)).expect("ticket");
    store
        .add_credit(&rec_ticket, Some(&blk101), 0, false)
        .expect("ticket credit");

    for tip in [101, 105, 116, 117, 200] {
        assert_eq!(
            store.balance(1, tip, BalanceKind::Spendable).expect("spendable"),
            store.balance(1, tip, BalanceKind::FullScan).expect("full scan"),
            "balances disagree at tip {tip}"
        );
    }
}

#[test]
fn unspent_queries_report_trees_and_tickets() {
    let store = new_store();
    let blk100 = block_meta(100, 0x64);
    let blk101 = block_meta(101, 0x65);

    let tx_plain = make_tx(
        vec![spend(foreign_outpoint(1))],
        vec![output(100, p2pkh(1))],
    );
    let rec_plain = record(&tx_plain, 1);
    store.insert_tx(&rec_plain, Some(&blk100)).expect("plain");
    store
        .add_credit(&rec_plain, Some(&blk100), 0, false)
        .expect("plain credit");

    let tx_ticket = make_tx(
        vec![spend(foreign_outpoint(2))],
        vec![output(90, tagged(OP_SSTX, p2pkh(2)))],
    );
    let rec_ticket = record(&tx_ticket, 2);
    store.insert_tx(&rec_ticket, Some(&blk101)).expect("ticket");
    store
        .add_credit(&rec_ticket, Some(&blk101), 0, false)
        .expect("ticket credit");

    let outputs = store.unspent_outputs().expect("outputs");
    assert_eq!(outputs.len(), 2);
    let plain = outputs
        .iter()
        .find(|credit| credit.out_point.hash == rec_plain.hash)
        .expect("plain credit listed");
    assert_eq!(plain.amount, 100);
    assert_eq!(plain.out_point.tree, TREE_REGULAR);
    assert_eq!(plain.block_meta.block.height, 100);

    let outpoints = store.unspent_outpoints().expect("outpoints");
    assert_eq!(outpoints.len(), 2);
    let ticket_op = outpoints
        .iter()
        .find(|op| op.hash == rec_ticket.hash)
        .expect("ticket outpoint listed");
    assert_eq!(ticket_op.tree, 1);

    // ticket_maturity is 16; the ticket matures 17 blocks after 101.
    assert!(store.unspent_tickets(101, false).expect("tickets").is_empty());
    assert_eq!(store.unspent_tickets(117, false).expect("tickets").len(), 1);
    assert_eq!(store.unspent_tickets(101, true).expect("tickets").len(), 1);

    // An unmined purchase only shows up with immature results included.
    let tx_unmined = make_tx(
        vec![spend(foreign_outpoint(3))],
        vec![output(80, tagged(OP_SSTX, p2pkh(3)))],
    );
    let rec_unmined = record(&tx_unmined, 3);
    store.insert_tx(&rec_unmined, None).expect("unmined ticket");
    store
        .add_credit(&rec_unmined, None, 0, false)
        .expect("unmined ticket credit");
    assert_eq!(store.unspent_tickets(117, false).expect("tickets").len(), 1);
    assert_eq!(store.unspent_tickets(117, true).expect("tickets").len(), 2);
}

#[test]
fn mempool_replacement_keeps_latest_serialization() {
    let store = new_store();

    let tx = make_tx(
        vec![spend(foreign_outpoint(1))],
        vec![output(10, p2pkh(1))],
    );
    let rec_first = record(&tx, 5);
    store.insert_tx(&rec_first, None).expect("first insert");
    let rec_second = record(&tx, 9);
    store.insert_tx(&rec_second, None).expect("replacement");

    let dump = store.database_dump(0, None).expect("dump");
    assert_eq!(dump.unmined.len(), 1);
    let value = dump.unmined.values().next().expect("unmined value");
    // The received timestamp reflects the replacement.
    assert_eq!(&value[0..8], &9u64.to_be_bytes());
}
