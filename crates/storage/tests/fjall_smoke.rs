#![cfg(feature = "fjall")]

use walletd_storage::fjall::FjallStore;
use walletd_storage::{Bucket, KeyValueStore, WriteBatch};

#[test]
fn fjall_smoke_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");

    let store = FjallStore::open(dir.path()).expect("open fjall");
    store.put(Bucket::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Bucket::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store.put(Bucket::Unspent, b"op:1", b"a").expect("put");
    store.put(Bucket::Unspent, b"op:2", b"b").expect("put");
    let entries = store.scan_prefix(Bucket::Unspent, b"op:").expect("scan");
    assert_eq!(entries.len(), 2);

    let mut batch = WriteBatch::new();
    batch.put(Bucket::Meta, b"batch".to_vec(), b"ok".to_vec());
    batch.delete(Bucket::Meta, b"key".to_vec());
    store.write_batch(&batch).expect("batch commit");

    assert!(store.get(Bucket::Meta, b"key").expect("get").is_none());
    assert_eq!(
        store.get(Bucket::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );
}
