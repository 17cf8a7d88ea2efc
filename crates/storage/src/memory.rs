use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::{Bucket, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Bucket, Vec<u8>), Vec<u8>>;

#[derive(Default, Debug)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(&(bucket, key.to_vec())).cloned())
    }

    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.insert((bucket, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        guard.remove(&(bucket, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(&self, bucket: Bucket, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.inner.read().expect("memory store lock");
        let mut results = Vec::new();
        let range = guard.range((bucket, prefix.to_vec())..);
        for ((entry_bucket, key), value) in range {
            if *entry_bucket != bucket || !key.starts_with(prefix) {
                break;
            }
            results.push((key.clone(), value.clone()));
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { bucket, key, value } => {
                    guard.insert(
                        (*bucket, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { bucket, key } => {
                    guard.remove(&(*bucket, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_stops_at_bucket_boundary() {
        let store = MemoryStore::new();
        store.put(Bucket::Blocks, b"a", b"1").expect("put");
        store.put(Bucket::TxRecords, b"a", b"2").expect("put");
        let entries = store.scan_prefix(Bucket::Blocks, b"").expect("scan");
        assert_eq!(entries, vec![(b"a".to_vec(), b"1".to_vec())]);
    }
}
