//! Read-your-writes overlay over a key/value backend.
//!
//! A [`WriteView`] buffers every mutation in memory while reads consult the
//! buffered state before falling back to the backend. Converting the view
//! into a [`WriteBatch`] and committing it through the backend applies all
//! buffered writes atomically; dropping the view instead discards them, so a
//! failed operation leaves nothing observable behind.

use std::collections::BTreeMap;

use crate::{Bucket, KeyValueStore, ScanResult, StoreError, WriteBatch};

pub struct WriteView<'a, S> {
    store: &'a S,
    pending: BTreeMap<(Bucket, Vec<u8>), Option<Vec<u8>>>,
}

impl<'a, S: KeyValueStore> WriteView<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }

    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(entry) = self.pending.get(&(bucket, key.to_vec())) {
            return Ok(entry.clone());
        }
        self.store.get(bucket, key)
    }

    pub fn put(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.pending.insert((bucket, key.into()), Some(value.into()));
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>) {
        self.pending.insert((bucket, key.into()), None);
    }

    /// Snapshot of a bucket as of this view, sorted by key.
    pub fn iter_bucket(&self, bucket: Bucket) -> Result<ScanResult, StoreError> {
        self.iter_prefix(bucket, &[])
    }

    pub fn iter_prefix(&self, bucket: Bucket, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.scan_prefix(bucket, prefix)?.into_iter().collect();
        for ((entry_bucket, key), entry) in &self.pending {
            if *entry_bucket != bucket || !key.starts_with(prefix) {
                continue;
            }
            match entry {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn has_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for ((bucket, key), entry) in self.pending {
            match entry {
                Some(value) => batch.put(bucket, key, value),
                None => batch.delete(bucket, key),
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn reads_see_pending_writes() {
        let store = MemoryStore::new();
        store.put(Bucket::Meta, b"a", b"old").expect("put");

        let mut view = WriteView::new(&store);
        assert_eq!(view.get(Bucket::Meta, b"a").expect("get"), Some(b"old".to_vec()));
        view.put(Bucket::Meta, b"a".to_vec(), b"new".to_vec());
        view.delete(Bucket::Meta, b"b".to_vec());
        assert_eq!(view.get(Bucket::Meta, b"a").expect("get"), Some(b"new".to_vec()));

        // Nothing hits the backend until the batch commits.
        assert_eq!(store.get(Bucket::Meta, b"a").expect("get"), Some(b"old".to_vec()));
        store.write_batch(&view.into_batch()).expect("commit");
        assert_eq!(store.get(Bucket::Meta, b"a").expect("get"), Some(b"new".to_vec()));
    }

    #[test]
    fn iter_merges_pending_state() {
        let store = MemoryStore::new();
        store.put(Bucket::Unspent, b"k1", b"v1").expect("put");
        store.put(Bucket::Unspent, b"k2", b"v2").expect("put");

        let mut view = WriteView::new(&store);
        view.delete(Bucket::Unspent, b"k1".to_vec());
        view.put(Bucket::Unspent, b"k3".to_vec(), b"v3".to_vec());

        let entries = view.iter_bucket(Bucket::Unspent).expect("iter");
        assert_eq!(
            entries,
            vec![
                (b"k2".to_vec(), b"v2".to_vec()),
                (b"k3".to_vec(), b"v3".to_vec()),
            ]
        );
    }
}
