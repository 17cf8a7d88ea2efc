//! Flat bucket namespace over pluggable key/value backends.
//!
//! Buckets map byte keys to byte values. Mutations are expressed as
//! [`WriteBatch`]es which every backend commits atomically; [`WriteView`]
//! layers read-your-writes transaction semantics on top of that.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;
pub mod view;

#[cfg(feature = "fjall")]
pub mod fjall;

pub use view::WriteView;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Bucket {
    Blocks,
    TxRecords,
    Credits,
    Unspent,
    Debits,
    Unmined,
    UnminedCredits,
    UnminedInputs,
    Scripts,
    Multisig,
    MultisigUsp,
    Meta,
}

impl Bucket {
    pub const ALL: [Bucket; 12] = [
        Bucket::Blocks,
        Bucket::TxRecords,
        Bucket::Credits,
        Bucket::Unspent,
        Bucket::Debits,
        Bucket::Unmined,
        Bucket::UnminedCredits,
        Bucket::UnminedInputs,
        Bucket::Scripts,
        Bucket::Multisig,
        Bucket::MultisigUsp,
        Bucket::Meta,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Blocks => "blocks",
            Bucket::TxRecords => "txRecords",
            Bucket::Credits => "credits",
            Bucket::Unspent => "unspent",
            Bucket::Debits => "debits",
            Bucket::Unmined => "unmined",
            Bucket::UnminedCredits => "unminedCredits",
            Bucket::UnminedInputs => "unminedInputs",
            Bucket::Scripts => "scripts",
            Bucket::Multisig => "multisig",
            Bucket::MultisigUsp => "multisigUsp",
            Bucket::Meta => "metadata",
        }
    }
}

#[derive(Clone, Debug)]
pub struct WriteKey(SmallVec<[u8; 96]>);

impl WriteKey {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for WriteKey {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteKey {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteKey {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteKey {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

#[derive(Clone, Debug)]
pub struct WriteValue(SmallVec<[u8; 64]>);

impl WriteValue {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for WriteValue {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(value: Vec<u8>) -> Self {
        Self(SmallVec::from_vec(value))
    }
}

impl From<&[u8]> for WriteValue {
    fn from(value: &[u8]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}

impl<const N: usize> From<[u8; N]> for WriteValue {
    fn from(value: [u8; N]) -> Self {
        Self(SmallVec::from_slice(&value))
    }
}

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        bucket: Bucket,
        key: WriteKey,
        value: WriteValue,
    },
    Delete {
        bucket: Bucket,
        key: WriteKey,
    },
}

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, bucket: Bucket, key: impl Into<WriteKey>, value: impl Into<WriteValue>) {
        self.ops.push(WriteOp::Put {
            bucket,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<WriteKey>) {
        self.ops.push(WriteOp::Delete {
            bucket,
            key: key.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError>;
    fn scan_prefix(&self, bucket: Bucket, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(bucket, key)
    }

    fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.as_ref().put(bucket, key, value)
    }

    fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        self.as_ref().delete(bucket, key)
    }

    fn scan_prefix(&self, bucket: Bucket, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(bucket, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }
}
