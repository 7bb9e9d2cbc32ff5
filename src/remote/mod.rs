//! Remote file store abstraction
//!
//! The sync core only talks to the remote repository through these traits:
//! a store that lists records and opens transactions, and a transaction that
//! accumulates mutations until it is committed. Dropping a transaction without
//! committing it discards every mutation it holds.

pub mod bigip;

use async_trait::async_trait;

use crate::error::Result;

pub use bigip::BigIpClient;

/// One object already present in the remote repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    /// Base name of the object, without partition or path
    pub name: String,
    /// Colon-delimited checksum descriptor, see [`crate::checksum::ChecksumDescriptor`]
    pub checksum: String,
}

impl RemoteFileRecord {
    pub fn new(name: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checksum: checksum.into(),
        }
    }
}

/// A remote unit of work
///
/// Exactly one logical operation owns a transaction at a time; `commit`
/// consumes it.
#[async_trait]
pub trait Transaction: Send {
    /// Create a new remote object named `name` from `content`
    async fn create_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()>;

    /// Replace the content of the existing remote object `name`
    async fn update_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()>;

    /// Remove the remote object `name`
    async fn delete_by_name(&mut self, name: &str) -> Result<()>;

    /// Make every accumulated mutation durable
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Transactional, record-oriented remote repository
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_records(&self) -> Result<Vec<RemoteFileRecord>>;

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;
}
