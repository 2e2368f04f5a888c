//! Consistent hashing of block hashes onto block-store addresses.
//!
//! Every member sits on the ring at `sha256(addr)`. A block belongs to the
//! first member whose position is greater than or equal to the block hash,
//! wrapping around to the lowest position.

use crate::error::{Result, SyncError};
use crate::types::compute_hash;
use std::collections::BTreeMap;
use std::ops::Bound;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    epoch: u64,
    // ring position -> server address, kept sorted by position
    members: BTreeMap<String, String>,
}

impl HashRing {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::default();
        for addr in addrs {
            ring.add_server(addr);
        }
        ring.epoch = 0;
        ring
    }

    /// Ring position of a server address.
    pub fn hash_key(addr: &str) -> String {
        compute_hash(addr.as_bytes())
    }

    /// Bumped on every membership change.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns false if the address was already a member.
    pub fn add_server(&mut self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        let key = Self::hash_key(&addr);
        if self.members.contains_key(&key) {
            return false;
        }
        tracing::debug!("Adding block store {} at ring position {}", addr, key);
        self.members.insert(key, addr);
        self.epoch += 1;
        true
    }

    /// Keys owned by the removed member move to the next ring position.
    pub fn remove_server(&mut self, addr: &str) -> bool {
        let removed = self.members.remove(&Self::hash_key(addr)).is_some();
        if removed {
            self.epoch += 1;
        }
        removed
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.members.contains_key(&Self::hash_key(addr))
    }

    /// Server addresses in ring order.
    pub fn servers(&self) -> Vec<String> {
        self.members.values().cloned().collect()
    }

    pub fn resolve(&self, block_hash: &str) -> Result<&str> {
        self.members
            .range::<str, _>((Bound::Included(block_hash), Bound::Unbounded))
            .next()
            .or_else(|| self.members.iter().next())
            .map(|(_, addr)| addr.as_str())
            .ok_or(SyncError::NoAvailableShard)
    }

    /// Group hashes by owning server. Duplicate input hashes collapse.
    pub fn partition<'a, I>(&self, hashes: I) -> Result<BTreeMap<String, Vec<String>>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut stores: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for hash in hashes {
            let addr = self.resolve(hash)?;
            let bucket = stores.entry(addr.to_string()).or_default();
            if !bucket.contains(hash) {
                bucket.push(hash.clone());
            }
        }
        Ok(stores)
    }
}
