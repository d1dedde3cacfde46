use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use pocket_client::Signer;
use tracing::{debug, info};

use crate::error::RegistryError;

const SHARDS: usize = 16;

// ---------------------------------------------------------------------------
// SignerStore
// ---------------------------------------------------------------------------

/// Concurrent address-to-signer map. Each operation is atomic on its own.
pub trait SignerStore: Send + Sync {
    /// Returns `false` when `address` was already present.
    fn insert_if_absent(&self, address: String, signer: Arc<Signer>) -> bool;
    fn remove(&self, address: &str) -> Option<Arc<Signer>>;
    fn get(&self, address: &str) -> Option<Arc<Signer>>;
    /// Point-in-time copy of the entries.
    fn entries(&self) -> Vec<(String, Arc<Signer>)>;
    fn len(&self) -> usize;
}

/// Lock-striped [`SignerStore`]: readers only contend within a shard.
pub struct ShardedStore {
    shards: Vec<RwLock<HashMap<String, Arc<Signer>>>>,
}

impl Default for ShardedStore {
    fn default() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::default()).collect(),
        }
    }
}

impl ShardedStore {
    fn shard(&self, address: &str) -> &RwLock<HashMap<String, Arc<Signer>>> {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

impl SignerStore for ShardedStore {
    fn insert_if_absent(&self, address: String, signer: Arc<Signer>) -> bool {
        let mut shard = self
            .shard(&address)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if shard.contains_key(&address) {
            return false;
        }
        shard.insert(address, signer);
        true
    }

    fn remove(&self, address: &str) -> Option<Arc<Signer>> {
        self.shard(address)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address)
    }

    fn get(&self, address: &str) -> Option<Arc<Signer>> {
        self.shard(address)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }

    fn entries(&self) -> Vec<(String, Arc<Signer>)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::clone(v)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// SignerRegistry
// ---------------------------------------------------------------------------

/// Signers for the configured servicer keys, keyed by address.
///
/// Readers are stake tasks; the only writer is the reload path. A reader
/// running during a reconcile may see part of the new membership.
pub struct SignerRegistry {
    store: Box<dyn SignerStore>,
}

impl Default for SignerRegistry {
    fn default() -> Self {
        Self::with_store(Box::<ShardedStore>::default())
    }
}

impl std::fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerRegistry")
            .field("addresses", &self.addresses())
            .finish()
    }
}

/// What a successful [`SignerRegistry::reconcile`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Box<dyn SignerStore>) -> Self {
        Self { store }
    }

    /// Make the registry hold exactly the signers for `keys`.
    ///
    /// Every key is derived before anything is touched; if one fails the
    /// registry is unchanged and the error names the key's index. Removal
    /// is by stored key material, so a reordered key list is a no-op.
    pub fn reconcile(&self, keys: &[String]) -> Result<Reconciliation, RegistryError> {
        let derived = keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                Signer::from_private_key(key).map_err(|source| RegistryError { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = Reconciliation::default();
        for signer in derived {
            let address = signer.address().to_string();
            if self.store.insert_if_absent(address.clone(), Arc::new(signer)) {
                debug!(address = %address, "adding signer");
                report.added.push(address);
            }
        }

        for (address, signer) in self.store.entries() {
            if keys.iter().any(|k| signer.holds_key(k)) {
                continue;
            }
            debug!(address = %address, "removing signer");
            self.store.remove(&address);
            report.removed.push(address);
        }

        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            total = self.len(),
            "signers reconciled"
        );
        Ok(report)
    }

    pub fn find(&self, address: &str) -> Option<Arc<Signer>> {
        self.store.get(address)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted addresses currently registered.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> =
            self.store.entries().into_iter().map(|(a, _)| a).collect();
        addresses.sort();
        addresses
    }
}
