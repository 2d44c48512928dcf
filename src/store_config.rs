//! `ArchiveStoreConfig`: a named binding of a remote object-store name (e.g.
//! `gdrive`) to a folder path within that store. Authorization material is
//! assumed to already exist in the object-store CLI driver's on-disk config
//! on each participating host; this record only tells the orchestrator
//! *which* configured remote and path a job should target.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::StorageObject;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArchiveStoreConfig {
    pub name: String,
    /// The remote name as configured in the object-store CLI's `.conf`, e.g. `gdrive`.
    pub remote: String,
    /// Folder path within that remote where parts are staged.
    pub folder: String,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct StoreConfigCollection {
    stores: BTreeMap<String, ArchiveStoreConfig>,
}

impl StoreConfigCollection {
    pub fn read_from_storage(path: &std::path::Path) -> Self {
        Self::read_from(path)
    }

    pub fn save_to_storage(&self, path: &std::path::Path) {
        self.save_to(path);
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveStoreConfig> {
        self.stores.get(name)
    }

    pub fn insert(&mut self, config: ArchiveStoreConfig) -> &mut Self {
        self.stores.insert(config.name.clone(), config);
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.stores.remove(name);
        self
    }

    pub fn stores(&self) -> &BTreeMap<String, ArchiveStoreConfig> {
        &self.stores
    }
}
