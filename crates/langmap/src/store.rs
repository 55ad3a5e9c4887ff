//! Record store interfaces and the in-memory reference store.

use crate::error::StoreError;
use crate::record::{Keyed, LanguageSignals, LocationRecord, Observation, SpatialKey};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Bound;
use std::path::Path;

/// An ordered record collection readable in keyset-paginated pages.
#[async_trait]
pub trait RecordStore: Send + Sync {
    type Record: Keyed + Send + Sync + 'static;

    /// Up to `limit` records with key strictly greater than `after`, ascending.
    async fn find_after(
        &self,
        after: Option<&<Self::Record as Keyed>::Key>,
        limit: usize,
    ) -> Result<Vec<Self::Record>, StoreError>;

    /// Approximate collection size. Only used for progress display.
    async fn estimated_count(&self) -> Result<u64, StoreError>;
}

/// `$set` / `$inc` style update of one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationPatch {
    pub set_languages: Option<LanguageSignals>,
    pub set_place_name: Option<String>,
    pub inc_observations: u64,
}

/// A location collection that also supports keyed reads and upserts.
#[async_trait]
pub trait LocationStore: RecordStore<Record = LocationRecord> {
    async fn find_one(&self, key: &SpatialKey) -> Result<Option<LocationRecord>, StoreError>;

    /// Applies `patch` to the record at `key`, creating it when absent, and
    /// returns the updated record. Atomic per key.
    async fn upsert(
        &self,
        key: &SpatialKey,
        patch: LocationPatch,
    ) -> Result<LocationRecord, StoreError>;

    /// Drops every record. Only used for reset-and-rebuild.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// `BTreeMap`-backed store used by the CLI snapshots and by tests.
pub struct MemoryStore<R: Keyed> {
    records: RwLock<BTreeMap<R::Key, R>>,
}

impl<R: Keyed + Clone> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds a store from records; a later record replaces an earlier one
    /// with the same key.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.key().clone(), r))
            .collect::<BTreeMap<_, _>>();
        Self {
            records: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.records.read().get(key).cloned()
    }

    /// All records in key order.
    pub fn snapshot(&self) -> Vec<R> {
        self.records.read().values().cloned().collect()
    }
}

impl<R: Keyed + Clone> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore for MemoryStore<R>
where
    R: Keyed + Clone + Send + Sync + 'static,
{
    type Record = R;

    async fn find_after(&self, after: Option<&R::Key>, limit: usize) -> Result<Vec<R>, StoreError> {
        let records = self.records.read();
        let lower = match after {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn estimated_count(&self) -> Result<u64, StoreError> {
        Ok(self.records.read().len() as u64)
    }
}

#[async_trait]
impl LocationStore for MemoryStore<LocationRecord> {
    async fn find_one(&self, key: &SpatialKey) -> Result<Option<LocationRecord>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn upsert(
        &self,
        key: &SpatialKey,
        patch: LocationPatch,
    ) -> Result<LocationRecord, StoreError> {
        let mut records = self.records.write();
        let record = records
            .entry(key.clone())
            .or_insert_with(|| LocationRecord::new(key.clone()));
        if let Some(languages) = patch.set_languages {
            record.languages = languages;
        }
        if let Some(place_name) = patch.set_place_name {
            record.place_name = Some(place_name);
        }
        record.observations += patch.inc_observations;
        Ok(record.clone())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }
}

impl MemoryStore<LocationRecord> {
    /// Loads locations from a JSON array snapshot. A missing file yields an
    /// empty store.
    pub fn load_locations(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = std::fs::File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<LocationRecord> = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| StoreError::Snapshot {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_records(records))
    }

    pub fn save_locations(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.snapshot()).map_err(|source| {
            StoreError::Snapshot {
                path: path.to_path_buf(),
                source,
            }
        })?;
        writer.flush().map_err(io_err)
    }
}

impl MemoryStore<Observation> {
    /// Loads observations from a JSON Lines file, one observation per line.
    pub fn load_observations(path: &Path) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut observations = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let observation: Observation =
                serde_json::from_str(&line).map_err(|source| StoreError::Snapshot {
                    path: path.to_path_buf(),
                    source,
                })?;
            observations.push(observation);
        }
        Ok(Self::from_records(observations))
    }
}
