pub mod model;
pub mod template;
pub mod store;
pub mod storage;
pub mod filter;
pub mod decode;
pub mod pipeline;
pub mod executor;
pub mod events;
pub mod session;
pub mod config;
pub mod manager;
pub mod search;
pub mod protocol;
pub mod parser;
pub mod server;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::decode::DecodedView;
use crate::filter::BloomFilter;
use crate::model::{RecordId, RecordVersion, StoredVersion};
use crate::search::SearchQuery;
use crate::storage::Segment;
use crate::store::{RecordStore, StoreError};
use crate::template::{Template, TemplateCatalog, TemplateResolver};

/// Versions kept per record by default, besides the live one.
pub const DEFAULT_HISTORY_MAX_ITEMS: usize = 10;

/// Field content kept per record's history by default (6 MiB).
pub const DEFAULT_HISTORY_MAX_SIZE: u64 = 6 * 1024 * 1024;

const BLOOM_CAPACITY: usize = 1_000_000;
const BLOOM_FP_RATE: f64 = 0.01;

/// How much history compaction keeps per record. The live version is always
/// kept and never counts against either budget.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRetention {
    pub max_items: usize,
    /// Total `content_size` of the kept history items
    pub max_size: u64,
}

impl Default for HistoryRetention {
    fn default() -> Self {
        Self { max_items: DEFAULT_HISTORY_MAX_ITEMS, max_size: DEFAULT_HISTORY_MAX_SIZE }
    }
}

impl HistoryRetention {
    pub fn items(max_items: usize) -> Self {
        Self { max_items, ..Self::default() }
    }
}

/// Outcome of one compaction pass.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub moved: usize,
    pub dropped: usize,
}

/// Log-structured record database. Every `put` appends a version; the last
/// appended version of a key is live and the earlier ones are its history.
///
/// Lock order is index, then segment, then bloom filter. Offsets in the index
/// always point into the segment they were read or written under.
pub struct VaultDb {
    active_segment: Mutex<Segment>,
    index: RwLock<HashMap<u128, Vec<u64>>>,
    bloom_filter: RwLock<BloomFilter>,
    templates: TemplateCatalog,
}

impl fmt::Debug for VaultDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultDb")
        .field("records", &self.record_count())
        .field("templates", &self.templates.len())
        .finish()
    }
}

impl VaultDb {
    /// Opens (or creates) the log at `storage_path` and rebuilds the index from it.
    /// Templates live beside the log in `<log>.templates.json`.
    pub fn open(storage_path: &Path, strict_durability: bool) -> Result<Self, StoreError> {
        let segment = Segment::new(storage_path, strict_durability)?;
        let templates = TemplateCatalog::open(&catalog_path(storage_path))?;

        let mut index: HashMap<u128, Vec<u64>> = HashMap::new();
        let frames = segment.scan()?;
        for (offset, version) in &frames {
            if version.deleted {
                index.remove(&version.key);
                continue;
            }
            index.entry(version.key).or_default().push(*offset);
        }
        let bloom_filter = bloom_for(index.keys());
        info!(path = %storage_path.display(), frames = frames.len(), records = index.len(), "opened vault");

        Ok(Self {
            active_segment: Mutex::new(segment),
            index: RwLock::new(index),
            bloom_filter: RwLock::new(bloom_filter),
            templates,
        })
    }

    /// Appends `version` as the new live version of its record.
    pub fn put(&self, version: &RecordVersion) -> Result<u64, StoreError> {
        let stored = version.to_stored();

        let mut idx = self.index.write().map_err(|_| StoreError::Poisoned)?;
        let mut segment = self.active_segment.lock().map_err(|_| StoreError::Poisoned)?;
        let offset = segment.append(&stored)?;
        idx.entry(stored.key).or_default().push(offset);

        let mut bf = self.bloom_filter.write().map_err(|_| StoreError::Poisoned)?;
        bf.insert(version.id);

        debug!(record = %version.id, offset, "appended version");
        Ok(offset)
    }

    /// Removes the record and all of its history. Returns whether it existed.
    pub fn delete(&self, id: RecordId) -> Result<bool, StoreError> {
        let mut idx = self.index.write().map_err(|_| StoreError::Poisoned)?;
        if !idx.contains_key(&id.as_u128()) {
            return Ok(false);
        }

        let tombstone = StoredVersion {
            key: id.as_u128(),
            template: None,
            fields: Vec::new(),
            modified: model::now(),
            accessed: 0,
            deleted: true,
        };
        let mut segment = self.active_segment.lock().map_err(|_| StoreError::Poisoned)?;
        segment.append(&tombstone)?;
        idx.remove(&id.as_u128());

        debug!(record = %id, "deleted record");
        Ok(true)
    }

    pub fn register_template(&self, template: Template) -> Result<(), StoreError> {
        let (id, title) = (template.id, template.title.clone());
        self.templates.register(template)?;
        info!(template = %id, %title, "registered template");
        Ok(())
    }

    /// Every stored version of `id` in append order, live version last.
    pub fn versions(&self, id: RecordId) -> Result<Vec<RecordVersion>, StoreError> {
        {
            let bf = self.bloom_filter.read().map_err(|_| StoreError::Poisoned)?;
            if !bf.might_contain(id) {
                return Ok(Vec::new());
            }
        }

        let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
        let Some(offsets) = idx.get(&id.as_u128()) else {
            return Ok(Vec::new());
        };

        let segment = self.active_segment.lock().map_err(|_| StoreError::Poisoned)?;
        offsets
            .iter()
            .map(|&offset| segment.read(offset).map(RecordVersion::from))
            .collect()
    }

    /// Live versions matching `query`, summarized, ordered by title.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<DecodedView>, StoreError> {
        let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
        let segment = self.active_segment.lock().map_err(|_| StoreError::Poisoned)?;

        let mut hits = Vec::new();
        for offsets in idx.values() {
            let Some(&live) = offsets.last() else { continue };
            let version = RecordVersion::from(segment.read(live)?);
            if query.matches(&version) {
                hits.push(DecodedView::summarize(&version));
            }
        }
        drop(segment);
        drop(idx);

        hits.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        debug!(term = %query.term, hits = hits.len(), "searched vault");
        Ok(hits)
    }

    pub fn record_count(&self) -> usize {
        self.index.read().map(|idx| idx.len()).unwrap_or(0)
    }

    /// Rewrites the log keeping, per record, the live version plus the newest
    /// historical versions that fit `retention`. Tombstones are dropped.
    pub fn compact(&self, retention: HistoryRetention) -> Result<CompactionStats, StoreError> {
        info!(max_items = retention.max_items, max_size = retention.max_size, "starting compaction");

        // Stop-the-world: writers and readers wait for the swap
        let mut index_lock = self.index.write().map_err(|_| StoreError::Poisoned)?;
        let mut segment_lock = self.active_segment.lock().map_err(|_| StoreError::Poisoned)?;
        let mut bloom_lock = self.bloom_filter.write().map_err(|_| StoreError::Poisoned)?;
        let strict = segment_lock.is_strict();

        let old_path = segment_lock.file_path.clone();
        let new_path = old_path.with_extension("compacted");
        if new_path.exists() {
            fs::remove_file(&new_path)?;
        }
        let mut new_segment = Segment::new(&new_path, false)?;

        let mut new_index: HashMap<u128, Vec<u64>> = HashMap::new();
        let mut stats = CompactionStats::default();

        for (key, offsets) in index_lock.iter() {
            let Some((&live, history)) = offsets.split_last() else { continue };

            // Newest first, until either budget runs out
            let mut kept_history = Vec::new();
            let mut size = 0u64;
            for &offset in history.iter().rev().take(retention.max_items) {
                let version = segment_lock.read(offset)?;
                size = size.saturating_add(version.content_size());
                if size > retention.max_size {
                    break;
                }
                kept_history.push(version);
            }
            stats.dropped += history.len() - kept_history.len();

            let mut kept = Vec::with_capacity(kept_history.len() + 1);
            for version in kept_history.iter().rev() {
                kept.push(new_segment.append(version)?);
            }
            kept.push(new_segment.append(&segment_lock.read(live)?)?);
            stats.moved += kept.len();
            new_index.insert(*key, kept);
        }

        new_segment.sync()?;
        drop(new_segment);
        fs::rename(&new_path, &old_path)?;
        *segment_lock = Segment::new(&old_path, strict)?;
        *bloom_lock = bloom_for(new_index.keys());
        *index_lock = new_index;

        info!(moved = stats.moved, dropped = stats.dropped, "compaction complete");
        Ok(stats)
    }
}

impl RecordStore for VaultDb {
    fn current_version(&self, id: RecordId) -> Result<Option<RecordVersion>, StoreError> {
        let mut versions = self.versions(id)?;
        let Some(live) = versions.pop() else {
            return Ok(None);
        };
        Ok(Some(live.with_history(versions)))
    }
}

impl TemplateResolver for VaultDb {
    fn template_for(&self, version: &RecordVersion) -> Option<Template> {
        self.templates.template_for(version)
    }
}

fn bloom_for<'a>(keys: impl Iterator<Item = &'a u128>) -> BloomFilter {
    let mut bloom_filter = BloomFilter::new(BLOOM_CAPACITY, BLOOM_FP_RATE);
    for key in keys {
        bloom_filter.insert(RecordId::from_u128(*key));
    }
    bloom_filter
}

fn catalog_path(storage_path: &Path) -> PathBuf {
    let mut name = storage_path.as_os_str().to_os_string();
    name.push(".templates.json");
    PathBuf::from(name)
}
