use std::collections::HashMap;
use std::io;
use std::sync::RwLock;

use crate::model::{RecordId, RecordVersion};
use crate::template::{Template, TemplateCatalog, TemplateResolver};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt version archive at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("template catalog is not valid JSON: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("poisoned lock")]
    Poisoned,
}

/// Read access to versioned records. Implementations must be safe for
/// concurrent reads; resolution never writes through this trait.
pub trait RecordStore: Send + Sync {
    /// The live version of `id` with its history attached, oldest first.
    fn current_version(&self, id: RecordId) -> Result<Option<RecordVersion>, StoreError>;
}

/// Everything entry resolution needs from a backing database.
pub trait Vault: RecordStore + TemplateResolver {}

impl<T: RecordStore + TemplateResolver + ?Sized> Vault for T {}

/// In-process store keeping every version of every record in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    versions: RwLock<HashMap<RecordId, Vec<RecordVersion>>>,
    templates: TemplateCatalog,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `version` as the new live version; the previous live version
    /// becomes the newest history entry.
    pub fn put(&self, mut version: RecordVersion) -> Result<(), StoreError> {
        version.history.clear();
        let mut versions = self.versions.write().map_err(|_| StoreError::Poisoned)?;
        versions.entry(version.id).or_default().push(version);
        Ok(())
    }

    pub fn delete(&self, id: RecordId) -> Result<bool, StoreError> {
        let mut versions = self.versions.write().map_err(|_| StoreError::Poisoned)?;
        Ok(versions.remove(&id).is_some())
    }

    pub fn register_template(&self, template: Template) -> Result<(), StoreError> {
        self.templates.register(template)
    }
}

impl RecordStore for MemoryStore {
    fn current_version(&self, id: RecordId) -> Result<Option<RecordVersion>, StoreError> {
        let versions = self.versions.read().map_err(|_| StoreError::Poisoned)?;
        let Some(chain) = versions.get(&id) else {
            return Ok(None);
        };
        let Some((live, history)) = chain.split_last() else {
            return Ok(None);
        };
        Ok(Some(live.clone().with_history(history.to_vec())))
    }
}

impl TemplateResolver for MemoryStore {
    fn template_for(&self, version: &RecordVersion) -> Option<Template> {
        self.templates.template_for(version)
    }
}
