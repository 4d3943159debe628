use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::RecordVersion;
use crate::store::StoreError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TemplateId(pub Uuid);

impl TemplateId {
    /// Identity of the built-in standard template.
    pub const STANDARD: TemplateId = TemplateId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(key: u128) -> Self {
        Self(Uuid::from_u128(key))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TemplateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateField {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
    /// Present in the layout but never displayed
    #[serde(default)]
    pub hidden: bool,
}

impl TemplateField {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), protected: false, hidden: false }
    }

    pub fn protected(name: impl Into<String>) -> Self {
        Self { name: name.into(), protected: true, hidden: false }
    }

    pub fn hidden(name: impl Into<String>) -> Self {
        Self { name: name.into(), protected: false, hidden: true }
    }
}

/// Field layout governing how a record version is displayed and edited.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: TemplateId,
    pub title: String,
    pub fields: Vec<TemplateField>,
}

impl Template {
    pub fn new(title: impl Into<String>, fields: Vec<TemplateField>) -> Self {
        Self { id: TemplateId::new(), title: title.into(), fields }
    }

    /// Layout used whenever a version has no (known) template configured.
    pub fn standard() -> Self {
        Self {
            id: TemplateId::STANDARD,
            title: "Standard".to_string(),
            fields: vec![
                TemplateField::new("title"),
                TemplateField::new("username"),
                TemplateField::protected("password"),
                TemplateField::new("url"),
                TemplateField::new("notes"),
            ],
        }
    }

    pub fn is_standard(&self) -> bool {
        self.id == TemplateId::STANDARD
    }

    pub fn field(&self, name: &str) -> Option<&TemplateField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Looks up the template governing a record version.
pub trait TemplateResolver: Send + Sync {
    /// `None` when the version has no template pointer or the pointer is unknown.
    fn template_for(&self, version: &RecordVersion) -> Option<Template>;

    /// Same lookup with the standard fallback applied.
    fn template_or_standard(&self, version: &RecordVersion) -> Template {
        self.template_for(version).unwrap_or_else(Template::standard)
    }
}

/// Registered templates, optionally persisted as a JSON sidecar file.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    path: Option<PathBuf>,
    templates: RwLock<HashMap<TemplateId, Template>>,
}

impl TemplateCatalog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the catalog at `path`, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let templates = if path.exists() {
            let raw = fs::read(path)?;
            let list: Vec<Template> = serde_json::from_slice(&raw)?;
            list.into_iter().map(|t| (t.id, t)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self { path: Some(path.to_path_buf()), templates: RwLock::new(templates) })
    }

    /// Persists the catalog including `template`, then makes it resolvable.
    /// On error the catalog is left as it was, in memory and on disk.
    pub fn register(&self, template: Template) -> Result<(), StoreError> {
        let mut templates = self.templates.write().map_err(|_| StoreError::Poisoned)?;

        if let Some(path) = &self.path {
            let mut list: Vec<&Template> = templates.values().filter(|t| t.id != template.id).collect();
            list.push(&template);
            list.sort_by_key(|t| t.id);
            let body = serde_json::to_vec_pretty(&list)?;

            let mut staging = path.as_os_str().to_os_string();
            staging.push(".tmp");
            let staging = PathBuf::from(staging);
            fs::write(&staging, body)?;
            fs::rename(&staging, path)?;
        }

        templates.insert(template.id, template);
        Ok(())
    }

    pub fn get(&self, id: TemplateId) -> Option<Template> {
        if id == TemplateId::STANDARD {
            return Some(Template::standard());
        }
        self.templates.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.templates.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TemplateResolver for TemplateCatalog {
    fn template_for(&self, version: &RecordVersion) -> Option<Template> {
        self.get(version.template?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, RecordId};

    #[test]
    fn unknown_or_missing_pointer_falls_back_to_standard() {
        let catalog = TemplateCatalog::in_memory();
        let bare = RecordVersion::new(RecordId::new(), None, vec![]);
        let dangling = RecordVersion::new(RecordId::new(), Some(TemplateId::new()), vec![]);

        assert!(catalog.template_for(&bare).is_none());
        assert!(catalog.template_or_standard(&bare).is_standard());
        assert!(catalog.template_or_standard(&dangling).is_standard());
    }

    #[test]
    fn catalog_persists_registered_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");

        let card = Template::new("Card", vec![TemplateField::new("number"), TemplateField::protected("cvv")]);
        {
            let catalog = TemplateCatalog::open(&path).unwrap();
            catalog.register(card.clone()).unwrap();
        }

        let reopened = TemplateCatalog::open(&path).unwrap();
        let version = RecordVersion::new(RecordId::new(), Some(card.id), vec![Field::new("number", "4111")]);
        assert_eq!(reopened.template_for(&version), Some(card));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn failed_write_leaves_template_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::open(&dir.path().join("missing").join("templates.json")).unwrap();
        let card = Template::new("Card", vec![TemplateField::new("number")]);

        assert!(catalog.register(card.clone()).is_err());
        assert!(catalog.get(card.id).is_none());
        assert!(catalog.is_empty());
    }

    #[test]
    fn re_registering_replaces_the_stored_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        let catalog = TemplateCatalog::open(&path).unwrap();

        let mut card = Template::new("Card", vec![TemplateField::new("number")]);
        catalog.register(card.clone()).unwrap();
        card.fields.push(TemplateField::protected("cvv"));
        catalog.register(card.clone()).unwrap();

        let reopened = TemplateCatalog::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(card.id), Some(card));
    }
}
