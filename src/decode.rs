//! Template-aware projection of record versions.
//!
//! A version is decoded against a *context* version, normally the live version
//! of the same record. The context decides which template lays out the fields,
//! so an old snapshot is shown with the record's present-day template.

use serde::{Deserialize, Serialize};

use crate::model::{Field, RecordId, RecordVersion};
use crate::template::{Template, TemplateId, TemplateResolver};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrigin {
    /// Declared by the governing template
    Template,
    /// Stored on the version but unknown to the template
    Custom,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedField {
    pub name: String,
    pub value: String,
    pub protected: bool,
    pub visible: bool,
    pub origin: FieldOrigin,
}

impl DecodedField {
    fn custom(field: &Field) -> Self {
        Self {
            name: field.name.clone(),
            value: field.value.clone(),
            protected: field.protected,
            visible: true,
            origin: FieldOrigin::Custom,
        }
    }
}

/// Version-shaped decoder output. Carries the history list of the record it
/// was decoded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub id: RecordId,
    pub template: TemplateId,
    pub fields: Vec<DecodedField>,
    pub modified: u64,
    pub accessed: u64,
    pub history: Vec<RecordVersion>,
    dirty: bool,
}

impl DecodedRecord {
    /// Refreshes the access time. `modified` also bumps the modification time
    /// and flags the record dirty; `touch_parents` returns the record whose
    /// ancestry should be touched in turn. With both flags off nothing but
    /// `accessed` changes.
    pub fn touch(&mut self, at: u64, modified: bool, touch_parents: bool) -> Option<RecordId> {
        self.accessed = at;
        if modified {
            self.modified = at;
            self.dirty = true;
        }
        touch_parents.then_some(self.id)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn view(&self) -> DecodedView {
        DecodedView {
            id: self.id,
            title: title_of(self.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))),
            template: self.template,
            fields: self.fields.clone(),
            modified: self.modified,
            accessed: self.accessed,
        }
    }
}

/// Display-ready projection of one version.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedView {
    pub id: RecordId,
    pub title: String,
    pub template: TemplateId,
    pub fields: Vec<DecodedField>,
    pub modified: u64,
    pub accessed: u64,
}

impl DecodedView {
    /// Projects a version from its own content only: stored fields in stored
    /// order, all visible, under the version's own template pointer.
    pub fn summarize(version: &RecordVersion) -> Self {
        Self {
            id: version.id,
            title: title_of(version.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))),
            template: version.template.unwrap_or(TemplateId::STANDARD),
            fields: version.fields.iter().map(DecodedField::custom).collect(),
            modified: version.modified,
            accessed: version.accessed,
        }
    }

    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn visible_fields(&self) -> impl Iterator<Item = &DecodedField> {
        self.fields.iter().filter(|f| f.visible)
    }
}

fn title_of<'a>(mut fields: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    fields
        .find(|(name, _)| *name == "title")
        .map(|(_, value)| value.to_string())
        .unwrap_or_default()
}

/// Decodes versions using templates from `R`.
pub struct TemplateDecoder<'a, R: TemplateResolver + ?Sized> {
    templates: &'a R,
}

impl<'a, R: TemplateResolver + ?Sized> TemplateDecoder<'a, R> {
    pub fn new(templates: &'a R) -> Self {
        Self { templates }
    }

    /// Decodes `target` under the template of `context`.
    pub fn decode(&self, target: &RecordVersion, context: &RecordVersion) -> DecodedRecord {
        let template = self.templates.template_or_standard(context);
        decode_with(&template, target, context)
    }
}

/// Pure layout step: `template` governs, `target` supplies values, `context`
/// supplies the history list.
pub fn decode_with(template: &Template, target: &RecordVersion, context: &RecordVersion) -> DecodedRecord {
    let mut fields = Vec::with_capacity(template.fields.len() + target.fields.len());

    for slot in &template.fields {
        let stored = target.field(&slot.name);
        fields.push(DecodedField {
            name: slot.name.clone(),
            value: stored.map(|f| f.value.clone()).unwrap_or_default(),
            protected: slot.protected || stored.is_some_and(|f| f.protected),
            visible: !slot.hidden,
            origin: FieldOrigin::Template,
        });
    }

    fields.extend(
        target
            .fields
            .iter()
            .filter(|f| template.field(&f.name).is_none())
            .map(DecodedField::custom),
    );

    DecodedRecord {
        id: target.id,
        template: template.id,
        fields,
        modified: target.modified,
        accessed: target.accessed,
        history: context.history.clone(),
        dirty: false,
    }
}
