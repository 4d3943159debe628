use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::template::TemplateId;

/// Stable identity of a record, shared by all of its versions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
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

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Current wall clock in unix seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A single named value of a record version.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct Field {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub protected: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), protected: false }
    }

    pub fn protected(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), protected: true }
    }
}

/// The unit appended to the segment log. One per version of a record.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct StoredVersion {
    /// Record identity (UUID as u128)
    pub key: u128,

    /// Template pointer recorded when this version was written
    pub template: Option<u128>,

    pub fields: Vec<Field>,

    /// Last modification, unix seconds
    pub modified: u64,

    /// Last access, unix seconds
    pub accessed: u64,

    /// Tombstone: the record was deleted at `modified`
    #[serde(default)]
    pub deleted: bool,
}

/// One version of a record: either the live version, which owns the ordered
/// history, or a historical snapshot whose own history is always empty.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RecordVersion {
    pub id: RecordId,
    pub template: Option<TemplateId>,
    pub fields: Vec<Field>,
    pub modified: u64,
    pub accessed: u64,
    #[serde(default)]
    pub history: Vec<RecordVersion>,
}

impl RecordVersion {
    pub fn new(id: RecordId, template: Option<TemplateId>, fields: Vec<Field>) -> Self {
        let ts = now();
        Self { id, template, fields, modified: ts, accessed: ts, history: Vec::new() }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn with_history(mut self, history: Vec<RecordVersion>) -> Self {
        self.history = history;
        self
    }

    pub fn to_stored(&self) -> StoredVersion {
        StoredVersion {
            key: self.id.as_u128(),
            template: self.template.map(|t| t.as_u128()),
            fields: self.fields.clone(),
            modified: self.modified,
            accessed: self.accessed,
            deleted: false,
        }
    }
}

impl StoredVersion {
    /// Bytes of field content, the measure history retention budgets against.
    pub fn content_size(&self) -> u64 {
        self.fields.iter().map(|f| (f.name.len() + f.value.len()) as u64).sum()
    }
}

impl From<StoredVersion> for RecordVersion {
    fn from(stored: StoredVersion) -> Self {
        Self {
            id: RecordId::from_u128(stored.key),
            template: stored.template.map(TemplateId::from_u128),
            fields: stored.fields,
            modified: stored.modified,
            accessed: stored.accessed,
            history: Vec::new(),
        }
    }
}

/// A one-time password as computed by the OTP engine, forwarded to observers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OtpElement {
    pub token: String,
    pub period_secs: u32,
    pub seconds_remaining: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Upload,
    Download,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Start,
    InProgress,
    Complete,
    Canceled,
    Error,
}

/// Progress report of an attachment transfer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AttachmentState {
    pub attachment: Attachment,
    pub direction: StreamDirection,
    pub state: TransferState,
    /// Percent, 0..=100
    pub progress: u8,
}
