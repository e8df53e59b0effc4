//! Field and semantic metadata of the trackers a query runs against.
//!
//! A [`TrackerCatalogue`] is a read-only snapshot rebuilt per request by the
//! host application; compilations share it through `Arc`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, QueryError};

pub type TrackerId = i64;
pub type FieldId = i64;

/// Storage shape of a tracker field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Text,
    Int,
    Float,
    /// Numeric field whose searchable value is the manually entered one.
    Computed,
    Date,
    Datetime,
    /// Selectbox/checkbox/radio bound to a static list of values.
    ListStatic,
    /// Selectbox bound to project members.
    ListUsers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSemantic {
    pub field_id: FieldId,
    /// Bind value ids considered "open".
    #[serde(default)]
    pub open_values: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Semantics {
    pub title: Option<FieldId>,
    pub description: Option<FieldId>,
    pub status: Option<StatusSemantic>,
    /// The "assigned to" field.
    pub contributor: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerCatalogue {
    pub id: TrackerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub semantics: Semantics,
}

impl TrackerCatalogue {
    pub fn new(id: TrackerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
            semantics: Semantics::default(),
        }
    }

    pub fn with_field(mut self, id: FieldId, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            id,
            name: name.to_string(),
            label: None,
            kind,
        });
        self
    }

    pub fn with_labelled_field(mut self, id: FieldId, name: &str, label: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor {
            id,
            name: name.to_string(),
            label: Some(label.to_string()),
            kind,
        });
        self
    }

    pub fn with_semantics(mut self, semantics: Semantics) -> Self {
        self.semantics = semantics;
        self
    }

    /// Looks a field up by its short name, falling back to a case-insensitive
    /// match on its label (Unicode lowercase, so `Priorité` matches `PRIORITÉ`).
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name).or_else(|| {
            let wanted = name.to_lowercase();
            self.fields.iter().find(|field| {
                field
                    .label
                    .as_deref()
                    .is_some_and(|label| label.to_lowercase() == wanted)
            })
        })
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Rejects semantics pointing at missing fields or fields of the wrong shape.
    pub fn check(&self) -> Result<(), ConfigError> {
        let expect = |role: &str, id: FieldId, allowed: &[FieldKind]| match self.field(id) {
            Some(field) if allowed.contains(&field.kind) => Ok(()),
            Some(field) => Err(ConfigError::Invalid(format!(
                "tracker #{}: {role} semantic uses field '{}' of type {:?}",
                self.id, field.name, field.kind
            ))),
            None => Err(ConfigError::Invalid(format!(
                "tracker #{}: {role} semantic uses unknown field #{id}",
                self.id
            ))),
        };

        const TEXT: &[FieldKind] = &[FieldKind::String, FieldKind::Text];
        if let Some(id) = self.semantics.title {
            expect("title", id, TEXT)?;
        }
        if let Some(id) = self.semantics.description {
            expect("description", id, TEXT)?;
        }
        if let Some(status) = &self.semantics.status {
            expect("status", status.field_id, &[FieldKind::ListStatic])?;
        }
        if let Some(id) = self.semantics.contributor {
            expect("contributor", id, &[FieldKind::ListUsers])?;
        }
        Ok(())
    }
}

/// Source of tracker snapshots, implemented by the host application.
pub trait CatalogueProvider {
    fn tracker(&self, id: TrackerId) -> Option<Arc<TrackerCatalogue>>;

    /// Resolves the trackers targeted by one search, in request order and
    /// without duplicates.
    fn resolve_scope(&self, ids: &[TrackerId]) -> Result<Vec<Arc<TrackerCatalogue>>, QueryError> {
        if ids.is_empty() {
            return Err(QueryError::EmptyScope);
        }
        let mut scope: Vec<Arc<TrackerCatalogue>> = Vec::with_capacity(ids.len());
        for &id in ids {
            if scope.iter().any(|tracker| tracker.id == id) {
                continue;
            }
            scope.push(self.tracker(id).ok_or(QueryError::TrackerNotFound(id))?);
        }
        Ok(scope)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    trackers: Vec<TrackerCatalogue>,
}

/// In-memory catalogue, typically loaded from a JSON export.
#[derive(Debug, Clone, Default)]
pub struct CatalogueSet {
    trackers: BTreeMap<TrackerId, Arc<TrackerCatalogue>>,
}

impl CatalogueSet {
    pub fn new(trackers: impl IntoIterator<Item = TrackerCatalogue>) -> Result<Self, ConfigError> {
        let mut set = BTreeMap::new();
        for tracker in trackers {
            tracker.check()?;
            let id = tracker.id;
            if set.insert(id, Arc::new(tracker)).is_some() {
                return Err(ConfigError::Invalid(format!("tracker #{id} is defined twice")));
            }
        }
        Ok(Self { trackers: set })
    }

    /// JSON shape: `{ "trackers": [ { "id": 1, "fields": [...], "semantics": {...} } ] }`
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: CatalogueFile = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: "catalogue".to_string(),
            source,
        })?;
        Self::new(file.trackers)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.to_path_buf()));
        }
        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn tracker_ids(&self) -> Vec<TrackerId> {
        self.trackers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl CatalogueProvider for CatalogueSet {
    fn tracker(&self, id: TrackerId) -> Option<Arc<TrackerCatalogue>> {
        self.trackers.get(&id).cloned()
    }
}
