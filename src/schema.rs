//! Table and column identifiers of the tracker storage schema.

use sea_query::{Expr, Iden};

use crate::ast::ComparisonId;
use crate::catalogue::TrackerId;

/// Bind value id standing for "no value" in list fields.
pub const NONE_BIND_VALUE_ID: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Artifact,
    Changeset,
    ChangesetValue,
    ChangesetValueText,
    ChangesetValueInt,
    ChangesetValueFloat,
    ChangesetValueDate,
    ChangesetValueList,
    ChangesetValueComputed,
    ChangesetComment,
    BindStaticValue,
    User,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Artifact => "tracker_artifact",
            Table::Changeset => "tracker_changeset",
            Table::ChangesetValue => "tracker_changeset_value",
            Table::ChangesetValueText => "tracker_changeset_value_text",
            Table::ChangesetValueInt => "tracker_changeset_value_int",
            Table::ChangesetValueFloat => "tracker_changeset_value_float",
            Table::ChangesetValueDate => "tracker_changeset_value_date",
            Table::ChangesetValueList => "tracker_changeset_value_list",
            Table::ChangesetValueComputed => "tracker_changeset_value_computedfield_manual_value",
            Table::ChangesetComment => "tracker_changeset_comment",
            Table::BindStaticValue => "tracker_field_list_bind_static_value",
            Table::User => "user",
        }
    }
}

impl Iden for Table {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.name()).unwrap();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    TrackerId,
    LastChangesetId,
    SubmittedBy,
    SubmittedOn,
    ArtifactId,
    ChangesetId,
    ChangesetValueId,
    FieldId,
    Value,
    BindvalueId,
    Label,
    UserId,
    UserName,
    Body,
}

impl Iden for Column {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let name = match self {
            Column::Id => "id",
            Column::TrackerId => "tracker_id",
            Column::LastChangesetId => "last_changeset_id",
            Column::SubmittedBy => "submitted_by",
            Column::SubmittedOn => "submitted_on",
            Column::ArtifactId => "artifact_id",
            Column::ChangesetId => "changeset_id",
            Column::ChangesetValueId => "changeset_value_id",
            Column::FieldId => "field_id",
            Column::Value => "value",
            Column::BindvalueId => "bindvalue_id",
            Column::Label => "label",
            Column::UserId => "user_id",
            Column::UserName => "user_name",
            Column::Body => "body",
        };
        write!(s, "{}", name).unwrap();
    }
}

/// Alias a table is referenced by in the generated statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableAlias(String);

impl TableAlias {
    /// `tracker_artifact AS a`
    pub fn artifact() -> Self {
        TableAlias("a".to_string())
    }

    /// `tracker_changeset AS c`, the last changeset of each artifact
    pub fn changeset() -> Self {
        TableAlias("c".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `alias.column`
    pub fn col(&self, column: Column) -> Expr {
        Expr::col((self.clone(), column))
    }
}

impl Iden for TableAlias {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Namespace for the aliases of one comparison against one tracker, so two
/// comparisons, or one comparison over several trackers, never share a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasScope {
    comparison: ComparisonId,
    tracker: Option<TrackerId>,
}

impl AliasScope {
    pub fn new(comparison: ComparisonId, tracker: Option<TrackerId>) -> Self {
        Self { comparison, tracker }
    }

    /// `<role>_<comparison>[_<tracker>]`
    pub fn alias(&self, role: &str) -> TableAlias {
        match self.tracker {
            Some(tracker) => TableAlias(format!("{role}_{}_{tracker}", self.comparison)),
            None => TableAlias(format!("{role}_{}", self.comparison)),
        }
    }
}
