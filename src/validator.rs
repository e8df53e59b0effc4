//! Semantic validation of a parsed expression against the search scope.
//!
//! Every comparison is resolved once per tracker: the searchable becomes a
//! [`SearchTarget`] telling the builders where its values live, and the
//! operator and values are checked against the [`SearchKind`] of the targets.
//! The first problem met aborts validation.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::ast::{Comparison, Expression, Literal, Operator, OrExpression, Searchable, ValueWrapper};
use crate::catalogue::{FieldId, FieldKind, StatusSemantic, TrackerCatalogue, TrackerId};
use crate::error::QueryError;
use crate::value::{integer_value, numeric_bind_value, parse_date_literal};

/// What a searchable is compared as. Keys the builder registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    Text,
    Numeric,
    Date,
    ListStatic,
    ListUsers,
    Status,
    Comments,
    ArtifactUser,
    ArtifactDate,
    ArtifactId,
}

impl SearchKind {
    pub const ALL: [SearchKind; 10] = [
        SearchKind::Text,
        SearchKind::Numeric,
        SearchKind::Date,
        SearchKind::ListStatic,
        SearchKind::ListUsers,
        SearchKind::Status,
        SearchKind::Comments,
        SearchKind::ArtifactUser,
        SearchKind::ArtifactDate,
        SearchKind::ArtifactId,
    ];

    pub fn operators(self) -> &'static [Operator] {
        use Operator::*;
        match self {
            SearchKind::Text | SearchKind::Comments | SearchKind::Status => &[Equal, NotEqual],
            SearchKind::Numeric | SearchKind::Date | SearchKind::ArtifactDate | SearchKind::ArtifactId => &[
                Equal,
                NotEqual,
                LesserThan,
                LesserThanOrEqual,
                GreaterThan,
                GreaterThanOrEqual,
                Between,
            ],
            SearchKind::ListStatic | SearchKind::ListUsers | SearchKind::ArtifactUser => {
                &[Equal, NotEqual, In, NotIn]
            }
        }
    }

    fn accepts_empty_value(self) -> bool {
        !matches!(
            self,
            SearchKind::Status | SearchKind::ArtifactUser | SearchKind::ArtifactDate | SearchKind::ArtifactId
        )
    }

    fn description(self) -> &'static str {
        match self {
            SearchKind::Text => "a text field",
            SearchKind::Numeric => "a numeric field",
            SearchKind::Date => "a date field",
            SearchKind::ListStatic => "a list field",
            SearchKind::ListUsers => "a user list field",
            SearchKind::Status => "@status",
            SearchKind::Comments => "@comments",
            SearchKind::ArtifactUser => "a user metadata",
            SearchKind::ArtifactDate => "a date metadata",
            SearchKind::ArtifactId => "@id",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Columns of `tracker_artifact` (or of its last changeset) searched directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactColumn {
    Id,
    SubmittedBy,
    SubmittedOn,
    LastUpdateBy,
    LastUpdateDate,
}

/// Where the values of a searchable are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Field { field_id: FieldId, kind: FieldKind },
    /// `None` when the tracker has no status semantic.
    Status(Option<StatusSemantic>),
    Comments,
    ArtifactColumn(ArtifactColumn),
}

/// One backend of a comparison. `tracker` is `None` for backends shared by
/// every tracker of the scope.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTarget {
    pub tracker: Option<TrackerId>,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComparison {
    pub comparison: Comparison,
    pub kind: SearchKind,
    pub targets: Vec<SearchTarget>,
}

impl fmt::Display for ResolvedComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.comparison)
    }
}

/// Expression whose comparisons all passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedExpression {
    pub expression: OrExpression<ResolvedComparison>,
    pub tracker_ids: Vec<TrackerId>,
}

#[instrument(level = "debug", skip_all, fields(trackers = scope.len()))]
pub fn validate(expression: &Expression, scope: &[Arc<TrackerCatalogue>]) -> Result<ValidatedExpression, QueryError> {
    if scope.is_empty() {
        return Err(QueryError::EmptyScope);
    }
    let expression = expression.try_map(&mut |comparison| resolve_comparison(comparison, scope))?;
    debug!(comparisons = expression.comparisons().len(), "expression validated");
    Ok(ValidatedExpression {
        expression,
        tracker_ids: scope.iter().map(|tracker| tracker.id).collect(),
    })
}

fn resolve_comparison(comparison: &Comparison, scope: &[Arc<TrackerCatalogue>]) -> Result<ResolvedComparison, QueryError> {
    let resolutions = resolve_searchable(comparison.searchable(), scope);
    let Some((kind, _)) = resolutions.first() else {
        return Err(QueryError::UnknownField {
            name: comparison.searchable().to_string(),
        });
    };
    let kind = *kind;
    if resolutions.iter().any(|(other, _)| *other != kind) {
        return Err(QueryError::semantic(
            comparison,
            format!("'{}' does not have the same type in all trackers", comparison.searchable()),
        ));
    }

    if !kind.operators().contains(&comparison.operator()) {
        return Err(QueryError::semantic(
            comparison,
            format!("{} cannot be used with {kind}", comparison.operator()),
        ));
    }
    check_values(comparison, kind)?;

    debug!(comparison = %comparison, ?kind, targets = resolutions.len(), "comparison resolved");
    Ok(ResolvedComparison {
        comparison: comparison.clone(),
        kind,
        targets: resolutions.into_iter().map(|(_, target)| target).collect(),
    })
}

fn field_kind(kind: FieldKind) -> SearchKind {
    match kind {
        FieldKind::String | FieldKind::Text => SearchKind::Text,
        FieldKind::Int | FieldKind::Float | FieldKind::Computed => SearchKind::Numeric,
        FieldKind::Date | FieldKind::Datetime => SearchKind::Date,
        FieldKind::ListStatic => SearchKind::ListStatic,
        FieldKind::ListUsers => SearchKind::ListUsers,
    }
}

fn field_target(tracker: &TrackerCatalogue, field_id: Option<FieldId>) -> Option<(SearchKind, SearchTarget)> {
    let field = tracker.field(field_id?)?;
    Some((
        field_kind(field.kind),
        SearchTarget {
            tracker: Some(tracker.id),
            backend: Backend::Field {
                field_id: field.id,
                kind: field.kind,
            },
        },
    ))
}

fn shared_target(kind: SearchKind, backend: Backend) -> Vec<(SearchKind, SearchTarget)> {
    vec![(kind, SearchTarget { tracker: None, backend })]
}

/// Empty when the name means nothing in the scope.
fn resolve_searchable(searchable: &Searchable, scope: &[Arc<TrackerCatalogue>]) -> Vec<(SearchKind, SearchTarget)> {
    match searchable {
        Searchable::Field(name) => scope
            .iter()
            .filter_map(|tracker| {
                let field = tracker.field_by_name(name)?;
                field_target(tracker, Some(field.id))
            })
            .collect(),
        Searchable::Metadata(name) => match name.as_str() {
            "title" => scope
                .iter()
                .filter_map(|tracker| field_target(tracker, tracker.semantics.title))
                .collect(),
            "description" => scope
                .iter()
                .filter_map(|tracker| field_target(tracker, tracker.semantics.description))
                .collect(),
            "assigned_to" => scope
                .iter()
                .filter_map(|tracker| field_target(tracker, tracker.semantics.contributor))
                .collect(),
            "status" => scope
                .iter()
                .map(|tracker| {
                    (
                        SearchKind::Status,
                        SearchTarget {
                            tracker: Some(tracker.id),
                            backend: Backend::Status(tracker.semantics.status.clone()),
                        },
                    )
                })
                .collect(),
            "submitted_by" => shared_target(SearchKind::ArtifactUser, Backend::ArtifactColumn(ArtifactColumn::SubmittedBy)),
            "last_update_by" => shared_target(SearchKind::ArtifactUser, Backend::ArtifactColumn(ArtifactColumn::LastUpdateBy)),
            "submitted_on" => shared_target(SearchKind::ArtifactDate, Backend::ArtifactColumn(ArtifactColumn::SubmittedOn)),
            "last_update_date" => shared_target(SearchKind::ArtifactDate, Backend::ArtifactColumn(ArtifactColumn::LastUpdateDate)),
            "id" => shared_target(SearchKind::ArtifactId, Backend::ArtifactColumn(ArtifactColumn::Id)),
            "comments" | "comment" => shared_target(SearchKind::Comments, Backend::Comments),
            _ => Vec::new(),
        },
    }
}

fn check_values(comparison: &Comparison, kind: SearchKind) -> Result<(), QueryError> {
    let allow_empty = kind.accepts_empty_value() && matches!(comparison.operator(), Operator::Equal | Operator::NotEqual);
    match comparison.value() {
        ValueWrapper::In(members) => members
            .iter()
            .try_for_each(|member| check_value(comparison, kind, member, false)),
        ValueWrapper::Between(min, max) => {
            check_value(comparison, kind, min, false)?;
            check_value(comparison, kind, max, false)
        }
        value => check_value(comparison, kind, value, allow_empty),
    }
}

fn check_value(comparison: &Comparison, kind: SearchKind, value: &ValueWrapper, allow_empty: bool) -> Result<(), QueryError> {
    let reject = |reason: String| Err(QueryError::semantic(comparison, reason));

    match value {
        ValueWrapper::StatusOpen if kind == SearchKind::Status => Ok(()),
        ValueWrapper::StatusOpen => reject("OPEN() can only be compared to @status".to_string()),
        _ if kind == SearchKind::Status => reject("@status can only be compared to OPEN()".to_string()),
        ValueWrapper::CurrentUser => match kind {
            SearchKind::ListUsers | SearchKind::ArtifactUser => Ok(()),
            _ => reject(format!("MYSELF() cannot be compared to {kind}")),
        },
        ValueWrapper::CurrentDateTime(_) => match kind {
            SearchKind::Date | SearchKind::ArtifactDate => Ok(()),
            _ => reject(format!("NOW() cannot be compared to {kind}")),
        },
        ValueWrapper::In(_) | ValueWrapper::Between(..) => reject("lists cannot be nested".to_string()),
        ValueWrapper::Simple(Literal::String(text)) if text.is_empty() => {
            if allow_empty {
                Ok(())
            } else {
                reject(format!("an empty value cannot be used with {}", comparison.operator()))
            }
        }
        ValueWrapper::Simple(literal) => match kind {
            SearchKind::Numeric if numeric_bind_value(literal).is_none() => {
                reject(format!("'{}' is not a number", literal.as_text()))
            }
            SearchKind::ArtifactId if integer_value(literal).is_none() => {
                reject(format!("'{}' is not an artifact id", literal.as_text()))
            }
            SearchKind::Date | SearchKind::ArtifactDate => match literal {
                Literal::String(text) if parse_date_literal(text).is_some() => Ok(()),
                _ => reject(format!(
                    "'{}' is not a date, expected YYYY-MM-DD or YYYY-MM-DD HH:MM",
                    literal.as_text()
                )),
            },
            _ => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::Semantics;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn bugs() -> Arc<TrackerCatalogue> {
        Arc::new(
            TrackerCatalogue::new(10, "Bugs")
                .with_field(101, "summary", FieldKind::String)
                .with_labelled_field(102, "effort", "Remaining Effort", FieldKind::Computed)
                .with_field(103, "status", FieldKind::ListStatic)
                .with_field(104, "due", FieldKind::Date)
                .with_field(105, "assignee", FieldKind::ListUsers)
                .with_field(106, "priority", FieldKind::ListStatic)
                .with_semantics(Semantics {
                    title: Some(101),
                    status: Some(StatusSemantic {
                        field_id: 103,
                        open_values: vec![1, 2],
                    }),
                    contributor: Some(105),
                    ..Default::default()
                }),
        )
    }

    fn tasks() -> Arc<TrackerCatalogue> {
        Arc::new(
            TrackerCatalogue::new(20, "Tasks")
                .with_field(201, "priority", FieldKind::ListStatic)
                .with_field(202, "due", FieldKind::Int),
        )
    }

    fn validate_str(query: &str, scope: &[Arc<TrackerCatalogue>]) -> Result<ValidatedExpression, QueryError> {
        validate(&parse(query).unwrap(), scope)
    }

    fn single(query: &str, scope: &[Arc<TrackerCatalogue>]) -> ResolvedComparison {
        let validated = validate_str(query, scope).unwrap();
        validated.expression.comparisons()[0].clone()
    }

    fn semantic_reason(query: &str, scope: &[Arc<TrackerCatalogue>]) -> String {
        match validate_str(query, scope) {
            Err(QueryError::Semantic { reason, .. }) => reason,
            other => panic!("expected a semantic error for `{query}`, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field() {
        assert_eq!(
            validate_str("unknown_field = 1", &[bugs()]).unwrap_err(),
            QueryError::UnknownField {
                name: "unknown_field".to_string()
            }
        );
        assert_eq!(
            validate_str("@nope = 1", &[bugs()]).unwrap_err(),
            QueryError::UnknownField { name: "@nope".to_string() }
        );
    }

    #[test]
    fn test_field_resolution_by_label() {
        let resolved = single(r#""Remaining Effort" BETWEEN(1, 10)"#, &[bugs()]);
        assert_eq!(resolved.kind, SearchKind::Numeric);
        assert_eq!(
            resolved.targets,
            vec![SearchTarget {
                tracker: Some(10),
                backend: Backend::Field {
                    field_id: 102,
                    kind: FieldKind::Computed
                },
            }]
        );
    }

    #[test]
    fn test_semantic_metadata() {
        let title = single(r#"@title = "crash""#, &[bugs(), tasks()]);
        assert_eq!(title.kind, SearchKind::Text);
        assert_eq!(title.targets.len(), 1);

        let status = single("status() = OPEN()", &[bugs(), tasks()]);
        assert_eq!(status.kind, SearchKind::Status);
        assert_eq!(status.targets[1].backend, Backend::Status(None));

        let assigned = single("@assigned_to = MYSELF()", &[bugs()]);
        assert_eq!(assigned.kind, SearchKind::ListUsers);
    }

    #[test]
    fn test_artifact_metadata_is_tracker_independent() {
        let resolved = single("@submitted_by IN('alice', MYSELF())", &[bugs(), tasks()]);
        assert_eq!(resolved.kind, SearchKind::ArtifactUser);
        assert_eq!(
            resolved.targets,
            vec![SearchTarget {
                tracker: None,
                backend: Backend::ArtifactColumn(ArtifactColumn::SubmittedBy)
            }]
        );
        assert_eq!(single("@comment = 'x'", &[bugs()]).kind, SearchKind::Comments);
    }

    #[test]
    fn test_cross_tracker_resolution() {
        let resolved = single(r#"priority = "High""#, &[bugs(), tasks()]);
        let fields: Vec<_> = resolved
            .targets
            .iter()
            .map(|target| (target.tracker, target.backend.clone()))
            .collect();
        assert_eq!(
            fields,
            vec![
                (Some(10), Backend::Field { field_id: 106, kind: FieldKind::ListStatic }),
                (Some(20), Backend::Field { field_id: 201, kind: FieldKind::ListStatic }),
            ]
        );
        // 只存在于一个追踪器中的字段
        assert_eq!(single("summary = 'x'", &[bugs(), tasks()]).targets.len(), 1);
    }

    #[test]
    fn test_type_mismatch_across_trackers() {
        assert!(semantic_reason("due = 3", &[bugs(), tasks()]).contains("same type"));
    }

    #[test]
    fn test_operator_compatibility() {
        assert_eq!(semantic_reason("priority BETWEEN(1, 2)", &[bugs()]), "BETWEEN cannot be used with a list field");
        assert_eq!(semantic_reason("summary > 'a'", &[bugs()]), "> cannot be used with a text field");
        assert_eq!(semantic_reason("effort IN(1, 2)", &[bugs()]), "IN cannot be used with a numeric field");
    }

    #[test]
    fn test_sentinel_compatibility() {
        assert_eq!(semantic_reason("priority = OPEN()", &[bugs()]), "OPEN() can only be compared to @status");
        assert_eq!(semantic_reason("@status = 'Open'", &[bugs()]), "@status can only be compared to OPEN()");
        assert_eq!(semantic_reason("summary = MYSELF()", &[bugs()]), "MYSELF() cannot be compared to a text field");
        assert_eq!(semantic_reason("effort = NOW()", &[bugs()]), "NOW() cannot be compared to a numeric field");
        assert!(validate_str("due < NOW() - 1w", &[bugs()]).is_ok());
    }

    #[test]
    fn test_open_is_rejected_on_other_metadata() {
        for query in [
            "@title = OPEN()",
            "@assigned_to = OPEN()",
            "@submitted_by = OPEN()",
            "@last_update_date = OPEN()",
            "@id != OPEN()",
            "@comments = OPEN()",
        ] {
            assert_eq!(semantic_reason(query, &[bugs()]), "OPEN() can only be compared to @status", "{query}");
        }
        assert!(validate_str("@status != OPEN()", &[bugs(), tasks()]).is_ok());
    }

    #[test]
    fn test_literal_checks() {
        assert_eq!(semantic_reason("effort = 'lots'", &[bugs()]), "'lots' is not a number");
        assert!(semantic_reason("due = '2024-02-30'", &[bugs()]).starts_with("'2024-02-30' is not a date"));
        assert!(semantic_reason("@id = 1.5", &[bugs()]).contains("not an artifact id"));
        assert!(validate_str("effort = '12'", &[bugs()]).is_ok());
        assert!(validate_str("due BETWEEN('2024-01-01', NOW())", &[bugs()]).is_ok());
    }

    #[test]
    fn test_empty_value_rules() {
        assert!(validate_str("summary = ''", &[bugs()]).is_ok());
        assert!(validate_str("priority != ''", &[bugs()]).is_ok());
        assert!(validate_str("@comments = ''", &[bugs()]).is_ok());
        assert!(semantic_reason("effort < ''", &[bugs()]).contains("empty value"));
        assert!(semantic_reason("priority IN('', 'High')", &[bugs()]).contains("empty value"));
        assert!(semantic_reason("@submitted_by = ''", &[bugs()]).contains("empty value"));
    }

    #[test]
    fn test_first_error_wins() {
        let err = validate_str("summary = 'a' AND nope = 1 AND priority = OPEN()", &[bugs()]).unwrap_err();
        assert_eq!(err, QueryError::UnknownField { name: "nope".to_string() });
    }

    #[test]
    fn test_empty_scope() {
        assert_eq!(validate_str("summary = 'a'", &[]).unwrap_err(), QueryError::EmptyScope);
    }

    #[test]
    fn test_tree_shape_is_preserved() {
        let query = "summary = 'a' AND (priority = 'High' OR @status = OPEN())";
        let validated = validate_str(query, &[bugs(), tasks()]).unwrap();
        assert_eq!(validated.expression.to_string(), parse(query).unwrap().to_string());
        assert_eq!(validated.tracker_ids, vec![10, 20]);
    }
}
