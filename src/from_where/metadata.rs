use super::date::date_predicate;
use super::list::UserRefs;
use super::numeric::numeric_predicate;
use super::{BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator};
use crate::error::QueryError;
use crate::schema::{Column, TableAlias};
use crate::validator::{ArtifactColumn, Backend};

/// `@id`, `@submitted_by`, `@submitted_on`, `@last_update_by` and
/// `@last_update_date`. These live on the base tables, so no join is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactMetadataFromWhereBuilder;

impl FromWhereBuilder for ArtifactMetadataFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let Backend::ArtifactColumn(column) = backend else {
            return Err(QueryError::unsupported_comparison(comparison));
        };
        let artifact = TableAlias::artifact();
        let last_changeset = TableAlias::changeset();

        let predicate = match column {
            ArtifactColumn::Id => numeric_predicate(artifact.col(Column::Id), comparison)?,
            ArtifactColumn::SubmittedOn => {
                date_predicate(artifact.col(Column::SubmittedOn), comparison, context.parameters, true)?
            }
            ArtifactColumn::LastUpdateDate => date_predicate(
                last_changeset.col(Column::SubmittedOn),
                comparison,
                context.parameters,
                true,
            )?,
            ArtifactColumn::SubmittedBy => user_predicate(artifact, comparison, context)?,
            ArtifactColumn::LastUpdateBy => user_predicate(last_changeset, comparison, context)?,
        };
        Ok(FromWhere::condition(predicate.into_condition()))
    }
}

fn user_predicate(table: TableAlias, comparison: &Comparison, context: &BuildContext<'_>) -> Result<Predicate, QueryError> {
    let expect = match comparison.operator() {
        Operator::Equal | Operator::In => Expect::Match,
        Operator::NotEqual | Operator::NotIn => Expect::NoMatch,
        _ => return Err(QueryError::unsupported_comparison(comparison)),
    };
    if comparison.value().is_empty_string() {
        return Err(QueryError::semantic(comparison, "a user is required"));
    }
    let users = UserRefs::resolve(comparison.value(), context.parameters)?;
    Ok(Predicate::new(
        users.predicate(table.col(Column::SubmittedBy), &context.aliases),
        expect,
    ))
}
