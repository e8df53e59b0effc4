use sea_query::Query;

use super::text::{text_predicate, text_value};
use super::{BuildContext, Expect, FromWhere, FromWhereBuilder, Join};
use crate::ast::Comparison;
use crate::error::QueryError;
use crate::schema::{Column, Table, TableAlias};
use crate::validator::Backend;

/// `@comments`, searched across every changeset of the artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentsFromWhereBuilder;

impl FromWhereBuilder for CommentsFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        if *backend != Backend::Comments {
            return Err(QueryError::unsupported_comparison(comparison));
        }
        let text = text_value(comparison.value(), "@comments")?;

        let comment = context.aliases.alias("TCC");
        let changeset = context.aliases.alias("TCS");
        let artifact_changesets = Query::select()
            .expr(changeset.col(Column::Id))
            .from_as(Table::Changeset, changeset.clone())
            .and_where(changeset.col(Column::ArtifactId).equals((TableAlias::artifact(), Column::Id)))
            .to_owned();

        let predicate = text_predicate(comment.col(Column::Body), comparison, &text)?;
        let on = comment
            .col(Column::ChangesetId)
            .in_subquery(artifact_changesets)
            .and(predicate.expr);

        let found = comment.col(Column::ChangesetId);
        let condition = match predicate.expect {
            Expect::Match => found.is_not_null(),
            Expect::NoMatch => found.is_null(),
        };
        Ok(FromWhere::new(vec![Join::new(Table::ChangesetComment, comment, on)], condition))
    }
}
