use super::{changeset_value_from_where, constant, BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator, ValueWrapper};
use crate::error::QueryError;
use crate::schema::{Column, Table};
use crate::validator::Backend;
use crate::value::unsupported;

/// `@status = OPEN()` and `@status != OPEN()`.
///
/// An artifact is open when its status field holds one of the open values of
/// the status semantic. Trackers without that semantic have no notion of
/// closed artifacts: all of them are open.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusOpenFromWhereBuilder;

impl FromWhereBuilder for StatusOpenFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let Backend::Status(semantic) = backend else {
            return Err(QueryError::unsupported_comparison(comparison));
        };
        match comparison.value() {
            ValueWrapper::StatusOpen => {}
            value @ (ValueWrapper::Simple(_)
            | ValueWrapper::In(_)
            | ValueWrapper::Between(..)
            | ValueWrapper::CurrentDateTime(_)
            | ValueWrapper::CurrentUser) => return Err(unsupported(value, "@status")),
        }
        let expect = match comparison.operator() {
            Operator::Equal => Expect::Match,
            Operator::NotEqual => Expect::NoMatch,
            _ => return Err(QueryError::unsupported_comparison(comparison)),
        };

        match semantic {
            Some(semantic) => changeset_value_from_where(
                &context.aliases,
                semantic.field_id,
                Table::ChangesetValueList,
                "CVL",
                |list| {
                    let open = list.col(Column::BindvalueId).is_in(semantic.open_values.iter().copied());
                    Ok(Predicate::new(open, expect))
                },
            ),
            None => Ok(FromWhere::condition(constant(expect == Expect::Match))),
        }
    }
}
