use sea_query::Expr;

use super::{changeset_value_from_where, BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator, ValueWrapper};
use crate::catalogue::FieldKind;
use crate::error::QueryError;
use crate::schema::{Column, Table};
use crate::validator::Backend;
use crate::value::{resolve_date, unsupported, ValueWrapperParameters};

/// Date and datetime fields, stored as unix timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateFromWhereBuilder;

impl FromWhereBuilder for DateFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let (field_id, with_time) = match backend {
            Backend::Field {
                field_id,
                kind: FieldKind::Date,
            } => (*field_id, false),
            Backend::Field {
                field_id,
                kind: FieldKind::Datetime,
            } => (*field_id, true),
            _ => return Err(QueryError::unsupported_comparison(comparison)),
        };

        changeset_value_from_where(&context.aliases, field_id, Table::ChangesetValueDate, "CVD", |value| {
            date_predicate(value.col(Column::Value), comparison, context.parameters, with_time)
        })
    }
}

/// A date operand stands for an interval: `=` tests membership, `<` and `>=`
/// compare with its start, `<=` and `>` with its end.
pub(super) fn date_predicate(
    column: Expr,
    comparison: &Comparison,
    parameters: &ValueWrapperParameters,
    with_time: bool,
) -> Result<Predicate, QueryError> {
    let value = comparison.value();
    let operator = comparison.operator();

    if value.is_empty_string() {
        let has_value = Predicate::new(column.is_not_null(), Expect::NoMatch);
        return match operator {
            Operator::Equal => Ok(has_value),
            Operator::NotEqual => Ok(has_value.negated()),
            _ => Err(QueryError::unsupported_comparison(comparison)),
        };
    }

    if operator == Operator::Between {
        let ValueWrapper::Between(min, max) = value else {
            return Err(unsupported(value, "a date range"));
        };
        let min = resolve_date(comparison, min, parameters, with_time)?;
        let max = resolve_date(comparison, max, parameters, with_time)?;
        return Ok(Predicate::matching(column.between(min.start, max.end)));
    }

    let range = resolve_date(comparison, value, parameters, with_time)?;
    let predicate = match operator {
        Operator::Equal => Predicate::matching(column.between(range.start, range.end)),
        Operator::NotEqual => Predicate::new(column.between(range.start, range.end), Expect::NoMatch),
        Operator::LesserThan => Predicate::matching(column.lt(range.start)),
        Operator::LesserThanOrEqual => Predicate::matching(column.lte(range.end)),
        Operator::GreaterThan => Predicate::matching(column.gt(range.end)),
        Operator::GreaterThanOrEqual => Predicate::matching(column.gte(range.start)),
        Operator::In | Operator::NotIn | Operator::Between => {
            return Err(QueryError::unsupported_comparison(comparison))
        }
    };
    Ok(predicate)
}
