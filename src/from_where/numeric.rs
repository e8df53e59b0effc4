use sea_query::{Expr, Value};

use super::{changeset_value_from_where, BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator, ValueWrapper};
use crate::catalogue::FieldKind;
use crate::error::QueryError;
use crate::schema::{Column, Table};
use crate::validator::Backend;
use crate::value::{numeric_bind_value, unsupported};

/// Integer, float and computed fields. Computed fields are searched on their
/// manually entered value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericFromWhereBuilder;

impl FromWhereBuilder for NumericFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let (field_id, table) = match backend {
            Backend::Field {
                field_id,
                kind: FieldKind::Int,
            } => (*field_id, Table::ChangesetValueInt),
            Backend::Field {
                field_id,
                kind: FieldKind::Float,
            } => (*field_id, Table::ChangesetValueFloat),
            Backend::Field {
                field_id,
                kind: FieldKind::Computed,
            } => (*field_id, Table::ChangesetValueComputed),
            _ => return Err(QueryError::unsupported_comparison(comparison)),
        };

        changeset_value_from_where(&context.aliases, field_id, table, "CVN", |value| {
            numeric_predicate(value.col(Column::Value), comparison)
        })
    }
}

fn number(comparison: &Comparison, value: &ValueWrapper) -> Result<Value, QueryError> {
    match value {
        ValueWrapper::Simple(literal) => numeric_bind_value(literal)
            .ok_or_else(|| QueryError::semantic(comparison, format!("'{}' is not a number", literal.as_text()))),
        ValueWrapper::In(_)
        | ValueWrapper::Between(..)
        | ValueWrapper::CurrentDateTime(_)
        | ValueWrapper::CurrentUser
        | ValueWrapper::StatusOpen => Err(unsupported(value, "a numeric field")),
    }
}

/// Shared with `@id`.
pub(super) fn numeric_predicate(column: Expr, comparison: &Comparison) -> Result<Predicate, QueryError> {
    let value = comparison.value();
    let operator = comparison.operator();

    if value.is_empty_string() {
        // 空值: 没有任何非空的数值
        let has_value = Predicate::new(column.is_not_null(), Expect::NoMatch);
        return match operator {
            Operator::Equal => Ok(has_value),
            Operator::NotEqual => Ok(has_value.negated()),
            _ => Err(QueryError::unsupported_comparison(comparison)),
        };
    }

    let predicate = match operator {
        Operator::Equal => Predicate::matching(column.eq(number(comparison, value)?)),
        Operator::NotEqual => Predicate::new(column.eq(number(comparison, value)?), Expect::NoMatch),
        Operator::LesserThan => Predicate::matching(column.lt(number(comparison, value)?)),
        Operator::LesserThanOrEqual => Predicate::matching(column.lte(number(comparison, value)?)),
        Operator::GreaterThan => Predicate::matching(column.gt(number(comparison, value)?)),
        Operator::GreaterThanOrEqual => Predicate::matching(column.gte(number(comparison, value)?)),
        Operator::Between => match value {
            ValueWrapper::Between(min, max) => {
                Predicate::matching(column.between(number(comparison, min)?, number(comparison, max)?))
            }
            _ => return Err(unsupported(value, "a numeric range")),
        },
        Operator::In | Operator::NotIn => return Err(QueryError::unsupported_comparison(comparison)),
    };
    Ok(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::from_where::test_support::{comparison, render};
    use pretty_assertions::assert_eq;

    const EFFORT: Backend = Backend::Field {
        field_id: 42,
        kind: FieldKind::Computed,
    };

    fn int(n: i64) -> ValueWrapper {
        ValueWrapper::Simple(Literal::integer(n))
    }

    #[test]
    fn test_between_binds_both_bounds() {
        let comparison = comparison(
            "Remaining Effort",
            Operator::Between,
            ValueWrapper::Between(Box::new(int(1)), Box::new(int(10))),
        );
        let (sql, values) = render(&NumericFromWhereBuilder, &EFFORT, &comparison).unwrap();
        assert!(
            sql.contains("LEFT JOIN `tracker_changeset_value_computedfield_manual_value` AS `CVN_1`"),
            "{sql}"
        );
        assert!(sql.contains("`CVN_1`.`value` BETWEEN ? AND ?"), "{sql}");
        assert_eq!(
            values.0,
            vec![Value::BigInt(Some(42)), Value::BigInt(Some(1)), Value::BigInt(Some(10))]
        );
    }

    #[test]
    fn test_ordering_operators() {
        let cases = [
            (Operator::LesserThan, "`CVN_1`.`value` < ?"),
            (Operator::LesserThanOrEqual, "`CVN_1`.`value` <= ?"),
            (Operator::GreaterThan, "`CVN_1`.`value` > ?"),
            (Operator::GreaterThanOrEqual, "`CVN_1`.`value` >= ?"),
        ];
        for (operator, expected) in cases {
            let comparison = comparison("effort", operator, ValueWrapper::Simple(Literal::float(2.5)));
            let (sql, values) = render(&NumericFromWhereBuilder, &EFFORT, &comparison).unwrap();
            assert!(sql.contains(expected), "{sql}");
            assert!(sql.ends_with("IS NOT NULL"), "{sql}");
            assert_eq!(values.0[1], Value::Double(Some(2.5)));
        }
    }

    #[test]
    fn test_not_equal_excludes_matching_rows() {
        let comparison = comparison("effort", Operator::NotEqual, int(3));
        let (sql, _) = render(&NumericFromWhereBuilder, &EFFORT, &comparison).unwrap();
        assert!(sql.contains("`CVN_1`.`value` = ?"), "{sql}");
        assert!(sql.ends_with("WHERE `CVN_1`.`changeset_value_id` IS NULL"), "{sql}");
    }

    #[test]
    fn test_int_and_float_tables() {
        let comparison = comparison("effort", Operator::Equal, int(3));
        let int_field = Backend::Field {
            field_id: 1,
            kind: FieldKind::Int,
        };
        let float_field = Backend::Field {
            field_id: 1,
            kind: FieldKind::Float,
        };
        let (sql, _) = render(&NumericFromWhereBuilder, &int_field, &comparison).unwrap();
        assert!(sql.contains("`tracker_changeset_value_int`"), "{sql}");
        let (sql, _) = render(&NumericFromWhereBuilder, &float_field, &comparison).unwrap();
        assert!(sql.contains("`tracker_changeset_value_float`"), "{sql}");
    }

    #[test]
    fn test_empty_value() {
        let comparison = comparison("effort", Operator::Equal, ValueWrapper::Simple(Literal::String(String::new())));
        let (sql, values) = render(&NumericFromWhereBuilder, &EFFORT, &comparison).unwrap();
        assert!(sql.contains("`CVN_1`.`value` IS NOT NULL"), "{sql}");
        assert!(sql.ends_with("IS NULL"), "{sql}");
        assert_eq!(values.0, vec![Value::BigInt(Some(42))]);
    }

    #[test]
    fn test_between_with_sentinel_bound() {
        let comparison = comparison(
            "effort",
            Operator::Between,
            ValueWrapper::Between(Box::new(int(1)), Box::new(ValueWrapper::CurrentDateTime(None))),
        );
        assert_eq!(
            render(&NumericFromWhereBuilder, &EFFORT, &comparison).unwrap_err(),
            QueryError::UnsupportedValueWrapper {
                wrapper: "NOW()",
                context: "a numeric field"
            }
        );
    }
}
