use sea_query::Expr;

use super::{changeset_value_from_where, BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator, ValueWrapper};
use crate::catalogue::FieldKind;
use crate::error::QueryError;
use crate::schema::{Column, Table};
use crate::validator::Backend;
use crate::value::{contains_pattern, unsupported};

/// String and text fields, `@title` and `@description`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFromWhereBuilder;

impl FromWhereBuilder for TextFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let Backend::Field {
            field_id,
            kind: FieldKind::String | FieldKind::Text,
        } = backend
        else {
            return Err(QueryError::unsupported_comparison(comparison));
        };
        let text = text_value(comparison.value(), "a text field")?;

        changeset_value_from_where(&context.aliases, *field_id, Table::ChangesetValueText, "CVT", |value| {
            text_predicate(value.col(Column::Value), comparison, &text)
        })
    }
}

pub(super) fn text_value(value: &ValueWrapper, context: &'static str) -> Result<String, QueryError> {
    match value {
        ValueWrapper::Simple(literal) => Ok(literal.as_text()),
        ValueWrapper::In(_)
        | ValueWrapper::Between(..)
        | ValueWrapper::CurrentDateTime(_)
        | ValueWrapper::CurrentUser
        | ValueWrapper::StatusOpen => Err(unsupported(value, context)),
    }
}

/// `= "x"` matches values containing `x`; `= ""` matches when there is no
/// non-empty value.
pub(super) fn text_predicate(column: Expr, comparison: &Comparison, text: &str) -> Result<Predicate, QueryError> {
    let predicate = if text.is_empty() {
        Predicate::new(column.ne(""), Expect::NoMatch)
    } else {
        Predicate::matching(column.like(contains_pattern(text)))
    };
    match comparison.operator() {
        Operator::Equal => Ok(predicate),
        Operator::NotEqual => Ok(predicate.negated()),
        _ => Err(QueryError::unsupported_comparison(comparison)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Literal;
    use crate::from_where::test_support::{comparison, render};
    use pretty_assertions::assert_eq;
    use sea_query::Value;

    const SUMMARY: Backend = Backend::Field {
        field_id: 7,
        kind: FieldKind::String,
    };

    fn string(s: &str) -> ValueWrapper {
        ValueWrapper::Simple(Literal::String(s.to_string()))
    }

    #[test]
    fn test_equal_is_substring_match() {
        let comparison = comparison("summary", Operator::Equal, string("crash"));
        let (sql, values) = render(&TextFromWhereBuilder, &SUMMARY, &comparison).unwrap();
        assert!(
            sql.contains("LEFT JOIN `tracker_changeset_value` AS `CV_1` ON `CV_1`.`changeset_id` = `c`.`id`"),
            "{sql}"
        );
        assert!(sql.contains("`CV_1`.`field_id` = ?"), "{sql}");
        assert!(
            sql.contains("LEFT JOIN `tracker_changeset_value_text` AS `CVT_1` ON `CVT_1`.`changeset_value_id` = `CV_1`.`id`"),
            "{sql}"
        );
        assert!(sql.contains("`CVT_1`.`value` LIKE ?"), "{sql}");
        assert!(sql.ends_with("WHERE `CVT_1`.`changeset_value_id` IS NOT NULL"), "{sql}");
        assert_eq!(
            values.0,
            vec![Value::BigInt(Some(7)), Value::String(Some(Box::new("%crash%".to_string())))]
        );
    }

    #[test]
    fn test_not_equal_and_empty() {
        let not_equal = comparison("summary", Operator::NotEqual, string("crash"));
        let (sql, _) = render(&TextFromWhereBuilder, &SUMMARY, &not_equal).unwrap();
        assert!(sql.ends_with("WHERE `CVT_1`.`changeset_value_id` IS NULL"), "{sql}");

        let empty = comparison("summary", Operator::Equal, string(""));
        let (sql, values) = render(&TextFromWhereBuilder, &SUMMARY, &empty).unwrap();
        assert!(sql.contains("`CVT_1`.`value` <> ?"), "{sql}");
        assert!(sql.ends_with("IS NULL"), "{sql}");
        assert_eq!(values.0[1], Value::String(Some(Box::new(String::new()))));

        let not_empty = comparison("summary", Operator::NotEqual, string(""));
        let (sql, _) = render(&TextFromWhereBuilder, &SUMMARY, &not_empty).unwrap();
        assert!(sql.ends_with("IS NOT NULL"), "{sql}");
    }

    #[test]
    fn test_numbers_are_searched_as_text() {
        let comparison = comparison("summary", Operator::Equal, ValueWrapper::Simple(Literal::integer(42)));
        let (_, values) = render(&TextFromWhereBuilder, &SUMMARY, &comparison).unwrap();
        assert_eq!(values.0[1], Value::String(Some(Box::new("%42%".to_string()))));
    }

    #[test]
    fn test_sentinels_are_rejected() {
        let comparison = comparison("summary", Operator::Equal, ValueWrapper::CurrentUser);
        assert_eq!(
            render(&TextFromWhereBuilder, &SUMMARY, &comparison).unwrap_err(),
            QueryError::UnsupportedValueWrapper {
                wrapper: "MYSELF()",
                context: "a text field"
            }
        );
    }

    #[test]
    fn test_wrong_backend() {
        let comparison = comparison("summary", Operator::Equal, string("x"));
        assert!(matches!(
            render(&TextFromWhereBuilder, &Backend::Comments, &comparison),
            Err(QueryError::UnsupportedComparison { .. })
        ));
    }
}
