use sea_query::{Expr, Query, SimpleExpr};

use super::{changeset_value_from_where, BuildContext, Expect, FromWhere, FromWhereBuilder, Predicate};
use crate::ast::{Comparison, Operator, ValueWrapper};
use crate::catalogue::{FieldId, FieldKind};
use crate::error::QueryError;
use crate::schema::{AliasScope, Column, Table, NONE_BIND_VALUE_ID};
use crate::validator::Backend;
use crate::value::{unsupported, ValueWrapperParameters};

/// `= ""` matches artifacts without any selected value, `!= ""` those with one.
fn empty_list_predicate(column: Expr, comparison: &Comparison) -> Result<Predicate, QueryError> {
    let has_value = Predicate::new(column.ne(NONE_BIND_VALUE_ID), Expect::NoMatch);
    match comparison.operator() {
        Operator::Equal => Ok(has_value),
        Operator::NotEqual => Ok(has_value.negated()),
        _ => Err(QueryError::unsupported_comparison(comparison)),
    }
}

/// Membership operators only: `=`/`IN` require a matching selected value,
/// `!=`/`NOT IN` forbid one.
fn membership(comparison: &Comparison) -> Result<Expect, QueryError> {
    match comparison.operator() {
        Operator::Equal | Operator::NotEqual | Operator::In | Operator::NotIn => {
            Ok(Expect::for_operator(comparison.operator()))
        }
        _ => Err(QueryError::unsupported_comparison(comparison)),
    }
}

/// `x = ?` for a single value, `x IN (?, ...)` otherwise.
fn equal_or_in<V: Into<SimpleExpr>>(column: Expr, mut values: Vec<V>) -> SimpleExpr {
    if values.len() == 1 {
        if let Some(value) = values.pop() {
            return column.eq(value);
        }
    }
    column.is_in(values)
}

/// Selectbox, radio and checkbox fields bound to static values, matched on
/// the value labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListStaticFromWhereBuilder;

impl FromWhereBuilder for ListStaticFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let Backend::Field {
            field_id,
            kind: FieldKind::ListStatic,
        } = backend
        else {
            return Err(QueryError::unsupported_comparison(comparison));
        };
        let field_id = *field_id;

        changeset_value_from_where(&context.aliases, field_id, Table::ChangesetValueList, "CVL", |list| {
            let column = list.col(Column::BindvalueId);
            if comparison.value().is_empty_string() {
                return empty_list_predicate(column, comparison);
            }
            let expect = membership(comparison)?;
            let labels = static_labels(comparison.value())?;
            let bind_values = static_bind_values(&context.aliases, field_id, labels);
            Ok(Predicate::new(column.in_subquery(bind_values), expect))
        })
    }
}

fn static_labels(value: &ValueWrapper) -> Result<Vec<String>, QueryError> {
    const CONTEXT: &str = "a list field";
    match value {
        ValueWrapper::Simple(literal) => Ok(vec![literal.as_text()]),
        ValueWrapper::In(members) => members
            .iter()
            .map(|member| match member {
                ValueWrapper::Simple(literal) => Ok(literal.as_text()),
                ValueWrapper::In(_)
                | ValueWrapper::Between(..)
                | ValueWrapper::CurrentDateTime(_)
                | ValueWrapper::CurrentUser
                | ValueWrapper::StatusOpen => Err(unsupported(member, CONTEXT)),
            })
            .collect(),
        ValueWrapper::Between(..)
        | ValueWrapper::CurrentDateTime(_)
        | ValueWrapper::CurrentUser
        | ValueWrapper::StatusOpen => Err(unsupported(value, CONTEXT)),
    }
}

/// `SELECT id FROM tracker_field_list_bind_static_value WHERE field_id = ? AND label ...`
fn static_bind_values(aliases: &AliasScope, field_id: FieldId, labels: Vec<String>) -> sea_query::SelectStatement {
    let bind = aliases.alias("BSV");
    Query::select()
        .expr(bind.col(Column::Id))
        .from_as(Table::BindStaticValue, bind.clone())
        .and_where(bind.col(Column::FieldId).eq(field_id))
        .and_where(equal_or_in(bind.col(Column::Label), labels))
        .to_owned()
}

/// Users referenced by a comparison, by id (`MYSELF()`) or by login.
#[derive(Debug, Clone, Default, PartialEq)]
pub(super) struct UserRefs {
    pub ids: Vec<i64>,
    pub names: Vec<String>,
}

impl UserRefs {
    pub(super) fn resolve(value: &ValueWrapper, parameters: &ValueWrapperParameters) -> Result<Self, QueryError> {
        const CONTEXT: &str = "a user list";
        let mut refs = UserRefs::default();
        let mut add = |member: &ValueWrapper| match member {
            ValueWrapper::Simple(literal) => {
                refs.names.push(literal.as_text());
                Ok(())
            }
            ValueWrapper::CurrentUser => {
                refs.ids.push(parameters.current_user_id);
                Ok(())
            }
            ValueWrapper::In(_)
            | ValueWrapper::Between(..)
            | ValueWrapper::CurrentDateTime(_)
            | ValueWrapper::StatusOpen => Err(unsupported(member, CONTEXT)),
        };
        match value {
            ValueWrapper::In(members) => members.iter().try_for_each(&mut add)?,
            ValueWrapper::Simple(_) | ValueWrapper::CurrentUser => add(value)?,
            ValueWrapper::Between(..) | ValueWrapper::CurrentDateTime(_) | ValueWrapper::StatusOpen => {
                return Err(unsupported(value, CONTEXT))
            }
        }
        Ok(refs)
    }

    /// `column` holds a user id. Logins are looked up in `user`.
    pub(super) fn predicate(self, column: Expr, aliases: &AliasScope) -> SimpleExpr {
        let by_id = (!self.ids.is_empty()).then(|| equal_or_in(column.clone(), self.ids));
        let by_name = (!self.names.is_empty()).then(|| {
            let user = aliases.alias("U");
            let user_ids = Query::select()
                .expr(user.col(Column::UserId))
                .from_as(Table::User, user.clone())
                .and_where(equal_or_in(user.col(Column::UserName), self.names))
                .to_owned();
            column.in_subquery(user_ids)
        });
        match (by_id, by_name) {
            (Some(by_id), Some(by_name)) => by_id.or(by_name),
            (Some(expr), None) | (None, Some(expr)) => expr,
            (None, None) => super::constant(false),
        }
    }
}

/// Selectbox fields bound to users, and `@assigned_to`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListUsersFromWhereBuilder;

impl FromWhereBuilder for ListUsersFromWhereBuilder {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError> {
        let Backend::Field {
            field_id,
            kind: FieldKind::ListUsers,
        } = backend
        else {
            return Err(QueryError::unsupported_comparison(comparison));
        };

        changeset_value_from_where(&context.aliases, *field_id, Table::ChangesetValueList, "CVL", |list| {
            let column = list.col(Column::BindvalueId);
            if comparison.value().is_empty_string() {
                return empty_list_predicate(column, comparison);
            }
            let expect = membership(comparison)?;
            let users = UserRefs::resolve(comparison.value(), context.parameters)?;
            Ok(Predicate::new(users.predicate(column, &context.aliases), expect))
        })
    }
}
