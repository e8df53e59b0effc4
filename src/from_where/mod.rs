//! FROM/WHERE fragments and the builders producing them.
//!
//! A builder turns one comparison against one [`Backend`] into a
//! [`FromWhere`]: the `LEFT JOIN`s it needs plus a condition on the joined
//! aliases. User literals only ever reach the SQL as bound values.

mod comments;
mod cross_tracker;
mod date;
mod list;
mod metadata;
mod numeric;
mod status;
mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sea_query::{Expr, SimpleExpr};

use crate::ast::{Comparison, Operator};
use crate::catalogue::{FieldId, TrackerId};
use crate::error::QueryError;
use crate::schema::{AliasScope, Column, Table, TableAlias};
use crate::validator::{Backend, SearchKind};
use crate::value::ValueWrapperParameters;

pub use comments::CommentsFromWhereBuilder;
pub use cross_tracker::CrossTrackerFromWhereBuilder;
pub use date::DateFromWhereBuilder;
pub use list::{ListStaticFromWhereBuilder, ListUsersFromWhereBuilder};
pub use metadata::ArtifactMetadataFromWhereBuilder;
pub use numeric::NumericFromWhereBuilder;
pub use status::StatusOpenFromWhereBuilder;
pub use text::TextFromWhereBuilder;

/// `LEFT JOIN table AS alias ON on`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: Table,
    pub alias: TableAlias,
    pub on: SimpleExpr,
}

impl Join {
    pub fn new(table: Table, alias: TableAlias, on: SimpleExpr) -> Self {
        Self { table, alias, on }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromWhere {
    pub joins: Vec<Join>,
    pub condition: SimpleExpr,
}

impl FromWhere {
    pub fn new(joins: Vec<Join>, condition: SimpleExpr) -> Self {
        Self { joins, condition }
    }

    /// Fragment without joins.
    pub fn condition(condition: SimpleExpr) -> Self {
        Self::new(Vec::new(), condition)
    }

    pub fn and(mut self, other: FromWhere) -> Self {
        self.joins.extend(other.joins);
        Self::new(self.joins, self.condition.and(other.condition))
    }

    pub fn or(mut self, other: FromWhere) -> Self {
        self.joins.extend(other.joins);
        Self::new(self.joins, self.condition.or(other.condition))
    }

    /// Restricts the condition to the artifacts of one tracker.
    pub fn guarded_by(self, tracker: TrackerId) -> Self {
        let guard = TableAlias::artifact().col(Column::TrackerId).eq(tracker);
        Self::new(self.joins, guard.and(self.condition))
    }
}

/// Everything a builder may use besides the comparison itself.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub parameters: &'a ValueWrapperParameters,
    /// The only source of table aliases for the builder.
    pub aliases: AliasScope,
}

pub trait FromWhereBuilder: Send + Sync {
    fn from_where(
        &self,
        backend: &Backend,
        comparison: &Comparison,
        context: &BuildContext<'_>,
    ) -> Result<FromWhere, QueryError>;
}

/// Builders keyed by searchable kind and operator.
pub struct BuilderRegistry {
    builders: HashMap<(SearchKind, Operator), Arc<dyn FromWhereBuilder>>,
}

impl BuilderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registers `builder` for every listed operator, replacing previous entries.
    pub fn register(&mut self, kind: SearchKind, operators: &[Operator], builder: Arc<dyn FromWhereBuilder>) {
        for &operator in operators {
            self.builders.insert((kind, operator), Arc::clone(&builder));
        }
    }

    pub fn get(&self, kind: SearchKind, operator: Operator) -> Option<&Arc<dyn FromWhereBuilder>> {
        self.builders.get(&(kind, operator))
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let defaults: [(SearchKind, Arc<dyn FromWhereBuilder>); 10] = [
            (SearchKind::Text, Arc::new(TextFromWhereBuilder)),
            (SearchKind::Numeric, Arc::new(NumericFromWhereBuilder)),
            (SearchKind::Date, Arc::new(DateFromWhereBuilder)),
            (SearchKind::ListStatic, Arc::new(ListStaticFromWhereBuilder)),
            (SearchKind::ListUsers, Arc::new(ListUsersFromWhereBuilder)),
            (SearchKind::Status, Arc::new(StatusOpenFromWhereBuilder)),
            (SearchKind::Comments, Arc::new(CommentsFromWhereBuilder)),
            (SearchKind::ArtifactUser, Arc::new(ArtifactMetadataFromWhereBuilder)),
            (SearchKind::ArtifactDate, Arc::new(ArtifactMetadataFromWhereBuilder)),
            (SearchKind::ArtifactId, Arc::new(ArtifactMetadataFromWhereBuilder)),
        ];
        for (kind, builder) in defaults {
            registry.register(kind, kind.operators(), builder);
        }
        registry
    }
}

impl fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderRegistry")
            .field("entries", &self.builders.len())
            .finish()
    }
}

/// Whether rows must satisfy a predicate, or no row may.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Match,
    NoMatch,
}

impl Expect {
    fn negate(self) -> Self {
        match self {
            Expect::Match => Expect::NoMatch,
            Expect::NoMatch => Expect::Match,
        }
    }

    /// `=`, `IN` and the ordering operators match; `!=` and `NOT IN` exclude.
    fn for_operator(operator: Operator) -> Self {
        match operator {
            Operator::NotEqual | Operator::NotIn => Expect::NoMatch,
            _ => Expect::Match,
        }
    }
}

pub(crate) struct Predicate {
    expr: SimpleExpr,
    expect: Expect,
}

impl Predicate {
    fn new(expr: SimpleExpr, expect: Expect) -> Self {
        Self { expr, expect }
    }

    fn matching(expr: SimpleExpr) -> Self {
        Self::new(expr, Expect::Match)
    }

    fn negated(self) -> Self {
        Self::new(self.expr, self.expect.negate())
    }

    /// The predicate as a plain condition, for columns of the base tables.
    fn into_condition(self) -> SimpleExpr {
        match self.expect {
            Expect::Match => self.expr,
            Expect::NoMatch => self.expr.not(),
        }
    }
}

/// `a.id = b.id` style join key.
fn join_key(left: &TableAlias, left_column: Column, right: &TableAlias, right_column: Column) -> SimpleExpr {
    left.col(left_column).equals((right.clone(), right_column))
}

/// Joins a value table through `tracker_changeset_value`:
///
/// ```sql
/// LEFT JOIN tracker_changeset_value AS CV ON (CV.changeset_id = c.id AND CV.field_id = ?)
/// LEFT JOIN <table> AS <role> ON (<role>.changeset_value_id = CV.id AND <predicate>)
/// ```
///
/// The condition then tests whether a joined value row exists.
fn changeset_value_from_where(
    aliases: &AliasScope,
    field_id: FieldId,
    table: Table,
    role: &str,
    predicate: impl FnOnce(&TableAlias) -> Result<Predicate, QueryError>,
) -> Result<FromWhere, QueryError> {
    let changeset_value = aliases.alias("CV");
    let value = aliases.alias(role);
    let predicate = predicate(&value)?;

    let joins = vec![
        Join::new(
            Table::ChangesetValue,
            changeset_value.clone(),
            join_key(&changeset_value, Column::ChangesetId, &TableAlias::changeset(), Column::Id)
                .and(changeset_value.col(Column::FieldId).eq(field_id)),
        ),
        Join::new(
            table,
            value.clone(),
            join_key(&value, Column::ChangesetValueId, &changeset_value, Column::Id).and(predicate.expr),
        ),
    ];
    let found = value.col(Column::ChangesetValueId);
    let condition = match predicate.expect {
        Expect::Match => found.is_not_null(),
        Expect::NoMatch => found.is_null(),
    };
    Ok(FromWhere::new(joins, condition))
}

fn constant(value: bool) -> SimpleExpr {
    Expr::cust(if value { "TRUE" } else { "FALSE" })
}
