//! SQL compiler that turns a validated expression into artifact queries using sea-query.
//!
//! Every comparison contributes its own joins, so the compiled statement is
//! the base artifact query plus the joins of all comparisons, in comparison
//! order, and one WHERE condition mirroring the AND/OR structure of the query.

use std::sync::Arc;

use sea_query::{Alias, Asterisk, Expr, Func, JoinType, MysqlQueryBuilder, Order, Query, SelectStatement, Values};
use tracing::{debug, debug_span};

use crate::ast::{AndExpression, OrExpression, Term};
use crate::catalogue::{TrackerCatalogue, TrackerId};
use crate::config::CompilerConfig;
use crate::error::{ConfigError, QueryError};
use crate::from_where::{BuilderRegistry, CrossTrackerFromWhereBuilder, FromWhere};
use crate::parser::parse_with_limits;
use crate::schema::{Column, Table, TableAlias};
use crate::validator::{validate, ResolvedComparison, ValidatedExpression};
use crate::value::ValueWrapperParameters;

/// SQL text plus the values bound to its `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Values,
}

impl From<(String, Values)> for Statement {
    fn from((sql, values): (String, Values)) -> Self {
        Self { sql, values }
    }
}

/// One page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    /// Missing limits fall back to the configured default; limits are capped
    /// and never below 1.
    pub fn new(limit: Option<u64>, offset: Option<u64>, config: &CompilerConfig) -> Self {
        Self {
            limit: limit.unwrap_or(config.default_page_size).min(config.max_page_size).max(1),
            offset: offset.unwrap_or(0),
        }
    }
}

/// The artifact search of one expert query.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// `None` when every artifact of the trackers matches.
    from_where: Option<FromWhere>,
    tracker_ids: Vec<TrackerId>,
}

impl CompiledQuery {
    pub fn from_where(&self) -> Option<&FromWhere> {
        self.from_where.as_ref()
    }

    pub fn tracker_ids(&self) -> &[TrackerId] {
        &self.tracker_ids
    }

    /// `SELECT DISTINCT a.id FROM tracker_artifact AS a
    ///  INNER JOIN tracker_changeset AS c ON c.id = a.last_changeset_id <joins>
    ///  WHERE a.tracker_id IN (...) AND <condition>`
    pub fn select(&self) -> SelectStatement {
        let artifact = TableAlias::artifact();
        let changeset = TableAlias::changeset();

        let mut select = Query::select();
        select
            .distinct()
            .expr(artifact.col(Column::Id))
            .from_as(Table::Artifact, artifact.clone())
            .join_as(
                JoinType::InnerJoin,
                Table::Changeset,
                changeset.clone(),
                changeset.col(Column::Id).equals((artifact.clone(), Column::LastChangesetId)),
            );
        select.and_where(artifact.col(Column::TrackerId).is_in(self.tracker_ids.iter().copied()));
        if let Some(from_where) = &self.from_where {
            for join in &from_where.joins {
                select.join_as(JoinType::LeftJoin, join.table, join.alias.clone(), join.on.clone());
            }
            select.and_where(from_where.condition.clone());
        }
        select
    }

    /// Matching artifact ids, unordered.
    pub fn build_filter(&self) -> Statement {
        self.select().build(MysqlQueryBuilder).into()
    }

    /// Matching artifact ids, most recent first.
    pub fn build_page(&self, page: Page) -> Statement {
        self.select()
            .order_by((TableAlias::artifact(), Column::Id), Order::Desc)
            .limit(page.limit)
            .offset(page.offset)
            .build(MysqlQueryBuilder)
            .into()
    }

    /// Total number of matching artifacts.
    pub fn build_count(&self) -> Statement {
        Query::select()
            .expr(Func::count(Expr::col(Asterisk)))
            .from_subquery(self.select(), Alias::new("matching_artifacts"))
            .build(MysqlQueryBuilder)
            .into()
    }

    /// The filter with values inlined, for logs and the REPL only.
    pub fn to_debug_sql(&self) -> String {
        self.select().to_string(MysqlQueryBuilder)
    }
}

/// SQL compiler for expert queries
#[derive(Debug, Default)]
pub struct SqlCompiler {
    registry: BuilderRegistry,
    config: CompilerConfig,
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CompilerConfig) -> Result<Self, ConfigError> {
        config.check()?;
        Ok(Self {
            registry: BuilderRegistry::default(),
            config,
        })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// For registering additional builders.
    pub fn registry_mut(&mut self) -> &mut BuilderRegistry {
        &mut self.registry
    }

    /// Every artifact of the given trackers, as searched by an empty query.
    pub fn unfiltered(&self, scope: &[Arc<TrackerCatalogue>]) -> Result<CompiledQuery, QueryError> {
        if scope.is_empty() {
            return Err(QueryError::EmptyScope);
        }
        Ok(CompiledQuery {
            from_where: None,
            tracker_ids: scope.iter().map(|tracker| tracker.id).collect(),
        })
    }

    /// Parses, validates and assembles `query` for the given trackers.
    pub fn compile(
        &self,
        query: &str,
        scope: &[Arc<TrackerCatalogue>],
        parameters: &ValueWrapperParameters,
    ) -> Result<CompiledQuery, QueryError> {
        let span = debug_span!("compile_expert_query", trackers = scope.len());
        let _enter = span.enter();

        let expression = parse_with_limits(query, self.config.limits)?;
        let validated = validate(&expression, scope)?;
        self.assemble(&validated, parameters)
    }

    pub fn assemble(
        &self,
        validated: &ValidatedExpression,
        parameters: &ValueWrapperParameters,
    ) -> Result<CompiledQuery, QueryError> {
        let builder = CrossTrackerFromWhereBuilder::new(&self.registry, validated.tracker_ids.len());
        let from_where = Self::fold_or(&validated.expression, &builder, parameters)?;
        debug!(joins = from_where.joins.len(), "expert query assembled");
        Ok(CompiledQuery {
            from_where: Some(from_where),
            tracker_ids: validated.tracker_ids.clone(),
        })
    }

    fn fold_or(
        expression: &OrExpression<ResolvedComparison>,
        builder: &CrossTrackerFromWhereBuilder<'_>,
        parameters: &ValueWrapperParameters,
    ) -> Result<FromWhere, QueryError> {
        let mut result = Self::fold_and(&expression.head, builder, parameters)?;
        for and in &expression.tail {
            result = result.or(Self::fold_and(and, builder, parameters)?);
        }
        Ok(result)
    }

    fn fold_and(
        expression: &AndExpression<ResolvedComparison>,
        builder: &CrossTrackerFromWhereBuilder<'_>,
        parameters: &ValueWrapperParameters,
    ) -> Result<FromWhere, QueryError> {
        let mut result = Self::fold_term(&expression.head, builder, parameters)?;
        for term in &expression.tail {
            result = result.and(Self::fold_term(term, builder, parameters)?);
        }
        Ok(result)
    }

    fn fold_term(
        term: &Term<ResolvedComparison>,
        builder: &CrossTrackerFromWhereBuilder<'_>,
        parameters: &ValueWrapperParameters,
    ) -> Result<FromWhere, QueryError> {
        match term {
            Term::Comparison(resolved) => builder.from_where(resolved, parameters),
            Term::Parenthesis(inner) => Self::fold_or(inner, builder, parameters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{FieldKind, Semantics, StatusSemantic};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use sea_query::Value;
    use std::collections::HashSet;

    fn bugs() -> Arc<TrackerCatalogue> {
        Arc::new(
            TrackerCatalogue::new(10, "Bugs")
                .with_field(101, "summary", FieldKind::String)
                .with_labelled_field(102, "remaining_effort", "Remaining Effort", FieldKind::Computed)
                .with_field(42, "status", FieldKind::ListStatic)
                .with_field(105, "assignee", FieldKind::ListUsers)
                .with_field(106, "Priority", FieldKind::ListStatic)
                .with_semantics(Semantics {
                    title: Some(101),
                    status: Some(StatusSemantic {
                        field_id: 42,
                        open_values: vec![1, 2],
                    }),
                    contributor: Some(105),
                    ..Default::default()
                }),
        )
    }

    fn tasks() -> Arc<TrackerCatalogue> {
        Arc::new(TrackerCatalogue::new(20, "Tasks").with_field(206, "Priority", FieldKind::ListStatic))
    }

    fn parameters() -> ValueWrapperParameters {
        ValueWrapperParameters::new(777, Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, 17).unwrap())
    }

    fn compile(query: &str, scope: &[Arc<TrackerCatalogue>]) -> Result<CompiledQuery, QueryError> {
        SqlCompiler::new().compile(query, scope, &parameters())
    }

    fn int(n: i64) -> Value {
        Value::BigInt(Some(n))
    }

    fn text(s: &str) -> Value {
        Value::String(Some(Box::new(s.to_string())))
    }

    #[test]
    fn test_status_open() {
        let compiled = compile("status() = OPEN()", &[bugs()]).unwrap();
        let statement = compiled.build_filter();

        assert!(statement.sql.starts_with(
            "SELECT DISTINCT `a`.`id` FROM `tracker_artifact` AS `a` \
             INNER JOIN `tracker_changeset` AS `c` ON `c`.`id` = `a`.`last_changeset_id` \
             LEFT JOIN `tracker_changeset_value` AS `CV_0_10`"
        ), "{}", statement.sql);
        assert!(statement.sql.contains("`CVL_0_10`.`bindvalue_id` IN (?, ?)"), "{}", statement.sql);
        // 字段 id, 打开状态的值, 追踪器范围
        assert_eq!(statement.values.0, vec![int(42), int(1), int(2), int(10)]);
    }

    #[test]
    fn test_numeric_between() {
        let compiled = compile(r#""Remaining Effort" BETWEEN(1, 10)"#, &[bugs()]).unwrap();
        let statement = compiled.build_filter();
        assert!(statement.sql.contains("`CVN_0_10`.`value` BETWEEN ? AND ?"), "{}", statement.sql);
        assert_eq!(statement.values.0, vec![int(102), int(1), int(10), int(10)]);
    }

    #[test]
    fn test_unknown_field_generates_nothing() {
        assert_eq!(
            compile("unknown_field = 1", &[bugs()]).unwrap_err(),
            QueryError::UnknownField {
                name: "unknown_field".to_string()
            }
        );
    }

    #[test]
    fn test_current_user() {
        let compiled = compile("assignee = CURRENT_USER()", &[bugs()]).unwrap();
        let statement = compiled.build_filter();
        assert!(statement.sql.contains("`CVL_0_10`.`bindvalue_id` = ?"), "{}", statement.sql);
        assert_eq!(statement.values.0, vec![int(105), int(777), int(10)]);
    }

    #[test]
    fn test_cross_tracker_field_ids() {
        let compiled = compile(r#"Priority = "High""#, &[bugs(), tasks()]).unwrap();
        let statement = compiled.build_filter();

        assert!(statement.sql.contains("`CV_0_10`.`field_id` = ?"), "{}", statement.sql);
        assert!(statement.sql.contains("`CV_0_20`.`field_id` = ?"), "{}", statement.sql);
        assert!(statement.sql.contains("`a`.`tracker_id` IN (?, ?)"), "{}", statement.sql);
        assert_eq!(
            statement.values.0,
            vec![
                int(106),
                int(106),
                text("High"),
                int(206),
                int(206),
                text("High"),
                int(10),
                int(20),
                int(10),
                int(20),
            ]
        );
    }

    #[test]
    fn test_injection_attempt_is_bound() {
        let attack = "x'); DROP TABLE users; --";
        let compiled = compile(&format!(r#"summary = "{attack}""#), &[bugs()]).unwrap();
        let statement = compiled.build_filter();

        assert!(!statement.sql.contains("DROP"), "{}", statement.sql);
        let pattern = text(&format!("%{attack}%"));
        assert_eq!(statement.values.0.iter().filter(|value| **value == pattern).count(), 1);
    }

    #[test]
    fn test_numbers_keep_their_typed_text_on_text_and_list_fields() {
        let statement = compile("summary = 007", &[bugs()]).unwrap().build_filter();
        assert_eq!(statement.values.0[1], text("%007%"));

        let statement = compile("summary = 1.50", &[bugs()]).unwrap().build_filter();
        assert_eq!(statement.values.0[1], text("%1.50%"));

        let statement = compile("Priority = 1.10", &[bugs()]).unwrap().build_filter();
        assert_eq!(statement.values.0, vec![int(106), int(106), text("1.10"), int(10)]);

        let statement = compile("Priority IN(01, -2.0)", &[bugs()]).unwrap().build_filter();
        assert_eq!(statement.values.0[2..4].to_vec(), vec![text("01"), text("-2.0")]);
    }

    #[test]
    fn test_numeric_fields_bind_parsed_numbers() {
        let statement = compile(r#""Remaining Effort" > 007"#, &[bugs()]).unwrap().build_filter();
        assert_eq!(statement.values.0, vec![int(102), int(7), int(10)]);
    }

    #[test]
    fn test_aliases_are_unique() {
        let compiled = compile(
            r#"summary = "a" AND (summary = "b" OR Priority IN("High", "Low")) AND @status != OPEN() AND @title = """#,
            &[bugs(), tasks()],
        )
        .unwrap();
        let aliases: Vec<_> = compiled.from_where().unwrap().joins.iter().map(|join| join.alias.as_str()).collect();
        let distinct: HashSet<_> = aliases.iter().collect();
        assert_eq!(distinct.len(), aliases.len(), "{aliases:?}");
        assert!(aliases.len() >= 10);
    }

    #[test]
    fn test_or_inside_and_is_parenthesized() {
        let compiled = compile(r#"@id = 1 AND (@id = 2 OR @id = 3)"#, &[bugs()]).unwrap();
        let sql = compiled.build_filter().sql;
        assert!(sql.contains("(`a`.`id` = ? OR `a`.`id` = ?)"), "{sql}");
    }

    #[test]
    fn test_unfiltered_search_keeps_tracker_scope() {
        let compiled = SqlCompiler::new().unfiltered(&[bugs(), tasks()]).unwrap();
        assert!(compiled.from_where().is_none());

        let statement = compiled.build_filter();
        assert!(statement.sql.ends_with("WHERE `a`.`tracker_id` IN (?, ?)"), "{}", statement.sql);
        assert!(!statement.sql.contains("LEFT JOIN"), "{}", statement.sql);
        assert_eq!(statement.values.0, vec![int(10), int(20)]);

        assert_eq!(SqlCompiler::new().unfiltered(&[]).unwrap_err(), QueryError::EmptyScope);
    }

    #[test]
    fn test_page_and_count() {
        let compiler = SqlCompiler::new();
        let compiled = compiler.compile("@id > 5", &[bugs()], &parameters()).unwrap();

        let page = compiled.build_page(Page::new(Some(500), Some(20), compiler.config()));
        assert!(page.sql.ends_with("ORDER BY `a`.`id` DESC LIMIT ? OFFSET ?"), "{}", page.sql);
        assert_eq!(page.values.0[page.values.0.len() - 2..].to_vec(), vec![Value::BigUnsigned(Some(100)), Value::BigUnsigned(Some(20))]);

        let count = compiled.build_count();
        assert!(count.sql.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT"), "{}", count.sql);
        assert!(count.sql.ends_with("AS `matching_artifacts`"), "{}", count.sql);
        assert_eq!(count.values, compiled.build_filter().values);
    }

    #[test]
    fn test_default_page() {
        let config = CompilerConfig::default();
        assert_eq!(Page::new(None, None, &config), Page { limit: 50, offset: 0 });
        assert_eq!(Page::new(Some(0), None, &config).limit, 1);
    }

    #[test]
    fn test_inconsistent_config_is_rejected() {
        let config = CompilerConfig {
            default_page_size: 0,
            max_page_size: 0,
            ..CompilerConfig::default()
        };
        assert!(matches!(SqlCompiler::from_config(config.clone()), Err(ConfigError::Invalid(_))));

        // 未经检查的配置也不会让分页失败
        assert_eq!(Page::new(None, None, &config), Page { limit: 1, offset: 0 });
        assert_eq!(Page::new(Some(30), Some(5), &config), Page { limit: 1, offset: 5 });
    }

    #[test]
    fn test_limits_come_from_config() {
        let mut config = CompilerConfig::default();
        config.limits.max_comparisons = 2;
        let compiler = SqlCompiler::from_config(config).unwrap();
        let result = compiler.compile("@id = 1 OR @id = 2 OR @id = 3", &[bugs()], &parameters());
        assert!(matches!(result, Err(QueryError::TooComplex(_))));
    }

    #[test]
    fn test_debug_sql_inlines_values() {
        let compiled = compile("@id = 12", &[bugs()]).unwrap();
        assert!(compiled.to_debug_sql().contains("`a`.`id` = 12"));
    }
}
