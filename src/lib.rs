//! Compiles tracker expert queries into parameterized MySQL statements.
//!
//! ```text
//! query ── Lexer ──> tokens ── Parser ──> Expression ── validate ──> ValidatedExpression
//!                                                                          │
//!                    CompiledQuery <── SqlCompiler::assemble (FromWhere builders)
//! ```

pub mod ast;
pub mod catalogue;
pub mod config;
pub mod error;
pub mod from_where;
pub mod lexer;
pub mod parser;
pub mod schema;
pub mod sql_compiler;
pub mod token;
pub mod validator;
pub mod value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

pub use catalogue::{CatalogueProvider, CatalogueSet, TrackerCatalogue, TrackerId};
pub use config::CompilerConfig;
pub use error::{ConfigError, QueryError, SyntaxError};
pub use sql_compiler::{CompiledQuery, Page, SqlCompiler, Statement};
pub use value::ValueWrapperParameters;

/// Compiles `query` for the given trackers with the default compiler.
pub fn compile(
    query: &str,
    scope: &[Arc<TrackerCatalogue>],
    parameters: &ValueWrapperParameters,
) -> Result<CompiledQuery, QueryError> {
    SqlCompiler::new().compile(query, scope, parameters)
}

/// Body of a cross-tracker search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub trackers_id: Vec<TrackerId>,
    #[serde(default)]
    pub expert_query: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

/// The two statements a search page needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStatements {
    pub page: Statement,
    pub count: Statement,
}

pub fn compile_search(
    request: &SearchRequest,
    provider: &impl CatalogueProvider,
    parameters: &ValueWrapperParameters,
    compiler: &SqlCompiler,
) -> Result<SearchStatements, QueryError> {
    let scope = provider.resolve_scope(&request.trackers_id)?;
    // 空查询不过滤, 返回所有追踪器中的工件
    let compiled = if request.expert_query.trim().is_empty() {
        compiler.unfiltered(&scope)?
    } else {
        compiler.compile(&request.expert_query, &scope, parameters)?
    };
    let page = Page::new(request.limit, request.offset, compiler.config());
    info!(
        trackers = ?compiled.tracker_ids(),
        limit = page.limit,
        offset = page.offset,
        "search compiled"
    );
    Ok(SearchStatements {
        page: compiled.build_page(page),
        count: compiled.build_count(),
    })
}
