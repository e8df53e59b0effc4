//! Error types for query compilation.
//!
//! Every stage fails fast with the first error it meets. Messages quote the
//! offending query term and never mention generated SQL or table aliases.

use std::path::PathBuf;

use thiserror::Error;

use crate::ast::{Comparison, Operator};
use crate::token::Span;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("we cannot search on '{name}', we don't know what it refers to")]
    UnknownField { name: String },

    #[error("invalid comparison `{comparison}`: {reason}")]
    Semantic { comparison: String, reason: String },

    #[error("operator {operator} is not supported for '{searchable}'")]
    UnsupportedComparison { searchable: String, operator: Operator },

    #[error("{wrapper} cannot be used when searching {context}")]
    UnsupportedValueWrapper {
        wrapper: &'static str,
        context: &'static str,
    },

    #[error("query is too complex: {0}")]
    TooComplex(String),

    #[error("tracker #{0} does not exist")]
    TrackerNotFound(i64),

    #[error("at least one tracker is required to run a query")]
    EmptyScope,
}

impl QueryError {
    pub fn semantic(comparison: &Comparison, reason: impl Into<String>) -> Self {
        QueryError::Semantic {
            comparison: comparison.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_comparison(comparison: &Comparison) -> Self {
        QueryError::UnsupportedComparison {
            searchable: comparison.searchable().to_string(),
            operator: comparison.operator(),
        }
    }

    /// Stable key for looking up a translated message.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Syntax(_) => "syntax_error",
            QueryError::UnknownField { .. } => "unknown_field",
            QueryError::Semantic { .. } => "semantic_error",
            QueryError::UnsupportedComparison { .. } => "unsupported_comparison",
            QueryError::UnsupportedValueWrapper { .. } => "unsupported_value_wrapper",
            QueryError::TooComplex(_) => "query_too_complex",
            QueryError::TrackerNotFound(_) => "tracker_not_found",
            QueryError::EmptyScope => "empty_scope",
        }
    }

    /// Status code the REST layer answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::TrackerNotFound(_) => 404,
            _ => 400,
        }
    }
}

/// Malformed query text. `span` points at the token that could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at position {}: expected {expected}, found {found}", .span.start)]
pub struct SyntaxError {
    pub span: Span,
    pub expected: String,
    pub found: String,
}

impl SyntaxError {
    pub fn new(span: Span, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            span,
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// 配置或目录文件加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {}", .0.display())]
    Missing(PathBuf),

    #[error("无法读取配置文件 {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法解析JSON配置 {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("配置错误: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(QueryError::TrackerNotFound(3).http_status(), 404);
        assert_eq!(QueryError::EmptyScope.http_status(), 400);
        assert_eq!(
            QueryError::UnknownField { name: "foo".into() }.http_status(),
            400
        );
    }

    #[test]
    fn test_syntax_error_message_embeds_position() {
        let err = QueryError::from(SyntaxError::new(Span::new(7, 8), "a value", "`)`"));
        assert_eq!(
            err.to_string(),
            "syntax error at position 7: expected a value, found `)`"
        );
        assert_eq!(err.code(), "syntax_error");
    }
}
