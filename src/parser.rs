//! 专家查询的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   └─ parse_or_expression()
//!        ├─ parse_and_expression()
//!        │    ├─ parse_term()
//!        │    │    ├─ "(" → 分组表达式 (递归调用 parse_or_expression, 受最大深度限制)
//!        │    │    └─ parse_comparison()
//!        │    │         ├─ parse_searchable()     field | "field name" | @metadata | status()
//!        │    │         ├─ 比较运算符 → parse_value()
//!        │    │         ├─ [NOT] IN → parse_in_values()
//!        │    │         └─ BETWEEN → ( parse_value() , parse_value() )
//!        │    │
//!        │    └─ 遇到AND时，继续解析右侧 Term
//!        │
//!        └─ 遇到OR时，继续解析右侧AND表达式
//! ```
//!
//! ## 语法优先级（从高到低）
//!
//! 1. **括号分组** `(expression)`
//! 2. **比较操作** `field = value`, `field IN(...)`, `field BETWEEN(a, b)`
//! 3. **AND操作** `expr1 AND expr2`
//! 4. **OR操作** `expr1 OR expr2`
//!
//! ## 值
//! - **字符串**: `"quoted"`, `'quoted'` 或不带引号的 `word`
//! - **数字**: `123`, `-4`, `3.5`
//! - **当前时间**: `NOW()`, `NOW() - 1w`, `CURRENT_DATETIME(-3d)`
//! - **当前用户**: `MYSELF()`, `CURRENT_USER()`
//! - **状态为打开**: `OPEN()`, `STATUS()`
//!
//! ## 解析示例
//!
//! ```text
//! summary = "crash" AND (priority IN("High", "Critical") OR @assigned_to = MYSELF())
//! "Remaining Effort" BETWEEN(1, 10)
//! @submitted_on > NOW() - 2w
//! status() = OPEN()
//! ```

use tracing::debug;

use crate::ast::{
    AndExpression, Comparison, ComparisonId, Expression, Literal, Number, Operator, OrExpression,
    PeriodOffset, PeriodUnit, Searchable, Sign, Term, ValueWrapper,
};
use crate::error::{QueryError, SyntaxError};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

/// 防止恶意输入导致的过深递归和过大查询
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ParserLimits {
    /// 括号最大嵌套深度
    pub max_depth: usize,
    /// 单个查询中比较的最大数量
    pub max_comparisons: usize,
    /// IN (...) 列表的最大长度
    pub max_in_values: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_comparisons: 128,
            max_in_values: 200,
        }
    }
}

/// 使用默认限制解析查询文本
pub fn parse(query: &str) -> Result<Expression, QueryError> {
    parse_with_limits(query, ParserLimits::default())
}

pub fn parse_with_limits(query: &str, limits: ParserLimits) -> Result<Expression, QueryError> {
    let tokens: Vec<_> = Lexer::new(query).collect();
    let expression = Parser::new(&tokens).with_limits(limits).parse()?;
    debug!(
        tokens = tokens.len(),
        comparisons = expression.comparisons().len(),
        "parsed expert query"
    );
    Ok(expression)
}

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
    limits: ParserLimits,
    depth: usize,
    next_comparison: u32,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
            limits: ParserLimits::default(),
            depth: 0,
            next_comparison: 0,
        }
    }

    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前 token 之后的第 n 个 token
    fn peek_nth(&self, n: usize) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position + n)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 输入结束的位置
    fn end_span(&self) -> Span {
        self.tokens
            .last()
            .map(|token| Span::at(token.span.end))
            .unwrap_or_default()
    }

    fn error_here(&self, expected: &str) -> QueryError {
        let err = match self.peek() {
            Some(token) => SyntaxError::new(token.span, expected, token.kind.to_string()),
            None => SyntaxError::new(self.end_span(), expected, "end of input"),
        };
        err.into()
    }

    fn error_at(token: &Token<'_>, expected: &str) -> QueryError {
        SyntaxError::new(token.span, expected, token.kind.to_string()).into()
    }

    /// 返回当前 token 并推进, 输入结束时返回错误
    fn next_or_error(&mut self, expected: &str) -> Result<&'a Token<'a>, QueryError> {
        match self.advance() {
            Some(token) => Ok(token),
            None => Err(SyntaxError::new(self.end_span(), expected, "end of input").into()),
        }
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind<'_>, description: &str) -> Result<&'a Token<'a>, QueryError> {
        if self.match_token(&expected) {
            self.next_or_error(description)
        } else {
            Err(self.error_here(description))
        }
    }

    /// 检查当前 token 是否匹配给定类型
    fn match_token(&self, kind: &TokenKind<'_>) -> bool {
        self.peek()
            .is_some_and(|token| std::mem::discriminant(&token.kind) == std::mem::discriminant(kind))
    }

    pub fn parse(&mut self) -> Result<Expression, QueryError> {
        if self.tokens.is_empty() {
            return Err(self.error_here("a comparison"));
        }
        let expression = self.parse_or_expression()?;
        if self.peek().is_some() {
            return Err(self.error_here("AND, OR or end of query"));
        }
        Ok(expression)
    }

    /// 语法: `and_expr (OR and_expr)*`
    fn parse_or_expression(&mut self) -> Result<OrExpression, QueryError> {
        let head = self.parse_and_expression()?;
        let mut tail = Vec::new();

        while self.match_token(&TokenKind::Or) {
            self.advance(); // 消费 OR
            tail.push(self.parse_and_expression()?);
        }

        Ok(OrExpression::new(head, tail))
    }

    /// 语法: `term (AND term)*`
    fn parse_and_expression(&mut self) -> Result<AndExpression, QueryError> {
        let head = self.parse_term()?;
        let mut tail = Vec::new();

        while self.match_token(&TokenKind::And) {
            self.advance(); // 消费 AND
            tail.push(self.parse_term()?);
        }

        Ok(AndExpression::new(head, tail))
    }

    fn parse_term(&mut self) -> Result<Term, QueryError> {
        if !self.match_token(&TokenKind::LParen) {
            return Ok(Term::Comparison(self.parse_comparison()?));
        }

        if self.depth >= self.limits.max_depth {
            return Err(QueryError::TooComplex(format!(
                "more than {} nested parentheses",
                self.limits.max_depth
            )));
        }
        self.advance(); // 消费 (
        self.depth += 1;
        let inner = self.parse_or_expression()?;
        self.expect(TokenKind::RParen, "`)`")?;
        self.depth -= 1;

        Ok(Term::Parenthesis(Box::new(inner)))
    }

    fn next_comparison_id(&mut self) -> Result<ComparisonId, QueryError> {
        if self.next_comparison as usize >= self.limits.max_comparisons {
            return Err(QueryError::TooComplex(format!(
                "more than {} comparisons",
                self.limits.max_comparisons
            )));
        }
        let id = ComparisonId(self.next_comparison);
        self.next_comparison += 1;
        Ok(id)
    }

    fn parse_comparison(&mut self) -> Result<Comparison, QueryError> {
        let searchable = self.parse_searchable()?;
        let id = self.next_comparison_id()?;

        let operator_token = self.next_or_error("a comparison operator")?;
        let (operator, value) = match &operator_token.kind {
            TokenKind::Eq => (Operator::Equal, self.parse_value()?),
            TokenKind::NotEq => (Operator::NotEqual, self.parse_value()?),
            TokenKind::Lt => (Operator::LesserThan, self.parse_value()?),
            TokenKind::Lte => (Operator::LesserThanOrEqual, self.parse_value()?),
            TokenKind::Gt => (Operator::GreaterThan, self.parse_value()?),
            TokenKind::Gte => (Operator::GreaterThanOrEqual, self.parse_value()?),
            TokenKind::In => (Operator::In, self.parse_in_values()?),
            TokenKind::Not => {
                self.expect(TokenKind::In, "IN after NOT")?;
                (Operator::NotIn, self.parse_in_values()?)
            }
            TokenKind::Between => {
                self.expect(TokenKind::LParen, "`(` after BETWEEN")?;
                let min = self.parse_value()?;
                self.expect(TokenKind::Comma, "`,` between the two BETWEEN bounds")?;
                let max = self.parse_value()?;
                self.expect(TokenKind::RParen, "`)`")?;
                (Operator::Between, ValueWrapper::Between(Box::new(min), Box::new(max)))
            }
            _ => return Err(Self::error_at(operator_token, "a comparison operator")),
        };

        Comparison::new(id, searchable, operator, value)
    }

    /// 比较左侧: `field`, `"field name"`, `@metadata` 或 `metadata()`
    fn parse_searchable(&mut self) -> Result<Searchable, QueryError> {
        const EXPECTED: &str = "a field name or @metadata";

        let token = self.next_or_error(EXPECTED)?;
        match &token.kind {
            TokenKind::At => {
                let name_token = self.next_or_error("a metadata name after `@`")?;
                match &name_token.kind {
                    TokenKind::Identifier(name) => Ok(Searchable::Metadata(name.to_ascii_lowercase())),
                    _ => Err(Self::error_at(name_token, "a metadata name after `@`")),
                }
            }
            TokenKind::Identifier(name) => {
                let is_call = matches!(self.peek(), Some(t) if t.kind == TokenKind::LParen)
                    && matches!(self.peek_nth(1), Some(t) if t.kind == TokenKind::RParen);
                if is_call {
                    self.advance(); // 消费 (
                    self.advance(); // 消费 )
                    Ok(Searchable::Metadata(name.to_ascii_lowercase()))
                } else {
                    Ok(Searchable::Field(name.to_string()))
                }
            }
            TokenKind::String(name) if !name.is_empty() => Ok(Searchable::Field(name.to_string())),
            _ => Err(Self::error_at(token, EXPECTED)),
        }
    }

    /// `IN ( value, value, ... )`, 至少一个值
    fn parse_in_values(&mut self) -> Result<ValueWrapper, QueryError> {
        self.expect(TokenKind::LParen, "`(` after IN")?;
        let mut values = Vec::new();

        loop {
            if values.len() >= self.limits.max_in_values {
                return Err(QueryError::TooComplex(format!(
                    "more than {} values in an IN list",
                    self.limits.max_in_values
                )));
            }
            values.push(self.parse_value()?);
            if self.match_token(&TokenKind::Comma) {
                self.advance(); // 消费 ,
            } else {
                break;
            }
        }

        self.expect(TokenKind::RParen, "`,` or `)`")?;
        Ok(ValueWrapper::In(values))
    }

    fn parse_value(&mut self) -> Result<ValueWrapper, QueryError> {
        const EXPECTED: &str = "a value";

        let token = self.next_or_error(EXPECTED)?;
        match &token.kind {
            TokenKind::String(s) => Ok(ValueWrapper::Simple(Literal::String(s.to_string()))),
            TokenKind::Number(raw) => Ok(ValueWrapper::Simple(Self::number(raw, Sign::Plus, token.span)?)),
            TokenKind::Dash | TokenKind::Plus => {
                let sign = if token.kind == TokenKind::Dash { Sign::Minus } else { Sign::Plus };
                let number_token = self.next_or_error("a number")?;
                match &number_token.kind {
                    TokenKind::Number(raw) => {
                        Ok(ValueWrapper::Simple(Self::number(raw, sign, number_token.span)?))
                    }
                    _ => Err(Self::error_at(number_token, "a number")),
                }
            }
            TokenKind::Identifier(name) => {
                if self.match_token(&TokenKind::LParen) {
                    self.parse_sentinel(token, name)
                } else {
                    // 不带引号的字符串
                    Ok(ValueWrapper::Simple(Literal::String(name.to_string())))
                }
            }
            _ => Err(Self::error_at(token, EXPECTED)),
        }
    }

    fn number(raw: &str, sign: Sign, span: Span) -> Result<Literal, QueryError> {
        let signed = match sign {
            Sign::Plus => raw.to_string(),
            Sign::Minus => format!("-{raw}"),
        };
        let number = Number::parse(signed.as_str()).map(Literal::Number);
        number.ok_or_else(|| SyntaxError::new(span, "a number within range", format!("number {signed}")).into())
    }

    /// `NOW()`, `MYSELF()`, `OPEN()` 以及它们的别名
    fn parse_sentinel(&mut self, name_token: &Token<'_>, name: &str) -> Result<ValueWrapper, QueryError> {
        match name.to_ascii_lowercase().as_str() {
            "now" | "current_datetime" => {
                self.advance(); // 消费 (
                let inner = if self.match_token(&TokenKind::RParen) {
                    None
                } else {
                    Some(self.parse_period_offset(true)?)
                };
                self.expect(TokenKind::RParen, "`)`")?;

                let trailing = if self.match_token(&TokenKind::Dash) || self.match_token(&TokenKind::Plus) {
                    Some(self.parse_period_offset(false)?)
                } else {
                    None
                };
                if inner.is_some() && trailing.is_some() {
                    return Err(self.error_here("a single period offset"));
                }
                Ok(ValueWrapper::CurrentDateTime(inner.or(trailing)))
            }
            "myself" | "current_user" => {
                self.advance(); // 消费 (
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(ValueWrapper::CurrentUser)
            }
            "open" | "status" => {
                self.advance(); // 消费 (
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(ValueWrapper::StatusOpen)
            }
            _ => Err(Self::error_at(name_token, "NOW(), MYSELF() or OPEN()")),
        }
    }

    /// 语法: `[+|-] INTEGER (d|w|m|y)`, 括号外的偏移必须带符号
    fn parse_period_offset(&mut self, sign_optional: bool) -> Result<PeriodOffset, QueryError> {
        let sign = if self.match_token(&TokenKind::Dash) {
            self.advance();
            Sign::Minus
        } else if self.match_token(&TokenKind::Plus) {
            self.advance();
            Sign::Plus
        } else if sign_optional {
            Sign::Plus
        } else {
            return Err(self.error_here("`+` or `-`"));
        };

        let amount_token = self.next_or_error("a period such as 1d, 2w, 3m or 1y")?;
        let amount = match &amount_token.kind {
            TokenKind::Number(raw) => raw.parse::<u32>().ok(),
            _ => None,
        }
        .ok_or_else(|| Self::error_at(amount_token, "a whole number of days, weeks, months or years"))?;

        let unit_token = self.next_or_error("a period unit (d, w, m or y)")?;
        let unit = match &unit_token.kind {
            TokenKind::Identifier(unit) => match unit.to_ascii_lowercase().as_str() {
                "d" => Some(PeriodUnit::Day),
                "w" => Some(PeriodUnit::Week),
                "m" => Some(PeriodUnit::Month),
                "y" => Some(PeriodUnit::Year),
                _ => None,
            },
            _ => None,
        }
        .ok_or_else(|| Self::error_at(unit_token, "a period unit (d, w, m or y)"))?;

        Ok(PeriodOffset { sign, amount, unit })
    }
}
