//! 专家查询的 AST
//!
//! 表达式树对比较节点是泛型的: 语法分析器产出 `Expression` (叶子为 [`Comparison`]),
//! 语义校验器用 [`OrExpression::try_map`] 产出同样形状、叶子已解析的树。

use std::fmt;

use crate::error::QueryError;

/// AST 的根节点, 代表一个完整的查询语句
pub type Expression = OrExpression<Comparison>;

/// `a OR b OR c`, 至少包含一个 AND 链
#[derive(Debug, Clone, PartialEq)]
pub struct OrExpression<C = Comparison> {
    pub head: AndExpression<C>,
    pub tail: Vec<AndExpression<C>>,
}

/// `x AND y AND z`, 至少包含一个 Term
#[derive(Debug, Clone, PartialEq)]
pub struct AndExpression<C = Comparison> {
    pub head: Term<C>,
    pub tail: Vec<Term<C>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term<C = Comparison> {
    Comparison(C),
    /// 使用括号分组的表达式
    Parenthesis(Box<OrExpression<C>>),
}

impl<C> OrExpression<C> {
    pub fn new(head: AndExpression<C>, tail: Vec<AndExpression<C>>) -> Self {
        Self { head, tail }
    }

    pub fn operands(&self) -> impl Iterator<Item = &AndExpression<C>> {
        std::iter::once(&self.head).chain(self.tail.iter())
    }

    /// Rebuilds the same tree with every comparison replaced by `f(comparison)`.
    pub fn try_map<D, E>(&self, f: &mut impl FnMut(&C) -> Result<D, E>) -> Result<OrExpression<D>, E> {
        Ok(OrExpression {
            head: self.head.try_map(f)?,
            tail: self.tail.iter().map(|and| and.try_map(f)).collect::<Result<_, _>>()?,
        })
    }

    /// Comparisons in depth-first, left-to-right order.
    pub fn comparisons(&self) -> Vec<&C> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a C>) {
        for and in self.operands() {
            for term in and.operands() {
                match term {
                    Term::Comparison(comparison) => out.push(comparison),
                    Term::Parenthesis(inner) => inner.collect_comparisons(out),
                }
            }
        }
    }
}

impl<C> AndExpression<C> {
    pub fn new(head: Term<C>, tail: Vec<Term<C>>) -> Self {
        Self { head, tail }
    }

    pub fn operands(&self) -> impl Iterator<Item = &Term<C>> {
        std::iter::once(&self.head).chain(self.tail.iter())
    }

    fn try_map<D, E>(&self, f: &mut impl FnMut(&C) -> Result<D, E>) -> Result<AndExpression<D>, E> {
        Ok(AndExpression {
            head: self.head.try_map(f)?,
            tail: self.tail.iter().map(|term| term.try_map(f)).collect::<Result<_, _>>()?,
        })
    }
}

impl<C> Term<C> {
    fn try_map<D, E>(&self, f: &mut impl FnMut(&C) -> Result<D, E>) -> Result<Term<D>, E> {
        Ok(match self {
            Term::Comparison(comparison) => Term::Comparison(f(comparison)?),
            Term::Parenthesis(inner) => Term::Parenthesis(Box::new(inner.try_map(f)?)),
        })
    }
}

/// 比较节点在查询内的稳定编号 (深度优先顺序), 用于生成 SQL 表别名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComparisonId(pub u32);

impl fmt::Display for ComparisonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 基础比较运算, 这是表达式的叶子节点
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    id: ComparisonId,
    searchable: Searchable,
    operator: Operator,
    value: ValueWrapper,
}

impl Comparison {
    /// `Between` 必须搭配 `ValueWrapper::Between`, `In`/`NotIn` 必须搭配 `ValueWrapper::In`
    pub fn new(
        id: ComparisonId,
        searchable: Searchable,
        operator: Operator,
        value: ValueWrapper,
    ) -> Result<Self, QueryError> {
        let shape_ok = match operator {
            Operator::Between => matches!(value, ValueWrapper::Between(..)),
            Operator::In | Operator::NotIn => matches!(value, ValueWrapper::In(_)),
            _ => !matches!(value, ValueWrapper::Between(..) | ValueWrapper::In(_)),
        };
        let comparison = Self { id, searchable, operator, value };
        if shape_ok {
            Ok(comparison)
        } else {
            Err(QueryError::semantic(
                &comparison,
                format!("{} cannot be used with this value", comparison.operator),
            ))
        }
    }

    pub fn id(&self) -> ComparisonId {
        self.id
    }

    pub fn searchable(&self) -> &Searchable {
        &self.searchable
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &ValueWrapper {
        &self.value
    }
}

/// 比较左侧: 字段名或者 `@` 开头的内置元数据
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Searchable {
    Field(String),
    Metadata(String),
}

impl Searchable {
    pub fn name(&self) -> &str {
        match self {
            Searchable::Field(name) | Searchable::Metadata(name) => name,
        }
    }
}

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,              // =
    NotEqual,           // !=
    LesserThan,         // <
    LesserThanOrEqual,  // <=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=
    In,                 // IN(...)
    NotIn,              // NOT IN(...)
    Between,            // BETWEEN(min, max)
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::LesserThan,
        Operator::LesserThanOrEqual,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::In,
        Operator::NotIn,
        Operator::Between,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LesserThan => "<",
            Operator::LesserThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
        }
    }
}

/// 比较右侧的值
#[derive(Debug, Clone, PartialEq)]
pub enum ValueWrapper {
    Simple(Literal),
    /// IN (...) 的成员, 只允许 `Simple` 和 `CurrentUser`
    In(Vec<ValueWrapper>),
    Between(Box<ValueWrapper>, Box<ValueWrapper>),
    /// `NOW()`, 可带偏移, 例如 `NOW() - 1w`
    CurrentDateTime(Option<PeriodOffset>),
    /// `MYSELF()`
    CurrentUser,
    /// `OPEN()`
    StatusOpen,
}

impl ValueWrapper {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ValueWrapper::Simple(_) => "simple value",
            ValueWrapper::In(_) => "IN list",
            ValueWrapper::Between(..) => "BETWEEN range",
            ValueWrapper::CurrentDateTime(_) => "NOW()",
            ValueWrapper::CurrentUser => "MYSELF()",
            ValueWrapper::StatusOpen => "OPEN()",
        }
    }

    pub fn is_empty_string(&self) -> bool {
        matches!(self, ValueWrapper::Simple(Literal::String(s)) if s.is_empty())
    }
}

/// 字面量值
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(Number),
}

impl Literal {
    pub fn integer(n: i64) -> Self {
        Literal::Number(Number {
            raw: n.to_string(),
            value: NumericValue::Integer(n),
        })
    }

    pub fn float(x: f64) -> Self {
        let text = x.to_string();
        let raw = if text.contains('.') { text } else { format!("{text}.0") };
        Literal::Number(Number {
            raw,
            value: NumericValue::Float(x),
        })
    }

    /// The literal as the user typed it, numbers included.
    pub fn as_text(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Number(number) => number.raw.clone(),
        }
    }
}

/// 数字字面量: 保留输入原文 (例如 `007`, `1.10`), 数值字段使用解析后的值
#[derive(Debug, Clone, PartialEq)]
pub struct Number {
    raw: String,
    value: NumericValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    Integer(i64),
    Float(f64),
}

impl Number {
    /// `raw` 是带可选负号的十进制数字, 超出范围时返回 `None`
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let value = if raw.contains('.') {
            NumericValue::Float(raw.parse::<f64>().ok().filter(|x| x.is_finite())?)
        } else {
            NumericValue::Integer(raw.parse::<i64>().ok()?)
        };
        Some(Self { raw, value })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn value(&self) -> NumericValue {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

/// `NOW()` 的偏移量, 例如 `- 3d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodOffset {
    pub sign: Sign,
    pub amount: u32,
    pub unit: PeriodUnit,
}

// ---------------------------------------------------------------------------
// 序列化回查询文本, 重新解析后得到相同的 AST

impl<C: fmt::Display> fmt::Display for OrExpression<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for and in &self.tail {
            write!(f, " OR {and}")?;
        }
        Ok(())
    }
}

impl<C: fmt::Display> fmt::Display for AndExpression<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for term in &self.tail {
            write!(f, " AND {term}")?;
        }
        Ok(())
    }
}

impl<C: fmt::Display> fmt::Display for Term<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Comparison(comparison) => write!(f, "{comparison}"),
            Term::Parenthesis(inner) => write!(f, "({inner})"),
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.operator, &self.value) {
            (Operator::In | Operator::NotIn | Operator::Between, value) => {
                write!(f, "{} {}{}", self.searchable, self.operator, value)
            }
            (operator, value) => write!(f, "{} {} {}", self.searchable, operator, value),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for Searchable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Searchable::Metadata(name) => write!(f, "@{name}"),
            Searchable::Field(name) if is_bare_identifier(name) => f.write_str(name),
            Searchable::Field(name) => write_quoted(f, name),
        }
    }
}

impl fmt::Display for ValueWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueWrapper::Simple(literal) => write!(f, "{literal}"),
            ValueWrapper::In(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            ValueWrapper::Between(min, max) => write!(f, "({min}, {max})"),
            ValueWrapper::CurrentDateTime(None) => f.write_str("NOW()"),
            ValueWrapper::CurrentDateTime(Some(offset)) => write!(f, "NOW() {offset}"),
            ValueWrapper::CurrentUser => f.write_str("MYSELF()"),
            ValueWrapper::StatusOpen => f.write_str("OPEN()"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write_quoted(f, s),
            Literal::Number(number) => f.write_str(&number.raw),
        }
    }
}

impl fmt::Display for PeriodOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.sign {
            Sign::Plus => '+',
            Sign::Minus => '-',
        };
        let unit = match self.unit {
            PeriodUnit::Day => 'd',
            PeriodUnit::Week => 'w',
            PeriodUnit::Month => 'm',
            PeriodUnit::Year => 'y',
        };
        write!(f, "{sign} {}{unit}", self.amount)
    }
}

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !matches!(
            name.to_ascii_lowercase().as_str(),
            "and" | "or" | "not" | "in" | "between"
        )
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}
