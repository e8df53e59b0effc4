//! Resolution of value wrappers into bindable values.
//!
//! Builders match on [`ValueWrapper`] themselves; this module holds the
//! request-scoped parameters and the conversions several builders share.

use chrono::{
    DateTime, FixedOffset, Months, NaiveDate, NaiveDateTime, Offset, TimeDelta, Timelike, Utc,
};
use sea_query::Value;

use crate::ast::{Comparison, Literal, NumericValue, PeriodOffset, PeriodUnit, Sign, ValueWrapper};
use crate::error::QueryError;

/// Request-scoped context the sentinels resolve against.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueWrapperParameters {
    pub current_user_id: i64,
    pub now: DateTime<Utc>,
    /// Day boundaries of date literals are computed in this timezone.
    pub timezone: FixedOffset,
}

impl ValueWrapperParameters {
    pub fn new(current_user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            current_user_id,
            now,
            timezone: Utc.fix(),
        }
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now.with_timezone(&self.timezone).naive_local()
    }

    fn timestamp(&self, local: NaiveDateTime) -> i64 {
        local.and_utc().timestamp() - i64::from(self.timezone.local_minus_utc())
    }
}

/// Inclusive unix timestamp interval a date value stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampRange {
    pub start: i64,
    pub end: i64,
}

/// Parses `YYYY-MM-DD`, `YYYY-MM-DD HH:MM` or `YYYY-MM-DD HH:MM:SS`.
/// The flag tells whether a time part was given.
pub fn parse_date_literal(text: &str) -> Option<(NaiveDateTime, bool)> {
    let text = text.trim();
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some((date.and_hms_opt(0, 0, 0)?, false));
    }
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|datetime| (datetime, true))
}

fn day_range(local: NaiveDateTime, parameters: &ValueWrapperParameters) -> Option<TimestampRange> {
    let start = parameters.timestamp(local.date().and_hms_opt(0, 0, 0)?);
    Some(TimestampRange {
        start,
        end: start + 86_399,
    })
}

fn minute_range(local: NaiveDateTime, parameters: &ValueWrapperParameters) -> Option<TimestampRange> {
    let start = parameters.timestamp(local.with_second(0)?.with_nanosecond(0)?);
    Some(TimestampRange {
        start,
        end: start + 59,
    })
}

fn shift(local: NaiveDateTime, offset: &PeriodOffset) -> Option<NaiveDateTime> {
    let amount = offset.amount;
    match offset.unit {
        PeriodUnit::Day | PeriodUnit::Week => {
            let days = i64::from(amount) * if offset.unit == PeriodUnit::Week { 7 } else { 1 };
            let delta = TimeDelta::try_days(days)?;
            match offset.sign {
                Sign::Plus => local.checked_add_signed(delta),
                Sign::Minus => local.checked_sub_signed(delta),
            }
        }
        PeriodUnit::Month | PeriodUnit::Year => {
            let months = if offset.unit == PeriodUnit::Year {
                amount.checked_mul(12)?
            } else {
                amount
            };
            match offset.sign {
                Sign::Plus => local.checked_add_months(Months::new(months)),
                Sign::Minus => local.checked_sub_months(Months::new(months)),
            }
        }
    }
}

/// Resolves one date operand. `with_time` is true for backends storing a
/// time of day: literals with a time then stand for their minute and `NOW()`
/// for the current minute, otherwise everything stands for a whole day.
pub fn resolve_date(
    comparison: &Comparison,
    value: &ValueWrapper,
    parameters: &ValueWrapperParameters,
    with_time: bool,
) -> Result<TimestampRange, QueryError> {
    let range = match value {
        ValueWrapper::Simple(Literal::String(text)) => {
            let (local, has_time) = parse_date_literal(text).ok_or_else(|| {
                QueryError::semantic(comparison, format!("'{text}' is not a valid date"))
            })?;
            if with_time && has_time {
                minute_range(local, parameters)
            } else {
                day_range(local, parameters)
            }
        }
        ValueWrapper::Simple(literal) => {
            return Err(QueryError::semantic(
                comparison,
                format!("'{}' is not a valid date", literal.as_text()),
            ))
        }
        ValueWrapper::CurrentDateTime(offset) => {
            let local = match offset {
                Some(offset) => shift(parameters.local_now(), offset),
                None => Some(parameters.local_now()),
            };
            local.and_then(|local| {
                if with_time {
                    minute_range(local, parameters)
                } else {
                    day_range(local, parameters)
                }
            })
        }
        ValueWrapper::In(_)
        | ValueWrapper::Between(..)
        | ValueWrapper::CurrentUser
        | ValueWrapper::StatusOpen => return Err(unsupported(value, "a date")),
    };
    range.ok_or_else(|| QueryError::semantic(comparison, "the date is out of the supported range"))
}

/// Integer literals bind as BIGINT, decimals as DOUBLE; numeric strings are accepted.
pub fn numeric_bind_value(literal: &Literal) -> Option<Value> {
    match literal {
        Literal::Number(number) => Some(match number.value() {
            NumericValue::Integer(n) => Value::BigInt(Some(n)),
            NumericValue::Float(x) => Value::Double(Some(x)),
        }),
        Literal::String(text) => {
            let text = text.trim();
            if let Ok(n) = text.parse::<i64>() {
                Some(Value::BigInt(Some(n)))
            } else {
                text.parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .map(|x| Value::Double(Some(x)))
            }
        }
    }
}

pub fn integer_value(literal: &Literal) -> Option<i64> {
    match literal {
        Literal::Number(number) => match number.value() {
            NumericValue::Integer(n) => Some(n),
            NumericValue::Float(_) => None,
        },
        Literal::String(text) => text.trim().parse().ok(),
    }
}

/// `%text%` with the LIKE wildcards of the user input escaped.
pub fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Guard for wrappers a builder has no meaning for.
pub fn unsupported(value: &ValueWrapper, context: &'static str) -> QueryError {
    QueryError::UnsupportedValueWrapper {
        wrapper: value.kind_name(),
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ComparisonId, Number, Operator, Searchable};
    use chrono::TimeZone;

    fn parameters() -> ValueWrapperParameters {
        // 2024-03-15 10:42:17 UTC
        ValueWrapperParameters::new(101, Utc.with_ymd_and_hms(2024, 3, 15, 10, 42, 17).unwrap())
    }

    fn comparison(value: ValueWrapper) -> Comparison {
        Comparison::new(
            ComparisonId(0),
            Searchable::Field("due".into()),
            Operator::Equal,
            value,
        )
        .unwrap()
    }

    fn resolve(value: ValueWrapper, with_time: bool) -> Result<TimestampRange, QueryError> {
        let comparison = comparison(value.clone());
        resolve_date(&comparison, &value, &parameters(), with_time)
    }

    #[test]
    fn test_date_literal_is_a_whole_day() {
        let range = resolve(ValueWrapper::Simple(Literal::String("2024-03-01".into())), false).unwrap();
        assert_eq!(range.start, 1_709_251_200);
        assert_eq!(range.end, 1_709_251_200 + 86_399);
    }

    #[test]
    fn test_datetime_literal_is_a_minute_only_when_backend_has_time() {
        let value = ValueWrapper::Simple(Literal::String("2024-03-01 13:30".into()));
        let minute = resolve(value.clone(), true).unwrap();
        assert_eq!(minute.start, 1_709_251_200 + 13 * 3600 + 30 * 60);
        assert_eq!(minute.end - minute.start, 59);

        let day = resolve(value, false).unwrap();
        assert_eq!(day.start, 1_709_251_200);
    }

    #[test]
    fn test_timezone_moves_day_boundaries() {
        let comparison = comparison(ValueWrapper::Simple(Literal::String("2024-03-01".into())));
        let parameters = parameters().with_timezone(FixedOffset::east_opt(3600).unwrap());
        let range = resolve_date(&comparison, comparison.value(), &parameters, false).unwrap();
        assert_eq!(range.start, 1_709_251_200 - 3600);
    }

    #[test]
    fn test_now_with_offsets() {
        let today = resolve(ValueWrapper::CurrentDateTime(None), false).unwrap();
        assert_eq!(today.start, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap().timestamp());

        let week_ago = resolve(
            ValueWrapper::CurrentDateTime(Some(PeriodOffset {
                sign: Sign::Minus,
                amount: 1,
                unit: PeriodUnit::Week,
            })),
            false,
        )
        .unwrap();
        assert_eq!(week_ago.start, Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap().timestamp());

        let next_month = resolve(
            ValueWrapper::CurrentDateTime(Some(PeriodOffset {
                sign: Sign::Plus,
                amount: 1,
                unit: PeriodUnit::Month,
            })),
            true,
        )
        .unwrap();
        assert_eq!(
            next_month.start,
            Utc.with_ymd_and_hms(2024, 4, 15, 10, 42, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_invalid_dates() {
        assert!(matches!(
            resolve(ValueWrapper::Simple(Literal::String("2024-13-01".into())), false),
            Err(QueryError::Semantic { .. })
        ));
        assert!(matches!(
            resolve(ValueWrapper::Simple(Literal::integer(20240101)), false),
            Err(QueryError::Semantic { .. })
        ));
        assert!(matches!(
            resolve(ValueWrapper::CurrentUser, false),
            Err(QueryError::UnsupportedValueWrapper { wrapper: "MYSELF()", .. })
        ));
    }

    #[test]
    fn test_numeric_bind_values() {
        assert_eq!(numeric_bind_value(&Literal::integer(3)), Some(Value::BigInt(Some(3))));
        assert_eq!(numeric_bind_value(&Literal::float(2.5)), Some(Value::Double(Some(2.5))));
        assert_eq!(
            numeric_bind_value(&Literal::Number(Number::parse("007").unwrap())),
            Some(Value::BigInt(Some(7)))
        );
        assert_eq!(
            numeric_bind_value(&Literal::String(" 12 ".into())),
            Some(Value::BigInt(Some(12)))
        );
        assert_eq!(numeric_bind_value(&Literal::String("twelve".into())), None);
        assert_eq!(numeric_bind_value(&Literal::String("inf".into())), None);
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        assert_eq!(contains_pattern("' OR 1=1 --"), "%' OR 1=1 --%");
    }
}
