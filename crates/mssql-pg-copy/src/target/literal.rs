//! SQL literal rendering for multi-row INSERT statements.

use super::SqlValue;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Escape a string for use inside single quotes.
pub fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn quoted(s: &str) -> String {
    format!("'{}'", escape_sql_string(s))
}

fn float_literal(n: f64, text: String) -> String {
    if n.is_nan() {
        "'NaN'".to_string()
    } else if n.is_infinite() && n > 0.0 {
        "'Infinity'".to_string()
    } else if n.is_infinite() {
        "'-Infinity'".to_string()
    } else {
        text
    }
}

/// Render a value as a PostgreSQL literal.
///
/// Output never depends on the process locale. Every value has a rendering.
pub fn sql_value_to_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null(_) => "null".to_string(),
        SqlValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        SqlValue::DateTime(dt) => format!("'{}'", dt.format(TIMESTAMP_FORMAT)),
        SqlValue::DateTimeOffset(dt) => {
            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f%:z"))
        }
        SqlValue::Date(d) => match d.and_hms_opt(0, 0, 0) {
            Some(midnight) => format!("'{}'", midnight.format(TIMESTAMP_FORMAT)),
            None => quoted(&d.to_string()),
        },
        SqlValue::Time(t) => format!("'{}'", t.format(TIME_FORMAT)),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => float_literal(f64::from(*n), n.to_string()),
        SqlValue::F64(n) => float_literal(*n, n.to_string()),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Bytes(b) => format!("'\\x{}'", hex::encode(b)),
        SqlValue::Uuid(u) => quoted(&u.to_string()),
        SqlValue::String(s) | SqlValue::Other(s) => quoted(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::SqlNullType;
    use chrono::{FixedOffset, NaiveDate, NaiveTime, TimeZone};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_null_and_bool() {
        assert_eq!(sql_value_to_literal(&SqlValue::Null(SqlNullType::I32)), "null");
        assert_eq!(sql_value_to_literal(&SqlValue::Null(SqlNullType::String)), "null");
        assert_eq!(sql_value_to_literal(&SqlValue::Bool(true)), "true");
        assert_eq!(sql_value_to_literal(&SqlValue::Bool(false)), "false");
    }

    #[test]
    fn test_temporal_formats() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(14, 5, 7, 42)
            .unwrap();
        assert_eq!(
            sql_value_to_literal(&SqlValue::DateTime(dt)),
            "'2024-03-09 14:05:07.042'"
        );

        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        assert_eq!(
            sql_value_to_literal(&SqlValue::Date(date)),
            "'1999-12-31 00:00:00.000'"
        );

        let time = NaiveTime::from_hms_milli_opt(23, 59, 58, 500).unwrap();
        assert_eq!(sql_value_to_literal(&SqlValue::Time(time)), "'23:59:58.500'");

        let offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();
        let dto = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            sql_value_to_literal(&SqlValue::DateTimeOffset(dto)),
            "'2024-01-02 03:04:05.000+05:30'"
        );
    }

    #[test]
    fn test_numeric_is_unquoted_with_period() {
        assert_eq!(sql_value_to_literal(&SqlValue::I16(-7)), "-7");
        assert_eq!(sql_value_to_literal(&SqlValue::I64(9_000_000_000)), "9000000000");
        assert_eq!(sql_value_to_literal(&SqlValue::F64(1234.5)), "1234.5");
        assert_eq!(sql_value_to_literal(&SqlValue::F32(0.25)), "0.25");
        let d = Decimal::from_str("19.9900").unwrap();
        assert_eq!(sql_value_to_literal(&SqlValue::Decimal(d)), "19.9900");
    }

    #[test]
    fn test_non_finite_floats_are_quoted() {
        assert_eq!(sql_value_to_literal(&SqlValue::F64(f64::NAN)), "'NaN'");
        assert_eq!(sql_value_to_literal(&SqlValue::F64(f64::INFINITY)), "'Infinity'");
        assert_eq!(
            sql_value_to_literal(&SqlValue::F32(f32::NEG_INFINITY)),
            "'-Infinity'"
        );
    }

    #[test]
    fn test_text_doubles_quotes_only() {
        assert_eq!(
            sql_value_to_literal(&SqlValue::String("O'Brien".into())),
            "'O''Brien'"
        );
        assert_eq!(
            sql_value_to_literal(&SqlValue::String("a\\b\tc".into())),
            "'a\\b\tc'"
        );
        assert_eq!(
            sql_value_to_literal(&SqlValue::Other("POINT (1 2)".into())),
            "'POINT (1 2)'"
        );
    }

    #[test]
    fn test_bytes_and_uuid() {
        assert_eq!(
            sql_value_to_literal(&SqlValue::Bytes(vec![0xde, 0xad, 0x01])),
            "'\\xdead01'"
        );
        let u = uuid::Uuid::from_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        assert_eq!(
            sql_value_to_literal(&SqlValue::Uuid(u)),
            "'6f9619ff-8b86-d011-b42d-00c04fc964ff'"
        );
    }
}
