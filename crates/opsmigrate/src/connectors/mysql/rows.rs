//! Conversions between MySQL protocol values and [`SqlValue`].

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use mysql_async::Value;

use crate::core::SqlValue;

/// Convert a binary-protocol value to a [`SqlValue`].
///
/// Zero dates and TIME values outside 00:00:00..24:00:00 have no chrono
/// equivalent and are carried as text, which MySQL parses back on insert.
pub fn from_mysql(value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Bytes(b) => SqlValue::Bytes(b),
        Value::Int(i) => SqlValue::I64(i),
        Value::UInt(u) => SqlValue::U64(u),
        Value::Float(f) => SqlValue::F32(f),
        Value::Double(d) => SqlValue::F64(d),
        Value::Date(y, mo, d, h, mi, s, us) => NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32)
            .and_then(|date| date.and_hms_micro_opt(h as u32, mi as u32, s as u32, us))
            .map(SqlValue::DateTime)
            .unwrap_or_else(|| {
                SqlValue::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                    y, mo, d, h, mi, s, us
                ))
            }),
        Value::Time(negative, days, h, mi, s, us) => {
            if !negative && days == 0 {
                if let Some(t) = NaiveTime::from_hms_micro_opt(h as u32, mi as u32, s as u32, us) {
                    return SqlValue::Time(t);
                }
            }
            let hours = days * 24 + h as u32;
            SqlValue::Text(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                if negative { "-" } else { "" },
                hours,
                mi,
                s,
                us
            ))
        }
    }
}

/// Convert a [`SqlValue`] to a MySQL parameter.
pub fn to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::I64(i) => Value::Int(*i),
        SqlValue::U64(u) => Value::UInt(*u),
        SqlValue::F32(f) => Value::Float(*f),
        SqlValue::F64(d) => Value::Double(*d),
        SqlValue::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        SqlValue::DateTime(dt) => Value::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
    }
}

/// Key of `row` at `key_idx`, if it can bound a keyset page.
///
/// Floats do not compare reliably after a round trip and NULL never
/// compares, so either one means the next page must use an offset.
pub fn seek_key(row: &[SqlValue], key_idx: &[usize]) -> Option<Vec<SqlValue>> {
    if key_idx.is_empty() {
        return None;
    }
    key_idx
        .iter()
        .map(|&i| match row.get(i)? {
            SqlValue::Null | SqlValue::F32(_) | SqlValue::F64(_) => None,
            value => Some(value.clone()),
        })
        .collect()
}
