//! Runtime values seen by domain expressions.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::TypeMismatch;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identity of a record supplied by the record provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        RecordId(id as i64)
    }
}

/// A scalar field value or a handle to a related record.
///
/// In JSON, scalars map to their natural representation; dates, datetimes
/// and references use a one-key object (`{"date": "2024-01-31"}`,
/// `{"datetime": "2024-01-31 08:00:00"}`, `{"ref": 42}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ValueRepr", into = "ValueRepr")]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without timezone.
    DateTime(NaiveDateTime),
    /// Handle to a related record (many-to-one).
    Ref(RecordId),
}

/// The semantic type of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Date,
    DateTime,
    Ref,
}

impl ValueKind {
    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Int => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Date => "date",
            ValueKind::DateTime => "datetime",
            ValueKind::Ref => "reference",
        }
    }

    /// Check whether a literal can be compared against values of this kind.
    pub fn accepts(self, literal: &Value) -> bool {
        match (self, literal) {
            (_, Value::Null) | (ValueKind::Null, _) => true,
            (ValueKind::Int | ValueKind::Float, Value::Int(_) | Value::Float(_)) => true,
            (ValueKind::Ref, Value::Int(_) | Value::Ref(_)) => true,
            (ValueKind::Int, Value::Ref(_)) => true,
            (ValueKind::Bool, Value::Bool(_)) => true,
            (ValueKind::String, Value::String(_)) => true,
            (ValueKind::Date | ValueKind::DateTime, Value::Date(_) | Value::DateTime(_)) => true,
            (ValueKind::Date | ValueKind::DateTime, Value::String(s)) => parse_datetime(s).is_some(),
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the semantic type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
            Value::Ref(_) => ValueKind::Ref,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a record id. Integers are accepted as ids.
    pub fn as_record_id(&self) -> Option<RecordId> {
        match self {
            Value::Ref(id) => Some(*id),
            Value::Int(i) => Some(RecordId(*i)),
            _ => None,
        }
    }

    /// Compare this value with another under the semantic type of `self`.
    ///
    /// Returns `Ok(None)` when either side is null, since absent values have
    /// no position in the ordering.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>, TypeMismatch> {
        let mismatch = || TypeMismatch::new(self.kind(), other.kind());

        let ordering = match (self, other) {
            (Value::Null, _) | (_, Value::Null) => return Ok(None),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).ok_or_else(mismatch)?,
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b).ok_or_else(mismatch)?,
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(mismatch)?,
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Ref(a), Value::Int(b)) => a.0.cmp(b),
            (Value::Int(a), Value::Ref(b)) => a.cmp(&b.0),
            (Value::Date(_) | Value::DateTime(_), _) | (_, Value::Date(_) | Value::DateTime(_)) => {
                let left = self.as_datetime().ok_or_else(mismatch)?;
                let right = other.as_datetime().ok_or_else(mismatch)?;
                left.cmp(&right)
            }
            _ => return Err(mismatch()),
        };

        Ok(Some(ordering))
    }

    /// Equality under the semantic type of `self`. Null equals only null.
    pub fn equals(&self, other: &Value) -> Result<bool, TypeMismatch> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Null, _) | (_, Value::Null) => Ok(false),
            _ => Ok(self.compare(other)? == Some(Ordering::Equal)),
        }
    }

    /// The form this value takes as a domain literal.
    ///
    /// References become their integer id and temporal values become their
    /// quoted text, so a literal always prints as text the parser reads back.
    pub fn into_literal(self) -> Value {
        match self {
            Value::Ref(id) => Value::Int(id.0),
            Value::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            other => other,
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            Value::DateTime(dt) => Some(*dt),
            Value::String(s) => parse_datetime(s),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write_quoted(f, s),
            Value::Date(d) => write_quoted(f, &d.format(DATE_FORMAT).to_string()),
            Value::DateTime(dt) => write_quoted(f, &dt.format(DATETIME_FORMAT).to_string()),
            Value::Ref(id) => write!(f, "{}", id),
        }
    }
}

/// Write a single-quoted string literal, escaping quotes and control characters.
pub(crate) fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in s.chars() {
        match c {
            '\'' => f.write_str("\\'")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    f.write_str("'")
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<RecordId> for Value {
    fn from(v: RecordId) -> Self {
        Value::Ref(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

/// JSON shape of [`Value`].
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ValueRepr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date {
        date: NaiveDate,
    },
    DateTime {
        #[serde(with = "datetime_format")]
        datetime: NaiveDateTime,
    },
    Ref {
        #[serde(rename = "ref")]
        id: RecordId,
    },
}

impl From<ValueRepr> for Value {
    fn from(repr: ValueRepr) -> Self {
        match repr {
            ValueRepr::Null => Value::Null,
            ValueRepr::Bool(b) => Value::Bool(b),
            ValueRepr::Int(i) => Value::Int(i),
            ValueRepr::Float(f) => Value::Float(f),
            ValueRepr::String(s) => Value::String(s),
            ValueRepr::Date { date } => Value::Date(date),
            ValueRepr::DateTime { datetime } => Value::DateTime(datetime),
            ValueRepr::Ref { id } => Value::Ref(id),
        }
    }
}

impl From<Value> for ValueRepr {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ValueRepr::Null,
            Value::Bool(b) => ValueRepr::Bool(b),
            Value::Int(i) => ValueRepr::Int(i),
            Value::Float(f) => ValueRepr::Float(f),
            Value::String(s) => ValueRepr::String(s),
            Value::Date(date) => ValueRepr::Date { date },
            Value::DateTime(datetime) => ValueRepr::DateTime { datetime },
            Value::Ref(id) => ValueRepr::Ref { id },
        }
    }
}

mod datetime_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format(super::DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, super::DATETIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_numeric_comparison_mixes_int_and_float() {
        assert_eq!(Value::Int(3).compare(&Value::Float(2.5)).unwrap(), Some(Ordering::Greater));
        assert!(Value::Float(42.0).equals(&Value::Int(42)).unwrap());
    }

    #[test]
    fn test_reference_compares_as_id() {
        assert!(Value::Ref(RecordId(42)).equals(&Value::Int(42)).unwrap());
        assert!(!Value::Ref(RecordId(7)).equals(&Value::Int(42)).unwrap());
    }

    #[test]
    fn test_date_compares_with_string_literal() {
        let d = date(2024, 3, 1);
        assert_eq!(d.compare(&Value::from("2024-02-28")).unwrap(), Some(Ordering::Greater));
        assert!(d.equals(&Value::from("2024-03-01")).unwrap());
        assert!(d.compare(&Value::from("March")).is_err());
    }

    #[test]
    fn test_mismatched_types_fail() {
        let err = Value::Int(1).compare(&Value::from("1")).unwrap_err();
        assert_eq!(err.left, ValueKind::Int);
        assert_eq!(err.right, ValueKind::String);
        assert!(Value::Bool(true).equals(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_null_semantics() {
        assert_eq!(Value::Null.compare(&Value::Int(1)).unwrap(), None);
        assert!(Value::Null.equals(&Value::Null).unwrap());
        assert!(!Value::from("x").equals(&Value::Null).unwrap());
    }

    #[test]
    fn test_kind_accepts_literals() {
        assert!(ValueKind::Float.accepts(&Value::Int(0)));
        assert!(ValueKind::Date.accepts(&Value::from("2024-01-31")));
        assert!(!ValueKind::Date.accepts(&Value::from("yesterday")));
        assert!(!ValueKind::String.accepts(&Value::Int(3)));
        assert!(ValueKind::Ref.accepts(&Value::Int(3)));
    }

    #[test]
    fn test_display_quotes_strings() {
        assert_eq!(Value::from("it's").to_string(), r"'it\'s'");
        assert_eq!(Value::Float(100.0).to_string(), "100.0");
        assert_eq!(Value::Null.to_string(), "None");
    }
}
