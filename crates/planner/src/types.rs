//! Scalar type system shared by the schema model and the expression engine.
//!
//! Conversion tables here are constant data: the consistent-type rules, the
//! category of each type and the attribute-category mapping never change at
//! runtime.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use fxq_common::{FxqError, Result};
use fxq_metadata::AttributeType;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Static type of a column or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Boolean,
    Int32,
    Int64,
    Decimal,
    /// 32-bit floating point (`real`).
    Float,
    /// 64-bit floating point (`float`).
    Double,
    Text,
    Guid,
    DateTime,
    /// Type of the `NULL` literal; unifies with anything.
    Unknown,
}

/// Coarse grouping used by arithmetic legality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    ExactNumeric,
    ApproximateNumeric,
    CharacterString,
    DateTime,
    Other,
}

impl ScalarType {
    pub fn category(self) -> TypeCategory {
        match self {
            Self::Boolean | Self::Int32 | Self::Int64 | Self::Decimal => TypeCategory::ExactNumeric,
            Self::Float | Self::Double => TypeCategory::ApproximateNumeric,
            Self::Text => TypeCategory::CharacterString,
            Self::DateTime => TypeCategory::DateTime,
            Self::Guid | Self::Unknown => TypeCategory::Other,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self.category(),
            TypeCategory::ExactNumeric | TypeCategory::ApproximateNumeric
        )
    }

    /// Whether values of this type can be compared with `<`/`>`.
    pub fn is_orderable(self) -> bool {
        self != Self::Unknown
    }

    /// Type used to expose an attribute of the given metadata category.
    pub fn for_attribute(attribute_type: AttributeType) -> Self {
        match attribute_type {
            AttributeType::BigInt => Self::Int64,
            AttributeType::Boolean => Self::Boolean,
            AttributeType::Customer
            | AttributeType::Lookup
            | AttributeType::Owner
            | AttributeType::Uniqueidentifier => Self::Guid,
            AttributeType::DateTime => Self::DateTime,
            AttributeType::Decimal | AttributeType::Money => Self::Decimal,
            AttributeType::Double => Self::Double,
            AttributeType::Integer
            | AttributeType::Picklist
            | AttributeType::State
            | AttributeType::Status => Self::Int32,
            AttributeType::EntityName
            | AttributeType::ManagedProperty
            | AttributeType::Memo
            | AttributeType::PartyList
            | AttributeType::String
            | AttributeType::Virtual => Self::Text,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "bit",
            Self::Int32 => "int",
            Self::Int64 => "bigint",
            Self::Decimal => "decimal",
            Self::Float => "real",
            Self::Double => "float",
            Self::Text => "nvarchar",
            Self::Guid => "uniqueidentifier",
            Self::DateTime => "datetime",
            Self::Unknown => "null",
        };
        f.write_str(name)
    }
}

fn numeric_rank(t: ScalarType) -> Option<u8> {
    Some(match t {
        ScalarType::Boolean => 1,
        ScalarType::Int32 => 2,
        ScalarType::Int64 => 3,
        ScalarType::Decimal => 4,
        ScalarType::Float => 5,
        ScalarType::Double => 6,
        _ => return None,
    })
}

/// Common type two operands are implicitly converted to, if any.
///
/// Numeric types widen to the higher-precedence side; text converts to the
/// other side's numeric, key or date type; `Unknown` adopts the other side.
pub fn consistent_type(left: ScalarType, right: ScalarType) -> Option<ScalarType> {
    use ScalarType::*;

    if left == right {
        return Some(left);
    }
    match (left, right) {
        (Unknown, other) | (other, Unknown) => Some(other),
        (Text, other) | (other, Text) if other.is_numeric() => Some(other),
        (Text, Guid) | (Guid, Text) => Some(Guid),
        (Text, DateTime) | (DateTime, Text) => Some(DateTime),
        (l, r) => {
            let rl = numeric_rank(l)?;
            let rr = numeric_rank(r)?;
            Some(if rl >= rr { l } else { r })
        }
    }
}

/// Runtime scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value; also used for columns missing from a row.
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Float(f32),
    Double(f64),
    Text(String),
    Guid(Uuid),
    DateTime(NaiveDateTime),
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a date/time literal (`yyyy-mm-dd[ hh:mm[:ss[.fff]]]`, `T` separator allowed).
pub fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl Value {
    pub fn data_type(&self) -> ScalarType {
        match self {
            Self::Null => ScalarType::Unknown,
            Self::Boolean(_) => ScalarType::Boolean,
            Self::Int32(_) => ScalarType::Int32,
            Self::Int64(_) => ScalarType::Int64,
            Self::Decimal(_) => ScalarType::Decimal,
            Self::Float(_) => ScalarType::Float,
            Self::Double(_) => ScalarType::Double,
            Self::Text(_) => ScalarType::Text,
            Self::Guid(_) => ScalarType::Guid,
            Self::DateTime(_) => ScalarType::DateTime,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts to `target` following the implicit conversion rules.
    ///
    /// Numbers are parsed with invariant (period-decimal) conventions.
    pub fn cast(&self, target: ScalarType) -> Result<Value> {
        if self.data_type() == target || self.is_null() || target == ScalarType::Unknown {
            return Ok(self.clone());
        }
        let converted = match (self, target) {
            (Self::Boolean(b), _) => Self::Int32(i32::from(*b)).cast(target).ok(),
            (Self::Int32(v), ScalarType::Int64) => Some(Self::Int64(i64::from(*v))),
            (Self::Int32(v), ScalarType::Decimal) => Some(Self::Decimal(Decimal::from(*v))),
            (Self::Int32(v), ScalarType::Float) => Some(Self::Float(*v as f32)),
            (Self::Int32(v), ScalarType::Double) => Some(Self::Double(f64::from(*v))),
            (Self::Int64(v), ScalarType::Decimal) => Some(Self::Decimal(Decimal::from(*v))),
            (Self::Int64(v), ScalarType::Float) => Some(Self::Float(*v as f32)),
            (Self::Int64(v), ScalarType::Double) => Some(Self::Double(*v as f64)),
            (Self::Decimal(v), ScalarType::Float) => v.to_f32().map(Self::Float),
            (Self::Decimal(v), ScalarType::Double) => v.to_f64().map(Self::Double),
            (Self::Float(v), ScalarType::Double) => Some(Self::Double(f64::from(*v))),
            (Self::Text(s), _) => parse_text(s, target),
            _ => None,
        };
        converted.ok_or_else(|| {
            FxqError::Execution(format!(
                "conversion failed when converting {} value '{}' to {target}",
                self.data_type(),
                self
            ))
        })
    }

    /// Ordering between two values of the same type; text compares
    /// case-insensitively. `None` for nulls or mismatched types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Int32(a), Self::Int32(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            (Self::Guid(a), Self::Guid(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn parse_text(s: &str, target: ScalarType) -> Option<Value> {
    let t = s.trim();
    match target {
        ScalarType::Boolean => match t {
            "1" => Some(Value::Boolean(true)),
            "0" => Some(Value::Boolean(false)),
            _ if t.eq_ignore_ascii_case("true") => Some(Value::Boolean(true)),
            _ if t.eq_ignore_ascii_case("false") => Some(Value::Boolean(false)),
            _ => None,
        },
        ScalarType::Int32 => t.parse().ok().map(Value::Int32),
        ScalarType::Int64 => t.parse().ok().map(Value::Int64),
        ScalarType::Decimal => Decimal::from_str(t)
            .or_else(|_| Decimal::from_scientific(t))
            .ok()
            .map(Value::Decimal),
        ScalarType::Float => t.parse().ok().map(Value::Float),
        ScalarType::Double => t.parse().ok().map(Value::Double),
        ScalarType::Guid => Uuid::parse_str(t).ok().map(Value::Guid),
        ScalarType::DateTime => parse_date_time(t).map(Value::DateTime),
        ScalarType::Text => Some(Value::Text(s.to_string())),
        ScalarType::Unknown => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(b) => write!(f, "{}", i32::from(*b)),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Guid(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }
}
