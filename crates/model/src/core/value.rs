use crate::{core::data_type::DataType, error::ModelError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, hash::Hash};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            Int(v) => v.hash(state),
            Float(v) => {
                // Hash the bits of the float to handle NaN and -0.0 correctly
                let bits = v.to_bits();
                bits.hash(state);
            }
            String(v) => v.hash(state),
            Boolean(v) => v.hash(state),
            Bytes(v) => v.hash(state),
            Date(v) => v.hash(state),
            Timestamp(v) => v.hash(state),
            Null => {}
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::String(v) => v.trim().parse::<i64>().ok(),
            Value::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::String(v) => v.trim().parse::<f64>().ok(),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bytes(_) => None,
            other => Some(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Int(v) => Some(*v != 0),
            Value::Float(v) => Some(*v != 0.0),
            Value::String(v) => match v.trim().to_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Some(true),
                "false" | "0" | "n" | "no" => Some(false),
                _ => None,
            },
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (String(a), String(b)) => Some(a.cmp(b)),
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Null, Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    pub fn equal(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// The logical type this value carries. `Null` reports `None`.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Int(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Number),
            Value::String(_) => Some(DataType::String),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Bytes(_) => Some(DataType::Binary),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Null => None,
        }
    }

    /// Converts the value to `target`. Nulls stay null; empty strings become
    /// null for every non-string target.
    pub fn convert_to(&self, target: DataType) -> Result<Value, ModelError> {
        if self.is_null() || self.data_type() == Some(target) {
            return Ok(self.clone());
        }
        if let Value::String(s) = self {
            if s.trim().is_empty() && target != DataType::String {
                return Ok(Value::Null);
            }
        }

        let fail = |reason: &str| ModelError::Conversion {
            value: self.to_string(),
            target: target.to_string(),
            reason: reason.to_string(),
        };

        match target {
            DataType::String => Ok(Value::String(self.to_string())),
            DataType::Integer => self
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| fail("not an integer")),
            DataType::Number => self
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| fail("not a number")),
            DataType::Boolean => self
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| fail("not a boolean")),
            DataType::Date => match self {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|e| fail(&e.to_string())),
                Value::Timestamp(ts) => Ok(Value::Date(ts.date_naive())),
                _ => Err(fail("unsupported source type")),
            },
            DataType::Timestamp => match self {
                Value::String(s) => parse_timestamp(s.trim())
                    .map(Value::Timestamp)
                    .ok_or_else(|| fail("not an RFC 3339 or 'YYYY-MM-DD HH:MM:SS' timestamp")),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| Value::Timestamp(dt.and_utc()))
                    .ok_or_else(|| fail("invalid date")),
                _ => Err(fail("unsupported source type")),
            },
            DataType::Binary => match self {
                Value::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
                _ => Err(fail("unsupported source type")),
            },
        }
    }

    /// Builds a value of type `target` from a JSON literal found in a graph
    /// definition.
    pub fn from_json(json: &serde_json::Value, target: DataType) -> Result<Value, ModelError> {
        let raw = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        };
        raw.convert_to(target)
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Int(_) => std::mem::size_of::<i64>(),
            Value::Float(_) => std::mem::size_of::<f64>(),
            Value::String(s) => s.len(),
            Value::Boolean(_) => std::mem::size_of::<bool>(),
            Value::Bytes(b) => b.len(),
            Value::Date(_) => std::mem::size_of::<NaiveDate>(),
            Value::Timestamp(_) => std::mem::size_of::<DateTime<Utc>>(),
            Value::Null => 0,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Timestamp(v) => f.write_str(&v.to_rfc3339()),
            Value::Null => Ok(()),
        }
    }
}
