use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Logical type of a field. Physical representations may differ but must
/// surface as one of these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Timestamp,
    Binary,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::Binary => "binary",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Number)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "varchar" | "text" => Ok(DataType::String),
            "integer" | "int" | "long" | "bigint" => Ok(DataType::Integer),
            "number" | "float" | "double" => Ok(DataType::Number),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "timestamp" | "datetime" => Ok(DataType::Timestamp),
            "binary" | "bytes" => Ok(DataType::Binary),
            other => Err(format!("Unknown data type: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("BIGINT".parse::<DataType>().unwrap(), DataType::Integer);
        assert_eq!(" text ".parse::<DataType>().unwrap(), DataType::String);
        assert!("geometry".parse::<DataType>().is_err());
    }
}
