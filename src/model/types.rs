//! Primitive model types: data types, purposes and ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Data type of a concept or output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
    Float,
    Numeric,
    Bool,
    Date,
    Datetime,
    Timestamp,
    Array,
    Map,
    Struct,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Float | DataType::Numeric)
    }

    /// Result type of arithmetic between two numeric types.
    pub fn widen(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Int, DataType::Int) => DataType::Int,
            (DataType::Float, _) | (_, DataType::Float) => DataType::Float,
            (DataType::Numeric, _) | (_, DataType::Numeric) => DataType::Numeric,
            (a, _) => a,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Numeric => "numeric",
            DataType::Bool => "bool",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Timestamp => "timestamp",
            DataType::Array => "array",
            DataType::Map => "map",
            DataType::Struct => "struct",
        }
    }
}

/// Returned when a type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data type `{0}`")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "text" | "varchar" => Ok(DataType::String),
            "int" | "integer" | "bigint" => Ok(DataType::Int),
            "float" | "double" => Ok(DataType::Float),
            "numeric" | "decimal" => Ok(DataType::Numeric),
            "bool" | "boolean" => Ok(DataType::Bool),
            "date" => Ok(DataType::Date),
            "datetime" => Ok(DataType::Datetime),
            "timestamp" => Ok(DataType::Timestamp),
            "array" | "list" => Ok(DataType::Array),
            "map" => Ok(DataType::Map),
            "struct" => Ok(DataType::Struct),
            _ => Err(UnknownDataType(s.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What role a concept plays after binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Identifies rows; defines grain.
    Key,
    /// A value determined by its owner key.
    Property,
    /// An aggregate.
    Metric,
    /// A derivation that references no concepts.
    Constant,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Key => write!(f, "key"),
            Purpose::Property => write!(f, "property"),
            Purpose::Metric => write!(f, "metric"),
            Purpose::Constant => write!(f, "constant"),
        }
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

define_id!(
    /// Index into [`Model::concepts`](super::Model::concepts).
    ConceptId
);
define_id!(
    /// Index into [`Model::joint_keys`](super::Model::joint_keys).
    JointKeyId
);
define_id!(
    /// Index into [`Model::datasources`](super::Model::datasources).
    DatasourceId
);
define_id!(
    /// Index into [`Model::files`](super::Model::files).
    FileId
);
