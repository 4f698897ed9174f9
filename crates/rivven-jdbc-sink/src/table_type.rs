//! Table types the sink may write to

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Kind of relation, named as JDBC metadata reports it
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableType {
    /// Regular table
    Table,
    /// View
    View,
    /// Partitioned table (PostgreSQL)
    PartitionedTable,
}

impl TableType {
    /// Name as reported by database metadata
    pub fn jdbc_name(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::PartitionedTable => "PARTITIONED TABLE",
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.jdbc_name())
    }
}

impl FromStr for TableType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // collapse inner whitespace so "partitioned   table" still matches
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();

        match normalized.as_str() {
            "TABLE" => Ok(Self::Table),
            "VIEW" => Ok(Self::View),
            "PARTITIONED TABLE" | "PARTITIONED_TABLE" => Ok(Self::PartitionedTable),
            _ => Err(Error::config(format!("unsupported table type '{}'", s.trim()))),
        }
    }
}

/// Parse a comma separated list such as `"table , view"` into a set.
pub fn parse_table_types(value: &str) -> Result<BTreeSet<TableType>> {
    let types = value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(TableType::from_str)
        .collect::<Result<BTreeSet<_>>>()?;

    if types.is_empty() {
        return Err(Error::config("'table.types' must name at least one table type"));
    }
    Ok(types)
}
