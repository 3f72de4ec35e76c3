// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entity table metadata, typed row values, and the per-entity mapper trait.
//!
//! The engine never knows the shape of a specific entity. Each entity type
//! describes its durable table once as an [`EntityTable`] and supplies an
//! [`EntityMapper`] that turns upstream objects into [`Row`]s aligned with the
//! table's columns. Staging table and merge routine names are derived from the
//! table name so both engines agree on them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::{Result, SyncError};

/// SQL type of a column, used to bind typed NULLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// BOOLEAN (INTEGER on SQLite).
    Bool,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Double,
    /// Variable-length text.
    Text,
    /// UTC timestamp.
    Timestamp,
}

/// A column of a durable (and staging) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Column type.
    pub ty: ColumnType,
}

impl Column {
    /// Shorthand constructor for static table definitions.
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// A foreign key declared on a durable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name, as created by the schema migrations.
    pub constraint: &'static str,
    /// Referencing column in this table.
    pub column: &'static str,
    /// Referenced table.
    pub parent_table: &'static str,
    /// Referenced column.
    pub parent_column: &'static str,
}

/// Static description of one entity's durable table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTable {
    /// Durable table name.
    pub name: &'static str,
    /// All columns, in row order.
    pub columns: &'static [Column],
    /// Natural/business key columns used by the merge.
    pub key: &'static [&'static str],
    /// Foreign keys declared on the durable table.
    pub foreign_keys: &'static [ForeignKey],
}

impl EntityTable {
    /// Name of the scratch table the batch is loaded into.
    pub fn staging_table(&self) -> String {
        format!("stg_{}", self.name)
    }

    /// Name of the PostgreSQL merge procedure for this entity.
    pub fn merge_routine(&self) -> String {
        format!("spmerge_stg_{}", self.name)
    }

    /// Positions of the key columns within a row.
    pub fn key_positions(&self) -> Vec<usize> {
        self.key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c.name == *k))
            .collect()
    }

    /// Columns that are not part of the key.
    pub fn value_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !self.key.contains(&c.name))
    }

    /// Look up a foreign key by constraint name.
    pub fn foreign_key(&self, constraint: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.constraint == constraint)
    }

    /// Check that a row matches this table's column count and types.
    pub fn validate(&self, row: &Row) -> Result<()> {
        if row.values().len() != self.columns.len() {
            return Err(SyncError::mapping(
                self.name,
                format!(
                    "row has {} values but table has {} columns",
                    row.values().len(),
                    self.columns.len()
                ),
            ));
        }
        for (column, value) in self.columns.iter().zip(row.values()) {
            if value.column_type() != column.ty {
                return Err(SyncError::mapping(
                    self.name,
                    format!(
                        "column '{}' expects {:?} but got {:?}",
                        column.name,
                        column.ty,
                        value.column_type()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// A typed, nullable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Boolean value.
    Bool(Option<bool>),
    /// 64-bit integer value.
    BigInt(Option<i64>),
    /// Floating point value.
    Double(Option<f64>),
    /// Text value.
    Text(Option<String>),
    /// UTC timestamp value.
    Timestamp(Option<DateTime<Utc>>),
}

impl SqlValue {
    /// The column type this value binds as.
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::BigInt(_) => ColumnType::BigInt,
            Self::Double(_) => ColumnType::Double,
            Self::Text(_) => ColumnType::Text,
            Self::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    /// Whether the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Bool(v) => v.is_none(),
            Self::BigInt(v) => v.is_none(),
            Self::Double(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
        }
    }

    /// A hashable rendering used to compare natural keys.
    fn key_fragment(&self) -> String {
        match self {
            Self::Bool(v) => format!("{:?}", v),
            Self::BigInt(v) => format!("{:?}", v),
            Self::Double(v) => format!("{:?}", v.map(f64::to_bits)),
            Self::Text(v) => format!("{:?}", v),
            Self::Timestamp(v) => format!("{:?}", v.map(|t| t.timestamp_micros())),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(Some(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::BigInt(Some(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Double(Some(value))
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(Some(value))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(Some(value))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        Self::Timestamp(value)
    }
}

/// One row of an entity table, values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<SqlValue>);

impl Row {
    /// Build a row from values in column order.
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    /// The row's values.
    pub fn values(&self) -> &[SqlValue] {
        &self.0
    }

    /// Value at a column position.
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.0.get(index)
    }

    fn natural_key(&self, positions: &[usize]) -> String {
        positions
            .iter()
            .filter_map(|&i| self.0.get(i))
            .map(SqlValue::key_fragment)
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

/// Per-entity capability used by processors to turn upstream objects into rows.
///
/// Processors are generic over this trait instead of switching on entity type.
pub trait EntityMapper: Send + Sync + 'static {
    /// Upstream object model, decoded from the feed's JSON.
    type Source: DeserializeOwned + Send + Sync + 'static;

    /// Upstream type name requested from the feed (e.g. `StatusData`).
    fn entity_type(&self) -> &'static str;

    /// Durable table the rows are merged into.
    fn table(&self) -> &'static EntityTable;

    /// Whether the upstream object should be written at all (allow-lists).
    fn include(&self, _source: &Self::Source) -> bool {
        true
    }

    /// Build a fresh row from an upstream object.
    fn create_entity(&self, source: &Self::Source) -> Result<Row>;

    /// Whether `existing` differs from what `source` would produce.
    fn requires_update(&self, existing: &Row, source: &Self::Source) -> Result<bool> {
        Ok(self.create_entity(source)? != *existing)
    }

    /// Apply `source` onto an existing row.
    fn update_entity(&self, _existing: &Row, source: &Self::Source) -> Result<Row> {
        self.create_entity(source)
    }
}

/// Map a batch of upstream objects into rows, dropping excluded objects and
/// collapsing objects that share a natural key (later objects win).
///
/// The merge routine must never see the same key twice in one staging load.
pub fn map_batch<M: EntityMapper>(mapper: &M, sources: &[M::Source]) -> Result<Vec<Row>> {
    let table = mapper.table();
    let key_positions = table.key_positions();
    let mut rows: Vec<Row> = Vec::with_capacity(sources.len());
    let mut index_by_key: HashMap<String, usize> = HashMap::with_capacity(sources.len());

    for source in sources {
        if !mapper.include(source) {
            continue;
        }
        let row = mapper.create_entity(source)?;
        table.validate(&row)?;
        let key = row.natural_key(&key_positions);

        match index_by_key.get(&key) {
            Some(&i) => {
                if mapper.requires_update(&rows[i], source)? {
                    let updated = mapper.update_entity(&rows[i], source)?;
                    table.validate(&updated)?;
                    rows[i] = updated;
                }
            }
            None => {
                index_by_key.insert(key, rows.len());
                rows.push(row);
            }
        }
    }

    Ok(rows)
}
