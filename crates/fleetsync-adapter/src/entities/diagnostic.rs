// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Diagnostics: the measurement and fault codes status and fault data refer to.

use std::sync::Arc;

use fleetsync_core::{Column, ColumnType, EntityMapper, EntityTable, Result, Row, SqlValue};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// A diagnostic as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Diagnostic id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Numeric code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Kind of diagnostic (`GoDiagnostic`, `ObdFault`, ...).
    #[serde(default)]
    pub diagnostic_type: Option<String>,
    /// Unit the values are reported in.
    #[serde(default)]
    pub unit_of_measure: Option<Reference>,
}

/// `diagnostics` table.
pub static TABLE: EntityTable = EntityTable {
    name: "diagnostics",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::new("code", ColumnType::BigInt),
        Column::new("diagnostic_type", ColumnType::Text),
        Column::new("unit_of_measure", ColumnType::Text),
    ],
    key: &["id"],
    foreign_keys: &[],
};

/// Maps diagnostics, honoring the diagnostic allow-list.
#[derive(Debug, Clone)]
pub struct DiagnosticMapper {
    filters: Arc<EntityFilters>,
}

impl DiagnosticMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for DiagnosticMapper {
    type Source = Diagnostic;

    fn entity_type(&self) -> &'static str {
        "Diagnostic"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &Diagnostic) -> bool {
        self.filters.diagnostics.allows(Some(&source.id))
    }

    fn create_entity(&self, source: &Diagnostic) -> Result<Row> {
        Ok(Row::new(vec![
            source.id.as_str().into(),
            source.name.clone().into(),
            SqlValue::BigInt(source.code),
            source.diagnostic_type.clone().into(),
            reference_id(&source.unit_of_measure).into(),
        ]))
    }
}
