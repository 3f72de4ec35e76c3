// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fault data: engine and device fault codes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{
    Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Result, Row, SqlValue, SyncError,
};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// A fault data record as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultData {
    /// Record id.
    pub id: String,
    /// When the fault was logged.
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    /// Reporting device.
    #[serde(default)]
    pub device: Option<Reference>,
    /// Fault diagnostic.
    #[serde(default)]
    pub diagnostic: Option<Reference>,
    /// Controller that raised the fault.
    #[serde(default)]
    pub controller: Option<Reference>,
    /// `Active`, `Pending`, `Inactive`, ...
    #[serde(default)]
    pub fault_state: Option<String>,
    /// Number of occurrences.
    #[serde(default)]
    pub count: Option<i64>,
    /// Whether the malfunction indicator lamp is on.
    #[serde(default)]
    pub malfunction_lamp: Option<bool>,
}

/// `fault_data` table.
pub static TABLE: EntityTable = EntityTable {
    name: "fault_data",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("device_id", ColumnType::Text),
        Column::new("diagnostic_id", ColumnType::Text),
        Column::new("date_time", ColumnType::Timestamp),
        Column::new("controller_id", ColumnType::Text),
        Column::new("fault_state", ColumnType::Text),
        Column::new("fault_count", ColumnType::BigInt),
        Column::new("malfunction_lamp", ColumnType::Bool),
    ],
    key: &["id"],
    foreign_keys: &[
        ForeignKey {
            constraint: "fk_fault_data_devices",
            column: "device_id",
            parent_table: "devices",
            parent_column: "id",
        },
        ForeignKey {
            constraint: "fk_fault_data_diagnostics",
            column: "diagnostic_id",
            parent_table: "diagnostics",
            parent_column: "id",
        },
    ],
};

/// Maps fault data, keeping only allowed devices and diagnostics.
#[derive(Debug, Clone)]
pub struct FaultDataMapper {
    filters: Arc<EntityFilters>,
}

impl FaultDataMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for FaultDataMapper {
    type Source = FaultData;

    fn entity_type(&self) -> &'static str {
        "FaultData"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &FaultData) -> bool {
        let device = source.device.as_ref().and_then(Reference::id);
        let diagnostic = source.diagnostic.as_ref().and_then(Reference::id);
        self.filters.devices.allows(device) && self.filters.diagnostics.allows(diagnostic)
    }

    fn create_entity(&self, source: &FaultData) -> Result<Row> {
        let device_id = reference_id(&source.device)
            .ok_or_else(|| SyncError::mapping("FaultData", format!("{} has no device", source.id)))?;
        let diagnostic_id = reference_id(&source.diagnostic).ok_or_else(|| {
            SyncError::mapping("FaultData", format!("{} has no diagnostic", source.id))
        })?;
        Ok(Row::new(vec![
            source.id.as_str().into(),
            device_id.into(),
            diagnostic_id.into(),
            source.date_time.into(),
            reference_id(&source.controller).into(),
            source.fault_state.clone().into(),
            SqlValue::BigInt(source.count),
            SqlValue::Bool(source.malfunction_lamp),
        ]))
    }
}
