// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status data: engine and sensor measurements.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{
    Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Result, Row, SqlValue, SyncError,
};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// A status data record as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusData {
    /// Record id.
    pub id: String,
    /// When the value was measured.
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    /// Reporting device.
    #[serde(default)]
    pub device: Option<Reference>,
    /// Measured diagnostic.
    #[serde(default)]
    pub diagnostic: Option<Reference>,
    /// Measured value.
    #[serde(default)]
    pub data: Option<f64>,
}

/// `status_data` table.
pub static TABLE: EntityTable = EntityTable {
    name: "status_data",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("device_id", ColumnType::Text),
        Column::new("diagnostic_id", ColumnType::Text),
        Column::new("date_time", ColumnType::Timestamp),
        Column::new("data", ColumnType::Double),
    ],
    key: &["id"],
    foreign_keys: &[
        ForeignKey {
            constraint: "fk_status_data_devices",
            column: "device_id",
            parent_table: "devices",
            parent_column: "id",
        },
        ForeignKey {
            constraint: "fk_status_data_diagnostics",
            column: "diagnostic_id",
            parent_table: "diagnostics",
            parent_column: "id",
        },
    ],
};

/// Maps status data, keeping only allowed devices and diagnostics.
#[derive(Debug, Clone)]
pub struct StatusDataMapper {
    filters: Arc<EntityFilters>,
}

impl StatusDataMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for StatusDataMapper {
    type Source = StatusData;

    fn entity_type(&self) -> &'static str {
        "StatusData"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &StatusData) -> bool {
        let device = source.device.as_ref().and_then(Reference::id);
        let diagnostic = source.diagnostic.as_ref().and_then(Reference::id);
        self.filters.devices.allows(device) && self.filters.diagnostics.allows(diagnostic)
    }

    fn create_entity(&self, source: &StatusData) -> Result<Row> {
        let device_id = reference_id(&source.device)
            .ok_or_else(|| SyncError::mapping("StatusData", format!("{} has no device", source.id)))?;
        let diagnostic_id = reference_id(&source.diagnostic).ok_or_else(|| {
            SyncError::mapping("StatusData", format!("{} has no diagnostic", source.id))
        })?;
        Ok(Row::new(vec![
            source.id.as_str().into(),
            device_id.into(),
            diagnostic_id.into(),
            source.date_time.into(),
            SqlValue::Double(source.data),
        ]))
    }
}
