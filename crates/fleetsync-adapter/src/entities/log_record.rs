// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Log records: GPS positions and speed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{
    Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Result, Row, SqlValue, SyncError,
};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// A log record as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Record id.
    pub id: String,
    /// When the record was logged.
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    /// Reporting device.
    #[serde(default)]
    pub device: Option<Reference>,
    /// Latitude in degrees.
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Speed in km/h.
    #[serde(default)]
    pub speed: Option<f64>,
}

/// `log_records` table.
pub static TABLE: EntityTable = EntityTable {
    name: "log_records",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("device_id", ColumnType::Text),
        Column::new("date_time", ColumnType::Timestamp),
        Column::new("latitude", ColumnType::Double),
        Column::new("longitude", ColumnType::Double),
        Column::new("speed", ColumnType::Double),
    ],
    key: &["id"],
    foreign_keys: &[ForeignKey {
        constraint: "fk_log_records_devices",
        column: "device_id",
        parent_table: "devices",
        parent_column: "id",
    }],
};

/// Maps log records for allowed devices.
#[derive(Debug, Clone)]
pub struct LogRecordMapper {
    filters: Arc<EntityFilters>,
}

impl LogRecordMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for LogRecordMapper {
    type Source = LogRecord;

    fn entity_type(&self) -> &'static str {
        "LogRecord"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &LogRecord) -> bool {
        self.filters
            .devices
            .allows(source.device.as_ref().and_then(Reference::id))
    }

    fn create_entity(&self, source: &LogRecord) -> Result<Row> {
        let device_id = reference_id(&source.device)
            .ok_or_else(|| SyncError::mapping("LogRecord", format!("{} has no device", source.id)))?;
        Ok(Row::new(vec![
            source.id.as_str().into(),
            device_id.into(),
            source.date_time.into(),
            SqlValue::Double(source.latitude),
            SqlValue::Double(source.longitude),
            SqlValue::Double(source.speed),
        ]))
    }
}
