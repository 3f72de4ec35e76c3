// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Driver vehicle inspection reports.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{
    Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Result, Row, SqlValue, SyncError,
};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// An inspection report as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DvirLog {
    /// Record id.
    pub id: String,
    /// When the record was logged.
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    /// Reporting device.
    #[serde(default)]
    pub device: Option<Reference>,
    /// Driver, if known.
    #[serde(default)]
    pub driver: Option<Reference>,
    /// Whether the vehicle was declared safe.
    #[serde(default)]
    pub is_safe_to_operate: Option<bool>,
    /// Free-text remark.
    #[serde(default)]
    pub driver_remark: Option<String>,
    /// When the repair was certified.
    #[serde(default)]
    pub certify_date: Option<DateTime<Utc>>,
}

/// `dvir_logs` table.
pub static TABLE: EntityTable = EntityTable {
    name: "dvir_logs",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("device_id", ColumnType::Text),
        Column::new("driver_id", ColumnType::Text),
        Column::new("date_time", ColumnType::Timestamp),
        Column::new("is_safe_to_operate", ColumnType::Bool),
        Column::new("driver_remark", ColumnType::Text),
        Column::new("certify_date", ColumnType::Timestamp),
    ],
    key: &["id"],
    foreign_keys: &[
        ForeignKey {
            constraint: "fk_dvir_logs_devices",
            column: "device_id",
            parent_table: "devices",
            parent_column: "id",
        },
        ForeignKey {
            constraint: "fk_dvir_logs_users",
            column: "driver_id",
            parent_table: "users",
            parent_column: "id",
        },
    ],
};

/// Maps inspection reports for allowed devices.
#[derive(Debug, Clone)]
pub struct DvirLogMapper {
    filters: Arc<EntityFilters>,
}

impl DvirLogMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for DvirLogMapper {
    type Source = DvirLog;

    fn entity_type(&self) -> &'static str {
        "DVIRLog"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &DvirLog) -> bool {
        self.filters
            .devices
            .allows(source.device.as_ref().and_then(Reference::id))
    }

    fn create_entity(&self, source: &DvirLog) -> Result<Row> {
        let device_id = reference_id(&source.device)
            .ok_or_else(|| SyncError::mapping("DVIRLog", format!("{} has no device", source.id)))?;
        Ok(Row::new(vec![
            source.id.as_str().into(),
            device_id.into(),
            reference_id(&source.driver).into(),
            source.date_time.into(),
            SqlValue::Bool(source.is_safe_to_operate),
            source.driver_remark.clone().into(),
            source.certify_date.into(),
        ]))
    }
}
