// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duty status logs (hours of service).
//!
//! Records may lack a device or a driver; the upstream placeholders are
//! stored as NULL so the foreign keys only apply to real references.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{Column, ColumnType, EntityMapper, EntityTable, ForeignKey, Result, Row};
use serde::Deserialize;

use super::{EntityFilters, Reference, reference_id};

/// A duty status log as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DutyStatusLog {
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
    /// `D`, `ON`, `OFF`, `SB`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// `Automatic`, `Manual`, ...
    #[serde(default)]
    pub origin: Option<String>,
    /// `Active`, `Inactive`, ...
    #[serde(default)]
    pub state: Option<String>,
}

/// `duty_status_logs` table.
pub static TABLE: EntityTable = EntityTable {
    name: "duty_status_logs",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("device_id", ColumnType::Text),
        Column::new("driver_id", ColumnType::Text),
        Column::new("date_time", ColumnType::Timestamp),
        Column::new("status", ColumnType::Text),
        Column::new("origin", ColumnType::Text),
        Column::new("state", ColumnType::Text),
    ],
    key: &["id"],
    foreign_keys: &[
        ForeignKey {
            constraint: "fk_duty_status_logs_devices",
            column: "device_id",
            parent_table: "devices",
            parent_column: "id",
        },
        ForeignKey {
            constraint: "fk_duty_status_logs_users",
            column: "driver_id",
            parent_table: "users",
            parent_column: "id",
        },
    ],
};

/// Maps duty status logs. Logs without a device are kept.
#[derive(Debug, Clone)]
pub struct DutyStatusLogMapper {
    filters: Arc<EntityFilters>,
}

impl DutyStatusLogMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for DutyStatusLogMapper {
    type Source = DutyStatusLog;

    fn entity_type(&self) -> &'static str {
        "DutyStatusLog"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &DutyStatusLog) -> bool {
        match source.device.as_ref().and_then(Reference::id) {
            Some(device) => self.filters.devices.allows(Some(device)),
            None => true,
        }
    }

    fn create_entity(&self, source: &DutyStatusLog) -> Result<Row> {
        Ok(Row::new(vec![
            source.id.as_str().into(),
            reference_id(&source.device).into(),
            reference_id(&source.driver).into(),
            source.date_time.into(),
            source.status.clone().into(),
            source.origin.clone().into(),
            source.state.clone().into(),
        ]))
    }
}
