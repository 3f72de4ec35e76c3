// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Devices (telematics units installed in vehicles).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetsync_core::{Column, ColumnType, EntityMapper, EntityTable, Result, Row};
use serde::Deserialize;

use super::EntityFilters;

/// A device as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Hardware serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Hardware model.
    #[serde(default)]
    pub device_type: Option<String>,
    /// VIN reported by the vehicle.
    #[serde(default)]
    pub vehicle_identification_number: Option<String>,
    /// Start of the active period.
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    /// End of the active period.
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
}

/// `devices` table.
pub static TABLE: EntityTable = EntityTable {
    name: "devices",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::new("serial_number", ColumnType::Text),
        Column::new("device_type", ColumnType::Text),
        Column::new("vin", ColumnType::Text),
        Column::new("active_from", ColumnType::Timestamp),
        Column::new("active_to", ColumnType::Timestamp),
    ],
    key: &["id"],
    foreign_keys: &[],
};

/// Maps devices, honoring the device allow-list.
#[derive(Debug, Clone)]
pub struct DeviceMapper {
    filters: Arc<EntityFilters>,
}

impl DeviceMapper {
    /// Create a mapper.
    pub fn new(filters: Arc<EntityFilters>) -> Self {
        Self { filters }
    }
}

impl EntityMapper for DeviceMapper {
    type Source = Device;

    fn entity_type(&self) -> &'static str {
        "Device"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn include(&self, source: &Device) -> bool {
        self.filters.devices.allows(Some(&source.id))
    }

    fn create_entity(&self, source: &Device) -> Result<Row> {
        Ok(Row::new(vec![
            source.id.as_str().into(),
            source.name.clone().into(),
            source.serial_number.clone().into(),
            source.device_type.clone().into(),
            source.vehicle_identification_number.clone().into(),
            source.active_from.into(),
            source.active_to.into(),
        ]))
    }
}
