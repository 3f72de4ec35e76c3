// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Users, including drivers.

use chrono::{DateTime, Utc};
use fleetsync_core::{Column, ColumnType, EntityMapper, EntityTable, Result, Row, SqlValue};
use serde::Deserialize;

/// A user as returned by the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User id.
    pub id: String,
    /// Login name.
    #[serde(default)]
    pub name: Option<String>,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Whether the user is a driver.
    #[serde(default)]
    pub is_driver: Option<bool>,
    /// Start of the active period.
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    /// End of the active period.
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
}

/// `users` table.
pub static TABLE: EntityTable = EntityTable {
    name: "users",
    columns: &[
        Column::new("id", ColumnType::Text),
        Column::new("name", ColumnType::Text),
        Column::new("first_name", ColumnType::Text),
        Column::new("last_name", ColumnType::Text),
        Column::new("is_driver", ColumnType::Bool),
        Column::new("active_from", ColumnType::Timestamp),
        Column::new("active_to", ColumnType::Timestamp),
    ],
    key: &["id"],
    foreign_keys: &[],
};

/// Maps users.
#[derive(Debug, Clone, Default)]
pub struct UserMapper;

impl EntityMapper for UserMapper {
    type Source = User;

    fn entity_type(&self) -> &'static str {
        "User"
    }

    fn table(&self) -> &'static EntityTable {
        &TABLE
    }

    fn create_entity(&self, source: &User) -> Result<Row> {
        Ok(Row::new(vec![
            source.id.as_str().into(),
            source.name.clone().into(),
            source.first_name.clone().into(),
            source.last_name.clone().into(),
            SqlValue::Bool(source.is_driver),
            source.active_from.into(),
            source.active_to.into(),
        ]))
    }
}
