// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upstream entity models, their durable tables, and their mappers.
//!
//! Each submodule declares the upstream object as it arrives from the feed,
//! the static [`EntityTable`](fleetsync_core::EntityTable) it lands in, and an
//! [`EntityMapper`](fleetsync_core::EntityMapper) turning one into the other.
//! Column order in every table matches the schema migrations.

pub mod device;
pub mod diagnostic;
pub mod duty_status_log;
pub mod dvir_log;
pub mod fault_data;
pub mod log_record;
pub mod status_data;
pub mod user;

use std::collections::HashSet;

use serde::Deserialize;

pub use device::DeviceMapper;
pub use diagnostic::DiagnosticMapper;
pub use duty_status_log::DutyStatusLogMapper;
pub use dvir_log::DvirLogMapper;
pub use fault_data::FaultDataMapper;
pub use log_record::LogRecordMapper;
pub use status_data::StatusDataMapper;
pub use user::UserMapper;

/// Placeholder ids the upstream API uses instead of a missing reference.
const SENTINEL_IDS: &[&str] = &[
    "NoDeviceId",
    "NoDriverId",
    "UnknownDriverId",
    "NoUserId",
    "NoDiagnosticId",
];

/// A reference to another upstream object.
///
/// Usually `{"id": "b12"}`, but the API also sends bare strings for
/// placeholders such as `"NoDeviceId"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// `{"id": ...}` object.
    Object {
        /// Referenced id.
        id: String,
    },
    /// Bare id string.
    Bare(String),
}

impl Reference {
    /// The referenced id, or `None` for placeholders.
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            Self::Object { id } => id.as_str(),
            Self::Bare(id) => id.as_str(),
        };
        if id.is_empty() || SENTINEL_IDS.contains(&id) {
            None
        } else {
            Some(id)
        }
    }
}

/// Id of an optional reference, `None` for placeholders.
pub(crate) fn reference_id(reference: &Option<Reference>) -> Option<String> {
    reference.as_ref().and_then(Reference::id).map(str::to_string)
}

/// Set of ids to keep. An empty list keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(Option<HashSet<String>>);

impl AllowList {
    /// Build from ids; blank ids are ignored.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: HashSet<String> = ids
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if ids.is_empty() {
            Self(None)
        } else {
            Self(Some(ids))
        }
    }

    /// Parse a comma-separated list.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Whether the list restricts anything.
    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }

    /// Whether an object referencing `id` is kept. A missing id is only kept
    /// when the list is inactive.
    pub fn allows(&self, id: Option<&str>) -> bool {
        match (&self.0, id) {
            (None, _) => true,
            (Some(ids), Some(id)) => ids.contains(id),
            (Some(_), None) => false,
        }
    }
}

/// Allow-lists applied by the mappers.
#[derive(Debug, Clone, Default)]
pub struct EntityFilters {
    /// Devices to synchronize (and whose telemetry to keep).
    pub devices: AllowList,
    /// Diagnostics whose status and fault data to keep.
    pub diagnostics: AllowList,
}
