// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Processor registry.
//!
//! One [`EntityKind`] per synchronized entity type. Each kind knows its
//! processor name, its durable table, the processors it must wait for, and
//! how to build its [`EntityProcessor`].

use std::fmt;
use std::sync::Arc;

use fleetsync_core::{
    EntityProcessor, EntityTable, ProcessorConfig, ProcessorContext, SyncProcessor,
};

use crate::entities::{
    DeviceMapper, DiagnosticMapper, DutyStatusLogMapper, DvirLogMapper, EntityFilters,
    FaultDataMapper, LogRecordMapper, StatusDataMapper, UserMapper, device, diagnostic,
    duty_status_log, dvir_log, fault_data, log_record, status_data, user,
};

/// Entity types synchronized by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Vehicles and other tracked assets.
    Devices,
    /// Users and drivers.
    Users,
    /// Diagnostic definitions.
    Diagnostics,
    /// Engine and sensor readings.
    StatusData,
    /// Fault codes.
    FaultData,
    /// GPS positions.
    LogRecords,
    /// Hours-of-service records.
    DutyStatusLogs,
    /// Vehicle inspection reports.
    DvirLogs,
}

impl EntityKind {
    /// Every kind, parents before children.
    pub const ALL: [EntityKind; 8] = [
        Self::Devices,
        Self::Users,
        Self::Diagnostics,
        Self::StatusData,
        Self::FaultData,
        Self::LogRecords,
        Self::DutyStatusLogs,
        Self::DvirLogs,
    ];

    /// Processor name, also the `service_tracking` key.
    pub fn processor_name(self) -> &'static str {
        match self {
            Self::Devices => "DeviceProcessor",
            Self::Users => "UserProcessor",
            Self::Diagnostics => "DiagnosticProcessor",
            Self::StatusData => "StatusDataProcessor",
            Self::FaultData => "FaultDataProcessor",
            Self::LogRecords => "LogRecordProcessor",
            Self::DutyStatusLogs => "DutyStatusLogProcessor",
            Self::DvirLogs => "DVIRLogProcessor",
        }
    }

    /// Infix of the per-processor environment variables.
    pub fn env_key(self) -> &'static str {
        match self {
            Self::Devices => "DEVICES",
            Self::Users => "USERS",
            Self::Diagnostics => "DIAGNOSTICS",
            Self::StatusData => "STATUS_DATA",
            Self::FaultData => "FAULT_DATA",
            Self::LogRecords => "LOG_RECORDS",
            Self::DutyStatusLogs => "DUTY_STATUS_LOGS",
            Self::DvirLogs => "DVIR_LOGS",
        }
    }

    /// Durable table written by this kind.
    pub fn table(self) -> &'static EntityTable {
        match self {
            Self::Devices => &device::TABLE,
            Self::Users => &user::TABLE,
            Self::Diagnostics => &diagnostic::TABLE,
            Self::StatusData => &status_data::TABLE,
            Self::FaultData => &fault_data::TABLE,
            Self::LogRecords => &log_record::TABLE,
            Self::DutyStatusLogs => &duty_status_log::TABLE,
            Self::DvirLogs => &dvir_log::TABLE,
        }
    }

    /// Kinds that must have completed a cycle before this one starts.
    pub fn prerequisites(self) -> &'static [EntityKind] {
        match self {
            Self::Devices | Self::Users | Self::Diagnostics => &[],
            Self::StatusData | Self::FaultData => &[Self::Devices, Self::Diagnostics],
            Self::LogRecords => &[Self::Devices],
            Self::DutyStatusLogs | Self::DvirLogs => &[Self::Devices, Self::Users],
        }
    }

    /// Kind whose durable table is `table`.
    pub fn for_table(table: &str) -> Option<EntityKind> {
        Self::ALL.into_iter().find(|kind| kind.table().name == table)
    }

    /// Build the processor for this kind.
    pub fn build(
        self,
        config: ProcessorConfig,
        ctx: ProcessorContext,
        filters: Arc<EntityFilters>,
    ) -> Box<dyn SyncProcessor> {
        match self {
            Self::Devices => Box::new(EntityProcessor::new(DeviceMapper::new(filters), config, ctx)),
            Self::Users => Box::new(EntityProcessor::new(UserMapper, config, ctx)),
            Self::Diagnostics => {
                Box::new(EntityProcessor::new(DiagnosticMapper::new(filters), config, ctx))
            }
            Self::StatusData => {
                Box::new(EntityProcessor::new(StatusDataMapper::new(filters), config, ctx))
            }
            Self::FaultData => {
                Box::new(EntityProcessor::new(FaultDataMapper::new(filters), config, ctx))
            }
            Self::LogRecords => {
                Box::new(EntityProcessor::new(LogRecordMapper::new(filters), config, ctx))
            }
            Self::DutyStatusLogs => {
                Box::new(EntityProcessor::new(DutyStatusLogMapper::new(filters), config, ctx))
            }
            Self::DvirLogs => {
                Box::new(EntityProcessor::new(DvirLogMapper::new(filters), config, ctx))
            }
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.processor_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisites_cover_foreign_keys() {
        for kind in EntityKind::ALL {
            for fk in kind.table().foreign_keys {
                let parent = EntityKind::for_table(fk.parent_table)
                    .unwrap_or_else(|| panic!("no processor writes {}", fk.parent_table));
                assert!(
                    kind.prerequisites().contains(&parent),
                    "{} references {} but does not wait for it",
                    kind,
                    parent
                );
            }
        }
    }

    #[test]
    fn test_parents_listed_first() {
        for (position, kind) in EntityKind::ALL.iter().enumerate() {
            for prerequisite in kind.prerequisites() {
                let parent_position = EntityKind::ALL
                    .iter()
                    .position(|k| k == prerequisite)
                    .unwrap();
                assert!(parent_position < position);
            }
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(|k| k.processor_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }
}
