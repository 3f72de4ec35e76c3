// Copyright (C) 2025 The fleetsync Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Constraint ownership for the adapter schema.
//!
//! Every foreign key declared on an entity table is owned by the processor
//! that writes the referenced parent table.

use fleetsync_core::{DependencyMap, EntityTable};

use crate::processors::EntityKind;

/// Build the dependency map for every synchronized entity.
pub fn dependency_map() -> DependencyMap {
    DependencyMap::new(EntityKind::ALL.into_iter().flat_map(|kind| {
        kind.table().foreign_keys.iter().filter_map(|fk| {
            EntityKind::for_table(fk.parent_table)
                .map(|owner| (fk.constraint, owner.processor_name()))
        })
    }))
}

/// Durable tables maintained by the maintenance coordinator.
pub fn tables() -> Vec<&'static EntityTable> {
    EntityKind::ALL.into_iter().map(EntityKind::table).collect()
}
