//! Selector resolution.
//!
//! Expands [`ResourceSelector`]s into the ordered list of units a task
//! copies. Only the source system is consulted. The result keeps selector
//! order, then the connector's listing order; nothing is re-sorted.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::core::{Connection, MigrationUnit, PlannedUnit, ResourceSelector, UnitRef};
use crate::error::{MigrateError, Result};

/// Resolve `selectors` against `source`.
///
/// Duplicate units (same collection, type and name) keep their first
/// occurrence. Explicit unit references that the source does not list are
/// dropped with a warning. Fails with [`MigrateError::Config`] when two
/// different source units would land on the same target unit, and with
/// [`MigrateError::EmptySelection`] when nothing remains.
pub async fn resolve(
    source: &dyn Connection,
    selectors: &[ResourceSelector],
) -> Result<Vec<PlannedUnit>> {
    if selectors.is_empty() {
        return Err(MigrateError::EmptySelection("no selectors given".into()));
    }

    let mut seen: HashSet<MigrationUnit> = HashSet::new();
    let mut targets: HashMap<MigrationUnit, MigrationUnit> = HashMap::new();
    let mut planned = Vec::new();

    for selector in selectors {
        selector.validate()?;
        let target_collection = selector.target_collection();

        for unit in resolve_one(source, selector).await? {
            if seen.insert(unit.clone()) {
                let target = unit.in_collection(target_collection);
                if let Some(earlier) = targets.insert(target.clone(), unit.clone()) {
                    return Err(MigrateError::Config(format!(
                        "{} and {} both map to {}",
                        earlier, unit, target
                    )));
                }
                planned.push(PlannedUnit {
                    source: unit,
                    target,
                });
            } else {
                debug!("Skipping duplicate unit {}", unit);
            }
        }
    }

    if planned.is_empty() {
        let collections: Vec<&str> = selectors.iter().map(|s| s.collection.as_str()).collect();
        return Err(MigrateError::EmptySelection(format!(
            "no units matched in {}",
            collections.join(", ")
        )));
    }

    Ok(planned)
}

async fn resolve_one(
    source: &dyn Connection,
    selector: &ResourceSelector,
) -> Result<Vec<MigrationUnit>> {
    let collection = selector.collection.as_str();
    let mut units = Vec::new();

    let unit_types: Vec<String> = selector
        .unit_types
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if !unit_types.is_empty() {
        units.extend(source.list_units(collection, &unit_types).await?);
    }

    let refs = selector.unit_refs()?;
    if refs.is_empty() {
        return Ok(units);
    }

    // Group explicit references by type, keeping first-appearance order.
    let default_type = source.default_unit_type().to_string();
    let mut groups: Vec<(String, Vec<&UnitRef>)> = Vec::new();
    for r in &refs {
        let unit_type = r.type_or(&default_type).to_string();
        match groups.iter_mut().find(|(t, _)| *t == unit_type) {
            Some((_, members)) => members.push(r),
            None => groups.push((unit_type, vec![r])),
        }
    }

    for (unit_type, members) in groups {
        let listed = source
            .list_units(collection, std::slice::from_ref(&unit_type))
            .await?;
        for member in &members {
            if !listed.iter().any(|u| u.name == member.name) {
                warn!(
                    "Unit {} not found in {} on {}, skipping",
                    member,
                    collection,
                    source.describe()
                );
            }
        }
        units.extend(
            listed
                .into_iter()
                .filter(|u| members.iter().any(|m| m.name == u.name)),
        );
    }

    Ok(units)
}
