//! Post-hoc verification of migrated units.
//!
//! Comparison is independent of task execution: the caller names the
//! collection and units explicitly, and nothing here touches a task record.
//! For each unit both sides are counted; a unit is divergent when the counts
//! differ or it is missing on either side.

pub mod types;

pub use types::{CollectionComparison, ComparisonRequest, ComparisonResult, UnitComparison};

use tracing::{debug, info, instrument, warn};

use crate::core::{Connection, UnitRef};
use crate::error::{MigrateError, Result};

/// Compare one collection between `source` and `target`.
///
/// Fails with [`MigrateError::Comparison`] naming the collection when a
/// count call fails. The error carries the units compared up to that point.
#[instrument(skip_all, fields(collection = %request.collection))]
pub async fn compare_collection(
    source: &dyn Connection,
    target: &dyn Connection,
    request: &ComparisonRequest,
) -> Result<ComparisonResult> {
    if request.units.is_empty() {
        return Err(MigrateError::EmptySelection(format!(
            "no units to compare in {}",
            request.collection
        )));
    }

    let refs = request
        .units
        .iter()
        .map(|raw| UnitRef::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    let default_type = source.default_unit_type().to_string();
    let target_collection = request.target_collection();
    let mut compared = Vec::with_capacity(refs.len());

    for r in refs {
        let label = r.to_string();
        let unit = r.into_unit(&request.collection, &default_type);

        let counts = match source.count_units(&unit).await {
            Ok(src) => target
                .count_units(&unit.in_collection(target_collection))
                .await
                .map(|tgt| (src, tgt)),
            Err(e) => Err(e),
        };

        match counts {
            Ok((src, tgt)) => {
                debug!(
                    "{}: source={} ({}), target={} ({})",
                    unit, src.count, src.exists, tgt.count, tgt.exists
                );
                compared.push(UnitComparison::new(label, unit.unit_type, src, tgt));
            }
            Err(e) => {
                warn!("Comparison of {} stopped at {}: {}", request.collection, unit, e);
                return Err(MigrateError::Comparison {
                    collection: request.collection.clone(),
                    message: e.to_string(),
                    partial: Box::new(ComparisonResult::from_units(&request.collection, compared)),
                });
            }
        }
    }

    let result = ComparisonResult::from_units(&request.collection, compared);
    info!(
        "Compared {} units in {}: source={}, target={}, divergent={}",
        result.units.len(),
        request.collection,
        result.source_count,
        result.target_count,
        result.divergent_count()
    );
    Ok(result)
}

/// Compare several collections, continuing past failures.
///
/// Each entry carries either a full result or the error for that
/// collection together with its partial result, so the caller can retry
/// just the failed collections.
pub async fn compare_many(
    source: &dyn Connection,
    target: &dyn Connection,
    requests: &[ComparisonRequest],
) -> Vec<CollectionComparison> {
    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let entry = match compare_collection(source, target, request).await {
            Ok(result) => CollectionComparison {
                collection: request.collection.clone(),
                result: Some(result),
                error: None,
            },
            Err(MigrateError::Comparison {
                message, partial, ..
            }) => CollectionComparison {
                collection: request.collection.clone(),
                result: Some(*partial),
                error: Some(message),
            },
            Err(e) => CollectionComparison {
                collection: request.collection.clone(),
                result: None,
                error: Some(e.to_string()),
            },
        };
        results.push(entry);
    }
    results
}
