//! Comparison result types.
//!
//! Field names on the wire follow the console the engine was built for:
//! a unit is reported as a `table` even when it is a Kubernetes object.

use serde::{Deserialize, Serialize};

/// What to compare in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRequest {
    /// Collection on the source side.
    pub collection: String,

    /// Collection on the target side (default: same as source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_collection: Option<String>,

    /// Unit references, `name` or `type/name`.
    pub units: Vec<String>,
}

impl ComparisonRequest {
    pub fn new<I, S>(collection: impl Into<String>, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            target_collection: None,
            units: units.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_target_collection(mut self, target: impl Into<String>) -> Self {
        self.target_collection = Some(target.into());
        self
    }

    pub fn target_collection(&self) -> &str {
        self.target_collection.as_deref().unwrap_or(&self.collection)
    }
}

/// Counts for one unit on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitComparison {
    /// The unit reference as given by the caller.
    #[serde(rename = "table")]
    pub unit: String,

    pub unit_type: String,
    pub exists_in_source: bool,
    pub exists_in_target: bool,
    pub row_count_source: u64,
    pub row_count_target: u64,
    pub divergent: bool,
}

impl UnitComparison {
    pub fn new(
        unit: impl Into<String>,
        unit_type: impl Into<String>,
        source: crate::core::UnitCount,
        target: crate::core::UnitCount,
    ) -> Self {
        let divergent = source.count != target.count || !source.exists || !target.exists;
        Self {
            unit: unit.into(),
            unit_type: unit_type.into(),
            exists_in_source: source.exists,
            exists_in_target: target.exists,
            row_count_source: source.count,
            row_count_target: target.count,
            divergent,
        }
    }
}

/// Outcome of comparing one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub collection: String,

    /// Units present in the source.
    #[serde(rename = "table_count_source")]
    pub source_count: usize,

    /// Units present in the target.
    #[serde(rename = "table_count_target")]
    pub target_count: usize,

    #[serde(rename = "table_count_equal")]
    pub counts_equal: bool,

    /// Divergent units first, otherwise in request order.
    #[serde(rename = "tables")]
    pub units: Vec<UnitComparison>,
}

impl ComparisonResult {
    /// Aggregate per-unit comparisons into a result.
    pub fn from_units(collection: impl Into<String>, mut units: Vec<UnitComparison>) -> Self {
        // sort_by_key is stable, so request order survives inside each group
        units.sort_by_key(|u| !u.divergent);
        let source_count = units.iter().filter(|u| u.exists_in_source).count();
        let target_count = units.iter().filter(|u| u.exists_in_target).count();
        Self {
            collection: collection.into(),
            source_count,
            target_count,
            counts_equal: source_count == target_count,
            units,
        }
    }

    pub fn divergent_count(&self) -> usize {
        self.units.iter().filter(|u| u.divergent).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.counts_equal && self.divergent_count() == 0
    }
}

/// Result of one collection within a batch comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionComparison {
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ComparisonResult>,

    /// Set when this collection failed; `result` then holds the units
    /// compared before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
