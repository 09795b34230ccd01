//! Migration units, unit references and selectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// One migratable item: a Kubernetes object or a database table.
///
/// Identity is `(collection, unit_type, name)`. The collection is the
/// namespace or database the unit lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub collection: String,
    pub unit_type: String,
    pub name: String,
}

impl MigrationUnit {
    pub fn new(
        collection: impl Into<String>,
        unit_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            unit_type: unit_type.into(),
            name: name.into(),
        }
    }

    /// The same unit placed in another collection.
    pub fn in_collection(&self, collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            unit_type: self.unit_type.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.collection, self.unit_type, self.name)
    }
}

/// A unit named inside a collection, as written by users: `name` or `type/name`.
///
/// The type is optional; a connection supplies its default unit type when
/// it is missing (`table` for MySQL).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitRef {
    pub unit_type: Option<String>,
    pub name: String,
}

impl UnitRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (unit_type, name) = match raw.split_once('/') {
            Some((t, n)) => (Some(t.trim().to_string()), n.trim().to_string()),
            None => (None, raw.to_string()),
        };
        if name.is_empty() || unit_type.as_deref().is_some_and(str::is_empty) {
            return Err(MigrateError::Config(format!(
                "invalid unit reference '{}', expected 'name' or 'type/name'",
                raw
            )));
        }
        Ok(Self { unit_type, name })
    }

    /// Type of this reference, falling back to `default_type`.
    pub fn type_or<'a>(&'a self, default_type: &'a str) -> &'a str {
        self.unit_type.as_deref().unwrap_or(default_type)
    }

    /// Resolve into a full unit in `collection`.
    pub fn into_unit(self, collection: &str, default_type: &str) -> MigrationUnit {
        let unit_type = self.unit_type.unwrap_or_else(|| default_type.to_string());
        MigrationUnit::new(collection, unit_type, self.name)
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit_type {
            Some(t) => write!(f, "{}/{}", t, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A coarse user choice that expands to a set of units.
///
/// Either `unit_types` (every unit of those types in the collection) or
/// `units` (explicit `name` / `type/name` entries) must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelector {
    /// Namespace or database on the source side.
    pub collection: String,

    /// Namespace or database on the target side (default: same as source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_collection: Option<String>,

    #[serde(default)]
    pub unit_types: Vec<String>,

    #[serde(default)]
    pub units: Vec<String>,
}

impl ResourceSelector {
    /// Select every unit of the given types.
    pub fn types<I, S>(collection: impl Into<String>, unit_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            target_collection: None,
            unit_types: unit_types.into_iter().map(Into::into).collect(),
            units: Vec::new(),
        }
    }

    /// Select explicit units by reference.
    pub fn units<I, S>(collection: impl Into<String>, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            target_collection: None,
            unit_types: Vec::new(),
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

    /// Structural checks that need no connection.
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(MigrateError::Config("selector collection is required".into()));
        }
        if self.target_collection.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(MigrateError::Config(format!(
                "selector for '{}' has an empty target_collection",
                self.collection
            )));
        }
        if self.unit_types.iter().all(|t| t.trim().is_empty())
            && self.units.iter().all(|u| u.trim().is_empty())
        {
            return Err(MigrateError::EmptySelection(format!(
                "selector for '{}' selects no unit types or units",
                self.collection
            )));
        }
        for unit in &self.units {
            UnitRef::parse(unit)?;
        }
        Ok(())
    }

    /// Parsed explicit unit references.
    pub fn unit_refs(&self) -> Result<Vec<UnitRef>> {
        self.units
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| UnitRef::parse(u))
            .collect()
    }
}

/// A resolved unit paired with where it goes on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUnit {
    pub source: MigrationUnit,
    pub target: MigrationUnit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_ref_parse() {
        let r = UnitRef::parse("deployments/web").unwrap();
        assert_eq!(r.unit_type.as_deref(), Some("deployments"));
        assert_eq!(r.name, "web");

        let r = UnitRef::parse("users").unwrap();
        assert!(r.unit_type.is_none());
        assert_eq!(r.type_or("table"), "table");

        assert!(UnitRef::parse("").is_err());
        assert!(UnitRef::parse("/web").is_err());
        assert!(UnitRef::parse("deployments/").is_err());
    }

    #[test]
    fn test_selector_requires_something_selected() {
        let sel = ResourceSelector::types("default", Vec::<String>::new());
        assert!(matches!(sel.validate(), Err(MigrateError::EmptySelection(_))));

        let sel = ResourceSelector::units("shop", ["users"]);
        assert!(sel.validate().is_ok());
        assert_eq!(sel.target_collection(), "shop");

        let sel = sel.with_target_collection("shop_copy");
        assert_eq!(sel.target_collection(), "shop_copy");
    }

    #[test]
    fn test_selector_units_are_a_list() {
        let json = r#"{"collection":"shop","units":["users","orders"]}"#;
        let sel: ResourceSelector = serde_json::from_str(json).unwrap();
        assert_eq!(sel.units, vec!["users", "orders"]);
        assert!(sel.unit_types.is_empty());
    }

    #[test]
    fn test_unit_display() {
        let unit = MigrationUnit::new("prod", "secrets", "tls");
        assert_eq!(unit.to_string(), "prod/secrets/tls");
        assert_eq!(unit.in_collection("stage").to_string(), "stage/secrets/tls");
    }
}
