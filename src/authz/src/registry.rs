//! Available-actions registry
//!
//! Modules that own resource classes register the actions their items and
//! collections support. The engine consults the registry to expand a `manage`
//! grant into the full action catalog.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::MANAGE_ACTION;

/// An action with its localized display names (language tag -> name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableAction {
    pub name: String,
    #[serde(default)]
    pub localized_names: BTreeMap<String, String>,
}

impl AvailableAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            localized_names: BTreeMap::new(),
        }
    }

    /// Add a localized display name
    pub fn with_name(mut self, language: impl Into<String>, name: impl Into<String>) -> Self {
        self.localized_names.insert(language.into(), name.into());
        self
    }
}

/// Ordered action catalogs of one resource class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClassActions {
    pub item_actions: Vec<AvailableAction>,
    pub collection_actions: Vec<AvailableAction>,
}

impl ResourceClassActions {
    /// Catalog for item resources (`false`) or the collection resource (`true`)
    pub fn catalog(&self, collection: bool) -> &[AvailableAction] {
        if collection {
            &self.collection_actions
        } else {
            &self.item_actions
        }
    }

    /// Action names of a catalog, in registration order
    pub fn action_names(&self, collection: bool) -> Vec<String> {
        self.catalog(collection).iter().map(|a| a.name.clone()).collect()
    }
}

/// Registry of action catalogs keyed by resource class
#[derive(Debug, Default)]
pub struct ActionRegistry {
    classes: DashMap<String, ResourceClassActions>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the catalogs of `resource_class`
    ///
    /// `manage` is prepended to both catalogs unless listed explicitly.
    pub fn register(
        &self,
        resource_class: impl Into<String>,
        item_actions: Vec<AvailableAction>,
        collection_actions: Vec<AvailableAction>,
    ) {
        let resource_class = resource_class.into();
        debug!(
            "Registering actions for '{}': {} item, {} collection",
            resource_class,
            item_actions.len(),
            collection_actions.len()
        );

        self.classes.insert(
            resource_class,
            ResourceClassActions {
                item_actions: with_manage(item_actions),
                collection_actions: with_manage(collection_actions),
            },
        );
    }

    /// Catalogs of `resource_class`; unregistered classes only know `manage`
    pub fn lookup(&self, resource_class: &str) -> ResourceClassActions {
        self.classes
            .get(resource_class)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ResourceClassActions {
                item_actions: with_manage(Vec::new()),
                collection_actions: with_manage(Vec::new()),
            })
    }

    /// Whether `resource_class` registered its catalogs
    pub fn is_registered(&self, resource_class: &str) -> bool {
        self.classes.contains_key(resource_class)
    }

    /// Registered resource classes, sorted
    pub fn resource_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.classes.iter().map(|e| e.key().clone()).collect();
        classes.sort();
        classes
    }
}

fn with_manage(mut actions: Vec<AvailableAction>) -> Vec<AvailableAction> {
    if !actions.iter().any(|a| a.name == MANAGE_ACTION) {
        actions.insert(0, AvailableAction::new(MANAGE_ACTION));
    }
    actions
}
