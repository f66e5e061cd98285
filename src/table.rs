//! Binding table
//!
//! Ordered set of action bindings, one per catalogue action, built once from
//! configuration. Inbound dispatch scans it in catalogue order and the first
//! matching binding wins.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::binding::{config_key, ActionBinding, BindingError};

/// Actions the application can map to MIDI gestures, in dispatch order
pub const ACTION_CATALOGUE: [&str; 23] = [
    "clear",
    "black",
    "goToItem",
    "next",
    "nextItem",
    "play",
    "prev",
    "prevItem",
    "section",
    "logo",
    "transposeDown1",
    "transposeDown2",
    "transposeDown3",
    "transposeDown4",
    "transposeDown5",
    "transposeDown6",
    "transposeUp0",
    "transposeUp1",
    "transposeUp2",
    "transposeUp3",
    "transposeUp4",
    "transposeUp5",
    "transposeUp6",
];

/// Key/value source of binding configuration strings
pub trait BindingSource {
    /// Configuration string stored under `key` (`midi.Action.<action>`)
    fn binding_config(&self, key: &str) -> Option<String>;
}

impl BindingSource for HashMap<String, String> {
    fn binding_config(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl BindingSource for BTreeMap<String, String> {
    fn binding_config(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("no MIDI configuration for action '{action}' (key '{key}')")]
    MissingBinding { action: String, key: String },

    #[error("no binding for action '{0}'")]
    NotFound(String),
}

/// Catalogue-ordered action bindings
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: Vec<ActionBinding>,
    rejected: Vec<BindingError>,
}

impl BindingTable {
    /// Build the table for the standard [`ACTION_CATALOGUE`]
    pub fn with_default_catalogue<S: BindingSource + ?Sized>(
        source: &S,
    ) -> Result<Self, TableError> {
        Self::build(&ACTION_CATALOGUE, source)
    }

    /// Build a table with one binding per catalogue action.
    ///
    /// Fails without constructing anything when an action has no
    /// configuration entry. A malformed entry does not fail the build: the
    /// error is kept in [`BindingTable::rejected`] and the action gets a
    /// disabled binding that never matches.
    pub fn build<S: BindingSource + ?Sized>(
        catalogue: &[&str],
        source: &S,
    ) -> Result<Self, TableError> {
        let mut configs = Vec::with_capacity(catalogue.len());
        for action in catalogue {
            let key = config_key(action);
            match source.binding_config(&key) {
                Some(config) => configs.push((*action, config)),
                None => {
                    return Err(TableError::MissingBinding {
                        action: action.to_string(),
                        key,
                    })
                }
            }
        }

        let mut table = Self::default();
        for (action, config) in configs {
            if table.position(action).is_some() {
                warn!("Duplicate catalogue action '{}' ignored", action);
                continue;
            }

            match ActionBinding::parse(&config, action) {
                Ok(binding) => {
                    debug!("Add MIDI binding [{}] for '{}'", binding.config_string(), action);
                    table.bindings.push(binding);
                }
                Err(e) => {
                    warn!("MIDI binding for '{}' disabled: {}", action, e);
                    table.bindings.push(ActionBinding::placeholder(action));
                    table.rejected.push(e);
                }
            }
        }

        info!(
            "Built MIDI binding table: {} actions, {} rejected",
            table.bindings.len(),
            table.rejected.len()
        );
        Ok(table)
    }

    fn position(&self, action: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.action() == action)
    }

    pub fn lookup(&self, action: &str) -> Result<&ActionBinding, TableError> {
        self.position(action)
            .map(|i| &self.bindings[i])
            .ok_or_else(|| TableError::NotFound(action.to_string()))
    }

    /// Mutable access for edits through the binding's validating setters
    pub fn get_mut(&mut self, action: &str) -> Option<&mut ActionBinding> {
        let index = self.position(action)?;
        Some(&mut self.bindings[index])
    }

    /// Replace the binding for the same action
    pub fn replace(&mut self, binding: ActionBinding) -> Result<ActionBinding, TableError> {
        let index = self
            .position(binding.action())
            .ok_or_else(|| TableError::NotFound(binding.action().to_string()))?;
        Ok(std::mem::replace(&mut self.bindings[index], binding))
    }

    /// First enabled action, in catalogue order, matching status and data 1.
    ///
    /// A disabled binding never matches, even when its pattern does.
    pub fn match_first(&self, status: u8, data1: u8) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.is_enabled() && b.matches(status, data1))
            .map(|b| b.action())
    }

    /// Another enabled action already bound to the same pattern as `candidate`
    pub fn conflicting(&self, candidate: &ActionBinding) -> Option<&str> {
        self.bindings
            .iter()
            .filter(|b| b.is_enabled() && b.action() != candidate.action())
            .find(|b| b.same_pattern(candidate))
            .map(|b| b.action())
    }

    /// Entries that failed to parse while building
    pub fn rejected(&self) -> &[BindingError] {
        &self.rejected
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// `(config key, serialized binding)` pairs in catalogue order.
    /// Rejected entries are left out so their original text survives an
    /// export.
    pub fn to_properties(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .filter(|b| b.is_configured())
            .map(|b| (b.config_key().to_string(), b.serialize()))
            .collect()
    }
}

/// Shared, swappable reference to the active table.
///
/// Readers take a snapshot and match against it without holding the lock,
/// so a reload never blocks inbound dispatch for longer than a pointer swap.
#[derive(Debug, Clone, Default)]
pub struct TableHandle {
    inner: Arc<RwLock<Arc<BindingTable>>>,
}

impl TableHandle {
    pub fn new(table: BindingTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn snapshot(&self) -> Arc<BindingTable> {
        self.inner.read().clone()
    }

    /// Install a new table, returning the previous one
    pub fn replace(&self, table: BindingTable) -> Arc<BindingTable> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(table))
    }

    /// Copy-on-write edit of the active table
    pub fn update<R>(&self, f: impl FnOnce(&mut BindingTable) -> R) -> R {
        let mut guard = self.inner.write();
        f(Arc::make_mut(&mut guard))
    }
}
