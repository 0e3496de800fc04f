//! Direction registry
//!
//! Catalog of directions built once at startup. Registration is only possible
//! until [`DirectionRegistry::seal`] is called; afterwards the registry is
//! shared read-only behind an `Arc` and needs no locking.

use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::Direction;

#[derive(Debug, Default)]
pub struct DirectionRegistry {
    /// Registration order
    directions: Vec<Arc<Direction>>,
    /// key → position in `directions`
    index: HashMap<String, usize>,
    sealed: bool,
}

impl DirectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and seal a registry from loaded definitions.
    pub fn from_directions(
        directions: impl IntoIterator<Item = Direction>,
    ) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for direction in directions {
            registry.register(direction)?;
        }
        registry.seal();
        Ok(registry)
    }

    pub fn register(&mut self, direction: Direction) -> Result<(), EngineError> {
        if self.sealed {
            return Err(EngineError::RegistrySealed);
        }
        if self.index.contains_key(&direction.key) {
            return Err(EngineError::DuplicateDirection(direction.key));
        }

        debug!(key = %direction.key, templates = direction.templates.len(), "Registered direction");
        self.index
            .insert(direction.key.clone(), self.directions.len());
        self.directions.push(Arc::new(direction));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Arc<Direction>, EngineError> {
        self.index
            .get(key)
            .map(|&i| Arc::clone(&self.directions[i]))
            .ok_or_else(|| EngineError::UnknownDirection(key.to_string()))
    }

    /// Directions in registration order. The iterator is cheap to clone.
    pub fn list(&self) -> impl Iterator<Item = &Arc<Direction>> + Clone + '_ {
        self.directions.iter()
    }

    /// Resolve user input to a direction: key, display name or 1-based index.
    pub fn find(&self, input: &str) -> Option<Arc<Direction>> {
        let needle = input.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        self.directions
            .iter()
            .find(|d| d.key == needle || d.display_name.to_lowercase() == needle)
            .or_else(|| {
                needle
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.directions.get(i))
            })
            .cloned()
    }

    /// Forbid further registration. One-way.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directions.is_empty()
    }
}
