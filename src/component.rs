// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime component registration.
//!
//! Components are registered with a name and a byte size; a size of zero
//! designates a tag (presence-only, no column). Ids are assigned
//! sequentially starting at 1 and are stable for the world's lifetime.

use std::sync::Arc;

use crate::storage::StorageProvider;

/// Maximum number of component types per world
pub const MAX_COMPONENTS: usize = 1024;

/// Sequentially assigned component identifier, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    pub fn to_raw(self) -> u32 {
        self.0
    }

    /// Rebuild an id from [`ComponentId::to_raw`]. Registration is not implied.
    pub fn from_raw(raw: u32) -> Self {
        ComponentId(raw)
    }

    fn entry_index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

/// Registry entry for one component type.
#[derive(Clone)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub size: usize,
    pub provider: Arc<dyn StorageProvider>,
}

impl PartialEq for ComponentInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.size == other.size
    }
}

impl ComponentInfo {
    /// Tags carry no payload; presence is the only information.
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

impl std::fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("provider", &self.provider.debug_name())
            .finish()
    }
}

/// Insertion-ordered component registry.
///
/// Ids are sequential, so the id-to-entry mapping is the vector index
/// itself; no separate map is needed for constant-time lookup.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: Vec<ComponentInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type and return its id.
    ///
    /// Names are advisory and not deduplicated.
    ///
    /// # Panics
    /// Panics when [`MAX_COMPONENTS`] is exceeded.
    pub fn register(
        &mut self,
        name: &str,
        size: usize,
        provider: Arc<dyn StorageProvider>,
    ) -> ComponentId {
        if self.entries.len() >= MAX_COMPONENTS {
            panic!("Component limit exceeded ({MAX_COMPONENTS})");
        }

        let id = ComponentId(self.entries.len() as u32 + 1);
        self.entries.push(ComponentInfo {
            id,
            name: name.to_string(),
            size,
            provider,
        });
        id
    }

    /// Constant-time entry lookup.
    pub fn info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.entries.get(id.entry_index()?)
    }

    /// Linear search by name; intended for tools and tests, not hot paths.
    /// Returns the first match in registration order.
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NativeProvider;

    fn native() -> Arc<dyn crate::storage::StorageProvider> {
        Arc::new(NativeProvider)
    }

    #[test]
    fn test_sequential_ids_from_one() {
        let mut registry = ComponentRegistry::new();
        let a = registry.register("position", 8, native());
        let b = registry.register("velocity", 8, native());

        assert_eq!(a.to_raw(), 1);
        assert_eq!(b.to_raw(), 2);
        assert_eq!(registry.info(a).unwrap().name, "position");
        assert_eq!(registry.info(ComponentId::from_raw(3)), None);
        assert_eq!(registry.info(ComponentId::from_raw(0)), None);
    }

    #[test]
    fn test_tag_detection() {
        let mut registry = ComponentRegistry::new();
        let tag = registry.register("frozen", 0, native());
        assert!(registry.info(tag).unwrap().is_tag());
    }

    #[test]
    fn test_name_lookup_first_match() {
        let mut registry = ComponentRegistry::new();
        let first = registry.register("health", 4, native());
        registry.register("health", 8, native());

        assert_eq!(registry.component_id("health"), Some(first));
        assert_eq!(registry.component_id("missing"), None);
    }
}
