//! Child-list side table backing the built-in hierarchy components.
//!
//! The "parent" component stores one packed entity id per child; the
//! "children" component is a tag. Child lists live here because columns
//! hold plain bytes with no drop glue, so an owned growable list cannot
//! sit inside a chunk. [`crate::World::set_parent`] keeps all three in
//! sync.

use ahash::AHashMap;

use crate::entity::EntityId;

/// Parent id -> ordered child list.
#[derive(Default)]
pub struct ChildrenIndex {
    map: AHashMap<EntityId, Vec<EntityId>>,
}

impl ChildrenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a child, ignoring duplicates.
    pub fn add(&mut self, parent: EntityId, child: EntityId) {
        let children = self.map.entry(parent).or_default();
        if !children.contains(&child) {
            children.push(child);
        }
    }

    /// Remove one child; returns whether it was present.
    pub fn remove(&mut self, parent: EntityId, child: EntityId) -> bool {
        match self.map.get_mut(&parent) {
            Some(children) => match children.iter().position(|&c| c == child) {
                Some(position) => {
                    children.remove(position);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Children of `parent` in attachment order; empty when it has none.
    pub fn children_of(&self, parent: EntityId) -> &[EntityId] {
        self.map.get(&parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove and return the whole child list.
    pub fn take(&mut self, parent: EntityId) -> Vec<EntityId> {
        self.map.remove(&parent).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
