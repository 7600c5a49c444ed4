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

//! World: central entity, registry, and archetype storage.

use std::sync::Arc;

use ahash::AHashMap;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::{Archetype, ArchetypeSignature};
use crate::component::{ComponentId, ComponentInfo, ComponentRegistry};
use crate::entity::{EntityId, EntityIndex, EntityRecord, Tick};
use crate::error::{EcsError, Result};
use crate::hierarchy::ChildrenIndex;
use crate::storage::{NativeProvider, StorageProvider};

/// Archetype-table capacity reserved at world creation.
pub const INITIAL_ARCHETYPE_CAPACITY: usize = 64;

/// The empty archetype. Always at index 0, never freed.
const ROOT_ARCHETYPE: usize = 0;

/// Central ECS world: component registry, entity index, archetype table
/// and graph, tick counter.
///
/// A world is owned by one caller at a time; no operation suspends or
/// blocks. Structural mutation while an iterator is live is rejected by
/// the borrow checker.
pub struct World {
    registry: ComponentRegistry,
    entities: EntityIndex,

    /// All archetypes. Index 0 is the root (empty) archetype.
    archetypes: Vec<Archetype>,

    /// Canonical sorted signature -> archetype index. One archetype per
    /// distinct component set.
    archetype_index: AHashMap<ArchetypeSignature, usize>,

    /// Parent id -> child list side table for the built-in hierarchy
    /// components.
    children: ChildrenIndex,

    parent_component: ComponentId,
    children_component: ComponentId,

    default_provider: Arc<dyn StorageProvider>,

    /// Current world tick. Tick 0 is reserved so change-detection
    /// comparisons against a zeroed column always read "never".
    tick: Tick,

    /// Bumped whenever the archetype *set* changes (creation, compaction,
    /// clear). Query caches revalidate against this.
    structural_change_version: u64,
}

impl World {
    /// Create a new, empty world.
    ///
    /// The root archetype is bootstrapped at index 0 and the two built-in
    /// hierarchy components ("parent", "children") are registered.
    pub fn new() -> Self {
        let default_provider: Arc<dyn StorageProvider> = Arc::new(NativeProvider);
        let mut world = Self {
            registry: ComponentRegistry::new(),
            entities: EntityIndex::new(),
            archetypes: Vec::with_capacity(INITIAL_ARCHETYPE_CAPACITY),
            archetype_index: AHashMap::with_capacity(INITIAL_ARCHETYPE_CAPACITY),
            children: ChildrenIndex::new(),
            parent_component: ComponentId::from_raw(0),
            children_component: ComponentId::from_raw(0),
            default_provider,
            tick: 1,
            structural_change_version: 0,
        };

        world.get_or_create_archetype(&ArchetypeSignature::new());
        world.parent_component = world.register_component("parent", std::mem::size_of::<u64>());
        world.children_component = world.register_component("children", 0);
        world
    }

    // ---- ticks -------------------------------------------------------

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Advance one frame.
    pub fn update(&mut self) {
        // Panic on overflow - tick wraparound would break change detection
        if self.tick == Tick::MAX {
            panic!("World tick overflow at {}", self.tick);
        }
        self.tick += 1;
    }

    // ---- registration ------------------------------------------------

    /// Register a component type with the default (native) provider.
    /// A size of 0 registers a tag.
    pub fn register_component(&mut self, name: &str, size: usize) -> ComponentId {
        self.registry
            .register(name, size, Arc::clone(&self.default_provider))
    }

    /// Register a component type routed through a custom storage provider.
    pub fn register_component_with(
        &mut self,
        name: &str,
        size: usize,
        provider: Arc<dyn StorageProvider>,
    ) -> ComponentId {
        self.registry.register(name, size, provider)
    }

    /// Linear name lookup; for tools and tests.
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.registry.component_id(name)
    }

    pub fn component_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.registry.info(id)
    }

    pub fn default_storage_provider(&self) -> Arc<dyn StorageProvider> {
        Arc::clone(&self.default_provider)
    }

    /// Id of the built-in "parent" component (one packed entity id).
    pub fn parent_component(&self) -> ComponentId {
        self.parent_component
    }

    /// Id of the built-in "children" tag component.
    pub fn children_component(&self) -> ComponentId {
        self.children_component
    }

    // ---- entities ----------------------------------------------------

    /// Create an entity in the root archetype.
    pub fn spawn(&mut self) -> EntityId {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.spawn", archetype_count = self.archetypes.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let entity = self.entities.create();
        let (chunk, row) = self.archetypes[ROOT_ARCHETYPE].add_entity(entity, self.tick);
        self.entities.set_record(
            entity,
            EntityRecord {
                archetype: ROOT_ARCHETYPE,
                chunk,
                row,
            },
        );
        entity
    }

    /// Delete an entity and all its components.
    ///
    /// The entity is detached from its parent's child list and its own
    /// children are orphaned (their parent component is removed). See
    /// [`World::despawn_recursive`] for subtree deletion.
    pub fn despawn(&mut self, entity: EntityId) -> Result<()> {
        if !self.entities.contains(entity) {
            return Err(EcsError::EntityNotFound);
        }

        self.detach_from_parent(entity);
        for child in self.children.take(entity) {
            let parent_component = self.parent_component;
            let _ = self.unset(child, parent_component);
        }

        // Hierarchy fixups above may have relocated rows; read the final
        // coordinate only now.
        let record = self
            .entities
            .release(entity)
            .expect("entity vanished during despawn");
        let moved = self.archetypes[record.archetype].remove_entity(record.chunk, record.row);
        if let Some(moved) = moved {
            if let Some(moved_record) = self.entities.get_mut(moved) {
                moved_record.row = record.row;
            }
        }
        Ok(())
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains(entity)
    }

    /// Number of live entities (equals the sum of chunk counts across all
    /// archetypes).
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entity_record(&self, entity: EntityId) -> Option<EntityRecord> {
        self.entities.get(entity).copied()
    }

    // ---- components --------------------------------------------------

    /// Write a component on an entity, transitioning archetypes when the
    /// component is not already present.
    ///
    /// `bytes.len()` must equal the registered size (0 for tags). An
    /// in-place overwrite stamps the changed tick; a fresh insertion
    /// stamps added and changed.
    pub fn set(&mut self, entity: EntityId, component: ComponentId, bytes: &[u8]) -> Result<()> {
        let info = self
            .registry
            .info(component)
            .ok_or(EcsError::ComponentNotFound)?;
        let size = info.size;
        if bytes.len() != size {
            return Err(EcsError::SizeMismatch {
                expected: size,
                got: bytes.len(),
            });
        }
        let record = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let tick = self.tick;

        let archetype = &mut self.archetypes[record.archetype];
        if let Some(column) = archetype.column_index(component) {
            archetype.write_component(record.chunk, record.row, column, bytes, tick, false);
            return Ok(());
        }
        if archetype.has(component) {
            // Tag already present: nothing to write.
            return Ok(());
        }

        let destination = self.add_edge_target(record.archetype, component);
        self.move_entity(entity, record, destination, Some((component, bytes)));
        Ok(())
    }

    /// Typed convenience over [`World::set`].
    pub fn set_value<T: bytemuck::NoUninit>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        value: &T,
    ) -> Result<()> {
        self.set(entity, component, bytemuck::bytes_of(value))
    }

    /// Component bytes for an entity. `None` for stale entities, absent
    /// or unregistered components, and tags.
    pub fn get(&self, entity: EntityId, component: ComponentId) -> Option<&[u8]> {
        let record = self.entities.get(entity)?;
        let archetype = self.archetypes.get(record.archetype)?;
        let column = archetype.column_index(component)?;
        Some(archetype.row_bytes(record.chunk, record.row, column))
    }

    /// Mutable component bytes. Stamps the row's changed tick.
    pub fn get_mut(&mut self, entity: EntityId, component: ComponentId) -> Option<&mut [u8]> {
        let record = *self.entities.get(entity)?;
        let tick = self.tick;
        let archetype = self.archetypes.get_mut(record.archetype)?;
        let column = archetype.column_index(component)?;
        archetype.stamp_changed(record.chunk, record.row, column, tick);
        Some(archetype.row_bytes_mut(record.chunk, record.row, column))
    }

    /// Typed convenience over [`World::get`]; copies the value out.
    pub fn get_value<T: bytemuck::AnyBitPattern>(
        &self,
        entity: EntityId,
        component: ComponentId,
    ) -> Option<T> {
        let bytes = self.get(entity, component)?;
        if bytes.len() != std::mem::size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Presence check; true for tags as well as data components.
    pub fn has(&self, entity: EntityId, component: ComponentId) -> bool {
        match self.entities.get(entity) {
            Some(record) => self.archetypes[record.archetype].has(component),
            None => false,
        }
    }

    /// Remove a component from an entity. Removing an absent component is
    /// a no-op.
    pub fn unset(&mut self, entity: EntityId, component: ComponentId) -> Result<()> {
        if self.registry.info(component).is_none() {
            return Err(EcsError::ComponentNotFound);
        }
        let record = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        if !self.archetypes[record.archetype].has(component) {
            return Ok(());
        }

        if component == self.parent_component {
            self.detach_from_parent(entity);
        }
        // The detach may have unset a tag on another entity and relocated
        // this one's row in the process; re-resolve before moving.
        let record = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;

        let destination = self.remove_edge_target(record.archetype, component);
        self.move_entity(entity, record, destination, None);
        Ok(())
    }

    /// Stamp a component's changed tick without writing it.
    pub fn mark_changed(&mut self, entity: EntityId, component: ComponentId) -> Result<()> {
        if self.registry.info(component).is_none() {
            return Err(EcsError::ComponentNotFound);
        }
        let record = *self.entities.get(entity).ok_or(EcsError::EntityNotFound)?;
        let tick = self.tick;
        let archetype = &mut self.archetypes[record.archetype];
        match archetype.column_index(component) {
            Some(column) => {
                archetype.stamp_changed(record.chunk, record.row, column, tick);
                Ok(())
            }
            // Tags carry no ticks.
            None if archetype.has(component) => Ok(()),
            None => Err(EcsError::ComponentNotFound),
        }
    }

    // ---- archetypes --------------------------------------------------

    pub fn archetype(&self, index: usize) -> Option<&Archetype> {
        self.archetypes.get(index)
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Version counter queries revalidate against; advances when the
    /// archetype set changes.
    pub fn structural_change_version(&self) -> u64 {
        self.structural_change_version
    }

    /// Free every empty archetype except the root. Returns the number
    /// freed. Surviving archetypes keep their chunks.
    pub fn remove_empty_archetypes(&mut self) -> usize {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.compact", archetype_count = self.archetypes.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        let previous = std::mem::take(&mut self.archetypes);
        let mut remap: Vec<Option<usize>> = Vec::with_capacity(previous.len());
        let mut freed = 0;
        for (index, archetype) in previous.into_iter().enumerate() {
            if index != ROOT_ARCHETYPE && archetype.is_empty() {
                remap.push(None);
                freed += 1;
            } else {
                remap.push(Some(self.archetypes.len()));
                self.archetypes.push(archetype);
            }
        }
        if freed == 0 {
            return 0;
        }

        // Cached edges may point at freed slots; let them rebuild lazily.
        for archetype in &mut self.archetypes {
            archetype.clear_edges();
        }
        self.archetype_index.clear();
        for (index, archetype) in self.archetypes.iter().enumerate() {
            self.archetype_index.insert(archetype.signature(), index);
        }
        for record in self.entities.records_mut() {
            record.archetype = remap[record.archetype].expect("live entity in freed archetype");
        }

        self.structural_change_version += 1;
        freed
    }

    /// Delete every entity and archetype, keeping component registrations.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.archetypes.clear();
        self.archetype_index.clear();
        self.children.clear();
        self.structural_change_version += 1;
        self.get_or_create_archetype(&ArchetypeSignature::new());
    }

    // ---- hierarchy ---------------------------------------------------

    /// Attach `child` under `parent`, replacing any previous parent.
    ///
    /// Maintains the built-in parent component on the child, the children
    /// tag on the parent, and the world's child-list side table. Prefer
    /// this over writing the parent component directly.
    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) -> Result<()> {
        if !self.entities.contains(child) || !self.entities.contains(parent) {
            return Err(EcsError::EntityNotFound);
        }
        if child == parent {
            return Err(EcsError::HierarchyError(
                "cannot parent an entity to itself".to_string(),
            ));
        }
        let mut cursor = parent;
        while let Some(next) = self.stored_parent(cursor) {
            if next == child {
                return Err(EcsError::HierarchyError(
                    "parenting would create a cycle".to_string(),
                ));
            }
            cursor = next;
        }
        if self.stored_parent(child) == Some(parent) {
            return Ok(());
        }

        self.detach_from_parent(child);
        let parent_component = self.parent_component;
        self.set(child, parent_component, &parent.to_bits().to_le_bytes())?;
        self.children.add(parent, child);
        let children_component = self.children_component;
        self.set(parent, children_component, &[])?;
        Ok(())
    }

    /// The entity's live parent, if any.
    pub fn parent_of(&self, entity: EntityId) -> Option<EntityId> {
        let parent = self.stored_parent(entity)?;
        self.entities.contains(parent).then_some(parent)
    }

    /// The entity's children, in attachment order.
    pub fn children_of(&self, entity: EntityId) -> &[EntityId] {
        self.children.children_of(entity)
    }

    /// Detach an entity from its parent, removing the parent component.
    pub fn remove_parent(&mut self, child: EntityId) -> Result<()> {
        let parent_component = self.parent_component;
        self.unset(child, parent_component)
    }

    /// Delete an entity and its whole subtree, leaves first.
    pub fn despawn_recursive(&mut self, entity: EntityId) -> Result<()> {
        let children: Vec<EntityId> = self.children.children_of(entity).to_vec();
        for child in children {
            self.despawn_recursive(child)?;
        }
        self.despawn(entity)
    }

    /// Parent id as stored in the component bytes; no liveness check.
    fn stored_parent(&self, entity: EntityId) -> Option<EntityId> {
        let parent_component = self.parent_component;
        let bytes = self.get(entity, parent_component)?;
        let bits = u64::from_le_bytes(bytes.try_into().ok()?);
        let parent = EntityId::from_bits(bits);
        (!parent.is_null()).then_some(parent)
    }

    fn detach_from_parent(&mut self, entity: EntityId) {
        let Some(parent) = self.stored_parent(entity) else {
            return;
        };
        self.children.remove(parent, entity);
        if self.children.children_of(parent).is_empty() {
            self.children.take(parent);
            let children_component = self.children_component;
            let _ = self.unset(parent, children_component);
        }
    }

    // ---- transitions -------------------------------------------------

    /// Destination for adding `component` to the archetype at `source`,
    /// creating the archetype and caching the edge on both endpoints on
    /// first use.
    fn add_edge_target(&mut self, source: usize, component: ComponentId) -> usize {
        if let Some(target) = self.archetypes[source].add_edge(component) {
            return target;
        }

        let mut signature = self.archetypes[source].signature();
        signature.push(component);
        signature.sort();
        let target = self.get_or_create_archetype(&signature);

        self.archetypes[source].set_add_edge(component, target);
        self.archetypes[target].set_remove_edge(component, source);
        target
    }

    fn remove_edge_target(&mut self, source: usize, component: ComponentId) -> usize {
        if let Some(target) = self.archetypes[source].remove_edge(component) {
            return target;
        }

        let mut signature = self.archetypes[source].signature();
        signature.retain(|id| *id != component);
        let target = self.get_or_create_archetype(&signature);

        self.archetypes[source].set_remove_edge(component, target);
        self.archetypes[target].set_add_edge(component, source);
        target
    }

    /// Move an entity between two distinct archetypes, copying every
    /// shared data column (ticks included) and writing `new_data` into
    /// its destination column when supplied.
    ///
    /// Add-before-remove: the destination row exists before the source
    /// row is swap-removed, and the swap victim's record is repaired.
    fn move_entity(
        &mut self,
        entity: EntityId,
        record: EntityRecord,
        destination: usize,
        new_data: Option<(ComponentId, &[u8])>,
    ) {
        let tick = self.tick;
        let (source_arch, dest_arch) =
            two_archetypes(&mut self.archetypes, record.archetype, destination);

        let (dest_chunk, dest_row) = dest_arch.add_entity(entity, tick);
        source_arch.copy_row_to(record.chunk, record.row, dest_arch, dest_chunk, dest_row);

        if let Some((component, bytes)) = new_data {
            if let Some(column) = dest_arch.column_index(component) {
                dest_arch.write_component(dest_chunk, dest_row, column, bytes, tick, true);
            }
        }

        let moved = source_arch.remove_entity(record.chunk, record.row);
        if let Some(moved) = moved {
            if let Some(moved_record) = self.entities.get_mut(moved) {
                moved_record.row = record.row;
            }
        }

        self.entities.set_record(
            entity,
            EntityRecord {
                archetype: destination,
                chunk: dest_chunk,
                row: dest_row,
            },
        );
    }

    /// Look up or create the archetype for a sorted canonical signature.
    fn get_or_create_archetype(&mut self, signature: &ArchetypeSignature) -> usize {
        if let Some(&index) = self.archetype_index.get(signature) {
            return index;
        }

        let archetype = Archetype::new(signature, &self.registry);
        self.archetypes.push(archetype);
        let index = self.archetypes.len() - 1;
        self.archetype_index.insert(signature.clone(), index);
        self.structural_change_version += 1;
        index
    }
}

fn two_archetypes(
    archetypes: &mut [Archetype],
    a: usize,
    b: usize,
) -> (&mut Archetype, &mut Archetype) {
    debug_assert_ne!(a, b, "transition within one archetype");
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
