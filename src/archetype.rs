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

//! Archetype storage: chunked columnar layout with swap-remove.
//!
//! An archetype owns every entity whose component set is exactly its
//! signature. Storage is structure-of-arrays: fixed-capacity chunks, one
//! column per data component, with parallel added/changed tick arrays.
//! Rows `0..count` of a chunk are live; swap-with-last keeps them compact.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::component::{ComponentId, ComponentRegistry};
use crate::entity::{EntityId, Tick};
use crate::storage::{overwrite_row, ChunkStorage, StorageProvider};

/// Rows per chunk. Power of two.
pub const CHUNK_CAPACITY: usize = 4096;

/// Chunk-list capacity reserved at archetype creation.
pub const INITIAL_CHUNKS_PER_ARCHETYPE: usize = 4;

/// Sorted, deduplicated component-id set identifying an archetype.
pub type ArchetypeSignature = SmallVec<[ComponentId; 8]>;

/// Order-independent 64-bit hash of a component set (FNV-1a over the
/// sorted ids), used as the archetype's stable id.
pub fn signature_hash(sorted_ids: &[ComponentId]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for id in sorted_ids {
        for byte in id.to_raw().to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// One component's membership in an archetype.
#[derive(Debug, Clone, Copy)]
pub struct ComponentSlot {
    pub id: ComponentId,
    pub size: usize,
    /// Column index for data components; `None` for tags.
    pub column: Option<usize>,
}

/// Per-column allocation recipe, captured from the registry at archetype
/// creation so transitions never consult the registry again.
#[derive(Clone)]
pub struct ColumnLayout {
    pub component: ComponentId,
    pub size: usize,
    pub provider: Arc<dyn StorageProvider>,
}

/// One component's storage within one chunk.
pub struct Column {
    storage: Option<ChunkStorage>,
    provider: Arc<dyn StorageProvider>,
    size: usize,
    /// Cached at creation: the provider reported a contiguous base
    /// pointer, so iteration may expose this column as a typed slice.
    native: bool,
    added: Box<[Tick]>,
    changed: Box<[Tick]>,
}

impl Column {
    fn new(layout: &ColumnLayout) -> Self {
        let storage = layout.provider.alloc_chunk(layout.size, CHUNK_CAPACITY);
        let native = layout.provider.base_ptr(&storage).is_some();
        Column {
            storage: Some(storage),
            provider: Arc::clone(&layout.provider),
            size: layout.size,
            native,
            added: vec![0; CHUNK_CAPACITY].into_boxed_slice(),
            changed: vec![0; CHUNK_CAPACITY].into_boxed_slice(),
        }
    }

    pub fn provider(&self) -> &dyn StorageProvider {
        &*self.provider
    }

    pub fn storage(&self) -> &ChunkStorage {
        self.storage.as_ref().expect("column storage already freed")
    }

    pub fn is_native(&self) -> bool {
        self.native
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Row bytes, valid until the next structural mutation.
    pub fn row_bytes(&self, row: usize) -> &[u8] {
        let ptr = self.provider.get_ptr(self.storage(), row, self.size);
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) }
    }

    pub(crate) fn row_bytes_mut(&mut self, row: usize) -> &mut [u8] {
        let ptr = self
            .provider
            .get_ptr(self.storage.as_ref().expect("column storage already freed"), row, self.size);
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size) }
    }

    pub fn added_ticks(&self) -> &[Tick] {
        &self.added
    }

    pub fn changed_ticks(&self) -> &[Tick] {
        &self.changed
    }

    fn write(&mut self, row: usize, bytes: &[u8]) {
        let storage = self.storage.as_mut().expect("column storage already freed");
        self.provider.set(storage, row, bytes);
    }

    fn swap_remove_row(&mut self, row: usize, last: usize) {
        let storage = self.storage.as_mut().expect("column storage already freed");
        overwrite_row(&*self.provider, storage, row, last, self.size);
        self.added[row] = self.added[last];
        self.changed[row] = self.changed[last];
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.provider.free_chunk(storage);
        }
    }
}

/// Fixed-capacity bucket of rows. The entity array runs parallel to every
/// column; rows `count..CHUNK_CAPACITY` are dead and never read.
pub struct Chunk {
    entities: Box<[EntityId]>,
    columns: Vec<Column>,
    count: usize,
}

impl Chunk {
    fn new(layouts: &[ColumnLayout]) -> Self {
        Chunk {
            entities: vec![EntityId::NULL; CHUNK_CAPACITY].into_boxed_slice(),
            columns: layouts.iter().map(Column::new).collect(),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count == CHUNK_CAPACITY
    }

    /// Live entity ids, row-parallel with every column.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities[..self.count]
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub(crate) fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }
}

/// The storage class of one exact component set.
pub struct Archetype {
    id: u64,
    components: Vec<ComponentSlot>,
    layouts: Vec<ColumnLayout>,
    component_map: FxHashMap<ComponentId, usize>,
    column_map: FxHashMap<ComponentId, usize>,
    chunks: Vec<Chunk>,
    entity_count: usize,
    add_edges: FxHashMap<ComponentId, usize>,
    remove_edges: FxHashMap<ComponentId, usize>,
}

impl Archetype {
    /// Build an archetype for a sorted, deduplicated signature.
    ///
    /// Data components receive column indices in sort order; chunks are
    /// allocated lazily on first insertion.
    pub(crate) fn new(signature: &[ComponentId], registry: &ComponentRegistry) -> Self {
        debug_assert!(signature.windows(2).all(|w| w[0] < w[1]));

        let mut components = Vec::with_capacity(signature.len());
        let mut layouts = Vec::new();
        let mut component_map = FxHashMap::default();
        let mut column_map = FxHashMap::default();

        for &id in signature {
            let info = registry
                .info(id)
                .expect("unregistered component in archetype signature");

            let column = if info.is_tag() {
                None
            } else {
                let column = layouts.len();
                layouts.push(ColumnLayout {
                    component: id,
                    size: info.size,
                    provider: Arc::clone(&info.provider),
                });
                column_map.insert(id, column);
                Some(column)
            };

            component_map.insert(id, components.len());
            components.push(ComponentSlot {
                id,
                size: info.size,
                column,
            });
        }

        Archetype {
            id: signature_hash(signature),
            components,
            layouts,
            component_map,
            column_map,
            chunks: Vec::with_capacity(INITIAL_CHUNKS_PER_ARCHETYPE),
            entity_count: 0,
            add_edges: FxHashMap::default(),
            remove_edges: FxHashMap::default(),
        }
    }

    /// Order-independent hash of the component set.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn components(&self) -> &[ComponentSlot] {
        &self.components
    }

    /// Data columns in column-index order.
    pub fn data_columns(&self) -> &[ColumnLayout] {
        &self.layouts
    }

    pub fn tags(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components
            .iter()
            .filter(|slot| slot.column.is_none())
            .map(|slot| slot.id)
    }

    pub fn signature(&self) -> ArchetypeSignature {
        self.components.iter().map(|slot| slot.id).collect()
    }

    pub fn has(&self, component: ComponentId) -> bool {
        self.component_map.contains_key(&component)
    }

    pub fn slot(&self, component: ComponentId) -> Option<&ComponentSlot> {
        let index = *self.component_map.get(&component)?;
        self.components.get(index)
    }

    /// Column index for a data component; `None` for tags and absentees.
    pub fn column_index(&self, component: ComponentId) -> Option<usize> {
        self.column_map.get(&component).copied()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    // ---- graph edges -------------------------------------------------

    /// Cached destination for adding `component`, when populated.
    pub fn add_edge(&self, component: ComponentId) -> Option<usize> {
        self.add_edges.get(&component).copied()
    }

    /// Cached destination for removing `component`, when populated.
    pub fn remove_edge(&self, component: ComponentId) -> Option<usize> {
        self.remove_edges.get(&component).copied()
    }

    pub(crate) fn set_add_edge(&mut self, component: ComponentId, target: usize) {
        self.add_edges.insert(component, target);
    }

    pub(crate) fn set_remove_edge(&mut self, component: ComponentId, target: usize) {
        self.remove_edges.insert(component, target);
    }

    /// Drop every cached edge. Used after compaction renumbers the table.
    pub(crate) fn clear_edges(&mut self) {
        self.add_edges.clear();
        self.remove_edges.clear();
    }

    // ---- rows --------------------------------------------------------

    /// Insert an entity, stamping `added = changed = tick` on every data
    /// column. Returns the `(chunk, row)` coordinate.
    pub(crate) fn add_entity(&mut self, entity: EntityId, tick: Tick) -> (usize, usize) {
        let chunk_index = match self.chunks.iter().position(|c| !c.is_full()) {
            Some(index) => index,
            None => {
                self.chunks.push(Chunk::new(&self.layouts));
                self.chunks.len() - 1
            }
        };

        let chunk = &mut self.chunks[chunk_index];
        let row = chunk.count;
        chunk.entities[row] = entity;
        for column in &mut chunk.columns {
            column.added[row] = tick;
            column.changed[row] = tick;
        }
        chunk.count += 1;
        self.entity_count += 1;
        (chunk_index, row)
    }

    /// Swap-remove a row within its chunk.
    ///
    /// Returns the id of the entity relocated into `row` (the former last
    /// row of the chunk), if any; the caller must repair its record.
    pub(crate) fn remove_entity(&mut self, chunk_index: usize, row: usize) -> Option<EntityId> {
        let chunk = &mut self.chunks[chunk_index];
        debug_assert!(row < chunk.count, "row out of range in remove_entity");

        let last = chunk.count - 1;
        let moved = if row != last {
            chunk.entities[row] = chunk.entities[last];
            for column in &mut chunk.columns {
                column.swap_remove_row(row, last);
            }
            Some(chunk.entities[row])
        } else {
            None
        };

        chunk.count -= 1;
        self.entity_count -= 1;
        moved
    }

    /// Overwrite a data column's row and stamp its ticks.
    pub(crate) fn write_component(
        &mut self,
        chunk: usize,
        row: usize,
        column: usize,
        bytes: &[u8],
        tick: Tick,
        stamp_added: bool,
    ) {
        let column = self.chunks[chunk]
            .column_mut(column)
            .expect("column index out of range");
        column.write(row, bytes);
        column.changed[row] = tick;
        if stamp_added {
            column.added[row] = tick;
        }
    }

    pub(crate) fn stamp_changed(&mut self, chunk: usize, row: usize, column: usize, tick: Tick) {
        let column = self.chunks[chunk]
            .column_mut(column)
            .expect("column index out of range");
        column.changed[row] = tick;
    }

    pub(crate) fn row_bytes(&self, chunk: usize, row: usize, column: usize) -> &[u8] {
        self.chunks[chunk]
            .column(column)
            .expect("column index out of range")
            .row_bytes(row)
    }

    pub(crate) fn row_bytes_mut(&mut self, chunk: usize, row: usize, column: usize) -> &mut [u8] {
        self.chunks[chunk]
            .column_mut(column)
            .expect("column index out of range")
            .row_bytes_mut(row)
    }

    /// Copy every data column shared with `dst`, tick values included.
    /// Both coordinates must already be allocated.
    pub(crate) fn copy_row_to(
        &self,
        src_chunk: usize,
        src_row: usize,
        dst: &mut Archetype,
        dst_chunk: usize,
        dst_row: usize,
    ) {
        for (src_column, layout) in self.layouts.iter().enumerate() {
            let Some(dst_column) = dst.column_index(layout.component) else {
                continue;
            };

            let src_col = &self.chunks[src_chunk].columns[src_column];
            let dst_col = &mut dst.chunks[dst_chunk].columns[dst_column];

            let dst_storage = dst_col
                .storage
                .as_mut()
                .expect("column storage already freed");
            layout.provider.copy(
                src_col.storage(),
                src_row,
                dst_storage,
                dst_row,
                layout.size,
            );
            dst_col.added[dst_row] = src_col.added[src_row];
            dst_col.changed[dst_row] = src_col.changed[src_row];
        }
    }
}
