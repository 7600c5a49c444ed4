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

//! Query building and chunk-at-a-time iteration.
//!
//! A query is a list of terms over component ids. Building scans the
//! archetype table once and caches the matched archetypes; the cache
//! revalidates only when the world's structural-change version advances.
//! Iteration steps one non-empty chunk at a time, exposing the chunk's
//! entity slice and, per requested term, typed column slices (native
//! storage) or a provider escape hatch (anything else).

use smallvec::SmallVec;

use crate::archetype::{Archetype, Chunk, Column};
use crate::component::ComponentId;
use crate::entity::{EntityId, Tick};
use crate::storage::{ChunkStorage, StorageProvider};
use crate::world::World;

/// Maximum terms per query
pub const MAX_QUERY_TERMS: usize = 16;

/// How one term constrains matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    /// Component must be present.
    With,
    /// Component must be absent.
    Without,
    /// No archetype-level constraint; column exposed when present.
    Optional,
    /// Present, plus per-row changed-tick filtering during iteration.
    Changed,
    /// Present, plus per-row added-tick filtering during iteration.
    Added,
}

/// One query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub kind: TermKind,
    pub component: ComponentId,
}

/// A compiled predicate over component sets.
///
/// ```
/// # use strata_ecs::{World, Query};
/// let mut world = World::new();
/// let position = world.register_component("position", 8);
/// let frozen = world.register_component("frozen", 0);
///
/// let mut query = Query::new().with(position).without(frozen);
/// let mut iter = query.iter(&world);
/// while let Some(chunk) = iter.next() {
///     for &entity in chunk.entities() {
///         let _ = entity;
///     }
/// }
/// ```
#[derive(Default)]
pub struct Query {
    terms: SmallVec<[Term; MAX_QUERY_TERMS]>,
    matched: Vec<usize>,
    seen_version: u64,
    built: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: ComponentId) -> Self {
        self.push(TermKind::With, component);
        self
    }

    pub fn without(mut self, component: ComponentId) -> Self {
        self.push(TermKind::Without, component);
        self
    }

    pub fn optional(mut self, component: ComponentId) -> Self {
        self.push(TermKind::Optional, component);
        self
    }

    pub fn changed(mut self, component: ComponentId) -> Self {
        self.push(TermKind::Changed, component);
        self
    }

    pub fn added(mut self, component: ComponentId) -> Self {
        self.push(TermKind::Added, component);
        self
    }

    fn push(&mut self, kind: TermKind, component: ComponentId) {
        debug_assert!(self.terms.len() < MAX_QUERY_TERMS, "query term limit exceeded");
        if self.terms.len() < MAX_QUERY_TERMS {
            self.terms.push(Term { kind, component });
            self.built = false;
        }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Archetype-level match. Term order is irrelevant; an empty query
    /// matches every archetype including the root.
    pub fn matches(&self, archetype: &Archetype) -> bool {
        for term in &self.terms {
            match term.kind {
                TermKind::With | TermKind::Changed | TermKind::Added => {
                    if !archetype.has(term.component) {
                        return false;
                    }
                }
                TermKind::Without => {
                    if archetype.has(term.component) {
                        return false;
                    }
                }
                TermKind::Optional => {}
            }
        }
        true
    }

    /// Scan the archetype table and cache the matches. Cheap when the
    /// structural-change version has not advanced since the last build.
    pub fn build(&mut self, world: &World) {
        let version = world.structural_change_version();
        if self.built && self.seen_version == version {
            return;
        }

        self.matched.clear();
        for (index, archetype) in world.archetypes().iter().enumerate() {
            if self.matches(archetype) {
                self.matched.push(index);
            }
        }
        self.seen_version = version;
        self.built = true;
    }

    /// Matched archetype indices from the last build.
    pub fn matched_archetypes(&self) -> &[usize] {
        &self.matched
    }

    /// Total entities in matched archetypes. Archetype-level only: rows
    /// filtered by changed/added windows are still counted.
    pub fn count(&mut self, world: &World) -> usize {
        self.build(world);
        self.matched
            .iter()
            .filter_map(|&index| world.archetype(index))
            .map(|archetype| archetype.entity_count())
            .sum()
    }

    /// Iterate with the full tick window (every row passes the
    /// changed/added helpers' lower bound of 0).
    pub fn iter<'w>(&'w mut self, world: &'w World) -> QueryIter<'w> {
        self.iter_since(world, 0)
    }

    /// Iterate with a caller-supplied change window: rows match `changed`
    /// / `added` when their tick is newer than `last_run` and no newer
    /// than the world's current tick.
    pub fn iter_since<'w>(&'w mut self, world: &'w World, last_run: Tick) -> QueryIter<'w> {
        self.build(world);
        QueryIter {
            world,
            terms: &self.terms,
            matched: &self.matched,
            archetype_cursor: 0,
            chunk_cursor: 0,
            current: None,
            columns: SmallVec::new(),
            last_run,
            this_run: world.tick(),
        }
    }

    /// Hand every matched non-empty chunk to `func` across the rayon
    /// pool. Distinct chunks cover disjoint byte ranges, so workers may
    /// write their own chunk's columns; structural mutation is excluded
    /// by the shared world borrow.
    #[cfg(feature = "parallel")]
    pub fn par_for_each_chunk<F>(&mut self, world: &World, func: F)
    where
        F: Fn(ChunkView<'_>) + Send + Sync,
    {
        use rayon::prelude::*;

        self.build(world);
        let terms = &self.terms;
        let last_run = 0;
        let this_run = world.tick();

        self.matched.par_iter().for_each(|&archetype_index| {
            let Some(archetype) = world.archetype(archetype_index) else {
                return;
            };
            let columns: TermColumns = terms
                .iter()
                .map(|term| archetype.column_index(term.component))
                .collect();

            archetype.chunks().par_iter().for_each(|chunk| {
                if chunk.count() == 0 {
                    return;
                }
                func(ChunkView {
                    archetype,
                    chunk,
                    columns: columns.clone(),
                    last_run,
                    this_run,
                });
            });
        });
    }
}

type TermColumns = SmallVec<[Option<usize>; MAX_QUERY_TERMS]>;

/// Cursor over a query's matched archetypes, one chunk per step.
pub struct QueryIter<'w> {
    world: &'w World,
    terms: &'w [Term],
    matched: &'w [usize],
    archetype_cursor: usize,
    chunk_cursor: usize,
    current: Option<&'w Archetype>,
    columns: TermColumns,
    last_run: Tick,
    this_run: Tick,
}

impl<'w> QueryIter<'w> {
    /// Advance to the next non-empty chunk.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<ChunkView<'w>> {
        loop {
            if let Some(archetype) = self.current {
                while let Some(chunk) = archetype.chunk(self.chunk_cursor) {
                    self.chunk_cursor += 1;
                    if chunk.count() > 0 {
                        return Some(ChunkView {
                            archetype,
                            chunk,
                            columns: self.columns.clone(),
                            last_run: self.last_run,
                            this_run: self.this_run,
                        });
                    }
                }
                self.current = None;
            }

            let &archetype_index = self.matched.get(self.archetype_cursor)?;
            self.archetype_cursor += 1;
            let Some(archetype) = self.world.archetype(archetype_index) else {
                continue;
            };

            self.columns = self
                .terms
                .iter()
                .map(|term| archetype.column_index(term.component))
                .collect();
            self.chunk_cursor = 0;
            self.current = Some(archetype);
        }
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    pub fn this_run(&self) -> Tick {
        self.this_run
    }
}

/// One matched chunk: entity slice plus per-term column access.
///
/// Term indices refer to the order the terms were added to the query.
/// Column accessors return `None` for absent optional components, tags,
/// and `without` terms.
#[derive(Clone)]
pub struct ChunkView<'w> {
    archetype: &'w Archetype,
    chunk: &'w Chunk,
    columns: TermColumns,
    last_run: Tick,
    this_run: Tick,
}

impl<'w> ChunkView<'w> {
    /// Live rows in this chunk.
    pub fn count(&self) -> usize {
        self.chunk.count()
    }

    pub fn archetype(&self) -> &'w Archetype {
        self.archetype
    }

    /// Entity ids, row-parallel with every column slice.
    pub fn entities(&self) -> &'w [EntityId] {
        self.chunk.entities()
    }

    fn term_column(&self, term: usize) -> Option<&'w Column> {
        let column = (*self.columns.get(term)?)?;
        self.chunk.column(column)
    }

    /// Raw column bytes (native storage only): `count * size` bytes at
    /// the column's base pointer.
    pub fn column_bytes(&self, term: usize) -> Option<&'w [u8]> {
        let column = self.term_column(term)?;
        if !column.is_native() {
            return None;
        }
        let base = column.provider().base_ptr(column.storage())?;
        let len = self.chunk.count() * column.size();
        Some(unsafe { std::slice::from_raw_parts(base.as_ptr(), len) })
    }

    /// Typed column slice (native storage fast path).
    ///
    /// `None` when the column is absent, non-native, `size_of::<T>()`
    /// disagrees with the registered size, or the base pointer is not
    /// aligned for `T`. Non-native columns are read row-by-row through
    /// [`ChunkView::provider`] and [`ChunkView::storage`].
    pub fn column<T: bytemuck::AnyBitPattern>(&self, term: usize) -> Option<&'w [T]> {
        let base = self.typed_base::<T>(term)?;
        Some(unsafe { std::slice::from_raw_parts(base as *const T, self.chunk.count()) })
    }

    /// Mutable typed column slice.
    ///
    /// # Safety
    /// The caller must ensure no other live reference (slice or pointer)
    /// aliases this term's column in this chunk, and that no other thread
    /// writes it concurrently.
    pub unsafe fn column_mut<T: bytemuck::AnyBitPattern + bytemuck::NoUninit>(
        &self,
        term: usize,
    ) -> Option<&'w mut [T]> {
        let base = self.typed_base::<T>(term)?;
        Some(std::slice::from_raw_parts_mut(base as *mut T, self.chunk.count()))
    }

    fn typed_base<T>(&self, term: usize) -> Option<*mut u8> {
        let column = self.term_column(term)?;
        if !column.is_native() || column.size() != std::mem::size_of::<T>() {
            return None;
        }
        let base = column.provider().base_ptr(column.storage())?;
        if base.as_ptr() as usize % std::mem::align_of::<T>() != 0 {
            return None;
        }
        Some(base.as_ptr())
    }

    /// Per-row added ticks for a data column, live rows only.
    pub fn added_ticks(&self, term: usize) -> Option<&'w [Tick]> {
        let column = self.term_column(term)?;
        Some(&column.added_ticks()[..self.chunk.count()])
    }

    /// Per-row changed ticks for a data column, live rows only.
    pub fn changed_ticks(&self, term: usize) -> Option<&'w [Tick]> {
        let column = self.term_column(term)?;
        Some(&column.changed_ticks()[..self.chunk.count()])
    }

    /// Storage handle for non-native row access through the provider.
    pub fn storage(&self, term: usize) -> Option<&'w ChunkStorage> {
        Some(self.term_column(term)?.storage())
    }

    pub fn provider(&self, term: usize) -> Option<&'w dyn StorageProvider> {
        Some(self.term_column(term)?.provider())
    }

    /// Whether the row's component changed inside the iterator's
    /// `(last_run, this_run]` window.
    pub fn changed(&self, term: usize, row: usize) -> bool {
        match self.changed_ticks(term) {
            Some(ticks) => in_window(ticks[row], self.last_run, self.this_run),
            None => false,
        }
    }

    /// Whether the row's component was added inside the window.
    pub fn added(&self, term: usize, row: usize) -> bool {
        match self.added_ticks(term) {
            Some(ticks) => in_window(ticks[row], self.last_run, self.this_run),
            None => false,
        }
    }

    pub fn last_run(&self) -> Tick {
        self.last_run
    }

    pub fn this_run(&self) -> Tick {
        self.this_run
    }
}

// Strictly newer than last_run, no newer than this_run.
fn in_window(tick: Tick, last_run: Tick, this_run: Tick) -> bool {
    tick > last_run && tick <= this_run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_matches_everything() {
        let mut world = World::new();
        let position = world.register_component("position", 8);
        let e1 = world.spawn();
        let e2 = world.spawn();
        world.set_value(e2, position, &[0.0f32, 0.0f32]).unwrap();

        let mut query = Query::new();
        let mut seen = Vec::new();
        let mut iter = query.iter(&world);
        while let Some(chunk) = iter.next() {
            seen.extend_from_slice(chunk.entities());
        }

        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&e1));
        assert!(seen.contains(&e2));
    }

    #[test]
    fn test_with_and_without_terms() {
        let mut world = World::new();
        let position = world.register_component("position", 8);
        let velocity = world.register_component("velocity", 8);

        for _ in 0..5 {
            let e = world.spawn();
            world.set_value(e, position, &[0.0f32; 2]).unwrap();
            world.set_value(e, velocity, &[1.0f32; 2]).unwrap();
        }
        for _ in 0..3 {
            let e = world.spawn();
            world.set_value(e, position, &[0.0f32; 2]).unwrap();
        }

        let mut both = Query::new().with(position).with(velocity);
        assert_eq!(both.count(&world), 5);

        let mut still = Query::new().with(position).without(velocity);
        assert_eq!(still.count(&world), 3);
    }

    #[test]
    fn test_term_order_is_irrelevant() {
        let mut world = World::new();
        let a = world.register_component("a", 4);
        let b = world.register_component("b", 4);
        let e = world.spawn();
        world.set_value(e, a, &1u32).unwrap();
        world.set_value(e, b, &2u32).unwrap();

        let mut ab = Query::new().with(a).with(b);
        let mut ba = Query::new().with(b).with(a);
        ab.build(&world);
        ba.build(&world);
        assert_eq!(ab.matched_archetypes(), ba.matched_archetypes());
    }

    #[test]
    fn test_build_cache_revalidates_on_structural_change() {
        let mut world = World::new();
        let a = world.register_component("a", 4);
        let e = world.spawn();
        world.set_value(e, a, &1u32).unwrap();

        let mut query = Query::new().with(a);
        query.build(&world);
        let first = query.matched_archetypes().to_vec();
        query.build(&world);
        assert_eq!(query.matched_archetypes(), first.as_slice());

        // A new archetype with a matching superset shows up after rebuild.
        let b = world.register_component("b", 4);
        let e2 = world.spawn();
        world.set_value(e2, a, &1u32).unwrap();
        world.set_value(e2, b, &2u32).unwrap();

        query.build(&world);
        assert_eq!(query.matched_archetypes().len(), first.len() + 1);
    }

    #[test]
    fn test_optional_term_exposes_column_when_present() {
        let mut world = World::new();
        let a = world.register_component("a", 4);
        let b = world.register_component("b", 4);

        let plain = world.spawn();
        world.set_value(plain, a, &1u32).unwrap();
        let full = world.spawn();
        world.set_value(full, a, &2u32).unwrap();
        world.set_value(full, b, &20u32).unwrap();

        let mut query = Query::new().with(a).optional(b);
        let mut with_b = 0;
        let mut without_b = 0;
        let mut iter = query.iter(&world);
        while let Some(chunk) = iter.next() {
            match chunk.column::<u32>(1) {
                Some(values) => {
                    assert_eq!(values, &[20]);
                    with_b += chunk.count();
                }
                None => without_b += chunk.count(),
            }
        }
        assert_eq!(with_b, 1);
        assert_eq!(without_b, 1);
    }

    #[test]
    fn test_changed_window_filters_rows() {
        let mut world = World::new();
        let value = world.register_component("value", 4);
        let entities: Vec<_> = (0..5)
            .map(|i| {
                let e = world.spawn();
                world.set_value(e, value, &(i as u32)).unwrap();
                e
            })
            .collect();

        let baseline = world.tick();
        world.update();
        world.mark_changed(entities[1], value).unwrap();
        world.mark_changed(entities[3], value).unwrap();

        let mut query = Query::new().with(value).changed(value);
        let mut changed_rows = 0;
        let mut iter = query.iter_since(&world, baseline);
        while let Some(chunk) = iter.next() {
            for row in 0..chunk.count() {
                if chunk.changed(0, row) {
                    changed_rows += 1;
                }
            }
        }
        assert_eq!(changed_rows, 2);
    }

    #[test]
    fn test_tick_window_bounds() {
        assert!(!in_window(5, 5, 10));
        assert!(in_window(6, 5, 10));
        assert!(in_window(10, 5, 10));
        assert!(!in_window(11, 5, 10));
        assert!(!in_window(0, 0, 10));
    }
}
