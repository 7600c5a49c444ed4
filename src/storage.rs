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

//! Pluggable column storage.
//!
//! A [`StorageProvider`] decides how the bytes of one component type are
//! allocated and accessed. Providers attach per component type at
//! registration; every chunk of every archetype routes that component's
//! column through the same provider. The built-in [`NativeProvider`] backs
//! columns with a contiguous aligned allocation and is the default.
//!
//! The abstraction exists for managed-runtime interop: a host can hand the
//! engine a provider that places component bytes inside memory its own
//! tooling can see. [`ChunkStorage`] is deliberately opaque so a provider
//! may return any handle it likes.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::any::Any;
use std::ptr::NonNull;

use smallvec::SmallVec;

/// Alignment of native column allocations. Large enough for every scalar
/// and 128-bit SIMD lane type.
pub const NATIVE_COLUMN_ALIGN: usize = 16;

/// Opaque per-column storage handle produced by a [`StorageProvider`].
pub struct ChunkStorage(Box<dyn Any + Send + Sync>);

impl ChunkStorage {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ChunkStorage(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.0.downcast_mut()
    }
}

/// How one component type's column bytes are allocated and read/written.
///
/// `get_ptr` results are valid until the next `alloc_chunk`/`free_chunk`
/// on the same storage. `copy` is only ever called between storages of the
/// same component type (same element size).
pub trait StorageProvider: Send + Sync {
    /// Short name for diagnostics.
    fn debug_name(&self) -> &'static str;

    /// Allocate storage holding `capacity` slots of `size` bytes each.
    fn alloc_chunk(&self, size: usize, capacity: usize) -> ChunkStorage;

    /// Release storage previously returned by `alloc_chunk`.
    fn free_chunk(&self, storage: ChunkStorage);

    /// Base pointer when the rows are one contiguous `size`-strided run.
    ///
    /// Returning `Some` opts the column into the typed-slice iteration
    /// fast path; providers with non-contiguous layouts return `None` and
    /// are read row-by-row through `get_ptr`.
    fn base_ptr(&self, storage: &ChunkStorage) -> Option<NonNull<u8>> {
        let _ = storage;
        None
    }

    /// Pointer to row `row`'s bytes.
    fn get_ptr(&self, storage: &ChunkStorage, row: usize, size: usize) -> NonNull<u8>;

    /// Copy `bytes` into row `row`.
    fn set(&self, storage: &mut ChunkStorage, row: usize, bytes: &[u8]);

    /// Copy one row between two storages of the same component type.
    fn copy(
        &self,
        src: &ChunkStorage,
        src_row: usize,
        dst: &mut ChunkStorage,
        dst_row: usize,
        size: usize,
    );

    /// Swap rows `a` and `b` in place. Optional: return false to have the
    /// engine fall back to two copies through a scratch buffer.
    fn swap(&self, storage: &mut ChunkStorage, a: usize, b: usize, size: usize) -> bool {
        let _ = (storage, a, b, size);
        false
    }
}

/// Read row `src_row` into row `dst_row` of the same storage, preferring
/// the provider's in-place `swap`. Used by swap-remove, where the source
/// row is dead afterwards and a swap is as good as an overwrite.
pub(crate) fn overwrite_row(
    provider: &dyn StorageProvider,
    storage: &mut ChunkStorage,
    dst_row: usize,
    src_row: usize,
    size: usize,
) {
    if size == 0 || dst_row == src_row {
        return;
    }
    if provider.swap(storage, dst_row, src_row, size) {
        return;
    }

    let mut scratch: SmallVec<[u8; 64]> = SmallVec::with_capacity(size);
    unsafe {
        let src = provider.get_ptr(storage, src_row, size);
        scratch.extend_from_slice(std::slice::from_raw_parts(src.as_ptr(), size));
    }
    provider.set(storage, dst_row, &scratch);
}

struct NativeChunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The raw pointer is uniquely owned by this chunk.
unsafe impl Send for NativeChunk {}
unsafe impl Sync for NativeChunk {}

impl NativeChunk {
    fn new(size: usize, capacity: usize) -> Self {
        let bytes = size.checked_mul(capacity).expect("column size overflow");
        let layout = Layout::from_size_align(bytes.max(1), NATIVE_COLUMN_ALIGN)
            .expect("invalid column layout");

        // Allocation failure is fatal: the core has no recovery path.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };
        NativeChunk { ptr, layout }
    }
}

impl Drop for NativeChunk {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Default provider: one zero-initialised aligned allocation per column,
/// rows at `base + row * size`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProvider;

impl NativeProvider {
    fn chunk<'a>(&self, storage: &'a ChunkStorage) -> &'a NativeChunk {
        storage
            .downcast_ref::<NativeChunk>()
            .expect("storage handle does not belong to the native provider")
    }
}

impl StorageProvider for NativeProvider {
    fn debug_name(&self) -> &'static str {
        "native"
    }

    fn alloc_chunk(&self, size: usize, capacity: usize) -> ChunkStorage {
        ChunkStorage::new(NativeChunk::new(size, capacity))
    }

    fn free_chunk(&self, storage: ChunkStorage) {
        drop(storage);
    }

    fn base_ptr(&self, storage: &ChunkStorage) -> Option<NonNull<u8>> {
        Some(self.chunk(storage).ptr)
    }

    fn get_ptr(&self, storage: &ChunkStorage, row: usize, size: usize) -> NonNull<u8> {
        let chunk = self.chunk(storage);
        debug_assert!(row * size + size <= chunk.layout.size());
        unsafe { NonNull::new_unchecked(chunk.ptr.as_ptr().add(row * size)) }
    }

    fn set(&self, storage: &mut ChunkStorage, row: usize, bytes: &[u8]) {
        let size = bytes.len();
        if size == 0 {
            return;
        }
        let dst = self.get_ptr(storage, row, size);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), size);
        }
    }

    fn copy(
        &self,
        src: &ChunkStorage,
        src_row: usize,
        dst: &mut ChunkStorage,
        dst_row: usize,
        size: usize,
    ) {
        if size == 0 {
            return;
        }
        let src_ptr = self.get_ptr(src, src_row, size);
        let dst_ptr = self.get_ptr(dst, dst_row, size);
        unsafe {
            std::ptr::copy_nonoverlapping(src_ptr.as_ptr(), dst_ptr.as_ptr(), size);
        }
    }

    fn swap(&self, storage: &mut ChunkStorage, a: usize, b: usize, size: usize) -> bool {
        if size == 0 || a == b {
            return true;
        }
        let pa = self.get_ptr(storage, a, size);
        let pb = self.get_ptr(storage, b, size);
        unsafe {
            std::ptr::swap_nonoverlapping(pa.as_ptr(), pb.as_ptr(), size);
        }
        true
    }
}
