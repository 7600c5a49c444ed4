use std::ptr::NonNull;

use strata_ecs::{ChunkStorage, Query, StorageProvider, World};

/// Row-scattered storage: every row is its own allocation, so no base
/// pointer exists and the engine must take the row-by-row path.
struct ScatteredChunk {
    rows: Vec<Vec<u8>>,
}

struct ScatteredProvider;

impl StorageProvider for ScatteredProvider {
    fn debug_name(&self) -> &'static str {
        "scattered"
    }

    fn alloc_chunk(&self, size: usize, capacity: usize) -> ChunkStorage {
        ChunkStorage::new(ScatteredChunk {
            rows: vec![vec![0; size]; capacity],
        })
    }

    fn free_chunk(&self, storage: ChunkStorage) {
        drop(storage);
    }

    fn get_ptr(&self, storage: &ChunkStorage, row: usize, size: usize) -> NonNull<u8> {
        let chunk = storage.downcast_ref::<ScatteredChunk>().unwrap();
        debug_assert_eq!(chunk.rows[row].len(), size);
        NonNull::new(chunk.rows[row].as_ptr() as *mut u8).unwrap()
    }

    fn set(&self, storage: &mut ChunkStorage, row: usize, bytes: &[u8]) {
        let chunk = storage.downcast_mut::<ScatteredChunk>().unwrap();
        chunk.rows[row].copy_from_slice(bytes);
    }

    fn copy(
        &self,
        src: &ChunkStorage,
        src_row: usize,
        dst: &mut ChunkStorage,
        dst_row: usize,
        _size: usize,
    ) {
        let from = src.downcast_ref::<ScatteredChunk>().unwrap().rows[src_row].clone();
        let to = dst.downcast_mut::<ScatteredChunk>().unwrap();
        to.rows[dst_row].copy_from_slice(&from);
    }
}

fn read_u32(provider: &dyn StorageProvider, storage: &ChunkStorage, row: usize) -> u32 {
    let ptr = provider.get_ptr(storage, row, 4);
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 4) };
    u32::from_le_bytes(bytes.try_into().unwrap())
}

#[test]
fn test_non_native_columns_skip_the_slice_fast_path() {
    let mut world = World::new();
    let score = world.register_component_with("score", 4, std::sync::Arc::new(ScatteredProvider));

    let entities: Vec<_> = (0..4)
        .map(|i| {
            let e = world.spawn();
            world.set_value(e, score, &(100 + i as u32)).unwrap();
            e
        })
        .collect();

    let mut query = Query::new().with(score);
    let mut iter = query.iter(&world);
    let chunk = iter.next().unwrap();

    // No typed slice for scattered storage.
    assert!(chunk.column::<u32>(0).is_none());
    assert!(chunk.column_bytes(0).is_none());

    // Row-by-row access through the provider escape hatch still works.
    let provider = chunk.provider(0).unwrap();
    assert_eq!(provider.debug_name(), "scattered");
    let storage = chunk.storage(0).unwrap();
    for (row, &e) in chunk.entities().iter().enumerate() {
        assert_eq!(e, entities[row]);
        assert_eq!(read_u32(provider, storage, row), 100 + row as u32);
    }
}

#[test]
fn test_transition_and_swap_remove_without_provider_swap() {
    let mut world = World::new();
    let score = world.register_component_with("score", 4, std::sync::Arc::new(ScatteredProvider));
    let bonus = world.register_component("bonus", 4);

    let entities: Vec<_> = (0..3)
        .map(|i| {
            let e = world.spawn();
            world.set_value(e, score, &(i as u32)).unwrap();
            e
        })
        .collect();

    // Cross-archetype copy goes through ScatteredProvider::copy.
    world.set_value(entities[0], bonus, &7u32).unwrap();
    assert_eq!(world.get_value::<u32>(entities[0], score), Some(0));

    // Swap-remove inside the {score} archetype uses the engine's
    // scratch-buffer fallback because this provider has no swap.
    world.despawn(entities[1]).unwrap();
    assert_eq!(world.get_value::<u32>(entities[2], score), Some(2));
    assert_eq!(world.get_value::<u32>(entities[0], score), Some(0));
}

#[test]
fn test_mixed_native_and_custom_columns_in_one_archetype() {
    let mut world = World::new();
    let scattered = world.register_component_with("scattered", 8, std::sync::Arc::new(ScatteredProvider));
    let native = world.register_component("native", 8);

    let e = world.spawn();
    world.set_value(e, scattered, &1.5f64).unwrap();
    world.set_value(e, native, &2.5f64).unwrap();

    let mut query = Query::new().with(scattered).with(native);
    let mut iter = query.iter(&world);
    let chunk = iter.next().unwrap();

    assert!(chunk.column::<f64>(0).is_none());
    assert_eq!(chunk.column::<f64>(1).unwrap(), &[2.5]);
}
