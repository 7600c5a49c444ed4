#![cfg(feature = "parallel")]

use std::sync::atomic::{AtomicUsize, Ordering};

use strata_ecs::{Query, World, CHUNK_CAPACITY};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Motion {
    position: f32,
    velocity: f32,
}

#[test]
fn test_par_for_each_chunk_visits_every_row_once() {
    let mut world = World::new();
    let motion = world.register_component("motion", 8);

    let total = CHUNK_CAPACITY + 123;
    for _ in 0..total {
        let e = world.spawn();
        world
            .set_value(e, motion, &Motion { position: 0.0, velocity: 1.0 })
            .unwrap();
    }

    let rows = AtomicUsize::new(0);
    let chunks = AtomicUsize::new(0);
    let mut query = Query::new().with(motion);
    query.par_for_each_chunk(&world, |chunk| {
        chunks.fetch_add(1, Ordering::Relaxed);
        rows.fetch_add(chunk.count(), Ordering::Relaxed);
    });

    assert_eq!(chunks.load(Ordering::Relaxed), 2);
    assert_eq!(rows.load(Ordering::Relaxed), total);
}

#[test]
fn test_parallel_chunk_writes_are_disjoint() {
    let mut world = World::new();
    let motion = world.register_component("motion", 8);

    let total = CHUNK_CAPACITY * 2;
    let entities: Vec<_> = (0..total)
        .map(|i| {
            let e = world.spawn();
            world
                .set_value(
                    e,
                    motion,
                    &Motion {
                        position: i as f32,
                        velocity: 1.0,
                    },
                )
                .unwrap();
            e
        })
        .collect();

    let mut query = Query::new().with(motion);
    query.par_for_each_chunk(&world, |chunk| {
        // SAFETY: each chunk is handed to exactly one worker; no other
        // reference to this column is live during the callback.
        let rows = unsafe { chunk.column_mut::<Motion>(0) }.unwrap();
        for row in rows {
            row.position += row.velocity;
        }
    });

    for (i, &e) in entities.iter().enumerate() {
        let read: Motion = world.get_value(e, motion).unwrap();
        assert_eq!(read.position, i as f32 + 1.0);
    }
}
