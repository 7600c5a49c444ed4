use strata_ecs::{CommandBuffer, Query, World};

#[test]
fn test_structural_changes_deferred_past_iteration() {
    let mut world = World::new();
    let health = world.register_component("health", 4);
    let dead = world.register_component("dead", 0);

    let entities: Vec<_> = (0..6)
        .map(|i| {
            let e = world.spawn();
            world.set_value(e, health, &(i as u32 * 10)).unwrap();
            e
        })
        .collect();

    // Record structural changes while holding chunk views; the world
    // borrow forbids applying them before iteration ends.
    let mut buffer = CommandBuffer::new();
    let mut query = Query::new().with(health);
    let mut iter = query.iter(&world);
    while let Some(chunk) = iter.next() {
        let values = chunk.column::<u32>(0).unwrap();
        for (row, &hp) in values.iter().enumerate() {
            if hp == 0 {
                buffer.set(chunk.entities()[row], dead, &[]);
            } else if hp >= 40 {
                buffer.despawn(chunk.entities()[row]);
            }
        }
    }

    buffer.apply(&mut world).unwrap();

    assert!(world.has(entities[0], dead));
    assert!(world.is_alive(entities[1]));
    assert!(!world.is_alive(entities[4]));
    assert!(!world.is_alive(entities[5]));
    assert_eq!(world.entity_count(), 4);
}

#[test]
fn test_deferred_hierarchy_attachment() {
    let mut world = World::new();
    let root = world.spawn();
    let a = world.spawn();
    let b = world.spawn();

    let mut buffer = CommandBuffer::new();
    buffer.set_parent(a, root);
    buffer.set_parent(b, root);
    buffer.apply(&mut world).unwrap();

    assert_eq!(world.children_of(root), &[a, b]);
}

#[test]
fn test_buffer_reusable_after_apply() {
    let mut world = World::new();
    let value = world.register_component("value", 4);
    let e = world.spawn();

    let mut buffer = CommandBuffer::new();
    buffer.set_value(e, value, &1u32);
    buffer.apply(&mut world).unwrap();

    buffer.set_value(e, value, &2u32);
    buffer.apply(&mut world).unwrap();

    assert_eq!(world.get_value::<u32>(e, value), Some(2));
}
