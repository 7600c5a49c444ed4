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

//! Deferred command buffer.
//!
//! Structural changes observed during iteration are recorded here and
//! replayed through the ordinary world entry points once no iterator is
//! live. Replay preserves recording order.

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::component::ComponentId;
use crate::entity::EntityId;
use crate::error::{EcsError, Result};
use crate::world::World;

/// One recorded world mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write component bytes (insert or overwrite).
    Set {
        entity: EntityId,
        component: ComponentId,
        bytes: Vec<u8>,
    },

    /// Remove a component.
    Unset {
        entity: EntityId,
        component: ComponentId,
    },

    /// Delete an entity.
    Despawn(EntityId),

    /// Stamp a component's changed tick.
    MarkChanged {
        entity: EntityId,
        component: ComponentId,
    },

    /// Attach `child` under `parent`.
    SetParent { child: EntityId, parent: EntityId },
}

/// Buffer of deferred operations.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Create new command buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Queue a component write; bytes are copied into the buffer.
    pub fn set(&mut self, entity: EntityId, component: ComponentId, bytes: &[u8]) {
        self.commands.push(Command::Set {
            entity,
            component,
            bytes: bytes.to_vec(),
        });
    }

    /// Typed convenience over [`CommandBuffer::set`].
    pub fn set_value<T: bytemuck::NoUninit>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        value: &T,
    ) {
        self.set(entity, component, bytemuck::bytes_of(value));
    }

    /// Queue a component removal.
    pub fn unset(&mut self, entity: EntityId, component: ComponentId) {
        self.commands.push(Command::Unset { entity, component });
    }

    /// Queue an entity deletion.
    pub fn despawn(&mut self, entity: EntityId) {
        self.commands.push(Command::Despawn(entity));
    }

    /// Queue a changed-tick stamp.
    pub fn mark_changed(&mut self, entity: EntityId, component: ComponentId) {
        self.commands.push(Command::MarkChanged { entity, component });
    }

    /// Queue a hierarchy attachment.
    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) {
        self.commands.push(Command::SetParent { child, parent });
    }

    /// Replay all commands in recording order and clear the buffer.
    ///
    /// Stops at the first failing command; already-applied commands stay
    /// applied and the remainder is dropped.
    pub fn apply(&mut self, world: &mut World) -> Result<()> {
        #[cfg(feature = "profiling")]
        let span = info_span!("command_buffer.apply", queued = self.commands.len());
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        for command in self.commands.drain(..) {
            match command {
                Command::Set {
                    entity,
                    component,
                    bytes,
                } => world.set(entity, component, &bytes).map_err(|e| {
                    EcsError::CommandError(format!("set {component:?} failed: {e}"))
                })?,
                Command::Unset { entity, component } => {
                    world.unset(entity, component).map_err(|e| {
                        EcsError::CommandError(format!("unset {component:?} failed: {e}"))
                    })?
                }
                Command::Despawn(entity) => world
                    .despawn(entity)
                    .map_err(|e| EcsError::CommandError(format!("despawn failed: {e}")))?,
                Command::MarkChanged { entity, component } => {
                    world.mark_changed(entity, component).map_err(|e| {
                        EcsError::CommandError(format!("mark_changed {component:?} failed: {e}"))
                    })?
                }
                Command::SetParent { child, parent } => {
                    world.set_parent(child, parent).map_err(|e| {
                        EcsError::CommandError(format!("set_parent failed: {e}"))
                    })?
                }
            }
        }
        Ok(())
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Get length
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Clear buffer
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_then_apply() {
        let mut world = World::new();
        let value = world.register_component("value", 4);
        let entity = world.spawn();

        let mut buffer = CommandBuffer::new();
        buffer.set_value(entity, value, &41u32);
        buffer.mark_changed(entity, value);
        assert_eq!(buffer.len(), 2);

        buffer.apply(&mut world).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(world.get_value::<u32>(entity, value), Some(41));
    }

    #[test]
    fn test_replay_preserves_order() {
        let mut world = World::new();
        let value = world.register_component("value", 4);
        let entity = world.spawn();

        let mut buffer = CommandBuffer::new();
        buffer.set_value(entity, value, &1u32);
        buffer.unset(entity, value);
        buffer.set_value(entity, value, &2u32);
        buffer.apply(&mut world).unwrap();

        assert_eq!(world.get_value::<u32>(entity, value), Some(2));
    }

    #[test]
    fn test_failed_command_stops_replay() {
        let mut world = World::new();
        let value = world.register_component("value", 4);
        let entity = world.spawn();
        let stale = world.spawn();
        world.despawn(stale).unwrap();

        let mut buffer = CommandBuffer::new();
        buffer.set_value(stale, value, &1u32);
        buffer.set_value(entity, value, &2u32);

        assert!(matches!(
            buffer.apply(&mut world),
            Err(EcsError::CommandError(_))
        ));
        // The command after the failure was dropped, not applied.
        assert_eq!(world.get(entity, value), None);
    }

    #[test]
    fn test_clear_discards_commands() {
        let mut world = World::new();
        let entity = world.spawn();

        let mut buffer = CommandBuffer::new();
        buffer.despawn(entity);
        buffer.clear();
        buffer.apply(&mut world).unwrap();

        assert!(world.is_alive(entity));
    }
}
