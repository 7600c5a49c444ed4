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

//! Strata ECS - dynamic archetype-based entity component storage
//!
//! Components are registered at runtime with a name and a byte size;
//! entities carry mutable sets of them. Storage is chunked and columnar,
//! queries iterate one chunk at a time, and a pluggable storage provider
//! owns the bytes of each component's columns.

pub mod archetype;
pub mod command;
pub mod component;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod query;
pub mod storage;
pub mod world;

// Re-exports for convenience
pub use archetype::{Archetype, Chunk, Column, CHUNK_CAPACITY};
pub use command::{Command, CommandBuffer};
pub use component::{ComponentId, ComponentInfo, MAX_COMPONENTS};
pub use entity::{EntityId, EntityRecord, Tick};
pub use error::{EcsError, Result};
pub use query::{ChunkView, Query, QueryIter, Term, TermKind, MAX_QUERY_TERMS};
pub use storage::{ChunkStorage, NativeProvider, StorageProvider};
pub use world::World;
