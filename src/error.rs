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

//! Error types

use std::fmt;

/// ECS error type
///
/// Mutating world operations return `Err` without touching the world;
/// callers that want fire-and-forget semantics can ignore the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// Entity not found (unknown index or stale generation)
    EntityNotFound,

    /// Component id not registered, or absent where required
    ComponentNotFound,

    /// Payload size disagrees with the registered component size
    SizeMismatch { expected: usize, got: usize },

    /// Hierarchy operation error (cycle, self-attach, etc.)
    HierarchyError(String),

    /// Command buffer replay error
    CommandError(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "Entity not found"),
            EcsError::ComponentNotFound => write!(f, "Component not found"),
            EcsError::SizeMismatch { expected, got } => {
                write!(f, "Component size mismatch: expected {expected} bytes, got {got}")
            }
            EcsError::HierarchyError(msg) => write!(f, "Hierarchy error: {msg}"),
            EcsError::CommandError(msg) => write!(f, "Command error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

/// Result type alias
pub type Result<T> = std::result::Result<T, EcsError>;
