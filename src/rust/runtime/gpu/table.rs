// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::slab::Slab;

//==============================================================================
// Structures
//==============================================================================

/// Engine Handle Table
///
/// Maps handles handed out by an engine to the objects backing them. Handles are
/// offset by a per-table base so that a stream handle accidentally passed where
/// an event is expected is rejected instead of aliasing another object.
pub struct HandleTable<T> {
    base: usize,
    table: Slab<T>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Handle Tables
impl<T> HandleTable<T> {
    /// Creates a handle table whose handles start at `base`.
    pub fn new(base: usize) -> Self {
        Self {
            base,
            table: Slab::new(),
        }
    }

    /// Inserts an object and returns its raw handle.
    pub fn insert(&mut self, obj: T) -> usize {
        let index: usize = self.table.insert(obj);
        index + self.base
    }

    /// Gets the object associated with a raw handle.
    pub fn get(&self, handle: usize) -> Option<&T> {
        let index: usize = handle.checked_sub(self.base)?;
        self.table.get(index)
    }

    /// Gets the object associated with a raw handle, mutably.
    pub fn get_mut(&mut self, handle: usize) -> Option<&mut T> {
        let index: usize = handle.checked_sub(self.base)?;
        self.table.get_mut(index)
    }

    /// Releases an entry in the target [HandleTable].
    pub fn remove(&mut self, handle: usize) -> Option<T> {
        let index: usize = handle.checked_sub(self.base)?;
        if !self.table.contains(index) {
            return None;
        }
        Some(self.table.remove(index))
    }

    /// Returns the number of live handles.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the target [HandleTable] holds no handle.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Drains every object out of the target [HandleTable].
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.table.drain()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
