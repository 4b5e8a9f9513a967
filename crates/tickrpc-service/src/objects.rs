//! ---
//! trpc_section: "03-service-catalog"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Procedure registration, binding, and invocation."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
//! Generational arena mapping server-side objects to wire handles.
//!
//! A handle packs `generation << 32 | (slot + 1)`, so `0` is never issued and
//! stays available as the null object on the wire.

use std::any::Any;

use crate::error::{CallError, HandleError};

/// Object store used by procedures that return class instances.
pub type Objects = ObjectStore<Box<dyn Any + Send>>;

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Free { generation: u32, next: Option<u32> },
}

/// Growable slab with an intrusive free list and per-slot generations.
pub struct ObjectStore<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for ObjectStore<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }
}

fn pack(slot: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | (u64::from(slot) + 1)
}

fn unpack(handle: u64) -> Result<(u32, u32), HandleError> {
    let low = (handle & 0xffff_ffff) as u32;
    if low == 0 {
        return Err(HandleError::Invalid(handle));
    }
    Ok((low - 1, (handle >> 32) as u32))
}

impl<T> ObjectStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value`, reusing a freed slot when one is available.
    pub fn insert(&mut self, value: T) -> u64 {
        self.len += 1;
        if let Some(slot) = self.free_head {
            let index = slot as usize;
            if let Entry::Free { generation, next } = self.entries[index] {
                self.free_head = next;
                self.entries[index] = Entry::Occupied { generation, value };
                return pack(slot, generation);
            }
        }
        let slot = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        pack(slot, 0)
    }

    fn locate(&self, handle: u64) -> Result<usize, HandleError> {
        let (slot, expected) = unpack(handle)?;
        match self.entries.get(slot as usize) {
            None => Err(HandleError::Invalid(handle)),
            Some(Entry::Occupied { generation, .. }) if *generation == expected => {
                Ok(slot as usize)
            }
            Some(_) => Err(HandleError::Stale(handle)),
        }
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.locate(handle).is_ok()
    }

    pub fn get(&self, handle: u64) -> Result<&T, HandleError> {
        let index = self.locate(handle)?;
        match &self.entries[index] {
            Entry::Occupied { value, .. } => Ok(value),
            Entry::Free { .. } => Err(HandleError::Stale(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: u64) -> Result<&mut T, HandleError> {
        let index = self.locate(handle)?;
        match &mut self.entries[index] {
            Entry::Occupied { value, .. } => Ok(value),
            Entry::Free { .. } => Err(HandleError::Stale(handle)),
        }
    }

    /// Free the slot behind `handle`. Every outstanding copy of the handle
    /// becomes stale.
    pub fn remove(&mut self, handle: u64) -> Result<T, HandleError> {
        let index = self.locate(handle)?;
        let generation = match &self.entries[index] {
            Entry::Occupied { generation, .. } => *generation,
            Entry::Free { .. } => return Err(HandleError::Stale(handle)),
        };
        let freed = Entry::Free {
            generation: generation.wrapping_add(1),
            next: self.free_head,
        };
        self.free_head = Some(index as u32);
        self.len -= 1;
        match std::mem::replace(&mut self.entries[index], freed) {
            Entry::Occupied { value, .. } => Ok(value),
            Entry::Free { .. } => Err(HandleError::Stale(handle)),
        }
    }
}

impl Objects {
    /// Borrow the object behind `handle` as a concrete type.
    pub fn downcast_mut<T: Any>(&mut self, handle: u64) -> Result<&mut T, CallError> {
        self.get_mut(handle)?
            .downcast_mut::<T>()
            .ok_or(CallError::ObjectType {
                handle,
                expected: std::any::type_name::<T>(),
            })
    }
}
