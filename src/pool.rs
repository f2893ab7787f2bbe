//! Fixed-capacity slot pools with generational handles.
//!
//! Every RBUF, VRB and FBUF entry lives in a [`Pool`] slot and is referred
//! to by a [`Handle`] carrying the pool kind, the slot index and the slot's
//! generation at insertion time. Removing an entry bumps the generation, so
//! a handle kept by a timer or by a caller after the entry was destroyed
//! simply fails to resolve.

use derive_more::Display;

/// Which pool a handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum PoolKind {
    /// Reassembly buffer.
    #[display("rbuf")]
    Rbuf,
    /// Virtual reassembly buffer.
    #[display("vrb")]
    Vrb,
    /// Fragment send buffer.
    #[display("fbuf")]
    Fbuf,
}

/// Generation-tagged reference to a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{pool}#{index}@{generation}")]
pub struct Handle {
    pool: PoolKind,
    index: u16,
    generation: u32,
}

impl Handle {
    /// Pool the handle points into.
    #[must_use]
    pub const fn pool(self) -> PoolKind { self.pool }

    /// Slot index within the pool.
    #[must_use]
    pub const fn index(self) -> u16 { self.index }

    /// Generation of the slot when the handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 { self.generation }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity arena of `T`.
#[derive(Debug)]
pub struct Pool<T> {
    kind: PoolKind,
    slots: Vec<Slot<T>>,
}

impl<T> Pool<T> {
    /// Create a pool with `capacity` empty slots.
    ///
    /// Capacities beyond `u16::MAX` slots are clamped.
    #[must_use]
    pub fn new(kind: PoolKind, capacity: usize) -> Self {
        let capacity = capacity.min(usize::from(u16::MAX));
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        Self { kind, slots }
    }

    /// Kind of entries stored in this pool.
    #[must_use]
    pub const fn kind(&self) -> PoolKind { self.kind }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.slots.len() }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize { self.slots.iter().filter(|s| s.value.is_some()).count() }

    /// Whether no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.slots.iter().all(|s| s.value.is_none()) }

    /// Whether every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool { self.slots.iter().all(|s| s.value.is_some()) }

    /// Place `value` into the first free slot.
    ///
    /// # Errors
    ///
    /// Hands `value` back when every slot is occupied.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        let Some(position) = self.slots.iter().position(|slot| slot.value.is_none()) else {
            return Err(value);
        };
        // capacity is clamped to u16::MAX in `new`
        let Ok(index) = u16::try_from(position) else {
            return Err(value);
        };
        let slot = &mut self.slots[position];
        slot.value = Some(value);
        Ok(Handle {
            pool: self.kind,
            index,
            generation: slot.generation,
        })
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        if handle.pool != self.kind {
            return None;
        }
        self.slots
            .get(usize::from(handle.index))
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: Handle) -> Option<&mut Slot<T>> {
        if handle.pool != self.kind {
            return None;
        }
        self.slots
            .get_mut(usize::from(handle.index))
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Resolve a handle, failing on generation mismatch.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> { self.slot(handle)?.value.as_ref() }

    /// Resolve a handle mutably, failing on generation mismatch.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slot_mut(handle)?.value.as_mut()
    }

    /// Whether the handle still refers to a live entry.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool { self.get(handle).is_some() }

    /// Remove and return the entry, invalidating every copy of `handle`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slot_mut(handle)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(value)
    }

    /// Iterate over live entries with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        let kind = self.kind;
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            let value = slot.value.as_ref()?;
            let index = u16::try_from(index).ok()?;
            Some((
                Handle {
                    pool: kind,
                    index,
                    generation: slot.generation,
                },
                value,
            ))
        })
    }

    /// Handle of the first live entry matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Handle> {
        self.iter().find(|(_, value)| pred(value)).map(|(handle, _)| handle)
    }

    /// Handles of every live entry matching `pred`.
    pub fn handles_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<Handle> {
        self.iter()
            .filter(|(_, value)| pred(value))
            .map(|(handle, _)| handle)
            .collect()
    }
}
