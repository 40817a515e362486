//! Entity slot registry
//!
//! A fixed-capacity, index-stable collection assigning every connected
//! player and spawned NPC a small integer handle. The handle doubles as the
//! entity's wire-protocol reference id, which is why capacity is fixed at
//! construction: the bit widths of the update packets bound the handle
//! space.
//!
//! Slot 0 is reserved; handles are 1-based. A full registry is a normal,
//! expected condition for a population cap, not an error.

/// A registry of entities addressed by stable small-integer handles
#[derive(Debug)]
pub struct SlotRegistry<T> {
    /// Slot storage; index 0 is never occupied
    slots: Vec<Option<T>>,
    /// Number of occupied slots
    count: usize,
}

impl<T> SlotRegistry<T> {
    /// Create a registry holding at most `capacity` entities
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "capacity must be at least 1");
        assert!(capacity <= u16::MAX as usize, "capacity exceeds handle space");
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.resize_with(capacity + 1, || None);
        Self { slots, count: 0 }
    }

    /// Maximum number of entities this registry can hold
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether every slot is occupied
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Register an entity in the first free slot, returning its handle.
    /// Returns `None` when the registry is full, leaving it unchanged.
    pub fn add(&mut self, entity: T) -> Option<u16> {
        for handle in 1..self.slots.len() {
            if self.slots[handle].is_none() {
                self.slots[handle] = Some(entity);
                self.count += 1;
                return Some(handle as u16);
            }
        }
        None
    }

    /// Free a slot, returning the entity it held. The handle becomes
    /// reusable by a future `add`.
    pub fn remove(&mut self, handle: u16) -> Option<T> {
        let slot = self.slots.get_mut(handle as usize)?;
        let entity = slot.take();
        if entity.is_some() {
            self.count -= 1;
        }
        entity
    }

    /// Look up an entity by handle
    pub fn get(&self, handle: u16) -> Option<&T> {
        self.slots.get(handle as usize)?.as_ref()
    }

    /// Whether a handle is currently registered
    pub fn contains(&self, handle: u16) -> bool {
        self.get(handle).is_some()
    }

    /// Handles of every occupied slot, in ascending order.
    ///
    /// This is a snapshot: consumers that drop a read lock between the scan
    /// and their per-entity work must tolerate handles that have since been
    /// freed.
    pub fn handles(&self) -> Vec<u16> {
        (1..self.slots.len())
            .filter(|&h| self.slots[h].is_some())
            .map(|h| h as u16)
            .collect()
    }

    /// Iterate over occupied slots. The occupied set is snapshotted at
    /// iterator creation so structural changes made by a consumer holding
    /// the registry do not corrupt the scan.
    pub fn iter(&self) -> SlotIter<'_, T> {
        SlotIter {
            registry: self,
            snapshot: self.handles(),
            pos: 0,
        }
    }
}

/// Snapshot-based iterator over a [`SlotRegistry`]
pub struct SlotIter<'a, T> {
    registry: &'a SlotRegistry<T>,
    snapshot: Vec<u16>,
    pos: usize,
}

impl<'a, T> Iterator for SlotIter<'a, T> {
    type Item = (u16, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.snapshot.len() {
            let handle = self.snapshot[self.pos];
            self.pos += 1;
            if let Some(entity) = self.registry.get(handle) {
                return Some((handle, entity));
            }
        }
        None
    }
}
