//! Generation-checked handles for resources owned by another system.
//!
//! Slots are reused after removal; every reuse bumps the slot generation so
//! that any copy of the old handle stops resolving.

use std::fmt;

/// Index + generation pair referencing a slot in a [`HandleArena`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub index: u32,
    pub generation: u32,
}

impl Handle {
    /// Handle that never resolves
    pub const NULL: Handle = Handle {
        index: u32::MAX,
        generation: 0,
    };

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Handle(null)")
        } else {
            write!(f, "Handle({}v{})", self.index, self.generation)
        }
    }
}

struct Slot<T> {
    /// Generation of the current (or next) occupant; starts at 1
    generation: u32,
    value: Option<T>,
}

/// Slot arena keyed by [`Handle`]
pub struct HandleArena<T> {
    slots: Vec<Slot<T>>,
    free_slots: Vec<u32>,
    len: usize,
}

impl<T> HandleArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value, reusing the most recently freed slot if any
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free_slots.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle {
            index,
            generation: 1,
        }
    }

    /// Remove the value referenced by `handle`. Returns `None` for stale handles.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free_slots.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Current generation stored for a slot index, if the slot was ever allocated
    pub fn slot_generation(&self, index: u32) -> Option<u32> {
        self.slots.get(index as usize).map(|slot| slot.generation)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Remove every live entry, invalidating all outstanding handles
    pub fn drain(&mut self) -> Vec<(Handle, T)> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                drained.push((
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                ));
                slot.generation = slot.generation.wrapping_add(1).max(1);
                self.free_slots.push(index as u32);
            }
        }
        self.len = 0;
        drained
    }
}

impl<T> Default for HandleArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
