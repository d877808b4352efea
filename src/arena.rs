//! Generational arena holding every registered address space.
//!
//! Slots are addressed by [`HandleId`]; a freed slot bumps its generation
//! before it is recycled, so stale identifiers never alias a newer entry.

use crate::handle::HandleId;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Arena
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot arena with generation-checked identifiers.
#[derive(Debug)]
pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates a new (empty) [`Arena`].
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of occupied slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Inserts the value built by `make`, which receives the identifier the
    /// value will be stored under.
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(HandleId) -> T) -> HandleId {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = HandleId::new(index, slot.generation);
        slot.value = Some(make(id));
        self.len += 1;
        id
    }

    /// Returns a reference to the value for `id`, unless it is stale.
    #[inline]
    pub(crate) fn get(&self, id: HandleId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Returns a mutable reference to the value for `id`, unless it is stale.
    #[inline]
    pub(crate) fn get_mut(&mut self, id: HandleId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Removes and returns the value for `id`, retiring the identifier.
    pub(crate) fn remove(&mut self, id: HandleId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index() as u32);
        self.len -= 1;
        Some(value)
    }
}
