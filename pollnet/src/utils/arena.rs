/// A generation-checked reference into an [`Arena`].
///
/// A `Handle` is two 32-bit numbers: the slot index and the generation
/// the slot had when the value was inserted. Removing a value bumps the
/// slot generation, so handles to removed values never resolve again,
/// even after the slot is reused.
///
/// Generations start at `1`, which keeps [`Handle::into_raw`] non-zero
/// and lets foreign callers use `0` as the "no handle" value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// A handle no arena ever hands out.
    pub(crate) const DANGLING: Handle = Handle {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Packs the handle into a single non-zero integer.
    pub fn into_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Unpacks a value produced by [`into_raw`](Self::into_raw).
    ///
    /// Returns `None` for `0` and for any value whose generation part is
    /// zero, since no live handle can carry it.
    pub fn from_raw(raw: u64) -> Option<Self> {
        let generation = (raw >> 32) as u32;
        if generation == 0 {
            return None;
        }

        Some(Self {
            index: raw as u32,
            generation,
        })
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// An arena of values addressed by [`Handle`].
///
/// Freed slots are kept on a stack and reused by later insertions.
/// Lookups compare the handle generation with the slot generation, so a
/// stale handle yields `None` instead of someone else's value.
pub(crate) struct Arena<T> {
    /// Storage slots, occupied or not.
    slots: Vec<Slot<T>>,
    /// Stack of free slot indices.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an arena with room for `size` values before growing.
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(size),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Inserts a value and returns its handle.
    pub(crate) fn insert(&mut self, value: T) -> Handle {
        self.len += 1;

        if let Some(index) = self.free.pop() {
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

    /// Returns the value behind `handle`, if it is still alive.
    pub(crate) fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Returns the value behind `handle` mutably, if it is still alive.
    pub(crate) fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Removes and returns the value behind `handle`.
    ///
    /// The slot generation is bumped, invalidating every copy of `handle`.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);

        self.free.push(handle.index);
        self.len -= 1;

        Some(value)
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Iterates over live values together with their handles.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
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

    /// Iterates over live values.
    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }
}
