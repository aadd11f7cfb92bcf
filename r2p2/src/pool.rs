//! Fixed-capacity, per-core object pool with generation-counted handles.
//!
//! The original protocol's C pool guards reuse with a single `taken` boolean
//! on the slot metadata, which a timer callback racing a fast free/realloc
//! cycle can misread (the classic ABA problem). Here every free bumps a
//! generation counter instead, so a [`Handle`] captured before the free is
//! detectably stale rather than silently matching a new occupant.

use crate::error::R2p2Error;

/// An opaque reference to a live pool slot. Application callbacks receive
/// these instead of raw indices or pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Free { next_free: Option<u32>, generation: u32 },
}

/// A fixed-capacity slab. Allocation beyond `capacity` fails rather than
/// growing; the caller sizes the pool (`POOL_SIZE` in the base spec).
pub struct Pool<T> {
    name: &'static str,
    capacity: usize,
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Pool<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next_free = if i + 1 < capacity { Some(i as u32 + 1) } else { None };
            slots.push(Slot::Free { next_free, generation: 0 });
        }
        Pool {
            name,
            capacity,
            slots,
            free_head: if capacity == 0 { None } else { Some(0) },
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocates a slot for `value`, returning the handle that now owns it.
    pub fn alloc(&mut self, value: T) -> Result<Handle, R2p2Error> {
        let index = self
            .free_head
            .ok_or(R2p2Error::PoolExhausted(self.name, self.capacity))?;
        let slot = &mut self.slots[index as usize];
        let generation = match *slot {
            Slot::Free { next_free, generation } => {
                self.free_head = next_free;
                generation
            }
            Slot::Occupied { .. } => unreachable!("free list pointed at an occupied slot"),
        };
        *slot = Slot::Occupied { value, generation };
        self.len += 1;
        Ok(Handle { index, generation })
    }

    /// Returns `true` if `handle` still refers to a live slot.
    pub fn is_live(&self, handle: Handle) -> bool {
        matches!(
            self.slots.get(handle.index as usize),
            Some(Slot::Occupied { generation, .. }) if *generation == handle.generation
        )
    }

    pub fn get(&self, handle: Handle) -> Result<&T, R2p2Error> {
        match self.slots.get(handle.index as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == handle.generation => {
                Ok(value)
            }
            _ => Err(R2p2Error::StaleHandle(handle.index, handle.generation)),
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T, R2p2Error> {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == handle.generation => {
                Ok(value)
            }
            _ => Err(R2p2Error::StaleHandle(handle.index, handle.generation)),
        }
    }

    /// Frees the slot `handle` refers to, bumping its generation so any
    /// copy of this handle retained elsewhere (e.g. an armed timer) is
    /// detectably stale. Returns the freed value.
    pub fn free(&mut self, handle: Handle) -> Result<T, R2p2Error> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(R2p2Error::StaleHandle(handle.index, handle.generation))?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let next_free = self.free_head;
                let prev = std::mem::replace(
                    slot,
                    Slot::Free {
                        next_free,
                        generation: handle.generation.wrapping_add(1),
                    },
                );
                self.free_head = Some(handle.index);
                self.len -= 1;
                match prev {
                    Slot::Occupied { value, .. } => Ok(value),
                    Slot::Free { .. } => unreachable!(),
                }
            }
            _ => Err(R2p2Error::StaleHandle(handle.index, handle.generation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip_preserves_capacity() {
        let mut pool: Pool<u32> = Pool::new("test", 2);
        let a = pool.alloc(1).unwrap();
        let b = pool.alloc(2).unwrap();
        assert!(pool.alloc(3).is_err());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.free(a).unwrap(), 1);
        assert_eq!(pool.len(), 1);
        let c = pool.alloc(3).unwrap();
        assert_eq!(*pool.get(c).unwrap(), 3);
        assert_eq!(*pool.get(b).unwrap(), 2);
    }

    #[test]
    fn stale_handle_detected_after_reuse() {
        let mut pool: Pool<u32> = Pool::new("test", 1);
        let a = pool.alloc(10).unwrap();
        pool.free(a).unwrap();
        let b = pool.alloc(20).unwrap();
        assert_ne!(a, b);
        assert!(pool.get(a).is_err());
        assert_eq!(*pool.get(b).unwrap(), 20);
    }
}
