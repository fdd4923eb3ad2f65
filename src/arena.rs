//! Slot storage addressed by generational handles.
//!
//! Every value lives in a slot; a [`Handle`] names the slot together with
//! the generation it was issued for. Freeing a slot bumps its generation,
//! so handles kept elsewhere (indices, work-queues) simply stop resolving
//! once their value is gone, even after the slot has been reused.

use std::cmp::min;
use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(self) -> usize {
        self.index as usize
    }
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: Option<T>,
    generation: u32,
}

#[derive(Debug, Clone)]
pub struct Arena<T> {
    data: Vec<Entry<T>>,
    /// Index of the first *possibly* free slot.
    min_free: usize,
    /// Number of occupied slots.
    real_size: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            min_free: 0,
            real_size: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
    /// Number of live values.
    pub fn len(&self) -> usize {
        self.real_size
    }
    pub fn is_empty(&self) -> bool {
        self.real_size == 0
    }

    pub fn insert(&mut self, value: T) -> Handle {
        let index = (self.min_free..self.data.len())
            .find(|&i| self.data[i].value.is_none())
            .unwrap_or_else(|| {
                self.data.push(Entry {
                    value: None,
                    generation: 0,
                });
                self.data.len() - 1
            });

        let entry = &mut self.data[index];
        entry.value = Some(value);
        self.min_free = index + 1;
        self.real_size += 1;

        Handle {
            index: index as u32,
            generation: entry.generation,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let entry = self.data.get(handle.index())?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let entry = self.data.get_mut(handle.index())?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.value.as_mut()
    }

    /// Frees the slot, returning its value. Stale handles return `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let entry = self.data.get_mut(handle.index())?;
        if entry.generation != handle.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.min_free = min(self.min_free, handle.index());
        self.real_size -= 1;
        Some(value)
    }

    /// Live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.data.iter().enumerate().filter_map(|(i, entry)| {
            entry.value.as_ref().map(|value| {
                let handle = Handle {
                    index: i as u32,
                    generation: entry.generation,
                };
                (handle, value)
            })
        })
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.data.iter().filter_map(|entry| entry.value.as_ref())
    }
}
