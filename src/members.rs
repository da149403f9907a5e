//! Ordered membership container
//!
//! A doubly linked list threaded through a slot vector. Insertion returns a
//! [`MemberKey`] which is the only way to remove the entry again, in O(1).
//! Slots are reused; a generation counter makes stale keys miss.

/// Handle to one position inside a [`Members`] list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    generation: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Insertion-ordered collection with handle-based removal
#[derive(Debug)]
pub struct Members<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> Default for Members<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Members<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a value at the back
    pub fn push_back(&mut self, value: T) -> MemberKey {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.value = Some(value);
                slot.prev = self.tail;
                slot.next = None;
                index
            }
            None => {
                self.slots.push(Slot {
                    value: Some(value),
                    generation: 0,
                    prev: self.tail,
                    next: None,
                });
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        MemberKey {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Remove the value behind `key`; `None` if the key is stale
    pub fn remove(&mut self, key: MemberKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        let (prev, next) = (slot.prev.take(), slot.next.take());

        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }

        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Iterate front to back together with each entry's key
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            members: self,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a, T> {
    members: &'a Members<T>,
    cursor: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (MemberKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.members.slots[index];
        self.cursor = slot.next;
        let key = MemberKey {
            index,
            generation: slot.generation,
        };
        slot.value.as_ref().map(|value| (key, value))
    }
}
