//! Recency List Module
//!
//! Implements Least Recently Used ordering over a slot arena.

use crate::cache::entry::Entry;

// == Recency List ==
/// Doubly-linked LRU list threaded through a slot arena.
///
/// Entries live in `slots` and are addressed by their index, which stays
/// stable for the lifetime of the entry. Released slots are recycled through
/// `free`. Only finalized entries are linked:
/// - Head = Most recently used
/// - Tail = Least recently used
#[derive(Debug)]
pub(crate) struct RecencyList<V> {
    /// Entry arena, `None` = vacant slot
    slots: Vec<Option<Entry<V>>>,
    /// Indices of vacant slots
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Number of linked entries
    linked: usize,
}

impl<V> Default for RecencyList<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RecencyList<V> {
    // == Constructor ==
    /// Creates a new empty list.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            linked: 0,
        }
    }

    // == Allocate ==
    /// Stores `entry` in a vacant slot and returns its handle.
    ///
    /// The entry is not linked; call [`push_front`](Self::push_front) once
    /// it has a position.
    pub fn alloc(&mut self, mut entry: Entry<V>) -> usize {
        entry.prev = None;
        entry.next = None;
        entry.linked = false;

        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    // == Release ==
    /// Vacates a slot and returns its entry. The entry must be unlinked.
    pub fn release(&mut self, slot: usize) -> Entry<V> {
        assert!(
            !self.entry(slot).linked,
            "releasing slot {slot} while it is still linked"
        );
        let entry = self.slots[slot]
            .take()
            .unwrap_or_else(|| panic!("slot {slot} is vacant"));
        self.free.push(slot);
        entry
    }

    pub fn entry(&self, slot: usize) -> &Entry<V> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("slot {slot} is vacant"))
    }

    pub fn entry_mut(&mut self, slot: usize) -> &mut Entry<V> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("slot {slot} is vacant"))
    }

    // == Push Front ==
    /// Makes `slot` the new head. If the list was empty it also becomes the tail.
    pub fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let entry = self.entry_mut(slot);
            assert!(!entry.linked, "slot {slot} is already linked");
            entry.prev = None;
            entry.next = old_head;
            entry.linked = true;
        }

        match old_head {
            Some(head) => self.entry_mut(head).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
        self.linked += 1;
    }

    // == Unlink ==
    /// Removes `slot` from wherever it sits, fixing its neighbours and the
    /// head/tail handles. Must only be called on a linked entry.
    pub fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = self.entry_mut(slot);
            assert!(entry.linked, "unlinking slot {slot} which is not linked");
            let links = (entry.prev, entry.next);
            entry.prev = None;
            entry.next = None;
            entry.linked = false;
            links
        };

        match prev {
            Some(prev) => self.entry_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entry_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.linked -= 1;
    }

    // == Touch ==
    /// Marks a linked entry as most recently used.
    pub fn move_to_front(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Number of linked entries.
    pub fn len(&self) -> usize {
        self.linked
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.linked == 0
    }

    // == Ordered Keys ==
    /// Returns the linked keys from most to least recently used.
    #[cfg(test)]
    pub fn keys_mru_first(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.linked);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let entry = self.entry(slot);
            keys.push(entry.key.clone());
            cursor = entry.next;
        }
        keys
    }
}
