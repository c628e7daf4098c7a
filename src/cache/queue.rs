//! Expiration Queue Module
//!
//! Orders cache items ascending by expiration for sweeping, refreshing and
//! capacity eviction.

use std::time::Instant;

use crate::cache::{Expiration, Item};

/// Null link in the doubly-linked list.
const SENTINEL: usize = usize::MAX;

/// A linked node holding one item.
#[derive(Debug)]
struct Node<K, V> {
    item: Item<K, V>,
    prev: usize,
    next: usize,
}

/// Arena slot. Vacant slots form a free list.
#[derive(Debug)]
enum Slot<K, V> {
    Occupied(Node<K, V>),
    Vacant(usize),
}

// == Expiration Queue ==
/// Arena-backed doubly-linked list of items sorted by expiration.
///
/// - Head = earliest expiration (next to expire, first capacity victim)
/// - Tail = latest expiration; never-expiring items sit here
///
/// Items with equal expirations stay in the order they were linked.
/// Never-expiring items link at the tail in O(1). An expiring item links by
/// walking back from the last expiring node, skipping the never-expiring
/// run, so it is O(1) whenever it expires no earlier than every other
/// expiring item, which is the case for a uniform TTL. Unlinking and
/// peeking the head are always O(1).
#[derive(Debug)]
pub struct ExpirationQueue<K, V> {
    slots: Vec<Slot<K, V>>,
    head: usize,
    tail: usize,
    /// Last node with an `Expiration::At`; everything after it never expires
    last_expiring: usize,
    free_head: usize,
    len: usize,
}

impl<K, V> ExpirationQueue<K, V> {
    // == Constructor ==
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            head: SENTINEL,
            tail: SENTINEL,
            last_expiring: SENTINEL,
            free_head: SENTINEL,
            len: 0,
        }
    }

    // == Length ==
    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.len
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // == Push ==
    /// Inserts an item at its expiration position and returns its slot.
    pub fn push(&mut self, item: Item<K, V>) -> usize {
        let node = Node {
            item,
            prev: SENTINEL,
            next: SENTINEL,
        };
        let idx = if self.free_head != SENTINEL {
            let idx = self.free_head;
            self.free_head = match self.slots[idx] {
                Slot::Vacant(next_free) => next_free,
                Slot::Occupied(_) => SENTINEL,
            };
            self.slots[idx] = Slot::Occupied(node);
            idx
        } else {
            self.slots.push(Slot::Occupied(node));
            self.slots.len() - 1
        };

        self.link(idx);
        self.len += 1;
        idx
    }

    // == Remove ==
    /// Unlinks a slot and returns its item.
    pub fn remove(&mut self, idx: usize) -> Option<Item<K, V>> {
        if self.node(idx).is_none() {
            return None;
        }
        self.unlink(idx);

        let slot = std::mem::replace(&mut self.slots[idx], Slot::Vacant(self.free_head));
        self.free_head = idx;
        self.len -= 1;

        match slot {
            Slot::Occupied(node) => Some(node.item),
            Slot::Vacant(_) => None,
        }
    }

    // == Pop Head ==
    /// Removes and returns the item with the earliest expiration.
    pub fn pop_head(&mut self) -> Option<Item<K, V>> {
        if self.head == SENTINEL {
            return None;
        }
        self.remove(self.head)
    }

    // == Peek Head ==
    /// Returns the item with the earliest expiration without removing it.
    pub fn peek_head(&self) -> Option<&Item<K, V>> {
        self.get(self.head)
    }

    /// Returns the slot of the head item.
    pub fn head_slot(&self) -> Option<usize> {
        (self.head != SENTINEL).then_some(self.head)
    }

    // == Get ==
    /// Returns the item stored in a slot.
    pub fn get(&self, idx: usize) -> Option<&Item<K, V>> {
        self.node(idx).map(|node| &node.item)
    }

    // == Update ==
    /// Mutates an item in place, then moves it to the position matching its
    /// (possibly new) expiration.
    ///
    /// The item is always relinked, so a refresh that leaves the expiration
    /// unchanged still moves it behind its ties.
    pub fn update<R>(&mut self, idx: usize, f: impl FnOnce(&mut Item<K, V>) -> R) -> Option<R> {
        let result = f(&mut self.node_mut(idx)?.item);
        self.unlink(idx);
        self.link(idx);
        Some(result)
    }

    // == Pop Expired ==
    /// Removes the head if it has expired at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Item<K, V>> {
        match self.peek_head() {
            Some(head) if head.is_expired_at(now) => self.pop_head(),
            _ => None,
        }
    }

    // == Clear ==
    /// Drops every item. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.slots.clear();
        self.head = SENTINEL;
        self.tail = SENTINEL;
        self.last_expiring = SENTINEL;
        self.free_head = SENTINEL;
        self.len = 0;
        dropped
    }

    // == Iterate ==
    /// Iterates items from head (earliest expiration) to tail.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    // == Linking ==

    fn node(&self, idx: usize) -> Option<&Node<K, V>> {
        match self.slots.get(idx) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<K, V>> {
        match self.slots.get_mut(idx) {
            Some(Slot::Occupied(node)) => Some(node),
            _ => None,
        }
    }

    fn expiration(&self, idx: usize) -> Option<Expiration> {
        self.node(idx).map(|node| node.item.expiration())
    }

    /// Links an unlinked node after the last node expiring no later than it.
    fn link(&mut self, idx: usize) {
        let Some(expires) = self.expiration(idx) else {
            return;
        };

        let mut after = match expires {
            Expiration::Never => self.tail,
            Expiration::At(_) => self.last_expiring,
        };
        while after != SENTINEL {
            match self.node(after) {
                Some(node) if node.item.expiration() > expires => after = node.prev,
                _ => break,
            }
        }

        let before = if after == SENTINEL {
            self.head
        } else {
            self.node(after).map_or(SENTINEL, |node| node.next)
        };

        if let Some(node) = self.node_mut(idx) {
            node.prev = after;
            node.next = before;
        }

        if after == SENTINEL {
            self.head = idx;
        } else if let Some(node) = self.node_mut(after) {
            node.next = idx;
        }

        if before == SENTINEL {
            self.tail = idx;
        } else if let Some(node) = self.node_mut(before) {
            node.prev = idx;
        }

        if matches!(expires, Expiration::At(_)) && after == self.last_expiring {
            self.last_expiring = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|node| (node.prev, node.next)) else {
            return;
        };

        if prev == SENTINEL {
            self.head = next;
        } else if let Some(node) = self.node_mut(prev) {
            node.next = next;
        }

        if next == SENTINEL {
            self.tail = prev;
        } else if let Some(node) = self.node_mut(next) {
            node.prev = prev;
        }

        if self.last_expiring == idx {
            self.last_expiring = prev;
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = SENTINEL;
            node.next = SENTINEL;
        }
    }
}

impl<K, V> Default for ExpirationQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// == Iterator ==
/// Head-to-tail iterator over queued items.
pub struct Iter<'a, K, V> {
    queue: &'a ExpirationQueue<K, V>,
    cursor: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = &'a Item<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.node(self.cursor)?;
        self.cursor = node.next;
        Some(&node.item)
    }
}
