use std::hash::Hash;

use ahash::{HashMap, HashMapExt};
use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K, V> {
  key: K,
  value: V,
  next: Option<Index>,
  prev: Option<Index>,
}

/// An arena-backed, doubly linked recency list that owns its values.
///
/// The head is the most recently used item and the tail the least. New
/// items enter at the head, so among items that were never touched again
/// the oldest insertion is always closest to the tail.
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone, V> {
  nodes: Arena<Node<K, V>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
}

impl<K: Eq + Hash + Clone, V> LruList<K, V> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
    }
  }

  // Detaches a node from its neighbours. Does not touch the arena or map.
  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }

    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  // Links an already-allocated node in as the new head.
  fn link_front(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }

    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  pub fn get(&self, key: &K) -> Option<&V> {
    let index = *self.lookup.get(key)?;
    self.nodes.get(index).map(|node| &node.value)
  }

  pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
    let index = *self.lookup.get(key)?;
    self.nodes.get_mut(index).map(|node| &mut node.value)
  }

  /// Inserts or replaces `key` and makes it the most recently used item.
  /// Returns the replaced value, if any.
  pub fn push_front(&mut self, key: K, value: V) -> Option<V> {
    if let Some(&index) = self.lookup.get(&key) {
      let old = std::mem::replace(&mut self.nodes[index].value, value);
      self.move_to_front(&key);
      return Some(old);
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      value,
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.link_front(index);
    None
  }

  /// Marks `key` as the most recently used item. Returns `false` if absent.
  pub fn move_to_front(&mut self, key: &K) -> bool {
    match self.lookup.get(key) {
      Some(&index) => {
        if self.head != Some(index) {
          self.unlink(index);
          self.link_front(index);
        }
        true
      }
      None => false,
    }
  }

  pub fn remove(&mut self, key: &K) -> Option<V> {
    let index = self.lookup.remove(key)?;
    self.unlink(index);
    self.nodes.remove(index).map(|node| node.value)
  }

  /// Removes and returns the least recently used item.
  pub fn pop_back(&mut self) -> Option<(K, V)> {
    let tail = self.tail?;
    let key = self.nodes.get(tail)?.key.clone();
    self.remove(&key).map(|value| (key, value))
  }

  /// Iterates from the most to the least recently used item.
  pub fn iter(&self) -> Iter<'_, K, V> {
    Iter {
      list: self,
      current: self.head,
    }
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }
}

pub(crate) struct Iter<'a, K: Eq + Hash + Clone, V> {
  list: &'a LruList<K, V>,
  current: Option<Index>,
}

impl<'a, K: Eq + Hash + Clone, V> Iterator for Iter<'a, K, V> {
  type Item = (&'a K, &'a V);

  fn next(&mut self) -> Option<Self::Item> {
    let node = self.list.nodes.get(self.current?)?;
    self.current = node.next;
    Some((&node.key, &node.value))
  }
}
