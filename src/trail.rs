//! Persistent append-only list.
//!
//! Appending returns a new list that shares every existing node with its
//! parent, so a derived facade never observes entries added by a sibling and
//! a parent never observes entries added by a child.

use std::fmt;
use std::sync::Arc;

struct Node<T> {
    value: T,
    prev: Option<Arc<Node<T>>>,
}

/// Immutable, structurally shared sequence
pub struct Trail<T> {
    last: Option<Arc<Node<T>>>,
    len: usize,
}

impl<T> Trail<T> {
    pub fn new() -> Self {
        Self { last: None, len: 0 }
    }

    /// A new trail holding every entry of `self` followed by `value`
    #[must_use]
    pub fn push(&self, value: T) -> Self {
        Self {
            last: Some(Arc::new(Node {
                value,
                prev: self.last.clone(),
            })),
            len: self.len + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries newest first
    pub fn iter_rev(&self) -> impl Iterator<Item = &T> {
        let mut cursor = self.last.as_deref();
        std::iter::from_fn(move || {
            let node = cursor?;
            cursor = node.prev.as_deref();
            Some(&node.value)
        })
    }

    /// Entries in insertion order
    pub fn to_vec(&self) -> Vec<&T> {
        let mut items: Vec<&T> = self.iter_rev().collect();
        items.reverse();
        items
    }
}

impl<T> Clone for Trail<T> {
    fn clone(&self) -> Self {
        Self {
            last: self.last.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for Trail<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Trail<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl<T> FromIterator<T> for Trail<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().fold(Trail::new(), |trail, value| trail.push(value))
    }
}
