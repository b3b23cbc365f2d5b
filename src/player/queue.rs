//! Playlist management for CCPlayer

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop at either end of the queue
    #[default]
    None,

    /// Wrap around at either end
    Circular,

    /// Keep returning the selected item
    Single,
}

/// Ordered media queue with a selection, shuffle and repeat
///
/// Items are compared by equality, so each item should appear once.
/// Shuffling reorders a copy of the queue with a seeded generator; turning
/// it off restores the insertion order. The selection survives both.
#[derive(Debug, Clone)]
pub struct MediaQueue<T> {
    original: Vec<T>,

    shuffled: Vec<T>,

    is_shuffled: bool,

    repeat_mode: RepeatMode,

    selected: Option<T>,

    rng: StdRng,
}

impl<T: Clone + PartialEq> Default for MediaQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> MediaQueue<T> {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Create a queue whose shuffles are reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self {
            original: Vec::new(),
            shuffled: Vec::new(),
            is_shuffled: false,
            repeat_mode: RepeatMode::None,
            selected: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Items in play order
    pub fn items(&self) -> &[T] {
        if self.is_shuffled {
            &self.shuffled
        } else {
            &self.original
        }
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }

    pub fn selected(&self) -> Option<&T> {
        self.selected.as_ref()
    }

    pub fn is_shuffled(&self) -> bool {
        self.is_shuffled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn set_repeat_mode(&mut self, repeat_mode: RepeatMode) {
        self.repeat_mode = repeat_mode;
    }

    fn current_index(&self) -> Option<usize> {
        let selected = self.selected.as_ref()?;
        self.items().iter().position(|item| item == selected)
    }

    pub fn has_previous(&self) -> bool {
        match self.current_index() {
            Some(index) => self.repeat_mode != RepeatMode::None || index > 0,
            None => false,
        }
    }

    pub fn has_next(&self) -> bool {
        match self.current_index() {
            Some(index) => self.repeat_mode != RepeatMode::None || index + 1 < self.len(),
            None => false,
        }
    }

    /// Turn shuffling on or off
    ///
    /// Turning it on draws a fresh order.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.is_shuffled == enabled {
            return;
        }
        if enabled {
            self.shuffled = self.original.clone();
            self.shuffled.shuffle(&mut self.rng);
        }
        self.is_shuffled = enabled;
    }

    /// Append an item; while shuffled it lands at a random position
    pub fn add(&mut self, item: T) {
        if self.is_shuffled {
            let index = self.rng.gen_range(0..=self.shuffled.len());
            self.shuffled.insert(index, item.clone());
        }
        self.original.push(item);
    }

    /// Remove an item; a removed selection moves to the first remaining item
    pub fn delete(&mut self, item: &T) -> bool {
        if !self.original.contains(item) {
            return false;
        }

        self.original.retain(|candidate| candidate != item);
        self.shuffled.retain(|candidate| candidate != item);

        if self.selected.as_ref() == Some(item) {
            self.selected = self.items().first().cloned();
        }
        true
    }

    /// Swap `from` for `to` in place, carrying the selection over
    pub fn replace(&mut self, from: &T, to: T) -> bool {
        if !self.original.contains(from) {
            return false;
        }

        for list in [&mut self.original, &mut self.shuffled] {
            for candidate in list.iter_mut() {
                if candidate == from {
                    *candidate = to.clone();
                }
            }
        }

        if self.selected.as_ref() == Some(from) {
            self.selected = Some(to);
        }
        true
    }

    pub fn clear(&mut self) {
        self.original.clear();
        self.shuffled.clear();
        self.selected = None;
    }

    /// Select an item of the queue, or clear the selection
    ///
    /// # Returns
    ///
    /// Whether an item is selected afterwards
    pub fn select(&mut self, item: Option<&T>) -> bool {
        self.selected = item.filter(|item| self.original.contains(item)).cloned();
        self.selected.is_some()
    }

    pub fn next(&mut self) -> Option<&T> {
        self.navigate(1)
    }

    pub fn previous(&mut self) -> Option<&T> {
        self.navigate(-1)
    }

    /// Move the selection; stays put at the ends unless repeating
    fn navigate(&mut self, offset: isize) -> Option<&T> {
        let index = self.current_index()? as isize;
        let len = self.len() as isize;

        let target = match self.repeat_mode {
            RepeatMode::None => index + offset,
            RepeatMode::Circular => (index + offset).rem_euclid(len),
            RepeatMode::Single => index,
        };

        if (0..len).contains(&target) {
            self.selected = self.items().get(target as usize).cloned();
        }
        self.selected.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(items: &[&'static str]) -> MediaQueue<&'static str> {
        let mut queue = MediaQueue::with_seed(7);
        for item in items {
            queue.add(*item);
        }
        queue
    }

    #[test]
    fn test_navigation_without_repeat() {
        let mut queue = queue(&["a", "b", "c"]);
        assert_eq!(queue.next(), None);
        assert!(!queue.has_next());

        assert!(queue.select(Some(&"a")));
        assert!(!queue.has_previous());
        assert_eq!(queue.next(), Some(&"b"));
        assert_eq!(queue.next(), Some(&"c"));
        assert!(!queue.has_next());
        assert_eq!(queue.next(), Some(&"c"));
        assert_eq!(queue.previous(), Some(&"b"));
    }

    #[test]
    fn test_repeat_modes() {
        let mut queue = queue(&["a", "b", "c"]);
        queue.select(Some(&"c"));

        queue.set_repeat_mode(RepeatMode::Circular);
        assert!(queue.has_next());
        assert_eq!(queue.next(), Some(&"a"));
        assert_eq!(queue.previous(), Some(&"c"));

        queue.set_repeat_mode(RepeatMode::Single);
        assert_eq!(queue.next(), Some(&"c"));
        assert_eq!(queue.previous(), Some(&"c"));
    }

    #[test]
    fn test_shuffle_keeps_items_and_selection() {
        let items = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut queue = queue(&items);
        queue.select(Some(&"d"));

        queue.set_shuffle(true);
        assert!(queue.is_shuffled());
        let mut shuffled = queue.items().to_vec();
        shuffled.sort();
        assert_eq!(shuffled, items.to_vec());
        assert_eq!(queue.selected(), Some(&"d"));

        queue.add("i");
        assert_eq!(queue.items().len(), 9);

        queue.set_shuffle(false);
        assert_eq!(queue.items().last(), Some(&"i"));
        assert_eq!(&queue.items()[..8], &items[..]);
    }

    #[test]
    fn test_delete_and_replace_move_selection() {
        let mut queue = queue(&["a", "b", "c"]);
        queue.select(Some(&"b"));

        assert!(queue.replace(&"b", "x"));
        assert_eq!(queue.selected(), Some(&"x"));
        assert_eq!(queue.items(), &["a", "x", "c"]);

        assert!(queue.delete(&"x"));
        assert_eq!(queue.selected(), Some(&"a"));
        assert!(!queue.delete(&"x"));

        assert!(!queue.select(Some(&"zzz")));
        assert_eq!(queue.selected(), None);

        queue.clear();
        assert!(queue.is_empty());
    }
}
