//! Selected item lists
//!
//! A selection owns its own copies of the items picked from the store, so
//! attaching DAQ scheduling data to a selected measurement never touches the
//! store. Filtering returns indices into the selection rather than another
//! list of items.

use crate::item::NamedItem;

#[derive(Debug, Clone)]
pub struct Selection<T> {
    items: Vec<T>,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Clone + NamedItem> Selection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a copy of `item`, returning its selection index.
    ///
    /// Selecting an item that is already selected returns the existing index.
    pub fn select(&mut self, item: &T) -> usize {
        if let Some(index) = self.position(item.item_name()) {
            return index;
        }
        self.items.push(item.clone());
        self.items.len() - 1
    }

    /// Remove the item at `index`; later indices shift down by one
    pub fn deselect(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|i| i.item_name() == name)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    /// Indices of items whose name contains `pattern` (case-insensitive)
    pub fn filter(&self, pattern: &str) -> Vec<usize> {
        let pattern = pattern.to_lowercase();
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.item_name().to_lowercase().contains(&pattern))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn names(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|i| i.item_name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
