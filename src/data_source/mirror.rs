use std::collections::HashMap;

use crate::api::Cursor;
use crate::document::Document;

use super::options::{Comparator, Filter};

/// Local copy of a query's results.
///
/// Documents live in an insertion-ordered arena addressed by id; the visible view
/// is a list of arena slots, filtered by the predicate and stable-sorted by the
/// comparator. Mutations are staged and take effect in the view on the next
/// [`refresh`](Mirror::refresh), so a cycle pays for one sort however many
/// documents it touches.
pub(crate) struct Mirror<T> {
    slots: Vec<Option<Document<T>>>,
    slot_of: HashMap<String, usize>,
    view: Vec<usize>,
    position_of: HashMap<String, usize>,
    predicate: Option<Filter<T>>,
    comparator: Comparator<T>,
    cursor: Option<Cursor>,
    is_last: bool,
    generation: u64,
}

impl<T> Mirror<T> {
    pub(crate) fn new(predicate: Option<Filter<T>>, comparator: Comparator<T>) -> Self {
        Self {
            slots: Vec::new(),
            slot_of: HashMap::new(),
            view: Vec::new(),
            position_of: HashMap::new(),
            predicate,
            comparator,
            cursor: None,
            is_last: false,
            generation: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.view.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Document<T>> {
        self.view
            .get(index)
            .and_then(|&slot| self.slots.get(slot))
            .and_then(Option::as_ref)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Document<T>> + '_ {
        self.view
            .iter()
            .filter_map(move |&slot| self.slots.get(slot).and_then(Option::as_ref))
    }

    /// Position of `id` in the visible view.
    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.position_of.get(id).copied()
    }

    /// Whether `id` is held at all, visible or not, counting staged mutations.
    pub(crate) fn holds(&self, id: &str) -> bool {
        self.slot_of.contains_key(id)
    }

    pub(crate) fn visible_positions(&self) -> HashMap<String, usize> {
        self.position_of.clone()
    }

    /// Stages a new document; returns `false` without touching anything when the
    /// id is already held.
    pub(crate) fn insert(&mut self, document: Document<T>) -> bool {
        if self.holds(document.id()) {
            return false;
        }
        self.slot_of.insert(document.id().to_string(), self.slots.len());
        self.slots.push(Some(document));
        true
    }

    /// Stages a replacement of the held document with the same id. The document
    /// keeps its arena slot, so ties stay where they were.
    pub(crate) fn replace(&mut self, document: Document<T>) -> bool {
        match self.slot_of.get(document.id()) {
            Some(&slot) => {
                self.slots[slot] = Some(document);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Document<T>> {
        let slot = self.slot_of.remove(id)?;
        self.slots[slot].take()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.slot_of.clear();
        self.view.clear();
        self.position_of.clear();
        self.reset_cursor();
    }

    pub(crate) fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub(crate) fn is_last(&self) -> bool {
        self.is_last
    }

    pub(crate) fn advance_cursor(&mut self, cursor: Cursor) {
        self.cursor = Some(cursor);
    }

    pub(crate) fn mark_last(&mut self) {
        self.is_last = true;
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = None;
        self.is_last = false;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Starts a new generation; work tagged with an older one must be discarded.
    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Re-derives the visible view from the arena.
    pub(crate) fn refresh(&mut self) {
        if self.slots.len() > 2 * self.slot_of.len() {
            self.compact();
        }

        let slots = &self.slots;
        let predicate = self.predicate.as_ref();
        let mut view: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(slot, document)| {
                let document = document.as_ref()?;
                predicate
                    .map_or(true, |predicate| predicate.matches(document))
                    .then_some(slot)
            })
            .collect();
        let comparator = &self.comparator;
        view.sort_by(|&left, &right| match (&slots[left], &slots[right]) {
            (Some(left), Some(right)) => comparator(left, right),
            _ => std::cmp::Ordering::Equal,
        });

        self.position_of = view
            .iter()
            .enumerate()
            .filter_map(|(index, &slot)| {
                slots[slot]
                    .as_ref()
                    .map(|document| (document.id().to_string(), index))
            })
            .collect();
        self.view = view;
    }

    /// Drops vacated slots, keeping arena order.
    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.slot_of = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, document)| {
                document
                    .as_ref()
                    .map(|document| (document.id().to_string(), slot))
            })
            .collect();
    }
}

impl<T: Clone> Mirror<T> {
    pub(crate) fn visible(&self) -> Vec<Document<T>> {
        self.iter().cloned().collect()
    }
}
